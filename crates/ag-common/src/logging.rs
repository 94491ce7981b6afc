//! Tracing setup shared by the binaries.
//!
//! `RUST_LOG` drives filtering (default `info`). Setting
//! `LOG_FORMAT=json` switches to line-delimited JSON with flattened
//! event fields, span context and close events, which is what the log
//! shipper ingests; anything else gets ANSI text for local runs.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber. Call exactly once, before anything
/// logs; the service name is emitted in the startup line so multiplexed
/// log streams stay attributable.
pub fn init_logging(service: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }

    tracing::info!(service, json, "Logging initialized");
}
