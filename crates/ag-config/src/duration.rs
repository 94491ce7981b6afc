//! Duration-string parsing
//!
//! Expiry and TTL settings are given as short duration strings
//! ("500ms", "15m", "7d"). A bare number is taken as milliseconds.

use std::time::Duration;

use crate::ConfigError;

/// Parse a duration string into a [`Duration`].
///
/// Supported suffixes: `ms`, `s`, `m`, `h`, `d`, `w`. Case-insensitive,
/// surrounding whitespace ignored.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidDuration(value.to_string()));
    }

    let split = trimmed
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());

    let (digits, unit) = trimmed.split_at(split);
    let amount: u64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(value.to_string()))?;

    let unit_millis: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        _ => return Err(ConfigError::InvalidDuration(value.to_string())),
    };

    let millis = amount
        .checked_mul(unit_millis)
        .ok_or_else(|| ConfigError::InvalidDuration(value.to_string()))?;

    Ok(Duration::from_millis(millis))
}
