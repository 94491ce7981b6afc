//! Audit Event Capture
//!
//! Every audited write path calls [`ChangeRecorder::record`] with the
//! mutated entity, the operation, and the request context, inside the
//! same database transaction as the write. The outbox row therefore
//! commits or rolls back together with the business change; delivery to
//! the broker happens later, from the outbox publisher.
//!
//! Entities opt in through the [`Auditable`] capability trait instead of
//! runtime reflection over ORM metadata.

use ag_common::RequestContext;
use ag_outbox::NewOutboxRecord;
use chrono::Utc;
use sqlx::{Postgres, Transaction};

use crate::shared::error::{PlatformError, Result};

/// Capability implemented by every entity whose mutations are audited.
pub trait Auditable: Sync {
    fn entity_name(&self) -> &'static str;

    /// Primary key as column-name → value pairs; composite keys return
    /// multiple entries.
    fn primary_key(&self) -> serde_json::Map<String, serde_json::Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOp {
    Created,
    Updated,
    Deleted,
}

impl AuditOp {
    fn action_suffix(&self) -> &'static str {
        match self {
            AuditOp::Created => "CREATED",
            AuditOp::Updated => "UPDATED",
            AuditOp::Deleted => "DELETED",
        }
    }

    fn pattern_suffix(&self) -> &'static str {
        match self {
            AuditOp::Created => "created",
            AuditOp::Updated => "updated",
            AuditOp::Deleted => "deleted",
        }
    }
}

/// CamelCase entity name to snake_case routing segment.
pub fn to_snake_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    let mut prev_lower = false;
    for c in value.chars() {
        if c.is_whitespace() || c == '-' {
            out.push('_');
            prev_lower = false;
        } else if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

/// Routing pattern for an audited mutation, e.g. `user_created`.
pub fn audit_pattern(entity_name: &str, op: AuditOp) -> String {
    format!("{}_{}", to_snake_case(entity_name), op.pattern_suffix())
}

/// Audit payload as published to the broker.
pub fn audit_payload(
    entity: &dyn Auditable,
    op: AuditOp,
    ctx: &RequestContext,
) -> serde_json::Value {
    let actor = ctx.actor();
    serde_json::json!({
        "action": format!("{}_{}", entity.entity_name().to_uppercase(), op.action_suffix()),
        "entity": entity.entity_name(),
        "primary_key": entity.primary_key(),
        "done_by_id": actor.as_ref().map(|a| a.id.clone()),
        "done_by_email": actor.as_ref().map(|a| a.email.clone()),
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Writes audit records into the outbox on the caller's transaction.
#[derive(Clone)]
pub struct ChangeRecorder {
    destination: String,
}

impl ChangeRecorder {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    /// Record a mutation. Must be called with the transaction that
    /// carries the business write itself; the outbox entity is excluded
    /// to keep audit writes from amplifying themselves.
    pub async fn record(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        op: AuditOp,
        entity: &dyn Auditable,
        ctx: &RequestContext,
    ) -> Result<()> {
        if entity.entity_name() == "Outbox" {
            return Ok(());
        }

        let record = NewOutboxRecord {
            destination: self.destination.clone(),
            pattern: audit_pattern(entity.entity_name(), op),
            payload: audit_payload(entity, op, ctx),
        };

        ag_outbox::postgres::insert_on(&mut **tx, &record)
            .await
            .map_err(|e| PlatformError::internal(format!("Failed to record audit event: {e}")))?;

        Ok(())
    }
}
