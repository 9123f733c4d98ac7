//! Domain event journal.
//!
//! RULE: Engines record what happened through events, never by mutating each
//! other's tables. Anomalies that must stay visible to operators (orphan
//! gateway references, ignored webhook kinds) land here as well, because the
//! external caller is acked even when the referenced record is missing.

use crate::types::EntityId;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Every event recorded by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrmEvent {
    // ── Sale lifecycle ─────────────────────────────
    SaleBooked {
        sale_id: EntityId,
        seller_id: EntityId,
        financed_principal: f64,
        term_months: u32,
    },
    SaleSettled {
        sale_id: EntityId,
    },
    SaleCancelled {
        sale_id: EntityId,
    },
    CommissionScheduled {
        sale_id: EntityId,
        milestone: String,
        scheduled_date: NaiveDate,
    },

    // ── Penalty accrual ────────────────────────────
    PenaltyAccrued {
        installment_id: EntityId,
        days_late: i64,
        amount: f64,
    },
    AccrualRunCompleted {
        scanned: usize,
        accrued: usize,
        failed: usize,
    },

    // ── Payment reconciliation ─────────────────────
    PaymentConfirmed {
        payment_id: EntityId,
        external_ref: String,
    },
    PaymentFailed {
        payment_id: EntityId,
        external_ref: String,
        reason: String,
    },
    PaymentReferenceUnmatched {
        external_ref: String,
        kind: String,
    },
    WebhookIgnored {
        event_id: String,
        kind: String,
    },
}

impl CrmEvent {
    /// Stable string name for the event_type column in event_log.
    pub fn type_name(&self) -> &'static str {
        match self {
            CrmEvent::SaleBooked { .. } => "sale_booked",
            CrmEvent::SaleSettled { .. } => "sale_settled",
            CrmEvent::SaleCancelled { .. } => "sale_cancelled",
            CrmEvent::CommissionScheduled { .. } => "commission_scheduled",
            CrmEvent::PenaltyAccrued { .. } => "penalty_accrued",
            CrmEvent::AccrualRunCompleted { .. } => "accrual_run_completed",
            CrmEvent::PaymentConfirmed { .. } => "payment_confirmed",
            CrmEvent::PaymentFailed { .. } => "payment_failed",
            CrmEvent::PaymentReferenceUnmatched { .. } => "payment_reference_unmatched",
            CrmEvent::WebhookIgnored { .. } => "webhook_ignored",
        }
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub occurred_at: DateTime<Utc>,
    pub component: String,
    pub event_type: String,
    pub payload: String, // JSON-serialized CrmEvent
}

impl EventLogEntry {
    pub fn record(
        component: &str,
        occurred_at: DateTime<Utc>,
        event: &CrmEvent,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            id: None,
            occurred_at,
            component: component.to_string(),
            event_type: event.type_name().to_string(),
            payload: serde_json::to_string(event)?,
        })
    }
}
