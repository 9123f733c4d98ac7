//! Payment reconciliation — applies gateway push notifications to payment
//! records.
//!
//! RULES:
//!   - Signature verification happens over the exact received bytes, before
//!     any store access. A mismatch rejects the event with no side effects.
//!   - Processing is idempotent per event id: the gateway may redeliver, and
//!     a terminal event id is acked without re-applying.
//!   - A missing payment record is acked anyway (retries would never
//!     succeed) while the anomaly is logged and journaled for operators.
//!   - Note history is append-only; a failure reason never overwrites
//!     earlier notes.
//!
//! Concurrency: deliveries for different payments may run concurrently;
//! writes for the same payment serialize on the store's single SQLite
//! writer, so status transitions are never interleaved.

use crate::{
    config::WebhookConfig,
    error::{CrmError, CrmResult},
    event::{CrmEvent, EventLogEntry},
    store::{CrmStore, PaymentStatus},
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const COMPONENT: &str = "reconciliation";

/// Event kinds this engine understands, decoded once at the boundary.
/// Anything else is acked and ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEventKind {
    ChargeSucceeded {
        reference: String,
        method_type: Option<String>,
        masked_identifier: Option<String>,
    },
    ChargeFailed {
        reference: String,
        reason: Option<String>,
    },
    Unknown {
        kind: String,
    },
}

#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub event_id: String,
    pub kind: GatewayEventKind,
}

/// The wire envelope: id, type tag, and a type-specific body.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChargeSucceededBody {
    reference: String,
    #[serde(default)]
    method_type: Option<String>,
    #[serde(default)]
    masked_identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargeFailedBody {
    reference: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Response to the gateway. `received` is always true on the Ok path, even
/// for anomalies, so the processor stops redelivering; `applied` says
/// whether this delivery changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebhookAck {
    pub received: bool,
    pub applied: bool,
}

impl WebhookAck {
    fn applied() -> Self {
        Self { received: true, applied: true }
    }

    fn ignored() -> Self {
        Self { received: true, applied: false }
    }
}

pub struct ReconciliationEngine {
    secret: Option<Vec<u8>>,
}

impl ReconciliationEngine {
    pub fn new(config: &WebhookConfig) -> Self {
        Self {
            secret: config.shared_secret.as_ref().map(|s| s.as_bytes().to_vec()),
        }
    }

    /// Process one pushed event: verify, decode, dispatch.
    pub fn handle(
        &self,
        store: &CrmStore,
        payload: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> CrmResult<WebhookAck> {
        match &self.secret {
            Some(secret) => verify_signature(secret, payload, signature)?,
            None => {
                // Degraded, unverified mode. Never a normal condition.
                log::warn!(
                    "SECURITY: no webhook shared secret configured; \
                     accepting unverified gateway event"
                );
            }
        }

        let event = decode_event(payload)?;

        // Redelivery of an event that already reached a terminal state.
        if let Some(status) = store.webhook_event_status(&event.event_id)? {
            if status == "processed" || status == "ignored" {
                log::info!("event {} already {status}; skipping", event.event_id);
                return Ok(WebhookAck::ignored());
            }
        }

        match &event.kind {
            GatewayEventKind::ChargeSucceeded { reference, method_type, masked_identifier } => {
                self.apply_charge_succeeded(
                    store,
                    &event.event_id,
                    reference,
                    method_type.as_deref(),
                    masked_identifier.as_deref(),
                    now,
                )
            }
            GatewayEventKind::ChargeFailed { reference, reason } => {
                self.apply_charge_failed(store, &event.event_id, reference, reason.as_deref(), now)
            }
            GatewayEventKind::Unknown { kind } => {
                log::info!("ignoring unhandled gateway event type {kind}");
                let note = CrmEvent::WebhookIgnored {
                    event_id: event.event_id.clone(),
                    kind: kind.clone(),
                };
                store.append_event(&EventLogEntry::record(COMPONENT, now, &note)?)?;
                store.record_webhook_event(&event.event_id, kind, now, "ignored", None)?;
                Ok(WebhookAck::ignored())
            }
        }
    }

    fn apply_charge_succeeded(
        &self,
        store: &CrmStore,
        event_id: &str,
        reference: &str,
        method_type: Option<&str>,
        masked_identifier: Option<&str>,
        now: DateTime<Utc>,
    ) -> CrmResult<WebhookAck> {
        let Some(payment) = store.payment_by_external_ref(reference)? else {
            return self.ack_unmatched(store, event_id, "charge.succeeded", reference, now);
        };

        if payment.status == PaymentStatus::Paid {
            log::info!("payment {} already paid; event {event_id} is a no-op", payment.payment_id);
            store.record_webhook_event(event_id, "charge.succeeded", now, "processed", None)?;
            return Ok(WebhookAck::ignored());
        }

        store.mark_payment_paid(&payment.payment_id, method_type, masked_identifier, now)?;
        store.append_payment_note(
            &payment.payment_id,
            now,
            &format!("Confirmed by gateway event {event_id}"),
        )?;
        let event = CrmEvent::PaymentConfirmed {
            payment_id: payment.payment_id.clone(),
            external_ref: reference.to_string(),
        };
        store.append_event(&EventLogEntry::record(COMPONENT, now, &event)?)?;
        store.record_webhook_event(event_id, "charge.succeeded", now, "processed", None)?;
        Ok(WebhookAck::applied())
    }

    fn apply_charge_failed(
        &self,
        store: &CrmStore,
        event_id: &str,
        reference: &str,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> CrmResult<WebhookAck> {
        let Some(payment) = store.payment_by_external_ref(reference)? else {
            return self.ack_unmatched(store, event_id, "charge.failed", reference, now);
        };

        let reason = reason.unwrap_or("unknown reason");
        store.mark_payment_failed(&payment.payment_id)?;
        store.append_payment_note(
            &payment.payment_id,
            now,
            &format!("Charge attempt failed: {reason}"),
        )?;
        let event = CrmEvent::PaymentFailed {
            payment_id: payment.payment_id.clone(),
            external_ref: reference.to_string(),
            reason: reason.to_string(),
        };
        store.append_event(&EventLogEntry::record(COMPONENT, now, &event)?)?;
        store.record_webhook_event(event_id, "charge.failed", now, "processed", None)?;
        Ok(WebhookAck::applied())
    }

    /// No matching payment record. Ack the gateway so it stops retrying,
    /// and leave the anomaly where operators will see it.
    fn ack_unmatched(
        &self,
        store: &CrmStore,
        event_id: &str,
        kind: &str,
        reference: &str,
        now: DateTime<Utc>,
    ) -> CrmResult<WebhookAck> {
        log::warn!("gateway event {event_id} references unknown payment {reference}");
        let event = CrmEvent::PaymentReferenceUnmatched {
            external_ref: reference.to_string(),
            kind: kind.to_string(),
        };
        store.append_event(&EventLogEntry::record(COMPONENT, now, &event)?)?;
        store.record_webhook_event(
            event_id,
            kind,
            now,
            "failed",
            Some(&format!("no payment with external_ref {reference}")),
        )?;
        Ok(WebhookAck::ignored())
    }
}

/// HMAC-SHA256 over the exact received byte payload, hex-encoded signature.
fn verify_signature(secret: &[u8], payload: &[u8], signature: Option<&str>) -> CrmResult<()> {
    let signature = signature.ok_or(CrmError::InvalidSignature)?;
    let provided = hex::decode(signature.trim()).map_err(|_| CrmError::InvalidSignature)?;
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| CrmError::InvalidSignature)?;
    mac.update(payload);
    mac.verify_slice(&provided).map_err(|_| CrmError::InvalidSignature)
}

/// Compute the hex signature for a payload. Used by the surrounding service
/// in tests and by local tooling that replays captured events.
pub fn sign_payload(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret)
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn decode_event(payload: &[u8]) -> CrmResult<GatewayEvent> {
    let envelope: RawEnvelope = serde_json::from_slice(payload)
        .map_err(|e| CrmError::InvalidInput(format!("malformed gateway payload: {e}")))?;

    let kind = match envelope.kind.as_str() {
        "charge.succeeded" => {
            let body: ChargeSucceededBody = serde_json::from_value(envelope.data)
                .map_err(|e| CrmError::InvalidInput(format!("malformed charge.succeeded: {e}")))?;
            GatewayEventKind::ChargeSucceeded {
                reference: body.reference,
                method_type: body.method_type,
                masked_identifier: body.masked_identifier,
            }
        }
        "charge.failed" => {
            let body: ChargeFailedBody = serde_json::from_value(envelope.data)
                .map_err(|e| CrmError::InvalidInput(format!("malformed charge.failed: {e}")))?;
            GatewayEventKind::ChargeFailed {
                reference: body.reference,
                reason: body.reason,
            }
        }
        other => GatewayEventKind::Unknown { kind: other.to_string() },
    };

    Ok(GatewayEvent {
        event_id: envelope.id,
        kind,
    })
}
