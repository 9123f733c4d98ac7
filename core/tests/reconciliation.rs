//! Integration tests for the payment reconciliation engine.
//!
//! Covered behaviours:
//! 1. charge.succeeded marks the payment paid and captures method details
//! 2. Redelivering the same event id changes nothing (idempotency per id)
//! 3. A second success event for an already-paid record is a no-op
//! 4. charge.failed appends to the note log without touching earlier notes
//! 5. A bad signature is rejected before any state change
//! 6. Unknown event kinds and unmatched references are acked, not errors
//! 7. With no shared secret the engine still works, in degraded mode

use chrono::{DateTime, Utc};
use plotpay_core::{
    amortization::SaleTerms,
    commission::CommissionScheme,
    config::WebhookConfig,
    error::CrmError,
    reconciliation::{sign_payload, ReconciliationEngine},
    sales::{book_sale, NewSale},
    store::{CrmStore, PaymentRow, PaymentStatus},
};

const SECRET: &[u8] = b"whsec_test_secret";

fn now() -> DateTime<Utc> {
    "2026-03-21T12:00:00Z".parse().unwrap()
}

fn engine() -> ReconciliationEngine {
    ReconciliationEngine::new(&WebhookConfig {
        shared_secret: Some(String::from_utf8(SECRET.to_vec()).unwrap()),
    })
}

/// Store with one booked sale and one pending payment expecting gateway
/// reference `pi_123`.
fn build_store() -> (CrmStore, String) {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = CrmStore::in_memory().unwrap();
    store.migrate().unwrap();

    let booked = book_sale(
        &store,
        &NewSale {
            seller_id: "seller-1".into(),
            terms: SaleTerms {
                total_price: 60_000.0,
                down_payment: 0.0,
                term_months: 12,
                annual_rate_pct: 0.0,
                start_date: "2026-01-15".parse().unwrap(),
            },
            commission_scheme: CommissionScheme::Percentage { rate_pct: 5.0 },
        },
        now(),
    )
    .unwrap();

    let payment_id = "pay-1".to_string();
    store
        .insert_payment(&PaymentRow {
            payment_id: payment_id.clone(),
            sale_id: booked.sale_id,
            installment_id: None,
            amount: 5_000.0,
            status: PaymentStatus::Pending,
            method_type: None,
            masked_identifier: None,
            external_ref: Some("pi_123".into()),
            paid_at: None,
        })
        .unwrap();

    (store, payment_id)
}

fn success_payload(event_id: &str) -> Vec<u8> {
    format!(
        r#"{{"id":"{event_id}","type":"charge.succeeded","data":{{"reference":"pi_123","method_type":"card","masked_identifier":"4242"}}}}"#
    )
    .into_bytes()
}

fn failure_payload(event_id: &str, reason: &str) -> Vec<u8> {
    format!(
        r#"{{"id":"{event_id}","type":"charge.failed","data":{{"reference":"pi_123","reason":"{reason}"}}}}"#
    )
    .into_bytes()
}

fn signed(payload: &[u8]) -> String {
    sign_payload(SECRET, payload)
}

#[test]
fn charge_succeeded_marks_payment_paid() {
    let (store, payment_id) = build_store();
    let payload = success_payload("evt_1");

    let ack = engine()
        .handle(&store, &payload, Some(&signed(&payload)), now())
        .unwrap();
    assert!(ack.received);
    assert!(ack.applied);

    let payment = store.get_payment(&payment_id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Paid);
    assert_eq!(payment.method_type.as_deref(), Some("card"));
    assert_eq!(payment.masked_identifier.as_deref(), Some("4242"));
    assert!(payment.paid_at.is_some());

    let notes = store.payment_notes(&payment_id).unwrap();
    assert_eq!(notes.len(), 1);
}

#[test]
fn redelivered_event_id_is_not_reapplied() {
    let (store, payment_id) = build_store();
    let payload = success_payload("evt_1");
    let sig = signed(&payload);

    engine().handle(&store, &payload, Some(&sig), now()).unwrap();
    let ack = engine().handle(&store, &payload, Some(&sig), now()).unwrap();

    assert!(ack.received);
    assert!(!ack.applied);
    let payment = store.get_payment(&payment_id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Paid);
    // Still exactly one note: the redelivery added nothing.
    assert_eq!(store.payment_notes(&payment_id).unwrap().len(), 1);
}

#[test]
fn second_success_event_for_paid_record_is_noop() {
    let (store, payment_id) = build_store();
    let first = success_payload("evt_1");
    engine()
        .handle(&store, &first, Some(&signed(&first)), now())
        .unwrap();

    // Different event id, same charge. The record is already paid.
    let second = success_payload("evt_2");
    let ack = engine()
        .handle(&store, &second, Some(&signed(&second)), now())
        .unwrap();

    assert!(ack.received);
    assert!(!ack.applied);
    assert_eq!(
        store.get_payment(&payment_id).unwrap().status,
        PaymentStatus::Paid
    );
    assert_eq!(store.payment_notes(&payment_id).unwrap().len(), 1);
}

#[test]
fn charge_failed_appends_to_note_log() {
    let (store, payment_id) = build_store();

    let first = failure_payload("evt_1", "card_declined");
    engine()
        .handle(&store, &first, Some(&signed(&first)), now())
        .unwrap();

    let second = failure_payload("evt_2", "insufficient_funds");
    engine()
        .handle(&store, &second, Some(&signed(&second)), now())
        .unwrap();

    let payment = store.get_payment(&payment_id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);

    // Append-only: both reasons present, in order, first untouched.
    let notes = store.payment_notes(&payment_id).unwrap();
    assert_eq!(notes.len(), 2);
    assert!(notes[0].body.contains("card_declined"));
    assert!(notes[1].body.contains("insufficient_funds"));
}

#[test]
fn bad_signature_rejected_without_side_effects() {
    let (store, payment_id) = build_store();
    let payload = success_payload("evt_1");

    let err = engine()
        .handle(&store, &payload, Some("deadbeef"), now())
        .unwrap_err();
    assert!(matches!(err, CrmError::InvalidSignature));

    let missing = engine().handle(&store, &payload, None, now()).unwrap_err();
    assert!(matches!(missing, CrmError::InvalidSignature));

    assert_eq!(
        store.get_payment(&payment_id).unwrap().status,
        PaymentStatus::Pending
    );
    assert_eq!(store.webhook_event_status("evt_1").unwrap(), None);
}

#[test]
fn unknown_kind_is_acked_and_journaled() {
    let (store, _) = build_store();
    let payload = br#"{"id":"evt_9","type":"customer.created","data":{}}"#.to_vec();

    let ack = engine()
        .handle(&store, &payload, Some(&signed(&payload)), now())
        .unwrap();
    assert!(ack.received);
    assert!(!ack.applied);
    assert_eq!(
        store.webhook_event_status("evt_9").unwrap().as_deref(),
        Some("ignored")
    );
}

#[test]
fn unmatched_reference_is_acked_but_recorded() {
    let (store, _) = build_store();
    let payload =
        br#"{"id":"evt_5","type":"charge.succeeded","data":{"reference":"pi_missing"}}"#.to_vec();

    let ack = engine()
        .handle(&store, &payload, Some(&signed(&payload)), now())
        .unwrap();
    assert!(ack.received, "gateway must be acked to stop redelivery");
    assert!(!ack.applied);

    let anomalies = store.events_of_type("payment_reference_unmatched").unwrap();
    assert_eq!(anomalies.len(), 1);
    assert_eq!(
        store.webhook_event_status("evt_5").unwrap().as_deref(),
        Some("failed")
    );
}

#[test]
fn missing_secret_runs_degraded_but_unverified() {
    let (store, payment_id) = build_store();
    let unverified = ReconciliationEngine::new(&WebhookConfig { shared_secret: None });

    let payload = success_payload("evt_1");
    let ack = unverified.handle(&store, &payload, None, now()).unwrap();
    assert!(ack.applied);
    assert_eq!(
        store.get_payment(&payment_id).unwrap().status,
        PaymentStatus::Paid
    );
}
