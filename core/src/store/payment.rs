use super::{invalid_text_error, CrmStore};
use crate::error::{CrmError, CrmResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentRow {
    pub payment_id: String,
    pub sale_id: String,
    pub installment_id: Option<String>,
    pub amount: f64,
    pub status: PaymentStatus,
    pub method_type: Option<String>,
    pub masked_identifier: Option<String>,
    pub external_ref: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// One entry of a payment's append-only note log.
#[derive(Debug, Clone)]
pub struct PaymentNote {
    pub id: i64,
    pub payment_id: String,
    pub noted_at: DateTime<Utc>,
    pub body: String,
}

impl CrmStore {
    pub fn insert_payment(&self, payment: &PaymentRow) -> CrmResult<()> {
        self.conn().execute(
            "INSERT INTO payment (
                payment_id, sale_id, installment_id, amount, status,
                method_type, masked_identifier, external_ref, paid_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                payment.payment_id,
                payment.sale_id,
                payment.installment_id,
                payment.amount,
                payment.status.as_str(),
                payment.method_type,
                payment.masked_identifier,
                payment.external_ref,
                payment.paid_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_payment(&self, payment_id: &str) -> CrmResult<PaymentRow> {
        self.conn()
            .query_row(
                "SELECT payment_id, sale_id, installment_id, amount, status,
                        method_type, masked_identifier, external_ref, paid_at
                 FROM payment WHERE payment_id = ?1",
                params![payment_id],
                payment_row_mapper,
            )
            .optional()?
            .ok_or_else(|| CrmError::NotFound(format!("payment {payment_id}")))
    }

    /// Look a payment up by the gateway's reference id.
    pub fn payment_by_external_ref(&self, external_ref: &str) -> CrmResult<Option<PaymentRow>> {
        self.conn()
            .query_row(
                "SELECT payment_id, sale_id, installment_id, amount, status,
                        method_type, masked_identifier, external_ref, paid_at
                 FROM payment WHERE external_ref = ?1",
                params![external_ref],
                payment_row_mapper,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn mark_payment_paid(
        &self,
        payment_id: &str,
        method_type: Option<&str>,
        masked_identifier: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> CrmResult<()> {
        let changed = self.conn().execute(
            "UPDATE payment
             SET status = 'paid',
                 method_type = COALESCE(?1, method_type),
                 masked_identifier = COALESCE(?2, masked_identifier),
                 paid_at = ?3
             WHERE payment_id = ?4",
            params![method_type, masked_identifier, paid_at, payment_id],
        )?;
        if changed == 0 {
            return Err(CrmError::NotFound(format!("payment {payment_id}")));
        }
        Ok(())
    }

    pub fn mark_payment_failed(&self, payment_id: &str) -> CrmResult<()> {
        let changed = self.conn().execute(
            "UPDATE payment SET status = 'failed' WHERE payment_id = ?1",
            params![payment_id],
        )?;
        if changed == 0 {
            return Err(CrmError::NotFound(format!("payment {payment_id}")));
        }
        Ok(())
    }

    // ── Note log ───────────────────────────────────────────────

    /// Append one note. Prior notes are never rewritten.
    pub fn append_payment_note(
        &self,
        payment_id: &str,
        noted_at: DateTime<Utc>,
        body: &str,
    ) -> CrmResult<()> {
        self.conn().execute(
            "INSERT INTO payment_note (payment_id, noted_at, body)
             VALUES (?1, ?2, ?3)",
            params![payment_id, noted_at, body],
        )?;
        Ok(())
    }

    pub fn payment_notes(&self, payment_id: &str) -> CrmResult<Vec<PaymentNote>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, payment_id, noted_at, body
             FROM payment_note WHERE payment_id = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![payment_id], |row| {
                Ok(PaymentNote {
                    id: row.get(0)?,
                    payment_id: row.get(1)?,
                    noted_at: row.get(2)?,
                    body: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Webhook idempotency ledger ─────────────────────────────

    /// Terminal status of a previously received event id, if any.
    pub fn webhook_event_status(&self, event_id: &str) -> CrmResult<Option<String>> {
        self.conn()
            .query_row(
                "SELECT status FROM webhook_event WHERE event_id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn record_webhook_event(
        &self,
        event_id: &str,
        kind: &str,
        received_at: DateTime<Utc>,
        status: &str,
        detail: Option<&str>,
    ) -> CrmResult<()> {
        self.conn().execute(
            "INSERT INTO webhook_event (event_id, kind, received_at, status, detail)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(event_id) DO UPDATE SET
                status = excluded.status,
                detail = excluded.detail",
            params![event_id, kind, received_at, status, detail],
        )?;
        Ok(())
    }
}

fn payment_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<PaymentRow> {
    Ok(PaymentRow {
        payment_id: row.get(0)?,
        sale_id: row.get(1)?,
        installment_id: row.get(2)?,
        amount: row.get(3)?,
        status: parse_payment_status(row.get::<_, String>(4)?)?,
        method_type: row.get(5)?,
        masked_identifier: row.get(6)?,
        external_ref: row.get(7)?,
        paid_at: row.get(8)?,
    })
}

fn parse_payment_status(s: String) -> rusqlite::Result<PaymentStatus> {
    match s.as_str() {
        "pending" => Ok(PaymentStatus::Pending),
        "paid" => Ok(PaymentStatus::Paid),
        "failed" => Ok(PaymentStatus::Failed),
        "refunded" => Ok(PaymentStatus::Refunded),
        _ => Err(invalid_text_error(s)),
    }
}
