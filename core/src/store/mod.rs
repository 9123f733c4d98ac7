//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Engines call store methods — they never execute SQL directly.

mod commission;
mod payment;
mod penalty;
mod token;

pub use commission::TrancheRow;
pub use payment::{PaymentNote, PaymentRow, PaymentStatus};
pub use penalty::PenaltyRow;
pub use token::AccessTokenRow;

use crate::{
    commission::CommissionTranche,
    error::{CrmError, CrmResult},
    event::EventLogEntry,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

pub struct CrmStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl CrmStore {
    pub fn open(path: &str) -> CrmResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> CrmResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> CrmResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> CrmResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_commissions.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_penalties.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_payments.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/005_access_tokens.sql"))?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Sale ───────────────────────────────────────────────────

    pub fn get_sale(&self, sale_id: &str) -> CrmResult<SaleRow> {
        self.conn
            .query_row(
                "SELECT sale_id, seller_id, total_price, down_payment, term_months,
                        annual_rate_pct, start_date, status, created_at
                 FROM sale WHERE sale_id = ?1",
                params![sale_id],
                sale_row_mapper,
            )
            .optional()?
            .ok_or_else(|| CrmError::NotFound(format!("sale {sale_id}")))
    }

    pub fn update_sale_status(&self, sale_id: &str, status: SaleStatus) -> CrmResult<()> {
        let changed = self.conn.execute(
            "UPDATE sale SET status = ?1 WHERE sale_id = ?2",
            params![status.as_str(), sale_id],
        )?;
        if changed == 0 {
            return Err(CrmError::NotFound(format!("sale {sale_id}")));
        }
        Ok(())
    }

    /// Persist a booked sale together with its full schedule and commission
    /// tranches in one transaction, so a failed booking leaves nothing behind.
    pub fn insert_sale_with_plan(
        &self,
        sale: &SaleRow,
        installments: &[InstallmentRow],
        tranches: &[CommissionTranche],
    ) -> CrmResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO sale (
                sale_id, seller_id, total_price, down_payment, term_months,
                annual_rate_pct, start_date, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                sale.sale_id,
                sale.seller_id,
                sale.total_price,
                sale.down_payment,
                sale.term_months,
                sale.annual_rate_pct,
                sale.start_date,
                sale.status.as_str(),
                sale.created_at,
            ],
        )?;
        for row in installments {
            tx.execute(
                "INSERT INTO installment (
                    installment_id, sale_id, seq_no, due_date, payment_amount,
                    interest_portion, principal_portion, balance_after, status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.installment_id,
                    row.sale_id,
                    row.seq_no,
                    row.due_date,
                    row.payment_amount,
                    row.interest_portion,
                    row.principal_portion,
                    row.balance_after,
                    row.status.as_str(),
                ],
            )?;
        }
        for tranche in tranches {
            tx.execute(
                "INSERT INTO commission_tranche (
                    tranche_id, sale_id, milestone, weight_pct, amount, status, scheduled_date
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    sale.sale_id,
                    tranche.milestone.as_str(),
                    tranche.milestone.weight() * 100.0,
                    tranche.amount,
                    tranche.status.as_str(),
                    tranche.scheduled_date,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // ── Installment ────────────────────────────────────────────

    pub fn installments_for_sale(&self, sale_id: &str) -> CrmResult<Vec<InstallmentRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT installment_id, sale_id, seq_no, due_date, payment_amount,
                    interest_portion, principal_portion, balance_after, status,
                    accrued_penalty, days_late, last_accrual_at
             FROM installment WHERE sale_id = ?1
             ORDER BY seq_no ASC",
        )?;
        let rows = stmt
            .query_map(params![sale_id], installment_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_installment(&self, installment_id: &str) -> CrmResult<InstallmentRow> {
        self.conn
            .query_row(
                "SELECT installment_id, sale_id, seq_no, due_date, payment_amount,
                        interest_portion, principal_portion, balance_after, status,
                        accrued_penalty, days_late, last_accrual_at
                 FROM installment WHERE installment_id = ?1",
                params![installment_id],
                installment_row_mapper,
            )
            .optional()?
            .ok_or_else(|| CrmError::NotFound(format!("installment {installment_id}")))
    }

    /// Every installment still awaiting payment whose due date is strictly
    /// before the cutoff. The accrual engine's selection query.
    pub fn unpaid_installments_due_before(
        &self,
        cutoff: NaiveDate,
    ) -> CrmResult<Vec<InstallmentRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT installment_id, sale_id, seq_no, due_date, payment_amount,
                    interest_portion, principal_portion, balance_after, status,
                    accrued_penalty, days_late, last_accrual_at
             FROM installment
             WHERE status IN ('pending', 'partial', 'overdue') AND due_date < ?1
             ORDER BY due_date ASC, seq_no ASC",
        )?;
        let rows = stmt
            .query_map(params![cutoff], installment_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn set_installment_status(
        &self,
        installment_id: &str,
        status: InstallmentStatus,
    ) -> CrmResult<()> {
        let changed = self.conn.execute(
            "UPDATE installment SET status = ?1 WHERE installment_id = ?2",
            params![status.as_str(), installment_id],
        )?;
        if changed == 0 {
            return Err(CrmError::NotFound(format!("installment {installment_id}")));
        }
        Ok(())
    }

    /// Refresh the denormalized arrears summary and flag the row overdue.
    /// Only `pending` flips to `overdue`; partial installments keep their
    /// status.
    pub fn update_installment_arrears(
        &self,
        installment_id: &str,
        days_late: i64,
        accrued_penalty: f64,
        computed_at: DateTime<Utc>,
    ) -> CrmResult<()> {
        self.conn.execute(
            "UPDATE installment
             SET accrued_penalty = ?1,
                 days_late = ?2,
                 last_accrual_at = ?3,
                 status = CASE WHEN status = 'pending' THEN 'overdue' ELSE status END
             WHERE installment_id = ?4",
            params![accrued_penalty, days_late, computed_at, installment_id],
        )?;
        Ok(())
    }

    pub fn unpaid_installment_count(&self, sale_id: &str) -> CrmResult<i64> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM installment
                 WHERE sale_id = ?1 AND status != 'paid'",
                params![sale_id],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    // ── Test helper methods ────────────────────────────────────

    pub fn sale_count(&self) -> CrmResult<i64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM sale", [], |row| row.get(0))
            .map_err(Into::into)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &EventLogEntry) -> CrmResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (occurred_at, component, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.occurred_at,
                entry.component,
                entry.event_type,
                entry.payload,
            ],
        )?;
        Ok(())
    }

    pub fn events_of_type(&self, event_type: &str) -> CrmResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, occurred_at, component, event_type, payload
             FROM event_log WHERE event_type = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![event_type], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    occurred_at: row.get(1)?,
                    component: row.get(2)?,
                    event_type: row.get(3)?,
                    payload: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

// ── Row types ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleStatus {
    Active,
    Cancelled,
    Settled,
}

impl SaleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SaleStatus::Active => "active",
            SaleStatus::Cancelled => "cancelled",
            SaleStatus::Settled => "settled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallmentStatus {
    Pending,
    Partial,
    Paid,
    Overdue,
}

impl InstallmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallmentStatus::Pending => "pending",
            InstallmentStatus::Partial => "partial",
            InstallmentStatus::Paid => "paid",
            InstallmentStatus::Overdue => "overdue",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SaleRow {
    pub sale_id: String,
    pub seller_id: String,
    pub total_price: f64,
    pub down_payment: f64,
    pub term_months: u32,
    pub annual_rate_pct: f64,
    pub start_date: NaiveDate,
    pub status: SaleStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct InstallmentRow {
    pub installment_id: String,
    pub sale_id: String,
    pub seq_no: u32,
    pub due_date: NaiveDate,
    pub payment_amount: f64,
    pub interest_portion: f64,
    pub principal_portion: f64,
    pub balance_after: f64,
    pub status: InstallmentStatus,
    pub accrued_penalty: f64,
    pub days_late: i64,
    pub last_accrual_at: Option<DateTime<Utc>>,
}

fn sale_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<SaleRow> {
    Ok(SaleRow {
        sale_id: row.get(0)?,
        seller_id: row.get(1)?,
        total_price: row.get(2)?,
        down_payment: row.get(3)?,
        term_months: row.get(4)?,
        annual_rate_pct: row.get(5)?,
        start_date: row.get(6)?,
        status: parse_sale_status(row.get::<_, String>(7)?)?,
        created_at: row.get(8)?,
    })
}

fn installment_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<InstallmentRow> {
    Ok(InstallmentRow {
        installment_id: row.get(0)?,
        sale_id: row.get(1)?,
        seq_no: row.get(2)?,
        due_date: row.get(3)?,
        payment_amount: row.get(4)?,
        interest_portion: row.get(5)?,
        principal_portion: row.get(6)?,
        balance_after: row.get(7)?,
        status: parse_installment_status(row.get::<_, String>(8)?)?,
        accrued_penalty: row.get(9)?,
        days_late: row.get(10)?,
        last_accrual_at: row.get(11)?,
    })
}

fn parse_sale_status(s: String) -> rusqlite::Result<SaleStatus> {
    match s.as_str() {
        "active" => Ok(SaleStatus::Active),
        "cancelled" => Ok(SaleStatus::Cancelled),
        "settled" => Ok(SaleStatus::Settled),
        _ => Err(invalid_text_error(s)),
    }
}

fn parse_installment_status(s: String) -> rusqlite::Result<InstallmentStatus> {
    match s.as_str() {
        "pending" => Ok(InstallmentStatus::Pending),
        "partial" => Ok(InstallmentStatus::Partial),
        "paid" => Ok(InstallmentStatus::Paid),
        "overdue" => Ok(InstallmentStatus::Overdue),
        _ => Err(invalid_text_error(s)),
    }
}

/// A CHECK-constrained column held a value the mappers do not know.
pub(crate) fn invalid_text_error(value: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("unexpected enum value: {value}").into(),
    )
}
