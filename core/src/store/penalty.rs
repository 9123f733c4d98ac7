use super::CrmStore;
use crate::error::{CrmError, CrmResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

/// One penalty record. Open (`applied = false`) rows are recomputed in
/// place by the accrual engine; applied rows are immutable history.
#[derive(Debug, Clone)]
pub struct PenaltyRow {
    pub penalty_id: String,
    pub installment_id: String,
    pub days_late: i64,
    pub monthly_rate_pct: f64,
    pub amount: f64,
    pub computed_at: DateTime<Utc>,
    pub applied: bool,
}

impl CrmStore {
    /// Insert or refresh the single open penalty for an installment.
    ///
    /// The partial unique index over open rows makes this a true upsert:
    /// concurrent or repeated runs converge on one open row per installment
    /// without a read-then-write race. Returns the open row's id.
    pub fn upsert_open_penalty(
        &self,
        installment_id: &str,
        days_late: i64,
        monthly_rate_pct: f64,
        amount: f64,
        computed_at: DateTime<Utc>,
    ) -> CrmResult<String> {
        self.conn().execute(
            "INSERT INTO penalty (
                penalty_id, installment_id, days_late, monthly_rate_pct,
                amount, computed_at, applied
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)
            ON CONFLICT(installment_id) WHERE applied = 0 DO UPDATE SET
                days_late = excluded.days_late,
                monthly_rate_pct = excluded.monthly_rate_pct,
                amount = excluded.amount,
                computed_at = excluded.computed_at",
            params![
                uuid::Uuid::new_v4().to_string(),
                installment_id,
                days_late,
                monthly_rate_pct,
                amount,
                computed_at,
            ],
        )?;
        let id: String = self.conn().query_row(
            "SELECT penalty_id FROM penalty
             WHERE installment_id = ?1 AND applied = 0",
            params![installment_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn open_penalty_for(&self, installment_id: &str) -> CrmResult<Option<PenaltyRow>> {
        self.conn()
            .query_row(
                "SELECT penalty_id, installment_id, days_late, monthly_rate_pct,
                        amount, computed_at, applied
                 FROM penalty
                 WHERE installment_id = ?1 AND applied = 0",
                params![installment_id],
                penalty_row_mapper,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Settle an open penalty. Applied penalties are historical and never
    /// recomputed again.
    pub fn apply_penalty(&self, penalty_id: &str) -> CrmResult<()> {
        let changed = self.conn().execute(
            "UPDATE penalty SET applied = 1 WHERE penalty_id = ?1 AND applied = 0",
            params![penalty_id],
        )?;
        if changed == 0 {
            return Err(CrmError::NotFound(format!("open penalty {penalty_id}")));
        }
        Ok(())
    }

    pub fn penalties_for_installment(&self, installment_id: &str) -> CrmResult<Vec<PenaltyRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT penalty_id, installment_id, days_late, monthly_rate_pct,
                    amount, computed_at, applied
             FROM penalty WHERE installment_id = ?1
             ORDER BY computed_at ASC",
        )?;
        let rows = stmt
            .query_map(params![installment_id], penalty_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn open_penalty_count(&self) -> CrmResult<i64> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM penalty WHERE applied = 0",
                [],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }
}

fn penalty_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<PenaltyRow> {
    Ok(PenaltyRow {
        penalty_id: row.get(0)?,
        installment_id: row.get(1)?,
        days_late: row.get(2)?,
        monthly_rate_pct: row.get(3)?,
        amount: row.get(4)?,
        computed_at: row.get(5)?,
        applied: row.get::<_, i64>(6)? != 0,
    })
}
