use super::{invalid_text_error, CrmStore};
use crate::{
    commission::{Milestone, TrancheStatus},
    error::{CrmError, CrmResult},
};
use chrono::NaiveDate;
use rusqlite::params;

#[derive(Debug, Clone)]
pub struct TrancheRow {
    pub tranche_id: String,
    pub sale_id: String,
    pub milestone: Milestone,
    pub weight_pct: f64,
    pub amount: f64,
    pub status: TrancheStatus,
    pub scheduled_date: Option<NaiveDate>,
}

impl CrmStore {
    pub fn tranches_for_sale(&self, sale_id: &str) -> CrmResult<Vec<TrancheRow>> {
        let mut stmt = self.conn().prepare(
            "SELECT tranche_id, sale_id, milestone, weight_pct, amount, status, scheduled_date
             FROM commission_tranche WHERE sale_id = ?1
             ORDER BY CASE milestone
                 WHEN 'down_payment' THEN 1
                 WHEN 'contract_signing' THEN 2
                 ELSE 3
             END",
        )?;
        let rows = stmt
            .query_map(params![sale_id], tranche_row_mapper)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Stamp a pending tranche with its payment date once the milestone
    /// fires. Re-stamping a tranche that already left `pending` is a no-op,
    /// so replayed milestone notifications do not move dates around.
    pub fn schedule_tranche(
        &self,
        sale_id: &str,
        milestone: Milestone,
        scheduled_date: NaiveDate,
    ) -> CrmResult<bool> {
        let changed = self.conn().execute(
            "UPDATE commission_tranche
             SET status = 'scheduled', scheduled_date = ?1
             WHERE sale_id = ?2 AND milestone = ?3 AND status = 'pending'",
            params![scheduled_date, sale_id, milestone.as_str()],
        )?;
        if changed == 0 {
            // Distinguish "already scheduled" from "no such tranche".
            let exists: i64 = self.conn().query_row(
                "SELECT COUNT(*) FROM commission_tranche
                 WHERE sale_id = ?1 AND milestone = ?2",
                params![sale_id, milestone.as_str()],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Err(CrmError::NotFound(format!(
                    "tranche {} for sale {sale_id}",
                    milestone.as_str()
                )));
            }
            return Ok(false);
        }
        Ok(true)
    }

    pub fn mark_tranche_paid(&self, sale_id: &str, milestone: Milestone) -> CrmResult<()> {
        let changed = self.conn().execute(
            "UPDATE commission_tranche
             SET status = 'paid'
             WHERE sale_id = ?1 AND milestone = ?2 AND status = 'scheduled'",
            params![sale_id, milestone.as_str()],
        )?;
        if changed == 0 {
            return Err(CrmError::NotFound(format!(
                "scheduled tranche {} for sale {sale_id}",
                milestone.as_str()
            )));
        }
        Ok(())
    }
}

fn tranche_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrancheRow> {
    Ok(TrancheRow {
        tranche_id: row.get(0)?,
        sale_id: row.get(1)?,
        milestone: parse_milestone(row.get::<_, String>(2)?)?,
        weight_pct: row.get(3)?,
        amount: row.get(4)?,
        status: parse_tranche_status(row.get::<_, String>(5)?)?,
        scheduled_date: row.get(6)?,
    })
}

fn parse_milestone(s: String) -> rusqlite::Result<Milestone> {
    Milestone::parse(&s).map_err(|_| invalid_text_error(s))
}

fn parse_tranche_status(s: String) -> rusqlite::Result<TrancheStatus> {
    match s.as_str() {
        "pending" => Ok(TrancheStatus::Pending),
        "scheduled" => Ok(TrancheStatus::Scheduled),
        "paid" => Ok(TrancheStatus::Paid),
        _ => Err(invalid_text_error(s)),
    }
}
