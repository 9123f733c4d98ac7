//! Late-payment penalty accrual.
//!
//! Runs once per day, driven by an external scheduler through one
//! parameterless entry point. The whole run is idempotent: every figure is
//! derived from `now` and the stored due date, so re-running on the same day
//! rewrites identical numbers and a crashed run can simply be started again.
//!
//! RULES:
//!   - Configuration is injected, never read ambiently.
//!   - One installment failing is logged and skipped; it never aborts the
//!     batch.
//!   - At most one open penalty exists per installment; the store enforces
//!     this with a partial unique index and an upsert, and the open row is
//!     recomputed in place until the penalty is applied.

use crate::{
    config::PenaltyConfig,
    error::CrmResult,
    event::{CrmEvent, EventLogEntry},
    store::{CrmStore, InstallmentRow},
    types::round2,
};
use chrono::{DateTime, Duration, NaiveTime, Utc};

const COMPONENT: &str = "penalty_accrual";

/// Outcome counters for one accrual run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccrualRunReport {
    /// Installments matching the overdue selection.
    pub scanned: usize,
    /// Open penalties inserted or refreshed.
    pub accrued: usize,
    /// Selected rows still inside the grace window (no-ops).
    pub skipped: usize,
    /// Rows whose update failed and was logged.
    pub failed: usize,
}

pub struct PenaltyAccrualEngine {
    config: PenaltyConfig,
}

impl PenaltyAccrualEngine {
    pub fn new(config: PenaltyConfig) -> Self {
        Self { config }
    }

    /// The daily batch entry point.
    pub fn run(&self, store: &CrmStore, now: DateTime<Utc>) -> CrmResult<AccrualRunReport> {
        let today = now.date_naive();
        let cutoff = today - Duration::days(self.config.grace_period_days);
        let candidates = store.unpaid_installments_due_before(cutoff)?;

        let mut report = AccrualRunReport {
            scanned: candidates.len(),
            ..Default::default()
        };

        for installment in &candidates {
            match self.accrue_one(store, installment, now) {
                Ok(Some(event)) => {
                    report.accrued += 1;
                    store.append_event(&EventLogEntry::record(COMPONENT, now, &event)?)?;
                }
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    log::warn!(
                        "accrual failed for installment {}: {e}",
                        installment.installment_id
                    );
                }
            }
        }

        let summary = CrmEvent::AccrualRunCompleted {
            scanned: report.scanned,
            accrued: report.accrued,
            failed: report.failed,
        };
        store.append_event(&EventLogEntry::record(COMPONENT, now, &summary)?)?;
        log::info!(
            "accrual run: {} scanned, {} accrued, {} skipped, {} failed",
            report.scanned,
            report.accrued,
            report.skipped,
            report.failed
        );
        Ok(report)
    }

    /// Recompute one installment's open penalty.
    ///
    /// Days late use hour-based truncation from due-date midnight, preserved
    /// from the original scheduler's behavior rather than a calendar-day
    /// difference.
    fn accrue_one(
        &self,
        store: &CrmStore,
        installment: &InstallmentRow,
        now: DateTime<Utc>,
    ) -> CrmResult<Option<CrmEvent>> {
        let due_start = installment.due_date.and_time(NaiveTime::MIN).and_utc();
        let days_since_due = (now - due_start).num_hours() / 24;
        let days_late = days_since_due - self.config.grace_period_days;
        if days_late <= 0 {
            return Ok(None);
        }

        let amount = round2(
            installment.payment_amount * self.config.daily_rate() * days_late as f64,
        );

        store.upsert_open_penalty(
            &installment.installment_id,
            days_late,
            self.config.monthly_rate_pct,
            amount,
            now,
        )?;
        store.update_installment_arrears(&installment.installment_id, days_late, amount, now)?;

        Ok(Some(CrmEvent::PenaltyAccrued {
            installment_id: installment.installment_id.clone(),
            days_late,
            amount,
        }))
    }
}
