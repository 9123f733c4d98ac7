//! Sale lifecycle: booking, milestone handling, settlement, cancellation.
//!
//! Booking composes the two pure calculators and persists their output in
//! one transaction — a rejected input leaves no partial state behind.
//! Milestone triggers (down payment received, contract signed, sale
//! settled) arrive from outside; this module turns them into tranche
//! scheduling and status transitions. Sales are never deleted.

use crate::{
    amortization::{generate_schedule, AmortizationSchedule, SaleTerms},
    commission::{split_commission, CommissionPlan, CommissionScheme, Milestone},
    error::{CrmError, CrmResult},
    event::{CrmEvent, EventLogEntry},
    store::{CrmStore, InstallmentRow, InstallmentStatus, SaleRow, SaleStatus},
};
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

const COMPONENT: &str = "sales";

#[derive(Debug, Clone)]
pub struct NewSale {
    pub seller_id: String,
    pub terms: SaleTerms,
    pub commission_scheme: CommissionScheme,
}

#[derive(Debug, Clone)]
pub struct BookedSale {
    pub sale_id: String,
    pub schedule: AmortizationSchedule,
    pub commission: CommissionPlan,
}

/// Validate terms, generate the schedule and commission split, and persist
/// the lot atomically.
pub fn book_sale(store: &CrmStore, new_sale: &NewSale, now: DateTime<Utc>) -> CrmResult<BookedSale> {
    let schedule = generate_schedule(&new_sale.terms)?;
    let commission = split_commission(new_sale.terms.total_price, &new_sale.commission_scheme)?;

    let sale_id = Uuid::new_v4().to_string();
    let sale = SaleRow {
        sale_id: sale_id.clone(),
        seller_id: new_sale.seller_id.clone(),
        total_price: new_sale.terms.total_price,
        down_payment: new_sale.terms.down_payment,
        term_months: new_sale.terms.term_months,
        annual_rate_pct: new_sale.terms.annual_rate_pct,
        start_date: new_sale.terms.start_date,
        status: SaleStatus::Active,
        created_at: now,
    };

    let installments: Vec<InstallmentRow> = schedule
        .rows
        .iter()
        .map(|row| InstallmentRow {
            installment_id: Uuid::new_v4().to_string(),
            sale_id: sale_id.clone(),
            seq_no: row.seq_no,
            due_date: row.due_date,
            payment_amount: row.payment_amount,
            interest_portion: row.interest_portion,
            principal_portion: row.principal_portion,
            balance_after: row.balance_after,
            status: InstallmentStatus::Pending,
            accrued_penalty: 0.0,
            days_late: 0,
            last_accrual_at: None,
        })
        .collect();

    store.insert_sale_with_plan(&sale, &installments, &commission.tranches)?;

    let event = CrmEvent::SaleBooked {
        sale_id: sale_id.clone(),
        seller_id: new_sale.seller_id.clone(),
        financed_principal: schedule.financed_principal,
        term_months: schedule.term_months,
    };
    store.append_event(&EventLogEntry::record(COMPONENT, now, &event)?)?;
    log::info!(
        "booked sale {sale_id}: {} installments, commission {}",
        schedule.rows.len(),
        commission.total
    );

    Ok(BookedSale {
        sale_id,
        schedule,
        commission,
    })
}

/// A milestone fired: stamp the matching tranche with its payment date.
/// Returns false when the tranche had already left `pending` (replayed
/// notification).
pub fn record_milestone(
    store: &CrmStore,
    sale_id: &str,
    milestone: Milestone,
    scheduled_date: NaiveDate,
    now: DateTime<Utc>,
) -> CrmResult<bool> {
    let newly_scheduled = store.schedule_tranche(sale_id, milestone, scheduled_date)?;
    if newly_scheduled {
        let event = CrmEvent::CommissionScheduled {
            sale_id: sale_id.to_string(),
            milestone: milestone.as_str().to_string(),
            scheduled_date,
        };
        store.append_event(&EventLogEntry::record(COMPONENT, now, &event)?)?;
    }
    Ok(newly_scheduled)
}

/// Settle the sale once every installment is paid. Fires the settlement
/// milestone for the final commission tranche. Returns false while unpaid
/// installments remain.
pub fn settle_if_paid(store: &CrmStore, sale_id: &str, now: DateTime<Utc>) -> CrmResult<bool> {
    let sale = store.get_sale(sale_id)?;
    if sale.status != SaleStatus::Active {
        return Ok(false);
    }
    if store.unpaid_installment_count(sale_id)? > 0 {
        return Ok(false);
    }

    store.update_sale_status(sale_id, SaleStatus::Settled)?;
    record_milestone(store, sale_id, Milestone::Settlement, now.date_naive(), now)?;

    let event = CrmEvent::SaleSettled {
        sale_id: sale_id.to_string(),
    };
    store.append_event(&EventLogEntry::record(COMPONENT, now, &event)?)?;
    log::info!("sale {sale_id} settled");
    Ok(true)
}

/// Cancel an active sale. Cancelling twice is a no-op; a settled sale can
/// no longer be cancelled.
pub fn cancel_sale(store: &CrmStore, sale_id: &str, now: DateTime<Utc>) -> CrmResult<()> {
    let sale = store.get_sale(sale_id)?;
    match sale.status {
        SaleStatus::Cancelled => Ok(()),
        SaleStatus::Settled => Err(CrmError::InvalidInput(format!(
            "sale {sale_id} is settled and cannot be cancelled"
        ))),
        SaleStatus::Active => {
            store.update_sale_status(sale_id, SaleStatus::Cancelled)?;
            let event = CrmEvent::SaleCancelled {
                sale_id: sale_id.to_string(),
            };
            store.append_event(&EventLogEntry::record(COMPONENT, now, &event)?)?;
            log::info!("sale {sale_id} cancelled");
            Ok(())
        }
    }
}
