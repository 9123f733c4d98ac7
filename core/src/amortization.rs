//! Amortization schedule generator.
//!
//! Pure computation: sale terms in, fixed-payment schedule out. No store
//! access, safe for unlimited concurrent use.
//!
//! Rounding policy:
//!   - Intermediate balances and interest stay at full precision; every
//!     emitted currency figure is rounded to cents exactly once.
//!   - The final row's principal portion is forced to whatever clears the
//!     remaining balance, so the emitted principal portions always sum to
//!     the financed principal to the cent and the last balance is 0.00.
//!   - Due dates advance the start date by whole calendar months. When the
//!     target month is shorter the day-of-month is clamped (Jan 31 + 1
//!     month = Feb 28/29). This truncation is deliberate and documented
//!     here, not silently corrected elsewhere.

use crate::{
    error::{CrmError, CrmResult},
    types::round2,
};
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Financing terms of a booked sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleTerms {
    pub total_price: f64,
    pub down_payment: f64,
    pub term_months: u32,
    /// Annual nominal interest rate, in percent.
    pub annual_rate_pct: f64,
    pub start_date: NaiveDate,
}

impl SaleTerms {
    pub fn financed_principal(&self) -> f64 {
        self.total_price - self.down_payment
    }
}

/// One row of the schedule. All currency fields are cent-rounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub seq_no: u32,
    pub due_date: NaiveDate,
    pub payment_amount: f64,
    pub interest_portion: f64,
    pub principal_portion: f64,
    pub balance_after: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmortizationSchedule {
    pub financed_principal: f64,
    pub annual_rate_pct: f64,
    pub term_months: u32,
    pub monthly_payment: f64,
    pub rows: Vec<ScheduleRow>,
}

/// Generate the full installment schedule for the given terms.
///
/// Fails with `InvalidInput` when the financed principal is not positive,
/// the term is zero, or the rate is negative. Callers must reject the sale
/// before persisting anything.
pub fn generate_schedule(terms: &SaleTerms) -> CrmResult<AmortizationSchedule> {
    let principal = terms.financed_principal();
    if !principal.is_finite() || principal <= 0.0 {
        return Err(CrmError::InvalidInput(format!(
            "financed principal must be positive (got {principal})"
        )));
    }
    if terms.term_months == 0 {
        return Err(CrmError::InvalidInput("term must be at least 1 month".into()));
    }
    if !terms.annual_rate_pct.is_finite() || terms.annual_rate_pct < 0.0 {
        return Err(CrmError::InvalidInput(format!(
            "annual rate must be >= 0 (got {})",
            terms.annual_rate_pct
        )));
    }

    let n = terms.term_months;
    let monthly_rate = terms.annual_rate_pct / 12.0 / 100.0;

    // Straight-line when there is no interest; standard annuity otherwise.
    let payment = if monthly_rate <= 0.0 {
        principal / n as f64
    } else {
        let factor = (1.0 + monthly_rate).powi(n as i32);
        principal * monthly_rate * factor / (factor - 1.0)
    };

    let mut rows = Vec::with_capacity(n as usize);
    let mut balance = principal;
    let mut emitted_principal = 0.0;

    for i in 1..=n {
        let interest = balance * monthly_rate;
        let last = i == n;

        // The closed-form principal figure drifts by fractions of a cent per
        // row; the last row clears the true remaining balance instead.
        let raw_principal = if last { balance } else { payment - interest };
        balance -= raw_principal;
        if balance < 0.01 {
            balance = 0.0;
        }

        let principal_portion = if last {
            round2(principal - emitted_principal)
        } else {
            round2(raw_principal)
        };
        emitted_principal = round2(emitted_principal + principal_portion);

        let interest_portion = round2(interest);
        let due_date = terms
            .start_date
            .checked_add_months(Months::new(i))
            .ok_or_else(|| {
                CrmError::InvalidInput(format!("due date out of range at installment {i}"))
            })?;

        rows.push(ScheduleRow {
            seq_no: i,
            due_date,
            payment_amount: round2(principal_portion + interest_portion),
            interest_portion,
            principal_portion,
            balance_after: round2(principal - emitted_principal),
        });
    }

    Ok(AmortizationSchedule {
        financed_principal: principal,
        annual_rate_pct: terms.annual_rate_pct,
        term_months: n,
        monthly_payment: round2(payment),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(total: f64, down: f64, months: u32, rate: f64) -> SaleTerms {
        SaleTerms {
            total_price: total,
            down_payment: down,
            term_months: months,
            annual_rate_pct: rate,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        }
    }

    #[test]
    fn twelve_month_ten_percent_reference_scenario() {
        let schedule = generate_schedule(&terms(100_000.0, 0.0, 12, 10.0)).unwrap();

        assert_eq!(schedule.monthly_payment, 8791.59);
        assert_eq!(schedule.rows.len(), 12);
        assert_eq!(schedule.rows[11].balance_after, 0.0);
        assert_eq!(schedule.rows[0].due_date, NaiveDate::from_ymd_opt(2024, 2, 15).unwrap());
        assert_eq!(schedule.rows[11].due_date, NaiveDate::from_ymd_opt(2025, 1, 15).unwrap());
    }

    #[test]
    fn principal_portions_sum_to_principal_to_the_cent() {
        for (total, months, rate) in [
            (100_000.0, 12, 10.0),
            (350_000.0, 120, 9.75),
            (99_999.99, 7, 24.0),
            (50_000.0, 36, 0.0),
        ] {
            let schedule = generate_schedule(&terms(total, 0.0, months, rate)).unwrap();
            let sum: f64 = schedule.rows.iter().map(|r| r.principal_portion).sum();
            assert!(
                (round2(sum) - total).abs() < 0.005,
                "principal sum {sum} != {total} for {months}m @ {rate}%"
            );
            assert_eq!(schedule.rows.last().unwrap().balance_after, 0.0);
        }
    }

    #[test]
    fn balance_is_monotonically_non_increasing() {
        let schedule = generate_schedule(&terms(350_000.0, 50_000.0, 120, 9.75)).unwrap();
        let mut prev = schedule.financed_principal;
        for row in &schedule.rows {
            assert!(
                row.balance_after <= prev + 1e-9,
                "balance rose at row {}: {} > {}",
                row.seq_no,
                row.balance_after,
                prev
            );
            prev = row.balance_after;
        }
    }

    #[test]
    fn zero_rate_is_straight_line() {
        let schedule = generate_schedule(&terms(12_000.0, 0.0, 12, 0.0)).unwrap();
        assert_eq!(schedule.monthly_payment, 1000.0);
        for row in &schedule.rows {
            assert_eq!(row.interest_portion, 0.0);
            assert_eq!(row.principal_portion, 1000.0);
        }
    }

    #[test]
    fn down_payment_reduces_financed_principal() {
        let schedule = generate_schedule(&terms(120_000.0, 20_000.0, 10, 0.0)).unwrap();
        assert_eq!(schedule.financed_principal, 100_000.0);
        assert_eq!(schedule.monthly_payment, 10_000.0);
    }

    #[test]
    fn month_end_start_date_clamps_short_months() {
        let t = SaleTerms {
            start_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            ..terms(12_000.0, 0.0, 3, 0.0)
        };
        let schedule = generate_schedule(&t).unwrap();
        // 2024 is a leap year: Jan 31 + 1 month clamps to Feb 29.
        assert_eq!(schedule.rows[0].due_date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(schedule.rows[1].due_date, NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(schedule.rows[2].due_date, NaiveDate::from_ymd_opt(2024, 4, 30).unwrap());
    }

    #[test]
    fn rejects_bad_terms() {
        assert!(matches!(
            generate_schedule(&terms(100.0, 100.0, 12, 5.0)),
            Err(CrmError::InvalidInput(_))
        ));
        assert!(matches!(
            generate_schedule(&terms(100.0, 200.0, 12, 5.0)),
            Err(CrmError::InvalidInput(_))
        ));
        assert!(matches!(
            generate_schedule(&terms(100_000.0, 0.0, 0, 5.0)),
            Err(CrmError::InvalidInput(_))
        ));
        assert!(matches!(
            generate_schedule(&terms(100_000.0, 0.0, 12, -1.0)),
            Err(CrmError::InvalidInput(_))
        ));
    }
}
