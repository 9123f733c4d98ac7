//! Sales commission calculator.
//!
//! Pure computation: sale total + seller scheme in, three milestone tranches
//! out. The caller resolves the sale and seller records first; this module
//! assumes both exist.
//!
//! Business rule: commissions pay out 30% at down payment, 30% at contract
//! signing, 40% at settlement. Cent-level rounding loss across the three
//! tranches is absorbed by the settlement tranche so the split always sums
//! exactly to the computed total.

use crate::{
    error::{CrmError, CrmResult},
    types::round2,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// How a seller is compensated. Decoded once at the boundary; an
/// unrecognized scheme string fails deserialization there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum CommissionScheme {
    Fixed { amount: f64 },
    Percentage { rate_pct: f64 },
    Mixed { amount: f64, rate_pct: f64 },
}

/// The three payout milestones, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Milestone {
    DownPayment,
    ContractSigning,
    Settlement,
}

impl Milestone {
    pub const ALL: [Milestone; 3] =
        [Milestone::DownPayment, Milestone::ContractSigning, Milestone::Settlement];

    pub fn weight(self) -> f64 {
        match self {
            Milestone::DownPayment => 0.30,
            Milestone::ContractSigning => 0.30,
            Milestone::Settlement => 0.40,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Milestone::DownPayment => "down_payment",
            Milestone::ContractSigning => "contract_signing",
            Milestone::Settlement => "settlement",
        }
    }

    pub fn parse(s: &str) -> CrmResult<Self> {
        match s {
            "down_payment" => Ok(Milestone::DownPayment),
            "contract_signing" => Ok(Milestone::ContractSigning),
            "settlement" => Ok(Milestone::Settlement),
            other => Err(CrmError::InvalidInput(format!("unknown milestone: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrancheStatus {
    Pending,
    Scheduled,
    Paid,
}

impl TrancheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TrancheStatus::Pending => "pending",
            TrancheStatus::Scheduled => "scheduled",
            TrancheStatus::Paid => "paid",
        }
    }
}

/// One milestone bucket of the commission split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionTranche {
    pub milestone: Milestone,
    pub amount: f64,
    pub status: TrancheStatus,
    /// Populated later, when the milestone event fires.
    pub scheduled_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionPlan {
    pub total: f64,
    pub tranches: Vec<CommissionTranche>,
}

/// Compute the total commission and its three-tranche split.
pub fn split_commission(sale_total: f64, scheme: &CommissionScheme) -> CrmResult<CommissionPlan> {
    if !sale_total.is_finite() || sale_total < 0.0 {
        return Err(CrmError::InvalidInput(format!(
            "sale total must be >= 0 (got {sale_total})"
        )));
    }

    let total = match *scheme {
        CommissionScheme::Fixed { amount } => {
            if amount < 0.0 {
                return Err(CrmError::InvalidInput("fixed commission must be >= 0".into()));
            }
            amount
        }
        CommissionScheme::Percentage { rate_pct } => {
            if rate_pct < 0.0 {
                return Err(CrmError::InvalidInput("commission rate must be >= 0".into()));
            }
            sale_total * rate_pct / 100.0
        }
        CommissionScheme::Mixed { amount, rate_pct } => {
            if amount < 0.0 || rate_pct < 0.0 {
                return Err(CrmError::InvalidInput(
                    "mixed commission components must be >= 0".into(),
                ));
            }
            sale_total * rate_pct / 100.0 + amount
        }
    };
    let total = round2(total);

    let mut tranches: Vec<CommissionTranche> = Milestone::ALL
        .iter()
        .map(|&milestone| CommissionTranche {
            milestone,
            amount: round2(total * milestone.weight()),
            status: TrancheStatus::Pending,
            scheduled_date: None,
        })
        .collect();

    // Cross-tranche rounding loss lands on the settlement tranche.
    let emitted: f64 = tranches.iter().map(|t| t.amount).sum();
    let residual = round2(total - emitted);
    if residual != 0.0 {
        tranches[2].amount = round2(tranches[2].amount + residual);
    }

    Ok(CommissionPlan { total, tranches })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amounts(plan: &CommissionPlan) -> Vec<f64> {
        plan.tranches.iter().map(|t| t.amount).collect()
    }

    #[test]
    fn five_percent_of_half_million_reference_scenario() {
        let plan =
            split_commission(500_000.0, &CommissionScheme::Percentage { rate_pct: 5.0 }).unwrap();
        assert_eq!(plan.total, 25_000.0);
        assert_eq!(amounts(&plan), vec![7_500.0, 7_500.0, 10_000.0]);
        for tranche in &plan.tranches {
            assert_eq!(tranche.status, TrancheStatus::Pending);
            assert_eq!(tranche.scheduled_date, None);
        }
    }

    #[test]
    fn settlement_tranche_absorbs_residual_cent() {
        let plan = split_commission(100.01, &CommissionScheme::Fixed { amount: 100.01 }).unwrap();
        // 30.00 + 30.00 + 40.00 leaves one cent unassigned.
        assert_eq!(amounts(&plan), vec![30.0, 30.0, 40.01]);
        let sum: f64 = plan.tranches.iter().map(|t| t.amount).sum();
        assert_eq!(round2(sum), plan.total);
    }

    #[test]
    fn tranches_sum_exactly_for_awkward_totals() {
        for total in [0.01, 0.02, 33.33, 1234.56, 99_999.99] {
            let plan = split_commission(total, &CommissionScheme::Fixed { amount: total }).unwrap();
            let sum: f64 = plan.tranches.iter().map(|t| t.amount).sum();
            assert_eq!(round2(sum), plan.total, "split of {total} does not sum back");
        }
    }

    #[test]
    fn mixed_scheme_adds_both_components() {
        let plan = split_commission(
            200_000.0,
            &CommissionScheme::Mixed { amount: 1_000.0, rate_pct: 2.5 },
        )
        .unwrap();
        assert_eq!(plan.total, 6_000.0);
    }

    #[test]
    fn zero_total_is_valid() {
        let plan =
            split_commission(0.0, &CommissionScheme::Percentage { rate_pct: 5.0 }).unwrap();
        assert_eq!(plan.total, 0.0);
        assert_eq!(amounts(&plan), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn rejects_negative_inputs() {
        assert!(matches!(
            split_commission(-1.0, &CommissionScheme::Fixed { amount: 10.0 }),
            Err(CrmError::InvalidInput(_))
        ));
        assert!(matches!(
            split_commission(100.0, &CommissionScheme::Fixed { amount: -10.0 }),
            Err(CrmError::InvalidInput(_))
        ));
        assert!(matches!(
            split_commission(100.0, &CommissionScheme::Percentage { rate_pct: -5.0 }),
            Err(CrmError::InvalidInput(_))
        ));
    }

    #[test]
    fn unknown_scheme_fails_at_the_decode_boundary() {
        let err = serde_json::from_str::<CommissionScheme>(r#"{"scheme":"lottery"}"#);
        assert!(err.is_err());
    }
}
