//! Platform commission calculator
//!
//! Pure arithmetic over integer minor currency units (cents). The rate is
//! expressed in basis points so 15% is the exact integer 1500 and the split
//! never touches floating point.

use serde::{Deserialize, Serialize};

/// Default platform cut: 15% of the gross amount
pub const DEFAULT_COMMISSION_RATE_BPS: i64 = 1_500;

/// Result of splitting a gross amount into platform and expert shares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSplit {
    /// Gross amount in cents
    pub amount: i64,
    /// Platform commission in cents
    pub commission: i64,
    /// Expert net amount in cents; always `amount - commission`
    pub expert_amount: i64,
}

/// Commission schedule (fixed percentage, configurable in basis points)
#[derive(Debug, Clone, Copy)]
pub struct CommissionSchedule {
    rate_bps: i64,
}

impl CommissionSchedule {
    pub fn new(rate_bps: i64) -> Self {
        Self { rate_bps }
    }

    /// Split a gross amount. Commission is rounded half-up to the nearest
    /// cent, which matches rounding the decimal amount to 2 places.
    pub fn split(&self, amount: i64) -> CommissionSplit {
        let commission = (amount * self.rate_bps + 5_000) / 10_000;
        CommissionSplit {
            amount,
            commission,
            expert_amount: amount - commission,
        }
    }

    pub fn rate_bps(&self) -> i64 {
        self.rate_bps
    }
}

impl Default for CommissionSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_COMMISSION_RATE_BPS)
    }
}
