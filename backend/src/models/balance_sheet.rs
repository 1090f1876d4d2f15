//! Per-bank balance sheet: asset/liability state and derived ratios.
//!
//! Pure data and computation — no I/O, no ledger access. Ratios all
//! guard their denominator against a small floor (`RATIO_FLOOR`) so a
//! bank with zero equity or zero assets never produces `NaN`/`inf`.

use super::ids::{BankId, MarketId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Floor applied to ratio denominators (equity, total assets).
pub const RATIO_FLOOR: f64 = 0.01;

/// Per-bank asset/liability state.
///
/// # Invariants
/// - A: `investments == sum(investment_positions.values())`,
///   `loans_given == sum(loan_positions.values())` — every mutating
///   operation on this type preserves it.
/// - B: `cash, investments, loans_given, borrowed >= 0` once a step
///   completes (a single operation may transiently overshoot before
///   the kernel's clamps apply).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub cash: f64,
    pub investments: f64,
    pub loans_given: f64,
    pub borrowed: f64,
    pub investment_positions: HashMap<MarketId, f64>,
    pub loan_positions: HashMap<BankId, f64>,
}

impl BalanceSheet {
    pub fn new(cash: f64, investments: f64, loans_given: f64, borrowed: f64) -> Self {
        Self {
            cash,
            investments,
            loans_given,
            borrowed,
            investment_positions: HashMap::new(),
            loan_positions: HashMap::new(),
        }
    }

    pub fn total_assets(&self) -> f64 {
        self.cash + self.investments + self.loans_given
    }

    pub fn equity(&self) -> f64 {
        self.total_assets() - self.borrowed
    }

    /// A bank defaults when its equity turns negative.
    pub fn is_insolvent(&self) -> bool {
        self.equity() < 0.0
    }

    pub fn leverage(&self) -> f64 {
        self.total_assets() / self.equity().max(RATIO_FLOOR)
    }

    pub fn liquidity_ratio(&self) -> f64 {
        self.cash / self.total_assets().max(RATIO_FLOOR)
    }

    pub fn market_exposure(&self) -> f64 {
        self.investments / self.total_assets().max(RATIO_FLOOR)
    }

    pub fn capital_ratio(&self) -> f64 {
        self.equity() / self.total_assets().max(RATIO_FLOOR)
    }

    pub fn loan_exposure(&self) -> f64 {
        self.loans_given / self.total_assets().max(RATIO_FLOOR)
    }

    /// Sum of all held investment positions — should equal
    /// `self.investments` by Invariant A; used by consistency checks.
    pub fn sum_investment_positions(&self) -> f64 {
        self.investment_positions.values().sum()
    }

    /// Sum of all outstanding loan positions — should equal
    /// `self.loans_given` by Invariant A.
    pub fn sum_loan_positions(&self) -> f64 {
        self.loan_positions.values().sum()
    }

    /// Check Invariant A within floating-point tolerance.
    pub fn positions_consistent(&self, tolerance: f64) -> bool {
        (self.investments - self.sum_investment_positions()).abs() <= tolerance
            && (self.loans_given - self.sum_loan_positions()).abs() <= tolerance
    }

    /// Check Invariant B (non-negativity).
    pub fn non_negative(&self) -> bool {
        self.cash >= 0.0 && self.investments >= 0.0 && self.loans_given >= 0.0 && self.borrowed >= 0.0
    }
}
