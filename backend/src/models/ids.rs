//! Identifier types shared across the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a bank, assigned monotonically starting at 0 when a
/// session initialises its banks.
///
/// # Example
/// ```
/// use systemic_risk_sim_core::BankId;
///
/// let a = BankId::new(0);
/// let b = BankId::new(1);
/// assert_ne!(a, b);
/// assert_eq!(a.to_string(), "0");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BankId(pub u32);

impl BankId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for BankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for BankId {
    fn from(v: u32) -> Self {
        BankId(v)
    }
}

/// Identifier for a market. Markets are user-named, so unlike
/// [`BankId`] this stays a plain string rather than a newtype over an
/// integer, matching the rest of the corpus's raw-`String` ids for
/// market/agent identifiers.
pub type MarketId = String;
