//! The strategic-priority oracle: an external collaborator the kernel
//! consults once per bank per step for a `Profit`/`Liquidity`/`Stability`
//! hint.
//!
//! The real oracle is out of scope for this crate (§1 of the spec) — it
//! is modeled as a trait the kernel calls synchronously. Every session
//! always has a working oracle because [`RuleBasedFallback`] is both the
//! failure-mode substitute for a real oracle *and* the oracle used
//! outright when `SessionConfig::oracle_enabled` is `false`.

use crate::models::{Observation, StrategicPriority};
use thiserror::Error;

/// Failure mode for a [`PriorityOracle`] implementation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OracleError {
    #[error("priority oracle unavailable: {0}")]
    Unavailable(String),
}

/// External-facing priority hint source.
///
/// On any `Err`, the kernel substitutes [`RuleBasedFallback`] and
/// continues the step — a collaborator failure never blocks or aborts
/// a step (§7, "collaborator unavailable").
pub trait PriorityOracle: Send + Sync {
    fn priority(&mut self, observation: &Observation) -> Result<StrategicPriority, OracleError>;
}

/// Deterministic rule-based fallback, always available.
///
/// Decision table (distilled spec §4.7): critical thresholds route to
/// `Stability`/`Liquidity`; anything else defaults to `Profit`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedFallback;

impl RuleBasedFallback {
    pub fn new() -> Self {
        Self
    }

    /// Pure decision function, usable without going through the trait
    /// object (the kernel calls this directly when no oracle is
    /// configured, avoiding a `dyn` dispatch on the hot path).
    pub fn decide(observation: &Observation) -> StrategicPriority {
        if observation.equity < 10.0 || observation.liquidity_ratio < 0.10 {
            StrategicPriority::Stability
        } else if observation.leverage > 6.0 || observation.cash < 15.0 {
            StrategicPriority::Liquidity
        } else {
            StrategicPriority::Profit
        }
    }
}

impl PriorityOracle for RuleBasedFallback {
    fn priority(&mut self, observation: &Observation) -> Result<StrategicPriority, OracleError> {
        Ok(Self::decide(observation))
    }
}

/// Consult `oracle` for a priority, falling back to
/// [`RuleBasedFallback`] on any error (the kernel's phase-3 collaborator
/// call, §4.10).
pub fn priority_or_fallback(
    oracle: &mut dyn PriorityOracle,
    observation: &Observation,
) -> StrategicPriority {
    oracle
        .priority(observation)
        .unwrap_or_else(|_| RuleBasedFallback::decide(observation))
}
