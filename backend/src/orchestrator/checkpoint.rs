//! Checkpoint — save/load kernel state.
//!
//! A `KernelSnapshot` is everything [`super::Kernel::step`] needs to
//! resume exactly where it left off: the RNG state, every bank and
//! market, the ledger, and the handful of cross-step accumulators the
//! nine-phase loop carries between steps. Spec §6 calls this out as an
//! optional embedder extension ("implementations may add durable
//! storage without affecting the kernel contract"); this module is
//! that extension.

use crate::error::KernelError;
use crate::models::{Bank, BankId, Ledger, MarketId, MarketSystem};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Complete, serializable kernel state snapshot.
///
/// `config_hash` ties a snapshot to the exact [`crate::config::SessionConfig`]
/// it was taken under; [`super::Kernel::restore`] refuses to load a
/// snapshot against a config whose hash doesn't match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelSnapshot {
    pub current_step: u64,
    pub total_steps: u64,
    /// RNG state at the moment of the snapshot — restoring it resumes
    /// the exact same deterministic draw sequence (property P10).
    pub rng_state: u64,
    pub banks: Vec<Bank>,
    pub markets: MarketSystem,
    pub ledger: Ledger,
    /// Phase 7's deferred profit-taking flows, sorted by market id for
    /// a deterministic encoding.
    pub deferred_flows: Vec<(MarketId, f64)>,
    pub pending_cascade_seeds: Vec<BankId>,
    pub config_hash: String,
}

/// Compute a deterministic SHA256 hash of a config.
///
/// Serializes through `serde_json::Value` and recursively sorts every
/// object's keys first, so the hash is stable regardless of the
/// config type's own field order or any `HashMap` it contains.
pub fn compute_config_hash<T: Serialize>(config: &T) -> Result<String, KernelError> {
    use serde_json::Value;
    use std::collections::BTreeMap;

    let value = serde_json::to_value(config).map_err(|e| KernelError::Serialization(e.to_string()))?;

    fn canonicalize(value: Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> = map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(arr) => Value::Array(arr.into_iter().map(canonicalize).collect()),
            other => other,
        }
    }

    let canonical = canonicalize(value);
    let json = serde_json::to_string(&canonical).map_err(|e| KernelError::Serialization(e.to_string()))?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Validate a snapshot's internal invariants before it is trusted.
///
/// Checks the same invariants `Kernel::step` maintains every step
/// (Invariant A position consistency, Invariant B non-negativity) plus
/// that the bank population matches what the restoring config expects
/// — a snapshot for a five-bank session cannot be loaded against a
/// three-bank config.
pub fn validate_snapshot(snapshot: &KernelSnapshot, expected_bank_count: usize) -> Result<(), KernelError> {
    if snapshot.banks.len() != expected_bank_count {
        return Err(KernelError::InvalidSnapshot(format!(
            "snapshot has {} banks, config expects {}",
            snapshot.banks.len(),
            expected_bank_count
        )));
    }

    for bank in &snapshot.banks {
        if !bank.balance_sheet.non_negative() {
            return Err(KernelError::InvalidSnapshot(format!("bank {} has a negative book value", bank.id)));
        }
        if !bank.balance_sheet.positions_consistent(1e-6) {
            return Err(KernelError::InvalidSnapshot(format!(
                "bank {} position map sums drifted from its totals",
                bank.id
            )));
        }
    }

    if snapshot.current_step > snapshot.total_steps {
        return Err(KernelError::InvalidSnapshot(format!(
            "current_step {} exceeds total_steps {}",
            snapshot.current_step, snapshot.total_steps
        )));
    }

    let known_markets: HashMap<&MarketId, ()> = snapshot.markets.ids().map(|id| (id, ())).collect();
    for (market_id, _) in &snapshot.deferred_flows {
        if !known_markets.contains_key(market_id) {
            return Err(KernelError::InvalidSnapshot(format!(
                "deferred flow references unknown market {market_id}"
            )));
        }
    }

    Ok(())
}
