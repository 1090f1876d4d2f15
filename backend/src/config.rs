//! Session configuration surface.
//!
//! The crate does not load files or read environment variables itself
//! — that is an embedding concern (see the `cli` crate) — but every
//! type here derives `Deserialize` so a JSON/YAML body can be turned
//! directly into a [`SessionConfig`].

use crate::models::BankId;
use serde::{Deserialize, Serialize};

/// How a bank's starting balance sheet is specified.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BankInit {
    /// Explicit starting figures, in millions.
    Explicit {
        cash: f64,
        investments: f64,
        loans_given: f64,
        borrowed: f64,
    },
    /// Derive a balance sheet from equity and a target leverage, the
    /// way the original bank-creation endpoint did: `total_assets =
    /// equity * target_leverage`, split 50% cash / 30% investments /
    /// 20% loans, `borrowed = total_assets - equity`.
    FromEquity {
        equity: f64,
        target_leverage: f64,
    },
}

impl BankInit {
    /// Resolve into `(cash, investments, loans_given, borrowed)`.
    pub fn resolve(&self) -> (f64, f64, f64, f64) {
        match self {
            BankInit::Explicit {
                cash,
                investments,
                loans_given,
                borrowed,
            } => (*cash, *investments, *loans_given, *borrowed),
            BankInit::FromEquity { equity, target_leverage } => {
                let leverage = target_leverage.max(1.0);
                let total_assets = equity * leverage;
                let cash = total_assets * 0.5;
                let investments = total_assets * 0.3;
                let loans_given = total_assets * 0.2;
                let borrowed = total_assets - equity;
                (cash, investments, loans_given, borrowed)
            }
        }
    }
}

/// Per-bank initialisation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfig {
    pub name: String,
    pub balance: BankInit,
    #[serde(default = "default_target_leverage")]
    pub target_leverage: f64,
    #[serde(default = "default_target_liquidity")]
    pub target_liquidity: f64,
    #[serde(default = "default_target_market_exposure")]
    pub target_market_exposure: f64,
    #[serde(default = "default_risk_appetite")]
    pub risk_appetite: f64,
}

fn default_target_leverage() -> f64 {
    3.0
}
fn default_target_liquidity() -> f64 {
    0.3
}
fn default_target_market_exposure() -> f64 {
    0.2
}
fn default_risk_appetite() -> f64 {
    0.5
}

/// Per-market initialisation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_initial_price")]
    pub initial_price: f64,
}

fn default_initial_price() -> f64 {
    100.0
}

/// An initial interbank loan, created at session init.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub from: u32,
    pub to: u32,
    pub amount: f64,
}

/// Full configuration for one session, the argument to `init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub seed: u64,
    pub total_steps: u64,
    #[serde(default = "default_use_game_theory")]
    pub use_game_theory: bool,
    #[serde(default)]
    pub oracle_enabled: bool,
    pub banks: Vec<BankConfig>,
    #[serde(default)]
    pub markets: Vec<MarketConfig>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

fn default_use_game_theory() -> bool {
    true
}

impl SessionConfig {
    /// Basic structural validation run at session init: non-empty
    /// banks, in-range connection endpoints, positive `total_steps`.
    pub fn validate(&self) -> Result<(), String> {
        if self.total_steps == 0 {
            return Err("total_steps must be positive".to_string());
        }
        if self.banks.is_empty() {
            return Err("at least one bank is required".to_string());
        }
        let n = self.banks.len() as u32;
        for conn in &self.connections {
            if conn.from >= n || conn.to >= n {
                return Err(format!(
                    "connection references out-of-range bank id ({} -> {}, {} banks configured)",
                    conn.from, conn.to, n
                ));
            }
            if conn.from == conn.to {
                return Err("a bank cannot lend to itself".to_string());
            }
        }
        Ok(())
    }

    pub fn bank_id_count(&self) -> usize {
        self.banks.len()
    }
}

/// Resolve a raw `u32` into a [`BankId`] — a thin helper kept at the
/// config boundary so the rest of the crate only ever sees `BankId`.
pub fn bank_id(raw: u32) -> BankId {
    BankId::new(raw)
}
