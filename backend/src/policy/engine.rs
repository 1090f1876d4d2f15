//! The policy engine: observation + priority -> discrete action.
//!
//! Direct Rust port of `FinancialGameTheory`/`NashEquilibriumSolver`
//! (game-theoretic branch) and the heuristic rule ladder from the
//! original `MLPolicy`, generalized to the fixed [`Observation`] record
//! instead of a loosely-typed dict. Every constant below matches the
//! distilled spec's §4.6 payoff table and probability formulas.

use crate::models::{BankAction, Observation, StrategicPriority};
use crate::rng::RngManager;

/// Market-state estimate used by the game-theoretic branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarketState {
    Stable,
    Distressed,
}

/// A bank's 2x2 payoff matrix over {Lend, Hoard} vs. {Lend, Hoard}.
#[derive(Debug, Clone, Copy)]
struct PayoffMatrix {
    lend_lend: f64,
    lend_hoard: f64,
    hoard_lend: f64,
    hoard_hoard: f64,
}

/// Best response an opponent-aware Nash computation picks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BestResponse {
    Lend,
    Hoard,
}

/// Maps `(observation, priority)` to a discrete [`BankAction`].
///
/// Stateless — every draw of randomness is threaded through the
/// caller-supplied [`RngManager`], never a process-global source, so
/// that two sessions built from the same seed produce byte-identical
/// decisions (property **P10**).
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEngine {
    pub use_game_theory: bool,
}

impl PolicyEngine {
    pub fn new(use_game_theory: bool) -> Self {
        Self { use_game_theory }
    }

    /// Decide an action for one bank this step. Returns `(action,
    /// reason)` — the reason string is carried into `transaction`
    /// events as a human-readable trace field.
    pub fn decide(
        &self,
        observation: &Observation,
        priority: Option<StrategicPriority>,
        network_default_rate: f64,
        rng: &mut RngManager,
    ) -> (BankAction, String) {
        if let Some(action) = self.profit_taking_urge(observation, priority, rng) {
            return (action, "Profit-taking: locking in market gains".to_string());
        }

        if self.use_game_theory {
            self.decide_game_theoretic(observation, priority, network_default_rate, rng)
        } else {
            self.decide_heuristic(observation, priority, rng)
        }
    }

    /// Shared prologue: an urge to take profits off the table, applied
    /// identically in both branches before anything else runs.
    fn profit_taking_urge(
        &self,
        observation: &Observation,
        priority: Option<StrategicPriority>,
        rng: &mut RngManager,
    ) -> Option<BankAction> {
        if observation.total_invested <= 5.0 {
            return None;
        }
        let threshold = if self.use_game_theory { 0.05 } else { 0.03 };
        if observation.best_market_return <= threshold {
            return None;
        }

        let (a, b) = (0.3, 1.0);
        let mut p = a + b * observation.best_market_return;

        if observation.risk_appetite < 0.4 {
            p += 0.15; // conservative
        } else if observation.risk_appetite > 0.6 {
            p -= 0.15; // aggressive
        }
        if observation.local_stress > 0.2 {
            p += 0.25;
        }
        if observation.liquidity_ratio < 0.2 {
            p += 0.2;
        }
        match priority {
            Some(StrategicPriority::Profit) => p += 0.15,
            Some(StrategicPriority::Liquidity) => p += 0.1,
            _ => {}
        }
        let p = p.clamp(0.1, 0.9);

        if rng.bernoulli(p) {
            Some(BankAction::DivestMarket)
        } else {
            None
        }
    }

    // ------------------------------------------------------------------
    // Game-theoretic branch
    // ------------------------------------------------------------------

    fn estimate_market_state(&self, observation: &Observation, network_default_rate: f64) -> MarketState {
        let distress_score = 0.5 * observation.local_stress
            + 0.3 * network_default_rate
            + 0.2 * (1.0 - observation.liquidity_ratio);
        if distress_score > 0.4 {
            MarketState::Distressed
        } else {
            MarketState::Stable
        }
    }

    fn construct_payoff_matrix(&self, observation: &Observation, market_state: MarketState) -> PayoffMatrix {
        let lending_return_base = 0.05;
        let hoarding_cost_base = 0.01;
        let mut default_risk = 0.02 + 0.10 * observation.local_stress;
        let mut lending_return = lending_return_base;
        let mut hoarding_cost = hoarding_cost_base;
        let coordination_bonus = 0.02;

        if market_state == MarketState::Distressed {
            default_risk *= 2.5;
            lending_return *= 0.7;
            hoarding_cost *= 0.5;
        }

        let equity_scale = observation.equity.max(1.0);
        let mut lend_lend = (lending_return + coordination_bonus - default_risk) * equity_scale;
        let mut lend_hoard = (0.7 * lending_return - 1.3 * default_risk) * equity_scale;
        let mut hoard_lend = (-0.5 * hoarding_cost) * equity_scale;
        let mut hoard_hoard = (-1.5 * hoarding_cost) * equity_scale;

        if observation.liquidity_ratio < 0.2 {
            lend_lend *= 0.5;
            lend_hoard *= 0.3;
            hoard_lend *= 1.2;
            hoard_hoard *= 1.1;
        }
        if observation.leverage > 3.0 {
            lend_lend *= 0.6;
            lend_hoard *= 0.4;
        }

        PayoffMatrix {
            lend_lend,
            lend_hoard,
            hoard_lend,
            hoard_hoard,
        }
    }

    fn estimate_others_lend_prob(&self, observation: &Observation, market_state: MarketState) -> f64 {
        let base = if market_state == MarketState::Distressed { 0.3 } else { 0.7 };
        (base * (1.0 - 0.5 * observation.local_stress)).clamp(0.1, 0.9)
    }

    fn compute_best_response(&self, payoffs: PayoffMatrix, others_lend_prob: f64) -> BestResponse {
        let ev_lend = others_lend_prob * payoffs.lend_lend + (1.0 - others_lend_prob) * payoffs.lend_hoard;
        let ev_hoard = others_lend_prob * payoffs.hoard_lend + (1.0 - others_lend_prob) * payoffs.hoard_hoard;
        if ev_lend > ev_hoard {
            BestResponse::Lend
        } else {
            BestResponse::Hoard
        }
    }

    fn decide_game_theoretic(
        &self,
        observation: &Observation,
        priority: Option<StrategicPriority>,
        network_default_rate: f64,
        rng: &mut RngManager,
    ) -> (BankAction, String) {
        let market_state = self.estimate_market_state(observation, network_default_rate);
        let payoffs = self.construct_payoff_matrix(observation, market_state);
        let others_lend_prob = self.estimate_others_lend_prob(observation, market_state);
        let best_response = self.compute_best_response(payoffs, others_lend_prob);

        let distressed = market_state == MarketState::Distressed;
        let action = match best_response {
            BestResponse::Lend => {
                if observation.cash < 15.0 || observation.liquidity_ratio < 0.1 {
                    BankAction::HoardCash
                } else if observation.has_markets && observation.cash > 20.0 {
                    let mut invest_prob = 0.20 + 0.65 * observation.risk_appetite;
                    invest_prob *= match priority {
                        Some(StrategicPriority::Profit) => 1.3,
                        Some(StrategicPriority::Liquidity) => 0.5,
                        Some(StrategicPriority::Stability) => 0.3,
                        None => 1.0,
                    };
                    if observation.liquidity_ratio > 0.6 {
                        invest_prob *= 1.4;
                    }
                    if observation.local_stress > 0.3 {
                        invest_prob *= 0.4;
                    }
                    if observation.market_exposure > 0.5 {
                        invest_prob *= 0.2;
                    } else if observation.market_exposure > 0.35 {
                        invest_prob *= 0.5;
                    }
                    let invest_prob = invest_prob.clamp(0.0, 0.95);

                    if rng.bernoulli(invest_prob) {
                        BankAction::InvestMarket
                    } else {
                        BankAction::IncreaseLending
                    }
                } else if observation.cash > 20.0 {
                    BankAction::IncreaseLending
                } else {
                    BankAction::HoardCash
                }
            }
            BestResponse::Hoard => {
                if observation.best_market_position > 0.0 && rng.bernoulli(0.5) {
                    BankAction::DivestMarket
                } else if observation.loans_given > 0.0 {
                    BankAction::DecreaseLending
                } else {
                    BankAction::HoardCash
                }
            }
        };

        let reason = format!(
            "Nash-BR: {:?} in {} market (others ~{:.0}% lending, equity=${:.0}, stress={:.2})",
            best_response,
            if distressed { "distressed" } else { "stable" },
            others_lend_prob * 100.0,
            observation.equity,
            observation.local_stress,
        );
        (self.fixup_action(action, observation), reason)
    }

    // ------------------------------------------------------------------
    // Heuristic branch
    // ------------------------------------------------------------------

    fn decide_heuristic(
        &self,
        observation: &Observation,
        priority: Option<StrategicPriority>,
        rng: &mut RngManager,
    ) -> (BankAction, String) {
        // Emergency guard: too little cash or equity to risk anything.
        if observation.cash < 10.0 || observation.equity < 5.0 {
            let action = if observation.best_market_position > 0.0 {
                BankAction::DivestMarket
            } else {
                BankAction::DecreaseLending
            };
            return (self.fixup_action(action, observation), "Emergency: preserving capital".to_string());
        }

        // Severe stress guard.
        if observation.local_stress > 0.5 && observation.liquidity_ratio < 0.2 {
            let action = if observation.best_market_position > 0.0 {
                BankAction::DivestMarket
            } else {
                BankAction::DecreaseLending
            };
            return (self.fixup_action(action, observation), "Severe stress: de-risking".to_string());
        }

        // Productive deployment.
        if observation.cash > 15.0 && observation.has_markets && observation.market_exposure < 0.55 {
            let priority_modifier = match priority {
                Some(StrategicPriority::Profit) => 1.0,
                Some(StrategicPriority::Liquidity) => 0.4,
                Some(StrategicPriority::Stability) => 0.28,
                None => 1.0,
            };
            let stress_modifier = if observation.local_stress > 0.3 { 0.5 } else { 1.0 };
            let cash_bonus = if observation.cash > 60.0 { 0.1 } else { 0.0 };
            let invest_prob =
                (0.25 + 0.55 * observation.risk_appetite).clamp(0.05, 0.95) * priority_modifier * stress_modifier
                    + cash_bonus;
            let invest_prob = invest_prob.clamp(0.0, 0.95);

            if rng.bernoulli(invest_prob) {
                return (BankAction::InvestMarket, "Deploying idle cash into markets".to_string());
            }
            return (BankAction::IncreaseLending, "Deploying idle cash via interbank lending".to_string());
        }

        (BankAction::HoardCash, "No productive deployment available".to_string())
    }

    /// Action-action fixups (§4.10 phase 3): if a lending action would
    /// have no counterparty, or a market action has no markets, swap to
    /// whatever the bank can actually do.
    fn fixup_action(&self, action: BankAction, observation: &Observation) -> BankAction {
        match action {
            BankAction::IncreaseLending | BankAction::DecreaseLending if !observation.has_markets && observation.loans_given <= 0.0 && action == BankAction::DecreaseLending => {
                BankAction::HoardCash
            }
            BankAction::InvestMarket | BankAction::DivestMarket if !observation.has_markets => {
                if observation.cash > 30.0 {
                    BankAction::IncreaseLending
                } else {
                    BankAction::HoardCash
                }
            }
            BankAction::DivestMarket if observation.best_market_position <= 0.0 => {
                if observation.loans_given > 0.0 {
                    BankAction::DecreaseLending
                } else {
                    BankAction::HoardCash
                }
            }
            other => other,
        }
    }
}
