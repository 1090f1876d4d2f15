//! The step executor: the nine-phase `Kernel::step`, unchanged strict
//! order, unchanged formulas.
//!
//! Grounded in the teacher's `Orchestrator::tick` — a single method
//! that owns every piece of session state and advances it one unit at
//! a time, emitting events as it goes — generalized from a tick/day
//! RTGS settlement loop to the nine fixed phases below. Phase helpers
//! are free functions rather than `&mut self` methods so the borrow
//! checker can see the kernel's fields (`banks`, `markets`, `rng`,
//! `ledger`) are independently borrowed; `Kernel::step` is the only
//! place that holds all of them in scope at once.

use super::checkpoint;
use crate::config::{bank_id, SessionConfig};
use crate::core::clock::SimulationClock;
use crate::error::{KernelError, SessionError};
use crate::events::{BankStateSnapshot, Event, InitBankSummary, InitConnectionSummary, InitMarketSummary, MarketStateSnapshot};
use crate::models::ledger::market_transaction;
use crate::models::{Bank, BankAction, BankId, BalanceSheet, BankTargets, Ledger, Market, MarketId, MarketSystem, Observation, StrategicPriority, TransactionKind};
use crate::oracle::{priority_or_fallback, PriorityOracle, RuleBasedFallback};
use crate::policy::PolicyEngine;
use crate::rng::RngManager;
use std::collections::{HashMap, HashSet};
use tracing::{trace_span, warn};

/// One bank's resolved action for this step, after counterparty/market
/// selection and kernel-level fixups (phase 3's output, phase 4's input).
struct PlannedAction {
    bank_idx: usize,
    action: BankAction,
    reason: String,
    counterparty: Option<BankId>,
    counterparty_name: Option<String>,
    market_id: Option<MarketId>,
}

/// A margin call recorded at phase 5, settled at phase 6.
struct MarginCall {
    bank_idx: usize,
    margin_required: f64,
}

/// The step executor: owns every piece of session-scoped state and
/// advances it one step at a time via [`Kernel::step`].
///
/// Banks are stored contiguously, indexed by `BankId::value()` — a
/// session's bank population is fixed at init (no bank is ever added
/// or literally removed; `delete_bank` is a forced default).
pub struct Kernel {
    banks: Vec<Bank>,
    markets: MarketSystem,
    ledger: Ledger,
    rng: RngManager,
    clock: SimulationClock,
    policy_engine: PolicyEngine,
    oracle: Box<dyn PriorityOracle>,
    oracle_enabled: bool,
    /// Phase 7's auto-profit-taking sales feed this accumulator; it is
    /// folded into the market system's pending flows at the start of
    /// the *next* step (open question (b): deferred, not same-step).
    deferred_flows: HashMap<MarketId, f64>,
    /// Banks forced into default by a control command since the last
    /// phase 8 ran; consumed (and cleared) as phase 8's round-0 seed.
    pending_cascade_seeds: Vec<BankId>,
}

impl Kernel {
    /// Build a kernel from a validated [`SessionConfig`], with the
    /// default rule-based oracle.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        Self::with_oracle(config, Box::new(RuleBasedFallback))
    }

    /// Build a kernel with an injected [`PriorityOracle`] — the hook an
    /// embedder uses to wire in a real oracle instead of the fallback.
    pub fn with_oracle(config: &SessionConfig, oracle: Box<dyn PriorityOracle>) -> Result<Self, SessionError> {
        config.validate().map_err(SessionError::InvalidConfig)?;

        let mut banks = Vec::with_capacity(config.banks.len());
        for (idx, bank_cfg) in config.banks.iter().enumerate() {
            let (cash, investments, loans_given, borrowed) = bank_cfg.balance.resolve();
            let balance_sheet = BalanceSheet::new(cash, investments, loans_given, borrowed);
            let targets = BankTargets {
                target_leverage: bank_cfg.target_leverage,
                target_liquidity: bank_cfg.target_liquidity,
                target_market_exposure: bank_cfg.target_market_exposure,
            };
            let mut bank = Bank::new(bank_id(idx as u32), bank_cfg.name.clone(), balance_sheet, targets);
            bank.risk_appetite = bank_cfg.risk_appetite;
            banks.push(bank);
        }

        let mut markets = MarketSystem::new();
        for market_cfg in &config.markets {
            markets.add_market(Market::new(market_cfg.id.clone(), market_cfg.name.clone(), market_cfg.initial_price));
        }

        let mut ledger = Ledger::new();
        for conn in &config.connections {
            let from = bank_id(conn.from);
            let to = bank_id(conn.to);
            let to_name = banks[to.value() as usize].name.clone();
            let from_idx = from.value() as usize;
            banks[from_idx].balance_sheet.loans_given += conn.amount;
            *banks[from_idx].balance_sheet.loan_positions.entry(to).or_insert(0.0) += conn.amount;
            banks[to.value() as usize].balance_sheet.borrowed += conn.amount;
            ledger.append(crate::models::Transaction {
                time_step: 0,
                initiator_id: from,
                counterparty_id: Some(to),
                counterparty_type: crate::models::CounterpartyType::Bank,
                counterparty_name: to_name,
                kind: TransactionKind::Loan,
                amount: conn.amount,
                reason: "Initial interbank connection".to_string(),
            });
        }

        Ok(Self {
            banks,
            markets,
            ledger,
            rng: RngManager::new(config.seed),
            clock: SimulationClock::new(config.total_steps),
            policy_engine: PolicyEngine::new(config.use_game_theory),
            oracle,
            oracle_enabled: config.oracle_enabled,
            deferred_flows: HashMap::new(),
            pending_cascade_seeds: Vec::new(),
        })
    }

    pub fn current_step(&self) -> u64 {
        self.clock.current_step()
    }

    pub fn total_steps(&self) -> u64 {
        self.clock.total_steps()
    }

    pub fn banks(&self) -> &[Bank] {
        &self.banks
    }

    pub fn markets(&self) -> &MarketSystem {
        &self.markets
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn bank(&self, id: BankId) -> Option<&Bank> {
        self.banks.get(id.value() as usize)
    }

    pub fn total_defaults(&self) -> u32 {
        self.banks.iter().filter(|b| b.is_defaulted).count() as u32
    }

    pub fn total_equity(&self) -> f64 {
        self.banks.iter().map(|b| b.balance_sheet.equity()).sum()
    }

    /// Termination rule (§4.10): all banks defaulted, or the step
    /// budget is exhausted.
    pub fn is_complete(&self) -> bool {
        self.total_defaults() as usize >= self.banks.len() || self.clock.is_final_step()
    }

    /// The `init` event, built once from the kernel's starting state.
    pub fn init_event(&self, config: &SessionConfig) -> Event {
        let banks = self
            .banks
            .iter()
            .map(|b| InitBankSummary {
                id: b.id,
                name: b.name.clone(),
                capital: b.balance_sheet.equity(),
                cash: b.balance_sheet.cash,
                is_defaulted: b.is_defaulted,
            })
            .collect();
        let markets = self
            .markets
            .iter()
            .map(|(id, m)| InitMarketSummary {
                id: id.clone(),
                name: m.name.clone(),
                price: m.price,
                total_invested: m.total_invested,
            })
            .collect();
        let connections = config
            .connections
            .iter()
            .map(|c| InitConnectionSummary {
                from: bank_id(c.from),
                to: bank_id(c.to),
                amount: c.amount,
            })
            .collect();
        Event::Init { banks, markets, connections }
    }

    /// Apply a `delete_bank` control command: forces default
    /// immediately, emits `bank_deleted`, and seeds phase 8's cascade
    /// set for the next step. Unknown ids are a silent no-op.
    pub fn delete_bank(&mut self, id: BankId) -> Option<Event> {
        let idx = id.value() as usize;
        let bank = self.banks.get_mut(idx)?;
        if !bank.is_defaulted {
            self.pending_cascade_seeds.push(id);
        }
        bank.force_default(self.clock.current_step());
        Some(Event::BankDeleted { bank_id: id })
    }

    /// Apply a `trigger_default` control command: queues the bank to be
    /// forced into default at the next phase 8 (so the `default` event
    /// and loss propagation land on a step boundary). Unknown ids and
    /// already-defaulted banks are a silent no-op.
    pub fn trigger_default(&mut self, id: BankId) {
        let idx = id.value() as usize;
        match self.banks.get(idx) {
            Some(b) if !b.is_defaulted => self.pending_cascade_seeds.push(id),
            _ => {}
        }
    }

    /// Apply an `add_capital` control command: credits cash immediately.
    /// Unknown ids are a silent no-op.
    pub fn add_capital(&mut self, id: BankId, amount: f64) -> Option<Event> {
        let idx = id.value() as usize;
        let bank = self.banks.get_mut(idx)?;
        let amount = amount.max(0.0);
        bank.balance_sheet.cash += amount;
        Some(Event::CapitalAdded { bank_id: id, amount, new_cash: bank.balance_sheet.cash })
    }

    /// Run one full step through all nine phases.
    ///
    /// Entry precondition: `current_step < total_steps` and (checked by
    /// the caller) the owning session is `Running`. Returns every event
    /// the step produced, in emission order.
    pub fn step(&mut self) -> Result<Vec<Event>, KernelError> {
        if self.clock.is_final_step() {
            return Err(KernelError::NotRunning);
        }
        self.clock.advance();
        let step = self.clock.current_step();
        let mut events = Vec::new();

        for (market_id, amount) in std::mem::take(&mut self.deferred_flows) {
            self.markets.record_flow(&market_id, amount);
        }

        {
            let _span = trace_span!("phase1_step_start", step).entered();
            events.push(Event::StepStart { step });
        }

        let (neighbor_defaults, network_default_rate) = {
            let _span = trace_span!("phase2_information_update", step).entered();
            phase2_information_update(&self.banks)
        };

        let plans = {
            let _span = trace_span!("phase3_strategy_selection", step).entered();
            phase3_strategy_selection(
                &self.banks,
                &self.markets,
                &self.policy_engine,
                self.oracle.as_mut(),
                self.oracle_enabled,
                &mut self.rng,
                &neighbor_defaults,
                network_default_rate,
            )
        };

        {
            let _span = trace_span!("phase4_action_execution", step).entered();
            phase4_action_execution(
                &mut self.banks,
                &mut self.markets,
                &mut self.ledger,
                &mut self.rng,
                &plans,
                &neighbor_defaults,
                step,
                &mut events,
            );
        }

        let margin_calls = {
            let _span = trace_span!("phase5_margin_and_constraints", step).entered();
            phase5_margin_and_constraints(&self.banks, &self.markets)
        };

        {
            let _span = trace_span!("phase6_settlement_and_clearing", step).entered();
            phase6_settlement_and_clearing(&mut self.banks, &mut self.markets, &mut self.ledger, &margin_calls, step);
        }

        {
            let _span = trace_span!("phase7_market_update", step).entered();
            phase7_market_update(&mut self.banks, &mut self.markets, &mut self.ledger, &mut self.rng, &mut self.deferred_flows, step, &mut events);
        }

        {
            let _span = trace_span!("phase8_contagion_check", step).entered();
            phase8_contagion_check(&mut self.banks, &mut self.ledger, &mut self.pending_cascade_seeds, step, &mut events);
        }

        {
            let _span = trace_span!("phase9_step_end", step).entered();
            phase9_step_end(&mut self.banks, &self.markets, &mut self.ledger, step, &mut events);
        }

        Ok(events)
    }

    /// Serialize the kernel's full state to JSON, suitable for writing
    /// to durable storage and later handed back to [`Kernel::restore`].
    ///
    /// The snapshot is stamped with a hash of `config` so a restore
    /// against a mismatched config is rejected rather than silently
    /// producing a divergent run.
    pub fn snapshot(&self, config: &SessionConfig) -> Result<String, KernelError> {
        let config_hash = checkpoint::compute_config_hash(config)?;

        let mut deferred_flows: Vec<(MarketId, f64)> = self.deferred_flows.iter().map(|(k, v)| (k.clone(), *v)).collect();
        deferred_flows.sort_by(|a, b| a.0.cmp(&b.0));

        let mut pending_cascade_seeds = self.pending_cascade_seeds.clone();
        pending_cascade_seeds.sort();

        let snapshot = checkpoint::KernelSnapshot {
            current_step: self.clock.current_step(),
            total_steps: self.clock.total_steps(),
            rng_state: self.rng.get_state(),
            banks: self.banks.clone(),
            markets: self.markets.clone(),
            ledger: self.ledger.clone(),
            deferred_flows,
            pending_cascade_seeds,
            config_hash,
        };

        checkpoint::validate_snapshot(&snapshot, config.banks.len())?;

        serde_json::to_string(&snapshot).map_err(|e| KernelError::Serialization(e.to_string()))
    }

    /// Rebuild a kernel from a snapshot produced by [`Kernel::snapshot`],
    /// resuming with the default rule-based oracle.
    ///
    /// `config` must be the same configuration the snapshot was taken
    /// under (by content, not by reference) — a mismatched hash is a
    /// `KernelError::ConfigMismatch`.
    pub fn restore(config: &SessionConfig, snapshot_json: &str) -> Result<Self, SessionError> {
        Self::restore_with_oracle(config, snapshot_json, Box::new(RuleBasedFallback))
    }

    /// As [`Kernel::restore`], with an injected [`PriorityOracle`].
    pub fn restore_with_oracle(
        config: &SessionConfig,
        snapshot_json: &str,
        oracle: Box<dyn PriorityOracle>,
    ) -> Result<Self, SessionError> {
        config.validate().map_err(SessionError::InvalidConfig)?;

        let snapshot: checkpoint::KernelSnapshot =
            serde_json::from_str(snapshot_json).map_err(|e| KernelError::Serialization(e.to_string()))?;

        let expected_hash = checkpoint::compute_config_hash(config)?;
        if snapshot.config_hash != expected_hash {
            return Err(KernelError::ConfigMismatch { expected: expected_hash, actual: snapshot.config_hash }.into());
        }

        checkpoint::validate_snapshot(&snapshot, config.banks.len())?;

        Ok(Self {
            banks: snapshot.banks,
            markets: snapshot.markets,
            ledger: snapshot.ledger,
            rng: RngManager::new(snapshot.rng_state),
            clock: SimulationClock::from_state(snapshot.current_step, snapshot.total_steps),
            policy_engine: PolicyEngine::new(config.use_game_theory),
            oracle,
            oracle_enabled: config.oracle_enabled,
            deferred_flows: snapshot.deferred_flows.into_iter().collect(),
            pending_cascade_seeds: snapshot.pending_cascade_seeds,
        })
    }
}

// ------------------------------------------------------------------
// Phase 2: information_update
// ------------------------------------------------------------------

fn phase2_information_update(banks: &[Bank]) -> (Vec<u32>, f64) {
    let defaulted: HashSet<BankId> = banks.iter().filter(|b| b.is_defaulted).map(|b| b.id).collect();
    let neighbor_defaults: Vec<u32> = banks
        .iter()
        .map(|b| b.balance_sheet.loan_positions.keys().filter(|id| defaulted.contains(id)).count() as u32)
        .collect();
    let network_default_rate = if banks.is_empty() { 0.0 } else { defaulted.len() as f64 / banks.len() as f64 };
    (neighbor_defaults, network_default_rate)
}

// ------------------------------------------------------------------
// Phase 3: strategy_selection
// ------------------------------------------------------------------

fn best_market_summary(bank: &Bank, markets: &MarketSystem) -> (bool, f64, f64) {
    let has_markets = !markets.is_empty();
    let mut best: Option<(f64, f64)> = None; // (return, position)
    for (market_id, position) in bank.balance_sheet.investment_positions.iter() {
        if *position <= 0.0 {
            continue;
        }
        if let Some(market) = markets.get(market_id) {
            let ret = market.get_return();
            if best.map(|(best_ret, _)| ret > best_ret).unwrap_or(true) {
                best = Some((ret, *position));
            }
        }
    }
    let (best_return, best_position) = best.unwrap_or((0.0, 0.0));
    (has_markets, best_return, best_position)
}

fn sorted_market_ids(markets: &MarketSystem) -> Vec<MarketId> {
    let mut ids: Vec<MarketId> = markets.ids().cloned().collect();
    ids.sort();
    ids
}

fn pick_random<T: Clone>(rng: &mut RngManager, items: &[T]) -> Option<T> {
    if items.is_empty() {
        None
    } else {
        let idx = rng.range(0, items.len() as i64) as usize;
        Some(items[idx].clone())
    }
}

#[allow(clippy::too_many_arguments)]
fn phase3_strategy_selection(
    banks: &[Bank],
    markets: &MarketSystem,
    policy_engine: &PolicyEngine,
    oracle: &mut dyn PriorityOracle,
    oracle_enabled: bool,
    rng: &mut RngManager,
    neighbor_defaults: &[u32],
    network_default_rate: f64,
) -> Vec<PlannedAction> {
    let solvent_ids: Vec<BankId> = banks.iter().filter(|b| !b.is_defaulted).map(|b| b.id).collect();
    let market_ids = sorted_market_ids(markets);
    let mut plans = Vec::new();

    for i in 0..banks.len() {
        if banks[i].is_defaulted {
            continue;
        }
        let markets_summary = best_market_summary(&banks[i], markets);
        let observation: Observation = banks[i].observe_local_state(neighbor_defaults[i], markets_summary);
        let priority: StrategicPriority = if oracle_enabled {
            priority_or_fallback(oracle, &observation)
        } else {
            RuleBasedFallback::decide(&observation)
        };
        let (mut action, reason) = policy_engine.decide(&observation, Some(priority), network_default_rate, rng);

        let mut counterparty = None;
        let mut market_id = None;

        match action {
            BankAction::IncreaseLending => {
                let candidates: Vec<BankId> = solvent_ids.iter().copied().filter(|id| id.value() as usize != i).collect();
                counterparty = pick_random(rng, &candidates);
                if counterparty.is_none() {
                    action = if !market_ids.is_empty() && banks[i].balance_sheet.cash > 30.0 {
                        BankAction::InvestMarket
                    } else {
                        BankAction::HoardCash
                    };
                }
            }
            BankAction::DecreaseLending => {
                let mut candidates: Vec<BankId> = banks[i]
                    .balance_sheet
                    .loan_positions
                    .iter()
                    .filter(|(_, amt)| **amt > 0.0)
                    .map(|(id, _)| *id)
                    .collect();
                candidates.sort();
                counterparty = pick_random(rng, &candidates);
                if counterparty.is_none() {
                    action = BankAction::HoardCash;
                }
            }
            BankAction::InvestMarket => {
                market_id = pick_random(rng, &market_ids);
                if market_id.is_none() {
                    let candidates: Vec<BankId> = solvent_ids.iter().copied().filter(|id| id.value() as usize != i).collect();
                    counterparty = pick_random(rng, &candidates);
                    action = if counterparty.is_some() { BankAction::IncreaseLending } else { BankAction::HoardCash };
                }
            }
            BankAction::DivestMarket => {
                let mut held: Vec<(MarketId, f64)> = banks[i]
                    .balance_sheet
                    .investment_positions
                    .iter()
                    .filter(|(_, v)| **v > 0.0)
                    .map(|(k, v)| (k.clone(), *v))
                    .collect();
                held.sort_by(|a, b| a.0.cmp(&b.0));
                market_id = held
                    .iter()
                    .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(id, _)| id.clone())
                    .or_else(|| pick_random(rng, &market_ids));
                if market_id.is_none() {
                    let mut candidates: Vec<BankId> = banks[i]
                        .balance_sheet
                        .loan_positions
                        .iter()
                        .filter(|(_, amt)| **amt > 0.0)
                        .map(|(id, _)| *id)
                        .collect();
                    candidates.sort();
                    counterparty = pick_random(rng, &candidates);
                    action = if counterparty.is_some() { BankAction::DecreaseLending } else { BankAction::HoardCash };
                }
            }
            BankAction::HoardCash => {}
        }

        let counterparty_name = counterparty.map(|id| banks[id.value() as usize].name.clone());

        plans.push(PlannedAction {
            bank_idx: i,
            action,
            reason,
            counterparty,
            counterparty_name,
            market_id,
        });
    }

    plans
}

// ------------------------------------------------------------------
// Phase 4: action_execution
// ------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
fn phase4_action_execution(
    banks: &mut [Bank],
    markets: &mut MarketSystem,
    ledger: &mut Ledger,
    rng: &mut RngManager,
    plans: &[PlannedAction],
    neighbor_defaults: &[u32],
    step: u64,
    events: &mut Vec<Event>,
) {
    for plan in plans {
        let i = plan.bank_idx;
        let cash = banks[i].balance_sheet.cash;
        let equity = banks[i].balance_sheet.equity();
        let leverage = banks[i].balance_sheet.leverage();
        let liquidity_ratio = banks[i].balance_sheet.liquidity_ratio();
        let risk_appetite = banks[i].risk_appetite;

        let base_pct = rng.uniform_f64(0.05, 0.20);
        let caution = (1.0 - 0.15 * neighbor_defaults[i] as f64).max(0.3);
        let risk = 0.5 + 1.5 * risk_appetite;
        let sentiment = rng.uniform_f64(0.7, 1.3);

        let mut amount = match plan.action {
            BankAction::InvestMarket => cash * base_pct * risk * sentiment * 1.5,
            BankAction::DivestMarket => {
                let stress_factor = if liquidity_ratio < 0.25 { 2.0 } else { 1.0 };
                cash * base_pct * stress_factor * 1.2
            }
            BankAction::IncreaseLending => cash * base_pct * risk * caution * 1.3,
            BankAction::DecreaseLending => {
                let urgency = if leverage > 3.0 { 2.0 } else { 1.0 };
                cash * base_pct * urgency * 0.8
            }
            BankAction::HoardCash => rng.uniform_f64(0.01, 0.05) * cash,
        };
        amount *= rng.uniform_f64(0.8, 1.2);
        amount = amount.clamp(3.0, 80.0);
        amount = amount.min(equity * 0.4).max(0.0);

        let cash_before = banks[i].balance_sheet.cash;
        let tx = banks[i].execute_action(
            plan.action,
            step,
            plan.counterparty,
            plan.counterparty_name.as_deref(),
            plan.market_id.as_ref(),
            amount,
            plan.reason.clone(),
        );
        let Some(tx) = tx else { continue };
        let actual_amount = tx.amount;
        let market_id = plan.market_id.clone();

        if matches!(plan.action, BankAction::InvestMarket) {
            if let Some(mid) = &market_id {
                markets.record_flow(mid, actual_amount);
            }
        }
        if matches!(plan.action, BankAction::DivestMarket) {
            if let Some(mid) = &market_id {
                markets.record_flow(mid, -actual_amount);
                let market_return = markets.get(mid).map(|m| m.get_return()).unwrap_or(0.0);
                let gain = actual_amount * market_return;
                banks[i].balance_sheet.cash += gain;
                if gain.abs() > 0.5 {
                    events.push(Event::MarketGain {
                        step,
                        bank_id: banks[i].id,
                        market_id: mid.clone(),
                        divested_amount: actual_amount,
                        market_return,
                        realized_gain: gain,
                        new_cash: banks[i].balance_sheet.cash,
                    });
                }
            }
        }

        let cash_after = banks[i].balance_sheet.cash;
        events.push(Event::Transaction {
            step,
            from_bank: banks[i].id,
            to_bank: tx.counterparty_id,
            market_id,
            action: plan.action,
            amount: actual_amount,
            reason: tx.reason.clone(),
            cash_before,
            cash_after,
            cash_change: cash_after - cash_before,
        });
        ledger.append(tx);
    }
}

// ------------------------------------------------------------------
// Phase 5: margin_and_constraints
// ------------------------------------------------------------------

fn phase5_margin_and_constraints(banks: &[Bank], markets: &MarketSystem) -> Vec<MarginCall> {
    let avg_momentum = if markets.is_empty() {
        0.0
    } else {
        markets.iter().map(|(_, m)| m.momentum()).sum::<f64>() / markets.len() as f64
    };

    let mut calls = Vec::new();
    for (i, bank) in banks.iter().enumerate() {
        if bank.is_defaulted {
            continue;
        }
        let margin = avg_momentum.abs() * bank.balance_sheet.market_exposure();
        if margin > 0.1 * bank.balance_sheet.cash {
            calls.push(MarginCall { bank_idx: i, margin_required: margin });
        }
    }
    calls
}

// ------------------------------------------------------------------
// Phase 6: settlement_and_clearing
// ------------------------------------------------------------------

fn phase6_settlement_and_clearing(
    banks: &mut [Bank],
    markets: &mut MarketSystem,
    ledger: &mut Ledger,
    calls: &[MarginCall],
    step: u64,
) {
    for call in calls {
        let bank = &mut banks[call.bank_idx];
        if bank.is_defaulted || bank.balance_sheet.cash >= call.margin_required {
            continue;
        }
        let to_liquidate = bank.balance_sheet.investments.min(1.2 * call.margin_required);
        if to_liquidate <= 0.0 {
            continue;
        }
        let mut positions: Vec<(MarketId, f64)> =
            bank.balance_sheet.investment_positions.iter().filter(|(_, v)| **v > 0.0).map(|(k, v)| (k.clone(), *v)).collect();
        positions.sort_by(|a, b| a.0.cmp(&b.0));
        let total_held: f64 = positions.iter().map(|(_, v)| v).sum();
        if total_held <= 0.0 {
            continue;
        }
        for (mid, held) in positions {
            let liquidate_amt = (to_liquidate * (held / total_held)).min(held);
            if liquidate_amt <= 0.0 {
                continue;
            }
            bank.balance_sheet.investments -= liquidate_amt;
            *bank.balance_sheet.investment_positions.get_mut(&mid).unwrap() -= liquidate_amt;
            let received = liquidate_amt * 0.85;
            bank.balance_sheet.cash += received;
            ledger.append(market_transaction(step, bank.id, &mid, TransactionKind::Divest, liquidate_amt, "Margin call: forced liquidation"));
            markets.record_flow(&mid, -(liquidate_amt * 1e-4));
        }
    }
}

// ------------------------------------------------------------------
// Phase 7: market_update
// ------------------------------------------------------------------

/// Auto-profit-taking sell fraction per the distilled return bands, or
/// `None` if the position should be left alone.
fn auto_sell_fraction(market_return: f64, conservative: bool, rng: &mut RngManager) -> Option<f64> {
    if market_return > 0.30 {
        Some(rng.uniform_f64(0.5, 0.7))
    } else if market_return > 0.20 {
        Some(rng.uniform_f64(0.4, 0.6))
    } else if market_return > 0.10 {
        Some(rng.uniform_f64(0.3, 0.5))
    } else if market_return < -0.10 {
        Some(rng.uniform_f64(0.4, 0.7))
    } else if conservative && market_return > 0.05 {
        Some(rng.uniform_f64(0.15, 0.30))
    } else {
        None
    }
}

#[allow(clippy::too_many_arguments)]
fn phase7_market_update(
    banks: &mut [Bank],
    markets: &mut MarketSystem,
    ledger: &mut Ledger,
    rng: &mut RngManager,
    deferred_flows: &mut HashMap<MarketId, f64>,
    step: u64,
    events: &mut Vec<Event>,
) {
    let old_prices: HashMap<MarketId, f64> = markets.iter().map(|(id, m)| (id.clone(), m.price)).collect();
    markets.apply_all_flows(rng);

    for i in 0..banks.len() {
        if banks[i].is_defaulted {
            continue;
        }
        let conservative = banks[i].risk_appetite < 0.4;
        let mut positions: Vec<(MarketId, f64)> =
            banks[i].balance_sheet.investment_positions.iter().filter(|(_, v)| **v > 0.0).map(|(k, v)| (k.clone(), *v)).collect();
        positions.sort_by(|a, b| a.0.cmp(&b.0));

        for (mid, held) in positions {
            let market_return = match markets.get(&mid) {
                Some(m) => m.get_return(),
                None => continue,
            };
            let Some(fraction) = auto_sell_fraction(market_return, conservative, rng) else { continue };
            let sell = (held * fraction).min(held);
            if sell <= 0.0 {
                continue;
            }

            let cash_before = banks[i].balance_sheet.cash;
            banks[i].balance_sheet.investments -= sell;
            *banks[i].balance_sheet.investment_positions.get_mut(&mid).unwrap() -= sell;
            banks[i].balance_sheet.cash += sell;
            let gain = sell * market_return;
            banks[i].balance_sheet.cash += gain;
            let cash_after = banks[i].balance_sheet.cash;

            let reason = if market_return < 0.0 { "Auto stop-loss" } else { "Auto profit-taking" };
            let tx = market_transaction(step, banks[i].id, &mid, TransactionKind::Divest, sell, reason);
            events.push(Event::Transaction {
                step,
                from_bank: banks[i].id,
                to_bank: None,
                market_id: Some(mid.clone()),
                action: BankAction::DivestMarket,
                amount: sell,
                reason: tx.reason.clone(),
                cash_before,
                cash_after,
                cash_change: cash_after - cash_before,
            });
            ledger.append(tx);
            if gain.abs() > 0.5 {
                events.push(Event::MarketGain {
                    step,
                    bank_id: banks[i].id,
                    market_id: mid.clone(),
                    divested_amount: sell,
                    market_return,
                    realized_gain: gain,
                    new_cash: cash_after,
                });
            }

            *deferred_flows.entry(mid).or_insert(0.0) -= sell;
        }
    }

    if step % 5 == 0 {
        let returns: Vec<(MarketId, f64)> = markets.iter().map(|(id, m)| (id.clone(), m.get_return())).collect();
        for bank in banks.iter_mut() {
            if bank.is_defaulted {
                continue;
            }
            let (profit, txs) = bank.book_investment_profit(&returns, step);
            for tx in txs {
                ledger.append(tx);
            }
            if profit.abs() > 0.1 {
                events.push(Event::ProfitBooking { step, bank_id: bank.id, profit });
            }
        }
    }

    let mut market_ids: Vec<&MarketId> = markets.ids().collect();
    market_ids.sort();
    for id in market_ids {
        let Some(market) = markets.get(id) else { continue };
        let Some(&old_price) = old_prices.get(id) else { continue };
        if old_price == 0.0 {
            continue;
        }
        let change_pct = (market.price - old_price) / old_price * 100.0;
        if change_pct.abs() > 2.0 {
            events.push(Event::MarketMovement {
                step,
                market_id: id.clone(),
                old_price,
                new_price: market.price,
                change_pct,
            });
        }
    }
}

// ------------------------------------------------------------------
// Phase 8: contagion_check
// ------------------------------------------------------------------

fn phase8_contagion_check(banks: &mut [Bank], ledger: &mut Ledger, pending_cascade_seeds: &mut Vec<BankId>, step: u64, events: &mut Vec<Event>) {
    let mut newly_defaulted: Vec<BankId> = Vec::new();

    for id in std::mem::take(pending_cascade_seeds) {
        let idx = id.value() as usize;
        if let Some(bank) = banks.get_mut(idx) {
            if !bank.is_defaulted {
                bank.force_default(step);
                newly_defaulted.push(id);
            }
        }
    }

    for bank in banks.iter_mut() {
        if bank.check_default(step) {
            newly_defaulted.push(bank.id);
        }
    }

    let initial_defaults = newly_defaulted.clone();
    for id in &newly_defaulted {
        let equity = banks[id.value() as usize].balance_sheet.equity();
        events.push(Event::Default { step, bank_id: *id, equity });
        warn!(step, bank_id = id.value(), equity, "bank defaulted");
    }

    let mut cascade_count = 0u32;
    let mut frontier = newly_defaulted;
    for _round in 0..5 {
        if frontier.is_empty() {
            break;
        }
        let mut next_frontier = Vec::new();
        for defaulted_id in &frontier {
            for i in 0..banks.len() {
                if banks[i].is_defaulted {
                    continue;
                }
                let exposure = *banks[i].balance_sheet.loan_positions.get(defaulted_id).unwrap_or(&0.0);
                if exposure <= 0.0 {
                    continue;
                }
                let (_actual, tx) = banks[i].apply_loss(exposure, step, format!("default of bank {}", defaulted_id));
                ledger.append(tx);
                banks[i].balance_sheet.loans_given -= exposure;
                banks[i].balance_sheet.loan_positions.remove(defaulted_id);
                if banks[i].check_default(step) {
                    next_frontier.push(banks[i].id);
                    let equity = banks[i].balance_sheet.equity();
                    events.push(Event::Default { step, bank_id: banks[i].id, equity });
                    warn!(step, bank_id = banks[i].id.value(), equity, "cascade default");
                }
            }
        }
        if !next_frontier.is_empty() {
            cascade_count += 1;
        }
        frontier = next_frontier;
    }

    if cascade_count > 0 {
        warn!(step, cascade_count, "cascade propagated");
        events.push(Event::Cascade { step, initial_defaults, cascade_count });
    }
}

// ------------------------------------------------------------------
// Phase 9: step_end
// ------------------------------------------------------------------

fn phase9_step_end(banks: &mut [Bank], markets: &MarketSystem, ledger: &mut Ledger, step: u64, events: &mut Vec<Event>) {
    let defaulted: HashSet<BankId> = banks.iter().filter(|b| b.is_defaulted).map(|b| b.id).collect();

    for bank in banks.iter_mut() {
        if bank.is_defaulted {
            continue;
        }
        let neighbor_defaults = bank.balance_sheet.loan_positions.keys().filter(|id| defaulted.contains(id)).count() as u32;
        let local_stress = (neighbor_defaults as f64 / 5.0).min(1.0);
        let leverage_score = (1.0 - bank.balance_sheet.leverage() / 8.0).max(0.0);
        let liquidity_score = (bank.balance_sheet.liquidity_ratio() / 0.5).min(1.0);
        let equity_score = (bank.balance_sheet.equity() / 100.0).min(1.0);
        let health = (leverage_score * 0.3 + liquidity_score * 0.3 + equity_score * 0.3) * (1.0 - 0.5 * local_stress);
        bank.risk_appetite = (0.8 * bank.risk_appetite + 0.2 * health).clamp(0.05, 0.95);
    }

    let mut loan_snapshot: Vec<(BankId, BankId, f64)> = banks
        .iter()
        .flat_map(|b| b.balance_sheet.loan_positions.iter().filter(|(_, v)| **v > 0.0).map(move |(to, amt)| (b.id, *to, *amt)))
        .collect();
    loan_snapshot.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

    for (lender, borrower, principal) in loan_snapshot {
        let lender_idx = lender.value() as usize;
        let borrower_idx = borrower.value() as usize;
        if banks[lender_idx].is_defaulted || banks[borrower_idx].is_defaulted {
            continue;
        }

        let interest = principal * 0.05;
        if banks[borrower_idx].balance_sheet.cash >= interest {
            banks[borrower_idx].balance_sheet.cash -= interest;
            banks[lender_idx].balance_sheet.cash += interest;
            ledger.append(crate::models::Transaction {
                time_step: step,
                initiator_id: borrower,
                counterparty_id: Some(lender),
                counterparty_type: crate::models::CounterpartyType::Bank,
                counterparty_name: banks[lender_idx].name.clone(),
                kind: TransactionKind::Repay,
                amount: interest,
                reason: "Interest payment".to_string(),
            });
            events.push(Event::InterestPayment { step, from_bank: borrower, to_bank: lender, amount: interest, loan_balance: principal });
        }

        let repay_target = principal * 0.10;
        let cap = banks[borrower_idx].balance_sheet.cash * 0.30;
        let repay = repay_target.min(cap).min(banks[borrower_idx].balance_sheet.cash);
        if repay > 0.0 {
            banks[borrower_idx].balance_sheet.cash -= repay;
            banks[borrower_idx].balance_sheet.borrowed -= repay;
            banks[lender_idx].balance_sheet.cash += repay;
            banks[lender_idx].balance_sheet.loans_given -= repay;
            *banks[lender_idx].balance_sheet.loan_positions.get_mut(&borrower).unwrap() -= repay;
            ledger.append(crate::models::Transaction {
                time_step: step,
                initiator_id: borrower,
                counterparty_id: Some(lender),
                counterparty_type: crate::models::CounterpartyType::Bank,
                counterparty_name: banks[lender_idx].name.clone(),
                kind: TransactionKind::Repay,
                amount: repay,
                reason: "Loan repayment".to_string(),
            });
            events.push(Event::LoanRepayment { step, from_bank: borrower, to_bank: lender, amount: repay, remaining_balance: principal - repay });
        }
    }

    let total_defaults = banks.iter().filter(|b| b.is_defaulted).count() as u32;
    let total_equity: f64 = banks.iter().map(|b| b.balance_sheet.equity()).sum();
    let bank_states = banks
        .iter()
        .map(|b| BankStateSnapshot {
            bank_id: b.id,
            cash: b.balance_sheet.cash,
            investments: b.balance_sheet.investments,
            loans_given: b.balance_sheet.loans_given,
            borrowed: b.balance_sheet.borrowed,
            equity: b.balance_sheet.equity(),
            is_defaulted: b.is_defaulted,
            risk_appetite: b.risk_appetite,
        })
        .collect();

    let mut market_ids: Vec<&MarketId> = markets.ids().collect();
    market_ids.sort();
    let market_states = market_ids
        .into_iter()
        .filter_map(|id| {
            markets.get(id).map(|m| MarketStateSnapshot {
                market_id: id.clone(),
                price: m.price,
                total_invested: m.total_invested,
                return_pct: m.get_return() * 100.0,
            })
        })
        .collect();

    events.push(Event::StepEnd { step, total_defaults, total_equity, bank_states, market_states });
}
