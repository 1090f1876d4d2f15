//! Per-bank identity, balance sheet, targets, and action executor.

use super::balance_sheet::BalanceSheet;
use super::ids::{BankId, MarketId};
use super::ledger::{market_transaction, CounterpartyType, Transaction, TransactionKind};
use serde::{Deserialize, Serialize};

/// A bank's discrete strategic actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BankAction {
    IncreaseLending,
    DecreaseLending,
    InvestMarket,
    DivestMarket,
    HoardCash,
}

/// External high-level hint handed down by the priority oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategicPriority {
    Profit,
    Liquidity,
    Stability,
}

/// A bank's balance-sheet targets, used to compute gaps fed into the
/// policy engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BankTargets {
    pub target_leverage: f64,
    pub target_liquidity: f64,
    pub target_market_exposure: f64,
}

impl Default for BankTargets {
    fn default() -> Self {
        Self {
            target_leverage: 3.0,
            target_liquidity: 0.3,
            target_market_exposure: 0.2,
        }
    }
}

/// Fixed-shape snapshot of a bank's state, consulted by the
/// [`crate::policy`] engine. Every field has an explicit value — no
/// `dict.get(key, default)` reflection, as called for in the design
/// notes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Observation {
    pub bank_id: BankId,
    pub equity: f64,
    pub cash: f64,
    pub leverage: f64,
    pub liquidity_ratio: f64,
    pub market_exposure: f64,
    pub capital_ratio: f64,
    pub leverage_gap: f64,
    pub liquidity_gap: f64,
    pub exposure_gap: f64,
    pub local_stress: f64,
    pub risk_appetite: f64,
    pub investments: f64,
    pub loans_given: f64,
    pub borrowed: f64,
    pub has_markets: bool,
    pub best_market_return: f64,
    pub best_market_position: f64,
    pub total_invested: f64,
}

/// One financial institution: a strategic agent with a balance sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bank {
    pub id: BankId,
    pub name: String,
    pub balance_sheet: BalanceSheet,
    pub targets: BankTargets,
    /// Evolves per step; drives investment probability. Stays within
    /// `[0.05, 0.95]`.
    pub risk_appetite: f64,
    /// Terminal once `true`; never cleared (property **P3**).
    pub is_defaulted: bool,
    pub default_step: Option<u64>,
    pub past_defaults: u32,
    pub last_action: Option<BankAction>,
    pub last_priority: Option<StrategicPriority>,
}

impl Bank {
    pub fn new(id: BankId, name: impl Into<String>, balance_sheet: BalanceSheet, targets: BankTargets) -> Self {
        Self {
            id,
            name: name.into(),
            balance_sheet,
            targets,
            risk_appetite: 0.5,
            is_defaulted: false,
            default_step: None,
            past_defaults: 0,
            last_action: None,
            last_priority: None,
        }
    }

    /// Pure observation of local state — never mutates.
    ///
    /// `markets_summary` is `(has_markets, best_market_return,
    /// best_market_position)`; the kernel computes it once per step
    /// from the bank's held positions and passes it in.
    pub fn observe_local_state(
        &self,
        neighbor_defaults: u32,
        markets_summary: (bool, f64, f64),
    ) -> Observation {
        let (has_markets, best_market_return, best_market_position) = markets_summary;
        let leverage = self.balance_sheet.leverage();
        let liquidity_ratio = self.balance_sheet.liquidity_ratio();
        let market_exposure = self.balance_sheet.market_exposure();

        Observation {
            bank_id: self.id,
            equity: self.balance_sheet.equity(),
            cash: self.balance_sheet.cash,
            leverage,
            liquidity_ratio,
            market_exposure,
            capital_ratio: self.balance_sheet.capital_ratio(),
            leverage_gap: leverage - self.targets.target_leverage,
            liquidity_gap: self.targets.target_liquidity - liquidity_ratio,
            exposure_gap: market_exposure - self.targets.target_market_exposure,
            local_stress: (neighbor_defaults as f64 / 5.0).min(1.0),
            risk_appetite: self.risk_appetite,
            investments: self.balance_sheet.investments,
            loans_given: self.balance_sheet.loans_given,
            borrowed: self.balance_sheet.borrowed,
            has_markets,
            best_market_return,
            best_market_position,
            total_invested: self.balance_sheet.investments,
        }
    }

    /// Execute a dispatch-table action, returning the [`Transaction`]
    /// it produced (always exactly one for a non-defaulted bank —
    /// property **P2**). Returns `None` only if the bank is already
    /// defaulted (the default-guard no-op).
    #[allow(clippy::too_many_arguments)]
    pub fn execute_action(
        &mut self,
        action: BankAction,
        time_step: u64,
        counterparty_id: Option<BankId>,
        counterparty_name: Option<&str>,
        market_id: Option<&MarketId>,
        amount: f64,
        reason: impl Into<String>,
    ) -> Option<Transaction> {
        if self.is_defaulted {
            return None;
        }
        let reason = reason.into();
        let amount = amount.max(0.0).min(self.balance_sheet.cash * 0.5);

        let transaction = match action {
            BankAction::IncreaseLending => {
                let cp = counterparty_id?;
                if amount <= 0.0 {
                    return None;
                }
                self.balance_sheet.cash -= amount;
                self.balance_sheet.loans_given += amount;
                *self.balance_sheet.loan_positions.entry(cp).or_insert(0.0) += amount;
                Some(Transaction {
                    time_step,
                    initiator_id: self.id,
                    counterparty_id: Some(cp),
                    counterparty_type: CounterpartyType::Bank,
                    counterparty_name: counterparty_name.unwrap_or_default().to_string(),
                    kind: TransactionKind::Loan,
                    amount,
                    reason,
                })
            }
            BankAction::DecreaseLending => {
                let cp = counterparty_id?;
                let current = *self.balance_sheet.loan_positions.get(&cp).unwrap_or(&0.0);
                let reduce = amount.min(current);
                if reduce <= 0.0 {
                    return None;
                }
                self.balance_sheet.cash += reduce;
                self.balance_sheet.loans_given -= reduce;
                *self.balance_sheet.loan_positions.entry(cp).or_insert(0.0) -= reduce;
                Some(Transaction {
                    time_step,
                    initiator_id: self.id,
                    counterparty_id: Some(cp),
                    counterparty_type: CounterpartyType::Bank,
                    counterparty_name: counterparty_name.unwrap_or_default().to_string(),
                    kind: TransactionKind::Repay,
                    amount: reduce,
                    reason,
                })
            }
            BankAction::InvestMarket => {
                let mid = market_id?;
                if amount <= 0.0 {
                    return None;
                }
                self.balance_sheet.cash -= amount;
                self.balance_sheet.investments += amount;
                *self.balance_sheet.investment_positions.entry(mid.clone()).or_insert(0.0) += amount;
                Some(market_transaction(time_step, self.id, mid, TransactionKind::Invest, amount, reason))
            }
            BankAction::DivestMarket => {
                let mid = market_id?;
                let current = *self.balance_sheet.investment_positions.get(mid).unwrap_or(&0.0);
                let divest = amount.min(current);
                if divest <= 0.0 {
                    return None;
                }
                self.balance_sheet.cash += divest;
                self.balance_sheet.investments -= divest;
                *self.balance_sheet.investment_positions.entry(mid.clone()).or_insert(0.0) -= divest;
                Some(market_transaction(time_step, self.id, mid, TransactionKind::Divest, divest, reason))
            }
            BankAction::HoardCash => Some(Transaction {
                time_step,
                initiator_id: self.id,
                counterparty_id: None,
                counterparty_type: CounterpartyType::SelfRef,
                counterparty_name: "SELF".to_string(),
                kind: TransactionKind::Repay,
                amount: 0.0,
                reason,
            }),
        };

        self.last_action = Some(action);
        transaction
    }

    /// Absorb a forced loss (e.g. a cascade hop). Returns the amount
    /// actually deducted (`min(amount, cash)` — cash never goes
    /// negative from this alone).
    pub fn apply_loss(&mut self, amount: f64, time_step: u64, source: impl Into<String>) -> (f64, Transaction) {
        let source = source.into();
        let actual = amount.min(self.balance_sheet.cash);
        self.balance_sheet.cash -= actual;
        let transaction = Transaction {
            time_step,
            initiator_id: self.id,
            counterparty_id: None,
            counterparty_type: CounterpartyType::System,
            counterparty_name: source.clone(),
            kind: TransactionKind::DefaultLoss,
            amount: actual,
            reason: format!("Loss from {source}"),
        };
        (actual, transaction)
    }

    /// Transition to defaulted iff currently solvent but the balance
    /// sheet's default predicate trips. Idempotent-once: calling this
    /// on an already-defaulted bank is a no-op and returns `false`.
    pub fn check_default(&mut self, step: u64) -> bool {
        if !self.is_defaulted && self.balance_sheet.is_insolvent() {
            self.is_defaulted = true;
            self.default_step = Some(step);
            self.past_defaults += 1;
            true
        } else {
            false
        }
    }

    /// Force this bank into default immediately (used by
    /// `trigger_default` / `delete_bank` control commands). Idempotent.
    pub fn force_default(&mut self, step: u64) {
        if !self.is_defaulted {
            self.is_defaulted = true;
            self.default_step = Some(step);
            self.past_defaults += 1;
        }
    }

    /// Mark-to-market every held investment position against the
    /// supplied `(market_id, return)` pairs; credits `position *
    /// return` to cash for each, logs an audit `Invest`/`Divest`
    /// transaction of `|profit|`, and returns the total profit/loss
    /// booked. Does not touch the `investments` book value.
    pub fn book_investment_profit(
        &mut self,
        market_returns: &[(MarketId, f64)],
        time_step: u64,
    ) -> (f64, Vec<Transaction>) {
        if self.is_defaulted {
            return (0.0, Vec::new());
        }
        let mut total = 0.0;
        let mut transactions = Vec::new();
        for (market_id, market_return) in market_returns {
            let held = *self.balance_sheet.investment_positions.get(market_id).unwrap_or(&0.0);
            if held <= 0.0 {
                continue;
            }
            let profit = held * market_return;
            self.balance_sheet.cash += profit;
            total += profit;
            if profit != 0.0 {
                let kind = if profit > 0.0 { TransactionKind::Invest } else { TransactionKind::Divest };
                transactions.push(market_transaction(
                    time_step,
                    self.id,
                    market_id,
                    kind,
                    profit.abs(),
                    format!("Profit booking: {:.1}% return", market_return * 100.0),
                ));
            }
        }
        (total, transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank(cash: f64, investments: f64, loans: f64, borrowed: f64) -> Bank {
        Bank::new(
            BankId::new(0),
            "Bank_0",
            BalanceSheet::new(cash, investments, loans, borrowed),
            BankTargets::default(),
        )
    }

    #[test]
    fn test_increase_lending_moves_cash_to_loans() {
        let mut b = bank(100.0, 0.0, 0.0, 0.0);
        let tx = b
            .execute_action(BankAction::IncreaseLending, 1, Some(BankId::new(1)), None, None, 20.0, "lend")
            .unwrap();
        assert_eq!(tx.kind, TransactionKind::Loan);
        assert_eq!(b.balance_sheet.cash, 80.0);
        assert_eq!(b.balance_sheet.loans_given, 20.0);
        assert_eq!(b.balance_sheet.loan_positions[&BankId::new(1)], 20.0);
    }

    #[test]
    fn test_decrease_lending_caps_at_current_loan() {
        let mut b = bank(50.0, 0.0, 20.0, 0.0);
        b.balance_sheet.loan_positions.insert(BankId::new(1), 20.0);
        let tx = b
            .execute_action(BankAction::DecreaseLending, 1, Some(BankId::new(1)), None, None, 50.0, "repay")
            .unwrap();
        assert_eq!(tx.amount, 20.0);
        assert_eq!(b.balance_sheet.loans_given, 0.0);
    }

    #[test]
    fn test_invest_and_divest_market() {
        let mid: MarketId = "BANK_INDEX".to_string();
        let mut b = bank(100.0, 0.0, 0.0, 0.0);
        b.execute_action(BankAction::InvestMarket, 1, None, None, Some(&mid), 30.0, "invest").unwrap();
        assert_eq!(b.balance_sheet.investments, 30.0);
        let tx = b
            .execute_action(BankAction::DivestMarket, 2, None, None, Some(&mid), 100.0, "divest")
            .unwrap();
        // divest capped at held position (30), not the requested 100 — but pre-clamp
        // to 50% of cash (70 * 0.5 = 35) also applies; min(100, 35) -> capped at held 30.
        assert_eq!(tx.amount, 30.0);
        assert_eq!(b.balance_sheet.investments, 0.0);
    }

    #[test]
    fn test_hoard_cash_logs_zero_amount_self_marker() {
        let mut b = bank(100.0, 0.0, 0.0, 0.0);
        let tx = b.execute_action(BankAction::HoardCash, 1, None, None, None, 0.0, "hoard").unwrap();
        assert_eq!(tx.amount, 0.0);
        assert_eq!(tx.counterparty_type, CounterpartyType::SelfRef);
        assert_eq!(b.balance_sheet.cash, 100.0);
    }

    #[test]
    fn test_defaulted_bank_actions_are_noop() {
        let mut b = bank(100.0, 0.0, 0.0, 200.0);
        b.check_default(1);
        assert!(b.is_defaulted);
        let result = b.execute_action(BankAction::HoardCash, 2, None, None, None, 0.0, "x");
        assert!(result.is_none());
    }

    #[test]
    fn test_check_default_idempotent_once() {
        let mut b = bank(0.0, 0.0, 0.0, 10.0);
        assert!(b.check_default(5));
        assert_eq!(b.past_defaults, 1);
        assert!(!b.check_default(6));
        assert_eq!(b.past_defaults, 1);
        assert_eq!(b.default_step, Some(5));
    }

    #[test]
    fn test_apply_loss_caps_at_cash() {
        let mut b = bank(10.0, 0.0, 0.0, 0.0);
        let (actual, tx) = b.apply_loss(25.0, 3, "cascade");
        assert_eq!(actual, 10.0);
        assert_eq!(b.balance_sheet.cash, 0.0);
        assert_eq!(tx.kind, TransactionKind::DefaultLoss);
    }

    #[test]
    fn test_book_investment_profit_credits_cash_without_touching_book_value() {
        let mid: MarketId = "BANK_INDEX".to_string();
        let mut b = bank(50.0, 100.0, 0.0, 0.0);
        b.balance_sheet.investment_positions.insert(mid.clone(), 100.0);
        let (total, txs) = b.book_investment_profit(&[(mid, 0.1)], 5);
        assert!((total - 10.0).abs() < 1e-9);
        assert_eq!(b.balance_sheet.cash, 60.0);
        assert_eq!(b.balance_sheet.investments, 100.0); // book value untouched
        assert_eq!(txs.len(), 1);
    }

    #[test]
    fn test_pre_clamp_limits_amount_to_half_cash() {
        let mut b = bank(100.0, 0.0, 0.0, 0.0);
        let mid: MarketId = "BANK_INDEX".to_string();
        let tx = b
            .execute_action(BankAction::InvestMarket, 1, None, None, Some(&mid), 90.0, "invest")
            .unwrap();
        assert_eq!(tx.amount, 50.0);
    }
}
