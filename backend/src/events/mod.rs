//! The event protocol: typed event variants and their wire encoding.
//!
//! Every event is a self-describing, `serde`-tagged object
//! (`#[serde(tag = "type")]`) so a stream of events serialises as one
//! JSON object per line — the same framing the original
//! `interactive_simulation_generator` produced as `data: {json}\n\n`
//! server-sent-event lines, simplified here to a bare JSON object per
//! line since the HTTP/SSE envelope itself is out of scope for this
//! crate.

use crate::models::{BankAction, BankId, MarketId};
use serde::{Deserialize, Serialize};

/// Summary of one bank at session init, for the `init` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitBankSummary {
    pub id: BankId,
    pub name: String,
    pub capital: f64,
    pub cash: f64,
    pub is_defaulted: bool,
}

/// Summary of one market at session init, for the `init` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitMarketSummary {
    pub id: MarketId,
    pub name: String,
    pub price: f64,
    pub total_invested: f64,
}

/// An initial interbank connection, for the `init` event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InitConnectionSummary {
    pub from: BankId,
    pub to: BankId,
    pub amount: f64,
}

/// A per-bank snapshot carried on `step_end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankStateSnapshot {
    pub bank_id: BankId,
    pub cash: f64,
    pub investments: f64,
    pub loans_given: f64,
    pub borrowed: f64,
    pub equity: f64,
    pub is_defaulted: bool,
    pub risk_appetite: f64,
}

/// A per-market snapshot carried on `step_end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStateSnapshot {
    pub market_id: MarketId,
    pub price: f64,
    pub total_invested: f64,
    pub return_pct: f64,
}

/// One typed event produced by the Kernel or the SessionManager.
///
/// Serialises with an internal `type` tag whose value matches the
/// wire name in each variant's doc comment, e.g. `Event::StepStart`
/// becomes `{"type": "step_start", "step": 3}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// `init`: emitted once, immediately after a session starts its
    /// first step loop iteration.
    Init {
        banks: Vec<InitBankSummary>,
        markets: Vec<InitMarketSummary>,
        connections: Vec<InitConnectionSummary>,
    },
    /// `step_start`: phase 1 of every step.
    StepStart { step: u64 },
    /// `transaction`: emitted by phase 4 for every
    /// [`crate::models::Transaction`] a bank's action produces.
    Transaction {
        step: u64,
        from_bank: BankId,
        to_bank: Option<BankId>,
        market_id: Option<MarketId>,
        action: BankAction,
        amount: f64,
        reason: String,
        cash_before: f64,
        cash_after: f64,
        cash_change: f64,
    },
    /// `market_gain`: emitted alongside a `DIVEST_MARKET` transaction
    /// (phase 4) or an auto-profit-taking sale (phase 7) whenever the
    /// realised gain/loss exceeds the reporting threshold.
    MarketGain {
        step: u64,
        bank_id: BankId,
        market_id: MarketId,
        divested_amount: f64,
        market_return: f64,
        realized_gain: f64,
        new_cash: f64,
    },
    /// `profit_booking`: emitted every fifth step by
    /// `bookInvestmentProfit`, when `|profit| > 0.1`.
    ProfitBooking { step: u64, bank_id: BankId, profit: f64 },
    /// `interest_payment`: phase 9 loan accrual, interest leg.
    InterestPayment {
        step: u64,
        from_bank: BankId,
        to_bank: BankId,
        amount: f64,
        loan_balance: f64,
    },
    /// `loan_repayment`: phase 9 loan accrual, principal leg.
    LoanRepayment {
        step: u64,
        from_bank: BankId,
        to_bank: BankId,
        amount: f64,
        remaining_balance: f64,
    },
    /// `default`: a bank's default predicate tripped this step (phase
    /// 8), either on the first pass or during a cascade round.
    Default { step: u64, bank_id: BankId, equity: f64 },
    /// `cascade`: emitted once per step, only if `cascade_count > 0`.
    Cascade {
        step: u64,
        initial_defaults: Vec<BankId>,
        cascade_count: u32,
    },
    /// `market_movement`: phase 7, only if `|%change| > 2`.
    MarketMovement {
        step: u64,
        market_id: MarketId,
        old_price: f64,
        new_price: f64,
        change_pct: f64,
    },
    /// `step_end`: phase 9, always emitted — the terminal event of
    /// every step.
    StepEnd {
        step: u64,
        total_defaults: u32,
        total_equity: f64,
        bank_states: Vec<BankStateSnapshot>,
        market_states: Vec<MarketStateSnapshot>,
    },
    /// `paused`: the session transitioned `Running -> Paused`.
    Paused { step: u64 },
    /// `resumed`: the session transitioned `Paused -> Running`.
    Resumed { step: u64 },
    /// `stopped`: the session transitioned to `Stopped`, terminal.
    Stopped { step: u64 },
    /// `complete`: the session transitioned to `Completed`, terminal.
    Complete {
        step: u64,
        total_defaults: u32,
        total_equity: f64,
    },
    /// `bank_deleted`: a `delete_bank` control command was applied.
    BankDeleted { bank_id: BankId },
    /// `capital_added`: an `add_capital` control command was applied.
    CapitalAdded {
        bank_id: BankId,
        amount: f64,
        new_cash: f64,
    },
}

impl Event {
    /// Serialise as one JSON line, newline-terminated — the unit a
    /// streaming subscriber writes to its transport.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut s = serde_json::to_string(self)?;
        s.push('\n');
        Ok(s)
    }

    /// The step this event belongs to, if it carries one.
    /// `init`/`bank_deleted`/`capital_added` are step-agnostic.
    pub fn step(&self) -> Option<u64> {
        match self {
            Event::StepStart { step }
            | Event::Transaction { step, .. }
            | Event::MarketGain { step, .. }
            | Event::ProfitBooking { step, .. }
            | Event::InterestPayment { step, .. }
            | Event::LoanRepayment { step, .. }
            | Event::Default { step, .. }
            | Event::Cascade { step, .. }
            | Event::MarketMovement { step, .. }
            | Event::StepEnd { step, .. }
            | Event::Paused { step }
            | Event::Resumed { step }
            | Event::Stopped { step }
            | Event::Complete { step, .. } => Some(*step),
            Event::Init { .. } | Event::BankDeleted { .. } | Event::CapitalAdded { .. } => None,
        }
    }
}

/// In-memory append-only collection of events produced during a
/// session, primarily used by tests and by non-streaming callers of
/// `step` (§6: "the same events are also emitted to the event
/// channel").
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events_at_step(&self, step: u64) -> Vec<&Event> {
        self.events.iter().filter(|e| e.step() == Some(step)).collect()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tag_matches_wire_name() {
        let event = Event::StepStart { step: 3 };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_start");
        assert_eq!(json["step"], 3);
    }

    #[test]
    fn test_transaction_event_round_trips() {
        let event = Event::Transaction {
            step: 1,
            from_bank: BankId::new(0),
            to_bank: Some(BankId::new(1)),
            market_id: None,
            action: BankAction::IncreaseLending,
            amount: 10.0,
            reason: "test".into(),
            cash_before: 100.0,
            cash_after: 90.0,
            cash_change: -10.0,
        };
        let s = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&s).unwrap();
        match back {
            Event::Transaction { amount, .. } => assert_eq!(amount, 10.0),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_to_line_is_newline_terminated() {
        let event = Event::Paused { step: 5 };
        let line = event.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"paused\""));
    }

    #[test]
    fn test_event_log_filters_by_step() {
        let mut log = EventLog::new();
        log.log(Event::StepStart { step: 1 });
        log.log(Event::StepEnd {
            step: 1,
            total_defaults: 0,
            total_equity: 100.0,
            bank_states: vec![],
            market_states: vec![],
        });
        log.log(Event::StepStart { step: 2 });
        assert_eq!(log.events_at_step(1).len(), 2);
        assert_eq!(log.events_at_step(2).len(), 1);
    }

    #[test]
    fn test_step_agnostic_events_have_no_step() {
        assert_eq!(Event::BankDeleted { bank_id: BankId::new(0) }.step(), None);
        assert_eq!(
            Event::Init {
                banks: vec![],
                markets: vec![],
                connections: vec![]
            }
            .step(),
            None
        );
    }
}
