//! Append-only transaction ledger.

use super::ids::{BankId, MarketId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Who (or what) stood on the other side of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterpartyType {
    Bank,
    Market,
    System,
    /// A bank acting on itself — used for the `HoardCash` audit marker.
    SelfRef,
}

/// The kind of value movement a transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Loan,
    Repay,
    Invest,
    Divest,
    DefaultLoss,
}

/// One append-only ledger entry.
///
/// Transactions are never mutated once created; the only way to
/// produce one is [`Ledger::append`]. `counterparty_id` is `None` for
/// market/system/self counterparties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub time_step: u64,
    pub initiator_id: BankId,
    pub counterparty_id: Option<BankId>,
    pub counterparty_type: CounterpartyType,
    pub counterparty_name: String,
    pub kind: TransactionKind,
    pub amount: f64,
    pub reason: String,
}

/// Ordered, append-only sequence of [`Transaction`]s.
///
/// No concurrent writers: a `Ledger` belongs exclusively to one
/// session's worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    entries: Vec<Transaction>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transaction, returning a reference to the stored copy.
    pub fn append(&mut self, transaction: Transaction) -> &Transaction {
        self.entries.push(transaction);
        self.entries.last().expect("just pushed")
    }

    pub fn all(&self) -> &[Transaction] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All transactions where `bank` is the initiator or the counterparty.
    pub fn by_bank(&self, bank: BankId) -> Vec<&Transaction> {
        self.entries
            .iter()
            .filter(|t| t.initiator_id == bank || t.counterparty_id == Some(bank))
            .collect()
    }

    pub fn by_time(&self, step: u64) -> Vec<&Transaction> {
        self.entries.iter().filter(|t| t.time_step == step).collect()
    }

    pub fn by_type(&self, kind: TransactionKind) -> Vec<&Transaction> {
        self.entries.iter().filter(|t| t.kind == kind).collect()
    }

    /// Count and total amount per [`TransactionKind`].
    pub fn summary(&self) -> HashMap<TransactionKind, (u64, f64)> {
        let mut out: HashMap<TransactionKind, (u64, f64)> = HashMap::new();
        for t in &self.entries {
            let entry = out.entry(t.kind).or_insert((0, 0.0));
            entry.0 += 1;
            entry.1 += t.amount;
        }
        out
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Helper constructing a transaction initiated against a market
/// counterparty (`INVEST`/`DIVEST`), used by `Bank::execute_action`.
pub fn market_transaction(
    time_step: u64,
    initiator_id: BankId,
    market_id: &MarketId,
    kind: TransactionKind,
    amount: f64,
    reason: impl Into<String>,
) -> Transaction {
    Transaction {
        time_step,
        initiator_id,
        counterparty_id: None,
        counterparty_type: CounterpartyType::Market,
        counterparty_name: market_id.clone(),
        kind,
        amount,
        reason: reason.into(),
    }
}
