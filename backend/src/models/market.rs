//! Tradable market index: price formation and flow accounting.

use super::ids::MarketId;
use crate::rng::RngManager;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default price-impact-per-unit-flow constant.
pub const DEFAULT_PRICE_SENSITIVITY: f64 = 0.002;
/// Default per-step random volatility band (± fraction of price).
pub const DEFAULT_VOLATILITY: f64 = 0.03;
/// No price ever falls below this floor.
pub const PRICE_FLOOR: f64 = 1.0;

/// A single tradable index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub name: String,
    pub initial_price: f64,
    pub price: f64,
    pub total_invested: f64,
    pub price_history: Vec<f64>,
    pub flow_history: Vec<f64>,
    pub price_sensitivity: f64,
    pub volatility: f64,
}

impl Market {
    pub fn new(id: impl Into<MarketId>, name: impl Into<String>, initial_price: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            initial_price,
            price: initial_price,
            total_invested: 0.0,
            price_history: vec![initial_price],
            flow_history: Vec::new(),
            price_sensitivity: DEFAULT_PRICE_SENSITIVITY,
            volatility: DEFAULT_VOLATILITY,
        }
    }

    /// Momentum term: `0.1 * (price[t-1] - price[t-3])` once at least
    /// three price points exist, else `0.0`.
    ///
    /// `pub(crate)` rather than private: the kernel's margin calculation
    /// (phase 5) reads every market's momentum directly.
    pub(crate) fn momentum(&self) -> f64 {
        let n = self.price_history.len();
        if n >= 3 {
            0.1 * (self.price_history[n - 1] - self.price_history[n - 3])
        } else {
            0.0
        }
    }

    /// Apply a net flow (positive = net investment, negative = net
    /// divestment) to the price.
    ///
    /// `delta = net * price_sensitivity + uniform(-volatility,
    /// +volatility) * price + momentum`; price floors at
    /// [`PRICE_FLOOR`] (property **P6**).
    pub fn apply_flow(&mut self, net: f64, rng: &mut RngManager) {
        let supply_demand = net * self.price_sensitivity;
        let shock = rng.uniform_f64(-self.volatility, self.volatility) * self.price;
        let momentum = self.momentum();
        let delta = supply_demand + shock + momentum;

        self.price = (self.price + delta).max(PRICE_FLOOR);
        self.total_invested += net;
        self.flow_history.push(net);
        self.price_history.push(self.price);
    }

    /// Cumulative return since the market's initial price.
    pub fn get_return(&self) -> f64 {
        (self.price - self.initial_price) / self.initial_price
    }
}

/// Collection of markets plus a per-step pending-flow accumulator.
///
/// `record_flow` accumulates; `apply_all_flows` applies each market's
/// net flow exactly once (phase 7 of the kernel step) and resets every
/// accumulator, whether or not its net flow was nonzero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSystem {
    markets: HashMap<MarketId, Market>,
    pending_flows: HashMap<MarketId, f64>,
}

impl MarketSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_market(&mut self, market: Market) {
        self.pending_flows.insert(market.id.clone(), 0.0);
        self.markets.insert(market.id.clone(), market);
    }

    pub fn get(&self, id: &MarketId) -> Option<&Market> {
        self.markets.get(id)
    }

    pub fn get_mut(&mut self, id: &MarketId) -> Option<&mut Market> {
        self.markets.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MarketId, &Market)> {
        self.markets.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = &MarketId> {
        self.markets.keys()
    }

    /// Accumulate `amount` onto `market_id`'s pending flow. Unknown ids
    /// are a silent no-op.
    pub fn record_flow(&mut self, market_id: &MarketId, amount: f64) {
        if let Some(flow) = self.pending_flows.get_mut(market_id) {
            *flow += amount;
        }
    }

    /// Apply every market's accumulated net flow exactly once, then
    /// zero every accumulator.
    pub fn apply_all_flows(&mut self, rng: &mut RngManager) {
        let mut ids: Vec<MarketId> = self.pending_flows.keys().cloned().collect();
        ids.sort();
        for id in ids {
            let flow = self.pending_flows[&id];
            if flow != 0.0 {
                if let Some(market) = self.markets.get_mut(&id) {
                    market.apply_flow(flow, rng);
                }
            }
            self.pending_flows.insert(id, 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_zero_when_unmoved() {
        let m = Market::new("BANK_INDEX", "Bank Index", 100.0);
        assert_eq!(m.get_return(), 0.0);
    }

    #[test]
    fn test_price_floor_never_breached() {
        let mut m = Market::new("BANK_INDEX", "Bank Index", 1.5);
        let mut rng = RngManager::new(1);
        for _ in 0..500 {
            m.apply_flow(-1000.0, &mut rng);
            assert!(m.price >= PRICE_FLOOR);
        }
    }

    #[test]
    fn test_apply_flow_updates_total_invested_and_history() {
        let mut m = Market::new("BANK_INDEX", "Bank Index", 100.0);
        let mut rng = RngManager::new(7);
        m.apply_flow(50.0, &mut rng);
        assert_eq!(m.total_invested, 50.0);
        assert_eq!(m.price_history.len(), 2);
        assert_eq!(m.flow_history.len(), 1);
    }

    #[test]
    fn test_momentum_requires_three_points() {
        let mut m = Market::new("BANK_INDEX", "Bank Index", 100.0);
        assert_eq!(m.momentum(), 0.0);
        let mut rng = RngManager::new(1);
        m.apply_flow(0.0, &mut rng);
        assert_eq!(m.momentum(), 0.0);
        m.apply_flow(0.0, &mut rng);
        // now 3 points exist
        assert_eq!(m.price_history.len(), 3);
    }

    #[test]
    fn test_market_system_record_and_apply() {
        let mut system = MarketSystem::new();
        system.add_market(Market::new("BANK_INDEX", "Bank Index", 100.0));
        system.record_flow(&"BANK_INDEX".to_string(), 10.0);
        system.record_flow(&"BANK_INDEX".to_string(), 5.0);
        system.record_flow(&"UNKNOWN".to_string(), 999.0); // no-op

        let mut rng = RngManager::new(3);
        system.apply_all_flows(&mut rng);
        let market = system.get(&"BANK_INDEX".to_string()).unwrap();
        assert_eq!(market.total_invested, 15.0);

        // accumulator reset after apply
        system.record_flow(&"BANK_INDEX".to_string(), 0.0);
        let mut rng = RngManager::new(3);
        system.apply_all_flows(&mut rng);
        let market = system.get(&"BANK_INDEX".to_string()).unwrap();
        assert_eq!(market.total_invested, 15.0);
    }
}
