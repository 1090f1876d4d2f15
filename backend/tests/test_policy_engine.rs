//! Policy decisions: the heuristic rule ladder and the game-theoretic
//! Nash best-response branch, exercised through the public `decide` API.

use systemic_risk_sim_core::models::{BankAction, BankId, Observation, StrategicPriority};
use systemic_risk_sim_core::policy::PolicyEngine;
use systemic_risk_sim_core::RngManager;

fn obs(overrides: impl FnOnce(&mut Observation)) -> Observation {
    let mut o = Observation {
        bank_id: BankId::new(0),
        equity: 100.0,
        cash: 100.0,
        leverage: 1.5,
        liquidity_ratio: 0.5,
        market_exposure: 0.1,
        capital_ratio: 0.3,
        leverage_gap: 0.0,
        liquidity_gap: 0.0,
        exposure_gap: 0.0,
        local_stress: 0.0,
        risk_appetite: 0.5,
        investments: 10.0,
        loans_given: 10.0,
        borrowed: 0.0,
        has_markets: true,
        best_market_return: 0.0,
        best_market_position: 10.0,
        total_invested: 10.0,
    };
    overrides(&mut o);
    o
}

#[test]
fn heuristic_emergency_guard_deleverages_when_capital_is_thin() {
    let engine = PolicyEngine::new(false);
    let o = obs(|o| {
        o.cash = 5.0;
        o.equity = 2.0;
        o.best_market_position = 0.0;
        o.loans_given = 20.0;
    });
    let mut rng = RngManager::new(1);
    let (action, reason) = engine.decide(&o, None, 0.0, &mut rng);
    assert_eq!(action, BankAction::DecreaseLending);
    assert!(reason.contains("Emergency"));
}

#[test]
fn heuristic_with_no_lending_or_markets_falls_back_to_hoard() {
    let engine = PolicyEngine::new(false);
    let o = obs(|o| {
        o.cash = 5.0;
        o.equity = 2.0;
        o.best_market_position = 0.0;
        o.loans_given = 0.0;
        o.has_markets = false;
    });
    let mut rng = RngManager::new(1);
    let (action, _) = engine.decide(&o, None, 0.0, &mut rng);
    assert_eq!(action, BankAction::HoardCash);
}

#[test]
fn heuristic_severe_stress_guard_de_risks_even_with_ample_cash() {
    let engine = PolicyEngine::new(false);
    let o = obs(|o| {
        o.cash = 80.0;
        o.equity = 80.0;
        o.local_stress = 0.6;
        o.liquidity_ratio = 0.1;
        o.best_market_position = 5.0;
    });
    let mut rng = RngManager::new(3);
    let (action, reason) = engine.decide(&o, None, 0.0, &mut rng);
    assert_eq!(action, BankAction::DivestMarket);
    assert!(reason.contains("Severe stress"));
}

#[test]
fn heuristic_hoards_when_no_productive_deployment_exists() {
    let engine = PolicyEngine::new(false);
    let o = obs(|o| {
        o.cash = 10.0; // below the 15.0 deployment threshold
        o.equity = 50.0;
        o.best_market_position = 0.0;
        o.loans_given = 0.0;
    });
    let mut rng = RngManager::new(4);
    let (action, reason) = engine.decide(&o, None, 0.0, &mut rng);
    assert_eq!(action, BankAction::HoardCash);
    assert!(reason.contains("No productive deployment"));
}

#[test]
fn profit_taking_urge_preempts_both_branches_on_a_strong_realized_return() {
    let heuristic = PolicyEngine::new(false);
    let game_theoretic = PolicyEngine::new(true);
    let o = obs(|o| {
        o.total_invested = 50.0;
        o.best_market_return = 0.5;
        o.risk_appetite = 0.2; // conservative: pushes probability further up
        o.local_stress = 0.3;
    });

    // Drawing the profit-taking Bernoulli is itself probabilistic;
    // sweep a handful of seeds and require at least one hit per branch
    // to confirm the prologue actually fires rather than being dead code.
    let hit = |engine: &PolicyEngine| {
        (0..20).any(|seed| {
            let mut rng = RngManager::new(seed);
            let (action, reason) = engine.decide(&o, None, 0.0, &mut rng);
            action == BankAction::DivestMarket && reason.contains("Profit-taking")
        })
    };
    assert!(hit(&heuristic));
    assert!(hit(&game_theoretic));
}

#[test]
fn profit_taking_urge_never_fires_below_the_return_threshold() {
    let engine = PolicyEngine::new(false);
    let o = obs(|o| {
        o.total_invested = 50.0;
        o.best_market_return = 0.01; // below the 0.03 heuristic threshold
    });
    for seed in 0..20 {
        let mut rng = RngManager::new(seed);
        let (action, _) = engine.decide(&o, None, 0.0, &mut rng);
        assert_ne!(action, BankAction::DivestMarket);
    }
}

#[test]
fn game_theoretic_branch_hoards_when_liquidity_is_too_thin_to_lend() {
    let engine = PolicyEngine::new(true);
    let o = obs(|o| {
        o.cash = 10.0;
        o.liquidity_ratio = 0.05;
        o.best_market_position = 0.0;
        o.loans_given = 0.0;
    });
    let mut rng = RngManager::new(1);
    let (action, _) = engine.decide(&o, None, 0.0, &mut rng);
    // Best response of LEND under thin liquidity routes to HOARD_CASH
    // per the kernel-level liquidity guard; best response of HOARD with
    // no position and no loans also routes to HOARD_CASH.
    assert_eq!(action, BankAction::HoardCash);
}

#[test]
fn distressed_market_state_raises_default_risk_and_discourages_lending() {
    let engine = PolicyEngine::new(true);
    let stable = obs(|o| {
        o.local_stress = 0.0;
        o.cash = 50.0;
        o.liquidity_ratio = 0.6;
    });
    let distressed = obs(|o| {
        o.local_stress = 0.9;
        o.cash = 50.0;
        o.liquidity_ratio = 0.6;
    });

    let lend_rate = |observation: &Observation| {
        let lends = (0..50)
            .filter(|&seed| {
                let mut rng = RngManager::new(seed);
                let (action, _) = engine.decide(observation, None, 0.9, &mut rng);
                matches!(action, BankAction::IncreaseLending | BankAction::InvestMarket)
            })
            .count();
        lends as f64 / 50.0
    };

    // A distressed network (high network_default_rate + local_stress)
    // must not lend strictly more often than a stable one.
    assert!(lend_rate(&distressed) <= lend_rate(&stable) + 1e-9);
}

#[test]
fn stability_priority_still_allows_nonzero_investment_probability() {
    // Stability priority scales the productive-deployment branch down
    // but must never zero it out entirely.
    let engine = PolicyEngine::new(false);
    let o = obs(|o| {
        o.cash = 80.0;
        o.equity = 80.0;
        o.market_exposure = 0.1;
        o.risk_appetite = 0.9;
    });
    let invested = (0..200).any(|seed| {
        let mut rng = RngManager::new(seed);
        let (action, _) = engine.decide(&o, Some(StrategicPriority::Stability), 0.0, &mut rng);
        action == BankAction::InvestMarket
    });
    assert!(invested);
}
