//! The stand-alone risk predictor: not wired into the kernel's per-step
//! path, exposed for out-of-band exposure scoring.

use systemic_risk_sim_core::risk::{predict, Recommendation, RiskFeatures, RiskLevel};

fn healthy() -> RiskFeatures {
    RiskFeatures {
        capital_ratio: 0.30,
        leverage: 1.5,
        liquidity_ratio: 0.50,
        equity: 100.0,
        past_defaults: 0,
        risk_appetite: 0.3,
        market_volatility: 0.1,
        lender_strength: 0.8,
        network_centrality: 0.2,
        degree: 2,
        upstream_burden: 0.1,
        exposure_amount: 0.0,
    }
}

fn distressed() -> RiskFeatures {
    RiskFeatures {
        capital_ratio: 0.03,
        leverage: 8.0,
        liquidity_ratio: 0.03,
        equity: 2.0,
        past_defaults: 2,
        risk_appetite: 0.9,
        market_volatility: 0.7,
        lender_strength: 0.1,
        network_centrality: 0.8,
        degree: 9,
        upstream_burden: 0.8,
        exposure_amount: 0.0,
    }
}

#[test]
fn default_probability_is_always_within_the_spec_bounds() {
    for f in [healthy(), distressed()] {
        let p = predict(&f).default_probability;
        assert!((0.02..=0.95).contains(&p));
    }
}

#[test]
fn healthy_bank_classifies_very_low_or_low_with_extend_credit() {
    let prediction = predict(&healthy());
    assert!(prediction.default_probability < 0.30);
    assert!(matches!(prediction.risk_level, RiskLevel::VeryLow | RiskLevel::Low));
}

#[test]
fn distressed_bank_classifies_very_high_with_reject() {
    let prediction = predict(&distressed());
    assert!(prediction.default_probability >= 0.70);
    assert_eq!(prediction.risk_level, RiskLevel::VeryHigh);
    assert_eq!(prediction.recommendation, Recommendation::Reject);
    assert!(!prediction.reasons.is_empty());
}

#[test]
fn distressed_profile_ranks_strictly_above_healthy() {
    assert!(predict(&distressed()).default_probability > predict(&healthy()).default_probability);
}

#[test]
fn exposure_amount_of_zero_falls_back_to_ten_percent_of_equity() {
    let mut f = healthy();
    f.exposure_amount = 0.0;
    f.equity = 50.0;
    let prediction = predict(&f);
    assert!((prediction.expected_loss - prediction.default_probability * 5.0).abs() < 1e-9);
}

#[test]
fn explicit_exposure_amount_overrides_the_equity_fallback() {
    let mut f = healthy();
    f.exposure_amount = 40.0;
    let prediction = predict(&f);
    assert!((prediction.expected_loss - prediction.default_probability * 40.0).abs() < 1e-9);
}

#[test]
fn high_network_centrality_amplifies_systemic_impact() {
    let mut peripheral = healthy();
    peripheral.network_centrality = 0.1;
    let mut central = healthy();
    central.network_centrality = 0.9;

    let p1 = predict(&peripheral);
    let p2 = predict(&central);
    assert!(p2.systemic_impact > p1.systemic_impact);
    assert!(p2.reasons.iter().any(|r| r.contains("highly connected")));
}

#[test]
fn repeat_defaulters_score_higher_than_clean_record_otherwise_identical() {
    let mut clean = healthy();
    clean.past_defaults = 0;
    let mut repeat = healthy();
    repeat.past_defaults = 3;

    let p1 = predict(&clean);
    let p2 = predict(&repeat);
    assert!(p2.default_probability > p1.default_probability);
    assert!(p2.reasons.iter().any(|r| r.contains("past default")));
}

#[test]
fn recommendation_reject_only_above_the_high_risk_or_systemic_threshold() {
    // A mid-risk profile (neither above 0.7 risk nor 0.7 systemic impact)
    // must not be rejected outright.
    let mut mid = healthy();
    mid.capital_ratio = 0.12;
    mid.leverage = 4.0;
    mid.liquidity_ratio = 0.15;
    mid.equity = 20.0;
    let prediction = predict(&mid);
    if prediction.default_probability <= 0.7 && prediction.systemic_impact <= 0.7 {
        assert_ne!(prediction.recommendation, Recommendation::Reject);
    }
}
