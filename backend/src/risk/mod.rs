//! Risk scoring: a stateless default-probability model over
//! counterparty, network, and market features.
//!
//! Not called anywhere in [`crate::orchestrator::Kernel::step`] — this
//! is a collaborator-facing function a caller can invoke out-of-band
//! to score a prospective exposure (e.g. before approving a loan).
//! Grounded in the weighted-component scorer used for the original
//! heuristic risk model (financial health, network position, behavior
//! pattern, market conditions, exposure concentration), squashed
//! through a logistic curve per the distilled formula.

use serde::{Deserialize, Serialize};

/// Inputs to [`predict`]. All ratio-like fields are expected in
/// `[0.0, 1.0]`; `equity` and `exposure_amount` are in the same money
/// unit as the rest of the crate (millions).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskFeatures {
    pub capital_ratio: f64,
    pub leverage: f64,
    pub liquidity_ratio: f64,
    pub equity: f64,
    pub past_defaults: u32,
    pub risk_appetite: f64,
    pub market_volatility: f64,
    /// Financial strength of the lender/counterparty on the other side
    /// of the exposure being scored, `0.0` (weak) to `1.0` (strong).
    pub lender_strength: f64,
    /// Network centrality of the borrower, `0.0` (peripheral) to `1.0`
    /// (highly connected).
    pub network_centrality: f64,
    /// Number of direct interbank counterparties, used only to
    /// amplify cascade risk.
    pub degree: u32,
    /// Fraction of the borrower's liabilities owed to already-stressed
    /// upstream counterparties.
    pub upstream_burden: f64,
    /// Dollar size of the specific exposure being scored. `0.0` falls
    /// back to `10%` of `equity` for `expected_loss`.
    pub exposure_amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    ExtendCredit,
    Hold,
    ReduceExposure,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskPrediction {
    pub default_probability: f64,
    pub expected_loss: f64,
    pub systemic_impact: f64,
    pub cascade_risk: f64,
    pub risk_level: RiskLevel,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

/// Logistic midpoint and steepness calibrated so a healthy profile
/// (low leverage, ample capital and liquidity, no past defaults)
/// scores near `0.10-0.15` and a distressed one (thin capital, high
/// leverage, illiquid, repeat defaulter) scores near `0.75-0.90`.
const LOGISTIC_MIDPOINT: f64 = 0.45;
const LOGISTIC_STEEPNESS: f64 = 6.0;
const PROB_FLOOR: f64 = 0.02;
const PROB_CEIL: f64 = 0.95;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Score a prospective counterparty exposure.
///
/// `reasons` lists every component that pushed the score into a less
/// favourable bucket, for display to a human reviewer.
pub fn predict(features: &RiskFeatures) -> RiskPrediction {
    let mut reasons = Vec::new();

    let capital_component = clamp01(1.0 - features.capital_ratio / 0.15);
    let leverage_component = clamp01(features.leverage / 10.0);
    let liquidity_component = clamp01(1.0 - features.liquidity_ratio / 0.3);
    let equity_component = clamp01(1.0 - features.equity / 50.0);
    let financial_health = (capital_component + leverage_component + liquidity_component + equity_component) / 4.0;
    if financial_health > 0.5 {
        reasons.push("weak capital, leverage, liquidity, or equity position".to_string());
    }

    let lender_component = clamp01(1.0 - features.lender_strength);
    let centrality_component = clamp01(features.network_centrality);
    let network_position = (lender_component + centrality_component) / 2.0;
    if centrality_component > 0.5 {
        reasons.push("highly connected node: a default here would propagate widely".to_string());
    }

    let default_component = clamp01(features.past_defaults as f64 / 3.0);
    let appetite_component = clamp01(features.risk_appetite);
    let behavior_pattern = (default_component + appetite_component) / 2.0;
    if features.past_defaults > 0 {
        reasons.push(format!("{} past default(s) on record", features.past_defaults));
    }

    let market_conditions = clamp01(features.market_volatility);
    if market_conditions > 0.5 {
        reasons.push("elevated market volatility".to_string());
    }

    let exposure_concentration = clamp01(features.upstream_burden);
    if exposure_concentration > 0.5 {
        reasons.push("concentrated upstream exposure to already-stressed counterparties".to_string());
    }

    let composite = 0.35 * financial_health + 0.25 * network_position + 0.20 * behavior_pattern
        + 0.15 * market_conditions
        + 0.05 * exposure_concentration;

    let raw = sigmoid(LOGISTIC_STEEPNESS * (composite - LOGISTIC_MIDPOINT));
    let default_probability = (PROB_FLOOR + (PROB_CEIL - PROB_FLOOR) * raw).clamp(PROB_FLOOR, PROB_CEIL);

    let exposure_base = if features.exposure_amount > 0.0 {
        features.exposure_amount
    } else {
        features.equity * 0.1
    };
    let expected_loss = default_probability * exposure_base;

    let systemic_impact = default_probability * (0.5 + 0.5 * centrality_component);

    let network_amplification = 1.0 + centrality_component * 0.5 + (features.degree as f64 / 10.0).min(0.5);
    let cascade_risk = (default_probability * network_amplification).min(1.0);

    let risk_level = classify_risk_level(default_probability);
    let recommendation = generate_recommendation(default_probability, systemic_impact, cascade_risk);

    if reasons.is_empty() {
        reasons.push("no elevated risk factors detected".to_string());
    }

    RiskPrediction {
        default_probability,
        expected_loss,
        systemic_impact,
        cascade_risk,
        risk_level,
        recommendation,
        confidence: 0.75,
        reasons,
    }
}

fn classify_risk_level(default_probability: f64) -> RiskLevel {
    if default_probability < 0.15 {
        RiskLevel::VeryLow
    } else if default_probability < 0.30 {
        RiskLevel::Low
    } else if default_probability < 0.50 {
        RiskLevel::Medium
    } else if default_probability < 0.70 {
        RiskLevel::High
    } else {
        RiskLevel::VeryHigh
    }
}

fn generate_recommendation(risk_score: f64, systemic_impact: f64, cascade_risk: f64) -> Recommendation {
    if risk_score > 0.7 || systemic_impact > 0.7 {
        Recommendation::Reject
    } else if risk_score > 0.5 || cascade_risk > 0.6 {
        Recommendation::ReduceExposure
    } else if risk_score > 0.3 {
        Recommendation::Hold
    } else if risk_score < 0.2 {
        Recommendation::ExtendCredit
    } else {
        Recommendation::Hold
    }
}
