//! Types produced by the signal pipeline (C6-C8): the raw trading `Signal`
//! scored off indicator state, and the `Decision` the synthesizer hands to a
//! mode loop. Neither type issues orders; they are pure data.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Breakout,
    TrendFollow,
    MeanRevert,
    LiquidationSnapback,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    pub kind: SignalKind,
    pub strength: f64,
    pub entry: rust_decimal::Decimal,
    pub stop_loss: rust_decimal::Decimal,
    pub take_profit: rust_decimal::Decimal,
    pub risk_reward: f64,
    pub factors: HashMap<String, f64>,
    pub meta: HashMap<String, serde_json::Value>,
}

impl Signal {
    pub fn flat() -> Self {
        Self {
            direction: Direction::Neutral,
            kind: SignalKind::None,
            strength: 0.0,
            entry: rust_decimal::Decimal::ZERO,
            stop_loss: rust_decimal::Decimal::ZERO,
            take_profit: rust_decimal::Decimal::ZERO,
            risk_reward: 0.0,
            factors: HashMap::new(),
            meta: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Buy,
    Sell,
    Wait,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    AdvisorOk,
    AdvisorFallback,
    AdvisorError,
    RuleTriggered,
    SynthOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionInputs {
    pub indicators_snapshot: serde_json::Value,
    pub classifier: Option<crate::domain::classifier::ClassifierPrediction>,
    pub sentiment: Option<crate::domain::sentiment::Sentiment>,
    pub triggered_rule: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub confidence: f64,
    pub reason: String,
    pub provenance: Provenance,
    pub inputs: DecisionInputs,
}

impl Decision {
    pub fn wait(reason: impl Into<String>, inputs: DecisionInputs) -> Self {
        Self {
            action: Action::Wait,
            confidence: 30.0,
            reason: reason.into(),
            provenance: Provenance::SynthOnly,
            inputs,
        }
    }
}
