//! C8: fuses rule triggers, the advisor, and indicator-derived signals into
//! a `Decision`. Sentinel and Institutional modes take disjoint paths
//! (§4.7); the synthesizer itself never issues orders.

use crate::application::intraday_scoring::score_signal;
use crate::domain::candle::Candle;
use crate::domain::classifier::ClassifierPrediction;
use crate::domain::indicators::{IndicatorState, Trend};
use crate::domain::ports::{Advisor, AdvisorAction};
use crate::domain::regime::RegimeState;
use crate::domain::rules::{OrderAction, Rule, TriggeredRule, evaluate_rules};
use crate::domain::sentiment::Sentiment;
use crate::domain::signal::{Action, Decision, DecisionInputs, Direction, Provenance, Signal, SignalKind};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

const CACHE_TTL_SECS: i64 = 60;
const COOLDOWN_MINUTES: i64 = 30;

struct AdvisorCacheEntry {
    decision: Decision,
    fetched_at: DateTime<Utc>,
}

struct AdvisorGateState {
    daily_count: u32,
    day: NaiveDate,
    cooldown_until: Option<DateTime<Utc>>,
    cache: HashMap<String, AdvisorCacheEntry>,
}

/// Rate-limits and caches advisor calls: at most `max_calls_per_day`,
/// 60s per-symbol cache, and a cooldown after a quota breach during which
/// the heuristic fallback is used without calling the advisor.
pub struct AdvisorGate {
    advisor: Arc<dyn Advisor>,
    max_calls_per_day: u32,
    state: Mutex<AdvisorGateState>,
}

impl AdvisorGate {
    pub fn new(advisor: Arc<dyn Advisor>, max_calls_per_day: u32) -> Self {
        Self {
            advisor,
            max_calls_per_day,
            state: Mutex::new(AdvisorGateState {
                daily_count: 0,
                day: Utc::now().date_naive(),
                cooldown_until: None,
                cache: HashMap::new(),
            }),
        }
    }

    async fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.lock().await;
        state.cooldown_until.map(|until| now < until).unwrap_or(false)
    }

    async fn cached(&self, symbol: &str, now: DateTime<Utc>) -> Option<Decision> {
        let state = self.state.lock().await;
        state.cache.get(symbol).and_then(|entry| {
            if (now - entry.fetched_at).num_seconds() < CACHE_TTL_SECS {
                Some(entry.decision.clone())
            } else {
                None
            }
        })
    }

    async fn record(&self, symbol: &str, decision: Decision, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if state.day != now.date_naive() {
            state.day = now.date_naive();
            state.daily_count = 0;
        }
        state.daily_count += 1;
        state.cache.insert(symbol.to_string(), AdvisorCacheEntry { decision, fetched_at: now });
    }

    async fn enter_cooldown(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        state.cooldown_until = Some(now + chrono::Duration::minutes(COOLDOWN_MINUTES));
    }

    async fn quota_available(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock().await;
        if state.day != now.date_naive() {
            state.day = now.date_naive();
            state.daily_count = 0;
        }
        state.daily_count < self.max_calls_per_day
    }
}

fn heuristic_fallback(state: &IndicatorState, inputs: DecisionInputs, provenance: Provenance) -> Decision {
    let rsi = state.rsi.to_string().parse::<f64>().unwrap_or(50.0);
    let (action, confidence) = match state.trend {
        Trend::Bullish if rsi > 30.0 && rsi < 70.0 => (Action::Buy, 60.0),
        Trend::Bearish if rsi > 30.0 && rsi < 70.0 => (Action::Sell, 60.0),
        _ if rsi > 75.0 => (Action::Sell, 65.0),
        _ if rsi < 25.0 => (Action::Buy, 65.0),
        _ => (Action::Wait, 30.0),
    };
    Decision {
        action,
        confidence,
        reason: "heuristic fallback".to_string(),
        provenance,
        inputs,
    }
}

fn decision_inputs(
    state: &IndicatorState,
    classifier: Option<ClassifierPrediction>,
    sentiment: Option<Sentiment>,
    triggered_rule: Option<String>,
) -> DecisionInputs {
    DecisionInputs {
        indicators_snapshot: serde_json::to_value(state).unwrap_or(serde_json::Value::Null),
        classifier,
        sentiment,
        triggered_rule,
    }
}

fn advisor_prompt(state: &IndicatorState, classifier: &Option<ClassifierPrediction>, sentiment: &Option<Sentiment>) -> String {
    format!(
        "indicators={:?} classifier={:?} sentiment={:?}",
        state, classifier, sentiment
    )
}

/// Sentinel path: a triggered rule is authoritative; otherwise the advisor
/// is consulted (subject to rate limit/cache/cooldown) with a heuristic
/// fallback on any transport, quota, or malformed-response failure.
pub async fn sentinel_decision(
    symbol: &str,
    state: &IndicatorState,
    rules: &[Rule],
    classifier: Option<ClassifierPrediction>,
    sentiment: Option<Sentiment>,
    gate: &AdvisorGate,
    now: DateTime<Utc>,
) -> Decision {
    let (triggered, _faulted) = evaluate_rules(rules, state);
    if let Some(TriggeredRule { name, action, .. }) = triggered.into_iter().next() {
        let inputs = decision_inputs(state, classifier, sentiment, Some(name.clone()));
        let action = match action {
            OrderAction::Buy => Action::Buy,
            OrderAction::Sell => Action::Sell,
        };
        return Decision {
            action,
            confidence: 85.0,
            reason: format!("rule:{}", name),
            provenance: Provenance::RuleTriggered,
            inputs,
        };
    }

    let inputs = decision_inputs(state, classifier.clone(), sentiment.clone(), None);

    if gate.in_cooldown(now).await {
        return heuristic_fallback(state, inputs, Provenance::AdvisorFallback);
    }

    if !gate.quota_available(now).await {
        gate.enter_cooldown(now).await;
        return heuristic_fallback(state, inputs, Provenance::AdvisorFallback);
    }

    if let Some(cached) = gate.cached(symbol, now).await {
        return cached;
    }

    let prompt = advisor_prompt(state, &classifier, &sentiment);
    let decision = match gate.advisor.advise(&prompt).await {
        Ok(response) => {
            let action = match response.decision {
                AdvisorAction::Buy => Action::Buy,
                AdvisorAction::Sell => Action::Sell,
                AdvisorAction::Wait => Action::Wait,
            };
            let confidence = (response.confidence as f64).clamp(0.0, 100.0);
            Decision {
                action,
                confidence,
                reason: response.reasoning,
                provenance: Provenance::AdvisorOk,
                inputs: inputs.clone(),
            }
        }
        Err(e) => {
            warn!("advisor call failed for {}: {}", symbol, e);
            let provenance = if e.downcast_ref::<crate::domain::errors::AdvisorError>().is_some_and(|err| matches!(err, crate::domain::errors::AdvisorError::Malformed { .. })) {
                Provenance::AdvisorError
            } else {
                Provenance::AdvisorFallback
            };
            heuristic_fallback(state, inputs.clone(), provenance)
        }
    };

    gate.record(symbol, decision.clone(), now).await;
    decision
}

/// Institutional path: score detectors, filter by regime, and set
/// confidence equal to strength. No advisor involvement.
pub fn institutional_decision(
    candles: &[Candle],
    state: &IndicatorState,
    bb_width_history: &[f64],
    ema21_history: &[f64],
    adx_history: &[f64],
    regime: &RegimeState,
) -> (Decision, Signal) {
    let mut signal = score_signal(candles, state, bb_width_history, ema21_history, adx_history);

    if !matches!(signal.kind, SignalKind::None) && !regime.allowed.contains(&signal.kind) {
        signal.strength = 0.0;
    }

    let inputs = decision_inputs(state, None, None, None);
    let action = if signal.strength <= 0.0 {
        Action::Wait
    } else {
        match signal.direction {
            Direction::Long => Action::Buy,
            Direction::Short => Action::Sell,
            Direction::Neutral => Action::Wait,
        }
    };

    let decision = Decision {
        action,
        confidence: signal.strength,
        reason: format!("{:?}", signal.kind),
        provenance: Provenance::SynthOnly,
        inputs,
    };
    (decision, signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::regime::Regime;
    use crate::domain::rules::RuleAction;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::collections::HashSet;

    fn base_state() -> IndicatorState {
        IndicatorState {
            price: dec!(100),
            rsi: dec!(50),
            ema9: dec!(100),
            ema20: dec!(100),
            ema50: dec!(100),
            atr: dec!(1),
            adx: dec!(20),
            di_plus: dec!(20),
            di_minus: dec!(15),
            bb_upper: dec!(105),
            bb_middle: dec!(100),
            bb_lower: dec!(95),
            bb_width: dec!(0.05),
            bb_percent_b: dec!(0.5),
            macd: dec!(0),
            macd_signal: dec!(0),
            macd_hist: dec!(0),
            volume_z_score: dec!(0),
            trend: Trend::Bullish,
            volume_spike: false,
        }
    }

    struct StubAdvisor;
    #[async_trait]
    impl Advisor for StubAdvisor {
        async fn advise(&self, _prompt: &str) -> anyhow::Result<crate::domain::ports::AdvisorResponse> {
            Err(anyhow::anyhow!("transport down"))
        }
    }

    fn gate() -> AdvisorGate {
        AdvisorGate::new(Arc::new(StubAdvisor), 100)
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[tokio::test]
    async fn triggered_rule_is_authoritative_over_advisor() {
        let state = base_state();
        let rules = vec![Rule {
            id: "r1".into(),
            name: "rsi_buy".into(),
            predicate: "rsi < 60".into(),
            action: RuleAction::Buy,
            active: true,
        }];
        let decision = sentinel_decision("cmt_btcusdt", &state, &rules, None, None, &gate(), now()).await;
        assert_eq!(decision.action, Action::Buy);
        assert_eq!(decision.provenance, Provenance::RuleTriggered);
        assert_eq!(decision.confidence, 85.0);
    }

    #[tokio::test]
    async fn advisor_transport_failure_falls_back_to_heuristic() {
        let state = base_state();
        let decision = sentinel_decision("cmt_btcusdt", &state, &[], None, None, &gate(), now()).await;
        assert_eq!(decision.action, Action::Buy);
        assert_eq!(decision.provenance, Provenance::AdvisorFallback);
    }

    struct MalformedAdvisor;
    #[async_trait]
    impl Advisor for MalformedAdvisor {
        async fn advise(&self, _prompt: &str) -> anyhow::Result<crate::domain::ports::AdvisorResponse> {
            Err(crate::domain::errors::AdvisorError::Malformed { reason: "unparseable body".into() }.into())
        }
    }

    #[tokio::test]
    async fn malformed_advisor_response_is_distinguished_from_fallback() {
        let g = AdvisorGate::new(Arc::new(MalformedAdvisor), 100);
        let state = base_state();
        let decision = sentinel_decision("cmt_btcusdt", &state, &[], None, None, &g, now()).await;
        assert_eq!(decision.provenance, Provenance::AdvisorError);
    }

    #[tokio::test]
    async fn quota_breach_triggers_cooldown_and_subsequent_fallback() {
        let g = AdvisorGate::new(Arc::new(StubAdvisor), 0);
        let state = base_state();
        let d1 = sentinel_decision("cmt_btcusdt", &state, &[], None, None, &g, now()).await;
        assert_eq!(d1.provenance, Provenance::AdvisorFallback);
        assert!(g.in_cooldown(now()).await);
    }

    #[test]
    fn institutional_path_zeroes_strength_when_regime_disallows() {
        let mut state = base_state();
        state.bb_upper = dec!(101);
        let candles = vec![
            Candle {
                open_time: 0,
                open: dec!(99),
                high: dec!(100),
                low: dec!(98),
                close: dec!(100),
                volume: dec!(100),
            },
            Candle {
                open_time: 1,
                open: dec!(100),
                high: dec!(104),
                low: dec!(99),
                close: dec!(103),
                volume: dec!(300),
            },
        ];
        state.volume_z_score = dec!(2.0);
        let regime = RegimeState {
            regime: Regime::Compressed,
            confidence: 1.0,
            allowed: HashSet::new(),
        };
        let (decision, signal) = institutional_decision(&candles, &state, &[0.1, 0.2], &[100.0, 101.0], &[15.0, 18.0, 22.0], &regime);
        assert_eq!(signal.strength, 0.0);
        assert_eq!(decision.action, Action::Wait);
    }
}
