use rust_decimal::Decimal;
use thiserror::Error;

/// Taxonomy from the error-handling design: component boundaries return typed
/// results, the outer loop logs and continues. None of these ever panics the
/// cycle that raised them.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("market data degraded for {symbol}: {reason}")]
    Degraded { symbol: String, reason: String },

    #[error("insufficient data: {have} bars, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("upstream request failed: {reason}")]
    RequestFailed { reason: String },
}

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("advisor transport error: {reason}")]
    Transport { reason: String },

    #[error("advisor daily quota exhausted, cooldown until {resumes_at}")]
    QuotaExceeded { resumes_at: chrono::DateTime<chrono::Utc> },

    #[error("advisor returned malformed response: {reason}")]
    Malformed { reason: String },
}

#[derive(Debug, Error)]
pub enum RiskViolation {
    #[error("daily loss limit breached: {loss_pct:.4} < -{limit_pct:.4}")]
    DailyLossLimit { loss_pct: Decimal, limit_pct: Decimal },

    #[error("max drawdown exceeded: {drawdown_pct:.4} > {limit_pct:.4}")]
    MaxDrawdown { drawdown_pct: Decimal, limit_pct: Decimal },

    #[error("correlation conflict: {symbol} shares group {group} with open position {conflicting}")]
    CorrelationConflict {
        symbol: String,
        group: String,
        conflicting: String,
    },

    #[error("max concurrent positions reached: {open}/{max}")]
    MaxConcurrentPositions { open: usize, max: usize },

    #[error("sizing produced zero quantity for {symbol}")]
    ZeroSize { symbol: String },

    #[error("exposure limit exceeded: {exposure_pct:.4} > {limit_pct:.4}")]
    ExposureLimit { exposure_pct: Decimal, limit_pct: Decimal },
}

#[derive(Debug, Error)]
pub enum SafetyViolation {
    #[error("[{check}] {message}")]
    Rejected { check: String, message: String },
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("exchange rejected order for {symbol}: {code} {msg}")]
    Rejected { symbol: String, code: String, msg: String },

    #[error("order execution failed after {attempts} attempts: {reason}")]
    ExhaustedRetries { attempts: u32, reason: String },
}

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("position not found: {symbol}")]
    PositionNotFound { symbol: String },

    #[error("store unavailable: {reason}")]
    StoreUnavailable { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn risk_violation_messages_include_values() {
        let v = RiskViolation::DailyLossLimit {
            loss_pct: dec!(-0.031),
            limit_pct: dec!(0.03),
        };
        let msg = v.to_string();
        assert!(msg.contains("0.031") || msg.contains("-0.031"));
    }

    #[test]
    fn safety_violation_formats_check_and_message() {
        let v = SafetyViolation::Rejected {
            check: "DailyLossLimit".into(),
            message: "breached".into(),
        };
        assert_eq!(v.to_string(), "[DailyLossLimit] breached");
    }
}
