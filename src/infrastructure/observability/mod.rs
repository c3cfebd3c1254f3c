//! Push-based observability.
//!
//! Outbound data only, no HTTP server, no incoming requests:
//!
//! 1. Structured JSON logs: periodic JSON output to stdout (Loki, Fluentd, CloudWatch)
//! 2. Prometheus registry: rendered on demand, scraped or pushed by the operator's choice

pub mod latency_tracker;
pub mod metrics;
pub mod reporter;

pub use latency_tracker::LatencyGuard;
pub use metrics::Metrics;
pub use reporter::MetricsReporter;
