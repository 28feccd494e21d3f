//! Prometheus metrics and structured logging for the carry bot.
//!
//! Provides observability:
//! - Prometheus metrics for the position lifecycle, risk levels, and the
//!   transaction state machine
//! - Structured JSON logging with tracing
//! - Per-asset session statistics output

pub mod error;
pub mod logging;
pub mod metrics;
pub mod session_stats;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
pub use session_stats::{AssetSessionStats, SessionStatsReporter};
