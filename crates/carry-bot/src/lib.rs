//! Delta-neutral funding-rate carry bot.
//!
//! Main application that orchestrates the position lifecycle:
//! - Scan cadence: candidate assembly, entry gate, preflight, open
//! - Monitor cadence: leg refresh, exit evaluation, rebalance
//! - Reconciliation: re-driving interrupted opens and closes
//! - Durable state: transaction journal + position snapshots on disk

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, BotDeps};
pub use config::{AppConfig, OperatingMode, WatchedAsset};
pub use error::{AppError, AppResult};
