//! Combined-position lifecycle engine.
//!
//! Drives the full life of a delta-neutral pair (leveraged lending long,
//! perp short) as a compensated saga:
//! - [`preflight`]: the six entry checks gating every open
//! - [`manager`]: open/close sagas, rebalancing, the position registry
//! - [`delta`]: delta decomposition with LST-appreciation awareness
//! - `intent` (private): staged long-venue transaction execution over the journal
//! - [`reconciler`]: background repair of interrupted work
//!
//! Leg ordering is the crate's core safety property: opens place the
//! long before the short exists and compensate it if the hedge fails;
//! closes remove the short first. Either way the book is never net
//! short the asset.

pub mod delta;
pub mod error;
mod intent;
pub mod manager;
pub mod preflight;
pub mod reconciler;

pub use delta::{compute_delta, DeltaInfo};
pub use error::{PositionError, PositionResult, SagaStage};
pub use manager::{
    ManagerConfig, ManagerDeps, PositionManager, RebalanceResult, RebalanceSkip,
};
pub use preflight::{PreflightConfig, PreflightReport};
pub use reconciler::Reconciler;
