//! Venue collaborator contracts and implementations.
//!
//! The lifecycle engine talks to its venues only through the narrow traits
//! in [`traits`]: a staged long-venue client, a perp short-venue client,
//! a price-consensus probe, chain health/balance probes, and the position
//! persistence sink. [`sim`] provides in-memory implementations used in
//! paper mode; [`store`] provides the durable JSONL position store.

pub mod error;
pub mod sim;
pub mod store;
pub mod traits;
pub mod types;

pub use error::{VenueError, VenueResult};
pub use sim::{
    new_call_log, CallLog, SimChainClient, SimConsensus, SimFailure, SimLongVenue, SimPriceBoard,
    SimShortVenue,
};
pub use store::{JsonlPositionStore, MemoryPositionStore};
pub use traits::{ChainClient, LongVenueClient, PositionStore, PriceConsensus, ShortVenueClient};
pub use types::{
    ActionRecord, Consensus, LongOpenRequest, LongPositionState, LongTxKind, ShortFill,
    ShortPositionState, SignedTx, TxPayload, TxReceipt, TxSignature,
};
