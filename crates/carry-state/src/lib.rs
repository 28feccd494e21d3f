//! Durable transaction state journal and state machine.
//!
//! Makes individual venue operations crash-recoverable:
//! - `TxState` / `TransactionRecord`: the per-intent progression model
//! - `StateStore`: keyed durable persistence (`JournalStore` on disk,
//!   `MemoryStore` for tests)
//! - `TransactionStateMachine`: legal-transition enforcement plus the
//!   `recover_incomplete` crash-recovery contract

pub mod error;
pub mod machine;
pub mod record;
pub mod store;

pub use error::{StateError, StateResult};
pub use machine::TransactionStateMachine;
pub use record::{TransactionRecord, TransitionCtx, TxState};
pub use store::{JournalConfig, JournalStore, MemoryStore, StateStore};
