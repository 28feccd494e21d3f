//! Transaction state machine: legal-transition enforcement over the
//! durable store.
//!
//! The machine is the only writer of transaction records in normal
//! operation. Each intent is driven by a single task at a time (the
//! manager serializes per position), so check-then-persist here does not
//! need its own per-intent lock.

use crate::error::{StateError, StateResult};
use crate::record::{TransactionRecord, TransitionCtx, TxState};
use crate::store::StateStore;
use carry_core::IntentId;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Crash-recoverable progression tracking for venue-side operations.
pub struct TransactionStateMachine {
    store: Arc<dyn StateStore>,
}

impl TransactionStateMachine {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Move an intent to `target`, persisting the new record before
    /// returning it.
    ///
    /// An absent record implies the virtual state `Idle`: the first
    /// transition of a fresh intent must be to `Building`, anything else
    /// is `NewTransactionMustBuild`. A move outside the current state's
    /// successor set is `InvalidTransition`; sequencing bugs upstream
    /// are surfaced, never silently corrected.
    ///
    /// `signature`/`metadata` not provided in `ctx` are carried forward
    /// from the previous record so a confirm transition keeps the
    /// signature captured at submit.
    pub fn transition(
        &self,
        intent_id: &IntentId,
        target: TxState,
        ctx: TransitionCtx,
    ) -> StateResult<TransactionRecord> {
        let previous = self.store.state(intent_id)?;

        match &previous {
            None => {
                if target != TxState::Building {
                    return Err(StateError::NewTransactionMustBuild {
                        intent_id: intent_id.to_string(),
                        target,
                    });
                }
            }
            Some(record) => {
                if !record.state.can_transition_to(target) {
                    return Err(StateError::InvalidTransition {
                        intent_id: intent_id.to_string(),
                        from: record.state,
                        to: target,
                    });
                }
            }
        }

        let record = TransactionRecord {
            intent_id: intent_id.clone(),
            state: target,
            timestamp: Utc::now(),
            signature: ctx
                .signature
                .or_else(|| previous.as_ref().and_then(|p| p.signature.clone())),
            metadata: ctx
                .metadata
                .or_else(|| previous.as_ref().and_then(|p| p.metadata.clone())),
            error: ctx.error,
        };

        self.store.save_state(&record)?;

        let from = previous.map(|p| p.state).unwrap_or(TxState::Idle);
        if target == TxState::Failed {
            warn!(
                intent = %intent_id,
                %from,
                error = record.error.as_deref().unwrap_or("unknown"),
                "Transaction failed"
            );
        } else {
            debug!(intent = %intent_id, %from, to = %target, "Transaction transition");
        }

        Ok(record)
    }

    /// Latest persisted record for the intent.
    pub fn state(&self, intent_id: &IntentId) -> StateResult<Option<TransactionRecord>> {
        self.store.state(intent_id)
    }

    /// All intents whose last-saved state is not terminal. Called once at
    /// process start so the caller can re-poll, resolve, or fail each.
    pub fn recover_incomplete(&self) -> StateResult<Vec<TransactionRecord>> {
        self.store.incomplete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn machine() -> TransactionStateMachine {
        TransactionStateMachine::new(Arc::new(MemoryStore::new()))
    }

    const HAPPY_PATH: [TxState; 7] = [
        TxState::Building,
        TxState::Built,
        TxState::Signing,
        TxState::Signed,
        TxState::Submitting,
        TxState::Submitted,
        TxState::Confirmed,
    ];

    #[test]
    fn test_full_happy_path() {
        let machine = machine();
        let intent = IntentId::generate("open_long");

        for state in HAPPY_PATH {
            let record = machine
                .transition(&intent, state, TransitionCtx::default())
                .unwrap();
            assert_eq!(record.state, state);
        }

        let last = machine.state(&intent).unwrap().unwrap();
        assert_eq!(last.state, TxState::Confirmed);
    }

    #[test]
    fn test_new_transaction_must_build() {
        let machine = machine();
        let intent = IntentId::generate("open_long");

        let err = machine
            .transition(&intent, TxState::Signed, TransitionCtx::default())
            .unwrap_err();
        assert!(matches!(err, StateError::NewTransactionMustBuild { .. }));

        // Even Failed is refused before the first Building.
        let err = machine
            .transition(&intent, TxState::Failed, TransitionCtx::default())
            .unwrap_err();
        assert!(matches!(err, StateError::NewTransactionMustBuild { .. }));
    }

    #[test]
    fn test_invalid_transition_reports_states() {
        let machine = machine();
        let intent = IntentId::generate("open_long");
        machine
            .transition(&intent, TxState::Building, TransitionCtx::default())
            .unwrap();

        let err = machine
            .transition(&intent, TxState::Submitted, TransitionCtx::default())
            .unwrap_err();
        match err {
            StateError::InvalidTransition { from, to, .. } => {
                assert_eq!(from, TxState::Building);
                assert_eq!(to, TxState::Submitted);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_failed_from_every_non_terminal_progress_state() {
        for failure_point in 0..HAPPY_PATH.len() - 1 {
            let machine = machine();
            let intent = IntentId::generate("open_long");
            for state in &HAPPY_PATH[..=failure_point] {
                machine
                    .transition(&intent, *state, TransitionCtx::default())
                    .unwrap();
            }
            let record = machine
                .transition(
                    &intent,
                    TxState::Failed,
                    TransitionCtx::default().with_error("venue timeout"),
                )
                .unwrap();
            assert_eq!(record.state, TxState::Failed);
            assert_eq!(record.error.as_deref(), Some("venue timeout"));
        }
    }

    #[test]
    fn test_terminal_states_refuse_everything() {
        for terminal in [TxState::Confirmed, TxState::Failed] {
            let machine = machine();
            let intent = IntentId::generate("open_long");
            machine
                .transition(&intent, TxState::Building, TransitionCtx::default())
                .unwrap();
            if terminal == TxState::Confirmed {
                for state in &HAPPY_PATH[1..] {
                    machine
                        .transition(&intent, *state, TransitionCtx::default())
                        .unwrap();
                }
            } else {
                machine
                    .transition(&intent, TxState::Failed, TransitionCtx::default())
                    .unwrap();
            }

            for target in TxState::ALL {
                assert!(
                    machine
                        .transition(&intent, target, TransitionCtx::default())
                        .is_err(),
                    "{terminal} -> {target} must be refused"
                );
            }
        }
    }

    #[test]
    fn test_signature_carried_forward() {
        let machine = machine();
        let intent = IntentId::generate("open_long");

        for state in &HAPPY_PATH[..5] {
            machine
                .transition(&intent, *state, TransitionCtx::default())
                .unwrap();
        }
        machine
            .transition(
                &intent,
                TxState::Submitted,
                TransitionCtx::default().with_signature("3xyz"),
            )
            .unwrap();

        // Confirm without re-supplying the signature.
        let record = machine
            .transition(&intent, TxState::Confirmed, TransitionCtx::default())
            .unwrap();
        assert_eq!(record.signature.as_deref(), Some("3xyz"));
    }

    #[test]
    fn test_get_state_idempotent() {
        let machine = machine();
        let intent = IntentId::generate("open_long");
        machine
            .transition(&intent, TxState::Building, TransitionCtx::default())
            .unwrap();

        let first = machine.state(&intent).unwrap().unwrap();
        let second = machine.state(&intent).unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_recover_incomplete_exact_set() {
        let machine = machine();

        let confirmed = IntentId::generate("open_long");
        let failed = IntentId::generate("open_long");
        let submitted = IntentId::generate("close_long");
        let building = IntentId::generate("open_long");

        for state in HAPPY_PATH {
            machine
                .transition(&confirmed, state, TransitionCtx::default())
                .unwrap();
        }
        machine
            .transition(&failed, TxState::Building, TransitionCtx::default())
            .unwrap();
        machine
            .transition(&failed, TxState::Failed, TransitionCtx::default())
            .unwrap();
        for state in &HAPPY_PATH[..6] {
            machine
                .transition(&submitted, *state, TransitionCtx::default())
                .unwrap();
        }
        machine
            .transition(&building, TxState::Building, TransitionCtx::default())
            .unwrap();

        let incomplete = machine.recover_incomplete().unwrap();
        let ids: Vec<&IntentId> = incomplete.iter().map(|r| &r.intent_id).collect();
        assert_eq!(incomplete.len(), 2);
        assert!(ids.contains(&&submitted));
        assert!(ids.contains(&&building));
    }
}
