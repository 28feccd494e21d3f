//! Staged execution of one long-venue transaction.
//!
//! Each stage is journaled through the state machine before and after its
//! network call, so a crash at any point leaves a record that recovery
//! can resolve without guessing. Nothing here retries; a failed stage
//! marks the intent `Failed` and returns.

use crate::error::{PositionError, PositionResult};
use carry_core::IntentId;
use carry_state::{TransactionStateMachine, TransitionCtx, TxState};
use carry_telemetry::Metrics;
use carry_venues::{LongOpenRequest, LongVenueClient, TxReceipt, VenueError};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// What to execute against the long venue.
pub(crate) enum LongTxRequest<'a> {
    Open(&'a LongOpenRequest),
    Close { position_handle: &'a str },
}

/// Drive one long-venue transaction through build, sign, submit and
/// confirm.
///
/// A confirm that outlives `confirm_timeout` or is interrupted by
/// `cancel` is treated as failed; if the transaction lands later, the
/// reconciliation sweep finds the `Failed` record with its signature and
/// resolves it. On any failure the intent is marked `Failed` before the
/// error is returned.
pub(crate) async fn execute_long_tx(
    machine: &TransactionStateMachine,
    client: &dyn LongVenueClient,
    intent_id: &IntentId,
    request: LongTxRequest<'_>,
    confirm_timeout: Duration,
    cancel: &CancellationToken,
) -> PositionResult<TxReceipt> {
    let result = drive(machine, client, intent_id, request, confirm_timeout, cancel).await;
    if let Err(e) = &result {
        let ctx = TransitionCtx::default().with_error(e.to_string());
        if let Err(journal_err) = machine.transition(intent_id, TxState::Failed, ctx) {
            error!(
                intent = %intent_id,
                error = %journal_err,
                "could not journal failed transaction"
            );
        }
        Metrics::tx_transition("failed");
    }
    result
}

async fn drive(
    machine: &TransactionStateMachine,
    client: &dyn LongVenueClient,
    intent_id: &IntentId,
    request: LongTxRequest<'_>,
    confirm_timeout: Duration,
    cancel: &CancellationToken,
) -> PositionResult<TxReceipt> {
    step(machine, intent_id, TxState::Building, TransitionCtx::default())?;
    let payload = match &request {
        LongTxRequest::Open(open) => client.build_open(open).await?,
        LongTxRequest::Close { position_handle } => client.build_close(position_handle).await?,
    };
    step(
        machine,
        intent_id,
        TxState::Built,
        TransitionCtx::default().with_metadata(json!({ "kind": payload.kind })),
    )?;

    step(machine, intent_id, TxState::Signing, TransitionCtx::default())?;
    let signed = client.sign(&payload).await?;
    step(machine, intent_id, TxState::Signed, TransitionCtx::default())?;

    step(
        machine,
        intent_id,
        TxState::Submitting,
        TransitionCtx::default(),
    )?;
    let signature = client.submit(&signed).await?;
    step(
        machine,
        intent_id,
        TxState::Submitted,
        TransitionCtx::default().with_signature(signature.as_str()),
    )?;

    // The confirm wait is the only long stage; a stop request aborts it
    // and leaves the signature in the failed record for reconciliation.
    let receipt = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(PositionError::Cancelled(format!(
                "confirm of {signature} interrupted by shutdown"
            )))
        }
        confirmed = tokio::time::timeout(confirm_timeout, client.confirm(&signature)) => {
            match confirmed {
                Ok(result) => result?,
                Err(_) => {
                    return Err(PositionError::Venue(VenueError::Timeout(format!(
                        "confirm of {signature} exceeded {}s",
                        confirm_timeout.as_secs()
                    ))))
                }
            }
        }
    };
    step(machine, intent_id, TxState::Confirmed, TransitionCtx::default())?;

    Ok(receipt)
}

fn step(
    machine: &TransactionStateMachine,
    intent_id: &IntentId,
    target: TxState,
    ctx: TransitionCtx,
) -> PositionResult<()> {
    machine.transition(intent_id, target, ctx)?;
    Metrics::tx_transition(&target.to_string());
    Ok(())
}
