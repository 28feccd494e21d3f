//! Position lifecycle integration tests.
//!
//! Each test drives the application's own passes (scan, monitor) against
//! sim venues and asserts on the combined outcome: positions held, legs
//! on the venues, realized PnL.

mod integration;
use integration::common::{app_over, default_asset, venues};

use carry_core::{ExitReason, FundingSnapshot, PositionStatus, Price};
use carry_venues::SimFailure;
use rust_decimal_macros::dec;
use std::time::Duration;
use tempfile::tempdir;
use tokio::time::timeout;

#[tokio::test]
async fn test_scan_opens_then_funding_flip_closes() {
    let dir = tempdir().unwrap();
    let v = venues();
    let mut app = app_over(&v, dir.path());

    app.scan_once().await.unwrap();

    let open = app.manager().open_positions();
    assert_eq!(open.len(), 1);
    let position_id = open[0].position_id.clone();
    // 5000 USD at 3x and price 100: 150 tokens long, 150 short.
    assert_eq!(open[0].long_leg.token_amount.inner(), dec!(150));
    assert_eq!(open[0].short_leg.signed_size.inner(), dec!(-150));
    assert_eq!(v.short_venue.open_position_count(), 1);

    // Predicted funding goes non-negative while current still pays.
    v.board
        .set_funding("SOL", FundingSnapshot::new(dec!(-0.0001), dec!(0.00002)));
    app.monitor_once().await;

    let closed = app.manager().position(&position_id).unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_reason, Some(ExitReason::FundingFlip));
    // Prices never moved, so PnL is exactly the funding accrued.
    assert_eq!(closed.realized_pnl, Some(closed.accrued_funding_usd));
    assert_eq!(app.manager().open_count(), 0);
    assert_eq!(v.short_venue.open_position_count(), 0);
    assert_eq!(v.long_venue.active_position_count(), 0);
}

#[tokio::test]
async fn test_health_factor_collapse_closes_position() {
    let dir = tempdir().unwrap();
    let v = venues();
    let mut app = app_over(&v, dir.path());

    app.scan_once().await.unwrap();
    let position_id = app.manager().open_positions()[0].position_id.clone();

    // 150 tokens at 70 is worth 10500 against 10000 borrowed: the long
    // leg's health factor lands under the 0.05 critical bound.
    v.board
        .set_prices(&default_asset(), Price::new(dec!(70)), Price::new(dec!(70)));
    app.monitor_once().await;

    let closed = app.manager().position(&position_id).unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_reason, Some(ExitReason::HealthFactor));
    // Both venues moved together, so the short gains what the long lost.
    assert_eq!(closed.realized_pnl, Some(closed.accrued_funding_usd));
    assert_eq!(v.short_venue.open_position_count(), 0);
}

#[tokio::test]
async fn test_hedge_failure_during_scan_leaves_nothing() {
    let dir = tempdir().unwrap();
    let v = venues();
    let app = app_over(&v, dir.path());

    v.short_venue.inject_failure(SimFailure::OpenShort);
    app.scan_once().await.unwrap();

    // The failed open was compensated: no position anywhere.
    assert_eq!(app.manager().open_count(), 0);
    assert_eq!(v.long_venue.active_position_count(), 0);
    assert_eq!(v.short_venue.open_position_count(), 0);

    // Next scan finds the venue healthy again and opens normally.
    app.scan_once().await.unwrap();
    assert_eq!(app.manager().open_count(), 1);
}

#[tokio::test]
async fn test_run_loop_opens_and_stops_on_cancel() {
    let dir = tempdir().unwrap();
    let v = venues();
    let app = app_over(&v, dir.path());
    let cancel = app.cancellation_token();
    let manager = app.manager().clone();

    let handle = tokio::spawn(async move { app.run().await });

    // The first scan tick fires immediately.
    let opened = timeout(Duration::from_secs(2), async {
        loop {
            if manager.open_count() > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(opened.is_ok(), "Should open within timeout");

    cancel.cancel();
    let result = timeout(Duration::from_secs(2), handle).await;
    assert!(result.is_ok(), "Run loop should stop on cancellation");
    result.unwrap().unwrap().unwrap();
}
