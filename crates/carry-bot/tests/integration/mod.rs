//! Integration tests for carry-bot.
//!
//! These tests drive the whole application against sim venues:
//! - Open/monitor/close lifecycle through the scan and monitor passes
//! - Crash recovery over the durable stores

pub mod common;
