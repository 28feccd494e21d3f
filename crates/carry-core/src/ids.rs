//! Engine-generated identifiers.
//!
//! Both id types embed a millisecond timestamp and a short uuid so logs,
//! journal records, and venue-side audit trails stay correlatable without
//! a central sequence.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn short_uuid() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// Unique identifier for one venue-side transaction intent.
///
/// One intent per venue operation ("open long leg", "close long leg"),
/// not per combined position. Every transaction record in the state
/// journal is keyed by this id.
///
/// Format: `{op}_{timestamp_ms}_{uuid_short}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct IntentId(String);

impl IntentId {
    /// Create a fresh intent id for the named operation.
    pub fn generate(op: &str) -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        Self(format!("{op}_{ts}_{}", short_uuid()))
    }

    /// Create from an existing string (journal replay, venue echoes).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a combined (two-leg) position.
///
/// Format: `pos_{timestamp_ms}_{uuid_short}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct PositionId(String);

impl PositionId {
    pub fn generate() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        Self(format!("pos_{ts}_{}", short_uuid()))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
