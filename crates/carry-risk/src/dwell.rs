//! Proximity dwell timers.
//!
//! A metric entering the proximity band starts a per-position timer; the
//! timer only matters once the metric has stayed in the band continuously
//! for the configured dwell window. One healthy reading resets it, which
//! is the debounce: momentary ticks into the band never accumulate.

use carry_core::PositionId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

/// Which metric a dwell timer watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DwellMetric {
    HealthFactor,
    MarginFraction,
}

impl fmt::Display for DwellMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HealthFactor => write!(f, "health_factor"),
            Self::MarginFraction => write!(f, "margin_fraction"),
        }
    }
}

/// Per-position, per-metric proximity timers.
#[derive(Debug, Default)]
pub struct DwellTracker {
    started: HashMap<(PositionId, DwellMetric), DateTime<Utc>>,
}

impl DwellTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation. Returns the continuous seconds spent in
    /// proximity so far (`Some(0)` on the tick that enters the band), or
    /// `None` for a healthy reading, which also resets the timer.
    pub fn observe(
        &mut self,
        position_id: &PositionId,
        metric: DwellMetric,
        in_proximity: bool,
        now: DateTime<Utc>,
    ) -> Option<i64> {
        let key = (position_id.clone(), metric);
        if in_proximity {
            let started = *self.started.entry(key).or_insert(now);
            Some((now - started).num_seconds())
        } else {
            self.started.remove(&key);
            None
        }
    }

    /// Drop all timers for a position (closed or no longer monitored).
    pub fn clear_position(&mut self, position_id: &PositionId) {
        self.started.retain(|(id, _), _| id != position_id);
    }

    /// Number of live timers, for gauge reporting.
    pub fn active_timers(&self) -> usize {
        self.started.len()
    }
}
