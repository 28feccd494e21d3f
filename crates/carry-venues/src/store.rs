//! Durable position persistence.
//!
//! Two append-only JSONL files: `positions.jsonl` holds one full
//! `CombinedPosition` snapshot per save (last line per id wins on replay),
//! `actions.jsonl` is the audit trail of state-changing operations. Every
//! write is flushed before returning so a crash loses at most the write in
//! progress.

use crate::error::VenueResult;
use crate::traits::PositionStore;
use crate::types::ActionRecord;
use carry_core::{CombinedPosition, PositionId, PositionStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, warn};

pub const POSITIONS_FILE: &str = "positions.jsonl";
pub const ACTIONS_FILE: &str = "actions.jsonl";

fn append_handle(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

struct StoreInner {
    positions_writer: BufWriter<File>,
    actions_writer: BufWriter<File>,
    index: HashMap<PositionId, CombinedPosition>,
}

/// File-backed position store.
pub struct JsonlPositionStore {
    inner: Mutex<StoreInner>,
}

impl JsonlPositionStore {
    /// Open (or create) the store directory and replay the positions file
    /// into the in-memory index. Corrupt lines are skipped with a warning;
    /// a partially written trailing line must not take down recovery.
    pub fn open(dir: impl AsRef<Path>) -> VenueResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let positions_path = dir.join(POSITIONS_FILE);
        let index = Self::replay(&positions_path)?;
        debug!(
            positions = index.len(),
            path = %positions_path.display(),
            "position store opened"
        );
        Ok(Self {
            inner: Mutex::new(StoreInner {
                positions_writer: BufWriter::new(append_handle(&positions_path)?),
                actions_writer: BufWriter::new(append_handle(&dir.join(ACTIONS_FILE))?),
                index,
            }),
        })
    }

    fn replay(path: &Path) -> VenueResult<HashMap<PositionId, CombinedPosition>> {
        let mut index = HashMap::new();
        if !path.exists() {
            return Ok(index);
        }
        let reader = BufReader::new(File::open(path)?);
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CombinedPosition>(&line) {
                Ok(position) => {
                    index.insert(position.position_id.clone(), position);
                }
                Err(e) => {
                    warn!(line = line_no + 1, error = %e, "skipping corrupt position line");
                }
            }
        }
        Ok(index)
    }

    /// Flush both writers. Called on shutdown.
    pub fn close(&self) -> VenueResult<()> {
        let mut inner = self.inner.lock();
        inner.positions_writer.flush()?;
        inner.actions_writer.flush()?;
        Ok(())
    }
}

impl PositionStore for JsonlPositionStore {
    fn save(&self, position: &CombinedPosition) -> VenueResult<()> {
        let line = serde_json::to_string(position)?;
        let mut inner = self.inner.lock();
        writeln!(inner.positions_writer, "{line}")?;
        inner.positions_writer.flush()?;
        inner
            .index
            .insert(position.position_id.clone(), position.clone());
        Ok(())
    }

    fn load(&self, position_id: &PositionId) -> VenueResult<Option<CombinedPosition>> {
        Ok(self.inner.lock().index.get(position_id).cloned())
    }

    fn load_open(&self) -> VenueResult<Vec<CombinedPosition>> {
        let inner = self.inner.lock();
        let mut open: Vec<CombinedPosition> = inner
            .index
            .values()
            .filter(|p| p.status != PositionStatus::Closed)
            .cloned()
            .collect();
        open.sort_by_key(|p| p.opened_at);
        Ok(open)
    }

    fn log_action(&self, action: &ActionRecord) -> VenueResult<()> {
        let line = serde_json::to_string(action)?;
        let mut inner = self.inner.lock();
        writeln!(inner.actions_writer, "{line}")?;
        inner.actions_writer.flush()?;
        Ok(())
    }
}

impl Drop for JsonlPositionStore {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if let Err(e) = inner.positions_writer.flush() {
            warn!(error = %e, "failed to flush positions on drop");
        }
        if let Err(e) = inner.actions_writer.flush() {
            warn!(error = %e, "failed to flush actions on drop");
        }
    }
}

/// In-memory store for paper mode. Saves can be switched off to emulate a
/// persistence outage and observe the retry sweep.
#[derive(Default)]
pub struct MemoryPositionStore {
    positions: Mutex<HashMap<PositionId, CombinedPosition>>,
    actions: Mutex<Vec<ActionRecord>>,
    fail_saves: AtomicBool,
    save_count: AtomicUsize,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves since construction.
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    pub fn actions(&self) -> Vec<ActionRecord> {
        self.actions.lock().clone()
    }
}

impl PositionStore for MemoryPositionStore {
    fn save(&self, position: &CombinedPosition) -> VenueResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(crate::error::VenueError::Unavailable(
                "position store offline".to_string(),
            ));
        }
        self.positions
            .lock()
            .insert(position.position_id.clone(), position.clone());
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self, position_id: &PositionId) -> VenueResult<Option<CombinedPosition>> {
        Ok(self.positions.lock().get(position_id).cloned())
    }

    fn load_open(&self) -> VenueResult<Vec<CombinedPosition>> {
        let mut open: Vec<CombinedPosition> = self
            .positions
            .lock()
            .values()
            .filter(|p| p.status != PositionStatus::Closed)
            .cloned()
            .collect();
        open.sort_by_key(|p| p.opened_at);
        Ok(open)
    }

    fn log_action(&self, action: &ActionRecord) -> VenueResult<()> {
        self.actions.lock().push(action.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carry_core::{
        Asset, CombinedPosition, ExitReason, IntentId, LendingProtocol, Leverage,
        LongLegPosition, Price, ReferencePrices, ShortLegPosition, Size,
    };
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn sample_position() -> CombinedPosition {
        let long_leg = LongLegPosition {
            position_handle: "asgard_7f3a".to_string(),
            intent_id: IntentId::generate("open_long"),
            asset: Asset::new("jitoSOL", "J1toso1m", "SOL", true),
            protocol: LendingProtocol::Kamino,
            collateral_usd: dec!(5000),
            position_size_usd: dec!(15000),
            leverage: Leverage::new(dec!(3.0)).unwrap(),
            token_amount: Size::new(dec!(150)),
            borrowed_usd: dec!(10000),
            entry_price: Price::new(dec!(100)),
            current_price: Price::new(dec!(100)),
            current_health_factor: dec!(0.35),
        };
        let short_leg = ShortLegPosition {
            coin: "SOL".to_string(),
            signed_size: Size::new(dec!(-150)),
            entry_price: Price::new(dec!(100)),
            leverage: Leverage::new(dec!(3.0)).unwrap(),
            margin_used: dec!(5000),
            margin_fraction: dec!(0.33),
            account_value: dec!(5100),
            mark_price: Price::new(dec!(100)),
        };
        CombinedPosition::new(
            "opp-0001".to_string(),
            long_leg,
            short_leg,
            ReferencePrices {
                long_price: Price::new(dec!(100)),
                short_price: Price::new(dec!(100)),
                captured_at: Utc::now(),
            },
        )
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = JsonlPositionStore::open(dir.path()).unwrap();

        let position = sample_position();
        store.save(&position).unwrap();

        let loaded = store.load(&position.position_id).unwrap().unwrap();
        assert_eq!(loaded, position);
    }

    #[test]
    fn test_last_save_wins_across_reopen() {
        let dir = TempDir::new().unwrap();
        let mut position = sample_position();
        {
            let store = JsonlPositionStore::open(dir.path()).unwrap();
            store.save(&position).unwrap();

            position.status = PositionStatus::Closed;
            position.exit_reason = Some(ExitReason::FundingFlip);
            position.exit_time = Some(Utc::now());
            position.realized_pnl = Some(dec!(42.5));
            store.save(&position).unwrap();
        }

        let store = JsonlPositionStore::open(dir.path()).unwrap();
        let loaded = store.load(&position.position_id).unwrap().unwrap();
        assert_eq!(loaded.status, PositionStatus::Closed);
        assert_eq!(loaded.realized_pnl, Some(dec!(42.5)));
        assert!(store.load_open().unwrap().is_empty());
    }

    #[test]
    fn test_load_open_excludes_closed_only() {
        let dir = TempDir::new().unwrap();
        let store = JsonlPositionStore::open(dir.path()).unwrap();

        let open = sample_position();
        let mut closing = sample_position();
        closing.status = PositionStatus::Closing;
        let mut closed = sample_position();
        closed.status = PositionStatus::Closed;

        store.save(&open).unwrap();
        store.save(&closing).unwrap();
        store.save(&closed).unwrap();

        let loaded = store.load_open().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|p| p.status != PositionStatus::Closed));
    }

    #[test]
    fn test_corrupt_line_skipped_on_replay() {
        let dir = TempDir::new().unwrap();
        let position = sample_position();
        {
            let store = JsonlPositionStore::open(dir.path()).unwrap();
            store.save(&position).unwrap();
        }
        // Emulate a crash mid-write.
        let path = dir.path().join(POSITIONS_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"position_id\": \"pos_trunc").unwrap();

        let store = JsonlPositionStore::open(dir.path()).unwrap();
        assert_eq!(
            store.load(&position.position_id).unwrap().unwrap(),
            position
        );
    }

    #[test]
    fn test_actions_appended_to_audit_file() {
        let dir = TempDir::new().unwrap();
        let store = JsonlPositionStore::open(dir.path()).unwrap();

        let record = ActionRecord::new("open_position", "opened jitoSOL 3x")
            .for_position(sample_position().position_id);
        store.log_action(&record).unwrap();
        store.log_action(&ActionRecord::new("close_position", "funding flip")).unwrap();
        store.close().unwrap();

        let contents = std::fs::read_to_string(dir.path().join(ACTIONS_FILE)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: ActionRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.action, "open_position");
    }

    #[test]
    fn test_memory_store_failure_toggle() {
        let store = MemoryPositionStore::new();
        let position = sample_position();

        store.set_fail_saves(true);
        assert!(store.save(&position).is_err());
        assert_eq!(store.save_count(), 0);

        store.set_fail_saves(false);
        store.save(&position).unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load_open().unwrap().len(), 1);
    }
}
