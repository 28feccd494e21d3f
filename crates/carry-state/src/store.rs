//! Durable state store: append-only JSON Lines journal with an in-memory
//! latest-record index.
//!
//! JSON Lines format for robustness:
//! - Each line is a complete record; a torn write corrupts one line only
//! - The journal replays on open even if the last write was interrupted
//! - Last write per intent wins, so an append is a keyed upsert
//!
//! Every `save_state` appends one line and flushes before returning, so
//! a crash between two transitions always leaves the last-completed
//! state durably recorded.

use crate::error::StateResult;
use crate::record::{TransactionRecord, TxState};
use carry_core::IntentId;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Journal file name under the data directory.
const JOURNAL_FILE: &str = "tx_state.jsonl";

/// Journal sizing and retention knobs.
#[derive(Debug, Clone, Copy)]
pub struct JournalConfig {
    /// Rewrite the journal on open once it exceeds this many lines,
    /// keeping only each intent's latest record.
    pub compact_after_lines: u64,
    /// Terminal records older than this are dropped at compaction.
    pub retain_terminal_secs: i64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            compact_after_lines: 10_000,
            retain_terminal_secs: 7 * 24 * 3600,
        }
    }
}

/// Persistence contract for transaction records.
///
/// `save_state` must be durable before it returns; that property is what
/// makes the state machine's records trustworthy after a crash.
pub trait StateStore: Send + Sync {
    /// Upsert the record for its intent.
    fn save_state(&self, record: &TransactionRecord) -> StateResult<()>;

    /// Latest record for the intent, if any.
    fn state(&self, intent_id: &IntentId) -> StateResult<Option<TransactionRecord>>;

    /// All records whose state is neither `Confirmed` nor `Failed`,
    /// ordered by record timestamp.
    fn incomplete(&self) -> StateResult<Vec<TransactionRecord>>;
}

struct JournalInner {
    writer: BufWriter<File>,
    index: HashMap<IntentId, TransactionRecord>,
    lines_written: u64,
}

/// File-backed `StateStore`.
///
/// Append mode is safe for interrupted writes; the index is rebuilt by
/// replaying the journal on open.
pub struct JournalStore {
    path: PathBuf,
    inner: Mutex<JournalInner>,
}

impl JournalStore {
    /// Open (or create) the journal under `base_dir`, replaying any
    /// existing records and compacting if the file has grown past the
    /// configured line count.
    pub fn open(base_dir: impl AsRef<Path>, config: JournalConfig) -> StateResult<Self> {
        let base_dir = base_dir.as_ref();
        std::fs::create_dir_all(base_dir)?;
        let path = base_dir.join(JOURNAL_FILE);

        let (index, line_count) = replay(&path)?;

        let index = if line_count > config.compact_after_lines {
            compact(&path, index, &config)?
        } else {
            index
        };

        info!(
            path = %path.display(),
            intents = index.len(),
            lines = line_count,
            "Opened transaction state journal"
        );

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            inner: Mutex::new(JournalInner {
                writer: BufWriter::new(file),
                index,
                lines_written: 0,
            }),
        })
    }

    /// Journal file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of intents currently indexed.
    pub fn intent_count(&self) -> usize {
        self.inner.lock().index.len()
    }

    /// Flush buffered bytes to the OS. `save_state` already flushes per
    /// record; this exists for the shutdown path.
    pub fn close(&self) -> StateResult<()> {
        let mut inner = self.inner.lock();
        inner.writer.flush()?;
        debug!(lines = inner.lines_written, "Closed transaction state journal");
        Ok(())
    }
}

impl StateStore for JournalStore {
    fn save_state(&self, record: &TransactionRecord) -> StateResult<()> {
        let json = serde_json::to_string(record)?;
        let mut inner = self.inner.lock();
        writeln!(inner.writer, "{json}")?;
        inner.writer.flush()?;
        inner.lines_written += 1;
        inner
            .index
            .insert(record.intent_id.clone(), record.clone());
        Ok(())
    }

    fn state(&self, intent_id: &IntentId) -> StateResult<Option<TransactionRecord>> {
        Ok(self.inner.lock().index.get(intent_id).cloned())
    }

    fn incomplete(&self) -> StateResult<Vec<TransactionRecord>> {
        let inner = self.inner.lock();
        let mut records: Vec<TransactionRecord> = inner
            .index
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}

impl Drop for JournalStore {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(?e, "Failed to flush journal on drop");
        }
    }
}

/// Replay the journal into a latest-record index. Corrupt lines are
/// skipped with a warning, never fatal.
fn replay(path: &Path) -> StateResult<(HashMap<IntentId, TransactionRecord>, u64)> {
    let mut index = HashMap::new();
    let mut line_count = 0u64;
    let mut corrupt = 0u64;

    if !path.exists() {
        return Ok((index, 0));
    }

    let reader = BufReader::new(File::open(path)?);
    for line in reader.lines() {
        let line = line?;
        line_count += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TransactionRecord>(&line) {
            Ok(record) => {
                index.insert(record.intent_id.clone(), record);
            }
            Err(e) => {
                corrupt += 1;
                warn!(line = line_count, ?e, "Skipping corrupt journal line");
            }
        }
    }

    if corrupt > 0 {
        warn!(corrupt, total = line_count, "Journal replay skipped corrupt lines");
    }

    Ok((index, line_count))
}

/// Rewrite the journal with one line per intent, dropping terminal
/// records past the retention window. Writes to a temp file and renames
/// over the original so a crash mid-compaction loses nothing.
fn compact(
    path: &Path,
    index: HashMap<IntentId, TransactionRecord>,
    config: &JournalConfig,
) -> StateResult<HashMap<IntentId, TransactionRecord>> {
    let cutoff = Utc::now() - Duration::seconds(config.retain_terminal_secs);
    let kept: HashMap<IntentId, TransactionRecord> = index
        .into_iter()
        .filter(|(_, r)| !r.state.is_terminal() || r.timestamp >= cutoff)
        .collect();

    let tmp_path = path.with_extension("jsonl.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        let mut records: Vec<&TransactionRecord> = kept.values().collect();
        records.sort_by_key(|r| r.timestamp);
        for record in records {
            writeln!(writer, "{}", serde_json::to_string(record)?)?;
        }
        writer.flush()?;
    }
    std::fs::rename(&tmp_path, path)?;

    info!(intents = kept.len(), "Compacted transaction state journal");
    Ok(kept)
}

/// In-memory `StateStore` for tests and the paper-trading wiring.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<IntentId, TransactionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn save_state(&self, record: &TransactionRecord) -> StateResult<()> {
        self.records
            .lock()
            .insert(record.intent_id.clone(), record.clone());
        Ok(())
    }

    fn state(&self, intent_id: &IntentId) -> StateResult<Option<TransactionRecord>> {
        Ok(self.records.lock().get(intent_id).cloned())
    }

    fn incomplete(&self) -> StateResult<Vec<TransactionRecord>> {
        let records = self.records.lock();
        let mut out: Vec<TransactionRecord> = records
            .values()
            .filter(|r| !r.state.is_terminal())
            .cloned()
            .collect();
        out.sort_by_key(|r| r.timestamp);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_record(intent: &IntentId, state: TxState) -> TransactionRecord {
        TransactionRecord {
            intent_id: intent.clone(),
            state,
            timestamp: Utc::now(),
            signature: None,
            metadata: None,
            error: None,
        }
    }

    #[test]
    fn test_save_and_get() {
        let dir = TempDir::new().unwrap();
        let store = JournalStore::open(dir.path(), JournalConfig::default()).unwrap();

        let intent = IntentId::generate("open_long");
        store
            .save_state(&make_record(&intent, TxState::Building))
            .unwrap();

        let loaded = store.state(&intent).unwrap().unwrap();
        assert_eq!(loaded.state, TxState::Building);
        assert_eq!(loaded.intent_id, intent);

        let missing = IntentId::generate("open_long");
        assert!(store.state(&missing).unwrap().is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let dir = TempDir::new().unwrap();
        let store = JournalStore::open(dir.path(), JournalConfig::default()).unwrap();

        let intent = IntentId::generate("open_long");
        store
            .save_state(&make_record(&intent, TxState::Building))
            .unwrap();
        store
            .save_state(&make_record(&intent, TxState::Built))
            .unwrap();

        assert_eq!(store.state(&intent).unwrap().unwrap().state, TxState::Built);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let intent = IntentId::generate("open_long");

        {
            let store = JournalStore::open(dir.path(), JournalConfig::default()).unwrap();
            store
                .save_state(&make_record(&intent, TxState::Building))
                .unwrap();
            store
                .save_state(&make_record(&intent, TxState::Signed))
                .unwrap();
        }

        // Reopen: replay must restore the latest state.
        let store = JournalStore::open(dir.path(), JournalConfig::default()).unwrap();
        assert_eq!(
            store.state(&intent).unwrap().unwrap().state,
            TxState::Signed
        );
    }

    #[test]
    fn test_incomplete_filters_terminal() {
        let dir = TempDir::new().unwrap();
        let store = JournalStore::open(dir.path(), JournalConfig::default()).unwrap();

        let a = IntentId::generate("open_long");
        let b = IntentId::generate("close_long");
        let c = IntentId::generate("open_long");

        store.save_state(&make_record(&a, TxState::Submitted)).unwrap();
        store.save_state(&make_record(&b, TxState::Confirmed)).unwrap();
        store.save_state(&make_record(&c, TxState::Failed)).unwrap();

        let incomplete = store.incomplete().unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].intent_id, a);
    }

    #[test]
    fn test_corrupt_line_skipped_on_replay() {
        let dir = TempDir::new().unwrap();
        let intent = IntentId::generate("open_long");

        {
            let store = JournalStore::open(dir.path(), JournalConfig::default()).unwrap();
            store
                .save_state(&make_record(&intent, TxState::Building))
                .unwrap();
        }

        // Simulate a torn write.
        let path = dir.path().join(JOURNAL_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"intent_id\": \"trunc").unwrap();

        let store = JournalStore::open(dir.path(), JournalConfig::default()).unwrap();
        assert_eq!(
            store.state(&intent).unwrap().unwrap().state,
            TxState::Building
        );
        assert_eq!(store.intent_count(), 1);
    }

    #[test]
    fn test_compaction_rewrites_journal() {
        let dir = TempDir::new().unwrap();
        let config = JournalConfig {
            compact_after_lines: 5,
            retain_terminal_secs: 3600,
        };

        let a = IntentId::generate("open_long");
        let b = IntentId::generate("close_long");
        {
            let store = JournalStore::open(dir.path(), config).unwrap();
            for state in [
                TxState::Building,
                TxState::Built,
                TxState::Signing,
                TxState::Signed,
            ] {
                store.save_state(&make_record(&a, state)).unwrap();
            }
            store.save_state(&make_record(&b, TxState::Building)).unwrap();
            store.save_state(&make_record(&b, TxState::Failed)).unwrap();
        }

        // 6 lines > 5: reopen compacts down to one line per intent.
        let store = JournalStore::open(dir.path(), config).unwrap();
        assert_eq!(store.state(&a).unwrap().unwrap().state, TxState::Signed);
        assert_eq!(store.state(&b).unwrap().unwrap().state, TxState::Failed);

        let lines = std::fs::read_to_string(dir.path().join(JOURNAL_FILE)).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }

    #[test]
    fn test_compaction_drops_old_terminal_records() {
        let dir = TempDir::new().unwrap();
        let config = JournalConfig {
            compact_after_lines: 1,
            retain_terminal_secs: 60,
        };

        let old_done = IntentId::generate("open_long");
        let live = IntentId::generate("close_long");
        {
            let store = JournalStore::open(dir.path(), config).unwrap();
            let mut stale = make_record(&old_done, TxState::Confirmed);
            stale.timestamp = Utc::now() - Duration::seconds(600);
            store.save_state(&stale).unwrap();

            // A stale non-terminal record must survive compaction.
            let mut stuck = make_record(&live, TxState::Submitted);
            stuck.timestamp = Utc::now() - Duration::seconds(600);
            store.save_state(&stuck).unwrap();
        }

        let store = JournalStore::open(dir.path(), config).unwrap();
        assert!(store.state(&old_done).unwrap().is_none());
        assert_eq!(
            store.state(&live).unwrap().unwrap().state,
            TxState::Submitted
        );
    }

    #[test]
    fn test_memory_store_behaves_like_journal() {
        let store = MemoryStore::new();
        let intent = IntentId::generate("open_long");

        store
            .save_state(&make_record(&intent, TxState::Building))
            .unwrap();
        store
            .save_state(&make_record(&intent, TxState::Built))
            .unwrap();

        assert_eq!(store.state(&intent).unwrap().unwrap().state, TxState::Built);
        assert_eq!(store.incomplete().unwrap().len(), 1);

        store.save_state(&make_record(&intent, TxState::Failed)).unwrap();
        assert!(store.incomplete().unwrap().is_empty());
    }
}
