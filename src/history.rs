//! Capped, newest-first log of completed analyses.
//!
//! The whole log lives under one storage key as a JSON array. Every operation is
//! a full read-modify-write under the store mutex. Unreadable storage reads back
//! as an empty log.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FailureCategory, StorageError};
use crate::model::{GuestPrediction, ReservationInput, RiskFilter};

/// Default maximum number of records kept.
pub const DEFAULT_CAPACITY: usize = 100;

/// Which dashboard flow produced the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Analyze,
    Tables,
}

/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: AnalysisSource,
    pub input: ReservationInput,
    pub prediction: GuestPrediction,
}

/// Durable home of the serialised log.
pub trait HistoryBackend: Send + Sync {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&self) -> io::Result<Option<String>>;
    fn save(&self, raw: &str) -> io::Result<()>;
    fn erase(&self) -> io::Result<()>;
}

/// Single JSON file, replaced atomically via a temp file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryBackend for FileBackend {
    fn load(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn save(&self, raw: &str) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp)?;
        f.write_all(raw.as_bytes())?;
        f.sync_all()?;
        fs::rename(tmp, &self.path)
    }

    fn erase(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// In-process backend for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    raw: Mutex<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with arbitrary contents (e.g. a corrupted payload).
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
        }
    }

    pub fn raw(&self) -> Option<String> {
        lock(&self.raw).clone()
    }
}

impl HistoryBackend for MemoryBackend {
    fn load(&self) -> io::Result<Option<String>> {
        Ok(lock(&self.raw).clone())
    }

    fn save(&self, raw: &str) -> io::Result<()> {
        *lock(&self.raw) = Some(raw.to_string());
        Ok(())
    }

    fn erase(&self) -> io::Result<()> {
        *lock(&self.raw) = None;
        Ok(())
    }
}

pub struct HistoryStore {
    backend: Box<dyn HistoryBackend>,
    cap: usize,
    // Serialises read-modify-write cycles.
    guard: Mutex<()>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore").field("cap", &self.cap).finish()
    }
}

impl HistoryStore {
    /// A capacity of 0 is treated as 1.
    pub fn new(backend: impl HistoryBackend + 'static, cap: usize) -> Self {
        Self {
            backend: Box::new(backend),
            cap: cap.max(1),
            guard: Mutex::new(()),
        }
    }

    pub fn in_memory(cap: usize) -> Self {
        Self::new(MemoryBackend::new(), cap)
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Stamp, prepend, truncate to capacity and persist.
    pub fn append(
        &self,
        input: ReservationInput,
        prediction: GuestPrediction,
        source: AnalysisSource,
    ) -> Result<HistoryRecord, StorageError> {
        let mut records = self.append_many(vec![(input, prediction)], source)?;
        records.pop().ok_or(StorageError::Empty)
    }

    /// Record a batch in one read-modify-write. Rows are prepended in order,
    /// so the last row ends up newest. Either every row is persisted or, on a
    /// failed write, none is. Returns the new records in input order.
    pub fn append_many(
        &self,
        rows: Vec<(ReservationInput, GuestPrediction)>,
        source: AnalysisSource,
    ) -> Result<Vec<HistoryRecord>, StorageError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let _g = lock(&self.guard);
        let existing = self.read_unlocked();

        let now = Utc::now();
        let added: Vec<HistoryRecord> = rows
            .into_iter()
            .map(|(input, prediction)| HistoryRecord {
                id: new_record_id(),
                timestamp: now,
                source,
                input,
                prediction,
            })
            .collect();

        let mut records: Vec<HistoryRecord> = added.iter().rev().cloned().collect();
        records.extend(existing);
        if records.len() > self.cap {
            let evicted = records.len() - self.cap;
            records.truncate(self.cap);
            debug!(evicted, cap = self.cap, "history evicted oldest records");
        }

        self.write_unlocked(&records)?;
        counter!("history_appends_total").increment(added.len() as u64);
        gauge!("history_records").set(records.len() as f64);
        Ok(added)
    }

    /// Full log, newest first. Never fails.
    pub fn list(&self) -> Vec<HistoryRecord> {
        let _g = lock(&self.guard);
        self.read_unlocked()
    }

    pub fn list_filtered(&self, filter: RiskFilter) -> Vec<HistoryRecord> {
        self.list()
            .into_iter()
            .filter(|r| filter.matches(r.prediction.risk_label))
            .collect()
    }

    /// Remove by id; absent ids are a no-op.
    pub fn remove(&self, id: &str) -> Result<(), StorageError> {
        let _g = lock(&self.guard);
        let mut records = self.read_unlocked();
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(());
        }
        self.write_unlocked(&records)?;
        gauge!("history_records").set(records.len() as f64);
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        let _g = lock(&self.guard);
        self.backend.erase()?;
        gauge!("history_records").set(0.0);
        Ok(())
    }

    fn read_unlocked(&self) -> Vec<HistoryRecord> {
        let raw = match self.backend.load() {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(error = %e, category = FailureCategory::StorageCorruption.as_str(), "history unreadable; treating as empty");
                return Vec::new();
            }
        };
        if raw.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<Vec<HistoryRecord>>(&raw) {
            Ok(mut records) => {
                // Stored by an older build with a larger cap.
                records.truncate(self.cap);
                records
            }
            Err(e) => {
                warn!(error = %e, category = FailureCategory::StorageCorruption.as_str(), "history corrupted; treating as empty");
                Vec::new()
            }
        }
    }

    fn write_unlocked(&self, records: &[HistoryRecord]) -> Result<(), StorageError> {
        let raw = serde_json::to_string(records)?;
        self.backend.save(&raw)?;
        Ok(())
    }
}

/// `<unix-millis>-<16 hex>`; unique across reloads with overwhelming probability.
fn new_record_id() -> String {
    format!("{}-{:016x}", Utc::now().timestamp_millis(), rand::random::<u64>())
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
