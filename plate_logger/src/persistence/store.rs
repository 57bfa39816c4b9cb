use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::record::PersistenceRecord;
use crate::error::PersistenceError;
use crate::plate_detection::VehicleType;

pub const DEFAULT_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: u64,
    #[serde(flatten)]
    pub record: PersistenceRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(u64),
    Updated(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordQuery {
    /// Case-insensitive substring matched against plate and vehicle type.
    pub search: Option<String>,
    pub vehicle_type: Option<VehicleType>,
    pub limit: usize,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            search: None,
            vehicle_type: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl RecordQuery {
    fn matches(&self, record: &PersistenceRecord) -> bool {
        if let Some(vehicle_type) = self.vehicle_type {
            if record.vehicle_type != vehicle_type {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                record.plate_text.to_lowercase().contains(&needle)
                    || record.vehicle_type.as_str().contains(&needle)
            }
            _ => true,
        }
    }
}

/// Document store keyed by (track_id, vehicle_type).
pub trait DocumentStore: Send + Sync {
    /// Inserts, or replaces the record sharing the same key.
    fn upsert(&self, record: PersistenceRecord) -> Result<UpsertOutcome, PersistenceError>;
    /// Upserts in order. Outcomes line up with `records`.
    fn upsert_batch(&self, records: Vec<PersistenceRecord>) -> Result<Vec<UpsertOutcome>, PersistenceError> {
        records.into_iter().map(|record| self.upsert(record)).collect()
    }
    /// Newest first, capped at `query.limit`.
    fn list(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>, PersistenceError>;
    fn get(&self, id: u64) -> Result<Option<StoredRecord>, PersistenceError>;
    /// Removes everything, returning how many records were deleted.
    fn delete_all(&self) -> Result<usize, PersistenceError>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct RecordTable {
    next_id: u64,
    records: Vec<StoredRecord>,
}

impl RecordTable {
    fn upsert(&mut self, record: PersistenceRecord) -> UpsertOutcome {
        let key = record.key();
        if let Some(existing) = self.records.iter_mut().find(|r| r.record.key() == key) {
            existing.record = record;
            return UpsertOutcome::Updated(existing.id);
        }
        self.next_id += 1;
        let id = self.next_id;
        self.records.push(StoredRecord { id, record });
        UpsertOutcome::Inserted(id)
    }

    fn list(&self, query: &RecordQuery) -> Vec<StoredRecord> {
        let mut found: Vec<&StoredRecord> = self
            .records
            .iter()
            .filter(|r| query.matches(&r.record))
            .collect();
        found.sort_by(|a, b| {
            b.record
                .timestamp
                .cmp(&a.record.timestamp)
                .then(b.id.cmp(&a.id))
        });
        found.into_iter().take(query.limit).cloned().collect()
    }

    fn get(&self, id: u64) -> Option<StoredRecord> {
        self.records.iter().find(|r| r.id == id).cloned()
    }

    fn clear(&mut self) -> usize {
        let removed = self.records.len();
        self.records.clear();
        removed
    }
}

fn lock(table: &Mutex<RecordTable>) -> Result<MutexGuard<'_, RecordTable>, PersistenceError> {
    table
        .lock()
        .map_err(|_| PersistenceError::Unavailable("record table lock poisoned".into()))
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<RecordTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    fn upsert(&self, record: PersistenceRecord) -> Result<UpsertOutcome, PersistenceError> {
        Ok(lock(&self.table)?.upsert(record))
    }

    fn list(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>, PersistenceError> {
        Ok(lock(&self.table)?.list(query))
    }

    fn get(&self, id: u64) -> Result<Option<StoredRecord>, PersistenceError> {
        Ok(lock(&self.table)?.get(id))
    }

    fn delete_all(&self) -> Result<usize, PersistenceError> {
        Ok(lock(&self.table)?.clear())
    }
}

/// Keeps the table in memory and rewrites a JSON document on every change.
/// A batch is written once.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    table: Mutex<RecordTable>,
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let table = if path.exists() {
            let contents = fs::read_to_string(&path)?;
            serde_json::from_str(&contents)?
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            RecordTable::default()
        };
        info!(
            "Opened record store {} ({} records)",
            path.display(),
            table.records.len()
        );
        Ok(Self {
            path,
            table: Mutex::new(table),
        })
    }

    fn save(&self, table: &RecordTable) -> Result<(), PersistenceError> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(table)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl DocumentStore for JsonFileStore {
    fn upsert(&self, record: PersistenceRecord) -> Result<UpsertOutcome, PersistenceError> {
        let mut table = lock(&self.table)?;
        let outcome = table.upsert(record);
        self.save(&table)?;
        Ok(outcome)
    }

    fn upsert_batch(&self, records: Vec<PersistenceRecord>) -> Result<Vec<UpsertOutcome>, PersistenceError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        let mut table = lock(&self.table)?;
        let outcomes = records.into_iter().map(|record| table.upsert(record)).collect();
        self.save(&table)?;
        Ok(outcomes)
    }

    fn list(&self, query: &RecordQuery) -> Result<Vec<StoredRecord>, PersistenceError> {
        Ok(lock(&self.table)?.list(query))
    }

    fn get(&self, id: u64) -> Result<Option<StoredRecord>, PersistenceError> {
        Ok(lock(&self.table)?.get(id))
    }

    fn delete_all(&self) -> Result<usize, PersistenceError> {
        let mut table = lock(&self.table)?;
        let removed = table.clear();
        self.save(&table)?;
        Ok(removed)
    }
}
