//! The `RecordStore` trait and the in-memory implementation.
//!
//! `RecordStore` abstracts a remote key/value table service supporting
//! strongly-consistent single-key reads. `MemoryStore` is the in-process
//! implementation used by tests and local development; key field names are
//! not schema-checked, only the key values address records.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::types::{PointLookup, Record};

/// A key/value table service supporting single-key reads.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the record matching the lookup's composite key.
    ///
    /// Returns `Ok(None)` when the lookup succeeds but no record matches;
    /// `Err` only for transport or service failures.
    async fn get_record(&self, lookup: &PointLookup) -> StoreResult<Option<Record>>;
}

/// Composite key: (partition value, range value).
type RecordKey = (String, String);

/// In-memory record store keyed by table name.
///
/// Cloning yields another handle to the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<HashMap<String, HashMap<RecordKey, Record>>>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record under the given composite key.
    ///
    /// Creates the table if it does not exist yet.
    pub fn put_record(&self, table: &str, partition: &str, range: &str, record: Record) {
        let mut tables = self.lock();
        tables
            .entry(table.to_string())
            .or_default()
            .insert((partition.to_string(), range.to_string()), record);
        debug!(%table, %partition, %range, "record stored");
    }

    /// Remove a record. Returns true if it existed.
    pub fn remove_record(&self, table: &str, partition: &str, range: &str) -> bool {
        let mut tables = self.lock();
        tables
            .get_mut(table)
            .and_then(|records| records.remove(&(partition.to_string(), range.to_string())))
            .is_some()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<RecordKey, Record>>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_record(&self, lookup: &PointLookup) -> StoreResult<Option<Record>> {
        let tables = self.lock();
        let Some(records) = tables.get(&lookup.table) else {
            return Err(StoreError::Lookup(format!(
                "unknown table: {}",
                lookup.table
            )));
        };
        let key = (lookup.partition.value.clone(), lookup.range.value.clone());
        Ok(records.get(&key).map(|r| r.project(&lookup.projection)))
    }
}
