//! In-memory store for tests and dry runs.
//!
//! The store is [`Clone`] so tests can hold a handle for direct inspection while the harness owns
//! a shared copy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{BackendResult, Store, WorkRecord};

type Records = HashMap<(String, String), WorkRecord>;

/// A [`Store`] backed by a `HashMap`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    records: Arc<Mutex<Records>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the stored record, if present.
    pub fn get_stored(&self, table: &str, key: &str) -> Option<WorkRecord> {
        self.records
            .lock()
            .unwrap()
            .get(&(table.to_owned(), key.to_owned()))
            .cloned()
    }

    /// Returns `true` if the store contains a record for the given key.
    pub fn contains(&self, table: &str, key: &str) -> bool {
        self.get_stored(table, key).is_some()
    }

    /// Returns the number of records across all tables.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// Returns `true` if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.lock().unwrap().is_empty()
    }

    /// Inserts a record directly, bypassing the `Store` trait.
    pub fn insert(&self, table: &str, record: WorkRecord) {
        self.records
            .lock()
            .unwrap()
            .insert((table.to_owned(), record.name.clone()), record);
    }
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_record(&self, table: &str, key: &str) -> BackendResult<Option<WorkRecord>> {
        Ok(self.get_stored(table, key))
    }

    async fn put_record(&self, table: &str, record: &WorkRecord) -> BackendResult<()> {
        self.insert(table, record.clone());
        Ok(())
    }

    async fn delete_record(&self, table: &str, key: &str) -> BackendResult<()> {
        self.records
            .lock()
            .unwrap()
            .remove(&(table.to_owned(), key.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tables_are_separate() {
        let store = InMemoryStore::new();
        let record = WorkRecord::new("w");
        store.put_record("a", &record).await.unwrap();

        assert_eq!(store.get_record("a", "w").await.unwrap(), Some(record));
        assert_eq!(store.get_record("b", "w").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_absent_is_ok() {
        let store = InMemoryStore::new();
        store.delete_record("t", "missing").await.unwrap();
        assert!(store.is_empty());
    }
}
