//! The keyed record store that workers read from and write to.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod cached;
mod in_memory;
mod local_fs;

pub use cached::{CacheStats, CachedStore, DEFAULT_CACHE_TTL};
pub use in_memory::InMemoryStore;
pub use local_fs::LocalFsStore;

/// The record a worker writes on every write tick.
///
/// `name` is the partition key and always equals the identity of the owning worker. The token is
/// regenerated for every write so that each put carries a non-trivial payload; its contents are
/// otherwise meaningless.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRecord {
    /// The record key.
    pub name: String,
    /// A fresh random value per write.
    pub token: Uuid,
}

impl WorkRecord {
    /// Creates a record for the given key with a newly generated token.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: Uuid::new_v4(),
        }
    }
}

/// A keyed record store.
///
/// Every call addresses a `table`, which namespaces keys the same way a table or bucket does in a
/// remote database. Implementations must be safe to share between all workers of a run.
#[async_trait::async_trait]
pub trait Store: Debug + Send + Sync + 'static {
    /// The store type, used for diagnostics.
    fn name(&self) -> &'static str;

    /// Point read of the record stored under `key`.
    async fn get_record(&self, table: &str, key: &str) -> BackendResult<Option<WorkRecord>>;

    /// Stores the record under its `name`, overwriting any previous record.
    async fn put_record(&self, table: &str, record: &WorkRecord) -> BackendResult<()>;

    /// Deletes the record stored under `key`.
    ///
    /// Deleting a key that does not exist is not an error.
    async fn delete_record(&self, table: &str, key: &str) -> BackendResult<()>;
}

/// Errors returned by [`Store`] implementations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// IO errors related to file operations.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors related to de/serialization of records.
    #[error("serde error: {context}")]
    Serde {
        /// What was being de/serialized.
        context: String,
        /// The underlying error.
        #[source]
        cause: serde_json::Error,
    },

    /// The table or key cannot be represented by this store.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// Any other error stemming from a store, which might be specific to that store or to a
    /// certain operation.
    #[error("store error: {context}")]
    Generic {
        /// A description of the failed operation.
        context: String,
        /// The underlying error.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Result type for store operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Rejects keys that cannot be used as a single path component.
pub(crate) fn validate_key(key: &str) -> BackendResult<()> {
    if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\', '\0']) {
        return Err(BackendError::InvalidKey(key.to_owned()));
    }
    Ok(())
}
