use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{BackendError, BackendResult, Store, WorkRecord, validate_key};

/// A direct [`Store`] keeping one JSON file per record.
///
/// Records live at `<root>/<table>/<key>.json`. Writes go to a temporary file which is renamed
/// into place, so concurrent readers never observe a partially written record.
#[derive(Debug)]
pub struct LocalFsStore {
    path: PathBuf,
}

impl LocalFsStore {
    /// Creates a store rooted at the given directory. The directory is created on first write.
    pub fn new(path: &Path) -> Self {
        Self { path: path.into() }
    }

    fn record_path(&self, table: &str, key: &str) -> BackendResult<PathBuf> {
        validate_key(table)?;
        validate_key(key)?;
        Ok(self.path.join(table).join(format!("{key}.json")))
    }
}

#[async_trait::async_trait]
impl Store for LocalFsStore {
    fn name(&self) -> &'static str {
        "local-fs"
    }

    async fn get_record(&self, table: &str, key: &str) -> BackendResult<Option<WorkRecord>> {
        let path = self.record_path(table, key)?;
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let record = serde_json::from_slice(&contents).map_err(|cause| BackendError::Serde {
            context: format!("failed to parse record at {}", path.display()),
            cause,
        })?;
        Ok(Some(record))
    }

    async fn put_record(&self, table: &str, record: &WorkRecord) -> BackendResult<()> {
        let path = self.record_path(table, &record.name)?;
        let contents = serde_json::to_vec(record).map_err(|cause| BackendError::Serde {
            context: "failed to serialize record".to_owned(),
            cause,
        })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension(format!("json.{}.tmp", Uuid::new_v4().simple()));
        let written = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&contents).await?;
            file.sync_data().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(err) = written {
            match tokio::fs::remove_file(&tmp_path).await {
                Ok(()) => {}
                Err(cleanup) if cleanup.kind() == ErrorKind::NotFound => {}
                Err(cleanup) => tracing::warn!(
                    path = %tmp_path.display(),
                    error = &cleanup as &dyn std::error::Error,
                    "could not remove temporary file"
                ),
            }
            return Err(err.into());
        }

        Ok(())
    }

    async fn delete_record(&self, table: &str, key: &str) -> BackendResult<()> {
        let path = self.record_path(table, key)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = LocalFsStore::new(tempdir.path());

        let record = WorkRecord::new("Direct worker 0");
        store.put_record("bench", &record).await.unwrap();
        assert!(tempdir.path().join("bench/Direct worker 0.json").exists());

        let stored = store.get_record("bench", "Direct worker 0").await.unwrap();
        assert_eq!(stored, Some(record));

        store.delete_record("bench", "Direct worker 0").await.unwrap();
        let stored = store.get_record("bench", "Direct worker 0").await.unwrap();
        assert_eq!(stored, None);
    }

    #[tokio::test]
    async fn put_overwrites() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = LocalFsStore::new(tempdir.path());

        store.put_record("bench", &WorkRecord::new("w")).await.unwrap();
        let second = WorkRecord::new("w");
        store.put_record("bench", &second).await.unwrap();

        let stored = store.get_record("bench", "w").await.unwrap();
        assert_eq!(stored, Some(second));

        // only the record itself remains, no temporary files
        let entries = std::fs::read_dir(tempdir.path().join("bench")).unwrap();
        assert_eq!(entries.count(), 1);
    }

    #[tokio::test]
    async fn failed_put_removes_temporary_file() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = LocalFsStore::new(tempdir.path());

        // a non-empty directory in place of the record makes the rename fail
        let blocker = tempdir.path().join("bench/w.json");
        std::fs::create_dir_all(blocker.join("occupied")).unwrap();

        for _ in 0..3 {
            let result = store.put_record("bench", &WorkRecord::new("w")).await;
            assert!(result.is_err());
        }

        let entries: Vec<_> = std::fs::read_dir(tempdir.path().join("bench"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, ["w.json"]);
    }

    #[tokio::test]
    async fn missing_records() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = LocalFsStore::new(tempdir.path());

        assert_eq!(store.get_record("bench", "nope").await.unwrap(), None);
        store.delete_record("bench", "nope").await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_record() {
        let tempdir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tempdir.path().join("bench")).unwrap();
        std::fs::write(tempdir.path().join("bench/w.json"), b"not json").unwrap();

        let store = LocalFsStore::new(tempdir.path());
        let err = store.get_record("bench", "w").await.unwrap_err();
        assert!(matches!(err, BackendError::Serde { .. }));
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let tempdir = tempfile::tempdir().unwrap();
        let store = LocalFsStore::new(tempdir.path());

        let err = store.get_record("..", "w").await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidKey(_)));

        let err = store
            .put_record("bench", &WorkRecord::new("../escape"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidKey(_)));
    }
}
