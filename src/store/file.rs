use super::{IdentityRecord, IdentityStore, StoreError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// A value as found on disk: either a current record or an old bare string.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Record(IdentityRecord),
    Legacy(String),
}

/// JSON file holding the whole `{address -> record}` map.
///
/// The map is kept in memory behind a mutex and the file is rewritten
/// (temp file + rename) on every change while the mutex is held.
pub struct FileStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, IdentityRecord>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                let raw: BTreeMap<String, StoredValue> = serde_json::from_str(&content)?;
                raw.into_iter()
                    .map(|(address, value)| {
                        let record = match value {
                            StoredValue::Record(record) => record,
                            StoredValue::Legacy(value) => IdentityRecord::from_legacy(&value),
                        };
                        (address, record)
                    })
                    .collect()
            }
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            BTreeMap::new()
        };

        log::info!(
            "Opened identity store {} ({} identities)",
            path.display(),
            records.len()
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    async fn persist(&self, records: &BTreeMap<String, IdentityRecord>) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(records)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for FileStore {
    async fn get(&self, address: &str) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.records.lock().await.get(address).cloned())
    }

    async fn put(&self, address: &str, record: IdentityRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let previous = records.insert(address.to_string(), record);
        if let Err(e) = self.persist(&records).await {
            // Keep memory and disk in agreement
            match previous {
                Some(previous) => records.insert(address.to_string(), previous),
                None => records.remove(address),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn put_if_absent(
        &self,
        address: &str,
        record: IdentityRecord,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        if records.contains_key(address) {
            return Ok(false);
        }
        records.insert(address.to_string(), record);
        if let Err(e) = self.persist(&records).await {
            records.remove(address);
            return Err(e);
        }
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.lock().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IdentityStatus;

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identities.json");

        {
            let store = FileStore::open(&path).unwrap();
            store
                .put("one@transitrid.ing", IdentityRecord::reserved())
                .await
                .unwrap();
            store
                .put("two@transitrid.ing", IdentityRecord::token_received("T-2"))
                .await
                .unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(
            store.list().await.unwrap(),
            vec!["one@transitrid.ing", "two@transitrid.ing"]
        );
        let two = store.get("two@transitrid.ing").await.unwrap().unwrap();
        assert_eq!(two.token(), Some("T-2"));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_legacy_file_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.json");
        std::fs::write(
            &path,
            r#"{"a@transitrid.ing": "null", "b@transitrid.ing": "abc-def-123"}"#,
        )
        .unwrap();

        let store = FileStore::open(&path).unwrap();
        let a = store.get("a@transitrid.ing").await.unwrap().unwrap();
        assert_eq!(a.status, IdentityStatus::Reserved);
        let b = store.get("b@transitrid.ing").await.unwrap().unwrap();
        assert_eq!(b.token(), Some("abc-def-123"));
    }

    #[tokio::test]
    async fn test_put_if_absent_persists_only_new_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.json");
        let store = FileStore::open(&path).unwrap();

        assert!(store
            .put_if_absent("x@transitrid.ing", IdentityRecord::token_received("keep"))
            .await
            .unwrap());
        assert!(!store
            .put_if_absent("x@transitrid.ing", IdentityRecord::reserved())
            .await
            .unwrap());

        let reopened = FileStore::open(&path).unwrap();
        let x = reopened.get("x@transitrid.ing").await.unwrap().unwrap();
        assert_eq!(x.token(), Some("keep"));
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identities.json");
        std::fs::write(&path, "[not a map").unwrap();
        assert!(matches!(FileStore::open(&path), Err(StoreError::Corrupt(_))));
    }
}
