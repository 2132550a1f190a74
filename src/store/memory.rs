use super::{IdentityRecord, IdentityStore, StoreError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Process-local store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, IdentityRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn get(&self, address: &str) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.records.read().await.get(address).cloned())
    }

    async fn put(&self, address: &str, record: IdentityRecord) -> Result<(), StoreError> {
        self.records.write().await.insert(address.to_string(), record);
        Ok(())
    }

    async fn put_if_absent(
        &self,
        address: &str,
        record: IdentityRecord,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(address) {
            return Ok(false);
        }
        records.insert(address.to_string(), record);
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_if_absent_only_writes_once() {
        let store = MemoryStore::new();
        assert!(store
            .put_if_absent("a@x.test", IdentityRecord::reserved())
            .await
            .unwrap());
        assert!(!store
            .put_if_absent("a@x.test", IdentityRecord::token_received("t"))
            .await
            .unwrap());

        let record = store.get("a@x.test").await.unwrap().unwrap();
        assert_eq!(record.token(), None);
    }

    #[tokio::test]
    async fn test_concurrent_conditional_puts_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .put_if_absent("same@x.test", IdentityRecord::reserved())
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let store = MemoryStore::new();
        store.put("b@x.test", IdentityRecord::reserved()).await.unwrap();
        store.put("a@x.test", IdentityRecord::reserved()).await.unwrap();
        assert_eq!(store.list().await.unwrap(), vec!["a@x.test", "b@x.test"]);
        assert!(store.get("c@x.test").await.unwrap().is_none());
    }
}
