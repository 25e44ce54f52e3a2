//! Writes to two backends, reads from both
//!
//! Used while hosts migrate from one storage generation to another: every
//! write lands on both backends, reads concatenate both (primary first) and
//! watches follow the primary. A host present in both shows up twice in a
//! listing; the resolver deduplicates by UUID.

use super::{CoordinationStore, Listing, Revision, StoreError, WatchStream};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct MirroredStore {
    primary: Arc<dyn CoordinationStore>,
    secondary: Arc<dyn CoordinationStore>,
}

impl MirroredStore {
    pub fn new(primary: Arc<dyn CoordinationStore>, secondary: Arc<dyn CoordinationStore>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl CoordinationStore for MirroredStore {
    /// Returns the primary revision, which is what watches resume from.
    async fn put(
        &self,
        key: &str,
        value: &str,
        lease_ttl: Option<Duration>,
    ) -> Result<Revision, StoreError> {
        let revision = self.primary.put(key, value, lease_ttl).await?;
        self.secondary.put(key, value, lease_ttl).await?;
        Ok(revision)
    }

    async fn get(&self, key: &str, recursive: bool) -> Result<Listing, StoreError> {
        let primary = self.primary.get(key, recursive).await;
        let secondary = self.secondary.get(key, recursive).await;

        match (primary, secondary) {
            (Ok(mut listing), Ok(other)) => {
                listing.kvs.extend(other.kvs);
                Ok(listing)
            }
            (Ok(listing), Err(e)) if e.is_not_found() => Ok(listing),
            (Err(StoreError::NotFound { revision, .. }), Ok(other)) => Ok(Listing {
                kvs: other.kvs,
                revision,
            }),
            (Err(e), _) => Err(e),
            (_, Err(e)) => Err(e),
        }
    }

    /// A key missing from one backend only is still a successful delete.
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let primary = self.primary.delete(key).await;
        let secondary = self.secondary.delete(key).await;

        match (primary, secondary) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) | (Err(e), Ok(())) if e.is_not_found() => Ok(()),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: Revision,
    ) -> Result<WatchStream, StoreError> {
        self.primary.watch(prefix, from_revision).await
    }

    fn endpoints(&self) -> Vec<String> {
        let mut endpoints = self.primary.endpoints();
        endpoints.extend(self.secondary.endpoints());
        endpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn mirrored() -> (MirroredStore, MemoryStore, MemoryStore) {
        let primary = MemoryStore::new();
        let secondary = MemoryStore::new();
        let store = MirroredStore::new(Arc::new(primary.clone()), Arc::new(secondary.clone()));
        (store, primary, secondary)
    }

    #[tokio::test]
    async fn test_writes_fan_out() {
        let (store, primary, secondary) = mirrored();
        store.put("/services/db/a", "1", None).await.unwrap();

        assert!(primary.get("/services/db/a", false).await.is_ok());
        assert!(secondary.get("/services/db/a", false).await.is_ok());

        let listing = store.get("/services/db/", true).await.unwrap();
        assert_eq!(listing.kvs.len(), 2);
    }

    #[tokio::test]
    async fn test_reads_tolerate_one_empty_backend() {
        let (store, _primary, secondary) = mirrored();
        secondary.put("/services/db/legacy", "1", None).await.unwrap();

        let listing = store.get("/services/db/", true).await.unwrap();
        assert_eq!(listing.kvs.len(), 1);
        assert_eq!(listing.kvs[0].key, "/services/db/legacy");

        store.delete("/services/db/legacy").await.unwrap();
        assert!(store
            .get("/services/db/", true)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_transport_errors_surface() {
        let (store, _primary, secondary) = mirrored();
        secondary.set_available(false);
        assert!(matches!(
            store.put("/services/db/a", "1", None).await,
            Err(StoreError::Transport(_))
        ));
        assert!(matches!(
            store.get("/services/db/", true).await,
            Err(StoreError::Transport(_))
        ));
    }
}
