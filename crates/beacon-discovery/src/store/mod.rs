//! Coordination Store
//!
//! The narrow surface the rest of the crate needs from a KV store that
//! already provides leases and ordered, resumable watch streams:
//! - `etcd`: etcd v3 adapter
//! - `memory`: in-process store used by tests and local development
//! - `mirrored`: fans writes out to two backends during a storage migration

mod etcd;
mod memory;
mod mirrored;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;
pub use mirrored::MirroredStore;

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use thiserror::Error;

/// Store revision, also used as a watch resume token.
pub type Revision = i64;

/// Kind of change carried by a raw watch entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    /// Write without create/update distinction; `prev_value` tells them apart
    Set,
    Update,
    Delete,
    Expire,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    pub mod_revision: Revision,
}

/// Result of a read, with the store revision the read was served at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub kvs: Vec<KeyValue>,
    pub revision: Revision,
}

impl Listing {
    pub fn empty(revision: Revision) -> Self {
        Self {
            kvs: Vec::new(),
            revision,
        }
    }
}

/// One entry of a watch stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub action: Action,
    pub key: String,
    pub value: Option<String>,
    pub prev_value: Option<String>,
    /// Revision of the change; resuming at `revision + 1` skips it
    pub revision: Revision,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("key not found: {key}")]
    NotFound { key: String, revision: Revision },

    #[error("revision {requested} has been compacted, oldest available is {oldest}")]
    Compacted { requested: Revision, oldest: Revision },

    #[error("store transport error: {0}")]
    Transport(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type WatchStream = BoxStream<'static, Result<RawEvent, StoreError>>;

/// Store primitives consumed by registration, watches and resolution.
///
/// Implementations are shared as `Arc<dyn CoordinationStore>` by every
/// registration and resolver of a process and must accept concurrent calls.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Write `value`, attached to a lease of `lease_ttl` when given.
    async fn put(
        &self,
        key: &str,
        value: &str,
        lease_ttl: Option<Duration>,
    ) -> Result<Revision, StoreError>;

    /// Read `key`, or every key under it when `recursive`.
    /// Returns [`StoreError::NotFound`] when nothing matches.
    async fn get(&self, key: &str, recursive: bool) -> Result<Listing, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Stream changes under `prefix` starting at `from_revision` inclusive.
    /// A non-positive revision starts from the next change.
    async fn watch(&self, prefix: &str, from_revision: Revision)
        -> Result<WatchStream, StoreError>;

    /// Endpoints, for log lines
    fn endpoints(&self) -> Vec<String> {
        Vec::new()
    }
}
