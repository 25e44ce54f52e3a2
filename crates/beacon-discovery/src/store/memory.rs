//! In-process coordination store
//!
//! Revisioned, TTL-aware and watchable, with a bounded history so watches can
//! be resumed from a past revision. Writes are reported as [`Action::Set`]
//! with the previous value attached, expired keys as [`Action::Expire`].
//! Tests can switch the store offline and force a compaction.

use super::{
    Action, CoordinationStore, KeyValue, Listing, RawEvent, Revision, StoreError, WatchStream,
};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

const DEFAULT_HISTORY_LIMIT: usize = 1024;
const REAP_INTERVAL: Duration = Duration::from_millis(100);

type EventSender = mpsc::UnboundedSender<Result<RawEvent, StoreError>>;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    mod_revision: Revision,
    expires_at: Option<Instant>,
}

struct Watcher {
    prefix: String,
    tx: EventSender,
}

struct State {
    revision: Revision,
    entries: BTreeMap<String, Entry>,
    history: VecDeque<RawEvent>,
    history_limit: usize,
    /// Every revision up to this one has left the history
    compacted: Revision,
    watchers: Vec<Watcher>,
    available: bool,
    writes: HashMap<String, usize>,
}

impl State {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.available {
            Ok(())
        } else {
            Err(StoreError::Transport("store unavailable".to_string()))
        }
    }

    fn record(&mut self, event: RawEvent) {
        self.watchers.retain(|w| {
            if w.tx.is_closed() {
                return false;
            }
            !event.key.starts_with(&w.prefix) || w.tx.send(Ok(event.clone())).is_ok()
        });
        self.history.push_back(event);
        while self.history.len() > self.history_limit {
            if let Some(dropped) = self.history.pop_front() {
                self.compacted = dropped.revision;
            }
        }
    }

    fn expire(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at.is_some_and(|at| at <= now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if let Some(entry) = self.entries.remove(&key) {
                self.revision += 1;
                let event = RawEvent {
                    action: Action::Expire,
                    key,
                    value: None,
                    prev_value: Some(entry.value),
                    revision: self.revision,
                };
                self.record(event);
            }
        }
    }
}

/// Coordination store living in the current process
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Keep at most `limit` events for watch replay; older revisions are
    /// reported as compacted.
    pub fn with_history_limit(limit: usize) -> Self {
        let state = Arc::new(Mutex::new(State {
            revision: 0,
            entries: BTreeMap::new(),
            history: VecDeque::new(),
            history_limit: limit.max(1),
            compacted: 0,
            watchers: Vec::new(),
            available: true,
            writes: HashMap::new(),
        }));

        // Expired keys are also swept on every access; the reaper only makes
        // watchers see expirations without other traffic.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(reap(Arc::downgrade(&state)));
        }

        Self { state }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the store offline (every call fails, open watches are cut) or
    /// bring it back.
    pub fn set_available(&self, available: bool) {
        let mut state = self.lock();
        state.available = available;
        if !available {
            for watcher in state.watchers.drain(..) {
                let _ = watcher
                    .tx
                    .send(Err(StoreError::Transport("store unavailable".to_string())));
            }
        }
    }

    /// Drop the whole watch history; resuming before the current revision
    /// then fails with [`StoreError::Compacted`].
    pub fn compact(&self) {
        let mut state = self.lock();
        state.history.clear();
        state.compacted = state.revision;
        let oldest = state.compacted + 1;
        for watcher in state.watchers.drain(..) {
            let _ = watcher.tx.send(Err(StoreError::Compacted {
                requested: 0,
                oldest,
            }));
        }
    }

    pub fn revision(&self) -> Revision {
        self.lock().revision
    }

    /// Number of open watches
    pub fn watcher_count(&self) -> usize {
        self.lock().watchers.len()
    }

    /// Number of successful writes to `key` since the store was created
    pub fn writes_to(&self, key: &str) -> usize {
        self.lock().writes.get(key).copied().unwrap_or(0)
    }
}

async fn reap(state: Weak<Mutex<State>>) {
    loop {
        tokio::time::sleep(REAP_INTERVAL).await;
        let Some(state) = state.upgrade() else {
            return;
        };
        let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.available {
            state.expire(Instant::now());
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        value: &str,
        lease_ttl: Option<Duration>,
    ) -> Result<Revision, StoreError> {
        let mut state = self.lock();
        state.check_available()?;
        let now = Instant::now();
        state.expire(now);

        state.revision += 1;
        let revision = state.revision;
        let previous = state.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                mod_revision: revision,
                expires_at: lease_ttl.map(|ttl| now + ttl),
            },
        );
        *state.writes.entry(key.to_string()).or_default() += 1;

        state.record(RawEvent {
            action: Action::Set,
            key: key.to_string(),
            value: Some(value.to_string()),
            prev_value: previous.map(|entry| entry.value),
            revision,
        });
        Ok(revision)
    }

    async fn get(&self, key: &str, recursive: bool) -> Result<Listing, StoreError> {
        let mut state = self.lock();
        state.check_available()?;
        state.expire(Instant::now());

        let kvs: Vec<KeyValue> = state
            .entries
            .range(key.to_string()..)
            .take_while(|(k, _)| if recursive { k.starts_with(key) } else { k.as_str() == key })
            .map(|(k, entry)| KeyValue {
                key: k.clone(),
                value: entry.value.clone(),
                mod_revision: entry.mod_revision,
            })
            .collect();

        if kvs.is_empty() {
            return Err(StoreError::NotFound {
                key: key.to_string(),
                revision: state.revision,
            });
        }
        Ok(Listing {
            kvs,
            revision: state.revision,
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_available()?;
        state.expire(Instant::now());

        let Some(entry) = state.entries.remove(key) else {
            return Err(StoreError::NotFound {
                key: key.to_string(),
                revision: state.revision,
            });
        };

        state.revision += 1;
        let revision = state.revision;
        state.record(RawEvent {
            action: Action::Delete,
            key: key.to_string(),
            value: None,
            prev_value: Some(entry.value),
            revision,
        });
        Ok(())
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: Revision,
    ) -> Result<WatchStream, StoreError> {
        let mut state = self.lock();
        state.check_available()?;
        state.expire(Instant::now());

        let from = if from_revision > 0 {
            from_revision
        } else {
            state.revision + 1
        };
        if from <= state.compacted {
            return Err(StoreError::Compacted {
                requested: from,
                oldest: state.compacted + 1,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        for event in state
            .history
            .iter()
            .filter(|e| e.revision >= from && e.key.starts_with(prefix))
        {
            let _ = tx.send(Ok(event.clone()));
        }
        state.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });

        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(events.boxed())
    }
}
