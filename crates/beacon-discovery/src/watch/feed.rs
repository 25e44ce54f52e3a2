//! Resumable raw watch
//!
//! Wraps a store watch so that interruptions are invisible to consumers: every
//! (re)open starts at the last observed revision + 1, transport failures are
//! retried after a fixed delay, and a compacted resume point is replaced by a
//! full listing of the prefix.

use crate::observability::{events, metrics};
use crate::store::{CoordinationStore, Listing, RawEvent, Revision, StoreError, WatchStream};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Item produced by a [`ResumableWatch`]
#[derive(Debug)]
pub(crate) enum Feed {
    Event(RawEvent),
    /// The resume point was compacted; this is the current content of the
    /// prefix and the stream continues after its revision.
    Resync(Listing),
}

/// Current content of `key` (recursively when `recursive`); nothing stored
/// is an empty listing at the store revision.
pub(crate) async fn snapshot(
    store: &dyn CoordinationStore,
    key: &str,
    recursive: bool,
) -> Result<Listing, StoreError> {
    match store.get(key, recursive).await {
        Ok(listing) => Ok(listing),
        Err(StoreError::NotFound { revision, .. }) => Ok(Listing::empty(revision)),
        Err(e) => Err(e),
    }
}

pub(crate) struct ResumableWatch {
    store: Arc<dyn CoordinationStore>,
    prefix: String,
    last: Revision,
    stream: Option<WatchStream>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
    interrupted: bool,
    needs_resync: bool,
}

impl ResumableWatch {
    /// Watch `prefix` for changes after revision `last`.
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        prefix: impl Into<String>,
        last: Revision,
        reconnect_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            last,
            stream: None,
            reconnect_delay,
            cancel,
            interrupted: false,
            needs_resync: false,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Next change, or `None` once cancelled.
    pub async fn next(&mut self) -> Option<Feed> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            if self.needs_resync {
                let listing = tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    listing = snapshot(self.store.as_ref(), &self.prefix, true) => listing,
                };
                match listing {
                    Ok(listing) => {
                        self.needs_resync = false;
                        self.last = listing.revision;
                        events::watch_resynced(&self.prefix, listing.revision, listing.kvs.len());
                        return Some(Feed::Resync(listing));
                    }
                    Err(e) => {
                        self.interrupt(&e.to_string()).await?;
                        continue;
                    }
                }
            }

            if self.stream.is_none() {
                let from = self.last + 1;
                let opened = tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    opened = self.store.watch(&self.prefix, from) => opened,
                };
                match opened {
                    Ok(stream) => {
                        if self.interrupted {
                            self.interrupted = false;
                            events::watch_recovered(&self.prefix, from);
                            metrics::record_watch_reconnect(&self.prefix);
                        }
                        debug!(prefix = %self.prefix, from_revision = from, "Watch opened");
                        self.stream = Some(stream);
                    }
                    Err(StoreError::Compacted { oldest, .. }) => {
                        debug!(prefix = %self.prefix, from_revision = from, oldest = oldest, "Resume point compacted");
                        self.needs_resync = true;
                        continue;
                    }
                    Err(e) => {
                        self.interrupt(&e.to_string()).await?;
                        continue;
                    }
                }
            }

            let Some(stream) = self.stream.as_mut() else {
                continue;
            };
            let item = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(event)) => {
                    self.last = self.last.max(event.revision);
                    return Some(Feed::Event(event));
                }
                Some(Err(StoreError::Compacted { .. })) => {
                    self.stream = None;
                    self.needs_resync = true;
                }
                Some(Err(e)) => {
                    self.stream = None;
                    self.interrupt(&e.to_string()).await?;
                }
                None => {
                    self.stream = None;
                    self.interrupt("watch stream closed").await?;
                }
            }
        }
    }

    /// Log the interruption and wait before the next attempt. `None` when
    /// cancelled while waiting.
    async fn interrupt(&mut self, error: &str) -> Option<()> {
        if !self.interrupted {
            self.interrupted = true;
            events::watch_lost(&self.prefix, error, &self.store.endpoints());
        } else {
            debug!(prefix = %self.prefix, error = %error, "Watch still unavailable");
        }

        tokio::select! {
            _ = self.cancel.cancelled() => None,
            _ = tokio::time::sleep(self.reconnect_delay) => Some(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Action, MemoryStore};

    fn feed(store: &MemoryStore, last: Revision) -> ResumableWatch {
        ResumableWatch::new(
            Arc::new(store.clone()),
            "/services/db/",
            last,
            Duration::from_secs(1),
            CancellationToken::new(),
        )
    }

    fn expect_event(item: Option<Feed>) -> RawEvent {
        match item {
            Some(Feed::Event(event)) => event,
            other => panic!("expected an event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resumes_after_interruption_without_loss() {
        let store = MemoryStore::new();
        let mut watch = feed(&store, store.revision());

        store.put("/services/db/a", "1", None).await.unwrap();
        assert_eq!(expect_event(watch.next().await).key, "/services/db/a");

        store.set_available(false);
        store.set_available(true);
        store.put("/services/db/b", "1", None).await.unwrap();

        let event = expect_event(watch.next().await);
        assert_eq!(event.key, "/services/db/b");
        assert_eq!(event.action, Action::Set);
    }

    #[tokio::test(start_paused = true)]
    async fn test_compacted_resume_point_resyncs() {
        let store = MemoryStore::new();
        store.put("/services/db/a", "1", None).await.unwrap();
        store.put("/services/db/b", "1", None).await.unwrap();
        store.compact();

        let mut watch = feed(&store, 0);
        match watch.next().await {
            Some(Feed::Resync(listing)) => {
                assert_eq!(listing.kvs.len(), 2);
                assert_eq!(listing.revision, store.revision());
            }
            other => panic!("expected a resync, got {other:?}"),
        }

        store.delete("/services/db/a").await.unwrap();
        let event = expect_event(watch.next().await);
        assert_eq!(event.action, Action::Delete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_ends_feed() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        let mut watch = ResumableWatch::new(
            Arc::new(store.clone()),
            "/services/db/",
            0,
            Duration::from_secs(1),
            cancel.clone(),
        );

        store.set_available(false);
        cancel.cancel();
        assert!(watch.next().await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_of_missing_prefix_is_empty() {
        let store = MemoryStore::new();
        store.put("/services/other/a", "1", None).await.unwrap();

        let listing = snapshot(&store, "/services/db/", true).await.unwrap();
        assert!(listing.kvs.is_empty());
        assert_eq!(listing.revision, 1);
    }
}
