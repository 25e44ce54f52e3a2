//! Watch Reconciler
//!
//! Classification of raw store entries into host events, plus the bookkeeping
//! needed to turn a post-compaction listing back into events.

use super::feed::{Feed, ResumableWatch};
use super::{HostChange, WatchEvent};
use crate::keys::last_segment;
use crate::store::{Action, KeyValue, Listing, RawEvent, Revision};
use beacon_core::Host;
use std::collections::{HashMap, VecDeque};
use tracing::warn;

fn decode_host(key: &str, value: &str) -> Option<Host> {
    match serde_json::from_str(value) {
        Ok(host) => Some(host),
        Err(e) => {
            warn!(key = %key, error = %e, "Invalid host JSON, skipping entry");
            None
        }
    }
}

/// Classify one raw watch entry.
///
/// Returns `None` for entries whose payload cannot be decoded; they are
/// logged and skipped so one bad record never ends a watch.
pub fn classify(event: &RawEvent) -> Option<WatchEvent> {
    let created = match event.action {
        Action::Create => true,
        Action::Set => event.prev_value.is_none(),
        Action::Update => false,
        Action::Delete | Action::Expire => {
            return Some(WatchEvent {
                key: event.key.clone(),
                change: HostChange::Removed {
                    uuid: last_segment(&event.key).to_string(),
                },
                resume_token: event.revision,
            });
        }
    };

    let host = decode_host(&event.key, event.value.as_deref().unwrap_or_default())?;
    let change = if created {
        HostChange::Created(host)
    } else {
        HostChange::Updated(host)
    };

    Some(WatchEvent {
        key: event.key.clone(),
        change,
        resume_token: event.revision,
    })
}

/// Reconciled event source for one service prefix
pub(crate) struct Reconciler {
    feed: ResumableWatch,
    /// Last value seen per key, diffed against listings after a compaction
    known: HashMap<String, String>,
    pending: VecDeque<WatchEvent>,
}

impl Reconciler {
    /// `known` is the prefix content at the revision the feed resumes after.
    pub fn new(feed: ResumableWatch, known: &[KeyValue]) -> Self {
        Self {
            feed,
            known: known
                .iter()
                .map(|kv| (kv.key.clone(), kv.value.clone()))
                .collect(),
            pending: VecDeque::new(),
        }
    }

    /// Next event, or `None` once the feed is cancelled.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }

            match self.feed.next().await? {
                Feed::Event(raw) => {
                    self.track(&raw);
                    if let Some(event) = classify(&raw) {
                        return Some(event);
                    }
                }
                Feed::Resync(listing) => self.diff(listing),
            }
        }
    }

    fn track(&mut self, raw: &RawEvent) {
        match (raw.action, &raw.value) {
            (Action::Delete | Action::Expire, _) => {
                self.known.remove(&raw.key);
            }
            (_, Some(value)) => {
                self.known.insert(raw.key.clone(), value.clone());
            }
            (_, None) => {}
        }
    }

    /// Queue the events separating the known content from `listing`.
    fn diff(&mut self, listing: Listing) {
        let revision: Revision = listing.revision;
        let mut current = HashMap::with_capacity(listing.kvs.len());

        for kv in listing.kvs {
            let change = match self.known.get(&kv.key) {
                None => decode_host(&kv.key, &kv.value).map(HostChange::Created),
                Some(previous) if *previous != kv.value => {
                    decode_host(&kv.key, &kv.value).map(HostChange::Updated)
                }
                Some(_) => None,
            };
            if let Some(change) = change {
                self.pending.push_back(WatchEvent {
                    key: kv.key.clone(),
                    change,
                    resume_token: revision,
                });
            }
            current.insert(kv.key, kv.value);
        }

        let mut gone: Vec<&String> = self
            .known
            .keys()
            .filter(|key| !current.contains_key(*key))
            .collect();
        gone.sort();
        for key in gone {
            self.pending.push_back(WatchEvent {
                key: key.clone(),
                change: HostChange::Removed {
                    uuid: last_segment(key).to_string(),
                },
                resume_token: revision,
            });
        }

        self.known = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CoordinationStore, MemoryStore};
    use crate::watch::EventKind;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn host_json(uuid: &str) -> String {
        serde_json::to_string(&Host {
            hostname: "10.0.0.1".to_string(),
            uuid: uuid.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    fn raw(action: Action, value: Option<String>, prev_value: Option<String>) -> RawEvent {
        RawEvent {
            action,
            key: "/services/db/abc-db-1".to_string(),
            value,
            prev_value,
            revision: 7,
        }
    }

    #[test]
    fn test_set_without_previous_value_is_created() {
        let event = classify(&raw(Action::Set, Some(host_json("abc-db-1")), None)).unwrap();
        assert_eq!(event.kind(), EventKind::Created);
        assert_eq!(event.uuid(), "abc-db-1");
        assert_eq!(event.resume_token, 7);
    }

    #[test]
    fn test_set_with_previous_value_is_updated() {
        let json = host_json("abc-db-1");
        let event = classify(&raw(Action::Set, Some(json.clone()), Some(json))).unwrap();
        assert_eq!(event.kind(), EventKind::Updated);

        let event = classify(&raw(Action::Update, Some(host_json("abc-db-1")), None)).unwrap();
        assert_eq!(event.kind(), EventKind::Updated);
    }

    #[test]
    fn test_delete_and_expire_carry_uuid() {
        for action in [Action::Delete, Action::Expire] {
            let event = classify(&raw(action, None, Some(host_json("abc-db-1")))).unwrap();
            assert_eq!(
                event.change,
                HostChange::Removed {
                    uuid: "abc-db-1".to_string()
                }
            );
        }
    }

    #[test]
    fn test_undecodable_payload_is_skipped() {
        assert!(classify(&raw(Action::Create, Some("{not json".to_string()), None)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_emits_difference() {
        let store = MemoryStore::new();
        store.put("/services/db/a", &host_json("a"), None).await.unwrap();
        store.put("/services/db/b", &host_json("b"), None).await.unwrap();
        let listing = store.get("/services/db/", true).await.unwrap();

        store.delete("/services/db/a").await.unwrap();
        store.put("/services/db/c", &host_json("c"), None).await.unwrap();
        store.compact();

        let feed = ResumableWatch::new(
            Arc::new(store.clone()),
            "/services/db/",
            listing.revision,
            Duration::from_secs(1),
            CancellationToken::new(),
        );
        let mut reconciler = Reconciler::new(feed, &listing.kvs);

        let first = reconciler.next().await.unwrap();
        assert_eq!(first.kind(), EventKind::Created);
        assert_eq!(first.uuid(), "c");

        let second = reconciler.next().await.unwrap();
        assert_eq!(second.kind(), EventKind::Removed);
        assert_eq!(second.uuid(), "a");
        assert_eq!(second.resume_token, store.revision());

        store.delete("/services/db/b").await.unwrap();
        let third = reconciler.next().await.unwrap();
        assert_eq!(third.uuid(), "b");
        assert_eq!(third.kind(), EventKind::Removed);
    }
}
