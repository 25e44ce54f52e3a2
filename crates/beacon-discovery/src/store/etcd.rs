//! Etcd Operations
//!
//! etcd v3 implementation of the coordination store: connection with
//! exponential backoff, lease-backed puts and prefix watches.

use super::{Action, CoordinationStore, KeyValue, Listing, RawEvent, Revision, StoreError, WatchStream};
use crate::config::DiscoveryConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use etcd_client::{Client, Event, EventType, GetOptions, PutOptions, WatchOptions};
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Coordination store backed by an etcd v3 cluster
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    endpoints: Vec<String>,
}

impl EtcdStore {
    /// Connect to etcd with exponential backoff
    pub async fn connect(config: &DiscoveryConfig) -> Result<Self> {
        let endpoints = config.etcd_endpoints.clone();
        let backoff = ExponentialBackoff {
            initial_interval: config.etcd_backoff_initial,
            max_interval: config.etcd_backoff_max,
            max_elapsed_time: Some(config.etcd_backoff_max_elapsed),
            multiplier: config.etcd_backoff_multiplier,
            ..Default::default()
        };

        let client = retry(backoff, || async {
            match Client::connect(&endpoints, None).await {
                Ok(client) => {
                    debug!(endpoints = ?endpoints, "Connected to etcd");
                    Ok(client)
                }
                Err(e) => {
                    warn!(error = %e, "etcd connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
        .map_err(|e| anyhow!("Failed to connect to etcd after retries: {:?}", e))?;

        Ok(Self::from_client(client, config.etcd_endpoints.clone()))
    }

    /// Wrap an already connected client
    pub fn from_client(client: Client, endpoints: Vec<String>) -> Self {
        Self { client, endpoints }
    }
}

fn transport(e: etcd_client::Error) -> StoreError {
    StoreError::Transport(e.to_string())
}

/// etcd leases are granted in whole seconds
fn lease_seconds(ttl: Duration) -> i64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1) as i64
}

fn to_raw_event(event: &Event) -> Option<RawEvent> {
    let kv = event.kv()?;
    let key = String::from_utf8_lossy(kv.key()).into_owned();
    let prev_value = event
        .prev_kv()
        .map(|prev| String::from_utf8_lossy(prev.value()).into_owned());

    let (action, value) = match event.event_type() {
        EventType::Put => {
            let action = if kv.version() == 1 {
                Action::Create
            } else {
                Action::Update
            };
            (action, Some(String::from_utf8_lossy(kv.value()).into_owned()))
        }
        // Lease expiry is reported as a plain delete by etcd v3
        EventType::Delete => (Action::Delete, None),
    };

    Some(RawEvent {
        action,
        key,
        value,
        prev_value,
        revision: kv.mod_revision(),
    })
}

struct WatchState {
    _watcher: etcd_client::Watcher,
    stream: etcd_client::WatchStream,
    pending: VecDeque<RawEvent>,
    requested: Revision,
    done: bool,
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn put(
        &self,
        key: &str,
        value: &str,
        lease_ttl: Option<Duration>,
    ) -> Result<Revision, StoreError> {
        let mut client = self.client.clone();

        // A fresh lease per write: the previous one expires on its own once
        // the key has moved to the new lease.
        let options = match lease_ttl {
            Some(ttl) => {
                let lease = client
                    .lease_grant(lease_seconds(ttl), None)
                    .await
                    .map_err(transport)?;
                trace!(key = %key, lease_id = lease.id(), ttl = lease.ttl(), "Lease granted");
                Some(PutOptions::new().with_lease(lease.id()))
            }
            None => None,
        };

        let resp = client.put(key, value, options).await.map_err(transport)?;
        Ok(resp.header().map(|h| h.revision()).unwrap_or_default())
    }

    async fn get(&self, key: &str, recursive: bool) -> Result<Listing, StoreError> {
        let mut client = self.client.clone();
        let options = recursive.then(|| GetOptions::new().with_prefix());

        let resp = client.get(key, options).await.map_err(transport)?;
        let revision = resp.header().map(|h| h.revision()).unwrap_or_default();

        if resp.kvs().is_empty() {
            return Err(StoreError::NotFound {
                key: key.to_string(),
                revision,
            });
        }

        let kvs = resp
            .kvs()
            .iter()
            .map(|kv| KeyValue {
                key: String::from_utf8_lossy(kv.key()).into_owned(),
                value: String::from_utf8_lossy(kv.value()).into_owned(),
                mod_revision: kv.mod_revision(),
            })
            .collect();

        Ok(Listing { kvs, revision })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut client = self.client.clone();
        let resp = client.delete(key, None).await.map_err(transport)?;

        if resp.deleted() == 0 {
            return Err(StoreError::NotFound {
                key: key.to_string(),
                revision: resp.header().map(|h| h.revision()).unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: Revision,
    ) -> Result<WatchStream, StoreError> {
        let mut client = self.client.clone();

        let mut options = WatchOptions::new().with_prefix().with_prev_key();
        if from_revision > 0 {
            options = options.with_start_revision(from_revision);
        }

        let (watcher, stream) = client
            .watch(prefix, Some(options))
            .await
            .map_err(transport)?;
        debug!(prefix = %prefix, from_revision = from_revision, "Watch stream established");

        let state = WatchState {
            _watcher: watcher,
            stream,
            pending: VecDeque::new(),
            requested: from_revision,
            done: false,
        };

        let events = stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((Ok(event), state));
                }
                if state.done {
                    return None;
                }

                match state.stream.message().await {
                    Ok(Some(resp)) => {
                        if resp.canceled() {
                            state.done = true;
                            let err = if resp.compact_revision() > 0 {
                                StoreError::Compacted {
                                    requested: state.requested,
                                    oldest: resp.compact_revision(),
                                }
                            } else {
                                StoreError::Transport(format!(
                                    "watch canceled: {}",
                                    resp.cancel_reason()
                                ))
                            };
                            return Some((Err(err), state));
                        }

                        state
                            .pending
                            .extend(resp.events().iter().filter_map(to_raw_event));
                    }
                    Ok(None) => return None,
                    Err(e) => {
                        state.done = true;
                        return Some((Err(transport(e)), state));
                    }
                }
            }
        });

        Ok(events.boxed())
    }

    fn endpoints(&self) -> Vec<String> {
        self.endpoints.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_seconds_rounds_up() {
        assert_eq!(lease_seconds(Duration::from_secs(5)), 5);
        assert_eq!(lease_seconds(Duration::from_millis(4500)), 5);
        assert_eq!(lease_seconds(Duration::from_millis(10)), 1);
        assert_eq!(lease_seconds(Duration::ZERO), 1);
    }
}
