//! Consumer views over the reconciled host events of one service.

use super::feed::{snapshot, ResumableWatch};
use super::reconciler::Reconciler;
use super::{HostChange, WatchEvent};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::keys::service_hosts_prefix;
use crate::observability::metrics;
use crate::store::{CoordinationStore, KeyValue, Revision};
use beacon_core::Host;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Opens watches on the hosts of a service.
///
/// Every subscription is an independent watch with its own resume token.
#[derive(Clone)]
pub struct Subscriber {
    store: Arc<dyn CoordinationStore>,
    reconnect_delay: Duration,
    buffer: usize,
}

impl Subscriber {
    pub fn new(store: Arc<dyn CoordinationStore>, config: &DiscoveryConfig) -> Self {
        Self {
            store,
            reconnect_delay: config.watch_reconnect_delay,
            buffer: config.subscription_buffer,
        }
    }

    /// Every change of the hosts of `service`, starting now.
    pub async fn subscribe(&self, service: &str) -> Result<Subscription<WatchEvent>> {
        self.open(service, None, Some).await
    }

    /// Hosts joining `service`.
    pub async fn subscribe_new(&self, service: &str) -> Result<Subscription<Host>> {
        self.open(service, None, |event| match event.change {
            HostChange::Created(host) => Some(host),
            _ => None,
        })
        .await
    }

    /// Hosts of `service` rewriting their record.
    pub async fn subscribe_update(&self, service: &str) -> Result<Subscription<Host>> {
        self.open(service, None, |event| match event.change {
            HostChange::Updated(host) => Some(host),
            _ => None,
        })
        .await
    }

    /// UUIDs of hosts leaving `service`.
    pub async fn subscribe_down(&self, service: &str) -> Result<Subscription<String>> {
        self.open(service, None, |event| match event.change {
            HostChange::Removed { uuid } => Some(uuid),
            _ => None,
        })
        .await
    }

    /// Every change after the one that carried `resume_token`.
    pub async fn subscribe_from(
        &self,
        service: &str,
        resume_token: Revision,
    ) -> Result<Subscription<WatchEvent>> {
        self.open(service, Some(resume_token), Some).await
    }

    async fn open<T: Send + 'static>(
        &self,
        service: &str,
        resume_token: Option<Revision>,
        map: fn(WatchEvent) -> Option<T>,
    ) -> Result<Subscription<T>> {
        if service.is_empty() {
            return Err(DiscoveryError::InvalidArgument(
                "service name must not be empty".to_string(),
            ));
        }

        let prefix = service_hosts_prefix(service);
        // Without a token, the current hosts are the baseline and are not
        // announced.
        let (last, known): (Revision, Vec<KeyValue>) = match resume_token {
            Some(token) => (token, Vec::new()),
            None => {
                let listing = snapshot(self.store.as_ref(), &prefix, true).await?;
                (listing.revision, listing.kvs)
            }
        };

        let cancel = CancellationToken::new();
        let feed = ResumableWatch::new(
            self.store.clone(),
            prefix,
            last,
            self.reconnect_delay,
            cancel.clone(),
        );
        let mut reconciler = Reconciler::new(feed, &known);
        let (tx, rx) = mpsc::channel(self.buffer);

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = reconciler.next().await {
                metrics::record_watch_event(event.kind().as_str());
                let Some(item) = map(event) else {
                    continue;
                };
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    sent = tx.send(item) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!("Subscription ended");
        });

        Ok(Subscription {
            rx,
            cancel,
            task: Some(task),
        })
    }
}

/// Stream of items from one watch. Dropping it stops the watch.
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl<T> Subscription<T> {
    /// Next item, `None` after [`Subscription::stop`].
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Stop the watch and wait for its task.
    pub async fn stop(mut self) -> Result<()> {
        self.cancel.cancel();
        self.rx.close();
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| DiscoveryError::Task(e.to_string()))?;
        }
        Ok(())
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::host_key;
    use crate::store::MemoryStore;
    use crate::watch::EventKind;
    use futures::StreamExt;

    fn host(uuid: &str) -> Host {
        Host {
            hostname: "10.0.0.1".to_string(),
            service_name: "db".to_string(),
            uuid: uuid.to_string(),
            ..Default::default()
        }
    }

    async fn put_host(store: &MemoryStore, host: &Host) {
        let json = serde_json::to_string(host).unwrap();
        store
            .put(&host_key("db", &host.uuid), &json, None)
            .await
            .unwrap();
    }

    fn subscriber(store: &MemoryStore) -> Subscriber {
        Subscriber::new(Arc::new(store.clone()), &DiscoveryConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_new_skips_existing_hosts() {
        let store = MemoryStore::new();
        put_host(&store, &host("existing")).await;

        let mut joined = subscriber(&store).subscribe_new("db").await.unwrap();
        put_host(&store, &host("fresh")).await;

        assert_eq!(joined.recv().await.unwrap().uuid, "fresh");
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_down_and_update() {
        let store = MemoryStore::new();
        let subscriber = subscriber(&store);
        put_host(&store, &host("a")).await;

        let mut updated = subscriber.subscribe_update("db").await.unwrap();
        let mut gone = subscriber.subscribe_down("db").await.unwrap();

        let mut changed = host("a");
        changed.user = "admin".to_string();
        put_host(&store, &changed).await;
        store.delete(&host_key("db", "a")).await.unwrap();

        assert_eq!(updated.recv().await.unwrap().user, "admin");
        assert_eq!(gone.recv().await.unwrap(), "a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_from_token_replays_later_changes() {
        let store = MemoryStore::new();
        let subscriber = subscriber(&store);

        let mut all = subscriber.subscribe("db").await.unwrap();
        put_host(&store, &host("a")).await;
        put_host(&store, &host("b")).await;

        let first = all.recv().await.unwrap();
        assert_eq!(first.uuid(), "a");
        all.stop().await.unwrap();

        let mut resumed = subscriber
            .subscribe_from("db", first.resume_token)
            .await
            .unwrap();
        let next = resumed.next().await.unwrap();
        assert_eq!(next.uuid(), "b");
        assert_eq!(next.kind(), EventKind::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interruption_and_compaction_are_transparent() {
        let store = MemoryStore::new();
        let mut all = subscriber(&store).subscribe("db").await.unwrap();

        put_host(&store, &host("a")).await;
        assert_eq!(all.recv().await.unwrap().uuid(), "a");

        // Cut the watch, then change the prefix and drop the history while
        // the subscription waits to reconnect.
        store.set_available(false);
        store.set_available(true);
        put_host(&store, &host("b")).await;
        store.delete(&host_key("db", "a")).await.unwrap();
        store.compact();

        let created = all.recv().await.unwrap();
        assert_eq!(created.kind(), EventKind::Created);
        assert_eq!(created.uuid(), "b");

        let removed = all.recv().await.unwrap();
        assert_eq!(removed.kind(), EventKind::Removed);
        assert_eq!(removed.uuid(), "a");

        put_host(&store, &host("c")).await;
        assert_eq!(all.recv().await.unwrap().uuid(), "c");
    }

    #[tokio::test]
    async fn test_empty_service_is_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            subscriber(&store).subscribe("").await,
            Err(DiscoveryError::InvalidArgument(_))
        ));
    }
}
