//! Service Monitor
//!
//! Keeps an in-memory view of the hosts of a set of services: seeded from the
//! resolver, then maintained from a host subscription.

use crate::error::{DiscoveryError, Result};
use crate::observability::events;
use crate::resolver::Resolver;
use crate::watch::{HostChange, Subscriber, Subscription, WatchEvent};
use beacon_core::Host;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type HostsView = Arc<RwLock<HashMap<String, Vec<Host>>>>;

pub struct ServiceMonitor {
    subscriber: Subscriber,
    resolver: Resolver,
    hosts: HostsView,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl ServiceMonitor {
    pub fn new(subscriber: Subscriber, resolver: Resolver) -> Self {
        Self {
            subscriber,
            resolver,
            hosts: Arc::new(RwLock::new(HashMap::new())),
            tasks: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Start tracking `service`. Starting an already tracked service is a
    /// no-op.
    pub async fn start(&self, service: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(service) {
            return Ok(());
        }

        // Subscribe before listing so nothing between the two is missed;
        // replayed events are idempotent upserts.
        let subscription = self.subscriber.subscribe(service).await?;
        let current = self.resolver.get(service).await?.all().await?;
        info!(service = %service, hosts = current.len(), "Monitoring service");
        self.hosts
            .write()
            .await
            .insert(service.to_string(), current);

        let task = tokio::spawn(follow(
            service.to_string(),
            subscription,
            self.hosts.clone(),
            self.cancel.child_token(),
        ));
        tasks.insert(service.to_string(), task);
        Ok(())
    }

    /// Hosts currently known for `service`.
    pub async fn hosts(&self, service: &str) -> Result<Vec<Host>> {
        self.hosts
            .read()
            .await
            .get(service)
            .cloned()
            .ok_or_else(|| DiscoveryError::NoSuchService(service.to_string()))
    }

    pub async fn services(&self) -> Vec<String> {
        let mut services: Vec<String> = self.hosts.read().await.keys().cloned().collect();
        services.sort();
        services
    }

    /// Stop every monitor task.
    pub async fn stop(&self) -> Result<()> {
        self.cancel.cancel();
        let mut tasks = self.tasks.lock().await;
        let mut result = Ok(());
        for (service, task) in tasks.drain() {
            if let Err(e) = task.await {
                debug!(service = %service, error = %e, "Monitor task failed");
                if result.is_ok() {
                    result = Err(DiscoveryError::Task(e.to_string()));
                }
            }
        }
        result
    }
}

async fn follow(
    service: String,
    mut subscription: Subscription<WatchEvent>,
    hosts: HostsView,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = subscription.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let mut view = hosts.write().await;
        let known = view.entry(service.clone()).or_default();
        match event.change {
            HostChange::Created(host) | HostChange::Updated(host) => {
                match known.iter_mut().find(|h| h.uuid == host.uuid) {
                    Some(existing) => *existing = host,
                    None => {
                        events::host_joined(&service, &host.uuid, host.display_name());
                        known.push(host);
                    }
                }
            }
            HostChange::Removed { uuid } => {
                let before = known.len();
                known.retain(|h| h.uuid != uuid);
                if known.len() != before {
                    events::host_departed(&service, &uuid);
                }
            }
        }
    }
    debug!(service = %service, "Monitor stopped");
}
