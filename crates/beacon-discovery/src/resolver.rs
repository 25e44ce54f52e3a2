//! Service Resolver
//!
//! Read side of discovery: service records, live hosts and connection URLs.

use crate::error::{DiscoveryError, Result};
use crate::keys::{last_segment, service_hosts_prefix, service_info_key};
use crate::store::{CoordinationStore, StoreError};
use beacon_core::{Host, Service};
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

#[derive(Clone)]
pub struct Resolver {
    store: Arc<dyn CoordinationStore>,
}

impl Resolver {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Handle on `name`. A service nobody registered yields a handle carrying
    /// only its name.
    pub async fn get(&self, name: &str) -> Result<ServiceHandle> {
        let key = service_info_key(name);
        let service = match self.store.get(&key, false).await {
            Ok(listing) => match listing.kvs.first() {
                Some(kv) => serde_json::from_str(&kv.value).map_err(|source| {
                    DiscoveryError::Decode {
                        key: kv.key.clone(),
                        source,
                    }
                })?,
                None => Service::named(name),
            },
            Err(StoreError::NotFound { .. }) => Service::named(name),
            Err(e) => return Err(e.into()),
        };

        Ok(ServiceHandle {
            service,
            store: self.store.clone(),
        })
    }
}

/// A service record plus access to its live hosts
#[derive(Clone)]
pub struct ServiceHandle {
    service: Service,
    store: Arc<dyn CoordinationStore>,
}

impl ServiceHandle {
    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn name(&self) -> &str {
        &self.service.name
    }

    /// Every live host, one per UUID (or per key for hosts without one), in
    /// listing order.
    pub async fn all(&self) -> Result<Vec<Host>> {
        let prefix = service_hosts_prefix(&self.service.name);
        let listing = match self.store.get(&prefix, true).await {
            Ok(listing) => listing,
            Err(StoreError::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut seen = HashSet::new();
        let mut hosts = Vec::with_capacity(listing.kvs.len());
        for kv in &listing.kvs {
            let host: Host =
                serde_json::from_str(&kv.value).map_err(|source| DiscoveryError::Decode {
                    key: kv.key.clone(),
                    source,
                })?;
            // Records written without a UUID are identified by their key
            let identity = if host.uuid.is_empty() {
                last_segment(&kv.key)
            } else {
                host.uuid.as_str()
            };
            if !seen.insert(identity.to_string()) {
                trace!(key = %kv.key, identity = %identity, "Duplicate host skipped");
                continue;
            }
            hosts.push(host);
        }
        Ok(hosts)
    }

    /// A host picked uniformly at random.
    pub async fn one(&self) -> Result<Host> {
        let hosts = self.all().await?;
        hosts
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| DiscoveryError::NoHostFound(self.service.name.clone()))
    }

    pub async fn first(&self) -> Result<Host> {
        self.all()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DiscoveryError::NoHostFound(self.service.name.clone()))
    }

    /// URL of the service: its public endpoint when public, a random host
    /// otherwise. An empty `scheme` means `http`.
    pub async fn url(&self, scheme: &str, path: &str) -> Result<String> {
        if self.service.public {
            return Ok(self.service.url(scheme, path)?);
        }
        let host = self.one().await?;
        Ok(host.url(scheme, path)?)
    }
}
