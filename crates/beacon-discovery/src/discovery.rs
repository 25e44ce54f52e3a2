//! Discovery facade
//!
//! Owns the shared store handle and configuration, and hands them to the
//! registration engine, the resolver, watches and monitors.

use crate::config::DiscoveryConfig;
use crate::error::Result;
use crate::monitor::ServiceMonitor;
use crate::registration::{self, Registration};
use crate::resolver::{Resolver, ServiceHandle};
use crate::rotation;
use crate::store::{CoordinationStore, EtcdStore, Revision};
use crate::watch::Subscriber;
use beacon_core::{Credentials, Host};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Clone)]
pub struct Discovery {
    store: Arc<dyn CoordinationStore>,
    config: DiscoveryConfig,
}

impl Discovery {
    /// Use an existing store. Fails on invalid configuration.
    pub fn new(store: Arc<dyn CoordinationStore>, config: DiscoveryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Connect to the etcd cluster named by `config`.
    pub async fn connect(config: DiscoveryConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let store = EtcdStore::connect(&config).await?;
        info!(endpoints = ?config.etcd_endpoints, "Discovery connected");
        Ok(Self::new(Arc::new(store), config)?)
    }

    /// Register `host` as an instance of `service`. The registration stops
    /// when `cancel` fires.
    pub fn register(
        &self,
        cancel: &CancellationToken,
        service: &str,
        host: Host,
    ) -> Result<Registration> {
        registration::register(self.store.clone(), &self.config, cancel, service, host)
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.store.clone())
    }

    /// Shortcut for `resolver().get(service)`.
    pub async fn service(&self, service: &str) -> Result<ServiceHandle> {
        self.resolver().get(service).await
    }

    pub fn subscriber(&self) -> Subscriber {
        Subscriber::new(self.store.clone(), &self.config)
    }

    pub fn monitor(&self) -> ServiceMonitor {
        ServiceMonitor::new(self.subscriber(), self.resolver())
    }

    pub async fn rotate_credentials(
        &self,
        service: &str,
        credentials: &Credentials,
    ) -> Result<Revision> {
        rotation::rotate_credentials(self.store.as_ref(), service, credentials).await
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiscoveryError;
    use crate::store::MemoryStore;
    use beacon_core::Ports;
    use std::time::Duration;

    fn discovery(store: &MemoryStore) -> Discovery {
        let config = DiscoveryConfig {
            time_unit: Duration::from_millis(100),
            ..Default::default()
        };
        Discovery::new(Arc::new(store.clone()), config).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = DiscoveryConfig {
            heartbeat_units: 1,
            ..Default::default()
        };
        assert!(matches!(
            Discovery::new(Arc::new(MemoryStore::new()), config),
            Err(DiscoveryError::InvalidConfig(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_resolve_rotate() {
        let store = MemoryStore::new();
        let discovery = discovery(&store);
        let cancel = CancellationToken::new();

        let host = Host {
            hostname: "db.example.com".to_string(),
            public: true,
            user: "u1".to_string(),
            password: "p1".to_string(),
            ports: Ports::from([("postgres".to_string(), "5432".to_string())]),
            ..Default::default()
        };
        let mut registration = discovery.register(&cancel, "db", host).unwrap();
        registration.wait_registration().await.unwrap();

        let handle = discovery.service("db").await.unwrap();
        assert_eq!(
            handle.url("postgres", "/app").await.unwrap(),
            "postgres://u1:p1@db.example.com:5432/app"
        );

        discovery
            .rotate_credentials("db", &Credentials::new("u2", "p2"))
            .await
            .unwrap();
        // Two time units
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            registration.credentials().unwrap(),
            Credentials::new("u2", "p2")
        );
        assert_eq!(
            discovery
                .service("db")
                .await
                .unwrap()
                .url("postgres", "/app")
                .await
                .unwrap(),
            "postgres://u2:p2@db.example.com:5432/app"
        );

        cancel.cancel();
        registration.stop().await.unwrap();
        assert!(discovery.service("db").await.unwrap().all().await.unwrap().is_empty());
    }
}
