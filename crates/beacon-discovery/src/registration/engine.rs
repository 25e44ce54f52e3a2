//! Registration Engine
//!
//! One supervising task per registration. Every write of the host key goes
//! through it, so heartbeats, credential updates and the final delete never
//! race each other.

use super::RegistrationState;
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::keys::{host_key, service_info_key};
use crate::observability::{events, metrics};
use crate::store::{CoordinationStore, Revision, StoreError};
use crate::watch::credentials::watch_credentials;
use beacon_core::{Credentials, Host, Service};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub(super) struct Engine {
    store: Arc<dyn CoordinationStore>,
    config: DiscoveryConfig,
    cancel: CancellationToken,
    key: String,
    host: Host,
    /// `host` as last encoded
    host_json: String,
    service: Service,
    state: Arc<watch::Sender<RegistrationState>>,
    credentials: watch::Sender<Option<Credentials>>,
    written: watch::Sender<Host>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        store: Arc<dyn CoordinationStore>,
        config: DiscoveryConfig,
        cancel: CancellationToken,
        host: Host,
        service: Service,
        state: Arc<watch::Sender<RegistrationState>>,
        credentials: watch::Sender<Option<Credentials>>,
        written: watch::Sender<Host>,
    ) -> Self {
        Self {
            store,
            config,
            cancel,
            key: host_key(&service.name, &host.uuid),
            host,
            host_json: String::new(),
            service,
            state,
            credentials,
            written,
        }
    }

    /// Run until cancelled. Returns the deregistration error, if any.
    pub(super) async fn run(mut self) -> Result<()> {
        self.state.send_replace(RegistrationState::Registering);
        metrics::registration_started();

        let result = self.supervise().await;

        metrics::registration_stopped();
        self.state.send_replace(RegistrationState::Stopped);
        result
    }

    async fn supervise(&mut self) -> Result<()> {
        let service_json = serde_json::to_string(&self.service).map_err(DiscoveryError::Encode)?;
        self.host_json = serde_json::to_string(&self.host).map_err(DiscoveryError::Encode)?;

        let service_key = service_info_key(&self.service.name);
        let Some(service_revision) = self.write_until_success(&service_key, &service_json, None).await
        else {
            return Ok(());
        };

        let ttl = self.config.heartbeat_ttl();
        let host_json = self.host_json.clone();
        if self
            .write_until_success(&self.key, &host_json, Some(ttl))
            .await
            .is_none()
        {
            return Ok(());
        }
        metrics::record_host_write(&self.service.name, true);
        self.written.send_replace(self.host.clone());
        events::registration_ready(&self.service.name, &self.host.uuid);
        self.credentials.send_replace(Some(self.host.credentials()));

        let (credentials_tx, mut credentials_rx) = mpsc::channel(1);
        let watcher = if self.host.public {
            Some(tokio::spawn(watch_credentials(
                self.store.clone(),
                self.service.name.clone(),
                service_revision,
                self.config.watch_reconnect_delay,
                credentials_tx,
                self.cancel.clone(),
            )))
        } else {
            drop(credentials_tx);
            None
        };

        let interval = self.config.heartbeat_interval();
        let mut heartbeat = interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    break self.deregister().await;
                }

                Some(credentials) = credentials_rx.recv() => {
                    self.apply_credentials(credentials).await;
                }

                _ = heartbeat.tick() => {
                    self.heartbeat().await;
                }
            }
        };

        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                error!(service = %self.service.name, error = %e, "Credential watch task failed");
                return result.and(Err(DiscoveryError::Task(e.to_string())));
            }
        }
        result
    }

    /// Write `value` until it succeeds. `None` when cancelled first.
    async fn write_until_success(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Option<Revision> {
        loop {
            let written = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                written = self.store.put(key, value, ttl) => written,
            };

            match written {
                Ok(revision) => return Some(revision),
                Err(e) => {
                    warn!(key = %key, error = %e, "fail to set key, retrying");
                    let delay = self.config.initial_retry_delay;
                    if delay.is_zero() {
                        tokio::task::yield_now().await;
                        continue;
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn write_host(&self) -> std::result::Result<Revision, StoreError> {
        let written = self
            .store
            .put(&self.key, &self.host_json, Some(self.config.heartbeat_ttl()))
            .await;
        metrics::record_host_write(&self.service.name, written.is_ok());
        if written.is_ok() {
            self.written.send_replace(self.host.clone());
        }
        written
    }

    /// Renew the host key, retrying every time unit until it succeeds or the
    /// registration is cancelled.
    async fn heartbeat(&mut self) {
        let mut lost = false;
        loop {
            match self.write_host().await {
                Ok(_) => {
                    if lost {
                        events::registration_recovered(&self.service.name, &self.host.uuid);
                    }
                    return;
                }
                Err(e) => {
                    if !lost {
                        lost = true;
                        events::registration_lost(
                            &self.service.name,
                            &self.host.uuid,
                            &e.to_string(),
                            &self.store.endpoints(),
                        );
                    } else {
                        debug!(key = %self.key, error = %e, "Host key still not renewed");
                    }
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.retry_delay()) => {}
            }
        }
    }

    async fn apply_credentials(&mut self, credentials: Credentials) {
        if credentials == self.host.credentials() {
            debug!(service = %self.service.name, "Service record rewritten, credentials unchanged");
            return;
        }

        self.host.set_credentials(&credentials);
        self.service.set_credentials(&credentials);
        self.host_json = match serde_json::to_string(&self.host) {
            Ok(json) => json,
            Err(e) => {
                error!(uuid = %self.host.uuid, error = %e, "fail to marshal host");
                return;
            }
        };

        if let Err(e) = self.write_host().await {
            warn!(
                key = %self.key,
                error = %e,
                "fail to update host credentials, next heartbeat will retry"
            );
        }

        events::credentials_rotated(&self.service.name, &self.host.uuid, &credentials.user);
        metrics::record_credential_rotation(&self.service.name);
        self.credentials.send_replace(Some(credentials));
    }

    async fn deregister(&self) -> Result<()> {
        match self.store.delete(&self.key).await {
            Ok(()) => {
                events::host_deregistered(&self.service.name, &self.host.uuid);
                Ok(())
            }
            // Expired or removed by someone else: already deregistered
            Err(e) if e.is_not_found() => {
                debug!(key = %self.key, "Host key already gone");
                events::host_deregistered(&self.service.name, &self.host.uuid);
                Ok(())
            }
            Err(e) => {
                events::deregistration_failed(&self.key, &e.to_string());
                Err(e.into())
            }
        }
    }
}

/// Mirror the published credentials into the registration's cell, then mark
/// it ready.
pub(super) async fn publish_credentials(
    mut published: watch::Receiver<Option<Credentials>>,
    cell: Arc<Mutex<Option<Credentials>>>,
    state: Arc<watch::Sender<RegistrationState>>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            changed = published.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }

        let Some(credentials) = published.borrow_and_update().clone() else {
            continue;
        };
        *cell.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(credentials);

        state.send_if_modified(|current| match current {
            RegistrationState::Registering => {
                *current = RegistrationState::Ready;
                true
            }
            _ => false,
        });
    }
}
