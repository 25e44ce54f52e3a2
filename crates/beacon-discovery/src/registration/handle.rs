//! Caller-facing side of a registration.

use super::RegistrationState;
use crate::error::{DiscoveryError, Result};
use beacon_core::{Credentials, Host};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running registration.
///
/// Dropping it without calling [`Registration::stop`] cancels it; the host
/// key is then removed in the background.
pub struct Registration {
    uuid: String,
    service_name: String,
    cancel: CancellationToken,
    state: watch::Receiver<RegistrationState>,
    credentials: Arc<Mutex<Option<Credentials>>>,
    host: watch::Receiver<Host>,
    tasks: Vec<JoinHandle<Result<()>>>,
}

impl Registration {
    pub(super) fn new(
        uuid: String,
        service_name: String,
        cancel: CancellationToken,
        state: watch::Receiver<RegistrationState>,
        credentials: Arc<Mutex<Option<Credentials>>>,
        host: watch::Receiver<Host>,
        tasks: Vec<JoinHandle<Result<()>>>,
    ) -> Self {
        Self {
            uuid,
            service_name,
            cancel,
            state,
            credentials,
            host,
            tasks,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn state(&self) -> RegistrationState {
        *self.state.borrow()
    }

    /// Whether the host has been written and credentials published.
    pub fn ready(&self) -> bool {
        self.state() == RegistrationState::Ready
    }

    /// Wait for the first successful registration.
    ///
    /// Fails with [`DiscoveryError::NotReady`] if the registration stops
    /// before reaching that point.
    pub async fn wait_registration(&self) -> Result<()> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| matches!(s, RegistrationState::Ready | RegistrationState::Stopped))
            .await
            .map(|s| *s)
            .unwrap_or(RegistrationState::Stopped);

        match reached {
            RegistrationState::Ready => Ok(()),
            _ => Err(DiscoveryError::NotReady),
        }
    }

    /// Current credentials of the service, as last propagated to this host.
    pub fn credentials(&self) -> Result<Credentials> {
        self.credentials
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(DiscoveryError::NotReady)
    }

    /// The host as last written to the store.
    pub fn host(&self) -> Host {
        self.host.borrow().clone()
    }

    /// Cancel the registration and wait for every task it spawned.
    ///
    /// Returns the first teardown error, typically a failed delete of the
    /// host key (the key then disappears when its lease expires).
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        let mut result = Ok(());
        for task in self.tasks.drain(..) {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(DiscoveryError::Task(e.to_string())),
            };
            if result.is_ok() {
                result = outcome;
            }
        }
        result
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
