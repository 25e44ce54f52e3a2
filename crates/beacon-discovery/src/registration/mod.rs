//! Host Registration
//!
//! A registration owns one host's presence in the store:
//! - `engine`: the supervising task (initial writes, heartbeat, credential
//!   updates, deregistration)
//! - `handle`: the caller-facing [`Registration`]

mod engine;
mod handle;

pub use handle::Registration;

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::store::CoordinationStore;
use beacon_core::{Host, Service};
use engine::Engine;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Registration state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    NotRegistered,
    /// Writing the service and host records
    Registering,
    /// Host written and credentials published
    Ready,
    /// Terminal
    Stopped,
}

/// Announce `host` as an instance of `service_name` until `cancel` fires or
/// the returned [`Registration`] is stopped.
pub fn register(
    store: Arc<dyn CoordinationStore>,
    config: &DiscoveryConfig,
    cancel: &CancellationToken,
    service_name: &str,
    mut host: Host,
) -> Result<Registration> {
    if service_name.is_empty() {
        return Err(DiscoveryError::InvalidArgument(
            "service name must not be empty".to_string(),
        ));
    }

    host.apply_registration_defaults(service_name, &config.local_hostname);
    host.uuid = format!("{}-{}", Uuid::new_v4(), host.private_hostname);
    let service = Service::for_host(service_name, &host);

    debug!(
        service = %service_name,
        uuid = %host.uuid,
        public = host.public,
        "Registering host"
    );

    let cancel = cancel.child_token();
    let (state_tx, state_rx) = watch::channel(RegistrationState::NotRegistered);
    let state_tx = Arc::new(state_tx);
    let (credentials_tx, credentials_rx) = watch::channel(None);
    let (host_tx, host_rx) = watch::channel(host.clone());
    let credentials = Arc::new(Mutex::new(None));

    let uuid = host.uuid.clone();
    let engine = Engine::new(
        store,
        config.clone(),
        cancel.clone(),
        host,
        service,
        state_tx.clone(),
        credentials_tx,
        host_tx,
    );

    let tasks = vec![
        tokio::spawn(engine.run()),
        tokio::spawn(engine::publish_credentials(
            credentials_rx,
            credentials.clone(),
            state_tx,
            cancel.clone(),
        )),
    ];

    Ok(Registration::new(
        uuid,
        service_name.to_string(),
        cancel,
        state_rx,
        credentials,
        host_rx,
        tasks,
    ))
}
