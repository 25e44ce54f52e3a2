//! Credential watch of a public service
//!
//! Tails `/services_infos/{service}` and forwards the credentials carried by
//! every new version of the service record.

use super::feed::{Feed, ResumableWatch};
use crate::keys::service_info_key;
use crate::store::{Action, CoordinationStore, Revision};
use beacon_core::{Credentials, Service};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

fn decode_credentials(key: &str, value: &str) -> Option<Credentials> {
    match serde_json::from_str::<Service>(value) {
        Ok(service) => Some(service.credentials()),
        Err(e) => {
            warn!(key = %key, error = %e, "Invalid service JSON, skipping entry");
            None
        }
    }
}

/// Forward credential changes made after revision `after` until cancelled or
/// until the receiver is gone.
pub(crate) async fn watch_credentials(
    store: Arc<dyn CoordinationStore>,
    service: String,
    after: Revision,
    reconnect_delay: Duration,
    tx: mpsc::Sender<Credentials>,
    cancel: CancellationToken,
) {
    let key = service_info_key(&service);
    let mut feed = ResumableWatch::new(store, key.clone(), after, reconnect_delay, cancel.clone());

    while let Some(item) = feed.next().await {
        let credentials = match item {
            // The prefix also matches services whose name extends this one
            Feed::Event(event) if event.key != key => continue,
            Feed::Event(event) => match (event.action, event.value) {
                (Action::Delete | Action::Expire, _) | (_, None) => {
                    debug!(service = %service, "Service record removed, keeping credentials");
                    continue;
                }
                (_, Some(value)) => decode_credentials(&key, &value),
            },
            Feed::Resync(listing) => listing
                .kvs
                .iter()
                .find(|kv| kv.key == key)
                .and_then(|kv| decode_credentials(&key, &kv.value)),
        };

        let Some(credentials) = credentials else {
            continue;
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(credentials) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    debug!(service = %service, prefix = %feed.prefix(), "Credential watch stopped");
}
