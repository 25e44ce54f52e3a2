//! Credential rotation of public services.

use crate::error::{DiscoveryError, Result};
use crate::keys::service_info_key;
use crate::store::{CoordinationStore, Revision, StoreError};
use beacon_core::{Credentials, Service};
use tracing::info;

/// Replace the credentials of the public service `service`.
///
/// Registrations of the service pick the change up from their credential
/// watch. Returns the revision of the write.
pub async fn rotate_credentials(
    store: &dyn CoordinationStore,
    service: &str,
    credentials: &Credentials,
) -> Result<Revision> {
    let key = service_info_key(service);
    let listing = match store.get(&key, false).await {
        Ok(listing) => listing,
        Err(StoreError::NotFound { .. }) => {
            return Err(DiscoveryError::NoSuchService(service.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let Some(kv) = listing.kvs.first() else {
        return Err(DiscoveryError::NoSuchService(service.to_string()));
    };

    let mut record: Service =
        serde_json::from_str(&kv.value).map_err(|source| DiscoveryError::Decode {
            key: key.clone(),
            source,
        })?;
    if !record.public {
        return Err(DiscoveryError::InvalidArgument(format!(
            "service '{service}' is not public, it has no shared credentials"
        )));
    }

    record.set_credentials(credentials);
    let value = serde_json::to_string(&record).map_err(DiscoveryError::Encode)?;
    let revision = store.put(&key, &value, None).await?;

    info!(
        service = %service,
        user = %credentials.user,
        revision = revision,
        "Service credentials rotated"
    );
    Ok(revision)
}
