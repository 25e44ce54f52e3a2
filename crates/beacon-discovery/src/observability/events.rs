//! Structured Events
//!
//! One function per lifecycle event so field names stay consistent across the
//! registration engine and the watches. Every event carries an `event_type`.

use tracing::{error, info, warn};

/// Emit a registration ready event (first host write succeeded)
pub fn registration_ready(service: &str, uuid: &str) {
    info!(
        event_type = "registration_ready",
        service = %service,
        uuid = %uuid,
        "Host registered"
    );
}

/// Emit a registration lost event (a heartbeat write failed)
pub fn registration_lost(service: &str, uuid: &str, error: &str, endpoints: &[String]) {
    error!(
        event_type = "registration_lost",
        service = %service,
        uuid = %uuid,
        error = %error,
        endpoints = ?endpoints,
        "lost registration"
    );
}

/// Emit a registration recovered event
pub fn registration_recovered(service: &str, uuid: &str) {
    info!(
        event_type = "registration_recovered",
        service = %service,
        uuid = %uuid,
        "recovered registration"
    );
}

/// Emit a credentials rotated event, as seen by one registration
pub fn credentials_rotated(service: &str, uuid: &str, user: &str) {
    info!(
        event_type = "credentials_rotated",
        service = %service,
        uuid = %uuid,
        user = %user,
        "Service credentials changed"
    );
}

/// Emit a host deregistered event
pub fn host_deregistered(service: &str, uuid: &str) {
    info!(
        event_type = "host_deregistered",
        service = %service,
        uuid = %uuid,
        "Host deregistered"
    );
}

/// Emit a deregistration failed event; the lease expiry removes the key later
pub fn deregistration_failed(key: &str, error: &str) {
    warn!(
        event_type = "deregistration_failed",
        key = %key,
        error = %error,
        "fail to remove key"
    );
}

/// Emit a watch lost event
pub fn watch_lost(prefix: &str, error: &str, endpoints: &[String]) {
    warn!(
        event_type = "watch_lost",
        prefix = %prefix,
        error = %error,
        endpoints = ?endpoints,
        "lost watcher"
    );
}

/// Emit a watch recovered event
pub fn watch_recovered(prefix: &str, from_revision: i64) {
    info!(
        event_type = "watch_recovered",
        prefix = %prefix,
        from_revision = from_revision,
        "recovered watcher"
    );
}

/// Emit a watch resynced event (resume token was compacted away)
pub fn watch_resynced(prefix: &str, revision: i64, keys: usize) {
    warn!(
        event_type = "watch_resynced",
        prefix = %prefix,
        revision = revision,
        keys = keys,
        "Watch resynchronized from a full listing"
    );
}

/// Emit a host joined event
pub fn host_joined(service: &str, uuid: &str, hostname: &str) {
    info!(
        event_type = "host_joined",
        service = %service,
        uuid = %uuid,
        hostname = %hostname,
        "Host joined"
    );
}

/// Emit a host departed event
pub fn host_departed(service: &str, uuid: &str) {
    warn!(
        event_type = "host_departed",
        service = %service,
        uuid = %uuid,
        "Host departed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_functions_dont_panic() {
        let endpoints = vec!["http://127.0.0.1:2379".to_string()];
        registration_ready("db", "1234-db-1");
        registration_lost("db", "1234-db-1", "connection refused", &endpoints);
        registration_recovered("db", "1234-db-1");
        credentials_rotated("db", "1234-db-1", "admin");
        host_deregistered("db", "1234-db-1");
        deregistration_failed("/services/db/1234-db-1", "timeout");
        watch_lost("/services/db/", "stream closed", &endpoints);
        watch_recovered("/services/db/", 42);
        watch_resynced("/services/db/", 42, 3);
        host_joined("db", "1234-db-1", "db-1");
        host_departed("db", "1234-db-1");
    }
}
