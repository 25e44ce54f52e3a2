//! Discovery Metrics
//!
//! Recorded through the `metrics` facade; the embedding application decides
//! which recorder/exporter to install.
//!
//! Metrics tracked:
//! - `beacon_host_writes_total` - counter of host key writes by service and outcome
//! - `beacon_registrations_active` - gauge of running registrations
//! - `beacon_credential_rotations_total` - counter of applied credential changes
//! - `beacon_watch_reconnects_total` - counter of watch reopenings by prefix
//! - `beacon_watch_events_total` - counter of reconciled watch events by kind

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register descriptions for all metrics
pub fn describe_metrics() {
    describe_counter!(
        "beacon_host_writes_total",
        "Total number of host key writes"
    );
    describe_gauge!(
        "beacon_registrations_active",
        "Number of running registrations"
    );
    describe_counter!(
        "beacon_credential_rotations_total",
        "Total number of credential changes applied by registrations"
    );
    describe_counter!(
        "beacon_watch_reconnects_total",
        "Total number of watch streams reopened after an interruption"
    );
    describe_counter!(
        "beacon_watch_events_total",
        "Total number of reconciled host events"
    );
}

/// Record a host key write attempt
pub fn record_host_write(service: &str, success: bool) {
    let outcome = if success { "ok" } else { "error" };
    counter!(
        "beacon_host_writes_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn registration_started() {
    gauge!("beacon_registrations_active").increment(1.0);
}

pub fn registration_stopped() {
    gauge!("beacon_registrations_active").decrement(1.0);
}

/// Record a credential change applied by a registration
pub fn record_credential_rotation(service: &str) {
    counter!("beacon_credential_rotations_total", "service" => service.to_string()).increment(1);
}

/// Record a watch stream reopened after an interruption
pub fn record_watch_reconnect(prefix: &str) {
    counter!("beacon_watch_reconnects_total", "prefix" => prefix.to_string()).increment(1);
}

/// Record a reconciled watch event
pub fn record_watch_event(kind: &'static str) {
    counter!("beacon_watch_events_total", "kind" => kind).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe_metrics();
        record_host_write("db", true);
        record_host_write("db", false);
        registration_started();
        registration_stopped();
        record_credential_rotation("db");
        record_watch_reconnect("/services/db/");
        record_watch_event("created");
    }
}
