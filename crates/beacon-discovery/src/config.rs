//! Discovery Configuration
//!
//! Centralized configuration for registration, watches and the etcd
//! connection, with environment variable overrides.

use crate::error::{DiscoveryError, Result};
use std::time::Duration;

const DEFAULT_ETCD_ENDPOINT: &str = "http://localhost:2379";

/// Discovery configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    // Store configuration
    /// Etcd endpoints (env: ETCD_HOSTS comma-separated, ETCD_HOST,
    /// or ETCD_1_PORT_2379_TCP_ADDR/ETCD_1_PORT_2379_TCP_PORT)
    pub etcd_endpoints: Vec<String>,

    /// Hostname used when a host has neither a private nor a public hostname
    /// (env: HOSTNAME, falls back to the OS hostname)
    pub local_hostname: String,

    // Timing
    /// Base time unit every delay below is expressed in
    pub time_unit: Duration,

    /// Host key lease TTL in time units (env: DISCOVERY_HEARTBEAT_UNITS).
    /// Heartbeats are written every `heartbeat_units - 1` units.
    pub heartbeat_units: u32,

    /// Delay between attempts of the initial service/host writes.
    /// Zero retries immediately.
    pub initial_retry_delay: Duration,

    /// Delay before reopening a watch after a store-side interruption
    pub watch_reconnect_delay: Duration,

    /// Capacity of each subscription queue
    pub subscription_buffer: usize,

    // Etcd backoff settings
    /// Initial interval for etcd connection retry
    pub etcd_backoff_initial: Duration,

    /// Maximum interval for etcd connection retry
    pub etcd_backoff_max: Duration,

    /// Maximum elapsed time for etcd connection retries
    pub etcd_backoff_max_elapsed: Duration,

    /// Multiplier for etcd backoff
    pub etcd_backoff_multiplier: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            etcd_endpoints: vec![DEFAULT_ETCD_ENDPOINT.to_string()],
            local_hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_default(),

            time_unit: Duration::from_secs(1),
            heartbeat_units: 5,
            initial_retry_delay: Duration::from_secs(1),
            watch_reconnect_delay: Duration::from_secs(1),
            subscription_buffer: 64,

            etcd_backoff_initial: Duration::from_secs(1),
            etcd_backoff_max: Duration::from_secs(10),
            etcd_backoff_max_elapsed: Duration::from_secs(60),
            etcd_backoff_multiplier: 2.0,
        }
    }
}

impl DiscoveryConfig {
    /// Create configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(hosts) = std::env::var("ETCD_HOSTS") {
            if !hosts.is_empty() {
                config.etcd_endpoints = hosts.split(',').map(String::from).collect();
            }
        } else if let Ok(host) = std::env::var("ETCD_HOST") {
            if !host.is_empty() {
                config.etcd_endpoints = vec![host];
            }
        } else if let Ok(addr) = std::env::var("ETCD_1_PORT_2379_TCP_ADDR") {
            let port = std::env::var("ETCD_1_PORT_2379_TCP_PORT")
                .unwrap_or_else(|_| "2379".to_string());
            config.etcd_endpoints = vec![format!("http://{addr}:{port}")];
        }

        if let Ok(hostname) = std::env::var("HOSTNAME") {
            if !hostname.is_empty() {
                config.local_hostname = hostname;
            }
        }

        if let Ok(units) = std::env::var("DISCOVERY_HEARTBEAT_UNITS") {
            if let Ok(parsed) = units.parse::<u32>() {
                config.heartbeat_units = parsed;
            }
        }

        config
    }

    /// Lease TTL of a host key
    pub fn heartbeat_ttl(&self) -> Duration {
        self.time_unit * self.heartbeat_units
    }

    /// Interval between two host key writes, one unit short of the TTL
    pub fn heartbeat_interval(&self) -> Duration {
        self.time_unit * self.heartbeat_units.saturating_sub(1)
    }

    /// Delay between two heartbeat attempts while the store is unreachable
    pub fn retry_delay(&self) -> Duration {
        self.time_unit
    }

    pub fn validate(&self) -> Result<()> {
        if self.time_unit.is_zero() {
            return Err(DiscoveryError::InvalidConfig(
                "time_unit must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_units < 2 {
            return Err(DiscoveryError::InvalidConfig(format!(
                "heartbeat_units must be at least 2, got {}",
                self.heartbeat_units
            )));
        }
        if self.etcd_endpoints.is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "at least one etcd endpoint is required".to_string(),
            ));
        }
        if self.subscription_buffer == 0 {
            return Err(DiscoveryError::InvalidConfig(
                "subscription_buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
