//! beacon-discovery
//!
//! Service registration and discovery over a coordination store with leases
//! and watches (etcd in production):
//! - hosts register under `/services/{service}/{uuid}` and renew their key
//!   with a heartbeat
//! - public services share credentials through `/services_infos/{service}`,
//!   rotated live on every registered host
//! - resolvers, watches and monitors give the read side

pub mod config;
pub mod discovery;
pub mod error;
pub mod keys;
pub mod monitor;
pub mod observability;
pub mod registration;
pub mod resolver;
pub mod rotation;
pub mod store;
pub mod watch;

pub use beacon_core::{Credentials, Host, Ports, Service};
pub use config::DiscoveryConfig;
pub use discovery::Discovery;
pub use error::{DiscoveryError, Result};
pub use monitor::ServiceMonitor;
pub use registration::{register, Registration, RegistrationState};
pub use resolver::{Resolver, ServiceHandle};
pub use rotation::rotate_credentials;
pub use store::{
    CoordinationStore, EtcdStore, MemoryStore, MirroredStore, Revision, StoreError,
};
pub use watch::{EventKind, HostChange, Subscriber, Subscription, WatchEvent};
