//! Core shared types for beacon
//!
//! This crate contains the records exchanged through the coordination store
//! (hosts, services, credentials) and the URL synthesis used by both the
//! registration and the discovery sides.

mod endpoint;
mod models;

pub use endpoint::{build_url, EndpointError, DEFAULT_SCHEME};
pub use models::{Credentials, Host, Ports, Service};
