//! Discovery error types

use crate::store::StoreError;
use beacon_core::EndpointError;
use thiserror::Error;

pub type Result<T, E = DiscoveryError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Credentials were requested before the first successful registration
    #[error("registration is not ready")]
    NotReady,

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("no host found for service '{0}'")]
    NoHostFound(String),

    #[error("no such service '{0}'")]
    NoSuchService(String),

    #[error("invalid JSON at '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl DiscoveryError {
    pub fn is_unknown_scheme(&self) -> bool {
        matches!(self, DiscoveryError::Endpoint(EndpointError::UnknownScheme(_)))
    }
}
