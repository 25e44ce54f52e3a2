//! Connection URL synthesis

use crate::models::Ports;
use thiserror::Error;

/// Scheme used when the caller passes an empty one.
pub const DEFAULT_SCHEME: &str = "http";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("unknown scheme")]
    UnknownScheme(String),
}

/// Build `scheme://[user:password@]hostname:port<path>` from a ports map.
///
/// The port is looked up by scheme. An empty `scheme` is treated as
/// [`DEFAULT_SCHEME`]. Credentials are only embedded when `user` is not empty.
pub fn build_url(
    scheme: &str,
    user: &str,
    password: &str,
    hostname: &str,
    ports: &Ports,
    path: &str,
) -> Result<String, EndpointError> {
    let scheme = if scheme.is_empty() { DEFAULT_SCHEME } else { scheme };
    let port = ports
        .get(scheme)
        .ok_or_else(|| EndpointError::UnknownScheme(scheme.to_string()))?;

    if user.is_empty() {
        Ok(format!("{scheme}://{hostname}:{port}{path}"))
    } else {
        Ok(format!("{scheme}://{user}:{password}@{hostname}:{port}{path}"))
    }
}
