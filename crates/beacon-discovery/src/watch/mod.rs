//! Host Watches
//!
//! Turns the ordered change stream of the coordination store into host
//! lifecycle events:
//! - `feed`: resumable raw stream (reconnect from the last revision, resync
//!   after compaction)
//! - `reconciler`: classification into created/updated/removed
//! - `subscription`: consumer-facing views
//! - `credentials`: service-info watch feeding registrations

pub(crate) mod credentials;
mod feed;
mod reconciler;
mod subscription;

pub use reconciler::classify;
pub use subscription::{Subscriber, Subscription};

use crate::store::Revision;
use beacon_core::Host;

/// Semantic change of one host key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostChange {
    Created(Host),
    Updated(Host),
    /// Host key deleted or expired; carries the host UUID
    Removed { uuid: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Updated,
    Removed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Removed => "removed",
        }
    }
}

/// One reconciled host event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    pub change: HostChange,
    /// Revision of the change. Resuming with this token delivers every
    /// later change, in order.
    pub resume_token: Revision,
}

impl WatchEvent {
    pub fn kind(&self) -> EventKind {
        match self.change {
            HostChange::Created(_) => EventKind::Created,
            HostChange::Updated(_) => EventKind::Updated,
            HostChange::Removed { .. } => EventKind::Removed,
        }
    }

    /// UUID of the host the event is about
    pub fn uuid(&self) -> &str {
        match &self.change {
            HostChange::Created(host) | HostChange::Updated(host) => &host.uuid,
            HostChange::Removed { uuid } => uuid,
        }
    }

    pub fn host(&self) -> Option<&Host> {
        match &self.change {
            HostChange::Created(host) | HostChange::Updated(host) => Some(host),
            HostChange::Removed { .. } => None,
        }
    }
}
