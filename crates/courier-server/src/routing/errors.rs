//! Routing errors.

use courier_bus::BusError;
use courier_core::{InstanceId, StoreError};
use thiserror::Error;

/// A message could not be handed to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The queue stayed full for the whole enqueue timeout.
    #[error("dispatcher queue full")]
    QueueFull,
    /// The dispatcher has stopped.
    #[error("dispatcher closed")]
    Closed,
}

/// Routing of one message failed.
#[derive(Debug, Error)]
pub enum RouteError {
    /// Owner lookup failed.
    #[error("directory lookup failed: {0}")]
    Directory(#[source] StoreError),
    /// Group member lookup failed.
    #[error("group membership lookup failed: {0}")]
    Membership(#[source] StoreError),
    /// An envelope could not be encoded.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
    /// Publishing to an instance's channel failed.
    #[error("publish to instance '{instance}' failed: {source}")]
    Publish {
        /// Target instance.
        instance: InstanceId,
        /// Transport error.
        #[source]
        source: BusError,
    },
}
