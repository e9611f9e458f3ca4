//! # courier-bus
//!
//! Publish/subscribe transport between Courier instances. Every instance
//! subscribes to the channel named after its own instance id; routers publish
//! envelopes on the channel of the instance that owns the recipient.
//!
//! - [`LocalBus`]: in-process, for tests and single-process scale-out
//! - `RedisBus` (feature `redis`): Redis `PUBLISH`/`SUBSCRIBE`

#![deny(unsafe_code)]

pub mod errors;
pub mod local;
#[cfg(feature = "redis")]
pub mod redis_bus;

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

pub use errors::{BusError, Result};
pub use local::LocalBus;
#[cfg(feature = "redis")]
pub use redis_bus::RedisBus;

/// Stream of payloads received on one channel. Ends when the subscription
/// is lost.
pub type Subscription = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// A channel-addressed publish/subscribe transport.
///
/// Channel names are compared exactly; the empty string is a valid channel
/// and never matches anything else.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish `payload` on `channel`. Returns the number of subscribers
    /// that received it, when the transport reports one.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize>;

    /// Subscribe to `channel`.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;
}
