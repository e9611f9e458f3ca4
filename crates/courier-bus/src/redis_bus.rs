//! Redis `PUBLISH`/`SUBSCRIBE` bus.
//!
//! Publishing shares one multiplexed connection; every subscription opens its
//! own pub/sub connection.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use crate::{Bus, Result, Subscription};

/// Bus backed by a Redis server.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    publisher: MultiplexedConnection,
}

impl RedisBus {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        debug!(url, "connected to redis");
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize> {
        let mut conn = self.publisher.clone();
        let receivers: usize = conn.publish(channel, &payload[..]).await?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        let stream = pubsub
            .into_on_message()
            .map(|msg| Bytes::copy_from_slice(msg.get_payload_bytes()));
        Ok(Box::pin(stream))
    }
}
