//! In-process bus backed by one `tokio::sync::broadcast` channel per name.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::{Bus, Result, Subscription};

/// Default per-channel buffer.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process bus. Cloning shares the same channels.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

struct Inner {
    channels: DashMap<String, broadcast::Sender<Bytes>>,
    capacity: usize,
    published: AtomicU64,
}

impl LocalBus {
    /// Create a bus with the default per-channel buffer.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus whose channels buffer up to `capacity` payloads per
    /// subscriber before the slowest subscriber starts lagging.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: DashMap::new(),
                capacity: capacity.max(1),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Total number of `publish` calls so far, on any channel.
    pub fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Bytes> {
        self.inner
            .channels
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Bus for LocalBus {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<usize> {
        let _ = self.inner.published.fetch_add(1, Ordering::Relaxed);
        let Some(sender) = self.inner.channels.get(channel).map(|s| s.value().clone()) else {
            return Ok(0);
        };
        // No subscribers is not an error: the payload is simply not delivered.
        Ok(sender.send(payload).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let receiver = self.sender(channel).subscribe();
        let channel = channel.to_owned();
        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let item = match item {
                Ok(payload) => Some(payload),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(channel = %channel, skipped, "bus subscriber lagged, payloads dropped");
                    None
                }
            };
            futures::future::ready(item)
        });
        Ok(Box::pin(stream))
    }
}
