//! Server configuration.

use std::time::Duration;

use courier_settings::CourierSettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration for one Courier instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Interval between server-initiated Ping frames, in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close a connection after this long without a Pong, in seconds.
    pub pong_timeout_secs: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Dispatcher queue capacity.
    pub queue_capacity: usize,
    /// Bounded wait when enqueueing into the dispatcher, in milliseconds.
    pub enqueue_timeout_ms: u64,
    /// Bound on a single write to a client connection, in milliseconds.
    pub write_timeout_ms: u64,
    /// Per-connection outbound queue size.
    pub outbound_buffer: usize,
    /// How often a live connection re-asserts its directory entry, in seconds.
    pub directory_refresh_secs: u64,
    /// Delay before the relay resubscribes after its stream ends, in milliseconds.
    pub resubscribe_delay_ms: u64,
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &CourierSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            heartbeat_interval_secs: settings.server.heartbeat_interval_secs,
            pong_timeout_secs: settings.server.pong_timeout_secs,
            max_message_size: settings.server.max_message_size,
            queue_capacity: settings.delivery.queue_capacity,
            enqueue_timeout_ms: settings.delivery.enqueue_timeout_ms,
            write_timeout_ms: settings.delivery.write_timeout_ms,
            outbound_buffer: settings.delivery.outbound_buffer,
            directory_refresh_secs: settings.directory.refresh_interval_secs,
            resubscribe_delay_ms: settings.bus.resubscribe_delay_ms,
        }
    }

    /// Ping interval.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Pong timeout.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }

    /// Dispatcher enqueue timeout.
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    /// Per-write timeout.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Directory refresh interval.
    pub fn directory_refresh(&self) -> Duration {
        Duration::from_secs(self.directory_refresh_secs.max(1))
    }

    /// Relay resubscribe delay.
    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 60,
            max_message_size: 64 * 1024,
            queue_capacity: 1024,
            enqueue_timeout_ms: 500,
            write_timeout_ms: 5_000,
            outbound_buffer: 256,
            directory_refresh_secs: 60,
            resubscribe_delay_ms: 1_000,
        }
    }
}
