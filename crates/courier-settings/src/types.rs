//! Settings type definitions.
//!
//! Every section implements [`Default`] with production values and is marked
//! `#[serde(default)]`, so a settings file only needs the keys it overrides.

use std::path::PathBuf;
use std::time::Duration;

use courier_core::InstanceId;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "instance": { "id": "node-a" },
///   "server": { "port": 9090 },
///   "bus": { "kind": "redis", "redis_url": "redis://cache:6379" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierSettings {
    /// Identity of this process.
    pub instance: InstanceSettings,
    /// Listener and WebSocket settings.
    pub server: ServerSettings,
    /// Dispatcher queue and write timeouts.
    pub delivery: DeliverySettings,
    /// Directory entry lifetime.
    pub directory: DirectorySettings,
    /// Pub/sub transport.
    pub bus: BusSettings,
    /// SQLite store.
    pub store: StoreSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl CourierSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.delivery.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "delivery.queue_capacity must be greater than 0".into(),
            ));
        }
        if self.delivery.outbound_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "delivery.outbound_buffer must be greater than 0".into(),
            ));
        }
        if self.directory.refresh_interval_secs == 0
            || self.directory.refresh_interval_secs >= self.directory.entry_ttl_secs
        {
            return Err(SettingsError::InvalidValue(format!(
                "directory.refresh_interval_secs ({}) must be between 1 and entry_ttl_secs ({})",
                self.directory.refresh_interval_secs, self.directory.entry_ttl_secs
            )));
        }
        if self.bus.kind == BusKind::Redis && self.bus.redis_url.is_empty() {
            return Err(SettingsError::InvalidValue(
                "bus.redis_url is required when bus.kind is redis".into(),
            ));
        }
        if self.store.pool_size == 0 {
            return Err(SettingsError::InvalidValue(
                "store.pool_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Return the configured instance id, generating and storing a fresh one
    /// when none is set.
    pub fn resolve_instance_id(&mut self) -> InstanceId {
        let id = self
            .instance
            .id
            .get_or_insert_with(|| InstanceId::new().into_inner());
        InstanceId::from(id.as_str())
    }
}

/// Identity of this process.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSettings {
    /// Instance id; also the bus channel this process subscribes to.
    /// Generated at boot when absent. The empty string is a valid id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Listener and WebSocket settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks an ephemeral port.
    pub port: u16,
    /// Interval between WebSocket pings.
    pub heartbeat_interval_secs: u64,
    /// A connection with no pong for this long is closed.
    pub pong_timeout_secs: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 60,
            max_message_size: 64 * 1024,
        }
    }
}

/// Dispatcher queue and write timeouts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Capacity of the dispatcher queue.
    pub queue_capacity: usize,
    /// How long a producer waits for queue space before dropping.
    pub enqueue_timeout_ms: u64,
    /// Bound on a single write to a local connection.
    pub write_timeout_ms: u64,
    /// Per-connection outbound frame buffer.
    pub outbound_buffer: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            enqueue_timeout_ms: 500,
            write_timeout_ms: 5_000,
            outbound_buffer: 256,
        }
    }
}

impl DeliverySettings {
    /// Enqueue timeout as a [`Duration`].
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    /// Write timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Directory entry lifetime.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorySettings {
    /// Entries older than this are treated as absent.
    pub entry_ttl_secs: u64,
    /// How often a live connection re-asserts its entry.
    pub refresh_interval_secs: u64,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            entry_ttl_secs: 300,
            refresh_interval_secs: 60,
        }
    }
}

/// Which bus implementation to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// In-process bus; instances must share one process.
    #[default]
    Local,
    /// Redis PUBLISH/SUBSCRIBE.
    Redis,
}

impl BusKind {
    /// Parse `local` / `redis` (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "redis" => Some(Self::Redis),
            _ => None,
        }
    }
}

/// Pub/sub transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Bus implementation.
    pub kind: BusKind,
    /// Redis connection URL (used when `kind` is `redis`).
    pub redis_url: String,
    /// Delay before the relay resubscribes after its subscription ends.
    pub resubscribe_delay_ms: u64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            kind: BusKind::Local,
            redis_url: "redis://127.0.0.1:6379".into(),
            resubscribe_delay_ms: 1_000,
        }
    }
}

/// SQLite store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Database file. Relative paths resolve against `~/.courier`;
    /// `:memory:` selects an in-memory database.
    pub db_path: String,
    /// Connection pool size.
    pub pool_size: u32,
    /// `SQLite` busy timeout.
    pub busy_timeout_ms: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "courier.db".into(),
            pool_size: 4,
            busy_timeout_ms: 5_000,
        }
    }
}

impl StoreSettings {
    /// Marker value selecting an in-memory database.
    pub const IN_MEMORY: &'static str = ":memory:";

    /// Whether the in-memory database is selected.
    pub fn is_in_memory(&self) -> bool {
        self.db_path == Self::IN_MEMORY
    }

    /// Absolute database path.
    pub fn resolved_db_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.db_path);
        if path.is_absolute() {
            path
        } else {
            crate::loader::courier_home().join(path)
        }
    }
}

/// Log output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// `compact` or `json`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "compact".into(),
        }
    }
}
