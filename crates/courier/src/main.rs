//! # courier
//!
//! Courier server binary: loads settings, opens the store and bus, and boots
//! one or more instances that route chat messages between each other.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use courier_bus::{Bus, LocalBus};
use courier_core::InstanceId;
use courier_core::logging::{LogFormat, init_subscriber};
use courier_server::config::ServerConfig;
use courier_server::metrics::install_recorder;
use courier_server::server::CourierServer;
use courier_settings::{BusKind, CourierSettings};
use courier_store::{ConnectionConfig, SqliteStore};

/// Courier chat router.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "Cross-instance real-time chat router")]
struct Cli {
    /// Settings file (defaults to `~/.courier/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Instance id (a fresh UUID when unset).
    #[arg(long)]
    instance_id: Option<String>,

    /// Path to the `SQLite` database, or `:memory:`.
    #[arg(long)]
    db_path: Option<String>,

    /// Bus transport: `local` or `redis`.
    #[arg(long, value_parser = parse_bus_kind)]
    bus: Option<BusKind>,

    /// Redis URL for the `redis` bus.
    #[arg(long)]
    redis_url: Option<String>,

    /// Boot N instances in this process on consecutive ports.
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u16).range(1..=64))]
    instances: u16,
}

fn parse_bus_kind(value: &str) -> Result<BusKind, String> {
    BusKind::parse(value).ok_or_else(|| format!("unknown bus '{value}' (expected local or redis)"))
}

impl Cli {
    /// CLI flags win over file and environment.
    fn apply(&self, settings: &mut CourierSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(id) = &self.instance_id {
            settings.instance.id = Some(id.clone());
        }
        if let Some(path) = &self.db_path {
            settings.store.db_path.clone_from(path);
        }
        if let Some(kind) = self.bus {
            settings.bus.kind = kind;
        }
        if let Some(url) = &self.redis_url {
            settings.bus.redis_url.clone_from(url);
        }
    }
}

/// Id and port of each instance booted by this process.
fn instance_plan(base_id: &InstanceId, base_port: u16, count: u16) -> Vec<(InstanceId, u16)> {
    if count <= 1 {
        return vec![(base_id.clone(), base_port)];
    }
    (0..count)
        .map(|i| {
            let port = if base_port == 0 { 0 } else { base_port.saturating_add(i) };
            (InstanceId::from(format!("{base_id}-{i}")), port)
        })
        .collect()
}

fn open_store(settings: &CourierSettings) -> Result<SqliteStore> {
    let ttl = Duration::from_secs(settings.directory.entry_ttl_secs);
    if settings.store.is_in_memory() {
        return SqliteStore::in_memory(ttl).context("Failed to open in-memory store");
    }
    let path = settings.store.resolved_db_path();
    let config = ConnectionConfig {
        pool_size: settings.store.pool_size,
        busy_timeout_ms: settings.store.busy_timeout_ms,
    };
    let store = SqliteStore::open(&path, &config, ttl)
        .with_context(|| format!("Failed to open database: {}", path.display()))?;
    tracing::info!(path = %path.display(), "database opened");
    Ok(store)
}

async fn open_bus(settings: &CourierSettings) -> Result<Arc<dyn Bus>> {
    match settings.bus.kind {
        BusKind::Local => Ok(Arc::new(LocalBus::new())),
        #[cfg(feature = "redis")]
        BusKind::Redis => {
            let bus = courier_bus::RedisBus::connect(&settings.bus.redis_url)
                .await
                .context("Failed to connect to Redis")?;
            tracing::info!(url = %settings.bus.redis_url, "redis bus connected");
            Ok(Arc::new(bus))
        }
        #[cfg(not(feature = "redis"))]
        BusKind::Redis => anyhow::bail!("redis bus requested but courier was built without the `redis` feature"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = match &args.settings {
        Some(path) => courier_settings::load_settings_from_path(path),
        None => courier_settings::load_settings(),
    }
    .context("Failed to load settings")?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    init_subscriber(&settings.logging.level, LogFormat::parse(&settings.logging.format));

    let base_id = settings.resolve_instance_id();
    let store = Arc::new(open_store(&settings)?);
    let bus = open_bus(&settings).await?;
    let metrics = install_recorder().context("Failed to install metrics recorder")?;

    let config = ServerConfig::from_settings(&settings);
    let mut servers = Vec::new();
    for (instance, port) in instance_plan(&base_id, config.port, args.instances) {
        let server = CourierServer::new(
            ServerConfig {
                port,
                ..config.clone()
            },
            instance.clone(),
            store.clone(),
            bus.clone(),
        )
        .with_metrics(metrics.clone());
        let (addr, handle) = server
            .listen()
            .await
            .with_context(|| format!("Failed to start instance {instance}"))?;
        tracing::info!(%instance, "Courier listening on http://{addr}");
        servers.push((server, handle));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    for (server, handle) in servers {
        let drain = server.shutdown().graceful_shutdown(vec![handle], None).await;
        tracing::debug!(instance = %server.instance(), ?drain, "instance drained");
        match store.clear_instance(server.instance()) {
            Ok(released) => {
                tracing::info!(instance = %server.instance(), released = released.len(), "directory entries released");
            }
            Err(error) => {
                tracing::warn!(instance = %server.instance(), %error, "failed to release directory entries");
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
