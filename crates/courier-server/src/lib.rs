//! # courier-server
//!
//! One Courier instance: axum HTTP + `WebSocket` server and cross-instance routing.
//!
//! - HTTP endpoints: health check, metrics, account and room management
//! - `WebSocket` gateway: identity check, heartbeat, per-connection writer
//! - Connection registry keyed by user (last writer wins)
//! - Router → bus → relay → dispatcher path for direct and group messages
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod http;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod routing;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use pipeline::{IngressError, IngressPipeline};
pub use registry::ConnectionRegistry;
pub use server::{AppState, CourierServer, ServerError};
pub use shutdown::{DrainReport, ShutdownCoordinator};
