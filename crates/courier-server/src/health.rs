//! `GET /health` body.

use std::time::Instant;

use serde::Serialize;

/// Liveness of one instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting connections.
    Ok,
    /// Shutdown has started; connections are being closed.
    Draining,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `ok`, or `draining` once shutdown has begun.
    pub status: HealthStatus,
    /// Instance answering the probe.
    pub instance_id: String,
    /// Whole seconds since the instance was built.
    pub uptime_secs: u64,
    /// Users attached to this instance.
    pub connections: usize,
}

/// Snapshot the instance state for a health probe.
pub fn health_check(
    start_time: Instant,
    instance_id: &str,
    connections: usize,
    draining: bool,
) -> HealthResponse {
    HealthResponse {
        status: if draining {
            HealthStatus::Draining
        } else {
            HealthStatus::Ok
        },
        instance_id: instance_id.to_owned(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
    }
}
