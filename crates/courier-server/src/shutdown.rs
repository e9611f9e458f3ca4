//! Instance-wide stop signal.
//!
//! One root [`CancellationToken`] per instance. The listener, relay and
//! dispatcher watch it directly; every session holds a child so a single
//! connection can be closed without touching the rest.

use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// How a drain ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that finished on their own.
    pub finished: usize,
    /// Tasks still running at the deadline, aborted.
    pub aborted: usize,
}

/// Owns the root stop token of one instance.
#[derive(Default)]
pub struct ShutdownCoordinator {
    root: CancellationToken,
}

impl ShutdownCoordinator {
    /// Fresh coordinator, not yet stopped.
    pub fn new() -> Self {
        Self::default()
    }

    /// The root token.
    pub fn token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// A token cancelled with the root that can also be cancelled alone.
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Stop, then give `handles` until `deadline` (30 s by default) to
    /// finish. Stragglers are aborted.
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        deadline: Option<Duration>,
    ) -> DrainReport {
        let deadline = deadline.unwrap_or(DRAIN_TIMEOUT);
        self.shutdown();
        info!(tasks = handles.len(), ?deadline, "draining instance tasks");

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let total = handles.len();
        if tokio::time::timeout(deadline, join_all(handles)).await.is_ok() {
            return DrainReport {
                finished: total,
                aborted: 0,
            };
        }

        let aborted = aborts.iter().filter(|a| !a.is_finished()).count();
        for abort in &aborts {
            abort.abort();
        }
        warn!(aborted, ?deadline, "drain deadline passed, aborting remaining tasks");
        DrainReport {
            finished: total - aborted,
            aborted,
        }
    }
}
