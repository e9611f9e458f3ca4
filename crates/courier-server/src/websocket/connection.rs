//! Handle to one attached client.
//!
//! The session's writer task owns the socket; everything else talks to the
//! client through this handle's bounded outbound queue, so writes to one
//! connection are serialized.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use courier_core::{ConnectionId, DeliveryError, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

/// Close reason used when nothing more specific was recorded.
pub const DEFAULT_CLOSE_REASON: &str = "connection closing";

/// Close reason sent to a connection replaced by a newer login.
pub const REPLACED_CLOSE_REASON: &str = "Session replaced by a newer connection";

/// A connected, authenticated client.
pub struct ClientConnection {
    /// Unique per accepted socket; distinguishes old and new handles of one user.
    pub id: ConnectionId,
    /// Authenticated user.
    pub user: UserId,
    tx: mpsc::Sender<Arc<String>>,
    cancel: CancellationToken,
    close_reason: Mutex<Option<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a handle writing into `tx`. Cancelling `cancel` ends the session.
    pub fn new(user: UserId, tx: mpsc::Sender<Arc<String>>, cancel: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::new(),
            user,
            tx,
            cancel,
            close_reason: Mutex::new(None),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a frame, waiting at most `timeout` for room.
    pub async fn deliver(&self, frame: Arc<String>, timeout: Duration) -> Result<(), DeliveryError> {
        if self.cancel.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        match self.tx.send_timeout(frame, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(DeliveryError::Timeout),
            Err(SendTimeoutError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Queue a reply without waiting.
    ///
    /// Returns `false` if the queue is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, frame: Arc<String>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Replies dropped because the queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// End the session with `reason` in the close frame.
    ///
    /// The first recorded reason wins.
    pub fn close(&self, reason: &str) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason.to_owned());
            }
        }
        self.cancel.cancel();
    }

    /// Reason to put in the close frame.
    pub fn close_reason(&self) -> String {
        self.close_reason
            .lock()
            .clone()
            .unwrap_or_else(|| DEFAULT_CLOSE_REASON.to_owned())
    }

    /// Whether the session has been told to stop.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the session has been told to stop.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    /// Mark the connection as alive (pong received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Duration since the last pong (or connection establishment).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
