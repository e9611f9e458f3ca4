//! Final delivery to local connections.
//!
//! Producers (the router for same-instance private messages, the relay for
//! everything arriving over the bus) enqueue through a [`DispatcherHandle`].
//! A single [`Dispatcher`] task drains the bounded queue in order.

use std::sync::Arc;
use std::time::Duration;

use courier_core::{ChatMessage, UserId};
use futures::future::join_all;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::errors::DispatchError;
use crate::metrics::{
    DISPATCH_DELIVERED_TOTAL, DISPATCH_EVICTIONS_TOTAL, DISPATCH_OFFLINE_TOTAL,
    DISPATCH_QUEUE_DROPS_TOTAL,
};
use crate::registry::ConnectionRegistry;

/// Close reason for a connection evicted after a failed write.
pub const EVICTED_CLOSE_REASON: &str = "connection closing";

/// Outcome of dispatching one message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Recipients whose connection accepted the frame.
    pub delivered: usize,
    /// Recipients with no local connection.
    pub offline: usize,
    /// Recipients whose connection failed and was evicted.
    pub evicted: usize,
}

/// Producer side of the dispatcher queue.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<ChatMessage>,
    enqueue_timeout: Duration,
}

impl DispatcherHandle {
    /// Enqueue `message`, waiting at most the configured enqueue timeout.
    ///
    /// On timeout the message is dropped and counted.
    pub async fn submit(&self, message: ChatMessage) -> Result<(), DispatchError> {
        match self.tx.send_timeout(message, self.enqueue_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(message)) => {
                counter!(DISPATCH_QUEUE_DROPS_TOTAL).increment(1);
                warn!(message_id = %message.id, "dispatcher queue full, message dropped");
                Err(DispatchError::QueueFull)
            }
            Err(SendTimeoutError::Closed(_)) => Err(DispatchError::Closed),
        }
    }
}

/// Consumer of the dispatcher queue.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    write_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher delivering into `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>, write_timeout: Duration) -> Self {
        Self {
            registry,
            write_timeout,
        }
    }

    /// Create the queue; returns the producer handle and the receiver to pass
    /// to [`Dispatcher::run`].
    pub fn channel(
        capacity: usize,
        enqueue_timeout: Duration,
    ) -> (DispatcherHandle, mpsc::Receiver<ChatMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            DispatcherHandle {
                tx,
                enqueue_timeout,
            },
            rx,
        )
    }

    /// Drain `queue` until it closes or `cancel` fires.
    pub async fn run(self, mut queue: mpsc::Receiver<ChatMessage>, cancel: CancellationToken) {
        info!("dispatcher started");
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => break,
                message = queue.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let _ = self.dispatch(&message).await;
        }
        info!("dispatcher stopped");
    }

    /// Deliver `message` to its local recipients.
    ///
    /// Group messages go to every member in `group_members` with a live
    /// entry; private messages go to the receiver. A failed or timed-out
    /// write evicts only that connection; the other recipients still get
    /// the frame.
    #[instrument(skip_all, fields(message_id = %message.id))]
    pub async fn dispatch(&self, message: &ChatMessage) -> DispatchReport {
        let recipients: Vec<&UserId> = match message.receiver() {
            Some(receiver) => vec![receiver],
            None => message.group_members().iter().collect(),
        };

        let frame = match serde_json::to_string(&message.client_frame()) {
            Ok(json) => Arc::new(json),
            Err(error) => {
                warn!(%error, "failed to encode client frame");
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport::default();
        let mut writes = Vec::with_capacity(recipients.len());
        for user in recipients {
            match self.registry.get(user) {
                Some(connection) => {
                    let frame = frame.clone();
                    let timeout = self.write_timeout;
                    writes.push(async move {
                        let result = connection.deliver(frame, timeout).await;
                        (connection, result)
                    });
                }
                None => {
                    debug!(user = %user, "recipient offline");
                    report.offline += 1;
                }
            }
        }

        for (connection, result) in join_all(writes).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    warn!(user = %connection.user, conn_id = %connection.id, %error, "delivery failed, evicting connection");
                    let _ = self.registry.remove_if(&connection.user, &connection.id);
                    connection.close(EVICTED_CLOSE_REASON);
                    report.evicted += 1;
                }
            }
        }

        counter!(DISPATCH_DELIVERED_TOTAL).increment(report.delivered as u64);
        counter!(DISPATCH_OFFLINE_TOTAL).increment(report.offline as u64);
        counter!(DISPATCH_EVICTIONS_TOTAL).increment(report.evicted as u64);
        report
    }
}
