//! Per-frame ingress: decode, stamp, validate, persist, route.
//!
//! Kept apart from the socket so every outcome can be exercised without a
//! WebSocket. The session turns an [`IngressError`] into the reply frame.

use std::sync::Arc;

use courier_core::{
    ChatMessage, FailureNotice, MessageId, MessageStore, ProtocolError, Target, UserId,
    ValidationError, decode_frame,
};
use metrics::counter;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::metrics::{MESSAGES_RECEIVED_TOTAL, MESSAGES_REJECTED_TOTAL, PERSISTENCE_ERRORS_TOTAL};
use crate::routing::{RouteError, RouteReport, Router};

/// Why a client frame did not make it onto a route.
#[derive(Debug, Error)]
pub enum IngressError {
    /// Not JSON, or the wrong shape.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Decoded but failed field checks.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Directory or bus failure while routing.
    #[error(transparent)]
    Route(#[from] RouteError),
}

impl IngressError {
    /// Frame sent back to the sender.
    ///
    /// Validation failures list every field error; anything else is the
    /// generic failure notice.
    pub fn reply(&self) -> String {
        let encoded = match self {
            Self::Validation(ValidationError(fields)) => serde_json::to_string(fields),
            Self::Protocol(_) | Self::Route(_) => serde_json::to_string(&FailureNotice::send_failed()),
        };
        encoded.unwrap_or_else(|_| r#"{"message":"Failed to send message"}"#.to_owned())
    }

    /// Label for the rejection counter.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "malformed",
            Self::Validation(_) => "invalid",
            Self::Route(_) => "routing",
        }
    }
}

/// Shared by every session of one instance.
pub struct IngressPipeline {
    router: Arc<Router>,
    history: Arc<dyn MessageStore>,
}

impl IngressPipeline {
    /// Create a pipeline routing through `router` and recording into `history`.
    pub fn new(router: Arc<Router>, history: Arc<dyn MessageStore>) -> Self {
        Self { router, history }
    }

    /// Process one text frame from `sender`.
    ///
    /// Any `id` or `sender` in the frame is ignored; both are stamped here.
    /// Persistence starts in the background before routing and never fails
    /// the message.
    #[instrument(skip_all, fields(user = %sender))]
    pub async fn handle_text(&self, sender: &UserId, text: &str) -> Result<RouteReport, IngressError> {
        counter!(MESSAGES_RECEIVED_TOTAL).increment(1);
        let result = self.process(sender, text).await;
        if let Err(error) = &result {
            counter!(MESSAGES_REJECTED_TOTAL, "reason" => error.reason()).increment(1);
        }
        result
    }

    async fn process(&self, sender: &UserId, text: &str) -> Result<RouteReport, IngressError> {
        let frame = decode_frame(text).map_err(ProtocolError::from)?;
        let message = frame.into_message(MessageId::new(), sender.clone())?;
        self.persist(&message);
        Ok(self.router.route(message).await?)
    }

    fn persist(&self, message: &ChatMessage) {
        let history = self.history.clone();
        let message = message.clone();
        let _ = tokio::spawn(async move {
            let result = match &message.target {
                Target::Direct { receiver } => {
                    history
                        .save_private_message(&message.id, &message.body, &message.sender, receiver)
                        .await
                }
                Target::Group { name, .. } => {
                    history
                        .save_group_message(&message.id, &message.body, &message.sender, name)
                        .await
                }
            };
            if let Err(error) = result {
                counter!(PERSISTENCE_ERRORS_TOTAL).increment(1);
                warn!(message_id = %message.id, %error, "failed to persist message");
            }
        });
    }
}
