//! Bridge from the bus channel named after this instance into the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use courier_bus::{Bus, BusError, Subscription};
use courier_core::{ChatMessage, InstanceId};
use futures::StreamExt;
use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::DispatcherHandle;
use crate::metrics::{RELAY_DECODE_ERRORS_TOTAL, RELAY_ENVELOPES_TOTAL, RELAY_MISADDRESSED_TOTAL};

/// What happened to one received payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Handed to the dispatcher.
    Forwarded,
    /// Not a valid envelope.
    Undecodable,
    /// Addressed to another instance.
    Misaddressed,
    /// The dispatcher refused it.
    Dropped,
}

/// Subscribes to this instance's channel and forwards envelopes.
pub struct Relay {
    instance: InstanceId,
    bus: Arc<dyn Bus>,
    dispatcher: DispatcherHandle,
    resubscribe_delay: Duration,
}

impl Relay {
    /// Create a relay for `instance`.
    pub fn new(
        instance: InstanceId,
        bus: Arc<dyn Bus>,
        dispatcher: DispatcherHandle,
        resubscribe_delay: Duration,
    ) -> Self {
        Self {
            instance,
            bus,
            dispatcher,
            resubscribe_delay,
        }
    }

    /// Open the subscription. Called once at startup, where failure is fatal.
    pub async fn subscribe(&self) -> Result<Subscription, BusError> {
        let subscription = self.bus.subscribe(&self.instance).await?;
        info!(instance = %self.instance, "relay subscribed");
        Ok(subscription)
    }

    /// Forward envelopes from `subscription` until `cancel` fires,
    /// resubscribing whenever the stream ends.
    pub async fn run(self, mut subscription: Subscription, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                payload = subscription.next() => match payload {
                    Some(payload) => {
                        let _ = self.handle(&payload).await;
                    }
                    None => {
                        warn!(instance = %self.instance, "relay subscription ended, resubscribing");
                        match self.resubscribe(&cancel).await {
                            Some(fresh) => subscription = fresh,
                            None => break,
                        }
                    }
                },
            }
        }
        info!(instance = %self.instance, "relay stopped");
    }

    async fn resubscribe(&self, cancel: &CancellationToken) -> Option<Subscription> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(self.resubscribe_delay) => {}
            }
            match self.bus.subscribe(&self.instance).await {
                Ok(subscription) => {
                    info!(instance = %self.instance, "relay resubscribed");
                    return Some(subscription);
                }
                Err(error) => warn!(instance = %self.instance, %error, "resubscribe failed"),
            }
        }
    }

    /// Decode one payload and forward it.
    pub async fn handle(&self, payload: &[u8]) -> RelayOutcome {
        counter!(RELAY_ENVELOPES_TOTAL).increment(1);
        let envelope: ChatMessage = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                counter!(RELAY_DECODE_ERRORS_TOTAL).increment(1);
                warn!(%error, len = payload.len(), "undecodable envelope skipped");
                return RelayOutcome::Undecodable;
            }
        };

        if let Some(origin) = &envelope.origin_instance {
            if origin != &self.instance {
                counter!(RELAY_MISADDRESSED_TOTAL).increment(1);
                warn!(message_id = %envelope.id, addressed_to = %origin, "misaddressed envelope skipped");
                return RelayOutcome::Misaddressed;
            }
        }

        debug!(message_id = %envelope.id, "envelope relayed");
        match self.dispatcher.submit(envelope).await {
            Ok(()) => RelayOutcome::Forwarded,
            Err(error) => {
                warn!(%error, "relayed envelope dropped");
                RelayOutcome::Dropped
            }
        }
    }
}
