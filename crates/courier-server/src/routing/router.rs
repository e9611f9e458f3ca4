//! Local-vs-remote routing decisions.
//!
//! A private message for a user attached here goes straight to the
//! dispatcher. Everything else becomes one envelope per owning instance,
//! published on the channel named by that instance's id. Group messages
//! always take the bus path, including the partition owned by this instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use courier_bus::Bus;
use courier_core::{ChatMessage, Directory, GroupMembership, InstanceId, Target, UserId};
use futures::future::join_all;
use metrics::counter;
use tracing::{debug, instrument, warn};

use super::dispatcher::DispatcherHandle;
use super::errors::RouteError;
use crate::metrics::{BUS_PUBLISH_ERRORS_TOTAL, BUS_PUBLISH_TOTAL};

/// One step of a routing plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Hand to this instance's dispatcher.
    Local(ChatMessage),
    /// Publish `envelope` on `instance`'s channel.
    Publish {
        /// Channel (owning instance id).
        instance: InstanceId,
        /// Envelope addressed to that instance.
        envelope: ChatMessage,
    },
}

/// What [`Router::route`] will do with a message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutePlan {
    /// Deliveries in execution order; publishes are in instance-id order.
    pub deliveries: Vec<Delivery>,
    /// Recipients with no directory entry.
    pub unresolved: Vec<UserId>,
}

/// Outcome of routing one message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// Messages handed to the local dispatcher.
    pub local: usize,
    /// Envelopes published on the bus.
    pub published: usize,
    /// Recipients skipped for lack of a directory entry.
    pub unresolved: usize,
}

/// Routes messages for one instance.
pub struct Router {
    instance: InstanceId,
    directory: Arc<dyn Directory>,
    membership: Arc<dyn GroupMembership>,
    bus: Arc<dyn Bus>,
    dispatcher: DispatcherHandle,
}

impl Router {
    /// Create a router for `instance`.
    pub fn new(
        instance: InstanceId,
        directory: Arc<dyn Directory>,
        membership: Arc<dyn GroupMembership>,
        bus: Arc<dyn Bus>,
        dispatcher: DispatcherHandle,
    ) -> Self {
        Self {
            instance,
            directory,
            membership,
            bus,
            dispatcher,
        }
    }

    /// Instance this router runs on.
    pub fn instance(&self) -> &InstanceId {
        &self.instance
    }

    /// Compute deliveries for `message` without side effects.
    pub async fn plan(&self, message: &ChatMessage) -> Result<RoutePlan, RouteError> {
        match &message.target {
            Target::Direct { receiver } => self.plan_direct(message, receiver).await,
            Target::Group { name, .. } => self.plan_group(message, name).await,
        }
    }

    async fn plan_direct(
        &self,
        message: &ChatMessage,
        receiver: &UserId,
    ) -> Result<RoutePlan, RouteError> {
        let owner = self
            .directory
            .get_owner(receiver)
            .await
            .map_err(RouteError::Directory)?;

        let mut plan = RoutePlan::default();
        match owner {
            None => plan.unresolved.push(receiver.clone()),
            Some(owner) if owner == self.instance => {
                plan.deliveries.push(Delivery::Local(message.clone()));
            }
            Some(owner) => plan.deliveries.push(Delivery::Publish {
                envelope: message.envelope_for(owner.clone(), Vec::new()),
                instance: owner,
            }),
        }
        Ok(plan)
    }

    async fn plan_group(&self, message: &ChatMessage, name: &str) -> Result<RoutePlan, RouteError> {
        let members = self
            .membership
            .members_of(name)
            .await
            .map_err(RouteError::Membership)?;

        let owners = join_all(members.iter().map(|m| self.directory.get_owner(m))).await;

        let mut plan = RoutePlan::default();
        let mut partitions: BTreeMap<InstanceId, Vec<UserId>> = BTreeMap::new();
        for (member, owner) in members.into_iter().zip(owners) {
            match owner.map_err(RouteError::Directory)? {
                Some(owner) => partitions.entry(owner).or_default().push(member),
                None => plan.unresolved.push(member),
            }
        }

        plan.deliveries = partitions
            .into_iter()
            .map(|(instance, members)| Delivery::Publish {
                envelope: message.envelope_for(instance.clone(), members),
                instance,
            })
            .collect();
        Ok(plan)
    }

    /// Plan and execute delivery of `message`.
    ///
    /// Every publish in the plan is attempted; the first failure is returned
    /// after the rest have run. A full or closed dispatcher queue drops the
    /// local copy without failing the route.
    #[instrument(skip_all, fields(message_id = %message.id, sender = %message.sender, instance = %self.instance))]
    pub async fn route(&self, message: ChatMessage) -> Result<RouteReport, RouteError> {
        let plan = self.plan(&message).await?;
        let mut report = RouteReport {
            unresolved: plan.unresolved.len(),
            ..RouteReport::default()
        };
        if !plan.unresolved.is_empty() {
            debug!(unresolved = ?plan.unresolved, "recipients without directory entry");
        }

        let mut first_error = None;
        for delivery in plan.deliveries {
            match delivery {
                Delivery::Local(message) => match self.dispatcher.submit(message).await {
                    Ok(()) => report.local += 1,
                    Err(error) => warn!(%error, "local delivery dropped"),
                },
                Delivery::Publish { instance, envelope } => {
                    match self.publish(instance, &envelope).await {
                        Ok(()) => report.published += 1,
                        Err(error) => {
                            warn!(%error, "publish failed");
                            if first_error.is_none() {
                                first_error = Some(error);
                            }
                        }
                    }
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(report),
        }
    }

    async fn publish(&self, instance: InstanceId, envelope: &ChatMessage) -> Result<(), RouteError> {
        let payload = Bytes::from(serde_json::to_vec(envelope)?);
        match self.bus.publish(&instance, payload).await {
            Ok(receivers) => {
                counter!(BUS_PUBLISH_TOTAL).increment(1);
                debug!(target_instance = %instance, receivers, "envelope published");
                Ok(())
            }
            Err(source) => {
                counter!(BUS_PUBLISH_ERRORS_TOTAL).increment(1);
                Err(RouteError::Publish { instance, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::dispatcher::Dispatcher;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use courier_bus::{BusError, LocalBus, Subscription};
    use courier_core::{MessageId, StoreError};
    use courier_store::SqliteStore;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Fixture {
        store: Arc<SqliteStore>,
        bus: LocalBus,
        router: Router,
        queue: mpsc::Receiver<ChatMessage>,
    }

    fn fixture(instance: &str) -> Fixture {
        let store = Arc::new(SqliteStore::in_memory(Duration::from_secs(300)).unwrap());
        let bus = LocalBus::new();
        let (handle, queue) = Dispatcher::channel(16, Duration::from_millis(50));
        let router = Router::new(
            instance.into(),
            store.clone(),
            store.clone(),
            Arc::new(bus.clone()),
            handle,
        );
        Fixture {
            store,
            bus,
            router,
            queue,
        }
    }

    async fn attach(store: &SqliteStore, user: &str, instance: &str) {
        let _ = store.create_user(user).unwrap();
        store.set_owner(&user.into(), &instance.into()).await.unwrap();
    }

    fn direct(receiver: &str) -> ChatMessage {
        ChatMessage::direct(MessageId::new(), "hi bob".into(), "alice".into(), receiver.into())
    }

    fn group(name: &str) -> ChatMessage {
        ChatMessage::group(MessageId::new(), "hello team".into(), "alice".into(), name.into())
    }

    async fn next_envelope(sub: &mut Subscription) -> ChatMessage {
        let payload = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap();
        serde_json::from_slice(&payload).unwrap()
    }

    #[tokio::test]
    async fn same_instance_private_skips_bus() {
        let mut fx = fixture("A");
        attach(&fx.store, "bob", "A").await;

        let msg = direct("bob");
        let report = fx.router.route(msg.clone()).await.unwrap();
        assert_eq!(
            report,
            RouteReport {
                local: 1,
                published: 0,
                unresolved: 0
            }
        );
        assert_eq!(fx.bus.published_count(), 0);
        assert_eq!(fx.queue.recv().await.unwrap(), msg);
    }

    #[tokio::test]
    async fn cross_instance_private_publishes_once() {
        let fx = fixture("A");
        attach(&fx.store, "bob", "B").await;
        let mut sub = fx.bus.subscribe("B").await.unwrap();

        let msg = direct("bob");
        let report = fx.router.route(msg.clone()).await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(report.local, 0);
        assert_eq!(fx.bus.published_count(), 1);

        let envelope = next_envelope(&mut sub).await;
        assert_eq!(envelope.id, msg.id);
        assert_eq!(envelope.body, "hi bob");
        assert_eq!(envelope.sender.as_str(), "alice");
        assert_eq!(envelope.receiver().unwrap().as_str(), "bob");
        assert_eq!(envelope.origin_instance, Some(InstanceId::from("B")));
    }

    #[tokio::test]
    async fn unknown_receiver_is_dropped_silently() {
        let fx = fixture("A");
        let report = fx.router.route(direct("ghost")).await.unwrap();
        assert_eq!(report.unresolved, 1);
        assert_eq!(fx.bus.published_count(), 0);
    }

    #[tokio::test]
    async fn group_fanout_partitions_by_instance() {
        let fx = fixture("A");
        for (user, instance) in [("bob", "B"), ("carol", "B"), ("dave", "D")] {
            attach(&fx.store, user, instance).await;
        }
        let _ = fx.store.create_room("team").unwrap();
        for user in ["bob", "carol", "dave"] {
            let _ = fx.store.join_room("team", user).unwrap();
        }

        let plan = fx.router.plan(&group("team")).await.unwrap();
        assert!(plan.unresolved.is_empty());
        let partitions: Vec<(String, Vec<String>)> = plan
            .deliveries
            .iter()
            .map(|d| match d {
                Delivery::Publish { instance, envelope } => (
                    instance.to_string(),
                    envelope.group_members().iter().map(ToString::to_string).collect(),
                ),
                Delivery::Local(_) => panic!("group messages never deliver locally"),
            })
            .collect();
        assert_eq!(
            partitions,
            vec![
                ("B".to_string(), vec!["bob".to_string(), "carol".to_string()]),
                ("D".to_string(), vec!["dave".to_string()]),
            ]
        );

        let report = fx.router.route(group("team")).await.unwrap();
        assert_eq!(report.published, 2);
        assert_eq!(fx.bus.published_count(), 2);
    }

    #[tokio::test]
    async fn group_fanout_includes_own_instance_and_skips_unattached() {
        let fx = fixture("A");
        attach(&fx.store, "alice", "A").await;
        let _ = fx.store.create_user("erin").unwrap();
        let _ = fx.store.create_room("team").unwrap();
        for user in ["alice", "erin"] {
            let _ = fx.store.join_room("team", user).unwrap();
        }
        let mut own = fx.bus.subscribe("A").await.unwrap();

        let report = fx.router.route(group("team")).await.unwrap();
        assert_eq!(report.published, 1);
        assert_eq!(report.unresolved, 1);

        let envelope = next_envelope(&mut own).await;
        assert_eq!(envelope.group_name(), Some("team"));
        assert_eq!(envelope.group_members(), &[UserId::from("alice")]);
    }

    #[tokio::test]
    async fn unknown_group_publishes_nothing() {
        let fx = fixture("A");
        let report = fx.router.route(group("nobody")).await.unwrap();
        assert_eq!(report, RouteReport::default());
        assert_eq!(fx.bus.published_count(), 0);
    }

    #[tokio::test]
    async fn empty_instance_id_is_a_distinct_channel() {
        let mut fx = fixture("");
        attach(&fx.store, "bob", "").await;
        let report = fx.router.route(direct("bob")).await.unwrap();
        assert_eq!(report.local, 1);
        assert!(fx.queue.recv().await.is_some());
    }

    struct BrokenDirectory;

    #[async_trait]
    impl Directory for BrokenDirectory {
        async fn set_owner(&self, _: &UserId, _: &InstanceId) -> Result<(), StoreError> {
            Err(StoreError::backend("set_owner", "unavailable"))
        }
        async fn refresh_owner(&self, _: &UserId, _: &InstanceId) -> Result<bool, StoreError> {
            Err(StoreError::backend("refresh_owner", "unavailable"))
        }
        async fn get_owner(&self, _: &UserId) -> Result<Option<InstanceId>, StoreError> {
            Err(StoreError::backend("get_owner", "unavailable"))
        }
        async fn clear_owner(&self, _: &UserId, _: &InstanceId) -> Result<bool, StoreError> {
            Err(StoreError::backend("clear_owner", "unavailable"))
        }
    }

    struct BrokenBus;

    #[async_trait]
    impl Bus for BrokenBus {
        async fn publish(&self, _: &str, _: Bytes) -> courier_bus::Result<usize> {
            Err(BusError::Transport("down".into()))
        }
        async fn subscribe(&self, _: &str) -> courier_bus::Result<Subscription> {
            Err(BusError::Transport("down".into()))
        }
    }

    #[tokio::test]
    async fn directory_failure_is_typed() {
        let store = Arc::new(SqliteStore::in_memory(Duration::from_secs(300)).unwrap());
        let (handle, _queue) = Dispatcher::channel(4, Duration::from_millis(50));
        let router = Router::new(
            "A".into(),
            Arc::new(BrokenDirectory),
            store,
            Arc::new(LocalBus::new()),
            handle,
        );
        assert_matches!(router.route(direct("bob")).await, Err(RouteError::Directory(_)));
    }

    #[tokio::test]
    async fn publish_failure_is_typed() {
        let store = Arc::new(SqliteStore::in_memory(Duration::from_secs(300)).unwrap());
        attach(&store, "bob", "B").await;
        let (handle, _queue) = Dispatcher::channel(4, Duration::from_millis(50));
        let router = Router::new("A".into(), store.clone(), store, Arc::new(BrokenBus), handle);
        assert_matches!(
            router.route(direct("bob")).await,
            Err(RouteError::Publish { instance, .. }) if instance.as_str() == "B"
        );
    }
}
