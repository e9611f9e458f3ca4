//! `ChatMessage`: the unit of transport and routing.
//!
//! A message targets either a single receiver or a named group. The target is
//! an enum, so a message with both (or neither) cannot be built in memory.
//! The JSON form stays flat for wire compatibility:
//!
//! ```json
//! {"id":"…","msg":"hi","sender":"alice","receiver":"bob","is_group":false}
//! {"id":"…","msg":"hi","sender":"alice","is_group":true,"group_name":"team",
//!  "group_members":["bob","carol"],"origin_instance":"B"}
//! ```
//!
//! Decoding a flat form that violates the target invariant fails.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{InstanceId, MessageId, UserId};

/// Text frame sent to a client right after its connection is accepted.
pub const CONNECT_ACK: &str = "ok";

/// Who a message is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// One-to-one message.
    Direct {
        /// The recipient.
        receiver: UserId,
    },
    /// Group message.
    Group {
        /// Group (room) name.
        name: String,
        /// Members this copy is addressed to. Empty on client-facing frames
        /// and on freshly submitted messages; populated on bus envelopes.
        members: Vec<UserId>,
    },
}

/// A routed chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub struct ChatMessage {
    /// Unique id stamped at ingress.
    pub id: MessageId,
    /// Text payload (wire name `msg`).
    pub body: String,
    /// Authenticated sender.
    pub sender: UserId,
    /// Direct receiver or group.
    pub target: Target,
    /// Instance a bus envelope is addressed to. `None` outside the bus.
    pub origin_instance: Option<InstanceId>,
}

impl ChatMessage {
    /// Build a direct message.
    pub fn direct(id: MessageId, body: String, sender: UserId, receiver: UserId) -> Self {
        Self {
            id,
            body,
            sender,
            target: Target::Direct { receiver },
            origin_instance: None,
        }
    }

    /// Build a group message with no member subset yet.
    pub fn group(id: MessageId, body: String, sender: UserId, name: String) -> Self {
        Self {
            id,
            body,
            sender,
            target: Target::Group {
                name,
                members: Vec::new(),
            },
            origin_instance: None,
        }
    }

    /// Whether this is a group message.
    pub fn is_group(&self) -> bool {
        matches!(self.target, Target::Group { .. })
    }

    /// Receiver of a direct message.
    pub fn receiver(&self) -> Option<&UserId> {
        match &self.target {
            Target::Direct { receiver } => Some(receiver),
            Target::Group { .. } => None,
        }
    }

    /// Group name of a group message.
    pub fn group_name(&self) -> Option<&str> {
        match &self.target {
            Target::Group { name, .. } => Some(name),
            Target::Direct { .. } => None,
        }
    }

    /// Member subset of a group envelope (empty for direct messages).
    pub fn group_members(&self) -> &[UserId] {
        match &self.target {
            Target::Group { members, .. } => members,
            Target::Direct { .. } => &[],
        }
    }

    /// Envelope of this message addressed to `instance`.
    ///
    /// For group messages `members` replaces the member subset; it is ignored
    /// for direct messages. Every other field is copied from `self`.
    #[must_use]
    pub fn envelope_for(&self, instance: InstanceId, members: Vec<UserId>) -> Self {
        let target = match &self.target {
            Target::Direct { receiver } => Target::Direct {
                receiver: receiver.clone(),
            },
            Target::Group { name, .. } => Target::Group {
                name: name.clone(),
                members,
            },
        };
        Self {
            id: self.id.clone(),
            body: self.body.clone(),
            sender: self.sender.clone(),
            target,
            origin_instance: Some(instance),
        }
    }

    /// The frame a recipient's client sees: routing-only fields stripped.
    #[must_use]
    pub fn client_frame(&self) -> Self {
        let target = match &self.target {
            Target::Direct { receiver } => Target::Direct {
                receiver: receiver.clone(),
            },
            Target::Group { name, .. } => Target::Group {
                name: name.clone(),
                members: Vec::new(),
            },
        };
        Self {
            id: self.id.clone(),
            body: self.body.clone(),
            sender: self.sender.clone(),
            target,
            origin_instance: None,
        }
    }
}

/// A wire form that does not describe a valid target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// `is_group` is false but no receiver is present.
    #[error("private message without receiver")]
    MissingReceiver,
    /// `is_group` is true but no group name is present.
    #[error("group message without group_name")]
    MissingGroupName,
    /// Both a receiver and a group name are present.
    #[error("message carries both receiver and group_name")]
    AmbiguousTarget,
    /// A group envelope addressed to an instance lists no members.
    #[error("group envelope without group_members")]
    EmptyMembers,
}

/// Flat JSON shape shared by clients and the bus.
#[derive(Serialize, Deserialize)]
struct WireMessage {
    id: MessageId,
    msg: String,
    sender: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    receiver: Option<UserId>,
    is_group: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    group_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    group_members: Vec<UserId>,
    #[serde(default, alias = "server_id", skip_serializing_if = "Option::is_none")]
    origin_instance: Option<InstanceId>,
}

impl TryFrom<WireMessage> for ChatMessage {
    type Error = EnvelopeError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let target = match (wire.is_group, wire.receiver, wire.group_name) {
            (_, Some(_), Some(_)) => return Err(EnvelopeError::AmbiguousTarget),
            (true, _, Some(_)) if wire.origin_instance.is_some() && wire.group_members.is_empty() => {
                return Err(EnvelopeError::EmptyMembers);
            }
            (true, _, Some(name)) => Target::Group {
                name,
                members: wire.group_members,
            },
            (true, _, None) => return Err(EnvelopeError::MissingGroupName),
            (false, Some(receiver), _) => Target::Direct { receiver },
            (false, None, _) => return Err(EnvelopeError::MissingReceiver),
        };
        Ok(Self {
            id: wire.id,
            body: wire.msg,
            sender: wire.sender,
            target,
            origin_instance: wire.origin_instance,
        })
    }
}

impl From<ChatMessage> for WireMessage {
    fn from(message: ChatMessage) -> Self {
        let (is_group, receiver, group_name, group_members) = match message.target {
            Target::Direct { receiver } => (false, Some(receiver), None, Vec::new()),
            Target::Group { name, members } => (true, None, Some(name), members),
        };
        Self {
            id: message.id,
            msg: message.body,
            sender: message.sender,
            receiver,
            is_group,
            group_name,
            group_members,
            origin_instance: message.origin_instance,
        }
    }
}

/// Notice sent to a sender whose frame could not be processed or routed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    /// Human-readable reason.
    pub message: String,
}

impl FailureNotice {
    /// The standard "could not send" notice.
    pub fn send_failed() -> Self {
        Self {
            message: "Failed to send message".into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
