//! Client frame decoding and field validation.
//!
//! Clients send `{"msg", "is_group", "receiver"?, "group_name"?}`. Any `id` or
//! `sender` they include is ignored: the pipeline stamps both before
//! validation. Lengths are counted in Unicode scalar values.

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::ids::{MessageId, UserId};
use crate::message::ChatMessage;

/// Inclusive upper bound on `msg` length.
pub const MAX_BODY_CHARS: usize = 1000;

/// Inclusive upper bound on `group_name` length.
pub const MAX_GROUP_NAME_CHARS: usize = 25;

/// A frame as submitted by a client, before validation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ClientFrame {
    /// Message text.
    #[serde(default)]
    pub msg: Option<String>,
    /// Discriminator. Must be present.
    #[serde(default)]
    pub is_group: Option<bool>,
    /// Direct receiver.
    #[serde(default)]
    pub receiver: Option<String>,
    /// Group name.
    #[serde(default)]
    pub group_name: Option<String>,
}

/// One failed field check, sent back to the client as part of a list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Offending field name.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_owned(),
            message: message.into(),
        }
    }
}

/// Decode a raw text frame.
pub fn decode_frame(text: &str) -> Result<ClientFrame, serde_json::Error> {
    serde_json::from_str(text)
}

fn length_message(max: usize) -> String {
    format!("character length should be between 1 and {max}")
}

impl ClientFrame {
    /// Stamp `id` and `sender` and validate every field.
    ///
    /// All failures are collected, so a client sees every problem at once.
    pub fn into_message(self, id: MessageId, sender: UserId) -> Result<ChatMessage, ValidationError> {
        let mut errors = Vec::new();

        match self.msg.as_deref() {
            None | Some("") => errors.push(FieldError::new("msg", "msg field is required")),
            Some(body) if body.chars().count() > MAX_BODY_CHARS => {
                errors.push(FieldError::new("msg", length_message(MAX_BODY_CHARS)));
            }
            Some(_) => {}
        }

        let group_name_len_ok = match self.group_name.as_deref() {
            Some(name) => {
                let len = name.chars().count();
                let ok = (1..=MAX_GROUP_NAME_CHARS).contains(&len);
                if !ok {
                    errors.push(FieldError::new("group_name", length_message(MAX_GROUP_NAME_CHARS)));
                }
                ok
            }
            None => true,
        };

        let receiver = self.receiver.filter(|r| !r.is_empty());

        match self.is_group {
            None => errors.push(FieldError::new("is_group", "is_group field cannot be empty")),
            Some(true) => {
                if self.group_name.is_none() {
                    errors.push(FieldError::new(
                        "group_name",
                        "group_name is required for group messages",
                    ));
                }
                if receiver.is_some() {
                    errors.push(FieldError::new(
                        "receiver",
                        "receiver must be empty for group messages",
                    ));
                }
            }
            Some(false) => {
                if receiver.is_none() {
                    errors.push(FieldError::new(
                        "receiver",
                        "receiver is required for private messages",
                    ));
                }
                if self.group_name.is_some() && group_name_len_ok {
                    errors.push(FieldError::new(
                        "group_name",
                        "group_name must be empty for private messages",
                    ));
                }
            }
        }

        if !errors.is_empty() {
            return Err(ValidationError(errors));
        }

        // The fallback arm is unreachable after the checks above.
        let body = self.msg.unwrap_or_default();
        match (self.is_group, receiver, self.group_name) {
            (Some(true), None, Some(name)) => Ok(ChatMessage::group(id, body, sender, name)),
            (Some(false), Some(receiver), None) => {
                Ok(ChatMessage::direct(id, body, sender, UserId::from(receiver)))
            }
            _ => Err(ValidationError(vec![FieldError::new(
                "is_group",
                "inconsistent message target",
            )])),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
