//! Branded ID newtypes for type safety.
//!
//! Users, instances, connections and messages are all identified by plain
//! strings on the wire. Wrapping each in its own newtype keeps a user id from
//! being passed where an instance id (a bus channel name) is expected.
//!
//! Generated IDs are UUID v7 (time-ordered) via [`uuid::Uuid::now_v7`], so
//! message ids sort roughly by creation time and never collide across
//! instances.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generate a new UUID v7 string (time-ordered).
fn new_v7() -> String {
    Uuid::now_v7().to_string()
}

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

macro_rules! generated_id {
    ($name:ident) => {
        impl $name {
            /// Create a new random ID (UUID v7, time-ordered).
            #[must_use]
            pub fn new() -> Self {
                Self(new_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

branded_id! {
    /// Identity of a chat user (the username carried on the upgrade request).
    UserId
}

branded_id! {
    /// Identity of a running server instance. Doubles as the bus channel name.
    ///
    /// The empty string is a valid, distinct instance id.
    InstanceId
}

branded_id! {
    /// Unique identifier of a chat message, stamped at ingress.
    MessageId
}

branded_id! {
    /// Unique identifier of one accepted WebSocket connection.
    ConnectionId
}

generated_id!(InstanceId);
generated_id!(MessageId);
generated_id!(ConnectionId);

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_id_new_is_uuid_v7() {
        let id = MessageId::new();
        let parsed = Uuid::parse_str(id.as_str()).expect("should be valid UUID");
        assert_eq!(parsed.get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn message_ids_are_unique() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn message_ids_are_time_ordered() {
        let a = MessageId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = MessageId::new();
        assert!(a < b);
    }

    #[test]
    fn empty_instance_id_is_distinct() {
        let empty = InstanceId::from("");
        assert_eq!(empty.as_str(), "");
        assert_ne!(empty, InstanceId::from("a"));
    }

    #[test]
    fn deref_to_str() {
        let id = UserId::from("alice");
        let s: &str = &id;
        assert_eq!(s, "alice");
    }

    #[test]
    fn display() {
        let id = InstanceId::from("node-b");
        assert_eq!(format!("{id}"), "node-b");
    }

    #[test]
    fn into_string() {
        let id = UserId::from("bob");
        let s: String = id.into();
        assert_eq!(s, "bob");
    }

    #[test]
    fn serde_is_transparent() {
        let id = UserId::from("carol");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"carol\"");
        let back: UserId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn hashmap_lookup_by_str() {
        let mut map = std::collections::HashMap::new();
        let _ = map.insert(UserId::from("dave"), 1);
        assert_eq!(map.get("dave"), Some(&1));
    }
}
