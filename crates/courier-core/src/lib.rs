//! # courier-core
//!
//! Shared vocabulary of the Courier chat router:
//!
//! - **Branded IDs**: `UserId`, `InstanceId`, `MessageId`, `ConnectionId`
//! - **Messages**: `ChatMessage` with an enum target (direct or group)
//! - **Validation**: client frame decoding and field checks
//! - **Errors**: `thiserror` types for protocol, validation, auth, delivery
//!   and collaborator failures
//! - **Traits**: `Directory`, `GroupMembership`, `MessageStore`, `IdentityStore`
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod message;
pub mod traits;
pub mod validation;

pub use errors::{
    AuthenticationError, DeliveryError, ProtocolError, StoreError, ValidationError,
};
pub use ids::{ConnectionId, InstanceId, MessageId, UserId};
pub use message::{CONNECT_ACK, ChatMessage, EnvelopeError, FailureNotice, Target};
pub use traits::{Directory, GroupMembership, IdentityStore, MessageStore, User};
pub use validation::{ClientFrame, FieldError, decode_frame};
