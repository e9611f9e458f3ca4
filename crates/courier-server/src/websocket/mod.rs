//! WebSocket connections: the per-client handle and the session loop.

pub mod connection;
pub mod session;

pub use connection::ClientConnection;
pub use session::{SessionContext, authenticate, run_session};
