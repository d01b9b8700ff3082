//! LSP client runtime
//!
//! - JSON-RPC 2.0 protocol types and Content-Length framing
//! - Transports: spawned process over stdio, or TCP
//! - Message connection with atomic request ids and cancellation
//! - Session handshake, document sync and dynamic registration
//! - Files extension (`workspace/xfiles`, `textDocument/xcontent`)

pub mod capabilities;
pub mod codec;
pub mod connection;
pub mod files;
pub mod manager;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod sync;
#[cfg(test)]
pub mod testing;
pub mod transport;

pub use capabilities::InitOptions;
pub use connection::Connection;
pub use manager::{SessionManager, SessionStatus};
pub use registry::CapabilityRegistry;
pub use session::{FailureDecision, InitFailurePolicy, Session, SessionOptions, SessionState};
pub use transport::{Connector, Duplex, ServerConnector};
