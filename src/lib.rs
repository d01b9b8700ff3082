//! Langlink - Language Server Protocol client runtime
//!
//! Connects editors to language servers: transport, JSON-RPC message
//! connection, initialize handshake with retry, document synchronization,
//! dynamic capability registration and the files extension.

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod infra;
pub mod models;
pub mod services;

pub use error::{LinkError, LinkResult};
