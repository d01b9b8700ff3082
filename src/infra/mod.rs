//! Infrastructure layer for Langlink
//!
//! Protocol plumbing and filesystem access.

pub mod lsp;
pub mod workspace;
