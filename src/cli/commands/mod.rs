//! Command implementations for Langlink
//!
//! Each command is implemented in its own module.

pub mod config;
pub mod query;
pub mod run;
pub mod servers;
