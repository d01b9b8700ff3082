//! Service layer for Langlink

pub mod config;
pub mod host;

pub use config::{ConfigService, DefaultConfigService};
pub use host::{Host, LocalHost, PromptMode};
