//! Global Configuration Singleton

use std::sync::OnceLock;
use std::time::Duration;

use crate::models::config::LanglinkConfig;

static CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Request,
    WorkspaceOperation,
    Initialization,
    Shutdown,
}

impl OperationType {
    pub fn from_method(method: &str) -> Self {
        match method {
            "workspace/symbol"
            | "textDocument/references"
            | "textDocument/implementation"
            | "textDocument/rename" => Self::WorkspaceOperation,
            "initialize" => Self::Initialization,
            "shutdown" => Self::Shutdown,
            _ => Self::Request,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    base_timeout: Duration,
    init_timeout: Duration,
    shutdown_timeout: Duration,
    pub sync_delay: Duration,
    pub prompt_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from(&LanglinkConfig::default())
    }
}

impl From<&LanglinkConfig> for RuntimeConfig {
    fn from(config: &LanglinkConfig) -> Self {
        Self {
            base_timeout: Duration::from_secs(config.lsp.timeout_secs),
            init_timeout: Duration::from_secs(config.lsp.init_timeout_secs),
            shutdown_timeout: Duration::from_secs(config.lsp.shutdown_timeout_secs),
            sync_delay: Duration::from_millis(config.lsp.sync_delay_ms),
            prompt_timeout: Duration::from_secs(config.lsp.prompt_timeout_secs),
        }
    }
}

impl RuntimeConfig {
    pub fn timeout_for(&self, method: &str) -> Duration {
        match OperationType::from_method(method) {
            OperationType::Request => self.base_timeout,
            OperationType::WorkspaceOperation => self.base_timeout * 4,
            OperationType::Initialization => self.init_timeout,
            OperationType::Shutdown => self.shutdown_timeout,
        }
    }
}

pub fn init(config: &LanglinkConfig) {
    let _ = CONFIG.set(RuntimeConfig::from(config));
}

pub fn timeout_for(method: &str) -> Duration {
    config().timeout_for(method)
}

pub fn sync_delay() -> Duration {
    config().sync_delay
}

pub fn prompt_timeout() -> Duration {
    config().prompt_timeout
}

pub fn is_initialized() -> bool {
    CONFIG.get().is_some()
}

fn config() -> RuntimeConfig {
    CONFIG.get().cloned().unwrap_or_default()
}
