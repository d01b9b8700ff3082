//! Application container for Langlink

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::OutputContext;
use crate::config;
use crate::models::config::LanglinkConfig;
use crate::services::config::{ConfigService, DefaultConfigService};
use crate::services::host::{LocalHost, PromptMode};

pub struct App {
    root: PathBuf,
    pub(crate) output: OutputContext,
    pub(crate) config_service: Arc<dyn ConfigService>,
    pub(crate) config: LanglinkConfig,
}

impl App {
    pub async fn new() -> anyhow::Result<Self> {
        let root = std::env::current_dir()?;
        Self::with_root(root).await
    }

    pub async fn with_root(root: PathBuf) -> anyhow::Result<Self> {
        tracing::debug!("Initializing Langlink at {:?}", root);

        let output = OutputContext::new(root.clone());
        let config_service = Arc::new(DefaultConfigService::new(&root));
        let config = match config_service.load(false).await {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Using default configuration: {}", e);
                LanglinkConfig::default()
            }
        };

        config::init(&config);

        Ok(Self {
            root,
            output,
            config_service,
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &LanglinkConfig {
        &self.config
    }

    /// Filesystem host rooted at the workspace
    pub fn host(&self, interactive: bool) -> Arc<LocalHost> {
        let prompt = if interactive {
            PromptMode::Interactive
        } else {
            PromptMode::Fixed(None)
        };
        Arc::new(LocalHost::new(&self.root, &self.config.files).with_prompt(prompt))
    }
}
