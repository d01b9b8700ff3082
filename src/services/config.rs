//! Configuration service for Langlink

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ConfigError;
use crate::models::config::LanglinkConfig;

#[async_trait]
pub trait ConfigService: Send + Sync {
    async fn load(&self, global_only: bool) -> Result<LanglinkConfig, ConfigError>;
    fn config_path(&self, global: bool) -> PathBuf;
    async fn init(&self, global: bool, force: bool) -> Result<PathBuf, ConfigError>;
}

pub struct DefaultConfigService {
    root: PathBuf,
    global_path: PathBuf,
}

impl DefaultConfigService {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            global_path: Self::global_config_path(),
        }
    }

    /// Use a specific global config file instead of the XDG location
    pub fn with_global_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_path = path.into();
        self
    }

    fn global_config_path() -> PathBuf {
        // XDG standard: ~/.config/langlink/config.toml
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .ok()
            .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("langlink")
            .join("config.toml")
    }

    fn project_config_path(&self) -> PathBuf {
        self.root.join(".langlink").join("config.toml")
    }

    async fn load_from_path(path: &Path) -> Result<Option<LanglinkConfig>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(path).await?;
        toml::from_str(&content)
            .map(Some)
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
    }

    async fn write_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let config = LanglinkConfig {
            servers: crate::models::config::default_servers(),
            ..LanglinkConfig::default()
        };
        let content =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::Parse(e.to_string()))?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl ConfigService for DefaultConfigService {
    async fn load(&self, global_only: bool) -> Result<LanglinkConfig, ConfigError> {
        let global = Self::load_from_path(&self.global_path)
            .await?
            .unwrap_or_default();
        if global_only {
            return Ok(global);
        }

        let project = Self::load_from_path(&self.project_config_path()).await?;
        let config = merge_config(global, project);
        let config = apply_env_overrides(config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn config_path(&self, global: bool) -> PathBuf {
        if global {
            self.global_path.clone()
        } else {
            self.project_config_path()
        }
    }

    async fn init(&self, global: bool, force: bool) -> Result<PathBuf, ConfigError> {
        let path = self.config_path(global);

        if path.exists() && !force {
            return Err(ConfigError::InvalidValue {
                key: "config".to_string(),
                message: format!(
                    "Config already exists: {}. Use --force to overwrite.",
                    path.display()
                ),
            });
        }

        Self::write_default_config(&path).await?;
        Ok(path)
    }
}

/// Project settings win over global ones; a project file without servers
/// keeps the global server list.
fn merge_config(base: LanglinkConfig, overlay: Option<LanglinkConfig>) -> LanglinkConfig {
    let Some(overlay) = overlay else {
        return base;
    };
    LanglinkConfig {
        lsp: overlay.lsp,
        files: overlay.files,
        servers: if overlay.servers.is_empty() {
            base.servers
        } else {
            overlay.servers
        },
    }
}

fn apply_env_overrides<F>(mut config: LanglinkConfig, var: F) -> Result<LanglinkConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    fn parse<T: std::str::FromStr>(key: &str, value: String) -> Result<T, ConfigError> {
        value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse '{value}'"),
        })
    }

    if let Some(val) = var("LANGLINK_LSP_TIMEOUT") {
        config.lsp.timeout_secs = parse("LANGLINK_LSP_TIMEOUT", val)?;
    }
    if let Some(val) = var("LANGLINK_SYNC_DELAY_MS") {
        config.lsp.sync_delay_ms = parse("LANGLINK_SYNC_DELAY_MS", val)?;
    }
    if let Some(val) = var("LANGLINK_XFILES") {
        config.files.xfiles = parse("LANGLINK_XFILES", val)?;
    }
    if let Some(val) = var("LANGLINK_XCONTENT") {
        config.files.xcontent = parse("LANGLINK_XCONTENT", val)?;
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServerTransport;
    use tempfile::TempDir;

    fn service(temp: &TempDir) -> DefaultConfigService {
        DefaultConfigService::new(temp.path()).with_global_path(temp.path().join("global.toml"))
    }

    #[tokio::test]
    async fn test_missing_files_give_defaults() {
        let temp = TempDir::new().unwrap();
        let config = service(&temp).load(true).await.unwrap();
        assert!(config.servers.is_empty());
        assert_eq!(config.lsp.sync_delay_ms, 100);
        assert!(config.files.xfiles);
    }

    #[tokio::test]
    async fn test_project_overrides_global() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("global.toml"),
            r#"
[lsp]
timeout_secs = 10

[[servers]]
name = "go"
command = "go-langserver"
languages = ["go"]
"#,
        )
        .unwrap();
        std::fs::create_dir_all(temp.path().join(".langlink")).unwrap();
        std::fs::write(
            temp.path().join(".langlink/config.toml"),
            r#"
[files]
xcontent = false
"#,
        )
        .unwrap();

        let project = DefaultConfigService::load_from_path(&temp.path().join(".langlink/config.toml"))
            .await
            .unwrap();
        let global = DefaultConfigService::load_from_path(&temp.path().join("global.toml"))
            .await
            .unwrap()
            .unwrap();
        let merged = merge_config(global, project);

        assert_eq!(merged.servers.len(), 1);
        assert_eq!(merged.servers[0].name, "go");
        assert!(!merged.files.xcontent);
        assert!(merged.files.xfiles);
        // Project file did not set [lsp], so its defaults apply.
        assert_eq!(merged.lsp.timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_invalid_toml_is_parse_error() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("global.toml"), "[lsp\n").unwrap();
        let result = service(&temp).load(true).await;
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[tokio::test]
    async fn test_init_writes_loadable_defaults() {
        let temp = TempDir::new().unwrap();
        let service = service(&temp);

        let path = service.init(false, false).await.unwrap();
        assert_eq!(path, temp.path().join(".langlink/config.toml"));
        assert!(service.init(false, false).await.is_err());
        assert!(service.init(false, true).await.is_ok());

        let loaded = DefaultConfigService::load_from_path(&path)
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.servers.iter().any(|s| matches!(
            s.transport,
            ServerTransport::Tcp { ref address } if address == "127.0.0.1:2088"
        )));
    }

    #[test]
    fn test_env_overrides() {
        let vars = |key: &str| match key {
            "LANGLINK_SYNC_DELAY_MS" => Some("250".to_string()),
            "LANGLINK_XFILES" => Some("false".to_string()),
            _ => None,
        };
        let config = apply_env_overrides(LanglinkConfig::default(), vars).unwrap();
        assert_eq!(config.lsp.sync_delay_ms, 250);
        assert!(!config.files.xfiles);
        assert!(config.files.xcontent);

        let bad = apply_env_overrides(LanglinkConfig::default(), |key: &str| {
            (key == "LANGLINK_LSP_TIMEOUT").then(|| "soon".to_string())
        });
        assert!(matches!(bad, Err(ConfigError::InvalidValue { .. })));
    }
}
