//! Configuration model for Langlink
//!
//! Servers are described statically; a [`ServerConfig`] is never mutated after
//! the configuration is loaded.

use serde::{Deserialize, Serialize};

use super::document::DocumentSelector;

/// Langlink configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LanglinkConfig {
    #[serde(default)]
    pub lsp: LspSettings,

    #[serde(default)]
    pub files: FilesSettings,

    /// Configured language servers. Empty means "use the built-in defaults".
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl LanglinkConfig {
    /// Configured servers, falling back to the built-in set when none are given.
    pub fn effective_servers(&self) -> Vec<ServerConfig> {
        if self.servers.is_empty() {
            default_servers()
        } else {
            self.servers.clone()
        }
    }

    pub fn server(&self, name: &str) -> Option<ServerConfig> {
        self.effective_servers().into_iter().find(|s| s.name == name)
    }
}

/// Protocol timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LspSettings {
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "defaults::init_timeout_secs")]
    pub init_timeout_secs: u64,

    #[serde(default = "defaults::shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Coalescing window for full-document sync
    #[serde(default = "defaults::sync_delay_ms")]
    pub sync_delay_ms: u64,

    /// How long a retry prompt waits for an answer before giving up
    #[serde(default = "defaults::prompt_timeout_secs")]
    pub prompt_timeout_secs: u64,
}

impl Default for LspSettings {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::timeout_secs(),
            init_timeout_secs: defaults::init_timeout_secs(),
            shutdown_timeout_secs: defaults::shutdown_timeout_secs(),
            sync_delay_ms: defaults::sync_delay_ms(),
            prompt_timeout_secs: defaults::prompt_timeout_secs(),
        }
    }
}

/// Files extension settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesSettings {
    /// Advertise `xfilesProvider`
    #[serde(default = "defaults::enabled")]
    pub xfiles: bool,

    /// Advertise `xcontentProvider`
    #[serde(default = "defaults::enabled")]
    pub xcontent: bool,

    #[serde(default = "defaults::enabled")]
    pub respect_gitignore: bool,

    #[serde(default)]
    pub include_hidden: bool,
}

impl Default for FilesSettings {
    fn default() -> Self {
        Self {
            xfiles: defaults::enabled(),
            xcontent: defaults::enabled(),
            respect_gitignore: defaults::enabled(),
            include_hidden: false,
        }
    }
}

mod defaults {
    pub fn timeout_secs() -> u64 {
        30
    }
    pub fn init_timeout_secs() -> u64 {
        60
    }
    pub fn shutdown_timeout_secs() -> u64 {
        2
    }
    pub fn sync_delay_ms() -> u64 {
        100
    }
    pub fn prompt_timeout_secs() -> u64 {
        60
    }
    pub fn enabled() -> bool {
        true
    }
}

/// How to reach one language server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerTransport {
    /// Spawn a process and talk over its stdin/stdout
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Connect to a listening server, e.g. `127.0.0.1:2088`
    Tcp { address: String },
}

impl std::fmt::Display for ServerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio { command, args } if args.is_empty() => write!(f, "stdio:{command}"),
            Self::Stdio { command, args } => write!(f, "stdio:{} {}", command, args.join(" ")),
            Self::Tcp { address } => write!(f, "tcp:{address}"),
        }
    }
}

/// One configured language server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,

    #[serde(flatten)]
    pub transport: ServerTransport,

    /// Language identifiers the server is responsible for
    #[serde(default)]
    pub languages: Vec<String>,

    /// File glob patterns the server is responsible for
    #[serde(default)]
    pub patterns: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initialization_options: Option<serde_json::Value>,
}

impl ServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, languages: &[&str]) -> Self {
        Self {
            name: name.into(),
            transport: ServerTransport::Stdio {
                command: command.into(),
                args: Vec::new(),
            },
            languages: languages.iter().map(|l| l.to_string()).collect(),
            patterns: Vec::new(),
            initialization_options: None,
        }
    }

    pub fn tcp(name: impl Into<String>, address: impl Into<String>, languages: &[&str]) -> Self {
        Self {
            name: name.into(),
            transport: ServerTransport::Tcp {
                address: address.into(),
            },
            languages: languages.iter().map(|l| l.to_string()).collect(),
            patterns: Vec::new(),
            initialization_options: None,
        }
    }

    pub fn selector(&self) -> DocumentSelector {
        DocumentSelector::from_languages_and_patterns(&self.languages, &self.patterns)
    }
}

/// Built-in servers used when the configuration names none
pub fn default_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig::stdio("sample_server", "sample_server", &["plaintext"]),
        ServerConfig::stdio("langserver-go", "langserver-go", &["go"]),
        ServerConfig::stdio("langserver-python", "langserver-python", &["python"]),
        ServerConfig::stdio("langserver-ctags", "langserver-ctags", &["php"]),
        ServerConfig::tcp(
            "tcp-2088",
            "127.0.0.1:2088",
            &["typescript", "javascript"],
        ),
    ]
}
