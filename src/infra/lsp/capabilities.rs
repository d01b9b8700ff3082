//! Client capabilities and initialize parameters
//!
//! The client advertises what it implements: document synchronization with
//! dynamic registration, will-save, formatting, diagnostics, and the files
//! extension flags taken from configuration.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};

use super::protocol::{
    ClientCapabilities, ClientInfo, FilesExtensionCapabilities, InitializeParams,
};
use crate::models::path_to_uri;

/// `initializationOptions`, either fixed or computed at handshake time
#[derive(Clone, Default)]
pub enum InitOptions {
    #[default]
    None,
    Static(Value),
    Lazy(Arc<dyn Fn() -> Option<Value> + Send + Sync>),
}

impl InitOptions {
    pub fn lazy<F>(f: F) -> Self
    where
        F: Fn() -> Option<Value> + Send + Sync + 'static,
    {
        Self::Lazy(Arc::new(f))
    }

    /// Evaluate for one `initialize` attempt
    pub fn resolve(&self) -> Option<Value> {
        match self {
            Self::None => None,
            Self::Static(value) => Some(value.clone()),
            Self::Lazy(f) => f(),
        }
    }
}

impl From<Option<Value>> for InitOptions {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Self::None, Self::Static)
    }
}

impl std::fmt::Debug for InitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Lazy(_) => write!(f, "Lazy(..)"),
        }
    }
}

/// Standard capabilities merged with the files extension flags
pub fn client_capabilities(files: FilesExtensionCapabilities) -> ClientCapabilities {
    let text_document = json!({
        "synchronization": {
            "dynamicRegistration": true,
            "willSave": true,
            "willSaveWaitUntil": true,
            "didSave": true
        },
        "hover": {
            "dynamicRegistration": true,
            "contentFormat": ["markdown", "plaintext"]
        },
        "definition": {
            "dynamicRegistration": true,
            "linkSupport": true
        },
        "references": {
            "dynamicRegistration": true
        },
        "formatting": {
            "dynamicRegistration": true
        },
        "publishDiagnostics": {
            "relatedInformation": true,
            "versionSupport": true
        }
    });

    let workspace = json!({
        "applyEdit": false,
        "configuration": true,
        "workspaceFolders": false,
        "didChangeConfiguration": {
            "dynamicRegistration": true
        }
    });

    let window = json!({
        "workDoneProgress": true,
        "showMessage": {
            "messageActionItem": {
                "additionalPropertiesSupport": false
            }
        }
    });

    ClientCapabilities {
        workspace: Some(workspace),
        text_document: Some(text_document),
        window: Some(window),
        files,
    }
}

pub fn initialize_params(
    root: &Path,
    files: FilesExtensionCapabilities,
    options: &InitOptions,
) -> InitializeParams {
    InitializeParams {
        process_id: Some(std::process::id()),
        root_path: Some(root.to_string_lossy().into_owned()),
        root_uri: Some(path_to_uri(root)),
        capabilities: client_capabilities(files),
        client_info: Some(ClientInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        initialization_options: options.resolve(),
        trace: Some("off".to_string()),
    }
}
