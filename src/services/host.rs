//! Host editor boundary
//!
//! A session never owns editor state. It reads open documents through
//! [`Host`] snapshots, asks the host for workspace files, and routes prompts,
//! errors and diagnostics back to it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::LspError;
use crate::infra::lsp::protocol::{LspDiagnostic, PublishDiagnosticsParams};
use crate::infra::workspace::{self, WalkOptions};
use crate::models::{
    Document, DocumentChange, FilesSettings, TextChange, language_id_for_path, path_to_uri,
};

#[async_trait]
pub trait Host: Send + Sync {
    /// Workspace root reported to servers
    fn root(&self) -> &Path;

    /// Open documents, in the order they were opened
    async fn open_documents(&self) -> Vec<Document>;

    /// Snapshot of one open document
    async fn document(&self, uri: &str) -> Option<Document>;

    /// Every file under `base`
    async fn list_files(
        &self,
        base: &Path,
        cancel: CancellationToken,
    ) -> Result<Vec<PathBuf>, LspError>;

    async fn read_file(&self, path: &Path) -> Result<String, LspError>;

    /// Ask the user to pick one of `actions`. `None` means dismissed.
    async fn prompt(&self, message: &str, actions: &[&str]) -> Option<String>;

    async fn show_error(&self, message: &str);

    async fn publish_diagnostics(&self, server: &str, params: PublishDiagnosticsParams) {
        tracing::debug!(
            "{}: {} diagnostics for {}",
            server,
            params.diagnostics.len(),
            params.uri
        );
    }
}

/// How [`LocalHost`] answers prompts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptMode {
    /// Ask on the terminal
    Interactive,
    /// Always answer with this action; `None` dismisses
    Fixed(Option<String>),
}

/// Filesystem-backed host with an in-memory open-document store.
pub struct LocalHost {
    root: PathBuf,
    walk: WalkOptions,
    prompt: PromptMode,
    documents: RwLock<Vec<Document>>,
    diagnostics: RwLock<HashMap<String, Vec<LspDiagnostic>>>,
    errors: Mutex<Vec<String>>,
}

impl LocalHost {
    pub fn new(root: impl Into<PathBuf>, files: &FilesSettings) -> Self {
        Self {
            root: root.into(),
            walk: WalkOptions::from(files),
            prompt: PromptMode::Fixed(None),
            documents: RwLock::new(Vec::new()),
            diagnostics: RwLock::new(HashMap::new()),
            errors: Mutex::new(Vec::new()),
        }
    }

    pub fn with_prompt(mut self, prompt: PromptMode) -> Self {
        self.prompt = prompt;
        self
    }

    /// Add or replace an open document. Reopening keeps its original position.
    pub async fn open(&self, document: Document) -> Document {
        let mut documents = self.documents.write().await;
        match documents.iter_mut().find(|d| d.uri == document.uri) {
            Some(existing) => *existing = document.clone(),
            None => documents.push(document.clone()),
        }
        document
    }

    /// Open a file from disk at version 1.
    pub async fn open_file(&self, path: &Path) -> Result<Document, LspError> {
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let text = self.read_file(&path).await?;
        let document = Document::new(path_to_uri(&path), language_id_for_path(&path), 1, text);
        Ok(self.open(document).await)
    }

    /// Replace the text of an open document, bumping its version.
    pub async fn edit(&self, uri: &str, text: impl Into<String>) -> Option<DocumentChange> {
        let mut documents = self.documents.write().await;
        let document = documents.iter_mut().find(|d| d.uri == uri)?;
        document.version += 1;
        document.text = text.into();
        Some(DocumentChange {
            uri: document.uri.clone(),
            version: document.version,
            changes: vec![TextChange::full(document.text.clone())],
            text: document.text.clone(),
        })
    }

    pub async fn close(&self, uri: &str) -> bool {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|d| d.uri != uri);
        documents.len() != before
    }

    pub async fn diagnostics(&self) -> HashMap<String, Vec<LspDiagnostic>> {
        self.diagnostics.read().await.clone()
    }

    /// Errors surfaced through [`Host::show_error`]
    pub async fn errors(&self) -> Vec<String> {
        self.errors.lock().await.clone()
    }

    async fn ask(message: String, actions: Vec<String>) -> Option<String> {
        tokio::task::spawn_blocking(move || {
            use std::io::{BufRead, Write};

            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "{} [{}]", message, actions.join("/"));
            let _ = stderr.flush();

            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).ok()?;
            let answer = line.trim();
            actions
                .into_iter()
                .find(|action| action.eq_ignore_ascii_case(answer))
        })
        .await
        .ok()
        .flatten()
    }
}

#[async_trait]
impl Host for LocalHost {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn open_documents(&self) -> Vec<Document> {
        self.documents.read().await.clone()
    }

    async fn document(&self, uri: &str) -> Option<Document> {
        self.documents
            .read()
            .await
            .iter()
            .find(|d| d.uri == uri)
            .cloned()
    }

    async fn list_files(
        &self,
        base: &Path,
        cancel: CancellationToken,
    ) -> Result<Vec<PathBuf>, LspError> {
        workspace::list_files(
            self.root.clone(),
            base.to_path_buf(),
            self.walk.clone(),
            cancel,
        )
        .await
    }

    async fn read_file(&self, path: &Path) -> Result<String, LspError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn prompt(&self, message: &str, actions: &[&str]) -> Option<String> {
        match &self.prompt {
            PromptMode::Fixed(answer) => {
                tracing::debug!("Prompt '{}' answered with {:?}", message, answer);
                answer.clone()
            }
            PromptMode::Interactive => {
                Self::ask(
                    message.to_string(),
                    actions.iter().map(|a| a.to_string()).collect(),
                )
                .await
            }
        }
    }

    async fn show_error(&self, message: &str) {
        tracing::error!("{}", message);
        self.errors.lock().await.push(message.to_string());
    }

    async fn publish_diagnostics(&self, server: &str, params: PublishDiagnosticsParams) {
        tracing::debug!(
            "{}: {} diagnostics for {}",
            server,
            params.diagnostics.len(),
            params.uri
        );
        self.diagnostics
            .write()
            .await
            .insert(params.uri, params.diagnostics);
    }
}
