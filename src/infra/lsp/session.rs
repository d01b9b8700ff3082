//! Language server session
//!
//! One [`Session`] per configured server. It opens the transport, owns the
//! message connection, runs the `initialize` handshake and forwards editor
//! document events while it is [`SessionState::Running`].
//!
//! State machine:
//! ```text
//! Initial -> Starting -> Running -> Stopping -> Stopped
//!               |    \-> StartFailed -> (start again) Starting
//!               \-> Stopping (stop during handshake)
//! ```
//! Suspension points: opening the transport, each `initialize` round trip,
//! the retry prompt (bounded by the prompt timeout), the full-sync coalescing
//! delay, and files extension queries (cancellable by the server).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::capabilities::{InitOptions, initialize_params};
use super::connection::Connection;
use super::files::{self, XCONTENT, XFILES};
use super::protocol::{
    ContentParams, DocumentFormattingParams, FilesExtensionCapabilities, FilesParams,
    FormattingOptions, InitializeResult, LogMessageParams, LspDiagnostic,
    PublishDiagnosticsParams, RegistrationParams, ServerCapabilities, TextDocumentIdentifier,
    TextDocumentSyncKind, TextEdit, UnregistrationParams, WillSaveTextDocumentParams,
};
use super::registry::CapabilityRegistry;
use super::sync::{ChangeAction, DocumentSync};
use super::transport::Connector;
use crate::error::LspError;
use crate::models::{
    Document, DocumentChange, DocumentEvent, FilesSettings, SaveReason, ServerConfig,
};
use crate::services::host::Host;

const RETRY_ACTION: &str = "Retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Initial = 0,
    Starting = 1,
    Running = 2,
    StartFailed = 3,
    Stopping = 4,
    Stopped = 5,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::StartFailed,
            4 => Self::Stopping,
            5 => Self::Stopped,
            _ => Self::Initial,
        }
    }

    fn to_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::StartFailed => "start-failed",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome chosen by an [`InitFailurePolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    Retry,
    Fail,
}

/// Host-supplied decision on a failed `initialize`. When present it replaces
/// the retry prompt.
#[async_trait]
pub trait InitFailurePolicy: Send + Sync {
    async fn decide(&self, server: &str, error: &LspError, attempt: u32) -> FailureDecision;
}

#[derive(Clone)]
pub struct SessionOptions {
    /// Files extension flags advertised during `initialize`
    pub files: FilesExtensionCapabilities,
    pub init_options: InitOptions,
    pub failure_policy: Option<Arc<dyn InitFailurePolicy>>,
    /// Full-sync coalescing window
    pub sync_delay: Duration,
    pub prompt_timeout: Duration,
}

impl SessionOptions {
    pub fn for_server(server: &ServerConfig, files: &FilesSettings) -> Self {
        Self {
            files: FilesExtensionCapabilities::new(files.xfiles, files.xcontent),
            init_options: InitOptions::from(server.initialization_options.clone()),
            ..Self::default()
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        let files = FilesSettings::default();
        Self {
            files: FilesExtensionCapabilities::new(files.xfiles, files.xcontent),
            init_options: InitOptions::None,
            failure_policy: None,
            sync_delay: crate::config::sync_delay(),
            prompt_timeout: crate::config::prompt_timeout(),
        }
    }
}

pub struct Session {
    name: String,
    connector: Arc<dyn Connector>,
    host: Arc<dyn Host>,
    options: SessionOptions,
    state: AtomicU8,
    /// Held for the whole handshake: at most one initialization in flight
    init_lock: Mutex<()>,
    connection: RwLock<Option<Arc<Connection>>>,
    child: Mutex<Option<Child>>,
    capabilities: RwLock<Option<ServerCapabilities>>,
    registry: CapabilityRegistry,
    sync: Mutex<DocumentSync>,
    diagnostics: RwLock<HashMap<String, Vec<LspDiagnostic>>>,
    reported_failure: AtomicBool,
}

impl Session {
    pub fn new(
        server: &ServerConfig,
        connector: Arc<dyn Connector>,
        host: Arc<dyn Host>,
        options: SessionOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: server.name.clone(),
            connector,
            host,
            options,
            state: AtomicU8::new(SessionState::Initial.to_u8()),
            init_lock: Mutex::new(()),
            connection: RwLock::new(None),
            child: Mutex::new(None),
            capabilities: RwLock::new(None),
            registry: CapabilityRegistry::new(),
            sync: Mutex::new(DocumentSync::new(server.selector())),
            diagnostics: RwLock::new(HashMap::new()),
            reported_failure: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let moved = self
            .state
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            tracing::debug!("{} session: {} -> {}", self.name, from, to);
        }
        moved
    }

    fn invalid_state(&self) -> LspError {
        LspError::InvalidState {
            server: self.name.clone(),
            state: self.state().to_string(),
        }
    }

    fn ensure_running(&self) -> Result<(), LspError> {
        if self.state() == SessionState::Running {
            Ok(())
        } else {
            Err(self.invalid_state())
        }
    }

    /// Negotiated server capabilities, once `initialize` succeeded
    pub async fn capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.read().await.clone()
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub async fn sync_kind(&self) -> TextDocumentSyncKind {
        self.sync.lock().await.kind()
    }

    pub async fn is_announced(&self, uri: &str) -> bool {
        self.sync.lock().await.is_announced(uri)
    }

    pub async fn diagnostics(&self, uri: &str) -> Vec<LspDiagnostic> {
        self.diagnostics
            .read()
            .await
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect and run the handshake.
    ///
    /// Allowed from `Initial`, and from `StartFailed` as an explicit retry.
    /// Concurrent callers wait for the in-flight attempt; a session that is
    /// already running returns immediately.
    pub async fn start(self: &Arc<Self>) -> Result<(), LspError> {
        let _guard = self.init_lock.lock().await;

        let state = self.state();
        match state {
            SessionState::Running => return Ok(()),
            SessionState::Initial | SessionState::StartFailed => {}
            _ => return Err(self.invalid_state()),
        }
        if !self.transition(state, SessionState::Starting) {
            return Err(self.invalid_state());
        }
        self.reported_failure.store(false, Ordering::Release);

        tracing::info!(
            "Starting {} language server ({})",
            self.name,
            self.connector.describe()
        );

        match self.establish().await {
            Ok(()) => {
                tracing::info!("{} language server started successfully", self.name);
                Ok(())
            }
            Err(err) => {
                self.fail(&err).await;
                Err(err)
            }
        }
    }

    async fn establish(self: &Arc<Self>) -> Result<(), LspError> {
        let mut duplex = self.connector.open().await?;
        *self.child.lock().await = duplex.child.take();

        let connection = Connection::new(self.name.clone(), duplex);
        self.register_handlers(&connection).await?;
        connection.listen().await?;
        *self.connection.write().await = Some(Arc::clone(&connection));
        self.watch_exit(Arc::clone(&connection));

        let result = self.handshake(&connection).await?;
        self.enter_running(&connection, result).await
    }

    /// Send `initialize` until it succeeds or the failure is final.
    async fn handshake(&self, connection: &Connection) -> Result<InitializeResult, LspError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let params = initialize_params(
                self.host.root(),
                self.options.files,
                &self.options.init_options,
            );

            let err = match connection
                .request::<InitializeResult>("initialize", Some(serde_json::to_value(params)?), None)
                .await
            {
                Ok(result) => return Ok(result),
                Err(err) => err.into_handshake(),
            };

            tracing::warn!(
                "{} initialize attempt {} failed: {}",
                self.name,
                attempt,
                err
            );

            if connection.is_closed() || self.state() != SessionState::Starting {
                return Err(err);
            }
            // stop() closes the connection; that ends a pending decision too
            let retry = tokio::select! {
                _ = connection.closed() => false,
                retry = self.should_retry(&err, attempt) => retry,
            };
            if !retry {
                return Err(err);
            }
            tracing::info!("Retrying {} initialization", self.name);
        }
    }

    async fn should_retry(&self, err: &LspError, attempt: u32) -> bool {
        if let Some(policy) = &self.options.failure_policy {
            return policy.decide(&self.name, err, attempt).await == FailureDecision::Retry;
        }
        if !err.is_retryable_handshake() {
            return false;
        }

        // The prompt shows the error; declining does not surface it again.
        self.reported_failure.store(true, Ordering::Release);
        let message = match err {
            LspError::Handshake { message, .. } => message.clone(),
            other => other.to_string(),
        };
        match timeout(
            self.options.prompt_timeout,
            self.host.prompt(&message, &[RETRY_ACTION]),
        )
        .await
        {
            Ok(Some(action)) => action == RETRY_ACTION,
            Ok(None) => false,
            Err(_) => {
                tracing::debug!("{} retry prompt timed out", self.name);
                false
            }
        }
    }

    async fn enter_running(
        &self,
        connection: &Connection,
        result: InitializeResult,
    ) -> Result<(), LspError> {
        let kind = result.capabilities.sync_kind();
        *self.capabilities.write().await = Some(result.capabilities);

        // Document events wait on this lock, so none can slip in between
        // `initialized` and the replay of already-open documents.
        let mut sync = self.sync.lock().await;
        sync.configure(kind);
        if !self.transition(SessionState::Starting, SessionState::Running) {
            return Err(self.invalid_state());
        }

        connection
            .notify("initialized", Some(serde_json::json!({})))
            .await?;

        if kind != TextDocumentSyncKind::None {
            for document in self.host.open_documents().await {
                if let Some(params) = sync.open(&document) {
                    connection
                        .notify("textDocument/didOpen", Some(serde_json::to_value(params)?))
                        .await?;
                }
            }
            tracing::debug!(
                "{} announced {} open documents",
                self.name,
                sync.announced_count()
            );
        }
        Ok(())
    }

    async fn fail(&self, err: &LspError) {
        self.teardown(false).await;
        if !self.transition(SessionState::Starting, SessionState::StartFailed) {
            return;
        }
        if !self.reported_failure.swap(true, Ordering::AcqRel) {
            self.host
                .show_error(&format!(
                    "{} language server failed to start: {}",
                    self.name, err
                ))
                .await;
        } else {
            tracing::debug!("{} start failed: {}", self.name, err);
        }
    }

    /// Move a crashed running session to `Stopped`.
    fn watch_exit(self: &Arc<Self>, connection: Arc<Connection>) {
        let session = Arc::downgrade(self);
        tokio::spawn(async move {
            connection.closed().await;
            let Some(session) = session.upgrade() else {
                return;
            };
            if session.transition(SessionState::Running, SessionState::Stopped) {
                session.teardown(false).await;
                session
                    .host
                    .show_error(&format!(
                        "{} language server terminated unexpectedly",
                        session.name
                    ))
                    .await;
            }
        });
    }

    /// Graceful shutdown: `shutdown`, then `exit`, then close the transport.
    pub async fn stop(&self) -> Result<(), LspError> {
        let previous = loop {
            let state = self.state();
            match state {
                SessionState::Stopping | SessionState::Stopped => return Ok(()),
                _ if self.transition(state, SessionState::Stopping) => break state,
                _ => continue,
            }
        };

        let connection = self.connection.write().await.take();
        self.sync.lock().await.reset();

        if let Some(connection) = connection {
            if previous == SessionState::Running {
                if let Err(e) = connection.request::<Value>("shutdown", None, None).await {
                    tracing::debug!("{} shutdown request failed: {}", self.name, e);
                }
                if let Err(e) = connection.notify("exit", None).await {
                    tracing::debug!("{} exit notification failed: {}", self.name, e);
                }
            }
            connection.close().await;
        }

        self.teardown(true).await;
        self.transition(SessionState::Stopping, SessionState::Stopped);
        tracing::info!("{} language server stopped", self.name);
        Ok(())
    }

    async fn teardown(&self, graceful: bool) {
        let connection = self.connection.write().await.take();
        if let Some(connection) = connection {
            connection.close().await;
        }
        self.sync.lock().await.reset();
        self.registry.clear().await;
        *self.capabilities.write().await = None;

        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        if !graceful {
            let _ = child.start_kill();
        }
        match timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("{} language server exited: {:?}", self.name, status);
            }
            Ok(Err(e)) => {
                tracing::warn!("{} language server wait error: {}", self.name, e);
            }
            Err(_) => {
                tracing::warn!(
                    "{} language server termination timed out, forcing kill",
                    self.name
                );
                let _ = child.kill().await;
            }
        }
    }

    // ========================================================================
    // Server -> client handlers
    // ========================================================================

    async fn register_handlers(self: &Arc<Self>, connection: &Connection) -> Result<(), LspError> {
        let weak = Arc::downgrade(self);
        connection
            .on_request("client/registerCapability", move |params, _| {
                let weak = weak.clone();
                async move {
                    let session = upgrade(&weak)?;
                    let params: RegistrationParams = parse(params)?;
                    session.registry.register(params.registrations).await;
                    Ok(Value::Null)
                }
            })
            .await?;

        let weak = Arc::downgrade(self);
        connection
            .on_request("client/unregisterCapability", move |params, _| {
                let weak = weak.clone();
                async move {
                    let session = upgrade(&weak)?;
                    let params: UnregistrationParams = parse(params)?;
                    session.registry.unregister(&params.unregistrations).await;
                    Ok(Value::Null)
                }
            })
            .await?;

        connection
            .on_request("workspace/configuration", |params, _| async move {
                let items = params
                    .as_ref()
                    .and_then(|p| p.get("items"))
                    .and_then(|i| i.as_array())
                    .map_or(0, |arr| arr.len());
                Ok(Value::Array(vec![Value::Object(serde_json::Map::new()); items]))
            })
            .await?;

        connection
            .on_request("window/workDoneProgress/create", |_, _| async {
                Ok(Value::Null)
            })
            .await?;

        let weak = Arc::downgrade(self);
        connection
            .on_request("window/showMessageRequest", move |params, _| {
                let weak = weak.clone();
                async move {
                    let session = upgrade(&weak)?;
                    let params = params.unwrap_or(Value::Null);
                    let message = params
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    let titles: Vec<String> = params
                        .get("actions")
                        .and_then(Value::as_array)
                        .map(|actions| {
                            actions
                                .iter()
                                .filter_map(|a| a.get("title").and_then(Value::as_str))
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default();
                    let labels: Vec<&str> = titles.iter().map(String::as_str).collect();
                    let choice = session.host.prompt(&message, &labels).await;
                    Ok(choice.map_or(Value::Null, |title| serde_json::json!({ "title": title })))
                }
            })
            .await?;

        if self.options.files.serves_files() {
            let weak = Arc::downgrade(self);
            connection
                .on_request(XFILES, move |params, token| {
                    let weak = weak.clone();
                    async move {
                        let session = upgrade(&weak)?;
                        session.ensure_running()?;
                        let params: FilesParams = parse_or_default(params)?;
                        let listing = files::list_files(session.host.as_ref(), params, token).await?;
                        Ok(serde_json::to_value(listing)?)
                    }
                })
                .await?;
        }

        if self.options.files.serves_content() {
            let weak = Arc::downgrade(self);
            connection
                .on_request(XCONTENT, move |params, token| {
                    let weak = weak.clone();
                    async move {
                        let session = upgrade(&weak)?;
                        session.ensure_running()?;
                        let params: ContentParams = parse(params)?;
                        let item = files::content(session.host.as_ref(), params, token).await?;
                        Ok(serde_json::to_value(item)?)
                    }
                })
                .await?;
        }

        let weak = Arc::downgrade(self);
        connection
            .on_notification("textDocument/publishDiagnostics", move |params| {
                let weak = weak.clone();
                async move {
                    let Some(session) = weak.upgrade() else {
                        return;
                    };
                    match parse::<PublishDiagnosticsParams>(params) {
                        Ok(params) => session.publish_diagnostics(params).await,
                        Err(e) => tracing::warn!("{} sent bad diagnostics: {}", session.name, e),
                    }
                }
            })
            .await?;

        for method in ["window/logMessage", "window/showMessage"] {
            let name = self.name.clone();
            connection
                .on_notification(method, move |params| {
                    log_server_message(&name, params);
                    async {}
                })
                .await?;
        }

        Ok(())
    }

    async fn publish_diagnostics(&self, params: PublishDiagnosticsParams) {
        tracing::debug!(
            "Cached {} diagnostics for {}",
            params.diagnostics.len(),
            params.uri
        );
        self.diagnostics
            .write()
            .await
            .insert(params.uri.clone(), params.diagnostics.clone());
        self.host.publish_diagnostics(&self.name, params).await;
    }

    // ========================================================================
    // Document synchronization
    // ========================================================================

    async fn running_connection(&self) -> Option<Arc<Connection>> {
        if self.state() != SessionState::Running {
            return None;
        }
        self.connection.read().await.clone()
    }

    /// Forward one editor event. Events for a session that is not running
    /// are dropped.
    pub async fn handle_event(self: &Arc<Self>, event: &DocumentEvent) -> Result<(), LspError> {
        match event {
            DocumentEvent::Opened(document) => self.did_open(document).await,
            DocumentEvent::Changed(change) => self.did_change(change).await,
            DocumentEvent::WillSave { uri, reason } => self.will_save(uri, *reason).await,
            DocumentEvent::Saved { uri, text } => self.did_save(uri, text.clone()).await,
            DocumentEvent::Closed { uri } => self.did_close(uri).await,
        }
    }

    pub async fn did_open(&self, document: &Document) -> Result<(), LspError> {
        let mut sync = self.sync.lock().await;
        let Some(connection) = self.running_connection().await else {
            return Ok(());
        };
        if let Some(params) = sync.open(document) {
            connection
                .notify("textDocument/didOpen", Some(serde_json::to_value(params)?))
                .await?;
        }
        Ok(())
    }

    pub async fn did_change(self: &Arc<Self>, change: &DocumentChange) -> Result<(), LspError> {
        let mut sync = self.sync.lock().await;
        let Some(connection) = self.running_connection().await else {
            return Ok(());
        };

        match sync.change(change)? {
            ChangeAction::Ignore => {}
            ChangeAction::Send(params) => {
                connection
                    .notify("textDocument/didChange", Some(serde_json::to_value(params)?))
                    .await?;
            }
            ChangeAction::Staged { token, generation } => {
                let session = Arc::clone(self);
                let uri = change.uri.clone();
                tokio::spawn(async move {
                    session.deliver_staged(uri, generation, token).await;
                });
            }
        }
        Ok(())
    }

    /// Send a staged full-text change once the coalescing delay passes
    /// without a newer edit, flush or close.
    async fn deliver_staged(&self, uri: String, generation: u64, token: CancellationToken) {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(self.options.sync_delay) => {}
        }

        let mut sync = self.sync.lock().await;
        let Some(params) = sync.take_staged(&uri, generation) else {
            return;
        };
        let Some(connection) = self.running_connection().await else {
            return;
        };
        let result = match serde_json::to_value(params) {
            Ok(params) => connection.notify("textDocument/didChange", Some(params)).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!("{} failed to send change for {}: {}", self.name, uri, e);
        }
    }

    async fn flush_staged(
        &self,
        sync: &mut DocumentSync,
        connection: &Connection,
        uri: &str,
    ) -> Result<(), LspError> {
        if let Some(params) = sync.flush(uri) {
            connection
                .notify("textDocument/didChange", Some(serde_json::to_value(params)?))
                .await?;
        }
        Ok(())
    }

    pub async fn did_save(&self, uri: &str, text: Option<String>) -> Result<(), LspError> {
        let mut sync = self.sync.lock().await;
        let Some(connection) = self.running_connection().await else {
            return Ok(());
        };
        if !sync.is_announced(uri) {
            return Ok(());
        }
        self.flush_staged(&mut sync, &connection, uri).await?;

        let (enabled, include_text) = self
            .capabilities
            .read()
            .await
            .as_ref()
            .map_or((false, false), ServerCapabilities::save);
        if !enabled {
            return Ok(());
        }

        let text = if include_text {
            match text {
                Some(text) => Some(text),
                None => self.host.document(uri).await.map(|d| d.text),
            }
        } else {
            None
        };
        if let Some(params) = sync.save(uri, text) {
            connection
                .notify("textDocument/didSave", Some(serde_json::to_value(params)?))
                .await?;
        }
        Ok(())
    }

    pub async fn did_close(&self, uri: &str) -> Result<(), LspError> {
        let mut sync = self.sync.lock().await;
        let Some(connection) = self.running_connection().await else {
            return Ok(());
        };
        if let Some(params) = sync.close(uri) {
            connection
                .notify("textDocument/didClose", Some(serde_json::to_value(params)?))
                .await?;
        }
        Ok(())
    }

    async fn language_of(&self, uri: &str) -> String {
        self.host
            .document(uri)
            .await
            .map(|d| d.language_id)
            .unwrap_or_default()
    }

    /// Whether a statically advertised or dynamically registered capability
    /// covers `method` for this document
    async fn supports(
        &self,
        method: &str,
        uri: &str,
        statically: impl FnOnce(&ServerCapabilities) -> bool,
    ) -> bool {
        let advertised = self
            .capabilities
            .read()
            .await
            .as_ref()
            .is_some_and(statically);
        if advertised {
            return true;
        }
        let language = self.language_of(uri).await;
        self.registry.matches(method, &language, uri).await
    }

    pub async fn will_save(&self, uri: &str, reason: SaveReason) -> Result<(), LspError> {
        let mut sync = self.sync.lock().await;
        let Some(connection) = self.running_connection().await else {
            return Ok(());
        };
        if !sync.is_announced(uri)
            || !self
                .supports("textDocument/willSave", uri, ServerCapabilities::will_save)
                .await
        {
            return Ok(());
        }
        self.flush_staged(&mut sync, &connection, uri).await?;

        let params = WillSaveTextDocumentParams {
            text_document: TextDocumentIdentifier::new(uri),
            reason,
        };
        connection
            .notify("textDocument/willSave", Some(serde_json::to_value(params)?))
            .await
    }

    /// Ask the server for edits to apply before saving. Empty when the server
    /// does not support it.
    pub async fn will_save_wait_until(
        &self,
        uri: &str,
        reason: SaveReason,
    ) -> Result<Vec<TextEdit>, LspError> {
        let connection = {
            let mut sync = self.sync.lock().await;
            let Some(connection) = self.running_connection().await else {
                return Ok(Vec::new());
            };
            if !sync.is_announced(uri)
                || !self
                    .supports(
                        "textDocument/willSaveWaitUntil",
                        uri,
                        ServerCapabilities::will_save_wait_until,
                    )
                    .await
            {
                return Ok(Vec::new());
            }
            self.flush_staged(&mut sync, &connection, uri).await?;
            connection
        };

        let params = WillSaveTextDocumentParams {
            text_document: TextDocumentIdentifier::new(uri),
            reason,
        };
        let edits: Option<Vec<TextEdit>> = connection
            .request(
                "textDocument/willSaveWaitUntil",
                Some(serde_json::to_value(params)?),
                None,
            )
            .await?;
        Ok(edits.unwrap_or_default())
    }

    /// Format a document. `None` when the server offers no formatting for it.
    pub async fn format(
        &self,
        uri: &str,
        options: FormattingOptions,
    ) -> Result<Option<Vec<TextEdit>>, LspError> {
        self.ensure_running()?;
        if !self
            .supports(
                "textDocument/formatting",
                uri,
                ServerCapabilities::formatting,
            )
            .await
        {
            return Ok(None);
        }

        let connection = {
            let mut sync = self.sync.lock().await;
            let connection = self
                .running_connection()
                .await
                .ok_or_else(|| self.invalid_state())?;
            self.flush_staged(&mut sync, &connection, uri).await?;
            connection
        };

        let params = DocumentFormattingParams {
            text_document: TextDocumentIdentifier::new(uri),
            options,
        };
        let edits: Option<Vec<TextEdit>> = connection
            .request(
                "textDocument/formatting",
                Some(serde_json::to_value(params)?),
                None,
            )
            .await?;
        Ok(Some(edits.unwrap_or_default()))
    }

    /// Send an arbitrary request. Refused unless the session is running.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, LspError> {
        let connection = self
            .running_connection()
            .await
            .ok_or_else(|| self.invalid_state())?;
        connection.request(method, params, cancel).await
    }
}

fn upgrade(weak: &Weak<Session>) -> Result<Arc<Session>, LspError> {
    weak.upgrade().ok_or(LspError::NotConnected)
}

fn parse<T: DeserializeOwned>(params: Option<Value>) -> Result<T, LspError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| LspError::Protocol(e.to_string()))
}

fn parse_or_default<T: DeserializeOwned + Default>(params: Option<Value>) -> Result<T, LspError> {
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        params => parse(params),
    }
}

/// Route `window/logMessage` and `window/showMessage` to tracing by
/// LSP MessageType: 1=Error, 2=Warning, 3=Info, 4=Log
fn log_server_message(server: &str, params: Option<Value>) {
    let Some(params) = params.and_then(|p| serde_json::from_value::<LogMessageParams>(p).ok())
    else {
        return;
    };
    match params.kind {
        1 => tracing::error!("LSP {}: {}", server, params.message),
        2 => tracing::warn!("LSP {}: {}", server, params.message),
        3 => tracing::info!("LSP {}: {}", server, params.message),
        _ => tracing::debug!("LSP {}: {}", server, params.message),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::infra::lsp::protocol::{Message, Request, RequestId, ResponseError, error_codes};
    use crate::infra::lsp::testing::{FakeConnector, FakeServer, fake_pair};
    use crate::models::{Position, Range, TextChange};
    use crate::services::host::{LocalHost, PromptMode};
    use serde_json::json;
    use tempfile::TempDir;

    const QUIET: Duration = Duration::from_millis(300);

    struct Fixture {
        _temp: TempDir,
        host: Arc<LocalHost>,
        session: Arc<Session>,
        server: FakeServer,
    }

    fn options() -> SessionOptions {
        SessionOptions {
            files: FilesExtensionCapabilities::new(true, true),
            init_options: InitOptions::None,
            failure_policy: None,
            sync_delay: Duration::from_millis(100),
            prompt_timeout: Duration::from_secs(5),
        }
    }

    fn fixture_with(prompt: PromptMode, options: SessionOptions) -> Fixture {
        let temp = TempDir::new().unwrap();
        let host = Arc::new(
            LocalHost::new(temp.path(), &FilesSettings::default()).with_prompt(prompt),
        );
        let (duplex, server) = fake_pair();
        let config = ServerConfig::stdio("fake", "fake-ls", &["typescript"]);
        let session = Session::new(
            &config,
            Arc::new(FakeConnector::new(duplex)),
            host.clone(),
            options,
        );
        Fixture {
            _temp: temp,
            host,
            session,
            server,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(PromptMode::Fixed(None), options())
    }

    async fn start(fixture: &mut Fixture, capabilities: Value) -> Request {
        let session = Arc::clone(&fixture.session);
        let starting = tokio::spawn(async move { session.start().await });
        let initialize = fixture.server.handshake(capabilities).await;
        starting.await.unwrap().unwrap();
        initialize
    }

    fn ts(uri: &str, version: i32, text: &str) -> Document {
        Document::new(uri, "typescript", version, text)
    }

    fn full_change(uri: &str, version: i32, text: &str) -> DocumentChange {
        DocumentChange {
            uri: uri.to_string(),
            version,
            changes: vec![TextChange::full(text)],
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_open_documents_replayed_once_in_order() {
        let mut f = fixture();
        f.host.open(ts("file:///w/b.ts", 1, "b")).await;
        f.host.open(ts("file:///w/a.ts", 4, "a")).await;
        f.host
            .open(Document::new("file:///w/main.go", "go", 1, "package main"))
            .await;

        start(&mut f, json!({ "textDocumentSync": 1 })).await;
        assert_eq!(f.session.state(), SessionState::Running);

        let first = f.server.expect_notification("textDocument/didOpen").await;
        assert_eq!(first.params.unwrap()["textDocument"]["uri"], "file:///w/b.ts");
        let second = f.server.expect_notification("textDocument/didOpen").await;
        let second = second.params.unwrap();
        assert_eq!(second["textDocument"]["uri"], "file:///w/a.ts");
        assert_eq!(second["textDocument"]["version"], 4);

        // Re-open is a no-op.
        f.session.did_open(&ts("file:///w/a.ts", 4, "a")).await.unwrap();
        f.server.assert_silent(QUIET).await;
    }

    #[tokio::test]
    async fn test_initialize_advertises_files_flags_and_root() {
        let mut f = fixture();
        let initialize = start(&mut f, json!({})).await;
        let params = initialize.params.unwrap();
        assert_eq!(params["capabilities"]["xfilesProvider"], true);
        assert_eq!(params["capabilities"]["xcontentProvider"], true);
        assert_eq!(params["processId"], std::process::id());
        assert!(params["rootUri"].as_str().unwrap().starts_with("file://"));
    }

    #[tokio::test]
    async fn test_sync_none_sends_no_document_traffic() {
        let mut f = fixture();
        f.host.open(ts("file:///w/a.ts", 1, "a")).await;
        start(&mut f, json!({})).await;

        f.session.did_open(&ts("file:///w/c.ts", 1, "c")).await.unwrap();
        f.session
            .did_change(&full_change("file:///w/a.ts", 2, "aa"))
            .await
            .unwrap();
        f.server.assert_silent(QUIET).await;
    }

    #[tokio::test]
    async fn test_full_sync_coalesces_to_final_text() {
        let mut f = fixture();
        start(&mut f, json!({ "textDocumentSync": 1 })).await;
        f.session.did_open(&ts("file:///w/a.ts", 1, "")).await.unwrap();
        f.server.expect_notification("textDocument/didOpen").await;

        for (version, text) in [(2, "l"), (3, "le"), (4, "let")] {
            f.session
                .did_change(&full_change("file:///w/a.ts", version, text))
                .await
                .unwrap();
        }

        let change = f.server.expect_notification("textDocument/didChange").await;
        let params = change.params.unwrap();
        assert_eq!(params["textDocument"]["version"], 4);
        assert_eq!(params["contentChanges"], json!([{ "text": "let" }]));
        f.server.assert_silent(QUIET).await;
    }

    #[tokio::test]
    async fn test_close_within_window_cancels_pending_change() {
        let mut f = fixture();
        start(&mut f, json!({ "textDocumentSync": 1 })).await;
        f.session.did_open(&ts("file:///w/a.ts", 1, "")).await.unwrap();
        f.server.expect_notification("textDocument/didOpen").await;

        f.session
            .did_change(&full_change("file:///w/a.ts", 2, "x"))
            .await
            .unwrap();
        f.session.did_close("file:///w/a.ts").await.unwrap();

        f.server.expect_notification("textDocument/didClose").await;
        f.server.assert_silent(QUIET).await;
        assert!(!f.session.is_announced("file:///w/a.ts").await);
    }

    #[tokio::test]
    async fn test_incremental_changes_forward_deltas() {
        let mut f = fixture();
        start(&mut f, json!({ "textDocumentSync": { "openClose": true, "change": 2 } })).await;
        f.session.did_open(&ts("file:///w/a.ts", 1, "")).await.unwrap();
        f.server.expect_notification("textDocument/didOpen").await;

        let change = DocumentChange {
            uri: "file:///w/a.ts".to_string(),
            version: 2,
            changes: vec![TextChange::incremental(
                Range::new(Position::new(0, 0), Position::new(0, 0)),
                "x",
            )],
            text: "x".to_string(),
        };
        f.session.did_change(&change).await.unwrap();

        let params = f
            .server
            .expect_notification("textDocument/didChange")
            .await
            .params
            .unwrap();
        assert_eq!(params["contentChanges"][0]["range"]["start"]["line"], 0);
        assert_eq!(params["contentChanges"][0]["text"], "x");
    }

    #[tokio::test]
    async fn test_change_for_unannounced_document_is_ignored() {
        let mut f = fixture();
        start(&mut f, json!({ "textDocumentSync": 2 })).await;
        f.session
            .did_change(&full_change("file:///w/never.ts", 2, "x"))
            .await
            .unwrap();
        f.server.assert_silent(QUIET).await;
    }

    #[tokio::test]
    async fn test_save_flushes_staged_change_first() {
        let mut f = fixture();
        start(
            &mut f,
            json!({ "textDocumentSync": { "change": 1, "save": { "includeText": true } } }),
        )
        .await;
        f.host.open(ts("file:///w/a.ts", 1, "")).await;
        f.session.did_open(&ts("file:///w/a.ts", 1, "")).await.unwrap();
        f.server.expect_notification("textDocument/didOpen").await;

        f.session
            .did_change(&full_change("file:///w/a.ts", 2, "saved"))
            .await
            .unwrap();
        f.session
            .did_save("file:///w/a.ts", Some("saved".to_string()))
            .await
            .unwrap();

        let change = f.server.expect_notification("textDocument/didChange").await;
        assert_eq!(change.params.unwrap()["textDocument"]["version"], 2);
        let save = f.server.expect_notification("textDocument/didSave").await;
        assert_eq!(save.params.unwrap()["text"], "saved");
        f.server.assert_silent(QUIET).await;
    }

    #[tokio::test]
    async fn test_will_save_requires_capability_or_registration() {
        let mut f = fixture();
        start(&mut f, json!({ "textDocumentSync": 2 })).await;
        f.host.open(ts("file:///w/a.ts", 1, "")).await;
        f.session.did_open(&ts("file:///w/a.ts", 1, "")).await.unwrap();
        f.server.expect_notification("textDocument/didOpen").await;

        f.session
            .will_save("file:///w/a.ts", SaveReason::Manual)
            .await
            .unwrap();
        f.server.assert_silent(Duration::from_millis(100)).await;

        f.server
            .request(
                1,
                "client/registerCapability",
                Some(json!({ "registrations": [
                    { "id": "W1", "method": "textDocument/willSave",
                      "registerOptions": { "documentSelector": [{ "language": "typescript" }] } }
                ] })),
            )
            .await;
        assert!(f.server.expect_response().await.is_success());

        f.session
            .will_save("file:///w/a.ts", SaveReason::AfterDelay)
            .await
            .unwrap();
        let will_save = f.server.expect_notification("textDocument/willSave").await;
        assert_eq!(will_save.params.unwrap()["reason"], 2);
    }

    #[tokio::test]
    async fn test_will_save_wait_until_returns_edits() {
        let mut f = fixture();
        start(
            &mut f,
            json!({ "textDocumentSync": { "change": 2, "willSaveWaitUntil": true } }),
        )
        .await;
        f.session.did_open(&ts("file:///w/a.ts", 1, "x")).await.unwrap();
        f.server.expect_notification("textDocument/didOpen").await;

        let session = Arc::clone(&f.session);
        let call = tokio::spawn(async move {
            session
                .will_save_wait_until("file:///w/a.ts", SaveReason::Manual)
                .await
        });
        let request = f
            .server
            .expect_request("textDocument/willSaveWaitUntil")
            .await;
        f.server
            .respond(
                request.id,
                json!([{ "range": { "start": { "line": 0, "character": 0 },
                                    "end": { "line": 0, "character": 1 } },
                         "newText": "y" }]),
            )
            .await;
        let edits = call.await.unwrap().unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].new_text, "y");
    }

    #[tokio::test]
    async fn test_register_and_unregister_over_the_wire() {
        let mut f = fixture();
        start(&mut f, json!({})).await;

        f.server
            .request(
                1,
                "client/registerCapability",
                Some(json!({ "registrations": [
                    { "id": "R1", "method": "textDocument/formatting" }
                ] })),
            )
            .await;
        let response = f.server.expect_response().await;
        assert!(response.is_success());
        assert!(
            f.session
                .registry()
                .is_registered("textDocument/formatting")
                .await
        );

        f.server
            .request(
                2,
                "client/unregisterCapability",
                Some(json!({ "unregisterations": [
                    { "id": "R1", "method": "textDocument/formatting" }
                ] })),
            )
            .await;
        assert!(f.server.expect_response().await.is_success());
        assert!(
            !f.session
                .registry()
                .is_registered("textDocument/formatting")
                .await
        );

        f.server
            .request(
                3,
                "client/unregisterCapability",
                Some(json!({ "unregisterations": [
                    { "id": "R2", "method": "textDocument/formatting" }
                ] })),
            )
            .await;
        let response = f.server.expect_response().await;
        assert_eq!(response.id, Some(RequestId::Number(3)));
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_format_gated_by_registration() {
        let mut f = fixture();
        start(&mut f, json!({ "textDocumentSync": 1 })).await;

        let none = f
            .session
            .format("file:///w/a.ts", FormattingOptions::default())
            .await
            .unwrap();
        assert!(none.is_none());
        f.server.assert_silent(Duration::from_millis(100)).await;

        f.server
            .request(
                1,
                "client/registerCapability",
                Some(json!({ "registrations": [
                    { "id": "R1", "method": "textDocument/formatting" }
                ] })),
            )
            .await;
        f.server.expect_response().await;

        let session = Arc::clone(&f.session);
        let call = tokio::spawn(async move {
            session
                .format("file:///w/a.ts", FormattingOptions::default())
                .await
        });
        let request = f.server.expect_request("textDocument/formatting").await;
        assert_eq!(request.params.unwrap()["options"]["tabSize"], 4);
        f.server.respond(request.id, json!([])).await;
        assert_eq!(call.await.unwrap().unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_xcontent_serves_open_buffer() {
        let mut f = fixture();
        f.host.open(ts("file:///a.ts", 3, "let x=1")).await;
        start(&mut f, json!({})).await;

        f.server
            .request(
                7,
                XCONTENT,
                Some(json!({ "textDocument": { "uri": "file:///a.ts" } })),
            )
            .await;
        let response = f.server.expect_response().await;
        assert_eq!(
            response.result.unwrap(),
            json!({ "uri": "file:///a.ts", "languageId": "typescript", "version": 3, "text": "let x=1" })
        );
    }

    #[tokio::test]
    async fn test_xfiles_lists_workspace() {
        let mut f = fixture();
        std::fs::write(f.host.root().join("b.txt"), "hello").unwrap();
        start(&mut f, json!({})).await;

        f.server.request(8, XFILES, Some(json!({}))).await;
        let response = f.server.expect_response().await;
        let listing = response.result.unwrap();
        let expected = crate::models::path_to_uri(&f.host.root().join(Path::new("b.txt")));
        assert_eq!(listing, json!([{ "uri": expected }]));
    }

    #[tokio::test]
    async fn test_files_handlers_absent_without_flags() {
        let mut options = options();
        options.files = FilesExtensionCapabilities::new(false, false);
        let mut f = fixture_with(PromptMode::Fixed(None), options);
        let initialize = start(&mut f, json!({})).await;
        assert_eq!(initialize.params.unwrap()["capabilities"]["xfilesProvider"], false);

        f.server.request(1, XFILES, None).await;
        let response = f.server.expect_response().await;
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);

        f.server
            .request(2, XCONTENT, Some(json!({ "textDocument": { "uri": "file:///a.ts" } })))
            .await;
        let response = f.server.expect_response().await;
        assert_eq!(response.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    fn retryable() -> ResponseError {
        ResponseError {
            code: 1,
            message: "workspace not ready".to_string(),
            data: Some(json!({ "retry": true })),
        }
    }

    #[tokio::test]
    async fn test_retryable_handshake_retries_when_accepted() {
        let mut f = fixture_with(PromptMode::Fixed(Some("Retry".to_string())), options());
        let session = Arc::clone(&f.session);
        let starting = tokio::spawn(async move { session.start().await });

        let first = f.server.expect_request("initialize").await;
        f.server.respond_error(first.id, retryable()).await;
        f.server.handshake(json!({ "textDocumentSync": 1 })).await;

        starting.await.unwrap().unwrap();
        assert_eq!(f.session.state(), SessionState::Running);
        assert!(f.host.errors().await.is_empty());
    }

    #[tokio::test]
    async fn test_retryable_handshake_declined_fails_quietly() {
        let mut f = fixture();
        f.host.open(ts("file:///w/a.ts", 1, "a")).await;
        let session = Arc::clone(&f.session);
        let starting = tokio::spawn(async move { session.start().await });

        let first = f.server.expect_request("initialize").await;
        f.server.respond_error(first.id, retryable()).await;

        let err = starting.await.unwrap().unwrap_err();
        assert!(err.is_retryable_handshake());
        assert_eq!(f.session.state(), SessionState::StartFailed);

        f.session.did_open(&ts("file:///w/b.ts", 1, "b")).await.unwrap();
        f.session.did_close("file:///w/a.ts").await.unwrap();
        assert!(matches!(
            f.server.try_recv(QUIET).await,
            None | Some(Message::Response(_))
        ));
    }

    #[tokio::test]
    async fn test_unrecoverable_handshake_surfaces_error_once() {
        let mut f = fixture();
        let session = Arc::clone(&f.session);
        let starting = tokio::spawn(async move { session.start().await });

        let first = f.server.expect_request("initialize").await;
        f.server
            .respond_error(first.id, ResponseError::new(-32603, "boom"))
            .await;

        assert!(starting.await.unwrap().is_err());
        assert_eq!(f.session.state(), SessionState::StartFailed);
        let errors = f.host.errors().await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("boom"));
    }

    struct AlwaysFail;

    #[async_trait]
    impl InitFailurePolicy for AlwaysFail {
        async fn decide(&self, _: &str, _: &LspError, _: u32) -> FailureDecision {
            FailureDecision::Fail
        }
    }

    #[tokio::test]
    async fn test_failure_policy_overrides_retry_prompt() {
        let mut options = options();
        options.failure_policy = Some(Arc::new(AlwaysFail));
        let mut f = fixture_with(PromptMode::Fixed(Some("Retry".to_string())), options);
        let session = Arc::clone(&f.session);
        let starting = tokio::spawn(async move { session.start().await });

        let first = f.server.expect_request("initialize").await;
        f.server.respond_error(first.id, retryable()).await;

        assert!(starting.await.unwrap().is_err());
        assert_eq!(f.session.state(), SessionState::StartFailed);
    }

    struct NeverDecides;

    #[async_trait]
    impl InitFailurePolicy for NeverDecides {
        async fn decide(&self, _: &str, _: &LspError, _: u32) -> FailureDecision {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stop_interrupts_pending_initialize() {
        let mut f = fixture();
        let session = Arc::clone(&f.session);
        let starting = tokio::spawn(async move { session.start().await });
        f.server.expect_request("initialize").await;

        f.session.stop().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), starting)
            .await
            .expect("start should end once the session is stopped")
            .unwrap();
        assert!(result.is_err());
        assert_eq!(f.session.state(), SessionState::Stopped);
        f.server.assert_silent(QUIET).await;
    }

    #[tokio::test]
    async fn test_stop_interrupts_pending_retry_decision() {
        let mut options = options();
        options.failure_policy = Some(Arc::new(NeverDecides));
        let mut f = fixture_with(PromptMode::Fixed(None), options);
        let session = Arc::clone(&f.session);
        let starting = tokio::spawn(async move { session.start().await });

        let first = f.server.expect_request("initialize").await;
        f.server.respond_error(first.id, retryable()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.session.stop().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), starting)
            .await
            .expect("start should end once the session is stopped")
            .unwrap();
        assert!(result.unwrap_err().is_retryable_handshake());
        assert_eq!(f.session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_transport_failure_is_start_failed() {
        let temp = TempDir::new().unwrap();
        let host = Arc::new(LocalHost::new(temp.path(), &FilesSettings::default()));
        let config = ServerConfig::tcp("down", "127.0.0.1:1", &["typescript"]);
        let session = Session::new(
            &config,
            Arc::new(FakeConnector::unreachable()),
            host.clone(),
            options(),
        );

        let err = session.start().await.unwrap_err();
        assert!(matches!(err, LspError::Transport(_)));
        assert_eq!(session.state(), SessionState::StartFailed);
        assert_eq!(host.errors().await.len(), 1);

        // Explicit retry goes back through Starting.
        assert!(session.start().await.is_err());
        assert_eq!(session.state(), SessionState::StartFailed);
    }

    #[tokio::test]
    async fn test_concurrent_start_initializes_once() {
        let mut f = fixture();
        let a = tokio::spawn({
            let session = Arc::clone(&f.session);
            async move { session.start().await }
        });
        let b = tokio::spawn({
            let session = Arc::clone(&f.session);
            async move { session.start().await }
        });

        f.server.handshake(json!({})).await;
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        f.server.assert_silent(QUIET).await;
    }

    #[tokio::test]
    async fn test_stop_sends_shutdown_then_exit() {
        let mut f = fixture();
        start(&mut f, json!({})).await;

        let session = Arc::clone(&f.session);
        let stopping = tokio::spawn(async move { session.stop().await });
        let shutdown = f.server.expect_request("shutdown").await;
        f.server.respond(shutdown.id, Value::Null).await;
        f.server.expect_notification("exit").await;
        stopping.await.unwrap().unwrap();

        assert_eq!(f.session.state(), SessionState::Stopped);
        let refused = f.session.request::<Value>("textDocument/hover", None, None).await;
        assert!(matches!(refused, Err(LspError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_diagnostics_routed_to_host() {
        let mut f = fixture();
        start(&mut f, json!({})).await;

        f.server
            .notify(
                "textDocument/publishDiagnostics",
                Some(json!({
                    "uri": "file:///w/a.ts",
                    "diagnostics": [{
                        "range": { "start": { "line": 0, "character": 0 },
                                   "end": { "line": 0, "character": 1 } },
                        "severity": 1,
                        "message": "oops"
                    }]
                })),
            )
            .await;

        let mut routed = false;
        for _ in 0..50 {
            if f.host.diagnostics().await.contains_key("file:///w/a.ts") {
                routed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(routed);
        assert_eq!(f.session.diagnostics("file:///w/a.ts").await[0].message, "oops");
    }

    #[tokio::test]
    async fn test_server_crash_stops_session() {
        let mut f = fixture();
        start(&mut f, json!({})).await;
        drop(f.server);

        let mut stopped = false;
        for _ in 0..50 {
            if f.session.state() == SessionState::Stopped {
                stopped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stopped);
        assert_eq!(f.host.errors().await.len(), 1);
    }

    #[test]
    fn test_state_roundtrip() {
        for state in [
            SessionState::Initial,
            SessionState::Starting,
            SessionState::Running,
            SessionState::StartFailed,
            SessionState::Stopping,
            SessionState::Stopped,
        ] {
            assert_eq!(SessionState::from_u8(state.to_u8()), state);
        }
        assert_eq!(SessionState::StartFailed.to_string(), "start-failed");
    }
}
