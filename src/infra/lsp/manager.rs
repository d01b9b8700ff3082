//! Session manager
//!
//! Owns one [`Session`] per configured server. Sessions start concurrently
//! and fail independently; document events fan out to every session, each of
//! which filters by its own document selector.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;

use super::session::{Session, SessionOptions, SessionState};
use super::transport::ServerConnector;
use crate::error::LspError;
use crate::models::{DocumentEvent, LanglinkConfig};
use crate::services::host::Host;

pub struct SessionManager {
    host: Arc<dyn Host>,
    sessions: Vec<Arc<Session>>,
}

/// Name and state of one managed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub name: String,
    pub state: SessionState,
}

impl SessionManager {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            sessions: Vec::new(),
        }
    }

    /// One session per effective server in `config`, in configuration order.
    pub fn from_config(config: &LanglinkConfig, host: Arc<dyn Host>) -> Self {
        let mut manager = Self::new(Arc::clone(&host));
        for server in config.effective_servers() {
            let connector = ServerConnector::new(server.transport.clone(), host.root());
            let options = SessionOptions::for_server(&server, &config.files);
            let session = Session::new(&server, Arc::new(connector), Arc::clone(&host), options);
            manager.add(session);
        }
        manager
    }

    pub fn add(&mut self, session: Arc<Session>) {
        if self.session(session.name()).is_some() {
            tracing::warn!("Duplicate server name '{}', ignoring", session.name());
            return;
        }
        self.sessions.push(session);
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn session(&self, name: &str) -> Option<&Arc<Session>> {
        self.sessions.iter().find(|s| s.name() == name)
    }

    pub fn sessions(&self) -> &[Arc<Session>] {
        &self.sessions
    }

    pub fn status(&self) -> Vec<SessionStatus> {
        self.sessions
            .iter()
            .map(|s| SessionStatus {
                name: s.name().to_string(),
                state: s.state(),
            })
            .collect()
    }

    /// Start every session concurrently. One failing server does not affect
    /// the others.
    pub async fn start_all(&self) -> Vec<(String, Result<(), LspError>)> {
        let starts = self.sessions.iter().map(|session| async move {
            (session.name().to_string(), session.start().await)
        });
        let results = join_all(starts).await;

        let running = results.iter().filter(|(_, r)| r.is_ok()).count();
        tracing::info!("{}/{} language servers running", running, results.len());
        results
    }

    /// Forward one editor event to every session.
    pub async fn handle_event(&self, event: &DocumentEvent) {
        for session in &self.sessions {
            match session.handle_event(event).await {
                Ok(()) => {}
                Err(e @ (LspError::StaleVersion { .. } | LspError::Cancelled)) => {
                    tracing::debug!("{}: dropped event for {}: {}", session.name(), event.uri(), e);
                }
                Err(e) => {
                    tracing::warn!("{}: event for {} failed: {}", session.name(), event.uri(), e);
                }
            }
        }
    }

    /// Consume editor events until the sender side closes.
    pub async fn run(&self, mut events: mpsc::Receiver<DocumentEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(&event).await;
        }
        tracing::debug!("Document event channel closed");
    }

    pub async fn stop_all(&self) {
        let stops = self.sessions.iter().map(|session| async move {
            if let Err(e) = session.stop().await {
                tracing::warn!("Error stopping {} server: {}", session.name(), e);
            }
        });
        join_all(stops).await;
    }
}
