//! LSP Transport Layer
//!
//! Opens the byte-duplex connection to a server: either a spawned process's
//! standard streams or a TCP socket. No framing happens here; see `codec`.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use crate::error::LspError;
use crate::models::config::ServerTransport;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// An open connection to a server
pub struct Duplex {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    /// The server process, when the transport spawned one
    pub child: Option<Child>,
}

impl Duplex {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }
}

impl std::fmt::Debug for Duplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Duplex")
            .field("child", &self.child.as_ref().and_then(|c| c.id()))
            .finish_non_exhaustive()
    }
}

/// Something that can produce a fresh [`Duplex`] for a session
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<Duplex, LspError>;

    /// Human-readable endpoint for logs
    fn describe(&self) -> String;
}

/// Connector for a configured [`ServerTransport`]
#[derive(Debug, Clone)]
pub struct ServerConnector {
    transport: ServerTransport,
    root: std::path::PathBuf,
}

impl ServerConnector {
    pub fn new(transport: ServerTransport, root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            transport,
            root: root.into(),
        }
    }
}

#[async_trait]
impl Connector for ServerConnector {
    async fn open(&self) -> Result<Duplex, LspError> {
        match &self.transport {
            ServerTransport::Stdio { command, args } => spawn(command, args, &self.root),
            ServerTransport::Tcp { address } => connect(address).await,
        }
    }

    fn describe(&self) -> String {
        self.transport.to_string()
    }
}

fn spawn(command: &str, args: &[String], root: &std::path::Path) -> Result<Duplex, LspError> {
    tracing::info!("Spawning language server: {} {:?}", command, args);

    let mut child = Command::new(command)
        .args(args)
        .current_dir(root)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| LspError::Transport(format!("{command}: {e}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| LspError::Transport("Failed to get stdin".to_string()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| LspError::Transport("Failed to get stdout".to_string()))?;

    Ok(Duplex {
        reader: Box::new(stdout),
        writer: Box::new(stdin),
        child: Some(child),
    })
}

/// Single connection attempt, no retry.
async fn connect(address: &str) -> Result<Duplex, LspError> {
    tracing::info!("Connecting to language server at {}", address);

    let stream = TcpStream::connect(address)
        .await
        .map_err(|e| LspError::Transport(format!("{address}: {e}")))?;
    let _ = stream.set_nodelay(true);
    let (reader, writer) = stream.into_split();

    Ok(Duplex::new(reader, writer))
}
