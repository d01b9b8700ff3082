//! In-memory language server for tests
//!
//! [`fake_pair`] returns a client-side [`Duplex`] and the [`FakeServer`] end
//! of the same in-memory pipe. The fake speaks the framed protocol and lets a
//! test script the server side message by message.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

use super::codec::{MessageReader, write_message};
use super::protocol::{Message, Notification, Request, RequestId, Response, ResponseError};
use super::transport::{Connector, Duplex};
use crate::error::LspError;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub fn fake_pair() -> (Duplex, FakeServer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let (server_read, server_write) = tokio::io::split(server);

    let server = FakeServer {
        reader: MessageReader::new(server_read),
        writer: server_write,
    };
    (Duplex::new(client_read, client_write), server)
}

pub struct FakeServer {
    reader: MessageReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeServer {
    /// Next message from the client; panics if none arrives in time.
    pub async fn recv(&mut self) -> Message {
        match tokio::time::timeout(RECV_TIMEOUT, self.reader.read_message()).await {
            Ok(Ok(Some(message))) => message,
            Ok(Ok(None)) => panic!("client closed the connection"),
            Ok(Err(e)) => panic!("read error: {e}"),
            Err(_) => panic!("no message from client within {RECV_TIMEOUT:?}"),
        }
    }

    /// Next message, or `None` if the client closed the stream.
    pub async fn try_recv(&mut self, wait: Duration) -> Option<Message> {
        match tokio::time::timeout(wait, self.reader.read_message()).await {
            Ok(Ok(message)) => message,
            _ => None,
        }
    }

    pub async fn expect_request(&mut self, method: &str) -> Request {
        match self.recv().await {
            Message::Request(request) if request.method == method => request,
            other => panic!("expected request {method}, got {other:?}"),
        }
    }

    pub async fn expect_notification(&mut self, method: &str) -> Notification {
        match self.recv().await {
            Message::Notification(n) if n.method == method => n,
            other => panic!("expected notification {method}, got {other:?}"),
        }
    }

    pub async fn expect_response(&mut self) -> Response {
        match self.recv().await {
            Message::Response(response) => response,
            other => panic!("expected response, got {other:?}"),
        }
    }

    /// Asserts the client sends nothing for `wait`.
    pub async fn assert_silent(&mut self, wait: Duration) {
        if let Ok(Ok(Some(message))) =
            tokio::time::timeout(wait, self.reader.read_message()).await
        {
            panic!("expected silence, got {message:?}");
        }
    }

    pub async fn respond(&mut self, id: RequestId, result: Value) {
        self.send(&Response::success(id, result)).await;
    }

    pub async fn respond_error(&mut self, id: RequestId, error: ResponseError) {
        self.send(&Response::error(id, error)).await;
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) {
        self.send(&Notification::new(method, params)).await;
    }

    /// Send a server-initiated request.
    pub async fn request(&mut self, id: u64, method: &str, params: Option<Value>) {
        self.send(&Request::new(id, method, params)).await;
    }

    /// Answer `initialize` with `capabilities` and consume `initialized`.
    pub async fn handshake(&mut self, capabilities: Value) -> Request {
        let initialize = self.expect_request("initialize").await;
        self.respond(
            initialize.id.clone(),
            serde_json::json!({ "capabilities": capabilities }),
        )
        .await;
        self.expect_notification("initialized").await;
        initialize
    }

    async fn send<T: serde::Serialize>(&mut self, message: &T) {
        write_message(&mut self.writer, message)
            .await
            .expect("fake server write failed");
    }
}

/// Connector that hands out one prepared duplex
pub struct FakeConnector {
    duplex: Mutex<Option<Duplex>>,
}

impl FakeConnector {
    pub fn new(duplex: Duplex) -> Self {
        Self {
            duplex: Mutex::new(Some(duplex)),
        }
    }

    /// A connector whose `open` always fails
    pub fn unreachable() -> Self {
        Self {
            duplex: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self) -> Result<Duplex, LspError> {
        self.duplex
            .lock()
            .expect("connector lock poisoned")
            .take()
            .ok_or_else(|| LspError::Transport("connection refused".to_string()))
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}
