//! JSON-RPC message connection
//!
//! Frames messages over a [`Duplex`], correlates responses to outstanding
//! requests by id and dispatches server-initiated requests and notifications
//! to handlers registered by method name.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::codec::{MessageReader, write_message};
use super::protocol::{
    Message, Notification, Request, RequestId, Response, ResponseError, error_codes,
};
use super::transport::{BoxedReader, BoxedWriter, Duplex};
use crate::error::LspError;

type PendingRequest = oneshot::Sender<Response>;

/// Handler for a server-initiated request. The token fires when the server
/// cancels the request or the connection goes away.
pub type RequestHandler = Arc<
    dyn Fn(Option<Value>, CancellationToken) -> BoxFuture<'static, Result<Value, LspError>>
        + Send
        + Sync,
>;

/// Handler for a server notification. Awaited inline by the read loop, so it
/// must not wait on responses from the same connection.
pub type NotificationHandler = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct Connection {
    name: String,
    writer: Mutex<Option<BoxedWriter>>,
    reader: Mutex<Option<BoxedReader>>,
    next_id: AtomicU64,
    pending: RwLock<HashMap<RequestId, PendingRequest>>,
    incoming: Mutex<HashMap<RequestId, CancellationToken>>,
    request_handlers: RwLock<HashMap<String, RequestHandler>>,
    notification_handlers: RwLock<HashMap<String, NotificationHandler>>,
    listening: AtomicBool,
    shutdown: CancellationToken,
    terminated: CancellationToken,
}

impl Connection {
    /// Wrap an open duplex. Nothing is read until [`Connection::listen`].
    pub fn new(name: impl Into<String>, duplex: Duplex) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            writer: Mutex::new(Some(duplex.writer)),
            reader: Mutex::new(Some(duplex.reader)),
            next_id: AtomicU64::new(1),
            pending: RwLock::new(HashMap::new()),
            incoming: Mutex::new(HashMap::new()),
            request_handlers: RwLock::new(HashMap::new()),
            notification_handlers: RwLock::new(HashMap::new()),
            listening: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            terminated: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the handler for a server-initiated request method.
    pub async fn on_request<F, Fut>(&self, method: &str, handler: F) -> Result<(), LspError>
    where
        F: Fn(Option<Value>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, LspError>> + Send + 'static,
    {
        let mut handlers = self.request_handlers.write().await;
        if handlers.contains_key(method) {
            return Err(LspError::DuplicateHandler(method.to_string()));
        }
        let handler: RequestHandler = Arc::new(move |params, token| handler(params, token).boxed());
        handlers.insert(method.to_string(), handler);
        Ok(())
    }

    /// Register the handler for a server notification method.
    pub async fn on_notification<F, Fut>(&self, method: &str, handler: F) -> Result<(), LspError>
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handlers = self.notification_handlers.write().await;
        if handlers.contains_key(method) {
            return Err(LspError::DuplicateHandler(method.to_string()));
        }
        let handler: NotificationHandler = Arc::new(move |params| handler(params).boxed());
        handlers.insert(method.to_string(), handler);
        Ok(())
    }

    /// Start the read loop. May be called once per connection.
    pub async fn listen(self: &Arc<Self>) -> Result<(), LspError> {
        if self.listening.swap(true, Ordering::AcqRel) {
            return Err(LspError::AlreadyListening);
        }
        let reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or(LspError::NotConnected)?;

        let connection = Arc::clone(self);
        tokio::spawn(async move {
            connection.read_messages(MessageReader::new(reader)).await;
        });
        Ok(())
    }

    /// Send a request and wait for its response.
    ///
    /// When `cancel` fires first the pending entry is dropped, a single
    /// `$/cancelRequest` is sent and the call fails with `Cancelled`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: Option<&CancellationToken>,
    ) -> Result<T, LspError> {
        if self.terminated.is_cancelled() {
            return Err(self.terminated_error());
        }
        if cancel.is_some_and(|token| token.is_cancelled()) {
            return Err(LspError::Cancelled);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            // terminate() cancels before draining, so under the lock either
            // the token is visible or the drain will see this entry
            let mut pending = self.pending.write().await;
            if self.terminated.is_cancelled() {
                return Err(self.terminated_error());
            }
            pending.insert(RequestId::Number(id), tx);
        }

        tracing::trace!("{} LSP request {}: {}", self.name, id, method);

        if let Err(e) = self.write(&Request::new(id, method, params)).await {
            self.pending.write().await.remove(&RequestId::Number(id));
            return Err(e);
        }

        let never = CancellationToken::new();
        let cancel = cancel.unwrap_or(&never);
        let wait = timeout(crate::config::timeout_for(method), rx);

        tokio::select! {
            biased;
            result = wait => match result {
                Ok(Ok(response)) => self.decode(response),
                Ok(Err(_)) => Err(self.terminated_error()),
                Err(_) => {
                    self.cancel_request(id).await;
                    Err(LspError::Timeout(format!(
                        "{} '{}' timed out. The language server may be busy or unresponsive",
                        self.name, method
                    )))
                }
            },
            _ = cancel.cancelled() => {
                tracing::debug!("{} LSP request {} ({}) cancelled", self.name, id, method);
                self.cancel_request(id).await;
                Err(LspError::Cancelled)
            }
        }
    }

    fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T, LspError> {
        match response.into_result() {
            Ok(result) => {
                serde_json::from_value(result).map_err(|e| LspError::Protocol(e.to_string()))
            }
            Err(err) if err.code == error_codes::SERVER_TERMINATED => Err(self.terminated_error()),
            Err(err) if err.code == error_codes::REQUEST_CANCELLED => Err(LspError::Cancelled),
            Err(err) => Err(err.into()),
        }
    }

    /// Forget a pending request and tell the server to stop working on it.
    async fn cancel_request(&self, id: u64) {
        let removed = self
            .pending
            .write()
            .await
            .remove(&RequestId::Number(id))
            .is_some();
        if removed {
            let _ = self
                .notify("$/cancelRequest", Some(serde_json::json!({ "id": id })))
                .await;
        }
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), LspError> {
        self.write(&Notification::new(method, params)).await
    }

    async fn write<T: Serialize>(&self, message: &T) -> Result<(), LspError> {
        let mut writer_guard = self.writer.lock().await;
        let writer = writer_guard.as_mut().ok_or(LspError::NotConnected)?;
        write_message(writer, message).await?;
        Ok(())
    }

    /// Background task that reads and dispatches messages
    async fn read_messages(self: Arc<Self>, mut reader: MessageReader<BoxedReader>) {
        loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = reader.read_message() => next,
            };

            match next {
                Ok(Some(message)) => self.handle_message(message).await,
                Ok(None) => {
                    if !self.shutdown.is_cancelled() {
                        tracing::warn!("{} language server closed the connection", self.name);
                    }
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    tracing::warn!("{} sent a malformed message: {}", self.name, e);
                }
                Err(e) => {
                    if !self.shutdown.is_cancelled() {
                        tracing::error!("{} LSP read error: {}", self.name, e);
                    }
                    break;
                }
            }
        }
        self.terminate().await;
    }

    /// Fail everything still waiting on this connection
    async fn terminate(&self) {
        self.terminated.cancel();

        let mut pending = self.pending.write().await;
        if !pending.is_empty() {
            tracing::debug!(
                "Cancelling {} pending requests: {} connection closed",
                pending.len(),
                self.name
            );
        }
        for (id, sender) in pending.drain() {
            let _ = sender.send(Response::error(
                id,
                ResponseError::new(
                    error_codes::SERVER_TERMINATED,
                    format!("{} language server terminated unexpectedly", self.name),
                ),
            ));
        }
        drop(pending);

        for (_, token) in self.incoming.lock().await.drain() {
            token.cancel();
        }
    }

    async fn handle_message(self: &Arc<Self>, message: Message) {
        match message {
            Message::Response(response) => {
                let Some(id) = response.id.clone() else {
                    tracing::warn!("{} sent a response without id: {:?}", self.name, response.error);
                    return;
                };
                let mut pending = self.pending.write().await;
                // Try direct match first, then string->number coercion
                let sender = pending.remove(&id).or_else(|| {
                    id.as_number()
                        .and_then(|n| pending.remove(&RequestId::Number(n)))
                });
                match sender {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        tracing::debug!(
                            "Dropping response for unknown request ID {} (cancelled or timed out)",
                            id
                        );
                    }
                }
            }
            Message::Request(request) => self.dispatch_request(request).await,
            Message::Notification(notification) => {
                if notification.method == "$/cancelRequest" {
                    self.cancel_incoming(notification.params.as_ref()).await;
                    return;
                }

                let handler = self
                    .notification_handlers
                    .read()
                    .await
                    .get(&notification.method)
                    .cloned();
                match handler {
                    Some(handler) => handler(notification.params).await,
                    None => tracing::trace!("Unhandled notification: {}", notification.method),
                }
            }
        }
    }

    async fn dispatch_request(self: &Arc<Self>, request: Request) {
        let Request {
            id, method, params, ..
        } = request;

        let handler = self.request_handlers.read().await.get(&method).cloned();
        let Some(handler) = handler else {
            tracing::debug!("Unhandled server request: {}", method);
            let response = Response::error(id, ResponseError::method_not_found(&method));
            if let Err(e) = self.write(&response).await {
                tracing::debug!("{} failed to answer {}: {}", self.name, method, e);
            }
            return;
        };

        let token = self.terminated.child_token();
        self.incoming.lock().await.insert(id.clone(), token.clone());

        let connection = Arc::clone(self);
        tokio::spawn(async move {
            // The handler runs in its own task so a panic surfaces as a JoinError.
            let outcome = tokio::spawn(handler(params, token)).await;
            connection.incoming.lock().await.remove(&id);

            let response = match outcome {
                Ok(Ok(result)) => Response::success(id, result),
                Ok(Err(err)) => {
                    if err.is_cancelled() {
                        tracing::debug!("{} request {} cancelled", connection.name, method);
                    } else {
                        tracing::warn!("{} request {} failed: {}", connection.name, method, err);
                    }
                    Response::error(id, err.into_response_error())
                }
                Err(join_error) => {
                    tracing::error!(
                        "{} handler for {} crashed: {}",
                        connection.name,
                        method,
                        join_error
                    );
                    Response::error(
                        id,
                        ResponseError::new(
                            error_codes::INTERNAL_ERROR,
                            format!("Request handler for {method} failed"),
                        ),
                    )
                }
            };

            if let Err(e) = connection.write(&response).await {
                tracing::debug!("{} failed to answer {}: {}", connection.name, method, e);
            }
        });
    }

    async fn cancel_incoming(&self, params: Option<&Value>) {
        let Some(id) = params
            .and_then(|p| p.get("id"))
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok())
        else {
            return;
        };
        if let Some(token) = self.incoming.lock().await.get(&id) {
            tracing::debug!("{} cancelled request {}", self.name, id);
            token.cancel();
        }
    }

    /// Stop reading and close the write side.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.writer.lock().await.take();
        // A connection that never listened has no read loop to clean up.
        if !self.listening.load(Ordering::Acquire) {
            self.terminate().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.terminated.is_cancelled()
    }

    /// Resolves once the read loop has ended and pending requests were failed.
    pub async fn closed(&self) {
        self.terminated.cancelled().await
    }

    fn terminated_error(&self) -> LspError {
        LspError::ServerTerminated {
            server: self.name.clone(),
        }
    }
}
