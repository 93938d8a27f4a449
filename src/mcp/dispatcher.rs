//! The protocol core.
//!
//! A [`Protocol`] is bound to one transport and one server identity. It owns
//! three pieces of mutable state:
//!
//! - the pending request table, keyed by the ids of requests we sent
//! - the request handler table, keyed by method name
//! - the notification handler table, keyed by method name
//!
//! Every inbound message is processed on its own task, so a slow handler
//! never blocks the arrival of the next message. Responses to different
//! requests may therefore leave in a different order than their requests
//! arrived; correlation is by id only. [`Protocol::drain`] waits for those
//! tasks, so a server whose input has ended can still answer everything it
//! received.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, warn};

use crate::error::McpError;
use crate::mcp::capabilities::{ClientInfo, ServerIdentity, ServerInfo};
use crate::mcp::handshake::{Handshake, HandshakeState, INITIALIZED_NOTIFICATION, INITIALIZE_METHOD};
use crate::mcp::protocol::{
    classify, ErrorObject, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId, ResponsePayload,
};
use crate::mcp::transport::{Inbound, Transport};

/// A registered request handler.
pub type RequestHandler =
    Arc<dyn Fn(Option<Value>, RequestId) -> BoxFuture<'static, Result<Value, McpError>> + Send + Sync>;

/// A registered notification handler.
pub type NotificationHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<(), McpError>> + Send + Sync>;

type PendingSender = oneshot::Sender<Result<Value, McpError>>;

/// Tunables for a protocol core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtocolOptions {
    /// Default timeout applied by [`Protocol::send_request`]. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Reject requests other than `initialize` and `ping` until the handshake completes.
    ///
    /// The gate reads the handshake state when a request starts, and each
    /// inbound message starts on its own task. A current-thread runtime
    /// starts those tasks in arrival order, so a client that pipelines
    /// `initialize`, `notifications/initialized` and a request is served.
    /// On a multi-threaded runtime the three may start in any order and the
    /// request can be rejected; clients should wait for the `initialize`
    /// response before sending anything else.
    pub strict_lifecycle: bool,
}

struct Inner {
    transport: Arc<dyn Transport>,
    handshake: Arc<Handshake>,
    server_info: ServerInfo,
    options: ProtocolOptions,
    next_id: AtomicI64,
    closed: AtomicBool,
    pending: Mutex<HashMap<RequestId, PendingSender>>,
    request_handlers: RwLock<HashMap<String, RequestHandler>>,
    notification_handlers: RwLock<HashMap<String, NotificationHandler>>,
    /// Inbound messages handed to a task and not yet fully handled.
    in_flight: AtomicUsize,
    idle: Notify,
}

impl Inner {
    fn pending(&self) -> MutexGuard<'_, HashMap<RequestId, PendingSender>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request_handler(&self, method: &str) -> Option<RequestHandler> {
        self.request_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
    }

    fn notification_handler(&self, method: &str) -> Option<NotificationHandler> {
        self.notification_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
    }
}

/// A JSON-RPC dispatcher bound to one transport.
///
/// Cloning is cheap; clones share the same tables and transport.
#[derive(Clone)]
pub struct Protocol {
    inner: Arc<Inner>,
}

impl Protocol {
    /// Creates a protocol core with default options.
    ///
    /// Must be called inside a Tokio runtime for inbound messages to be
    /// processed.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, identity: ServerIdentity) -> Self {
        Self::with_options(transport, identity, ProtocolOptions::default())
    }

    /// Creates a protocol core.
    ///
    /// Registers the inbound callback on `transport` and installs the
    /// built-in `initialize` and `notifications/initialized` handlers.
    #[must_use]
    pub fn with_options(
        transport: Arc<dyn Transport>,
        identity: ServerIdentity,
        options: ProtocolOptions,
    ) -> Self {
        let inner = Arc::new(Inner {
            transport,
            handshake: Arc::new(Handshake::new(&identity)),
            server_info: identity.info,
            options,
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
            pending: Mutex::new(HashMap::new()),
            request_handlers: RwLock::new(HashMap::new()),
            notification_handlers: RwLock::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            idle: Notify::new(),
        });

        let weak = Arc::downgrade(&inner);
        inner
            .transport
            .on_message(Arc::new(move |inbound| spawn_inbound(&weak, inbound)));

        let protocol = Self { inner };
        protocol.install_handshake_handlers();
        protocol
    }

    fn install_handshake_handlers(&self) {
        let handshake = Arc::clone(&self.inner.handshake);
        self.on_request(INITIALIZE_METHOD, move |params, _id| {
            let result = handshake.initialize(params);
            async move { result }
        });

        let handshake = Arc::clone(&self.inner.handshake);
        self.on_notification(INITIALIZED_NOTIFICATION, move |_params| {
            handshake.acknowledge();
            async { Ok(()) }
        });
    }

    /// Registers the handler for a request method, replacing any earlier one.
    pub fn on_request<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>, RequestId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, McpError>> + Send + 'static,
    {
        let handler: RequestHandler = Arc::new(move |params, id| handler(params, id).boxed());
        self.inner
            .request_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.into(), handler);
    }

    /// Registers the handler for a notification method, replacing any earlier one.
    pub fn on_notification<F, Fut>(&self, method: impl Into<String>, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), McpError>> + Send + 'static,
    {
        let handler: NotificationHandler = Arc::new(move |params| handler(params).boxed());
        self.inner
            .notification_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.into(), handler);
    }

    /// Sends a request and waits for the matching response.
    ///
    /// Applies [`ProtocolOptions::request_timeout`] if one is set.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Rpc`] if the peer answered with an error,
    /// [`McpError::Transport`] if the request could not be sent,
    /// [`McpError::Timeout`] if the default timeout elapsed, or
    /// [`McpError::Closed`] if the core was closed first.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        self.request(method, params, self.inner.options.request_timeout)
            .await
    }

    /// Sends a request and waits at most `timeout` for the matching response.
    ///
    /// # Errors
    ///
    /// As [`Protocol::send_request`], with [`McpError::Timeout`] once
    /// `timeout` elapses.
    pub async fn send_request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, McpError> {
        self.request(method, params, Some(timeout)).await
    }

    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, McpError> {
        if self.is_closed() {
            return Err(McpError::Closed);
        }

        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.inner.pending().insert(id.clone(), tx);

        debug!(%id, method, "sending request");
        let request = JsonRpcRequest::new(id.clone(), method, params);
        if let Err(e) = self.inner.transport.send(&request.into()).await {
            self.inner.pending().remove(&id);
            return Err(e.into());
        }

        let outcome = match timeout {
            None => rx.await,
            Some(limit) => {
                if let Ok(outcome) = tokio::time::timeout(limit, rx).await {
                    outcome
                } else {
                    self.inner.pending().remove(&id);
                    warn!(%id, method, ?limit, "request timed out");
                    return Err(McpError::Timeout(limit));
                }
            }
        };

        // A dropped sender means the entry was discarded without an answer.
        outcome.unwrap_or(Err(McpError::Closed))
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Closed`] after [`Protocol::close`], or
    /// [`McpError::Transport`] if the transport rejects the write.
    pub async fn send_notification(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), McpError> {
        if self.is_closed() {
            return Err(McpError::Closed);
        }
        debug!(method, "sending notification");
        let notification = JsonRpcNotification::new(method, params);
        self.inner.transport.send(&notification.into()).await?;
        Ok(())
    }

    /// Closes the transport and rejects every pending request with
    /// [`McpError::Closed`].
    ///
    /// Later calls do nothing.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Transport`] if the transport fails to shut down.
    pub async fn close(&self) -> Result<(), McpError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.fail_pending();
        self.inner.transport.close().await?;
        Ok(())
    }

    /// Rejects every request awaiting a response with [`McpError::Closed`].
    pub(crate) fn fail_pending(&self) {
        let pending: Vec<_> = self.inner.pending().drain().collect();
        if !pending.is_empty() {
            debug!(count = pending.len(), "rejecting pending requests");
        }
        for (_, tx) in pending {
            let _ = tx.send(Err(McpError::Closed));
        }
    }

    /// Waits until every inbound message received so far has been handled
    /// and its response, if any, written.
    ///
    /// Must not be awaited from inside a handler, which would wait for itself.
    pub async fn drain(&self) {
        loop {
            let idle = self.inner.idle.notified();
            let in_flight = self.inner.in_flight.load(Ordering::Acquire);
            if in_flight == 0 {
                return;
            }
            debug!(in_flight, "waiting for inbound messages to finish");
            idle.await;
        }
    }

    /// Returns `true` once [`Protocol::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Returns the number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending().len()
    }

    /// Returns where the connection is in the handshake.
    #[must_use]
    pub fn handshake_state(&self) -> HandshakeState {
        self.inner.handshake.state()
    }

    /// Returns the client's identity, once `initialize` has been received.
    #[must_use]
    pub fn client_info(&self) -> Option<ClientInfo> {
        self.inner.handshake.client_info()
    }

    /// Returns the merged capability descriptor.
    #[must_use]
    pub fn capabilities(&self) -> &Value {
        self.inner.handshake.capabilities()
    }

    /// Returns the server's name and version.
    #[must_use]
    pub fn server_info(&self) -> &ServerInfo {
        &self.inner.server_info
    }

    /// Returns the options this core was built with.
    #[must_use]
    pub fn options(&self) -> ProtocolOptions {
        self.inner.options
    }

    /// Processes one inbound item.
    ///
    /// Never fails: every problem is either answered on the wire or logged.
    pub async fn handle_inbound(&self, inbound: Inbound) {
        let value = match inbound {
            Inbound::Message(value) => value,
            Inbound::Malformed(detail) => {
                warn!(%detail, "received malformed JSON");
                let error = ErrorObject::parse_error().with_data(Value::String(detail));
                self.reply(JsonRpcResponse::error(None, error)).await;
                return;
            }
        };

        match classify(value) {
            Ok(JsonRpcMessage::Request(request)) => self.handle_request(request).await,
            Ok(JsonRpcMessage::Response(response)) => self.handle_response(response),
            Ok(JsonRpcMessage::Notification(notification)) => {
                self.handle_notification(notification).await;
            }
            Err(e) => match e.reply() {
                Some(reply) => {
                    warn!(error = %e, "rejecting malformed message");
                    self.reply(reply).await;
                }
                None => debug!(error = %e, "dropping malformed response"),
            },
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        debug!(%id, %method, "handling request");

        let response = match self.dispatch_request(&method, params, id.clone()).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => {
                debug!(%id, %method, code = error.code, "request failed");
                JsonRpcResponse::error(Some(id), error)
            }
        };
        self.reply(response).await;
    }

    async fn dispatch_request(
        &self,
        method: &str,
        params: Option<Value>,
        id: RequestId,
    ) -> Result<Value, ErrorObject> {
        if self.inner.options.strict_lifecycle && !self.inner.handshake.permits(method) {
            return Err(ErrorObject::invalid_request("Server not initialised"));
        }

        let Some(handler) = self.inner.request_handler(method) else {
            return Err(ErrorObject::method_not_found(method));
        };

        match AssertUnwindSafe(async move { handler(params, id).await })
            .catch_unwind()
            .await
        {
            Ok(result) => result.map_err(McpError::into_error_object),
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                error!(method, %detail, "request handler panicked");
                Err(ErrorObject::internal_error(detail))
            }
        }
    }

    fn handle_response(&self, response: JsonRpcResponse) {
        let Some(id) = response.id else {
            debug!("dropping response with null id");
            return;
        };

        let Some(tx) = self.inner.pending().remove(&id) else {
            debug!(%id, "dropping unmatched response");
            return;
        };

        let outcome = match response.payload {
            ResponsePayload::Result(result) => Ok(result),
            ResponsePayload::Error(error) => Err(McpError::Rpc(error)),
        };
        if tx.send(outcome).is_err() {
            debug!(%id, "requester stopped waiting before the response arrived");
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        let JsonRpcNotification { method, params, .. } = notification;

        let Some(handler) = self.inner.notification_handler(&method) else {
            debug!(%method, "no handler for notification");
            return;
        };

        match AssertUnwindSafe(async move { handler(params).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(%method, error = %e, "notification handler failed"),
            Err(panic) => {
                error!(%method, detail = %panic_message(panic.as_ref()), "notification handler panicked");
            }
        }
    }

    async fn reply(&self, response: JsonRpcResponse) {
        if let Err(e) = self.inner.transport.send(&response.into()).await {
            error!(error = %e, "failed to send response");
        }
    }
}

impl std::fmt::Debug for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Protocol")
            .field("server_info", &self.inner.server_info)
            .field("options", &self.inner.options)
            .field("handshake", &self.handshake_state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// Hands one inbound item to a fresh task.
fn spawn_inbound(inner: &Weak<Inner>, inbound: Inbound) {
    let Some(inner) = inner.upgrade() else {
        debug!("protocol core dropped, ignoring inbound message");
        return;
    };

    match Handle::try_current() {
        Ok(handle) => {
            let guard = InFlight::enter(&inner);
            let protocol = Protocol { inner };
            handle.spawn(async move {
                let _guard = guard;
                protocol.handle_inbound(inbound).await;
            });
        }
        Err(_) => warn!("no async runtime available, dropping inbound message"),
    }
}

/// Counts one inbound message as in flight until dropped.
struct InFlight(Arc<Inner>);

impl InFlight {
    fn enter(inner: &Arc<Inner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(inner))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
