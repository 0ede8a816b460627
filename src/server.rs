//! MCP server facade
//!
//! [`McpServer`] owns one side of a session: the method and notification
//! registries, the lifecycle state, the subscription store, and the
//! dispatch task that drains the transport. `start` installs the default
//! `initialize`/`ping` handlers and spawns the loop; everything else is
//! registration and outbound plumbing.
//!
//! # Example
//!
//! ```rust,no_run
//! use mcp_peer::{McpServer, Result};
//! use mcp_peer::method::ListTools;
//! use mcp_peer::protocol::{ListToolsResult, ServerCapabilities, ToolsCapability};
//! use mcp_peer::transport::StdioTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = McpServer::new("my-server", "1.0.0").capabilities(ServerCapabilities {
//!         tools: Some(ToolsCapability::default()),
//!         ..Default::default()
//!     });
//!
//!     server.register_method::<ListTools, _, _>(|_params| async move {
//!         Ok(ListToolsResult { tools: vec![], next_cursor: None })
//!     });
//!
//!     server.start(StdioTransport::new()).await?;
//!     server.wait_until_completed().await;
//!     Ok(())
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::codec::{self, Frame};
use crate::error::{Error, JsonRpcError, Result, TransportError};
use crate::method::{Initialize, Method, Notification, Ping};
use crate::protocol::{
    ClientCapabilities, EmptyResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, RequestId,
    ServerCapabilities, notifications,
};
use crate::registry::{MethodRegistry, NotificationRegistry, run_notification_handlers};
use crate::session::SessionState;
use crate::transport::Transport;

/// Backoff after a transient transport failure.
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(10);

/// Delay before the post-handshake initialized notification, so the
/// initialize response reaches the wire first on in-order transports.
const INITIALIZED_DELAY: Duration = Duration::from_millis(10);

/// Async callback invoked with the client's info and capabilities before
/// the session becomes initialized. An error from the hook vetoes the
/// handshake.
pub type InitializeHook = Arc<
    dyn Fn(Implementation, ClientCapabilities) -> BoxFuture<'static, Result<()>> + Send + Sync,
>;

/// What the client reported during the initialize handshake.
#[derive(Debug, Clone)]
struct ClientHandshake {
    info: Implementation,
    capabilities: ClientCapabilities,
}

struct ServerInner {
    info: Implementation,
    capabilities: RwLock<ServerCapabilities>,
    instructions: RwLock<Option<String>>,
    strict: AtomicBool,
    methods: RwLock<MethodRegistry>,
    notifications: RwLock<NotificationRegistry>,
    session: SessionState,
    client: RwLock<Option<ClientHandshake>>,
    /// Resource URI -> ids of subscribed requests. Storage only; semantics
    /// live in embedder-registered handlers.
    subscriptions: RwLock<HashMap<String, HashSet<RequestId>>>,
    initialize_hook: RwLock<Option<InitializeHook>>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    /// Serializes outbound frames so the transport observes send/notify
    /// call order.
    outbound: tokio::sync::Mutex<()>,
    dispatch: StdMutex<Option<JoinHandle<()>>>,
    shutdown_tx: StdMutex<Option<watch::Sender<bool>>>,
    diagnostic_ids: AtomicI64,
}

impl ServerInner {
    async fn send_frame<T: serde::Serialize>(&self, frame: &T) -> Result<()> {
        let transport = self
            .transport
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::internal("No transport bound"))?;
        let bytes = codec::encode(frame)?;
        let _order = self.outbound.lock().await;
        transport.send(bytes).await?;
        Ok(())
    }

    fn strict(&self) -> bool {
        self.strict.load(Ordering::Relaxed)
    }

    /// Id for a diagnostic response to a frame whose own id was
    /// unrecoverable.
    fn fresh_diagnostic_id(&self) -> RequestId {
        let n = self.diagnostic_ids.fetch_add(1, Ordering::Relaxed);
        RequestId::String(format!("unparseable-{}", n))
    }

    async fn handle_initialize(
        self: Arc<Self>,
        params: InitializeParams,
    ) -> Result<InitializeResult> {
        // Claim the handshake up front. Handlers run on their own spawned
        // tasks, so two racing initialize requests both reach this point;
        // the CAS picks exactly one winner and the loser is rejected.
        if !self.session.mark_initializing() {
            return Err(JsonRpcError::invalid_request("Server is already initialized").into());
        }
        if params.protocol_version != PROTOCOL_VERSION {
            self.session.abort_initializing();
            return Err(JsonRpcError::invalid_request(format!(
                "Unsupported protocol version: expected '{}', got '{}'",
                PROTOCOL_VERSION, params.protocol_version
            ))
            .into());
        }

        // The hook runs before the session opens so it can veto the
        // handshake by failing; a veto releases the claim.
        let hook = self.initialize_hook.read().unwrap().clone();
        if let Some(hook) = hook {
            if let Err(e) = hook(params.client_info.clone(), params.capabilities.clone()).await {
                self.session.abort_initializing();
                return Err(e);
            }
        }

        *self.client.write().unwrap() = Some(ClientHandshake {
            info: params.client_info.clone(),
            capabilities: params.capabilities,
        });
        self.session.mark_initialized();
        tracing::info!(
            client = %params.client_info.name,
            version = %params.client_info.version,
            "Session initialized"
        );

        // Emit the initialized notification once the response has had a
        // chance to reach the wire.
        let weak = Arc::downgrade(&self);
        tokio::spawn(async move {
            tokio::time::sleep(INITIALIZED_DELAY).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let notification = JsonRpcNotification::new(notifications::INITIALIZED)
                .with_params(serde_json::json!({}));
            if let Err(e) = inner.send_frame(&notification).await {
                tracing::warn!(error = %e, "Failed to emit initialized notification");
            }
        });

        Ok(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities.read().unwrap().clone(),
            server_info: self.info.clone(),
            instructions: self.instructions.read().unwrap().clone(),
        })
    }
}

/// The server peer of an MCP session.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.inner.info.name)
            .field("version", &self.inner.info.version)
            .field("strict", &self.inner.strict())
            .field("phase", &self.inner.session.phase())
            .finish()
    }
}

impl McpServer {
    /// Create a server with the given implementation info. Strict mode is
    /// on by default.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                info: Implementation::new(name, version),
                capabilities: RwLock::new(ServerCapabilities::default()),
                instructions: RwLock::new(None),
                strict: AtomicBool::new(true),
                methods: RwLock::new(MethodRegistry::new()),
                notifications: RwLock::new(NotificationRegistry::new()),
                session: SessionState::new(),
                client: RwLock::new(None),
                subscriptions: RwLock::new(HashMap::new()),
                initialize_hook: RwLock::new(None),
                transport: RwLock::new(None),
                outbound: tokio::sync::Mutex::new(()),
                dispatch: StdMutex::new(None),
                shutdown_tx: StdMutex::new(None),
                diagnostic_ids: AtomicI64::new(1),
            }),
        }
    }

    /// Set the capabilities advertised during the handshake.
    pub fn capabilities(self, capabilities: ServerCapabilities) -> Self {
        *self.inner.capabilities.write().unwrap() = capabilities;
        self
    }

    /// Set the instructions string returned from `initialize`.
    pub fn instructions(self, instructions: impl Into<String>) -> Self {
        *self.inner.instructions.write().unwrap() = Some(instructions.into());
        self
    }

    /// Enable or disable strict mode (initialize-before-use enforcement).
    pub fn strict(self, strict: bool) -> Self {
        self.inner.strict.store(strict, Ordering::Relaxed);
        self
    }

    /// Register a handler for method `M`, replacing any prior handler for
    /// the same name.
    pub fn register_method<M, H, Fut>(&self, handler: H)
    where
        M: Method,
        H: Fn(M::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<M::Result>> + Send + 'static,
    {
        self.inner.methods.write().unwrap().register::<M, _, _>(handler);
    }

    /// Append a handler for notification `N`. Multiple handlers for the
    /// same name run in registration order.
    pub fn on_notification<N, H, Fut>(&self, handler: H)
    where
        N: Notification,
        H: Fn(N::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.inner.notifications.write().unwrap().subscribe::<N, _, _>(handler);
    }

    /// Connect the transport and spawn the dispatch task.
    pub async fn start(&self, transport: impl Transport) -> Result<()> {
        self.start_inner(Arc::new(transport), None).await
    }

    /// Like [`start`](Self::start), with a hook invoked during the
    /// initialize handshake. A failing hook vetoes the handshake.
    pub async fn start_with_hook<F, Fut>(&self, transport: impl Transport, hook: F) -> Result<()>
    where
        F: Fn(Implementation, ClientCapabilities) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let hook: InitializeHook = Arc::new(move |info, caps| Box::pin(hook(info, caps)));
        self.start_inner(Arc::new(transport), Some(hook)).await
    }

    async fn start_inner(
        &self,
        transport: Arc<dyn Transport>,
        hook: Option<InitializeHook>,
    ) -> Result<()> {
        if self.inner.transport.read().unwrap().is_some() {
            return Err(Error::internal("Server is already started"));
        }
        transport.connect().await?;

        *self.inner.initialize_hook.write().unwrap() = hook;
        self.install_default_handlers();
        *self.inner.transport.write().unwrap() = Some(transport.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.inner.shutdown_tx.lock().unwrap() = Some(shutdown_tx);

        let inner = self.inner.clone();
        let handle = tokio::spawn(dispatch_loop(inner, transport, shutdown_rx));
        *self.inner.dispatch.lock().unwrap() = Some(handle);
        Ok(())
    }

    fn install_default_handlers(&self) {
        let mut methods = self.inner.methods.write().unwrap();

        // The initialize handler holds a weak reference: if the server is
        // torn down mid-call the upgrade fails and the request errors
        // instead of keeping the state alive.
        let weak: Weak<ServerInner> = Arc::downgrade(&self.inner);
        methods.register::<Initialize, _, _>(move |params| {
            let weak = weak.clone();
            async move {
                let inner = weak
                    .upgrade()
                    .ok_or_else(|| Error::internal("Server has shut down"))?;
                inner.handle_initialize(params).await
            }
        });

        methods.register::<Ping, _, _>(|_| async { Ok(EmptyResult::default()) });
    }

    /// Send a notification to the client.
    pub async fn notify<N: Notification>(&self, params: N::Params) -> Result<()> {
        let notification =
            JsonRpcNotification::new(N::NAME).with_params(serde_json::to_value(params)?);
        self.inner.send_frame(&notification).await
    }

    /// Send a response frame directly. Most embedders never need this;
    /// registered handlers respond through their return value.
    pub async fn send_response(&self, response: JsonRpcResponse) -> Result<()> {
        self.inner.send_frame(&response).await
    }

    /// Cancel the dispatch task, disconnect the transport, and drop
    /// session state. Safe to call repeatedly.
    pub async fn stop(&self) {
        let shutdown_tx = self.inner.shutdown_tx.lock().unwrap().take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(true);
        }
        let handle = self.inner.dispatch.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let transport = self.inner.transport.write().unwrap().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.disconnect().await {
                tracing::warn!(error = %e, "Transport disconnect failed during stop");
            }
        }
        self.inner.session.mark_terminated();
    }

    /// Await natural termination of the dispatch task (transport EOF or
    /// fatal error).
    pub async fn wait_until_completed(&self) {
        let handle = self.inner.dispatch.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.session.is_initialized()
    }

    /// The client's reported info, once initialized.
    pub fn client_info(&self) -> Option<Implementation> {
        self.inner.client.read().unwrap().as_ref().map(|h| h.info.clone())
    }

    /// The client's reported capabilities, once initialized.
    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        self.inner
            .client
            .read()
            .unwrap()
            .as_ref()
            .map(|h| h.capabilities.clone())
    }

    /// Record a subscriber for a resource URI.
    pub fn add_subscription(&self, uri: impl Into<String>, id: RequestId) {
        let mut subscriptions = self.inner.subscriptions.write().unwrap();
        subscriptions.entry(uri.into()).or_default().insert(id);
    }

    /// Remove a subscriber. Returns true if it was present.
    pub fn remove_subscription(&self, uri: &str, id: &RequestId) -> bool {
        let mut subscriptions = self.inner.subscriptions.write().unwrap();
        let Some(ids) = subscriptions.get_mut(uri) else {
            return false;
        };
        let removed = ids.remove(id);
        if ids.is_empty() {
            subscriptions.remove(uri);
        }
        removed
    }

    /// Ids currently subscribed to a resource URI.
    pub fn subscribers(&self, uri: &str) -> HashSet<RequestId> {
        self.inner
            .subscriptions
            .read()
            .unwrap()
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }
}

async fn dispatch_loop(
    inner: Arc<ServerInner>,
    transport: Arc<dyn Transport>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("Server dispatch loop started");
    loop {
        let received = tokio::select! {
            _ = shutdown.changed() => break,
            received = transport.receive() => received,
        };
        match received {
            Ok(bytes) => handle_frame(&inner, bytes).await,
            Err(TransportError::Transient) => {
                tokio::time::sleep(TRANSIENT_BACKOFF).await;
            }
            Err(TransportError::Closed) => {
                tracing::info!("Transport closed, dispatch loop finished");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Fatal transport error, dispatch loop finished");
                break;
            }
        }
    }
    tracing::debug!("Server dispatch loop stopped");
}

async fn handle_frame(inner: &Arc<ServerInner>, bytes: Vec<u8>) {
    match codec::classify(&bytes) {
        Ok(Frame::Request(request)) => handle_request(inner, request).await,
        Ok(Frame::Notification(notification)) => handle_notification(inner, notification).await,
        Ok(Frame::Response(response)) => {
            // The core server issues no requests, so no response can be
            // expected here.
            tracing::warn!(id = ?response.id(), "Dropping unexpected response frame");
        }
        Err(frame_error) => {
            tracing::warn!(error = %frame_error.error, "Unparseable frame");
            let id = frame_error
                .id
                .unwrap_or_else(|| inner.fresh_diagnostic_id());
            let response = JsonRpcResponse::error(Some(id), frame_error.error);
            if let Err(e) = inner.send_frame(&response).await {
                tracing::error!(error = %e, "Failed to send parse-error response");
            }
        }
    }
}

async fn handle_request(inner: &Arc<ServerInner>, request: JsonRpcRequest) {
    if let Err(error) = request.validate() {
        respond_with_error(inner, request.id, &request.method, error).await;
        return;
    }

    if inner.strict() && !inner.session.is_request_allowed(&request.method) {
        respond_with_error(
            inner,
            request.id,
            &request.method,
            JsonRpcError::invalid_request("Server is not initialized"),
        )
        .await;
        return;
    }

    let prepared = inner
        .methods
        .read()
        .unwrap()
        .dispatch(&request.method, request.params);
    let Some(future) = prepared else {
        respond_with_error(
            inner,
            request.id,
            &request.method,
            JsonRpcError::method_not_found(&request.method),
        )
        .await;
        return;
    };

    // The handler may suspend; run it off the dispatch loop so other
    // frames keep flowing.
    let inner = inner.clone();
    let id = request.id;
    let method = request.method;
    tokio::spawn(async move {
        let response = match future.await {
            Ok(result) => JsonRpcResponse::result(id, result),
            Err(error) => {
                tracing::warn!(method = %method, error = %error, "Request handler failed");
                JsonRpcResponse::error(Some(id), error)
            }
        };
        if let Err(e) = inner.send_frame(&response).await {
            tracing::error!(method = %method, error = %e, "Failed to send response");
        }
    });
}

async fn respond_with_error(
    inner: &Arc<ServerInner>,
    id: RequestId,
    method: &str,
    error: JsonRpcError,
) {
    tracing::warn!(method = %method, error = %error, "Rejecting request");
    let response = JsonRpcResponse::error(Some(id), error);
    if let Err(e) = inner.send_frame(&response).await {
        tracing::error!(method = %method, error = %e, "Failed to send error response");
    }
}

async fn handle_notification(inner: &Arc<ServerInner>, notification: JsonRpcNotification) {
    if inner.strict()
        && !inner.session.is_initialized()
        && notification.method != notifications::INITIALIZED
    {
        tracing::warn!(method = %notification.method, "Dropping notification before initialization");
        return;
    }

    let handlers = inner
        .notifications
        .read()
        .unwrap()
        .snapshot(&notification.method);
    if handlers.is_empty() {
        tracing::debug!(method = %notification.method, "No handlers for notification");
        return;
    }

    let method = notification.method;
    let params = notification.params;
    tokio::spawn(async move {
        run_notification_handlers(&method, params, handlers).await;
    });
}
