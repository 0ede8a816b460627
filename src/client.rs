//! MCP client facade
//!
//! [`McpClient`] multiplexes many in-flight typed requests over one
//! transport. `send` is the primitive: it parks a typed waiter in the
//! pending table, hands the frame to the transport, and suspends until the
//! dispatch loop correlates the response by id. The high-level helpers
//! (`list_tools`, `read_resource`, ...) compose on top of it, each guarding
//! its server capability when strict mode is on.
//!
//! # Example
//!
//! ```rust,no_run
//! use mcp_peer::{McpClient, Result};
//! use mcp_peer::transport::StdioTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = McpClient::new("my-client", "1.0.0");
//!     client.connect(StdioTransport::new()).await?;
//!     client.initialize().await?;
//!
//!     let tools = client.list_tools(None).await?;
//!     for tool in &tools.tools {
//!         println!("{}", tool.name);
//!     }
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::{self, Frame};
use crate::error::{Error, JsonRpcError, Result, TransportError};
use crate::method::{
    CallTool, GetPrompt, Initialize, ListPrompts, ListResources, ListTools, Method, Notification,
    Ping, ReadResource, SubscribeResource,
};
use crate::pending::{PendingRequests, Resumer};
use crate::protocol::{
    CallToolParams, CallToolResult, ClientCapabilities, EmptyParams, GetPromptParams,
    GetPromptResult, Implementation, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, ListPromptsParams, ListPromptsResult, ListResourcesParams,
    ListResourcesResult, ListToolsParams, ListToolsResult, PROTOCOL_VERSION, ReadResourceParams,
    ReadResourceResult, ServerCapabilities, SubscribeResourceParams,
};
use crate::registry::{NotificationRegistry, run_notification_handlers};
use crate::session::SessionState;
use crate::transport::Transport;

/// Backoff after a transient transport failure.
const TRANSIENT_BACKOFF: Duration = Duration::from_millis(10);

/// The synthetic error every waiter sees when the session ends under it.
const DISCONNECTED: &str = "Client disconnected";

/// What the server reported during the initialize handshake.
#[derive(Debug, Clone)]
struct ServerHandshake {
    info: Implementation,
    capabilities: ServerCapabilities,
    protocol_version: String,
    instructions: Option<String>,
}

struct ClientInner {
    info: Implementation,
    capabilities: RwLock<ClientCapabilities>,
    strict: AtomicBool,
    pending: PendingRequests,
    notifications: RwLock<NotificationRegistry>,
    session: SessionState,
    server: RwLock<Option<ServerHandshake>>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    /// Serializes outbound frames so the transport observes send/notify
    /// call order.
    outbound: tokio::sync::Mutex<()>,
    dispatch: StdMutex<Option<JoinHandle<()>>>,
    shutdown_tx: StdMutex<Option<watch::Sender<bool>>>,
}

impl ClientInner {
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
}

/// The client peer of an MCP session.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct McpClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.inner.info.name)
            .field("version", &self.inner.info.version)
            .field("strict", &self.inner.strict.load(Ordering::Relaxed))
            .field("phase", &self.inner.session.phase())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

impl McpClient {
    /// Create a client with the given implementation info. Strict mode is
    /// on by default.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                info: Implementation::new(name, version),
                capabilities: RwLock::new(ClientCapabilities::default()),
                strict: AtomicBool::new(true),
                pending: PendingRequests::new(),
                notifications: RwLock::new(NotificationRegistry::new()),
                session: SessionState::new(),
                server: RwLock::new(None),
                transport: RwLock::new(None),
                outbound: tokio::sync::Mutex::new(()),
                dispatch: StdMutex::new(None),
                shutdown_tx: StdMutex::new(None),
            }),
        }
    }

    /// Set the capabilities declared during the handshake.
    pub fn capabilities(self, capabilities: ClientCapabilities) -> Self {
        *self.inner.capabilities.write().unwrap() = capabilities;
        self
    }

    /// Enable or disable strict mode (capability gating on the high-level
    /// helpers).
    pub fn strict(self, strict: bool) -> Self {
        self.inner.strict.store(strict, Ordering::Relaxed);
        self
    }

    /// Bind the transport and spawn the dispatch loop. Does not send
    /// `initialize`.
    pub async fn connect(&self, transport: impl Transport) -> Result<()> {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        if self.inner.transport.read().unwrap().is_some() {
            return Err(Error::internal("Client is already connected"));
        }
        transport.connect().await?;
        *self.inner.transport.write().unwrap() = Some(transport.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.inner.shutdown_tx.lock().unwrap() = Some(shutdown_tx);

        let inner = self.inner.clone();
        let handle = tokio::spawn(dispatch_loop(inner, transport, shutdown_rx));
        *self.inner.dispatch.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Issue the initialize handshake and store the server's answer.
    ///
    /// Required before the capability-gated helpers in strict mode.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        // Claim the handshake; a second initialize racing the first loses
        // the CAS instead of double-initializing.
        if !self.inner.session.mark_initializing() {
            return Err(Error::internal("Client is already initialized"));
        }

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: self.inner.capabilities.read().unwrap().clone(),
            client_info: self.inner.info.clone(),
        };
        let result = match self.send::<Initialize>(params).await {
            Ok(result) => result,
            Err(e) => {
                // A failed handshake releases the claim so the caller can
                // retry.
                self.inner.session.abort_initializing();
                return Err(e);
            }
        };

        if result.protocol_version != PROTOCOL_VERSION {
            self.inner.session.abort_initializing();
            return Err(Error::internal(format!(
                "Server offered unsupported protocol version '{}'",
                result.protocol_version
            )));
        }

        *self.inner.server.write().unwrap() = Some(ServerHandshake {
            info: result.server_info.clone(),
            capabilities: result.capabilities.clone(),
            protocol_version: result.protocol_version.clone(),
            instructions: result.instructions.clone(),
        });
        self.inner.session.mark_initialized();
        tracing::info!(server = %result.server_info.name, "Session initialized");
        Ok(result)
    }

    /// The typed request primitive: allocate an id, park a waiter, hand
    /// the frame to the transport, and suspend until the response (or the
    /// disconnect drain) completes the waiter.
    pub async fn send<M: Method>(&self, params: M::Params) -> Result<M::Result> {
        let id = self.inner.pending.next_id();
        let request =
            JsonRpcRequest::new(id.clone(), M::NAME).with_params(serde_json::to_value(params)?);

        let (tx, rx) = oneshot::channel();
        let resumer: Resumer = Box::new(move |outcome| {
            let typed = match outcome {
                Ok(value) => {
                    serde_json::from_value::<M::Result>(value).map_err(|e| Error::TypeMismatch {
                        method: M::NAME.to_string(),
                        message: e.to_string(),
                    })
                }
                Err(error) => Err(Error::JsonRpc(error)),
            };
            let _ = tx.send(typed);
        });
        self.inner.pending.park(id.clone(), resumer);

        if let Err(e) = self.inner.send_frame(&request).await {
            self.inner.pending.discard(&id);
            return Err(e);
        }

        rx.await
            .map_err(|_| Error::internal("Response channel closed"))?
    }

    /// Send a notification to the server.
    pub async fn notify<N: Notification>(&self, params: N::Params) -> Result<()> {
        let notification =
            JsonRpcNotification::new(N::NAME).with_params(serde_json::to_value(params)?);
        self.inner.send_frame(&notification).await
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

    /// Cancel every pending request, stop the dispatch loop, and release
    /// the transport. Safe to call repeatedly; not an error path for the
    /// caller.
    pub async fn disconnect(&self) {
        let shutdown_tx = self.inner.shutdown_tx.lock().unwrap().take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(true);
        }
        let handle = self.inner.dispatch.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        // The loop drains on exit; this covers a client whose loop never
        // started (connect failed part-way) as well.
        self.inner
            .pending
            .drain(JsonRpcError::internal_error(DISCONNECTED));
        let transport = self.inner.transport.write().unwrap().take();
        if let Some(transport) = transport {
            if let Err(e) = transport.disconnect().await {
                tracing::warn!(error = %e, "Transport disconnect failed during disconnect");
            }
        }
        self.inner.session.mark_terminated();
    }

    // -- High-level helpers --------------------------------------------

    /// Keepalive round-trip. Valid in every lifecycle phase.
    pub async fn ping(&self) -> Result<()> {
        self.send::<Ping>(EmptyParams::default()).await.map(|_| ())
    }

    pub async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult> {
        self.gate(ListPrompts::NAME, |caps| caps.prompts.is_some())?;
        self.send::<ListPrompts>(ListPromptsParams { cursor }).await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<HashMap<String, String>>,
    ) -> Result<GetPromptResult> {
        self.gate(GetPrompt::NAME, |caps| caps.prompts.is_some())?;
        self.send::<GetPrompt>(GetPromptParams {
            name: name.to_string(),
            arguments: arguments.unwrap_or_default(),
        })
        .await
    }

    pub async fn list_resources(&self, cursor: Option<String>) -> Result<ListResourcesResult> {
        self.gate(ListResources::NAME, |caps| caps.resources.is_some())?;
        self.send::<ListResources>(ListResourcesParams { cursor }).await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.gate(ReadResource::NAME, |caps| caps.resources.is_some())?;
        self.send::<ReadResource>(ReadResourceParams { uri: uri.to_string() })
            .await
    }

    pub async fn subscribe_to_resource(&self, uri: &str) -> Result<()> {
        self.gate(SubscribeResource::NAME, |caps| caps.supports_resource_subscribe())?;
        self.send::<SubscribeResource>(SubscribeResourceParams { uri: uri.to_string() })
            .await
            .map(|_| ())
    }

    pub async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult> {
        self.gate(ListTools::NAME, |caps| caps.tools.is_some())?;
        self.send::<ListTools>(ListToolsParams { cursor }).await
    }

    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        self.gate(CallTool::NAME, |caps| caps.tools.is_some())?;
        self.send::<CallTool>(CallToolParams {
            name: name.to_string(),
            arguments: arguments.unwrap_or(Value::Null),
        })
        .await
    }

    // -- Accessors -----------------------------------------------------

    pub fn is_initialized(&self) -> bool {
        self.inner.session.is_initialized()
    }

    /// The server's reported info, once initialized.
    pub fn server_info(&self) -> Option<Implementation> {
        self.inner.server.read().unwrap().as_ref().map(|h| h.info.clone())
    }

    /// The server's reported capabilities, once initialized.
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.inner
            .server
            .read()
            .unwrap()
            .as_ref()
            .map(|h| h.capabilities.clone())
    }

    /// The protocol version the server confirmed, once initialized.
    pub fn negotiated_protocol_version(&self) -> Option<String> {
        self.inner
            .server
            .read()
            .unwrap()
            .as_ref()
            .map(|h| h.protocol_version.clone())
    }

    /// The server's instructions string, if it supplied one.
    pub fn instructions(&self) -> Option<String> {
        self.inner
            .server
            .read()
            .unwrap()
            .as_ref()
            .and_then(|h| h.instructions.clone())
    }

    /// Number of requests currently awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// Strict-mode capability gate. Fails fast with `MethodNotFound` when
    /// the capabilities are unset (not yet initialized) or the required
    /// capability is absent. Non-strict clients skip the check and let the
    /// server answer.
    fn gate<F>(&self, method: &str, check: F) -> Result<()>
    where
        F: Fn(&ServerCapabilities) -> bool,
    {
        if !self.inner.strict.load(Ordering::Relaxed) {
            return Ok(());
        }
        let guard = self.inner.server.read().unwrap();
        let allowed = guard.as_ref().is_some_and(|h| check(&h.capabilities));
        drop(guard);
        if allowed {
            Ok(())
        } else {
            tracing::debug!(method = %method, "Capability gate failed");
            Err(Error::JsonRpc(JsonRpcError::method_not_found(method)))
        }
    }
}

async fn dispatch_loop(
    inner: Arc<ClientInner>,
    transport: Arc<dyn Transport>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("Client dispatch loop started");
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
    // Nothing can complete a waiter once the loop is gone.
    inner.pending.drain(JsonRpcError::internal_error(DISCONNECTED));
    tracing::debug!("Client dispatch loop stopped");
}

async fn handle_frame(inner: &Arc<ClientInner>, bytes: Vec<u8>) {
    match codec::classify(&bytes) {
        Ok(Frame::Response(response)) => {
            let (id, outcome) = response.into_outcome();
            let Some(id) = id else {
                tracing::warn!("Dropping error response without id");
                return;
            };
            if !inner.pending.complete(&id, outcome) {
                tracing::warn!(id = %id, "Response for unknown request id");
            }
        }
        Ok(Frame::Notification(notification)) => {
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
        Ok(Frame::Request(request)) => {
            // Server-to-client requests are outside this runtime's core.
            tracing::warn!(
                method = %request.method,
                id = %request.id,
                "Dropping inbound request; the client registers no methods"
            );
        }
        Err(frame_error) => {
            // Diagnostic responses to unparseable frames are a server
            // behavior; the client only logs.
            tracing::warn!(error = %frame_error.error, "Unparseable frame");
        }
    }
}
