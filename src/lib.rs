//! # mcp-peer
//!
//! Bidirectional Model Context Protocol (MCP) runtime: a [`McpServer`] and
//! a [`McpClient`] that exchange JSON-RPC 2.0 frames over a pluggable byte
//! transport, with a formal initialize lifecycle, typed request/response
//! correlation, notification fan-out, and capability negotiation.
//!
//! ## Design
//!
//! - **Typed at the edges, untyped on the wire.** Handlers and callers work
//!   with concrete parameter/result types declared by [`Method`]
//!   descriptors; re-typing happens exactly once, at the registration/call
//!   boundary.
//! - **One dispatch loop per peer.** Each facade owns a task that drains
//!   the transport, classifies frames, and routes them to registries or
//!   the pending-request table. Handlers run off the loop, so many logical
//!   requests multiplex over one transport.
//! - **Strict by default.** Both peers enforce initialize-before-use and
//!   (on the client) capability gating; disable with `.strict(false)` for
//!   lenient interop.
//!
//! ## Example
//!
//! ```rust
//! use mcp_peer::{McpClient, McpServer, Result};
//! use mcp_peer::method::ListTools;
//! use mcp_peer::protocol::{ListToolsResult, ServerCapabilities, ToolsCapability};
//! use mcp_peer::testing::transport_pair;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let (server_side, client_side) = transport_pair();
//!
//! let server = McpServer::new("example-server", "1.0.0").capabilities(ServerCapabilities {
//!     tools: Some(ToolsCapability::default()),
//!     ..Default::default()
//! });
//! server.register_method::<ListTools, _, _>(|_params| async move {
//!     Ok(ListToolsResult { tools: vec![], next_cursor: None })
//! });
//! server.start(server_side).await?;
//!
//! let client = McpClient::new("example-client", "1.0.0");
//! client.connect(client_side).await?;
//! client.initialize().await?;
//!
//! let tools = client.list_tools(None).await?;
//! assert!(tools.tools.is_empty());
//!
//! client.disconnect().await;
//! server.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod method;
mod pending;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod testing;
pub mod transport;

// Re-exports
pub use client::McpClient;
pub use error::{Error, ErrorCode, JsonRpcError, Result, TransportError};
pub use method::{Method, Notification};
pub use protocol::{
    ClientCapabilities, Implementation, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    PROTOCOL_VERSION, RequestId, ServerCapabilities,
};
pub use server::{InitializeHook, McpServer};
pub use transport::Transport;
