//! Compile-time method and notification descriptors
//!
//! A [`Method`] ties a wire method name to its parameter and result types.
//! Registries and the client's `send` are generic over these descriptors, so
//! the untyped wire data is re-typed exactly once per method, at the
//! registration/call boundary.
//!
//! The well-known MCP methods are declared here; embedding code defines its
//! own marker types for anything beyond them.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::protocol::*;

/// A request/response method descriptor.
pub trait Method: Send + Sync + 'static {
    /// Wire method name.
    const NAME: &'static str;
    /// Parameter type decoded from the request's `params`.
    type Params: Serialize + DeserializeOwned + Send + 'static;
    /// Result type encoded into the response's `result`.
    type Result: Serialize + DeserializeOwned + Send + 'static;
}

/// A fire-and-forget notification descriptor.
pub trait Notification: Send + Sync + 'static {
    /// Wire method name.
    const NAME: &'static str;
    /// Parameter type decoded from the notification's `params`.
    type Params: Serialize + DeserializeOwned + Send + 'static;
}

macro_rules! methods {
    ($($(#[$doc:meta])* $ty:ident => $name:literal, $params:ty, $result:ty;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy)]
            pub struct $ty;

            impl Method for $ty {
                const NAME: &'static str = $name;
                type Params = $params;
                type Result = $result;
            }
        )*
    };
}

macro_rules! peer_notifications {
    ($($(#[$doc:meta])* $ty:ident => $name:expr, $params:ty;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy)]
            pub struct $ty;

            impl Notification for $ty {
                const NAME: &'static str = $name;
                type Params = $params;
            }
        )*
    };
}

methods! {
    /// The lifecycle handshake. Handled by the server core itself.
    Initialize => "initialize", InitializeParams, InitializeResult;
    /// Keepalive. Valid in every lifecycle phase.
    Ping => "ping", EmptyParams, EmptyResult;
    ListPrompts => "prompts/list", ListPromptsParams, ListPromptsResult;
    GetPrompt => "prompts/get", GetPromptParams, GetPromptResult;
    ListResources => "resources/list", ListResourcesParams, ListResourcesResult;
    ReadResource => "resources/read", ReadResourceParams, ReadResourceResult;
    SubscribeResource => "resources/subscribe", SubscribeResourceParams, EmptyResult;
    ListTools => "tools/list", ListToolsParams, ListToolsResult;
    CallTool => "tools/call", CallToolParams, CallToolResult;
}

peer_notifications! {
    /// Emitted by the server once the initialize handshake completes.
    Initialized => notifications::INITIALIZED, EmptyParams;
    ResourceUpdated => notifications::RESOURCE_UPDATED, ResourceUpdatedParams;
    ToolsListChanged => notifications::TOOLS_LIST_CHANGED, EmptyParams;
    ResourcesListChanged => notifications::RESOURCES_LIST_CHANGED, EmptyParams;
    PromptsListChanged => notifications::PROMPTS_LIST_CHANGED, EmptyParams;
    RootsListChanged => notifications::ROOTS_LIST_CHANGED, EmptyParams;
}
