//! Method and notification registries
//!
//! Both registries store type-erased handlers. The generic `register`
//! methods capture the decode/encode pair for a concrete [`Method`] or
//! [`Notification`] type, so dispatch itself works on raw
//! `serde_json::Value` trees and stays monomorphic.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, JsonRpcError, Result};
use crate::method::{Method, Notification};

/// Erased request handler: raw params in, raw result (or wire error) out.
type ErasedMethodHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, std::result::Result<Value, JsonRpcError>> + Send + Sync>;

/// Erased notification handler: raw params in, best-effort unit out.
pub type ErasedNotificationHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Decode a raw `params` field into a concrete parameter type.
///
/// Absent params decode as `null`, falling back to `{}` for parameter
/// structs whose fields all carry defaults.
fn decode_params<P: DeserializeOwned>(params: Option<Value>) -> std::result::Result<P, serde_json::Error> {
    match params {
        Some(value) => serde_json::from_value(value),
        None => serde_json::from_value(Value::Null)
            .or_else(|_| serde_json::from_value(Value::Object(serde_json::Map::new()))),
    }
}

/// Mapping from method name to the one handler responsible for it.
///
/// Re-registering a name replaces the previous handler.
#[derive(Default)]
pub struct MethodRegistry {
    handlers: HashMap<String, ErasedMethodHandler>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for method `M`, replacing any prior handler.
    pub fn register<M, H, Fut>(&mut self, handler: H)
    where
        M: Method,
        H: Fn(M::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<M::Result>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ErasedMethodHandler = Arc::new(move |params: Option<Value>| {
            let handler = handler.clone();
            Box::pin(async move {
                let params: M::Params = decode_params(params).map_err(|e| {
                    JsonRpcError::invalid_params(format!(
                        "Invalid parameters for '{}': {}",
                        M::NAME,
                        e
                    ))
                })?;
                let result = handler(params).await.map_err(Error::into_jsonrpc)?;
                serde_json::to_value(result).map_err(|e| {
                    JsonRpcError::internal_error(format!(
                        "Failed to encode result for '{}': {}",
                        M::NAME,
                        e
                    ))
                })
            })
        });
        self.handlers.insert(M::NAME.to_string(), erased);
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Look up a method and produce the future that decodes, runs, and
    /// encodes. Returns `None` for unregistered methods; the dispatch loop
    /// turns that into a `MethodNotFound` response.
    pub fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Option<BoxFuture<'static, std::result::Result<Value, JsonRpcError>>> {
        self.handlers.get(method).map(|handler| handler(params))
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Mapping from notification name to an ordered list of handlers.
///
/// A name may have zero or more handlers; they run in registration order
/// and are best-effort (a failing handler is logged, never answered on the
/// wire, and does not short-circuit the rest).
#[derive(Default)]
pub struct NotificationRegistry {
    handlers: HashMap<String, Vec<ErasedNotificationHandler>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for notification `N`.
    pub fn subscribe<N, H, Fut>(&mut self, handler: H)
    where
        N: Notification,
        H: Fn(N::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: ErasedNotificationHandler = Arc::new(move |params: Option<Value>| {
            let handler = handler.clone();
            Box::pin(async move {
                let params: N::Params = decode_params(params).map_err(|e| {
                    Error::internal(format!(
                        "Invalid parameters for notification '{}': {}",
                        N::NAME,
                        e
                    ))
                })?;
                handler(params).await
            })
        });
        self.handlers.entry(N::NAME.to_string()).or_default().push(erased);
    }

    /// Snapshot the handlers registered for a name.
    ///
    /// Iterating a snapshot means registration during a dispatch pass does
    /// not invalidate the pass in flight.
    pub fn snapshot(&self, method: &str) -> Vec<ErasedNotificationHandler> {
        self.handlers.get(method).cloned().unwrap_or_default()
    }

    pub fn is_subscribed(&self, method: &str) -> bool {
        self.handlers.get(method).is_some_and(|h| !h.is_empty())
    }
}

impl std::fmt::Debug for NotificationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationRegistry")
            .field("names", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Run a snapshot of notification handlers in registration order.
///
/// Errors are logged and swallowed; notifications never produce a wire
/// response.
pub(crate) async fn run_notification_handlers(
    method: &str,
    params: Option<Value>,
    handlers: Vec<ErasedNotificationHandler>,
) {
    for handler in handlers {
        if let Err(e) = handler(params.clone()).await {
            tracing::warn!(method = %method, error = %e, "Notification handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{Initialized, Ping, ReadResource};
    use crate::protocol::{EmptyResult, ReadResourceResult, ResourceContents};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_dispatch_decodes_and_encodes() {
        let mut registry = MethodRegistry::new();
        registry.register::<ReadResource, _, _>(|params| async move {
            Ok(ReadResourceResult {
                contents: vec![ResourceContents {
                    uri: params.uri,
                    mime_type: Some("text/plain".into()),
                    text: Some("hello".into()),
                    blob: None,
                }],
            })
        });

        let result = registry
            .dispatch("resources/read", Some(json!({"uri": "file:///x"})))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(result["contents"][0]["uri"], "file:///x");
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method_is_none() {
        let registry = MethodRegistry::new();
        assert!(registry.dispatch("no/such", None).is_none());
    }

    #[tokio::test]
    async fn test_dispatch_bad_params_is_invalid_params() {
        let mut registry = MethodRegistry::new();
        registry.register::<ReadResource, _, _>(|_| async { panic!("handler must not run") });

        let err = registry
            .dispatch("resources/read", Some(json!({"no_uri": true})))
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(err.code, -32602);
    }

    #[tokio::test]
    async fn test_handler_error_becomes_internal_error() {
        let mut registry = MethodRegistry::new();
        registry.register::<Ping, _, _>(|_| async { Err(Error::internal("boom")) });

        let err = registry.dispatch("ping", None).unwrap().await.unwrap_err();
        assert_eq!(err.code, -32603);
        assert!(err.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_typed_handler_error_is_preserved() {
        let mut registry = MethodRegistry::new();
        registry.register::<Ping, _, _>(|_| async {
            Err(Error::JsonRpc(JsonRpcError::invalid_request("too early")))
        });

        let err = registry.dispatch("ping", None).unwrap().await.unwrap_err();
        assert_eq!(err.code, -32600);
        assert_eq!(err.message, "too early");
    }

    #[tokio::test]
    async fn test_reregistering_replaces() {
        let mut registry = MethodRegistry::new();
        registry.register::<Ping, _, _>(|_| async { Err(Error::internal("first")) });
        registry.register::<Ping, _, _>(|_| async { Ok(EmptyResult::default()) });

        let result = registry.dispatch("ping", None).unwrap().await.unwrap();
        assert_eq!(result, json!({}));
    }

    #[tokio::test]
    async fn test_absent_params_tolerated() {
        let mut registry = MethodRegistry::new();
        registry.register::<Ping, _, _>(|_| async { Ok(EmptyResult::default()) });
        assert!(registry.dispatch("ping", None).unwrap().await.is_ok());
    }

    #[tokio::test]
    async fn test_notification_handlers_run_in_order() {
        static ORDER: AtomicUsize = AtomicUsize::new(0);

        let mut registry = NotificationRegistry::new();
        registry.subscribe::<Initialized, _, _>(|_| async {
            assert_eq!(ORDER.fetch_add(1, Ordering::SeqCst), 0);
            Ok(())
        });
        registry.subscribe::<Initialized, _, _>(|_| async {
            assert_eq!(ORDER.fetch_add(1, Ordering::SeqCst), 1);
            Ok(())
        });

        let handlers = registry.snapshot("notifications/initialized");
        run_notification_handlers("notifications/initialized", None, handlers).await;
        assert_eq!(ORDER.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_notification_handler_does_not_short_circuit() {
        static RAN: AtomicUsize = AtomicUsize::new(0);

        let mut registry = NotificationRegistry::new();
        registry.subscribe::<Initialized, _, _>(|_| async { Err(Error::internal("first fails")) });
        registry.subscribe::<Initialized, _, _>(|_| async {
            RAN.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let handlers = registry.snapshot("notifications/initialized");
        run_notification_handlers("notifications/initialized", None, handlers).await;
        assert_eq!(RAN.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_snapshot_of_unknown_name_is_empty() {
        let registry = NotificationRegistry::new();
        assert!(registry.snapshot("notifications/unknown").is_empty());
        assert!(!registry.is_subscribed("notifications/unknown"));
    }
}
