//! End-to-end tests: a real server and a real client over crossed
//! in-memory transports.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Value, json};

use mcp_peer::method::{CallTool, ListTools, ResourceUpdated, SubscribeResource, Initialized};
use mcp_peer::protocol::{
    CallToolResult, ListToolsResult, ResourcesCapability, ServerCapabilities, ToolDefinition,
    ToolsCapability, EmptyResult,
};
use mcp_peer::testing::transport_pair;
use mcp_peer::{Error, McpClient, McpServer, Transport};

async fn wait_for(flag: &AtomicBool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn tools_server() -> McpServer {
    let server = McpServer::new("s", "0").capabilities(ServerCapabilities {
        tools: Some(ToolsCapability::default()),
        ..Default::default()
    });
    server.register_method::<ListTools, _, _>(|_params| async move {
        Ok(ListToolsResult {
            tools: vec![ToolDefinition {
                name: "echo".to_string(),
                description: Some("Echo the arguments back".to_string()),
                input_schema: json!({"type": "object"}),
            }],
            next_cursor: None,
        })
    });
    server.register_method::<CallTool, _, _>(|params| async move {
        Ok(CallToolResult {
            content: vec![json!({"type": "text", "text": params.arguments.to_string()})],
            is_error: false,
        })
    });
    server
}

#[tokio::test]
async fn handshake_initializes_both_peers() {
    let (server_side, client_side) = transport_pair();
    let server = McpServer::new("s", "0").instructions("read the manual");
    server.start(server_side).await.unwrap();

    let client = McpClient::new("c", "0");
    let saw_initialized = Arc::new(AtomicBool::new(false));
    let flag = saw_initialized.clone();
    client.on_notification::<Initialized, _, _>(move |_| {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });
    client.connect(client_side).await.unwrap();

    let result = client.initialize().await.unwrap();
    assert_eq!(result.server_info.name, "s");
    assert!(client.is_initialized());
    assert!(server.is_initialized());
    assert_eq!(server.client_info().unwrap().name, "c");
    assert_eq!(client.instructions().as_deref(), Some("read the manual"));

    // The server follows its response with notifications/initialized.
    wait_for(&saw_initialized).await;

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn premature_request_is_rejected_and_server_stays_fresh() {
    let (server_side, client_side) = transport_pair();
    let server = tools_server();
    server.start(server_side).await.unwrap();

    // Non-strict client, so the request actually reaches the wire.
    let client = McpClient::new("c", "0").strict(false);
    client.connect(client_side).await.unwrap();

    let err = client.list_tools(None).await.unwrap_err();
    match err {
        Error::JsonRpc(e) => {
            assert_eq!(e.code, -32600);
            assert_eq!(e.message, "Server is not initialized");
        }
        other => panic!("expected InvalidRequest, got {:?}", other),
    }
    assert!(!server.is_initialized());

    // The same session can still complete the handshake afterwards.
    client.initialize().await.unwrap();
    assert!(server.is_initialized());

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn unknown_method_yields_method_not_found() {
    let (server_side, client_side) = transport_pair();
    let server = McpServer::new("s", "0");
    server.start(server_side).await.unwrap();

    let client = McpClient::new("c", "0").strict(false);
    client.connect(client_side).await.unwrap();
    client.initialize().await.unwrap();

    let err = client.call_tool("anything", None).await.unwrap_err();
    match err {
        Error::JsonRpc(e) => {
            assert_eq!(e.code, -32601);
            assert_eq!(e.message, "Unknown method: tools/call");
        }
        other => panic!("expected MethodNotFound, got {:?}", other),
    }

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn typed_round_trip_through_registered_handlers() {
    let (server_side, client_side) = transport_pair();
    let server = tools_server();
    server.start(server_side).await.unwrap();

    let client = McpClient::new("c", "0");
    client.connect(client_side).await.unwrap();
    client.initialize().await.unwrap();

    let tools = client.list_tools(None).await.unwrap();
    assert_eq!(tools.tools.len(), 1);
    assert_eq!(tools.tools[0].name, "echo");

    let result = client
        .call_tool("echo", Some(json!({"value": 7})))
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(result.content[0]["text"], r#"{"value":7}"#);

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn strict_client_gates_on_missing_capability_without_wire_traffic() {
    let (server_side, client_side) = transport_pair();
    // The handler exists, but the capability is not advertised.
    let server = McpServer::new("s", "0");
    server.register_method::<ListTools, _, _>(|_params| async move {
        Ok(ListToolsResult { tools: vec![], next_cursor: None })
    });
    server.start(server_side).await.unwrap();

    let client = McpClient::new("c", "0");
    client.connect(client_side).await.unwrap();
    client.initialize().await.unwrap();

    let err = client.list_tools(None).await.unwrap_err();
    assert!(matches!(err, Error::JsonRpc(ref e) if e.code == -32601));
    assert_eq!(client.pending_requests(), 0);

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn non_strict_client_gets_server_answer_verbatim() {
    let (server_side, client_side) = transport_pair();
    // No tools capability advertised, but the handler is registered: the
    // non-strict client sends anyway and takes whatever comes back.
    let server = McpServer::new("s", "0");
    server.register_method::<ListTools, _, _>(|_params| async move {
        Ok(ListToolsResult { tools: vec![], next_cursor: None })
    });
    server.start(server_side).await.unwrap();

    let client = McpClient::new("c", "0").strict(false);
    client.connect(client_side).await.unwrap();
    client.initialize().await.unwrap();
    assert!(client.server_capabilities().unwrap().tools.is_none());

    let tools = client.list_tools(None).await.unwrap();
    assert!(tools.tools.is_empty());

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn resource_subscription_flows_end_to_end() {
    let (server_side, client_side) = transport_pair();
    let server = McpServer::new("s", "0").capabilities(ServerCapabilities {
        resources: Some(ResourcesCapability {
            subscribe: Some(true),
            list_changed: None,
        }),
        ..Default::default()
    });
    // The subscription handler records the URI in the server's store.
    let recorder = server.clone();
    server.register_method::<SubscribeResource, _, _>(move |params| {
        let recorder = recorder.clone();
        async move {
            recorder.add_subscription(params.uri, 0i64.into());
            Ok(EmptyResult::default())
        }
    });
    server.start(server_side).await.unwrap();

    let client = McpClient::new("c", "0");
    let updated = Arc::new(AtomicBool::new(false));
    let flag = updated.clone();
    client.on_notification::<ResourceUpdated, _, _>(move |params| {
        let flag = flag.clone();
        async move {
            assert_eq!(params.uri, "file:///watched");
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });
    client.connect(client_side).await.unwrap();
    client.initialize().await.unwrap();

    client.subscribe_to_resource("file:///watched").await.unwrap();
    assert_eq!(server.subscribers("file:///watched").len(), 1);

    server
        .notify::<ResourceUpdated>(mcp_peer::protocol::ResourceUpdatedParams {
            uri: "file:///watched".to_string(),
        })
        .await
        .unwrap();
    wait_for(&updated).await;

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn outbound_frames_keep_call_order() {
    let (server_side, client_side) = transport_pair();
    let client = McpClient::new("c", "0");
    client.connect(client_side).await.unwrap();

    for _ in 0..10 {
        client
            .notify::<mcp_peer::method::RootsListChanged>(Default::default())
            .await
            .unwrap();
    }

    // The peer observes exactly the enqueue order.
    for _ in 0..10 {
        let frame: Value =
            serde_json::from_slice(&server_side.receive().await.unwrap()).unwrap();
        assert_eq!(frame["method"], "notifications/roots/list_changed");
    }

    client.disconnect().await;
}

#[tokio::test]
async fn every_request_resolves_exactly_once() {
    // Each request sees exactly one outcome: a response, a local failure,
    // or the disconnect drain.
    let (server_side, client_side) = transport_pair();
    let client = McpClient::new("c", "0");
    client.connect(client_side).await.unwrap();

    // Normal resolution: a raw peer answers the first ping.
    let c = client.clone();
    let answered = tokio::spawn(async move { c.ping().await });
    let request: Value = serde_json::from_slice(&server_side.receive().await.unwrap()).unwrap();
    server_side
        .send(
            serde_json::to_vec(&json!({"jsonrpc": "2.0", "id": request["id"], "result": {}}))
                .unwrap(),
        )
        .await
        .unwrap();
    answered.await.unwrap().unwrap();
    assert_eq!(client.pending_requests(), 0);

    // Resolution by disconnect: nobody answers the second ping.
    let c = client.clone();
    let drained = tokio::spawn(async move { c.ping().await });
    while client.pending_requests() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    client.disconnect().await;

    let err = drained.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::JsonRpc(ref e) if e.message == "Client disconnected"));
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn initialize_hook_runs_before_session_opens() {
    let (server_side, client_side) = transport_pair();
    let server = McpServer::new("s", "0");
    let hook_saw_client = Arc::new(AtomicBool::new(false));
    let flag = hook_saw_client.clone();
    server
        .start_with_hook(server_side, move |info, _caps| {
            let flag = flag.clone();
            async move {
                assert_eq!(info.name, "hooked-client");
                flag.store(true, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();

    let client = McpClient::new("hooked-client", "0");
    client.connect(client_side).await.unwrap();
    client.initialize().await.unwrap();

    assert!(hook_saw_client.load(Ordering::SeqCst));
    assert!(server.is_initialized());

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn transient_transport_hiccups_do_not_kill_the_session() {
    let (server_side, client_side) = transport_pair();
    server_side.inject_transient(2);
    client_side.inject_transient(2);

    let server = McpServer::new("s", "0");
    server.start(server_side).await.unwrap();

    let client = McpClient::new("c", "0");
    client.connect(client_side).await.unwrap();
    client.initialize().await.unwrap();
    client.ping().await.unwrap();

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn client_survives_raw_garbage_frames() {
    let (server_side, client_side) = transport_pair();
    let client = McpClient::new("c", "0");
    client.connect(client_side).await.unwrap();

    // Unparseable frames and responses for unknown ids are logged and
    // dropped without affecting later traffic.
    server_side.send(b"garbage".to_vec()).await.unwrap();
    server_side
        .send(serde_json::to_vec(&json!({"jsonrpc": "2.0", "id": 42, "result": {}})).unwrap())
        .await
        .unwrap();

    let c = client.clone();
    let waiter = tokio::spawn(async move { c.ping().await });
    let request: Value = serde_json::from_slice(&server_side.receive().await.unwrap()).unwrap();
    server_side
        .send(
            serde_json::to_vec(&json!({
                "jsonrpc": "2.0", "id": request["id"], "result": {}
            }))
            .unwrap(),
        )
        .await
        .unwrap();

    waiter.await.unwrap().unwrap();
    client.disconnect().await;
}
