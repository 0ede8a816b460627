//! Test utilities
//!
//! [`transport_pair`] builds two crosswired in-memory transports so a
//! server and a client (or a test driving raw frames) can talk without any
//! I/O. Frames sent on one side arrive on the other in order.
//!
//! # Example
//!
//! ```rust
//! use mcp_peer::{McpClient, McpServer};
//! use mcp_peer::testing::transport_pair;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (server_side, client_side) = transport_pair();
//!
//! let server = McpServer::new("test-server", "1.0.0");
//! server.start(server_side).await.unwrap();
//!
//! let client = McpClient::new("test-client", "1.0.0");
//! client.connect(client_side).await.unwrap();
//! client.initialize().await.unwrap();
//!
//! client.ping().await.unwrap();
//!
//! client.disconnect().await;
//! server.stop().await;
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::Transport;

/// One end of an in-memory duplex channel.
///
/// Failure injection for exercising the dispatch loops:
/// - [`refuse_connect`](Self::refuse_connect) makes `connect` fail
/// - [`inject_transient`](Self::inject_transient) makes the next `n`
///   `receive` calls return [`TransportError::Transient`]
pub struct InMemoryTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    transient_receives: AtomicUsize,
}

/// Build two crosswired transports: frames sent on the first arrive at the
/// second and vice versa.
pub fn transport_pair() -> (InMemoryTransport, InMemoryTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        InMemoryTransport::new(a_tx, b_rx),
        InMemoryTransport::new(b_tx, a_rx),
    )
}

impl InMemoryTransport {
    fn new(tx: mpsc::UnboundedSender<Vec<u8>>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            tx,
            rx: Mutex::new(rx),
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            transient_receives: AtomicUsize::new(0),
        }
    }

    /// Make `connect` fail. Set before handing the transport to a peer.
    pub fn refuse_connect(&self) {
        self.refuse_connect.store(true, Ordering::Relaxed);
    }

    /// Make the next `n` `receive` calls report a transient failure.
    pub fn inject_transient(&self, n: usize) {
        self.transient_receives.store(n, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.refuse_connect.load(Ordering::Relaxed) {
            return Err(TransportError::ConnectionFailed(
                "connection refused by test transport".to_string(),
            ));
        }
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn receive(&self) -> Result<Vec<u8>, TransportError> {
        // Drain injected transient failures before touching the channel.
        let injected = self.transient_receives.load(Ordering::Relaxed);
        if injected > 0
            && self
                .transient_receives
                .compare_exchange(injected, injected - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            return Err(TransportError::Transient);
        }
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }
}
