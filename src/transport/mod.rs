//! Pluggable byte transports
//!
//! The runtime core is transport-agnostic: anything that can move complete
//! JSON-RPC frames as byte messages works. Framing is the transport's job;
//! the core only sees whole frames.
//!
//! - [`Transport`] - the contract consumed by both peers
//! - [`stdio`] - line-delimited stdio transport for CLI usage
//! - an in-memory pair for tests lives in [`crate::testing`]

use async_trait::async_trait;

use crate::error::TransportError;

/// An async duplex byte-message channel.
///
/// Each `Vec<u8>` handed to [`send`](Transport::send) or returned from
/// [`receive`](Transport::receive) is exactly one JSON-RPC frame.
///
/// `receive` is the awaitable-pull form of a frame stream: the dispatch
/// loop calls it once per frame, which is also where it observes
/// cancellation. A [`TransportError::Transient`] return means "nothing
/// fatal, try again shortly"; the loop backs off 10 ms and retries.
/// [`TransportError::Closed`] signals orderly end-of-stream.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the connection. Called once by `start`/`connect`.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tear the connection down. Safe to call more than once.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Send one complete frame.
    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Receive the next complete frame.
    async fn receive(&self) -> Result<Vec<u8>, TransportError>;
}

pub mod stdio;

pub use stdio::StdioTransport;
