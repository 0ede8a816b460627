//! Stdio transport
//!
//! Reads frames from stdin and writes frames to stdout, one line-delimited
//! JSON document per frame. This is the conventional transport for MCP
//! peers spawned as subprocesses.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;

use crate::error::TransportError;
use crate::transport::Transport;

/// Line-delimited JSON transport over this process's stdin/stdout.
pub struct StdioTransport {
    stdin: Mutex<BufReader<Stdin>>,
    stdout: Mutex<Stdout>,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            stdin: Mutex::new(BufReader::new(tokio::io::stdin())),
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        // Stdio is always "connected"; nothing to establish.
        tracing::debug!("Stdio transport ready");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut stdout = self.stdout.lock().await;
        stdout
            .flush()
            .await
            .map_err(|e| TransportError::Io(format!("Failed to flush stdout: {}", e)))
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let mut stdout = self.stdout.lock().await;
        stdout
            .write_all(&frame)
            .await
            .map_err(|e| TransportError::Io(format!("Failed to write to stdout: {}", e)))?;
        stdout
            .write_all(b"\n")
            .await
            .map_err(|e| TransportError::Io(format!("Failed to write newline: {}", e)))?;
        stdout
            .flush()
            .await
            .map_err(|e| TransportError::Io(format!("Failed to flush stdout: {}", e)))
    }

    async fn receive(&self) -> Result<Vec<u8>, TransportError> {
        let mut stdin = self.stdin.lock().await;
        loop {
            let mut line = String::new();
            let bytes_read = stdin
                .read_line(&mut line)
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::WouldBlock => TransportError::Transient,
                    _ => TransportError::Io(format!("Failed to read from stdin: {}", e)),
                })?;

            if bytes_read == 0 {
                tracing::debug!("Stdin closed");
                return Err(TransportError::Closed);
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(trimmed.as_bytes().to_vec());
        }
    }
}
