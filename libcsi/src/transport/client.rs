//! Socket client used by orchestrator-side agents (and tests) to issue CSI
//! requests.

use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::{debug, instrument};

use super::MAX_MESSAGE_SIZE;
use crate::error::CsiError;
use crate::message::CsiMessage;

/// A lightweight CSI client that sends [`CsiMessage`] requests to the plugin
/// socket and returns the plugin's response.
#[derive(Debug, Clone)]
pub struct CsiClient {
    path: PathBuf,
}

impl CsiClient {
    /// Client for the plugin listening at `path`.  No connection is made
    /// until the first request.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Send a request and wait for the corresponding response.
    ///
    /// Each call opens a new connection, writes the JSON-serialized request,
    /// shuts down the write half, then reads the full response and
    /// deserializes it.
    #[instrument(skip(self), fields(msg = %msg))]
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        let mut stream = UnixStream::connect(&self.path)
            .await
            .map_err(|e| CsiError::Transport(format!("connect {}: {e}", self.path.display())))?;

        let payload = serde_json::to_vec(msg).map_err(CsiError::transport)?;
        stream.write_all(&payload).await.map_err(CsiError::transport)?;
        stream.shutdown().await.map_err(CsiError::transport)?;

        let mut buf = Vec::new();
        (&mut stream)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_to_end(&mut buf)
            .await
            .map_err(CsiError::transport)?;
        if buf.len() > MAX_MESSAGE_SIZE {
            return Err(CsiError::Transport("response exceeds size limit".into()));
        }

        let response: CsiMessage = serde_json::from_slice(&buf).map_err(CsiError::transport)?;
        debug!(%response, "CSI response received");
        Ok(response)
    }

    /// Like [`Self::request`], but turns a [`CsiMessage::Error`] reply into
    /// `Err`.
    pub async fn call(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        match self.request(msg).await? {
            CsiMessage::Error(e) => Err(e),
            other => Ok(other),
        }
    }
}
