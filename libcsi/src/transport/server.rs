//! Socket server that runs next to the orchestrator's node agent and
//! dispatches incoming CSI requests to the appropriate trait implementations.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use super::MAX_MESSAGE_SIZE;
use crate::context::CallContext;
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;

/// A CSI server that accepts socket connections and dispatches
/// [`CsiMessage`] requests to an [`CsiIdentity`] + [`CsiController`] +
/// [`CsiNode`] implementation.
pub struct CsiServer<T> {
    listener: UnixListener,
    path: PathBuf,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Bind a new server at `path`.
    ///
    /// A socket left behind by a previous, crashed instance is removed first
    /// so the bind does not fail.
    pub async fn bind(path: impl Into<PathBuf>, handler: Arc<T>) -> Result<Self, CsiError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CsiError::io("create dir", parent.display(), e))?;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CsiError::io("remove socket", path.display(), e)),
        }

        let listener = UnixListener::bind(&path)
            .map_err(|e| CsiError::Transport(format!("bind {}: {e}", path.display())))?;
        info!(path = %path.display(), "CSI server listening");
        Ok(Self {
            listener,
            path,
            handler,
        })
    }

    /// Path of the listening socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Each accepted connection is handled on its own Tokio task.  On
    /// shutdown every request still waiting for a volume lock is cancelled
    /// and the socket file is removed.  Requests already past their lock run
    /// to completion before this returns.
    pub async fn serve_until<F>(self, shutdown: F) -> Result<(), CsiError>
    where
        F: Future<Output = ()>,
    {
        let (_, cancel) = CallContext::with_cancel();
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let handler = Arc::clone(&self.handler);
                        let ctx = cancel.context();
                        connections.spawn(async move {
                            if let Err(e) = Self::handle_connection(stream, &handler, &ctx).await {
                                warn!(error = %e, "CSI connection error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "CSI accept failed"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_join(joined);
                }
            }
        }

        cancel.cancel();
        drop(self.listener);
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove socket"),
        }

        if !connections.is_empty() {
            debug!(in_flight = connections.len(), "waiting for in-flight requests");
        }
        while let Some(joined) = connections.join_next().await {
            log_join(joined);
        }
        info!("CSI server stopped");
        Ok(())
    }

    /// Process a single connection: read request → dispatch → write response.
    #[instrument(skip_all)]
    async fn handle_connection(
        mut stream: UnixStream,
        handler: &T,
        ctx: &CallContext,
    ) -> Result<(), CsiError> {
        let mut buf = Vec::new();
        (&mut stream)
            .take(MAX_MESSAGE_SIZE as u64 + 1)
            .read_to_end(&mut buf)
            .await
            .map_err(CsiError::transport)?;

        let response = if buf.len() > MAX_MESSAGE_SIZE {
            CsiMessage::Error(CsiError::InvalidArgument("request exceeds size limit".into()))
        } else {
            match serde_json::from_slice::<CsiMessage>(&buf) {
                Ok(request) => {
                    debug!(%request, "CSI request received");
                    Self::dispatch(handler, ctx, request).await
                }
                Err(e) => CsiMessage::Error(CsiError::InvalidArgument(format!(
                    "malformed request: {e}"
                ))),
            }
        };

        if let CsiMessage::Error(e) = &response {
            debug!(code = %e.code(), error = %e, "CSI request failed");
        }

        let payload = serde_json::to_vec(&response).map_err(CsiError::transport)?;
        stream.write_all(&payload).await.map_err(CsiError::transport)?;
        stream.shutdown().await.map_err(CsiError::transport)?;
        Ok(())
    }

    /// Map a [`CsiMessage`] request to the correct trait method call and
    /// wrap the result in a response [`CsiMessage`].
    pub async fn dispatch(handler: &T, ctx: &CallContext, request: CsiMessage) -> CsiMessage {
        match request {
            // --- Identity ---------------------------------------------------
            CsiMessage::GetPluginInfo => {
                reply(handler.get_plugin_info().await, CsiMessage::PluginInfoResponse)
            }
            CsiMessage::GetPluginCapabilities => reply(
                handler.get_plugin_capabilities().await,
                CsiMessage::PluginCapabilitiesResponse,
            ),
            CsiMessage::Probe => reply(handler.probe().await, CsiMessage::ProbeResult),

            // --- Controller -------------------------------------------------
            CsiMessage::CreateVolume(req) => {
                reply(handler.create_volume(ctx, req).await, CsiMessage::VolumeCreated)
            }
            CsiMessage::DeleteVolume(id) => ack(handler.delete_volume(ctx, &id).await),
            CsiMessage::ControllerPublishVolume(req) => {
                ack(handler.controller_publish_volume(req).await)
            }
            CsiMessage::ControllerUnpublishVolume { volume_id, node_id } => ack(handler
                .controller_unpublish_volume(&volume_id, &node_id)
                .await),
            CsiMessage::ValidateVolumeCapabilities {
                volume_id,
                capabilities,
            } => reply(
                handler
                    .validate_volume_capabilities(&volume_id, &capabilities)
                    .await,
                CsiMessage::CapabilitiesValid,
            ),
            CsiMessage::ControllerGetCapabilities => reply(
                handler.controller_get_capabilities().await,
                CsiMessage::ControllerCapabilitiesResponse,
            ),

            // --- Node -------------------------------------------------------
            CsiMessage::NodeStageVolume(req) => ack(handler.stage_volume(req).await),
            CsiMessage::NodeUnstageVolume {
                volume_id,
                staging_target_path,
            } => ack(handler
                .unstage_volume(&volume_id, &staging_target_path)
                .await),
            CsiMessage::NodePublishVolume(req) => ack(handler.publish_volume(ctx, req).await),
            CsiMessage::NodeUnpublishVolume {
                volume_id,
                target_path,
            } => ack(handler
                .unpublish_volume(ctx, &volume_id, &target_path)
                .await),
            CsiMessage::NodeGetInfo => reply(handler.get_info().await, CsiMessage::NodeInfoResponse),
            CsiMessage::NodeGetCapabilities => reply(
                handler.get_capabilities().await,
                CsiMessage::NodeCapabilitiesResponse,
            ),

            // --- Response variants should never arrive as requests ----------
            other => {
                warn!(msg = %other, "unexpected message variant received as request");
                CsiMessage::Error(CsiError::InvalidArgument(format!(
                    "unexpected message: {other}"
                )))
            }
        }
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "CSI connection task failed");
    }
}

fn reply<V>(res: Result<V, CsiError>, wrap: impl FnOnce(V) -> CsiMessage) -> CsiMessage {
    match res {
        Ok(v) => wrap(v),
        Err(e) => CsiMessage::Error(e),
    }
}

fn ack(res: Result<(), CsiError>) -> CsiMessage {
    reply(res, |()| CsiMessage::Ok)
}
