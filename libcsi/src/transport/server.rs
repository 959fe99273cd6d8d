//! QUIC server that runs on each worker node and dispatches incoming CSI
//! requests to the service trait implementations.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;
use crate::transport::{recv_message, send_message};

/// Accepts QUIC connections and answers each bi-stream with the result of
/// one call on a handler implementing all three CSI services.
pub struct CsiServer<T> {
    endpoint: quinn::Endpoint,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Bind a QUIC endpoint on `addr`.
    ///
    /// `tls_config` must carry the node's certificate chain and key, and
    /// allow TLS 1.3.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, CsiError> {
        let crypto = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let endpoint = quinn::Endpoint::server(
            quinn::ServerConfig::with_crypto(Arc::new(crypto)),
            addr,
        )
        .map_err(CsiError::transport)?;
        info!(%addr, "CSI QUIC server listening");
        Ok(Self { endpoint, handler })
    }

    /// Address the endpoint is bound to.  Useful after binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, CsiError> {
        self.endpoint.local_addr().map_err(CsiError::transport)
    }

    /// Serve until [`shutdown`](Self::shutdown) closes the endpoint.
    ///
    /// Connections and the streams within them are handled on their own
    /// Tokio tasks.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                let conn = match incoming.await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "CSI handshake failed");
                        return;
                    }
                };
                let remote = conn.remote_address();
                debug!(%remote, "CSI connection accepted");
                if let Err(e) = Self::handle_connection(conn, handler).await {
                    warn!(%remote, error = %e, "CSI connection error");
                }
            });
        }
        info!("CSI QUIC server stopped");
        Ok(())
    }

    /// Stop accepting connections; [`serve`](Self::serve) then returns.
    pub fn shutdown(&self) {
        self.endpoint
            .close(quinn::VarInt::from_u32(0), b"server shutdown");
    }

    async fn handle_connection(conn: quinn::Connection, handler: Arc<T>) -> Result<(), CsiError> {
        loop {
            let (mut send, mut recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(
                    quinn::ConnectionError::ApplicationClosed(_)
                    | quinn::ConnectionError::LocallyClosed,
                ) => return Ok(()),
                Err(e) => return Err(CsiError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let result = async {
                    let request = recv_message(&mut recv).await?;
                    let response = Self::answer(&handler, request).await;
                    send_message(&mut send, &response).await
                };
                if let Err(e) = result.await {
                    error!(error = %e, "CSI stream failed");
                }
            });
        }
    }

    #[instrument(skip_all, fields(%request))]
    async fn answer(handler: &T, request: CsiMessage) -> CsiMessage {
        let response = Self::dispatch(handler, request).await;
        match &response {
            CsiMessage::Error(e) => warn!(error = %e, "CSI request failed"),
            ok => debug!(response = %ok, "CSI request served"),
        }
        response
    }

    /// Call the service method a request names.
    async fn dispatch(handler: &T, request: CsiMessage) -> CsiMessage {
        use CsiMessage as M;

        if !request.is_request() {
            return M::Error(CsiError::InvalidArgument(format!(
                "{} is not a request",
                request.kind()
            )));
        }

        match request {
            // Identity
            M::Probe => reply(handler.probe().await, M::ProbeResult),
            M::GetPluginInfo => reply(handler.get_plugin_info().await, M::PluginInfoResponse),
            M::GetPluginCapabilities => reply(
                handler.get_plugin_capabilities().await,
                M::PluginCapabilitiesResponse,
            ),

            // Controller
            M::CreateVolume(req) => reply(handler.create_volume(req).await, M::VolumeCreated),
            M::DeleteVolume(id) => reply(handler.delete_volume(&id).await, |()| M::Ok),
            M::ListVolumes => reply(handler.list_volumes().await, M::VolumeList),
            M::GetCapacity => reply(handler.get_capacity().await, M::Capacity),
            M::ValidateVolumeCapabilities {
                volume_id,
                capabilities,
            } => reply(
                handler
                    .validate_volume_capabilities(&volume_id, &capabilities)
                    .await,
                M::CapabilitiesValid,
            ),
            M::ControllerProbe => reply(handler.controller_probe().await, |()| M::Ok),
            M::GetControllerCapabilities => reply(
                CsiController::get_capabilities(handler).await,
                M::ControllerCapabilitiesResponse,
            ),

            // Node
            M::PublishVolume(req) => reply(handler.publish_volume(req).await, |()| M::Ok),
            M::UnpublishVolume {
                volume_id,
                target_path,
            } => reply(
                handler.unpublish_volume(&volume_id, &target_path).await,
                |()| M::Ok,
            ),
            M::NodeProbe => reply(handler.node_probe().await, |()| M::Ok),
            M::GetNodeInfo => reply(handler.get_info().await, M::NodeInfoResponse),
            M::GetNodeCapabilities => reply(
                handler.get_node_capabilities().await,
                M::NodeCapabilitiesResponse,
            ),

            other => M::Error(CsiError::Unimplemented(other.kind().to_owned())),
        }
    }
}

fn reply<V>(result: Result<V, CsiError>, wrap: impl FnOnce(V) -> CsiMessage) -> CsiMessage {
    result.map_or_else(CsiMessage::Error, wrap)
}
