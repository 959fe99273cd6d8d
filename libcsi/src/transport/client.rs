//! QUIC client used by the orchestrator side to issue CSI requests.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use quinn::crypto::rustls::QuicClientConfig;
use tracing::{debug, instrument};

use crate::error::CsiError;
use crate::message::CsiMessage;
use crate::transport::{recv_message, send_message};
use crate::types::{NodeInfo, NodePublishVolumeRequest, PluginInfo, Volume, VolumeId};

/// A lightweight CSI client that sends [`CsiMessage`] requests over a single
/// QUIC connection and returns the server's response.
pub struct CsiClient {
    connection: quinn::Connection,
}

impl CsiClient {
    /// Establish a new QUIC connection to the CSI server at `addr`.
    ///
    /// * `addr`: socket address of the remote CSI server
    /// * `server_name`: TLS SNI name that must match a SAN in the server's
    ///   certificate
    /// * `tls_config`: client TLS configuration trusting the server's CA
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self, CsiError> {
        let quic_client_config = QuicClientConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_client_config));

        let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let mut endpoint = quinn::Endpoint::client(bind).map_err(CsiError::transport)?;
        endpoint.set_default_client_config(client_config);

        let connection = endpoint
            .connect(addr, server_name)
            .map_err(CsiError::transport)?
            .await
            .map_err(CsiError::transport)?;

        debug!(%addr, %server_name, "CSI QUIC connection established");
        Ok(Self { connection })
    }

    /// Send a request and wait for the corresponding response.
    ///
    /// Each call uses a fresh bi-directional stream.  An error reply is
    /// returned as `Ok(CsiMessage::Error(..))`; see the typed helpers for
    /// calls that surface it as `Err`.
    #[instrument(skip(self), fields(msg = %msg))]
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        let (mut send, mut recv) = self
            .connection
            .open_bi()
            .await
            .map_err(CsiError::transport)?;
        send_message(&mut send, msg).await?;
        let response = recv_message(&mut recv).await?;
        debug!(%response, "CSI response received");
        Ok(response)
    }

    /// Send `msg`, turning a [`CsiMessage::Error`] reply into `Err`.
    async fn call(&self, msg: CsiMessage) -> Result<CsiMessage, CsiError> {
        match self.request(&msg).await? {
            CsiMessage::Error(e) => Err(e),
            other => Ok(other),
        }
    }

    pub async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        match self.call(CsiMessage::PublishVolume(req)).await? {
            CsiMessage::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        let msg = CsiMessage::UnpublishVolume {
            volume_id: volume_id.clone(),
            target_path: target_path.to_owned(),
        };
        match self.call(msg).await? {
            CsiMessage::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError> {
        match self.call(CsiMessage::ListVolumes).await? {
            CsiMessage::VolumeList(vols) => Ok(vols),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        match self.call(CsiMessage::GetPluginInfo).await? {
            CsiMessage::PluginInfoResponse(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_node_info(&self) -> Result<NodeInfo, CsiError> {
        match self.call(CsiMessage::GetNodeInfo).await? {
            CsiMessage::NodeInfoResponse(info) => Ok(info),
            other => Err(unexpected(other)),
        }
    }

    /// Close the underlying QUIC connection gracefully.
    pub fn close(&self) {
        self.connection
            .close(quinn::VarInt::from_u32(0), b"client shutdown");
    }
}

fn unexpected(msg: CsiMessage) -> CsiError {
    CsiError::TransportError(format!("unexpected response: {msg}"))
}
