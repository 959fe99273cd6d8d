//! CSI protocol messages transmitted over QUIC.
//!
//! A [`CsiMessage`] is either a request naming one service call or the
//! reply to it.  Requests and replies share one enum so a stream can be
//! decoded without knowing which side wrote it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Envelope for every message on a CSI stream.
///
/// The client writes one request variant, the server answers with the
/// matching reply variant or [`CsiMessage::Error`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // Identity requests
    Probe,
    GetPluginInfo,
    GetPluginCapabilities,

    // Controller requests
    CreateVolume(CreateVolumeRequest),
    DeleteVolume(VolumeId),
    ListVolumes,
    GetCapacity,
    /// Controller health check, answered with [`CsiMessage::Ok`].
    ControllerProbe,
    ValidateVolumeCapabilities {
        volume_id: VolumeId,
        capabilities: Vec<VolumeCapability>,
    },
    GetControllerCapabilities,

    // Node requests
    PublishVolume(NodePublishVolumeRequest),
    UnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    /// Host support check, answered with [`CsiMessage::Ok`].
    NodeProbe,
    GetNodeInfo,
    GetNodeCapabilities,

    // Replies
    ProbeResult(bool),
    PluginInfoResponse(PluginInfo),
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    VolumeCreated(Volume),
    VolumeList(Vec<Volume>),
    /// Available capacity in bytes.
    Capacity(u64),
    CapabilitiesValid(bool),
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    NodeInfoResponse(NodeInfo),
    NodeCapabilitiesResponse(Vec<NodeCapability>),
    /// Success without a payload.
    Ok,
    Error(CsiError),
}

impl CsiMessage {
    /// Variant name, as used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Probe => "Probe",
            Self::GetPluginInfo => "GetPluginInfo",
            Self::GetPluginCapabilities => "GetPluginCapabilities",
            Self::CreateVolume(_) => "CreateVolume",
            Self::DeleteVolume(_) => "DeleteVolume",
            Self::ListVolumes => "ListVolumes",
            Self::GetCapacity => "GetCapacity",
            Self::ControllerProbe => "ControllerProbe",
            Self::ValidateVolumeCapabilities { .. } => "ValidateVolumeCapabilities",
            Self::GetControllerCapabilities => "GetControllerCapabilities",
            Self::PublishVolume(_) => "PublishVolume",
            Self::UnpublishVolume { .. } => "UnpublishVolume",
            Self::NodeProbe => "NodeProbe",
            Self::GetNodeInfo => "GetNodeInfo",
            Self::GetNodeCapabilities => "GetNodeCapabilities",
            Self::ProbeResult(_) => "ProbeResult",
            Self::PluginInfoResponse(_) => "PluginInfo",
            Self::PluginCapabilitiesResponse(_) => "PluginCapabilities",
            Self::VolumeCreated(_) => "VolumeCreated",
            Self::VolumeList(_) => "VolumeList",
            Self::Capacity(_) => "Capacity",
            Self::CapabilitiesValid(_) => "CapabilitiesValid",
            Self::ControllerCapabilitiesResponse(_) => "ControllerCapabilities",
            Self::NodeInfoResponse(_) => "NodeInfo",
            Self::NodeCapabilitiesResponse(_) => "NodeCapabilities",
            Self::Ok => "Ok",
            Self::Error(_) => "Error",
        }
    }

    /// Whether a server should treat this message as a call.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::Probe
                | Self::GetPluginInfo
                | Self::GetPluginCapabilities
                | Self::CreateVolume(_)
                | Self::DeleteVolume(_)
                | Self::ListVolumes
                | Self::GetCapacity
                | Self::ControllerProbe
                | Self::ValidateVolumeCapabilities { .. }
                | Self::GetControllerCapabilities
                | Self::PublishVolume(_)
                | Self::UnpublishVolume { .. }
                | Self::NodeProbe
                | Self::GetNodeInfo
                | Self::GetNodeCapabilities
        )
    }
}

/// The variant name, plus the volume and target a call is about.
impl fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        match self {
            Self::DeleteVolume(id) | Self::ValidateVolumeCapabilities { volume_id: id, .. } => {
                write!(f, "{kind}({id})")
            }
            Self::CreateVolume(req) => write!(f, "{kind}(name={})", req.name),
            Self::PublishVolume(req) => {
                write!(f, "{kind}({} -> {})", req.volume_id, req.target_path)
            }
            Self::UnpublishVolume {
                volume_id,
                target_path,
            } => write!(f, "{kind}({volume_id} -> {target_path})"),
            Self::VolumeList(vols) => write!(f, "{kind}(count={})", vols.len()),
            Self::NodeInfoResponse(info) => write!(f, "{kind}({})", info.node_id),
            Self::ProbeResult(ok) | Self::CapabilitiesValid(ok) => write!(f, "{kind}({ok})"),
            Self::Error(e) => write!(f, "{kind}({e})"),
            _ => f.write_str(kind),
        }
    }
}
