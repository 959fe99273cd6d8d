//! Core CSI types: volumes, capabilities, requests, and plugin metadata.
//!
//! These types form the data model shared by the CSI traits, the transport
//! layer and the block-device backend.  They are all
//! [`Serialize`]/[`Deserialize`] so they can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::CsiError;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Identifier of a volume: the base name of a device entry in the device
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// CSI access modes.  Only the single-node modes are served by this plugin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    Unknown,
    /// One writer, this node.
    SingleNodeWriter,
    /// Read-only, this node.
    SingleNodeReaderOnly,
    MultiNodeReaderOnly,
    MultiNodeSingleWriter,
    MultiNodeMultiWriter,
}

impl AccessMode {
    /// Whether the mode is one of the two single-node modes.
    pub fn is_supported(self) -> bool {
        matches!(self, Self::SingleNodeWriter | Self::SingleNodeReaderOnly)
    }

    pub fn is_read_only(self) -> bool {
        self == Self::SingleNodeReaderOnly
    }

    /// The mount option every mount of a volume in this mode must carry.
    pub fn mount_permission(self) -> &'static str {
        if self.is_read_only() { "ro" } else { "rw" }
    }
}

/// Marker for a raw block volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockVolume {}

/// A volume exposed as a mounted filesystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountVolume {
    /// Filesystem type, e.g. `"ext4"`.  Empty means the host default.
    #[serde(default)]
    pub fs_type: String,
    /// Additional mount flags (e.g. `"noatime"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
}

/// Describes how a volume must be exposed.
///
/// Mirrors the CSI message shape: `block` and `mount` are alternative
/// branches and exactly one of them must be set.  Use
/// [`VolumeCapability::access_type`] to obtain the validated branch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    #[serde(default)]
    pub block: Option<BlockVolume>,
    #[serde(default)]
    pub mount: Option<MountVolume>,
    #[serde(default)]
    pub access_mode: Option<AccessMode>,
}

/// The validated access-type branch of a [`VolumeCapability`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType<'a> {
    Block,
    Mount(&'a MountVolume),
}

impl AccessType<'_> {
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block)
    }
}

impl VolumeCapability {
    /// A block capability with the given access mode.
    pub fn block(mode: AccessMode) -> Self {
        Self {
            block: Some(BlockVolume {}),
            mount: None,
            access_mode: Some(mode),
        }
    }

    /// A mount capability with the given filesystem, flags and access mode.
    pub fn mount(fs_type: &str, mount_flags: &[&str], mode: AccessMode) -> Self {
        Self {
            block: None,
            mount: Some(MountVolume {
                fs_type: fs_type.to_owned(),
                mount_flags: mount_flags.iter().map(|f| (*f).to_owned()).collect(),
            }),
            access_mode: Some(mode),
        }
    }

    /// Return the single access-type branch, rejecting none or both.
    pub fn access_type(&self) -> Result<AccessType<'_>, CsiError> {
        match (&self.block, &self.mount) {
            (Some(_), None) => Ok(AccessType::Block),
            (None, Some(m)) => Ok(AccessType::Mount(m)),
            (None, None) => Err(CsiError::invalid("access type required")),
            (Some(_), Some(_)) => Err(CsiError::invalid(
                "access type must be either block or mount, not both",
            )),
        }
    }

    /// Return the access mode, rejecting a missing or multi-node mode.
    pub fn supported_access_mode(&self) -> Result<AccessMode, CsiError> {
        match self.access_mode {
            None => Err(CsiError::invalid("access mode required")),
            Some(mode) if mode.is_supported() => Ok(mode),
            Some(mode) => Err(CsiError::InvalidArgument(format!(
                "invalid access mode {mode:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Volume metadata
// ---------------------------------------------------------------------------

/// Key in [`Volume::volume_context`] holding the resolved device node.
pub const CONTEXT_DEVICE: &str = "device";

/// A volume as reported by `ListVolumes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Volume identifier (the device entry name).
    pub volume_id: VolumeId,
    /// Opaque context, currently the resolved device path.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to create a new volume.  Provisioning is not supported; the type
/// exists so the request can be answered with `Unimplemented`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    pub name: String,
    pub capacity_bytes: u64,
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Request to publish a volume at a workload target path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// Pre-created target: a directory for mount volumes, a file for block
    /// volumes.
    pub target_path: String,
    /// Requested capability.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
}

/// RPCs the Controller service implements beyond the mandatory ones.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    ListVolumes,
}

/// Optional Node RPCs.  This plugin has no staging step of its own, so it
/// advertises none of them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    StageUnstageVolume,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_id: String,
}
