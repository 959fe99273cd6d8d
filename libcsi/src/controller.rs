//! CSI Controller service trait.
//!
//! Volumes are pre-existing devices, so there is nothing to provision: the
//! controller only enumerates the device directory and checks whether a
//! device can satisfy a set of capabilities.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{ControllerCapability, CreateVolumeRequest, Volume, VolumeCapability, VolumeId};

/// Controller service: volume enumeration and capability checks.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume.
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError>;

    /// Check whether the given capabilities can be served by the volume.
    ///
    /// Returns [`CsiError::VolumeNotFound`] for an unknown volume and
    /// [`CsiError::InvalidArgument`] for the first unsupported capability.
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError>;

    /// List all volumes known to this controller.
    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError>;

    /// Report whether the controller service is ready.
    async fn controller_probe(&self) -> Result<(), CsiError>;

    /// Return the total available capacity in bytes.
    async fn get_capacity(&self) -> Result<u64, CsiError>;

    /// Optional controller RPCs implemented.
    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;
}
