//! CSI Node service trait.
//!
//! The Node service runs on every worker and makes a device available to a
//! workload:
//!
//! 1. **Publish**: mount the device at its private staging point if needed,
//!    then bind-mount the staging point onto the workload's target path.
//! 2. **Unpublish**: remove the target bind-mount, and the staging mount once
//!    no target references the device any more.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{NodeCapability, NodeInfo, NodePublishVolumeRequest, VolumeId};

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Publish a volume at `req.target_path`.
    ///
    /// Idempotent: repeating a successful call with the same request
    /// succeeds without mounting anything.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume from `target_path`.
    ///
    /// Idempotent: unpublishing a volume that is not mounted succeeds.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError>;

    /// Check that this host can publish volumes.
    async fn node_probe(&self) -> Result<(), CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;

    /// Optional node RPCs implemented.
    async fn get_node_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;
}
