//! Block-device backend for CSI.
//!
//! [`BlockDeviceBackend`] implements [`CsiIdentity`], [`CsiController`] and
//! [`CsiNode`] on top of pre-existing host block devices.  Volumes are the
//! entries of a device directory, and publishing goes through a private
//! staging mount per volume.
//!
//! # On-disk layout
//!
//! ```text
//! <device_dir>/
//!   <volume-id> -> /dev/sdX     # one entry per volume
//! <private_dir>/
//!   <volume-id>                 # staging mount (dir, or file for block)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::controller::CsiController;
use crate::device::{self, Device};
use crate::error::CsiError;
use crate::filesystems;
use crate::identity::{CsiIdentity, PLUGIN_NAME};
use crate::lifecycle;
use crate::lock::VolumeLocks;
use crate::mount::{HostMounter, Mounter};
use crate::node::CsiNode;
use crate::types::*;

/// Concrete CSI backend serving host block devices.
///
/// # Thread safety
///
/// Calls for different volumes run concurrently.  Calls for the same volume
/// are serialized by a per-volume lock held across the whole inspect and
/// mount sequence.  The mount work runs on Tokio's blocking pool and owns
/// the lock guard, so a caller that gives up early does not release the
/// volume while a mount is still in flight.
pub struct BlockDeviceBackend<M = HostMounter> {
    config: Config,
    mounter: Arc<M>,
    locks: VolumeLocks,
}

impl BlockDeviceBackend<HostMounter> {
    /// Create a backend that mounts on this host.
    pub fn new(config: Config) -> Self {
        Self::with_mounter(config, Arc::new(HostMounter::new()))
    }
}

impl<M: Mounter + 'static> BlockDeviceBackend<M> {
    pub fn with_mounter(config: Config, mounter: Arc<M>) -> Self {
        Self {
            config,
            mounter,
            locks: VolumeLocks::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Look up the device entry for `volume_id`.
    fn resolve_volume(
        mounter: &M,
        config: &Config,
        volume_id: &VolumeId,
    ) -> Result<Device, CsiError> {
        let name = volume_id.0.as_str();
        if name.is_empty() {
            return Err(CsiError::invalid("volume_id is required"));
        }
        if name.contains('/') || name == "." || name == ".." {
            return Err(CsiError::InvalidArgument(format!(
                "volume id {name:?} is not a device entry name"
            )));
        }
        mounter
            .stat_device(&config.device_dir.join(name))
            .map_err(|e| {
                debug!(volume_id = %volume_id, error = %e, "device lookup failed");
                CsiError::VolumeNotFound(name.to_owned())
            })
    }

    /// Run `f` with the mounter on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, CsiError>
    where
        T: Send + 'static,
        F: FnOnce(&M, &Config) -> Result<T, CsiError> + Send + 'static,
    {
        let mounter = Arc::clone(&self.mounter);
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || f(mounter.as_ref(), &config))
            .await
            .map_err(|e| CsiError::Internal(format!("mount task failed: {e}")))?
    }
}

async fn is_dir(path: &std::path::Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl<M: Mounter + 'static> CsiIdentity for BlockDeviceBackend<M> {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: PLUGIN_NAME.to_owned(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        let ready = is_dir(&self.config.device_dir).await && is_dir(&self.config.private_dir).await;
        if !ready {
            warn!(
                device_dir = %self.config.device_dir.display(),
                private_dir = %self.config.private_dir.display(),
                "plugin directories missing"
            );
        }
        Ok(ready)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![PluginCapability::ControllerService])
    }
}

// ---------------------------------------------------------------------------
// CsiController
// ---------------------------------------------------------------------------

#[async_trait]
impl<M: Mounter + 'static> CsiController for BlockDeviceBackend<M> {
    async fn create_volume(&self, _req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        Err(CsiError::Unimplemented("CreateVolume".to_owned()))
    }

    async fn delete_volume(&self, _volume_id: &VolumeId) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented("DeleteVolume".to_owned()))
    }

    #[instrument(skip_all, fields(volume_id = %volume_id))]
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError> {
        let id = volume_id.clone();
        let wants_fs = capabilities
            .iter()
            .any(|cap| cap.mount.as_ref().is_some_and(|m| !m.fs_type.is_empty()));
        let host_fs = self
            .blocking(move |mounter, config| {
                Self::resolve_volume(mounter, config, &id)?;
                if !wants_fs {
                    return Ok(Vec::new());
                }
                filesystems::host_filesystems(&config.bin_dir).map_err(|e| {
                    CsiError::Internal(format!("unable to get host supported filesystems: {e}"))
                })
            })
            .await?;

        for cap in capabilities {
            if let Some(mount) = &cap.mount
                && !mount.fs_type.is_empty()
            {
                if !host_fs.iter().any(|fs| *fs == mount.fs_type) {
                    return Err(CsiError::InvalidArgument(format!(
                        "no host support for fstype: {}",
                        mount.fs_type
                    )));
                }
            }
            if let Some(mode) = cap.access_mode
                && !mode.is_supported()
            {
                return Err(CsiError::InvalidArgument(format!(
                    "invalid access mode {mode:?}"
                )));
            }
        }
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError> {
        let devices = self
            .blocking(|mounter, config| {
                device::list_with(&config.device_dir, |path| mounter.stat_device(path))
                    .map_err(|e| CsiError::Internal(format!("unable to list devices: {e}")))
            })
            .await?;

        let volumes: Vec<Volume> = devices
            .into_iter()
            .map(|dev| Volume {
                volume_id: VolumeId(dev.name),
                volume_context: HashMap::from([(
                    CONTEXT_DEVICE.to_owned(),
                    dev.real_path.to_string_lossy().into_owned(),
                )]),
            })
            .collect();
        debug!(count = volumes.len(), "listed volumes");
        Ok(volumes)
    }

    async fn controller_probe(&self) -> Result<(), CsiError> {
        Ok(())
    }

    async fn get_capacity(&self) -> Result<u64, CsiError> {
        Err(CsiError::Unimplemented("GetCapacity".to_owned()))
    }

    async fn get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(vec![ControllerCapability::ListVolumes])
    }
}

// ---------------------------------------------------------------------------
// CsiNode
// ---------------------------------------------------------------------------

#[async_trait]
impl<M: Mounter + 'static> CsiNode for BlockDeviceBackend<M> {
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, target = %req.target_path))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        let guard = self.locks.lock(&req.volume_id).await;
        self.blocking(move |mounter, config| {
            let _guard = guard;
            let dev = Self::resolve_volume(mounter, config, &req.volume_id)?;
            lifecycle::publish(mounter, &req, &config.private_dir, &dev.real_path)
        })
        .await?;
        info!("NodePublishVolume complete");
        Ok(())
    }

    #[instrument(skip_all, fields(volume_id = %volume_id, target = %target_path))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        let guard = self.locks.lock(volume_id).await;
        let id = volume_id.clone();
        let target = target_path.to_owned();
        self.blocking(move |mounter, config| {
            let _guard = guard;
            let dev = Self::resolve_volume(mounter, config, &id)?;
            lifecycle::unpublish(mounter, &id, &target, &config.private_dir, &dev.real_path)
        })
        .await?;
        info!("NodeUnpublishVolume complete");
        Ok(())
    }

    async fn node_probe(&self) -> Result<(), CsiError> {
        filesystems::supported(&self.config.bin_dir)
            .map_err(|e| CsiError::precondition(e.to_string()))
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
        })
    }

    async fn get_node_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(Vec::new())
    }
}
