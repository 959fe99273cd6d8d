//! Unpublish: remove a device from a workload target path.

use std::path::Path;

use tracing::{debug, info, instrument};

use super::{VolumeState, mount_status_error, private_mount_point, remove_staging_point};
use crate::device::Device;
use crate::error::CsiError;
use crate::mount::{MountError, Mounter};
use crate::mount::inspect::mounts_for_device;
use crate::types::VolumeId;

/// Unmount `target_path`, then release the staging mount if nothing else
/// still references the device.
///
/// Succeeds without doing anything when the volume is not mounted.
#[instrument(skip_all, fields(%volume_id, %target_path))]
pub fn unpublish<M: Mounter + ?Sized>(
    mounter: &M,
    volume_id: &VolumeId,
    target_path: &str,
    private_dir: &Path,
    device: &Path,
) -> Result<(), CsiError> {
    if target_path.is_empty() {
        return Err(CsiError::invalid("target_path is required"));
    }
    let target = Path::new(target_path);

    let dev = mounter.stat_device(device).map_err(|e| {
        CsiError::Internal(format!(
            "error getting block device for volume {volume_id}: {e}"
        ))
    })?;

    let priv_tgt = private_mount_point(private_dir, volume_id);
    let mounts = mounts_for_device(mounter, &dev).map_err(mount_status_error)?;

    let (target_mounted, private_mounted) = match VolumeState::derive(&mounts, &priv_tgt, target)
    {
        VolumeState::Unmounted => {
            debug!("volume not mounted, nothing to unpublish");
            return Ok(());
        }
        VolumeState::Staged { target, .. } => (target.is_some(), true),
        VolumeState::Foreign { target } => (target.is_some(), false),
    };

    if target_mounted {
        mounter
            .unmount(target)
            .map_err(|e| CsiError::Internal(format!("error unmounting target: {e}")))?;
        info!(%target_path, "volume unpublished");
    }

    if private_mounted {
        release_staging(mounter, &dev, &priv_tgt)
            .map_err(|e| CsiError::Internal(format!("error unmounting private mount: {e}")))?;
    }
    Ok(())
}

/// Unmount and remove the staging point once it is the device's only mount.
fn release_staging<M: Mounter + ?Sized>(
    mounter: &M,
    dev: &Device,
    priv_tgt: &Path,
) -> Result<(), MountError> {
    // Re-read: another target may have been bound since the first look.
    let mounts = mounts_for_device(mounter, dev)?;
    match mounts.as_slice() {
        [only] if only.path == priv_tgt => {
            mounter.unmount(priv_tgt)?;
            remove_staging_point(priv_tgt);
            info!(private = %priv_tgt.display(), "private mount released");
        }
        _ => debug!(remaining = mounts.len(), "private mount still in use"),
    }
    Ok(())
}
