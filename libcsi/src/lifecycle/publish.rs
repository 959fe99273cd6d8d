//! Publish: make a device available at a workload target path.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, error, info, instrument};

use super::{VolumeState, ensure_staging_point, mount_status_error, private_mount_point};
use crate::device::Device;
use crate::error::CsiError;
use crate::mount::Mounter;
use crate::mount::inspect::{all_mounts, mounts_for_device};
use crate::types::{AccessMode, AccessType, NodePublishVolumeRequest};

/// Publish `device` at `req.target_path`, staging it under `private_dir`
/// first if it is not mounted yet.
///
/// Repeating a successful call with the same request performs no mount
/// operation and succeeds.
#[instrument(skip_all, fields(volume_id = %req.volume_id, target = %req.target_path))]
pub fn publish<M: Mounter + ?Sized>(
    mounter: &M,
    req: &NodePublishVolumeRequest,
    private_dir: &Path,
    device: &Path,
) -> Result<(), CsiError> {
    if req.target_path.is_empty() {
        return Err(CsiError::invalid("target_path is required"));
    }
    let target = Path::new(&req.target_path);

    let cap = req
        .volume_capability
        .as_ref()
        .ok_or_else(|| CsiError::invalid("volume capability required"))?;
    let mode = cap.supported_access_mode()?;
    let access = cap.access_type()?;
    // A read-only bind of a block device does not stop writes to the
    // underlying medium.
    if access.is_block() && mode.is_read_only() {
        return Err(CsiError::invalid("read only not supported for block volume"));
    }

    let dev = mounter.stat_device(device).map_err(|e| {
        CsiError::Internal(format!(
            "error getting block device for volume {}: {e}",
            req.volume_id
        ))
    })?;

    check_target(target, access)?;
    check_private_dir(private_dir)?;

    let priv_tgt = private_mount_point(private_dir, &req.volume_id);
    let mounts = mounts_for_device(mounter, &dev).map_err(mount_status_error)?;
    let perm = mode.mount_permission();

    match VolumeState::derive(&mounts, &priv_tgt, target) {
        VolumeState::Unmounted => stage(mounter, &dev, &priv_tgt, access, mode)?,
        VolumeState::Staged { private, target } => {
            if !private.has_opt(perm) {
                return Err(CsiError::invalid(
                    "access mode conflicts with existing mounts",
                ));
            }
            debug!(private = %priv_tgt.display(), "private mount already in place");

            if let Some(existing) = target {
                if !existing.has_opt(perm) {
                    return Err(CsiError::Internal(
                        "volume previously published with different options".to_owned(),
                    ));
                }
                debug!("volume already published to target");
                return Ok(());
            }
        }
        VolumeState::Foreign { .. } => {
            return Err(CsiError::Internal(
                "device already in use and mounted elsewhere".to_owned(),
            ));
        }
    }

    let opts = target_options(access, mode);
    mounter
        .bind_mount(&priv_tgt, target, &opts)
        .map_err(|e| {
            CsiError::Internal(format!("error publishing volume to target path: {e}"))
        })?;

    info!(private = %priv_tgt.display(), read_only = mode.is_read_only(), "volume published");
    Ok(())
}

/// Mount the device at its staging point.
fn stage<M: Mounter + ?Sized>(
    mounter: &M,
    dev: &Device,
    priv_tgt: &Path,
    access: AccessType<'_>,
    mode: AccessMode,
) -> Result<(), CsiError> {
    debug!(private = %priv_tgt.display(), "attempting mount to private area");

    let created = ensure_staging_point(priv_tgt, access.is_block()).map_err(|e| {
        CsiError::Internal(format!(
            "unable to create private mount point {}: {e}",
            priv_tgt.display()
        ))
    })?;

    if !created {
        // Our device is not mounted, so anything mounted here belongs to
        // something else.
        debug!(private = %priv_tgt.display(), "private mount target already exists");
        let mounts = all_mounts(mounter).map_err(mount_status_error)?;
        if let Some(m) = mounts.iter().find(|m| m.path == priv_tgt) {
            error!(mounted_device = %m.device, "mount point already in use by device");
            return Err(CsiError::Internal(format!(
                "unable to use private mount point {}",
                priv_tgt.display()
            )));
        }
    }

    let src = dev.real_path.as_path();
    let result = match access {
        AccessType::Block => mounter.bind_mount(src, priv_tgt, &[]),
        // No formatting on a read-only request.
        AccessType::Mount(vol) if mode.is_read_only() => {
            let mut opts = vol.mount_flags.clone();
            opts.push("ro".to_owned());
            mounter.mount(src, priv_tgt, &vol.fs_type, &opts)
        }
        AccessType::Mount(vol) => {
            mounter.format_and_mount(src, priv_tgt, &vol.fs_type, &vol.mount_flags)
        }
    };
    result.map_err(|e| CsiError::Internal(format!("error performing private mount: {e}")))?;

    info!(device = %src.display(), private = %priv_tgt.display(), "device staged");
    Ok(())
}

fn target_options(access: AccessType<'_>, mode: AccessMode) -> Vec<String> {
    match access {
        AccessType::Block => Vec::new(),
        AccessType::Mount(vol) => {
            let mut opts = vol.mount_flags.clone();
            if mode.is_read_only() {
                opts.push("ro".to_owned());
            }
            opts
        }
    }
}

/// The target must be pre-created: a directory for mount volumes, anything
/// else for block volumes.
fn check_target(target: &Path, access: AccessType<'_>) -> Result<(), CsiError> {
    let meta = match fs::metadata(target) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(CsiError::precondition(format!(
                "publish target {} not pre-created",
                target.display()
            )));
        }
        Err(e) => return Err(CsiError::Internal(format!("failed to stat target: {e}"))),
    };
    if meta.is_dir() == access.is_block() {
        return Err(CsiError::precondition(format!(
            "target {} wrong type (file vs dir) for access type",
            target.display()
        )));
    }
    Ok(())
}

fn check_private_dir(private_dir: &Path) -> Result<(), CsiError> {
    match fs::metadata(private_dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(CsiError::Internal(format!(
            "private dir {} is not a directory",
            private_dir.display()
        ))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(CsiError::Internal(format!(
            "plugin private dir {} not pre-created",
            private_dir.display()
        ))),
        Err(e) => Err(CsiError::Internal(format!(
            "failed to stat private dir: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, FAKE_DEVICE, FakeMounter, Workspace};
    use crate::types::VolumeCapability;

    fn ext4_writer() -> VolumeCapability {
        VolumeCapability::mount("ext4", &[], AccessMode::SingleNodeWriter)
    }

    #[test]
    fn first_publish_formats_then_binds_and_repeat_is_a_noop() {
        let ws = Workspace::new();
        let fake = FakeMounter::new();
        let req = ws.request("vol1", ws.target_dir("tgt"), ext4_writer());

        publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap();
        let priv_tgt = ws.private_dir().join("vol1");
        assert_eq!(
            fake.calls(),
            vec![
                Call::FormatAndMount {
                    src: FAKE_DEVICE.into(),
                    dst: priv_tgt.clone(),
                    fs_type: "ext4".to_owned(),
                    opts: vec![],
                },
                Call::Bind {
                    src: priv_tgt.clone(),
                    dst: req.target_path.clone().into(),
                    opts: vec![],
                },
            ]
        );
        assert!(priv_tgt.is_dir());

        fake.clear_calls();
        publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap();
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn block_read_only_is_rejected_before_any_mount() {
        let ws = Workspace::new();
        let fake = FakeMounter::new();
        let req = ws.request(
            "vol1",
            ws.target_file("tgt"),
            VolumeCapability::block(AccessMode::SingleNodeReaderOnly),
        );

        let err = publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));
        assert!(fake.calls().is_empty());
        assert!(!ws.private_dir().join("vol1").exists());
    }

    #[test]
    fn malformed_capabilities_are_invalid_for_every_mode() {
        let ws = Workspace::new();
        let fake = FakeMounter::new();
        let target = ws.target_dir("tgt");

        for mode in [AccessMode::SingleNodeWriter, AccessMode::SingleNodeReaderOnly] {
            let neither = VolumeCapability {
                access_mode: Some(mode),
                ..Default::default()
            };
            let mut both = VolumeCapability::block(mode);
            both.mount = ext4_writer().mount;

            for cap in [neither, both] {
                let req = ws.request("vol1", target.clone(), cap);
                let err =
                    publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap_err();
                assert!(matches!(err, CsiError::InvalidArgument(_)), "{err}");
            }
        }

        let mut req = ws.request("vol1", target.clone(), ext4_writer());
        req.volume_capability = None;
        assert!(matches!(
            publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)),
            Err(CsiError::InvalidArgument(_))
        ));

        let req = ws.request(
            "vol1",
            target,
            VolumeCapability::mount("ext4", &[], AccessMode::MultiNodeMultiWriter),
        );
        assert!(matches!(
            publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)),
            Err(CsiError::InvalidArgument(_))
        ));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn target_must_be_pre_created_with_matching_kind() {
        let ws = Workspace::new();
        let fake = FakeMounter::new();

        let mut req = ws.request("vol1", ws.root().join("missing"), ext4_writer());
        assert!(matches!(
            publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)),
            Err(CsiError::FailedPrecondition(_))
        ));

        req.target_path = String::new();
        assert!(matches!(
            publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)),
            Err(CsiError::InvalidArgument(_))
        ));

        let req = ws.request(
            "vol1",
            ws.target_dir("dir-target"),
            VolumeCapability::block(AccessMode::SingleNodeWriter),
        );
        assert!(matches!(
            publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)),
            Err(CsiError::FailedPrecondition(_))
        ));

        let req = ws.request("vol1", ws.target_file("file-target"), ext4_writer());
        assert!(matches!(
            publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)),
            Err(CsiError::FailedPrecondition(_))
        ));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn missing_private_dir_or_device_is_internal() {
        let ws = Workspace::new();
        let fake = FakeMounter::new();
        let req = ws.request("vol1", ws.target_dir("tgt"), ext4_writer());

        assert!(matches!(
            publish(&fake, &req, &ws.root().join("nope"), Path::new(FAKE_DEVICE)),
            Err(CsiError::Internal(_))
        ));
        assert!(matches!(
            publish(&fake, &req, &ws.private_dir(), Path::new("/dev/vanished")),
            Err(CsiError::Internal(_))
        ));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn occupied_private_mount_point_is_not_clobbered() {
        let ws = Workspace::new();
        let fake = FakeMounter::new();
        let priv_tgt = ws.private_dir().join("vol1");
        fs::create_dir(&priv_tgt).unwrap();
        fake.seed("/dev/sdz", &priv_tgt, "xfs", &["rw"], "/");

        let req = ws.request("vol1", ws.target_dir("tgt"), ext4_writer());
        let err = publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap_err();
        assert!(matches!(err, CsiError::Internal(_)));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn leftover_unused_private_mount_point_is_reused() {
        let ws = Workspace::new();
        let fake = FakeMounter::new();
        fs::create_dir(ws.private_dir().join("vol1")).unwrap();

        let req = ws.request("vol1", ws.target_dir("tgt"), ext4_writer());
        publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap();
        assert_eq!(fake.calls().len(), 2);
    }

    #[test]
    fn device_mounted_elsewhere_is_refused() {
        let ws = Workspace::new();
        let fake = FakeMounter::new();
        fake.seed(FAKE_DEVICE, "/mnt/manual", "ext4", &["rw"], "/");

        let req = ws.request("vol1", ws.target_dir("tgt"), ext4_writer());
        let err = publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap_err();
        assert!(matches!(err, CsiError::Internal(_)));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn permission_mismatch_with_existing_mounts() {
        let ws = Workspace::new();
        let fake = FakeMounter::new();
        let reader = VolumeCapability::mount("ext4", &[], AccessMode::SingleNodeReaderOnly);

        let req = ws.request("vol1", ws.target_dir("tgt"), reader);
        publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap();

        // Staged read-only; a writer cannot share it.
        let req = ws.request("vol1", ws.target_dir("tgt2"), ext4_writer());
        let err = publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));
    }

    #[test]
    fn target_published_with_other_options_is_internal() {
        let ws = Workspace::new();
        let fake = FakeMounter::new();
        let priv_tgt = ws.private_dir().join("vol1");
        let target = ws.target_dir("tgt");
        fake.seed(FAKE_DEVICE, &priv_tgt, "ext4", &["rw"], "/");
        fake.seed(FAKE_DEVICE, &target, "ext4", &["ro"], "/");

        let req = ws.request("vol1", target, ext4_writer());
        let err = publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap_err();
        assert!(matches!(err, CsiError::Internal(_)));
    }

    #[test]
    fn read_only_mount_is_not_formatted() {
        let ws = Workspace::new();
        let fake = FakeMounter::new();
        let cap = VolumeCapability::mount("xfs", &["noatime"], AccessMode::SingleNodeReaderOnly);
        let req = ws.request("vol1", ws.target_dir("tgt"), cap);

        publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap();
        let ro = vec!["noatime".to_owned(), "ro".to_owned()];
        let calls = fake.calls();
        assert_eq!(
            calls[0],
            Call::Mount {
                src: FAKE_DEVICE.into(),
                dst: ws.private_dir().join("vol1"),
                fs_type: "xfs".to_owned(),
                opts: ro.clone(),
            }
        );
        assert!(matches!(&calls[1], Call::Bind { opts, .. } if *opts == ro));
    }

    #[test]
    fn block_volume_stages_through_a_file() {
        let ws = Workspace::new();
        let fake = FakeMounter::new();
        let target = ws.target_file("tgt");
        let req = ws.request(
            "vol1",
            target.clone(),
            VolumeCapability::block(AccessMode::SingleNodeWriter),
        );

        publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap();
        let priv_tgt = ws.private_dir().join("vol1");
        assert!(priv_tgt.is_file());
        assert_eq!(
            fake.calls(),
            vec![
                Call::Bind {
                    src: FAKE_DEVICE.into(),
                    dst: priv_tgt.clone(),
                    opts: vec![],
                },
                Call::Bind {
                    src: priv_tgt,
                    dst: target,
                    opts: vec![],
                },
            ]
        );

        fake.clear_calls();
        publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap();
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn mount_failure_is_internal_and_retry_recovers() {
        let ws = Workspace::new();
        let fake = FakeMounter::new();
        let req = ws.request("vol1", ws.target_dir("tgt"), ext4_writer());

        fake.fail_next_mount();
        let err = publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap_err();
        assert!(matches!(err, CsiError::Internal(_)));
        assert!(fake.calls().is_empty());

        // The staging directory left behind is reused.
        publish(&fake, &req, &ws.private_dir(), Path::new(FAKE_DEVICE)).unwrap();
        assert_eq!(fake.calls().len(), 2);
    }
}
