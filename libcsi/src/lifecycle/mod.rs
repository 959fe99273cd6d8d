//! Two-stage publish / unpublish protocol.
//!
//! A device is first mounted at a private staging point
//! (`<private_dir>/<volume_id>`), and every workload target is a bind mount
//! of that staging point.  Neither direction keeps state between calls: the
//! [`VolumeState`] is derived from the live mount table each time, so a call
//! retried after a partial failure picks up where the previous one stopped.

pub mod publish;
pub mod unpublish;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::CsiError;
use crate::mount::{MountEntry, MountError};
use crate::types::VolumeId;

pub use publish::publish;
pub use unpublish::unpublish;

/// Staging point of `volume_id` inside `private_dir`.
pub fn private_mount_point(private_dir: &Path, volume_id: &VolumeId) -> PathBuf {
    private_dir.join(&volume_id.0)
}

/// Where a device is mounted relative to one publish target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState<'a> {
    /// The device is not mounted anywhere.
    Unmounted,
    /// The device is mounted at its staging point, and possibly already
    /// bound to the target.
    Staged {
        private: &'a MountEntry,
        target: Option<&'a MountEntry>,
    },
    /// The device is mounted, but not at its staging point.
    Foreign { target: Option<&'a MountEntry> },
}

impl<'a> VolumeState<'a> {
    /// Classify the mounts of one device.
    pub fn derive(mounts: &'a [MountEntry], private: &Path, target: &Path) -> Self {
        if mounts.is_empty() {
            return Self::Unmounted;
        }
        let target = mounts.iter().find(|m| m.path == target);
        match mounts.iter().find(|m| m.path == private) {
            Some(private) => Self::Staged { private, target },
            None => Self::Foreign { target },
        }
    }
}

fn mount_status_error(e: MountError) -> CsiError {
    CsiError::Internal(format!(
        "could not reliably determine existing mount status: {e}"
    ))
}

/// Create the staging point: a file for block volumes, a directory
/// otherwise.  Returns `false` if it already existed.
fn ensure_staging_point(path: &Path, block: bool) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(meta) if block && meta.is_dir() => {
            Err(io::Error::other("existing path is a directory"))
        }
        Ok(meta) if !block && !meta.is_dir() => {
            Err(io::Error::other("existing path is not a directory"))
        }
        Ok(_) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if block {
                fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(path)?;
            } else {
                fs::create_dir(path)?;
            }
            debug!(path = %path.display(), block, "created private mount point");
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

/// Remove an unmounted staging point.  Failures are only logged.
fn remove_staging_point(path: &Path) {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => debug!(path = %path.display(), "removed private mount point"),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove private mount point"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn entry(path: &str) -> MountEntry {
        MountEntry {
            device: "/dev/sdb".to_owned(),
            source: PathBuf::from("/dev/sdb"),
            path: PathBuf::from(path),
            fs_type: "ext4".to_owned(),
            opts: BTreeSet::from(["rw".to_owned()]),
        }
    }

    #[test]
    fn state_is_derived_from_mount_paths() {
        let private = Path::new("/priv/sdb");
        let target = Path::new("/tgt");

        assert_eq!(
            VolumeState::derive(&[], private, target),
            VolumeState::Unmounted
        );

        let staged = [entry("/priv/sdb")];
        assert!(matches!(
            VolumeState::derive(&staged, private, target),
            VolumeState::Staged { target: None, .. }
        ));

        let published = [entry("/priv/sdb"), entry("/tgt")];
        assert!(matches!(
            VolumeState::derive(&published, private, target),
            VolumeState::Staged {
                target: Some(_),
                ..
            }
        ));

        let elsewhere = [entry("/mnt/other"), entry("/tgt")];
        assert!(matches!(
            VolumeState::derive(&elsewhere, private, target),
            VolumeState::Foreign { target: Some(_) }
        ));
    }

    #[test]
    fn staging_point_kind_follows_access_type() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("blk");
        assert!(ensure_staging_point(&file, true).unwrap());
        assert!(!ensure_staging_point(&file, true).unwrap());
        assert!(ensure_staging_point(&file, false).is_err());

        let dir = tmp.path().join("fs");
        assert!(ensure_staging_point(&dir, false).unwrap());
        assert!(dir.is_dir());
        assert!(ensure_staging_point(&dir, true).is_err());

        remove_staging_point(&file);
        remove_staging_point(&dir);
        assert!(!file.exists());
        assert!(!dir.exists());
    }
}
