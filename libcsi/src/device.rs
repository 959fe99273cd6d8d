//! Block device discovery.
//!
//! The device directory holds one symlink per volume pointing at a real
//! block device node, e.g. `/dev/disk/csi-blockdevices/sdb -> /dev/sdb`.
//! The entry name is the volume ID.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// A resolved block device.
///
/// Only constructed once `real_path` has been stat-verified as a block
/// special file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Path inside the device directory, possibly a symlink.
    pub full_path: PathBuf,
    /// Base name of `full_path`; the volume ID on the wire.
    pub name: String,
    /// Symlink-resolved device node.
    pub real_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device {path} not found: {source}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0} is not a block device")]
    NotBlockDevice(PathBuf),

    #[error("device directory {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("reading device directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Resolve `name` inside `dir`.
pub fn resolve_in_dir(dir: &Path, name: &str) -> Result<Device, DeviceError> {
    resolve(&dir.join(name))
}

/// Resolve `path` to a [`Device`], following every symlink.
///
/// A dangling link is reported as [`DeviceError::NotFound`].
pub fn resolve(path: &Path) -> Result<Device, DeviceError> {
    let not_found = |source| DeviceError::NotFound {
        path: path.to_path_buf(),
        source,
    };

    fs::symlink_metadata(path).map_err(not_found)?;
    let real_path = fs::canonicalize(path).map_err(not_found)?;
    let meta = fs::metadata(&real_path).map_err(not_found)?;
    if !meta.file_type().is_block_device() {
        return Err(DeviceError::NotBlockDevice(path.to_path_buf()));
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let dev = Device {
        full_path: path.to_path_buf(),
        name,
        real_path,
    };
    debug!(device = ?dev, "got device");
    Ok(dev)
}

/// List every valid block device directly inside `dir`.
///
/// Nested directories are skipped without being descended into, and entries
/// that do not resolve to a block device are left out.  Entries are visited
/// in lexical order.
pub fn list(dir: &Path) -> Result<Vec<Device>, DeviceError> {
    list_with(dir, resolve)
}

/// [`list`] with a custom per-entry resolver.
pub fn list_with<F>(dir: &Path, resolve: F) -> Result<Vec<Device>, DeviceError>
where
    F: Fn(&Path) -> Result<Device, DeviceError>,
{
    let io_err = |source| DeviceError::Io {
        path: dir.to_path_buf(),
        source,
    };

    if !fs::metadata(dir).map_err(io_err)?.is_dir() {
        return Err(DeviceError::NotADirectory(dir.to_path_buf()));
    }

    let mut entries = fs::read_dir(dir)
        .map_err(io_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    entries.sort_by_key(|e| e.file_name());

    debug!(path = %dir.display(), "listing devices");
    let mut devices = Vec::new();
    for entry in entries {
        let path = entry.path();
        if entry.file_type().map_err(io_err)?.is_dir() {
            debug!(file = %path.display(), "skipping dir");
            continue;
        }
        match resolve(&path) {
            Ok(dev) => devices.push(dev),
            Err(e) => debug!(file = %path.display(), error = %e, "not a device"),
        }
    }
    Ok(devices)
}
