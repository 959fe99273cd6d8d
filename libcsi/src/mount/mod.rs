//! Host mount table and mount primitives.
//!
//! The lifecycle code never touches the kernel directly; it goes through a
//! [`Mounter`].  [`HostMounter`] is the Linux implementation, and
//! [`inspect`] turns raw table rows into the per-device view the lifecycle
//! decisions are made on.

pub mod host;
pub mod inspect;

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::device::{self, Device, DeviceError};

pub use host::HostMounter;
pub use inspect::MountEntry;

/// One raw row of the host mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    /// Mount source as recorded by the kernel (device path or fs name).
    pub source: String,
    pub mount_point: PathBuf,
    pub fs_type: String,
    /// Per-mount options, e.g. `["rw", "relatime"]`.
    pub mount_opts: Vec<String>,
    /// Root of the mount within its filesystem; `/` unless bind-mounted.
    pub root: String,
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error("{op} {path}: {source}")]
    Syscall {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("{program} failed ({status}): {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{device} already has a {found} filesystem, requested {requested}")]
    FsMismatch {
        device: PathBuf,
        found: String,
        requested: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

/// Mount-table reader and mount primitives of the host.
///
/// Every call reflects live kernel state; implementations must not cache.
pub trait Mounter: Send + Sync {
    /// Current mount table, in kernel order.
    fn mounts(&self) -> Result<Vec<MountRecord>, MountError>;

    /// Bind `src` onto `dst`, then apply `opts` (e.g. `ro`) to the new mount.
    fn bind_mount(&self, src: &Path, dst: &Path, opts: &[String]) -> Result<(), MountError>;

    /// Mount `src` on `dst` as `fs_type` without formatting.
    fn mount(&self, src: &Path, dst: &Path, fs_type: &str, opts: &[String])
    -> Result<(), MountError>;

    /// Mount `src` on `dst`, creating a `fs_type` filesystem first if the
    /// device carries none.
    fn format_and_mount(
        &self,
        src: &Path,
        dst: &Path,
        fs_type: &str,
        opts: &[String],
    ) -> Result<(), MountError>;

    fn unmount(&self, path: &Path) -> Result<(), MountError>;

    /// Resolve and validate a device node.
    fn stat_device(&self, path: &Path) -> Result<Device, DeviceError> {
        device::resolve(path)
    }
}
