//! Plugin configuration.

use std::path::PathBuf;

use tracing::warn;

use crate::filesystems::DEFAULT_BIN_DIR;

/// Directory holding one entry (device node or symlink) per volume.
pub const ENV_DEVICE_DIR: &str = "X_CSI_BD_DEVDIR";
/// Directory holding the per-volume staging mounts.
pub const ENV_PRIVATE_DIR: &str = "X_CSI_PRIVATE_MOUNT_DIR";
/// Node identifier reported by `GetNodeInfo`.
pub const ENV_NODE_ID: &str = "X_CSI_BD_NODEID";

pub const DEFAULT_DEVICE_DIR: &str = "/dev/disk/csi-blockdevices";
pub const DEFAULT_PRIVATE_DIR: &str = "/dev/disk/csi-bd-private";

/// Settings the block-device backend runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub device_dir: PathBuf,
    pub private_dir: PathBuf,
    pub node_id: String,
    /// Where `mkfs.*` helpers are looked up when validating filesystems.
    pub bin_dir: PathBuf,
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.  Unset and
    /// empty variables fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        Self {
            device_dir: var(ENV_DEVICE_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DEVICE_DIR)),
            private_dir: var(ENV_PRIVATE_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PRIVATE_DIR)),
            node_id: var(ENV_NODE_ID).unwrap_or_else(host_name),
            bin_dir: PathBuf::from(DEFAULT_BIN_DIR),
        }
    }
}

fn host_name() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            warn!(error = %e, "unable to read host name, node id left empty");
            String::new()
        }
    }
}
