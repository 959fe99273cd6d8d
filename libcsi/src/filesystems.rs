//! Which filesystems this host can create.
//!
//! A filesystem counts as supported when its `mkfs.<type>` helper is
//! installed and the type is one the plugin is willing to format.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

/// Directory searched for `mkfs.*` helpers.
pub const DEFAULT_BIN_DIR: &str = "/sbin";

const FORMATTABLE: [&str; 4] = ["btrfs", "ext3", "ext4", "xfs"];

#[derive(Debug, Error)]
pub enum SupportError {
    #[error("plugin only supported on Linux, not {0}")]
    UnsupportedOs(&'static str),

    #[error("no supported filesystems found in {0}")]
    NoFilesystems(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Filesystems with a `mkfs.<type>` helper in `bin_dir`, limited to the
/// formattable set and sorted.  A missing `bin_dir` yields an empty list.
pub fn host_filesystems(bin_dir: &Path) -> Result<Vec<String>, SupportError> {
    let entries = match fs::read_dir(bin_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(SupportError::Io {
                path: bin_dir.to_path_buf(),
                source,
            });
        }
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SupportError::Io {
            path: bin_dir.to_path_buf(),
            source,
        })?;
        let name = entry.file_name();
        let Some(fs_type) = name.to_str().and_then(|n| n.strip_prefix("mkfs.")) else {
            continue;
        };
        debug!(binary = %entry.path().display(), "found mkfs helper");
        if FORMATTABLE.contains(&fs_type) {
            found.push(fs_type.to_owned());
        }
    }
    found.sort();
    found.dedup();

    info!(bin_dir = %bin_dir.display(), filesystems = ?found, "found supported filesystems");
    Ok(found)
}

/// Check that this host can run the plugin at all, looking for `mkfs.*`
/// helpers in `bin_dir`.
pub fn supported(bin_dir: &Path) -> Result<(), SupportError> {
    if std::env::consts::OS != "linux" {
        return Err(SupportError::UnsupportedOs(std::env::consts::OS));
    }
    if host_filesystems(bin_dir)?.is_empty() {
        return Err(SupportError::NoFilesystems(bin_dir.to_path_buf()));
    }
    Ok(())
}
