//! Per-device view of the host mount table.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{MountError, MountRecord, Mounter};
use crate::device::Device;

/// A validated mount-table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// The table's recorded source field: a device path or a pseudo
    /// filesystem name such as `devtmpfs`.
    pub device: String,
    /// Real source after bind-mount aliasing.
    pub source: PathBuf,
    /// Mount point.
    pub path: PathBuf,
    pub fs_type: String,
    pub opts: BTreeSet<String>,
}

impl MountEntry {
    pub fn has_opt(&self, opt: &str) -> bool {
        self.opts.contains(opt)
    }
}

fn is_pseudo_fs(fs_type: &str) -> bool {
    fs_type.eq_ignore_ascii_case("devtmpfs") || fs_type.eq_ignore_ascii_case("tmpfs")
}

/// `mount_point` + `root`, treating `root` as relative.
fn join_root(mount_point: &Path, root: &str) -> PathBuf {
    match root.trim_start_matches('/') {
        "" => mount_point.to_path_buf(),
        rel => mount_point.join(rel),
    }
}

/// Validate raw rows and resolve bind-mount aliases.
///
/// A row is kept when its filesystem is `devtmpfs`/`tmpfs` or its source is
/// an absolute path.  The first kept row for a given raw source anchors that
/// source; every later row with the same raw source gets
/// `anchor.mount_point + root` as its real source.
pub fn scan(records: Vec<MountRecord>) -> Vec<MountEntry> {
    let mut anchors: HashMap<String, PathBuf> = HashMap::new();
    let mut entries = Vec::with_capacity(records.len());

    for rec in records {
        if !is_pseudo_fs(&rec.fs_type) && !rec.source.starts_with('/') {
            continue;
        }

        let source = match anchors.get(&rec.source) {
            Some(anchor) => join_root(anchor, &rec.root),
            None => {
                anchors.insert(rec.source.clone(), rec.mount_point.clone());
                PathBuf::from(&rec.source)
            }
        };

        entries.push(MountEntry {
            device: rec.source,
            source,
            path: rec.mount_point,
            fs_type: rec.fs_type,
            opts: rec.mount_opts.into_iter().collect(),
        });
    }
    entries
}

/// Every valid mount on the host.
pub fn all_mounts<M: Mounter + ?Sized>(mounter: &M) -> Result<Vec<MountEntry>, MountError> {
    Ok(scan(mounter.mounts()?))
}

/// Every mount that references `device`, in table order.
///
/// Pseudo-filesystem rows (a block device bind-mounted out of `/dev`)
/// reference the device only through their resolved source.
pub fn mounts_for_device<M: Mounter + ?Sized>(
    mounter: &M,
    device: &Device,
) -> Result<Vec<MountEntry>, MountError> {
    let mounts: Vec<MountEntry> = all_mounts(mounter)?
        .into_iter()
        .filter(|m| references(m, &device.real_path))
        .collect();
    debug!(device = %device.real_path.display(), count = mounts.len(), "device mounts");
    Ok(mounts)
}

fn references(entry: &MountEntry, real_path: &Path) -> bool {
    Path::new(&entry.device) == real_path
        || ((entry.device == "devtmpfs" || entry.device == "tmpfs") && entry.source == real_path)
}
