//! Linux implementation of [`Mounter`].
//!
//! The mount table comes from `/proc/self/mountinfo`, which unlike
//! `/proc/self/mounts` carries the root of every bind mount.  Mounts are
//! performed with `mount(2)` through `nix`; filesystem probing and creation
//! use `blkid` and `mkfs.<type>`.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::mount::{MsFlags, mount, umount};
use tracing::{debug, info, warn};

use super::{MountError, MountRecord, Mounter};

/// Filesystem used when a request leaves the type empty and the device
/// carries no filesystem yet.
pub const DEFAULT_FS_TYPE: &str = "ext4";

const MOUNTINFO: &str = "/proc/self/mountinfo";

/// [`Mounter`] backed by the running kernel.
#[derive(Debug, Clone)]
pub struct HostMounter {
    mountinfo: PathBuf,
}

impl Default for HostMounter {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMounter {
    pub fn new() -> Self {
        Self {
            mountinfo: PathBuf::from(MOUNTINFO),
        }
    }

    /// Read the mount table from another mountinfo file, e.g. the one of a
    /// different mount namespace under `/proc/<pid>/mountinfo`.
    pub fn with_mountinfo(path: impl Into<PathBuf>) -> Self {
        Self {
            mountinfo: path.into(),
        }
    }

    /// Resolve an empty filesystem type to what the device already holds,
    /// falling back to [`DEFAULT_FS_TYPE`].
    fn effective_fs_type(&self, src: &Path, fs_type: &str) -> Result<String, MountError> {
        if !fs_type.is_empty() {
            return Ok(fs_type.to_owned());
        }
        Ok(probe_fs_type(src)?.unwrap_or_else(|| DEFAULT_FS_TYPE.to_owned()))
    }
}

impl Mounter for HostMounter {
    fn mounts(&self) -> Result<Vec<MountRecord>, MountError> {
        let contents = fs::read_to_string(&self.mountinfo).map_err(|e| MountError::Io {
            context: format!("reading {}", self.mountinfo.display()),
            source: e,
        })?;
        Ok(parse_mountinfo(&contents))
    }

    fn bind_mount(&self, src: &Path, dst: &Path, opts: &[String]) -> Result<(), MountError> {
        mount(
            Some(src),
            dst,
            None::<&str>,
            MsFlags::MS_BIND,
            None::<&str>,
        )
        .map_err(|e| MountError::Syscall {
            op: "bind mount",
            path: dst.to_path_buf(),
            source: e,
        })?;

        if opts.is_empty() {
            debug!(src = %src.display(), dst = %dst.display(), "bind mounted");
            return Ok(());
        }

        // Per-mount flags on a bind only take effect through a remount.
        let (flags, _) = parse_options(opts);
        let remount = mount(
            None::<&str>,
            dst,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REMOUNT | flags,
            None::<&str>,
        );
        if let Err(e) = remount {
            if let Err(undo) = umount(dst) {
                warn!(dst = %dst.display(), error = %undo, "failed to undo bind mount");
            }
            return Err(MountError::Syscall {
                op: "remount bind",
                path: dst.to_path_buf(),
                source: e,
            });
        }
        debug!(src = %src.display(), dst = %dst.display(), ?opts, "bind mounted");
        Ok(())
    }

    fn mount(
        &self,
        src: &Path,
        dst: &Path,
        fs_type: &str,
        opts: &[String],
    ) -> Result<(), MountError> {
        let fs_type = self.effective_fs_type(src, fs_type)?;
        let (flags, data) = parse_options(opts);
        mount(
            Some(src),
            dst,
            Some(fs_type.as_str()),
            flags,
            data.as_deref(),
        )
        .map_err(|e| MountError::Syscall {
            op: "mount",
            path: dst.to_path_buf(),
            source: e,
        })?;
        debug!(src = %src.display(), dst = %dst.display(), %fs_type, ?opts, "mounted");
        Ok(())
    }

    fn format_and_mount(
        &self,
        src: &Path,
        dst: &Path,
        fs_type: &str,
        opts: &[String],
    ) -> Result<(), MountError> {
        let requested = if fs_type.is_empty() {
            DEFAULT_FS_TYPE
        } else {
            fs_type
        };
        if needs_format(src, probe_fs_type(src)?, requested)? {
            format(src, requested)?;
        }
        self.mount(src, dst, requested, opts)
    }

    fn unmount(&self, path: &Path) -> Result<(), MountError> {
        umount(path).map_err(|e| MountError::Syscall {
            op: "unmount",
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(path = %path.display(), "unmounted");
        Ok(())
    }
}

/// Return the filesystem type on `device`, or `None` when it carries none.
fn probe_fs_type(device: &Path) -> Result<Option<String>, MountError> {
    let output = Command::new("blkid")
        .args(["-p", "-s", "TYPE", "-o", "value"])
        .arg(device)
        .output()
        .map_err(|e| MountError::Io {
            context: "running blkid".to_owned(),
            source: e,
        })?;

    match output.status.code() {
        Some(0) => {
            let fs = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            Ok((!fs.is_empty()).then_some(fs))
        }
        // blkid exits with 2 when nothing was detected.
        Some(2) => Ok(None),
        _ => Err(MountError::Command {
            program: "blkid".to_owned(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        }),
    }
}

/// Decide whether `device`, currently holding `found`, has to be formatted
/// before it can be mounted as `requested`.  A device that already carries
/// another filesystem is never reformatted.
fn needs_format(
    device: &Path,
    found: Option<String>,
    requested: &str,
) -> Result<bool, MountError> {
    match found {
        None => Ok(true),
        Some(found) if found == requested => Ok(false),
        Some(found) => Err(MountError::FsMismatch {
            device: device.to_path_buf(),
            found,
            requested: requested.to_owned(),
        }),
    }
}

fn format(device: &Path, fs_type: &str) -> Result<(), MountError> {
    let program = format!("mkfs.{fs_type}");
    let mut cmd = Command::new(&program);
    if fs_type.starts_with("ext") {
        cmd.args(["-F", "-m0"]);
    }
    let output = cmd.arg(device).output().map_err(|e| MountError::Io {
        context: format!("running {program}"),
        source: e,
    })?;
    if !output.status.success() {
        return Err(MountError::Command {
            program,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        });
    }
    info!(device = %device.display(), %fs_type, "formatted device");
    Ok(())
}

/// Split mount options into `mount(2)` flags and the filesystem data string.
pub(crate) fn parse_options(opts: &[String]) -> (MsFlags, Option<String>) {
    let mut flags = MsFlags::empty();
    let mut data = Vec::new();
    for opt in opts {
        match opt.as_str() {
            "ro" => flags.insert(MsFlags::MS_RDONLY),
            "rw" => flags.remove(MsFlags::MS_RDONLY),
            "nosuid" => flags.insert(MsFlags::MS_NOSUID),
            "nodev" => flags.insert(MsFlags::MS_NODEV),
            "noexec" => flags.insert(MsFlags::MS_NOEXEC),
            "sync" => flags.insert(MsFlags::MS_SYNCHRONOUS),
            "dirsync" => flags.insert(MsFlags::MS_DIRSYNC),
            "noatime" => flags.insert(MsFlags::MS_NOATIME),
            "nodiratime" => flags.insert(MsFlags::MS_NODIRATIME),
            "relatime" => flags.insert(MsFlags::MS_RELATIME),
            "strictatime" => flags.insert(MsFlags::MS_STRICTATIME),
            "defaults" | "suid" | "dev" | "exec" | "async" | "atime" | "diratime" => {}
            other => data.push(other),
        }
    }
    let data = (!data.is_empty()).then(|| data.join(","));
    (flags, data)
}

/// Parse the contents of a `mountinfo` file.  Malformed lines are skipped.
pub(crate) fn parse_mountinfo(contents: &str) -> Vec<MountRecord> {
    contents.lines().filter_map(parse_mountinfo_line).collect()
}

// 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue
fn parse_mountinfo_line(line: &str) -> Option<MountRecord> {
    let (left, right) = line.split_once(" - ")?;
    let left: Vec<&str> = left.split_whitespace().collect();
    let right: Vec<&str> = right.split_whitespace().collect();
    if left.len() < 6 || right.len() < 2 {
        return None;
    }
    Some(MountRecord {
        source: unescape(right[1]),
        mount_point: PathBuf::from(unescape(left[4])),
        fs_type: right[0].to_owned(),
        mount_opts: left[5].split(',').map(str::to_owned).collect(),
        root: unescape(left[3]),
    })
}

/// Decode the `\NNN` octal escapes the kernel uses for whitespace and
/// backslashes in mountinfo fields.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let code = bytes[i + 1..i + 4]
                .iter()
                .fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'));
            out.push(code as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
