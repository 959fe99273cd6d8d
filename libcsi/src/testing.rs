//! In-memory [`Mounter`] and scratch directories for lifecycle tests.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tempfile::TempDir;

use crate::device::{Device, DeviceError};
use crate::mount::{MountError, MountRecord, Mounter};
use crate::types::{NodePublishVolumeRequest, VolumeCapability, VolumeId};

/// Device node every [`FakeMounter`] knows about.
pub const FAKE_DEVICE: &str = "/dev/fakeblk0";

/// A mutating call received by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Bind {
        src: PathBuf,
        dst: PathBuf,
        opts: Vec<String>,
    },
    Mount {
        src: PathBuf,
        dst: PathBuf,
        fs_type: String,
        opts: Vec<String>,
    },
    FormatAndMount {
        src: PathBuf,
        dst: PathBuf,
        fs_type: String,
        opts: Vec<String>,
    },
    Unmount(PathBuf),
}

/// Records calls and keeps a mount table that changes the way the kernel's
/// would.  Starts with `devtmpfs` mounted on `/dev`.
pub struct FakeMounter {
    table: Mutex<Vec<MountRecord>>,
    calls: Mutex<Vec<Call>>,
    fail_next: AtomicBool,
    format_delay: Mutex<Duration>,
    /// Entry path -> device node accepted by `stat_device`.
    devices: Mutex<HashMap<PathBuf, PathBuf>>,
}

impl FakeMounter {
    pub fn new() -> Self {
        let fake = Self {
            table: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
            format_delay: Mutex::new(Duration::ZERO),
            devices: Mutex::new(HashMap::new()),
        };
        fake.add_device(FAKE_DEVICE, FAKE_DEVICE);
        fake.seed("devtmpfs", "/dev", "devtmpfs", &["rw", "nosuid"], "/");
        fake
    }

    /// Append a row to the table without recording a call.
    pub fn seed(
        &self,
        source: &str,
        mount_point: impl AsRef<Path>,
        fs_type: &str,
        opts: &[&str],
        root: &str,
    ) {
        self.table.lock().unwrap().push(MountRecord {
            source: source.to_owned(),
            mount_point: mount_point.as_ref().to_path_buf(),
            fs_type: fs_type.to_owned(),
            mount_opts: opts.iter().map(|o| (*o).to_owned()).collect(),
            root: root.to_owned(),
        });
    }

    /// Make `entry` resolve to the device node `real_path`.
    pub fn add_device(&self, entry: impl AsRef<Path>, real_path: impl AsRef<Path>) {
        self.devices.lock().unwrap().insert(
            entry.as_ref().to_path_buf(),
            real_path.as_ref().to_path_buf(),
        );
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Make the next mutating call fail without touching the table.
    pub fn fail_next_mount(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Make every `format_and_mount` block for `delay` before it mounts,
    /// like a slow `mkfs` would.
    pub fn slow_format(&self, delay: Duration) {
        *self.format_delay.lock().unwrap() = delay;
    }

    pub fn mounts_at(&self, path: &Path) -> usize {
        self.table
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.mount_point == path)
            .count()
    }

    fn record(&self, call: Call) -> Result<(), MountError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(MountError::Io {
                context: format!("{call:?}"),
                source: io::Error::other("injected failure"),
            });
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }

    fn push_mount(&self, src: &Path, dst: &Path, fs_type: &str, opts: &[String]) {
        self.table.lock().unwrap().push(MountRecord {
            source: src.to_string_lossy().into_owned(),
            mount_point: dst.to_path_buf(),
            fs_type: fs_type.to_owned(),
            mount_opts: permission_opts(opts),
            root: "/".to_owned(),
        });
    }
}

/// Kernel-style per-mount options: `rw`/`ro` first, then the rest.
fn permission_opts(opts: &[String]) -> Vec<String> {
    let perm = if opts.iter().any(|o| o == "ro") { "ro" } else { "rw" };
    std::iter::once(perm.to_owned())
        .chain(opts.iter().filter(|o| *o != "ro" && *o != "rw").cloned())
        .collect()
}

impl Mounter for FakeMounter {
    fn mounts(&self) -> Result<Vec<MountRecord>, MountError> {
        Ok(self.table.lock().unwrap().clone())
    }

    fn bind_mount(&self, src: &Path, dst: &Path, opts: &[String]) -> Result<(), MountError> {
        self.record(Call::Bind {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            opts: opts.to_vec(),
        })?;

        let mut table = self.table.lock().unwrap();
        let existing = table.iter().rev().find(|r| r.mount_point == src).cloned();
        let row = match existing {
            // Binding a mount point shares its source and root.
            Some(parent) => MountRecord {
                mount_point: dst.to_path_buf(),
                mount_opts: permission_opts(opts),
                ..parent
            },
            // Binding a device node shows up as a slice of devtmpfs.
            None => MountRecord {
                source: "devtmpfs".to_owned(),
                mount_point: dst.to_path_buf(),
                fs_type: "devtmpfs".to_owned(),
                mount_opts: permission_opts(opts),
                root: src
                    .strip_prefix("/dev")
                    .map(|rel| format!("/{}", rel.display()))
                    .unwrap_or_else(|_| src.display().to_string()),
            },
        };
        table.push(row);
        Ok(())
    }

    fn mount(
        &self,
        src: &Path,
        dst: &Path,
        fs_type: &str,
        opts: &[String],
    ) -> Result<(), MountError> {
        self.record(Call::Mount {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            fs_type: fs_type.to_owned(),
            opts: opts.to_vec(),
        })?;
        self.push_mount(src, dst, fs_type, opts);
        Ok(())
    }

    fn format_and_mount(
        &self,
        src: &Path,
        dst: &Path,
        fs_type: &str,
        opts: &[String],
    ) -> Result<(), MountError> {
        let delay = *self.format_delay.lock().unwrap();
        std::thread::sleep(delay);
        self.record(Call::FormatAndMount {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            fs_type: fs_type.to_owned(),
            opts: opts.to_vec(),
        })?;
        self.push_mount(src, dst, fs_type, opts);
        Ok(())
    }

    fn unmount(&self, path: &Path) -> Result<(), MountError> {
        self.record(Call::Unmount(path.to_path_buf()))?;
        let mut table = self.table.lock().unwrap();
        match table.iter().rposition(|r| r.mount_point == path) {
            Some(idx) => {
                table.remove(idx);
                Ok(())
            }
            None => Err(MountError::Io {
                context: format!("unmount {}", path.display()),
                source: io::Error::from_raw_os_error(22),
            }),
        }
    }

    fn stat_device(&self, path: &Path) -> Result<Device, DeviceError> {
        let real_path = self.devices.lock().unwrap().get(path).cloned().ok_or_else(|| {
            DeviceError::NotFound {
                path: path.to_path_buf(),
                source: io::Error::from(io::ErrorKind::NotFound),
            }
        })?;
        Ok(Device {
            full_path: path.to_path_buf(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            real_path,
        })
    }
}

/// Temporary root holding a pre-created `priv` staging directory and the
/// publish targets of a test.
pub struct Workspace {
    root: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("priv")).unwrap();
        Self { root }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn private_dir(&self) -> PathBuf {
        self.root.path().join("priv")
    }

    /// Pre-create a directory target.
    pub fn target_dir(&self, name: &str) -> PathBuf {
        let path = self.root.path().join(name);
        fs::create_dir_all(&path).unwrap();
        path
    }

    /// Pre-create a file target.
    pub fn target_file(&self, name: &str) -> PathBuf {
        let path = self.root.path().join(name);
        fs::write(&path, b"").unwrap();
        path
    }

    pub fn request(
        &self,
        volume_id: &str,
        target: PathBuf,
        capability: VolumeCapability,
    ) -> NodePublishVolumeRequest {
        NodePublishVolumeRequest {
            volume_id: VolumeId::from(volume_id),
            target_path: target.to_string_lossy().into_owned(),
            volume_capability: Some(capability),
        }
    }
}
