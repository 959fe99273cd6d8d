//! # libcsi-blockdev: pre-existing block devices as CSI volumes
//!
//! `libcsi-blockdev` is a [Container Storage Interface][csi] plugin that
//! exposes host block devices as volumes.  Every entry of a configured
//! device directory is a volume; publishing mounts the device once at a
//! private staging point and bind-mounts that onto each workload target.
//! Requests travel over QUIC (via [`quinn`]) instead of gRPC.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `VolumeId`, capabilities, requests. |
//! | [`error`] | [`CsiError`] enum covering all failure kinds. |
//! | [`config`] | [`Config`]: device and private directories, node id. |
//! | [`device`] | Device directory listing and symlink resolution. |
//! | [`mount`] | [`Mounter`] trait, Linux implementation, mount-table view. |
//! | [`lifecycle`] | Publish / unpublish state machine. |
//! | [`lock`] | Per-volume mutual exclusion. |
//! | [`filesystems`] | Filesystems the host can format. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & health. |
//! | [`controller`] | [`CsiController`] trait: volume listing & validation. |
//! | [`node`] | [`CsiNode`] trait: publish, unpublish, probe. |
//! | [`transport`] | QUIC client/server built on `quinn`. |
//! | [`backend`] | [`BlockDeviceBackend`], the service implementation. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod filesystems;
pub mod identity;
pub mod lifecycle;
pub mod lock;
pub mod message;
pub mod mount;
pub mod node;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::BlockDeviceBackend;
pub use config::Config;
pub use controller::CsiController;
pub use error::CsiError;
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use mount::{HostMounter, Mounter};
pub use node::CsiNode;
pub use types::*;
