//! CSI Identity service trait.
//!
//! The Identity service lets callers discover plugin metadata and check
//! that the plugin can operate on this host.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{PluginCapability, PluginInfo};

/// Name the plugin registers under.
pub const PLUGIN_NAME: &str = "rk8s.blockdevices.csi";

/// Identity service: plugin discovery and health probing.
#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Return the plugin name and version.
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError>;

    /// Liveness probe.  Returns `true` when the plugin is ready to serve.
    async fn probe(&self) -> Result<bool, CsiError>;

    /// Advertise the services this plugin provides.
    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError>;
}
