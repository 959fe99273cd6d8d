//! `csi-blockdevices`: serve the block-device CSI plugin over QUIC.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libcsi_blockdev::identity::PLUGIN_NAME;
use libcsi_blockdev::transport::server::CsiServer;
use libcsi_blockdev::{BlockDeviceBackend, Config, filesystems};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

mod tls;

#[derive(Debug, Parser)]
#[command(name = "csi-blockdevices", version, about)]
struct Cli {
    /// UDP address the QUIC endpoint binds to.
    #[arg(long, default_value = "0.0.0.0:7443")]
    listen: SocketAddr,

    /// PEM certificate chain presented to clients.
    #[arg(long)]
    cert: PathBuf,

    /// PEM private key of the certificate.
    #[arg(long)]
    key: PathBuf,

    /// Overrides X_CSI_BD_DEVDIR.
    #[arg(long)]
    device_dir: Option<PathBuf>,

    /// Overrides X_CSI_PRIVATE_MOUNT_DIR.
    #[arg(long)]
    private_dir: Option<PathBuf>,
}

impl Cli {
    fn config(&self) -> Config {
        let mut config = Config::from_env();
        if let Some(dir) = &self.device_dir {
            config.device_dir = dir.clone();
        }
        if let Some(dir) = &self.private_dir {
            config.private_dir = dir.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("csi_blockdevices=info,libcsi_blockdev=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    info!(
        device_dir = %config.device_dir.display(),
        private_dir = %config.private_dir.display(),
        node_id = %config.node_id,
        "configured {PLUGIN_NAME}"
    );
    if let Err(e) = filesystems::supported(&config.bin_dir) {
        warn!(error = %e, "host cannot format volumes; NodeProbe will fail");
    }

    let tls = tls::server_config(&cli.cert, &cli.key)?;
    let backend = Arc::new(BlockDeviceBackend::new(config));
    let server = CsiServer::new(cli.listen, tls, backend)
        .with_context(|| format!("binding {}", cli.listen))?;

    tokio::select! {
        res = server.serve() => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            server.shutdown();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_environment_dirs() {
        let cli = Cli::try_parse_from([
            "csi-blockdevices",
            "--cert",
            "/etc/csi/tls.crt",
            "--key",
            "/etc/csi/tls.key",
            "--device-dir",
            "/srv/devs",
        ])
        .unwrap();
        assert_eq!(cli.listen, "0.0.0.0:7443".parse::<SocketAddr>().unwrap());

        let config = cli.config();
        assert_eq!(config.device_dir, PathBuf::from("/srv/devs"));
        assert!(cli.private_dir.is_none());
    }

    #[test]
    fn certificate_flags_are_required() {
        assert!(Cli::try_parse_from(["csi-blockdevices"]).is_err());
    }
}
