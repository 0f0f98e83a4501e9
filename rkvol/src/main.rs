//! `rkvol`: volume plugin daemon serving CephFS subtrees to the container
//! runtime over the plugin socket.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use libvolume::{CephFsDriver, CommandRunner, DriverConfig, PluginServer, SystemRunner};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{Level, debug, info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "rkvol", version, about = "CephFS volume plugin for Docker")]
struct Args {
    /// Unix socket the plugin listens on
    #[arg(long, env = "PLUGIN_SOCKET", default_value = "/run/docker/plugins/cephfs.sock")]
    socket: PathBuf,

    /// Root directory for volume mountpoints
    #[arg(long, env = "DEFAULT_PATH", default_value = "/var/lib/docker/volumes/_cephfs")]
    default_path: PathBuf,

    /// Monitor address used as mount source, e.g. 10.0.0.1:6789
    #[arg(long, env = "DEFAULT_MONITOR", default_value = "")]
    monitor: String,

    /// Cluster user for mounts
    #[arg(long, env = "CEPH_USER", default_value = "admin")]
    user: String,

    /// Secret file of the cluster user
    #[arg(long, env = "CEPH_SECRETFILE", default_value = "/etc/ceph/admin.secret")]
    secret_file: PathBuf,

    /// Cluster management CLI
    #[arg(long, env = "CEPH_CLI", default_value = "ceph")]
    ceph_cli: String,

    /// Deadline for every external command, in seconds
    #[arg(long, env = "COMMAND_TIMEOUT_SECS", default_value_t = 30)]
    command_timeout_secs: u64,

    /// trace|debug|info|warn|error, or 3 (debug) / 2 (info) / 1 (warn) / 0 (error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// File logs are appended to
    #[arg(long, env = "LOG_FILE", default_value = "/var/log/docker-volume-cephfs.log")]
    log_file: PathBuf,
}

impl Args {
    fn driver_config(&self) -> DriverConfig {
        DriverConfig::new(&self.default_path)
            .with_monitor(&self.monitor)
            .with_auth(&self.user, &self.secret_file)
            .with_cluster_cli(&self.ceph_cli)
            .with_command_timeout(Duration::from_secs(self.command_timeout_secs))
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    info!("starting CephFS volume plugin");
    info!(socket = %args.socket.display(), "plugin socket");
    info!(
        default_path = %args.default_path.display(),
        monitor = %args.monitor,
        user = %args.user,
        "cluster settings"
    );

    if !nix::unistd::getuid().is_root() {
        warn!("not running as root, mount and umount will probably fail");
    }
    if args.monitor.is_empty() {
        warn!("no monitor address configured (DEFAULT_MONITOR), mounts will fail");
    }

    let config = args.driver_config();
    tokio::fs::create_dir_all(&config.default_path)
        .await
        .with_context(|| {
            format!(
                "failed to create volume root {}",
                config.default_path.display()
            )
        })?;

    let runner = Arc::new(SystemRunner::new(config.command_timeout));
    check_host_filesystem(runner.as_ref(), &config.default_path).await;

    let driver = Arc::new(CephFsDriver::new(config, runner));
    let server = PluginServer::bind(&args.socket, driver)
        .await
        .with_context(|| format!("failed to bind plugin socket {}", args.socket.display()))?;

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    server
        .serve(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                _ = terminate.recv() => info!("received SIGTERM"),
            }
        })
        .await
        .context("plugin server failed")?;

    info!("CephFS volume plugin stopped");
    Ok(())
}

/// Warn when the volume root does not live on a CephFS mount. Volumes still
/// work, but the host path is then ordinary local storage.
async fn check_host_filesystem(runner: &dyn CommandRunner, path: &Path) {
    let target = path.to_string_lossy();
    match runner
        .run("df", &["--no-sync", "--output=fstype", &target])
        .await
    {
        Ok(out) => {
            let fs_type = out.lines().map(str::trim).filter(|l| !l.is_empty()).last();
            match fs_type {
                Some(t) if t.contains("ceph") => debug!(fs_type = t, "volume root is on cephfs"),
                other => warn!(
                    path = %path.display(),
                    fs_type = other.unwrap_or("unknown"),
                    "volume root is not on a ceph filesystem"
                ),
            }
        }
        Err(e) => warn!(path = %path.display(), error = %e, "unable to determine filesystem type"),
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn parse_level(level: &str) -> Level {
    match level.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" | "3" => Level::DEBUG,
        "info" | "2" => Level::INFO,
        "warn" | "1" => Level::WARN,
        "error" => Level::ERROR,
        numeric if numeric.parse::<i64>().is_ok() => Level::ERROR,
        _ => Level::INFO,
    }
}

fn init_logging(args: &Args) {
    let level = parse_level(&args.log_level);
    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap_or_else(|_| level.into()));

    let (writer, fallback) = match OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log_file)
    {
        Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), None),
        Err(e) => (BoxMakeWriter::new(std::io::stderr), Some(e)),
    };

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_ansi(false).with_writer(writer))
            .init();
    }

    if let Some(e) = fallback {
        warn!(
            path = %args.log_file.display(),
            error = %e,
            "cannot open log file, logging to stderr"
        );
    }
}
