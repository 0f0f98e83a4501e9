//! Driver configuration.
//!
//! Built once by the entry point and handed to
//! [`CephFsDriver::new`](crate::backend::CephFsDriver::new).

use std::path::PathBuf;
use std::time::Duration;

/// Default deadline for every external command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings consumed by the driver and the cluster/mount helpers.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Root under which volumes without an explicit `path` are mounted.
    pub default_path: PathBuf,
    /// Monitor address used as the mount source prefix.
    pub monitor: String,
    /// Cluster user to authenticate mounts with.
    pub user: String,
    /// File holding the user's secret.
    pub secret_file: PathBuf,
    /// Directory under which filesystem roots are mounted for discovery.
    pub staging_path: PathBuf,
    /// Mount table consulted to decide whether a path is mounted.
    pub mount_table: PathBuf,
    /// Deadline applied to every external command.
    pub command_timeout: Duration,
    /// Cluster management CLI.
    pub cluster_cli: String,
    /// Filesystem type passed to `mount -t`.
    pub fs_type: String,
}

impl DriverConfig {
    /// Configuration with the given volume root and the usual defaults for
    /// everything else.
    pub fn new(default_path: impl Into<PathBuf>) -> Self {
        let default_path = default_path.into();
        Self {
            staging_path: default_path.join(".discovery"),
            default_path,
            monitor: String::new(),
            user: "admin".to_owned(),
            secret_file: PathBuf::from("/etc/ceph/admin.secret"),
            mount_table: PathBuf::from("/proc/self/mounts"),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            cluster_cli: "ceph".to_owned(),
            fs_type: "ceph".to_owned(),
        }
    }

    pub fn with_monitor(mut self, monitor: impl Into<String>) -> Self {
        self.monitor = monitor.into();
        self
    }

    pub fn with_auth(mut self, user: impl Into<String>, secret_file: impl Into<PathBuf>) -> Self {
        self.user = user.into();
        self.secret_file = secret_file.into();
        self
    }

    pub fn with_mount_table(mut self, mount_table: impl Into<PathBuf>) -> Self {
        self.mount_table = mount_table.into();
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_cluster_cli(mut self, cli: impl Into<String>) -> Self {
        self.cluster_cli = cli.into();
        self
    }
}
