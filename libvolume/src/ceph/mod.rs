//! Cluster-side operations.
//!
//! [`CephCluster`] issues the management CLI commands through a
//! [`CommandRunner`] and turns their line-oriented reports into structured
//! state. [`Mounter`] attaches and detaches filesystem subtrees on the host.

mod filesystem;
mod report;
mod volume;

use std::sync::Arc;

use crate::runner::CommandRunner;

pub use report::{parse_filesystems, parse_pools};
pub use volume::Mounter;

/// Handle on the cluster management CLI.
#[derive(Clone)]
pub struct CephCluster {
    runner: Arc<dyn CommandRunner>,
    cli: String,
}

impl CephCluster {
    /// * `runner`: executes the CLI
    /// * `cli`: program name, normally `ceph`
    pub fn new(runner: Arc<dyn CommandRunner>, cli: impl Into<String>) -> Self {
        Self {
            runner,
            cli: cli.into(),
        }
    }

    async fn cli(&self, args: &[&str]) -> Result<String, crate::error::VolumeError> {
        self.runner.run(&self.cli, args).await
    }
}

impl std::fmt::Debug for CephCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CephCluster").field("cli", &self.cli).finish()
    }
}
