//! Parsing of the cluster's filesystem and pool reports.
//!
//! `ceph fs ls` prints one filesystem per line:
//!
//! ```text
//! name: cephfs, metadata pool: cephfs_metadata, data pools: [cephfs_data ]
//! ```
//!
//! and `ceph osd pool ls` prints one pool name per line. Both parsers fail
//! closed on anything they do not understand.

use tracing::debug;

use super::CephCluster;
use crate::error::VolumeError;
use crate::types::Filesystem;

const PROPERTY_SEPARATOR: &str = ", ";
const VALUE_SEPARATOR: &str = ": ";
const PROPERTIES_PER_LINE: usize = 3;
const NO_FILESYSTEMS: &str = "No filesystems enabled";

/// Parse a filesystem report.
///
/// Each non-blank line must carry exactly three `key: value` properties.
/// `name`, `metadata pool` and `data pools` populate the record; other keys
/// are ignored. Mount paths are left empty for the caller to assign.
pub fn parse_filesystems(report: &str) -> Result<Vec<Filesystem>, VolumeError> {
    let mut filesystems = Vec::new();

    for line in report.lines() {
        let line = line.trim();
        if line.is_empty() || line == NO_FILESYSTEMS {
            continue;
        }

        let properties: Vec<&str> = line.split(PROPERTY_SEPARATOR).collect();
        if properties.len() != PROPERTIES_PER_LINE {
            return Err(malformed(line));
        }

        let mut fs = Filesystem::default();
        for property in properties {
            let Some((key, value)) = property.split_once(VALUE_SEPARATOR) else {
                return Err(malformed(line));
            };
            match key.trim() {
                "name" => fs.name = value.trim().to_owned(),
                "metadata pool" => fs.meta_pool = value.trim().to_owned(),
                "data pools" => fs.data_pool = first_data_pool(value),
                _ => {}
            }
        }
        filesystems.push(fs);
    }

    Ok(filesystems)
}

/// Parse a pool report. An empty report is an error.
pub fn parse_pools(report: &str) -> Result<Vec<String>, VolumeError> {
    let pools: Vec<String> = report
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect();

    if pools.is_empty() {
        return Err(VolumeError::NoPoolsReported);
    }
    Ok(pools)
}

/// `[cephfs_data extra_pool ]` -> `cephfs_data`.
fn first_data_pool(value: &str) -> String {
    value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_owned()
}

fn malformed(line: &str) -> VolumeError {
    VolumeError::MalformedClusterReport {
        line: line.to_owned(),
    }
}

impl CephCluster {
    /// All filesystems the cluster reports, in report order.
    pub async fn list_filesystems(&self) -> Result<Vec<Filesystem>, VolumeError> {
        let out = self.cli(&["fs", "ls"]).await?;
        let filesystems = parse_filesystems(&out)?;
        debug!(count = filesystems.len(), "listed cluster filesystems");
        Ok(filesystems)
    }

    /// All pool names the cluster reports.
    pub async fn list_pools(&self) -> Result<Vec<String>, VolumeError> {
        let out = self.cli(&["osd", "pool", "ls"]).await?;
        parse_pools(&out)
    }

    /// `true` iff every name in `names` is a pool on the cluster.
    pub async fn pools_exist(&self, names: &[&str]) -> Result<bool, VolumeError> {
        let pools = self.list_pools().await?;
        Ok(names
            .iter()
            .all(|name| pools.iter().any(|pool| pool == name)))
    }
}
