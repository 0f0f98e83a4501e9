//! Filesystem existence checks and creation.

use std::path::PathBuf;

use tracing::{debug, info, instrument};

use super::CephCluster;
use crate::error::VolumeError;
use crate::types::Filesystem;

impl CephCluster {
    /// `true` iff the cluster lists a filesystem named `fs.name`.
    pub async fn filesystem_exists(&self, fs: &Filesystem) -> Result<bool, VolumeError> {
        let filesystems = self.list_filesystems().await?;
        Ok(filesystems.iter().any(|existing| existing.name == fs.name))
    }

    /// Create a filesystem on existing pools and confirm it took effect.
    ///
    /// A creation command that exits zero without the filesystem showing up
    /// afterwards is reported as [`VolumeError::FilesystemNotFound`].
    #[instrument(skip(self, mount_path))]
    pub async fn create_filesystem(
        &self,
        name: &str,
        mount_path: impl Into<PathBuf>,
        data_pool: &str,
        meta_pool: &str,
    ) -> Result<Filesystem, VolumeError> {
        let fs = Filesystem::new(name, mount_path, data_pool, meta_pool);

        if !self.pools_exist(&[meta_pool, data_pool]).await? {
            return Err(VolumeError::MissingPool(format!("{meta_pool}, {data_pool}")));
        }

        let out = self
            .cli(&["fs", "new", name, meta_pool, data_pool])
            .await
            .map_err(VolumeError::into_cluster_error)?;
        debug!(output = %out.trim(), "filesystem creation command finished");

        if !self.filesystem_exists(&fs).await? {
            return Err(VolumeError::FilesystemNotFound(name.to_owned()));
        }

        info!(filesystem = %name, "filesystem created");
        Ok(fs)
    }
}
