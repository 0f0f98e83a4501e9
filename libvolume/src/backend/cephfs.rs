//! CephFS volume driver.
//!
//! [`CephFsDriver`] implements [`VolumePlugin`] by exposing subdirectories of
//! CephFS filesystems as volumes. It keeps a [`Registry`] of the volumes it
//! created and reconciles it with what remote discovery finds whenever the
//! runtime lists volumes.
//!
//! # Local layout
//!
//! ```text
//! <default_path>/
//!   <volume>/              # mountpoint of monitor:/<volume>
//!   .discovery/<fsname>/   # filesystem roots, mounted only while listing
//! ```
//!
//! # Locking
//!
//! Every lifecycle transition first holds the [`KeyedLocks`] entry for the
//! volume name, then the entry for the local path it mounts on. Creating a
//! filesystem additionally holds the entry for the filesystem name. Locks are
//! always taken in that order. The registry lock is never held across
//! external commands.
//!
//! A mountpoint counts as mounted for a volume only when the mount table
//! shows that volume's subtree on it. Any other subtree found there is
//! reported as [`VolumeError::MountpointBusy`].

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use super::registry::Registry;
use crate::ceph::{CephCluster, Mounter};
use crate::config::DriverConfig;
use crate::error::VolumeError;
use crate::locks::KeyedLocks;
use crate::mounts::MountState;
use crate::plugin::VolumePlugin;
use crate::runner::CommandRunner;
use crate::types::*;

/// Volume driver backed by CephFS subtrees.
#[derive(Debug)]
pub struct CephFsDriver {
    config: DriverConfig,
    cluster: CephCluster,
    mounter: Mounter,
    registry: Registry,
    locks: KeyedLocks,
}

fn name_key(name: &str) -> String {
    format!("name:{name}")
}

fn path_key(path: &Path) -> String {
    format!("path:{}", path.display())
}

fn fs_key(name: &str) -> String {
    format!("fs:{name}")
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Create `path` and its parents unless it is already a directory.
async fn ensure_dir(path: &Path) -> Result<(), VolumeError> {
    if is_dir(path).await {
        return Ok(());
    }
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| VolumeError::MkdirFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Delete a volume subtree. A subtree that is already gone is not an error.
async fn remove_subtree(path: &Path) -> Result<(), VolumeError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "volume directory already absent");
            Ok(())
        }
        Err(e) => Err(VolumeError::RemoveFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// Combine the outcome of work done under a temporarily mounted root with the
/// outcome of unmounting it. The work's error wins.
fn settle(
    work: Result<(), VolumeError>,
    unmount: Result<(), VolumeError>,
) -> Result<(), VolumeError> {
    match (work, unmount) {
        (Ok(()), unmounted) => unmounted,
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(unmount_err)) => {
            warn!(error = %unmount_err, "failed to unmount filesystem root after error");
            Err(e)
        }
    }
}

impl CephFsDriver {
    /// Create a driver that runs commands through `runner`.
    pub fn new(config: DriverConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            cluster: CephCluster::new(Arc::clone(&runner), config.cluster_cli.clone()),
            mounter: Mounter::new(runner, &config),
            registry: Registry::new(),
            locks: KeyedLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn lookup(&self, name: &str) -> Result<Volume, VolumeError> {
        self.registry
            .get(name)
            .ok_or_else(|| VolumeError::VolumeNotFound(name.to_owned()))
    }

    /// Whether the volume's own subtree is mounted on its mountpoint.
    async fn is_mounted(&self, volume: &Volume) -> bool {
        self.mounter.state(volume).await == MountState::Mounted
    }

    /// Make sure the volume's filesystem exists, creating it when both pools
    /// were supplied.
    async fn ensure_filesystem(
        &self,
        volume: &Volume,
        options: &CreateOptions,
    ) -> Result<(), VolumeError> {
        let fs = &volume.filesystem;
        let _guard = self.locks.lock(fs_key(&fs.name)).await;

        if self.cluster.filesystem_exists(fs).await? {
            debug!(filesystem = %fs.name, "filesystem exists");
            return Ok(());
        }
        if !options.has_pools() {
            return Err(VolumeError::MissingPoolOption);
        }

        info!(filesystem = %fs.name, "creating new filesystem");
        self.cluster
            .create_filesystem(&fs.name, fs.mount_path.clone(), &fs.data_pool, &fs.meta_pool)
            .await?;
        Ok(())
    }

    /// Mount the filesystem root on the volume's mountpoint, create the
    /// volume directory in it and unmount again.
    async fn provision_subtree(&self, volume: &Volume) -> Result<(), VolumeError> {
        let root = Volume::root(volume.filesystem.clone());
        self.mounter.mount(&root).await?;
        let created = ensure_dir(&volume.absolute_path()).await;
        let unmounted = self.mounter.unmount(&root).await;
        settle(created, unmounted)
    }

    /// Volumes found directly below the root of every cluster filesystem.
    /// Any single failure aborts the whole discovery.
    async fn discover(&self) -> Result<VolumeList, VolumeError> {
        let mut found = VolumeList::new();
        for mut fs in self.cluster.list_filesystems().await? {
            fs.mount_path = self.config.staging_path.join(&fs.name);
            let _guard = self.locks.lock(path_key(&fs.mount_path)).await;
            found.extend(self.mounter.discover_children(&fs).await?);
        }
        Ok(found)
    }

    async fn create_volume(&self, name: &str, options: &CreateOptions) -> Result<(), VolumeError> {
        let volume = options.resolve(name, &self.config.default_path)?;
        let _name_guard = self.locks.lock(name_key(name)).await;

        if let Some(existing) = self.registry.get(name) {
            let holders = self.registry.holders(name);
            if existing != volume && holders > 0 {
                return Err(VolumeError::VolumeInUse {
                    name: name.to_owned(),
                    mounts: holders,
                });
            }
        }

        let mountpoint = volume.mountpoint().to_path_buf();
        let _path_guard = self.locks.lock(path_key(&mountpoint)).await;

        let mounted = match self.mounter.state(&volume).await {
            MountState::Mounted => true,
            MountState::Unmounted => false,
            MountState::Foreign(source_spec) => {
                return Err(VolumeError::MountpointBusy {
                    path: mountpoint,
                    source_spec,
                });
            }
        };

        ensure_dir(&mountpoint).await?;
        self.ensure_filesystem(&volume, options).await?;

        if mounted {
            debug!(mountpoint = %mountpoint.display(), "volume mounted, subtree exists");
        } else {
            self.provision_subtree(&volume).await?;
        }

        self.registry.insert(volume);
        info!(volume = %name, mountpoint = %mountpoint.display(), "volume created");
        Ok(())
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, VolumeError> {
        let remote = self.discover().await?;
        let local = self.registry.snapshot();
        let table = self.mounter.mount_table().await;
        debug!(remote = remote.len(), local = local.len(), "merging volume lists");

        let report = |name: &str, path: PathBuf, subpath: &str, location: Location| {
            let mounted = table.state(&path, subpath) == MountState::Mounted;
            VolumeInfo {
                name: name.to_owned(),
                mountpoint: mounted.then_some(path),
                location: Some(location),
            }
        };

        let mut seen = HashSet::new();
        let mut volumes = Vec::with_capacity(remote.len() + local.len());

        for vol in &remote {
            if !seen.insert(vol.name.clone()) {
                continue;
            }
            volumes.push(match local.by_name(&vol.name) {
                Some(registered) => report(
                    &vol.name,
                    registered.mountpoint().to_path_buf(),
                    &registered.subpath,
                    Location::CephLocal,
                ),
                None => report(
                    &vol.name,
                    join_subpath(&self.config.default_path, &vol.name),
                    &vol.subpath,
                    Location::Ceph,
                ),
            });
        }

        for vol in &local {
            if seen.insert(vol.name.clone()) {
                volumes.push(report(
                    &vol.name,
                    vol.mountpoint().to_path_buf(),
                    &vol.subpath,
                    Location::Local,
                ));
            }
        }

        Ok(volumes)
    }

    async fn remove_volume(&self, name: &str) -> Result<(), VolumeError> {
        let _name_guard = self.locks.lock(name_key(name)).await;
        let volume = self.lookup(name)?;
        let mountpoint = volume.mountpoint().to_path_buf();
        let _path_guard = self.locks.lock(path_key(&mountpoint)).await;

        let holders = self.registry.holders(name);
        if holders > 0 {
            return Err(VolumeError::VolumeInUse {
                name: name.to_owned(),
                mounts: holders,
            });
        }
        if !volume.is_subtree() {
            return Err(VolumeError::RemoveFailed {
                path: volume.absolute_path(),
                reason: "refusing to delete anything but a subtree of the filesystem root"
                    .to_owned(),
            });
        }

        match self.mounter.state(&volume).await {
            MountState::Mounted => self.mounter.unmount(&volume).await?,
            MountState::Foreign(source_spec) => {
                return Err(VolumeError::MountpointBusy {
                    path: mountpoint,
                    source_spec,
                });
            }
            MountState::Unmounted => {}
        }

        ensure_dir(&mountpoint).await?;
        let root = Volume::root(volume.filesystem.clone());
        self.mounter.mount(&root).await?;
        let removed = remove_subtree(&volume.absolute_path()).await;
        if removed.is_ok() {
            self.registry.remove(name);
        }
        let unmounted = self.mounter.unmount(&root).await;
        settle(removed, unmounted)?;

        let shared = self
            .registry
            .snapshot()
            .iter()
            .any(|v| v.mountpoint() == mountpoint);
        if !shared && mountpoint.starts_with(&self.config.default_path) {
            if let Err(e) = tokio::fs::remove_dir(&mountpoint).await {
                warn!(
                    path = %mountpoint.display(),
                    error = %e,
                    "unable to remove local mountpoint"
                );
            }
        }

        info!(volume = %name, "volume removed");
        Ok(())
    }

    async fn mount_volume(&self, id: &str, name: &str) -> Result<PathBuf, VolumeError> {
        let _name_guard = self.locks.lock(name_key(name)).await;
        let volume = self.lookup(name)?;
        let mountpoint = volume.mountpoint().to_path_buf();
        let _path_guard = self.locks.lock(path_key(&mountpoint)).await;

        match self.mounter.state(&volume).await {
            MountState::Mounted => {
                debug!(mountpoint = %mountpoint.display(), "already mounted");
            }
            MountState::Unmounted => {
                ensure_dir(&mountpoint).await?;
                self.mounter.mount(&volume).await?;
                info!(volume = %name, mountpoint = %mountpoint.display(), "volume mounted");
            }
            MountState::Foreign(source_spec) => {
                return Err(VolumeError::MountpointBusy {
                    path: mountpoint,
                    source_spec,
                });
            }
        }

        if !self.registry.attach(name, id) {
            warn!(volume = %name, "volume vanished from registry while mounting");
        }
        Ok(mountpoint)
    }

    async fn unmount_volume(&self, id: &str, name: &str) -> Result<(), VolumeError> {
        let _name_guard = self.locks.lock(name_key(name)).await;
        let volume = self.lookup(name)?;
        let _path_guard = self.locks.lock(path_key(volume.mountpoint())).await;

        let others = self.registry.other_holders(name, id);
        if others > 0 {
            debug!(volume = %name, others, "still held by other callers, keeping mount");
        } else {
            match self.mounter.state(&volume).await {
                MountState::Mounted => {
                    self.mounter.unmount(&volume).await?;
                    info!(volume = %name, "volume unmounted");
                }
                MountState::Foreign(source) => {
                    debug!(
                        volume = %name,
                        %source,
                        "mountpoint carries another subtree, leaving it"
                    );
                }
                MountState::Unmounted => {
                    debug!(volume = %name, "not mounted, nothing to unmount");
                }
            }
        }

        self.registry.detach(name, id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// VolumePlugin
// ---------------------------------------------------------------------------

#[async_trait]
impl VolumePlugin for CephFsDriver {
    #[instrument(skip(self, options))]
    async fn create(
        &self,
        name: &str,
        options: HashMap<String, String>,
    ) -> Result<(), VolumeError> {
        info!(?options, "create called");
        let options = CreateOptions::from_map(&options);
        self.create_volume(name, &options)
            .await
            .inspect_err(|e| error!(error = %e, "create failed"))
    }

    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<VolumeInfo>, VolumeError> {
        info!("list called");
        self.list_volumes()
            .await
            .inspect_err(|e| error!(error = %e, "list failed"))
    }

    #[instrument(skip(self))]
    async fn get(&self, name: &str) -> Result<VolumeInfo, VolumeError> {
        info!("get called");
        let volume = self
            .lookup(name)
            .inspect_err(|e| error!(error = %e, "get failed"))?;
        let mounted = self.is_mounted(&volume).await;
        Ok(VolumeInfo {
            name: volume.name.clone(),
            mountpoint: mounted.then(|| volume.mountpoint().to_path_buf()),
            location: Some(Location::Local),
        })
    }

    #[instrument(skip(self))]
    async fn remove(&self, name: &str) -> Result<(), VolumeError> {
        info!("remove called");
        self.remove_volume(name)
            .await
            .inspect_err(|e| error!(error = %e, "remove failed"))
    }

    #[instrument(skip(self))]
    async fn path(&self, name: &str) -> Result<PathBuf, VolumeError> {
        info!("path called");
        let volume = self
            .lookup(name)
            .inspect_err(|e| error!(error = %e, "path failed"))?;
        if !self.is_mounted(&volume).await {
            let err = VolumeError::VolumeNotMounted(name.to_owned());
            error!(error = %err, "path failed");
            return Err(err);
        }
        Ok(volume.mountpoint().to_path_buf())
    }

    #[instrument(skip(self))]
    async fn mount(&self, id: &str, name: &str) -> Result<PathBuf, VolumeError> {
        info!("mount called");
        self.mount_volume(id, name)
            .await
            .inspect_err(|e| error!(error = %e, "mount failed"))
    }

    #[instrument(skip(self))]
    async fn unmount(&self, id: &str, name: &str) -> Result<(), VolumeError> {
        info!("unmount called");
        self.unmount_volume(id, name)
            .await
            .inspect_err(|e| error!(error = %e, "unmount failed"))
    }

    async fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: Scope::Global,
        }
    }
}
