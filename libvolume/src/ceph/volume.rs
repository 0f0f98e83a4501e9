//! Mounting, unmounting and discovery of volumes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::DriverConfig;
use crate::error::VolumeError;
use crate::mounts::{MountState, MountTable};
use crate::runner::CommandRunner;
use crate::types::{Filesystem, Volume, VolumeList};

/// Attaches volume subtrees to local paths with the host mount tools.
#[derive(Clone)]
pub struct Mounter {
    runner: Arc<dyn CommandRunner>,
    monitor: String,
    user: String,
    secret_file: PathBuf,
    fs_type: String,
    mount_table: PathBuf,
}

impl Mounter {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &DriverConfig) -> Self {
        Self {
            runner,
            monitor: config.monitor.clone(),
            user: config.user.clone(),
            secret_file: config.secret_file.clone(),
            fs_type: config.fs_type.clone(),
            mount_table: config.mount_table.clone(),
        }
    }

    /// Mount `<monitor>:<subpath>` on the volume's mountpoint.
    #[instrument(skip(self, volume), fields(volume = %volume.name, subpath = %volume.subpath))]
    pub async fn mount(&self, volume: &Volume) -> Result<(), VolumeError> {
        let source = volume.source(&self.monitor);
        let target = volume.mountpoint().to_string_lossy().into_owned();
        let options = format!(
            "name={},secretfile={}",
            self.user,
            self.secret_file.display()
        );

        self.runner
            .run(
                "mount",
                &["-t", &self.fs_type, &source, &target, "-o", &options],
            )
            .await
            .map_err(VolumeError::into_cluster_error)?;

        debug!(%source, %target, "mounted");
        Ok(())
    }

    /// Unmount the volume's mountpoint.
    #[instrument(skip(self, volume), fields(volume = %volume.name))]
    pub async fn unmount(&self, volume: &Volume) -> Result<(), VolumeError> {
        let target = volume.mountpoint().to_string_lossy().into_owned();
        let out = self
            .runner
            .run("umount", &[&target])
            .await
            .map_err(VolumeError::into_cluster_error)?;

        debug!(%target, output = %out.trim(), "unmounted");
        Ok(())
    }

    /// Whether `path` is currently a mount point.
    pub async fn is_mounted(&self, path: &Path) -> bool {
        self.mount_table().await.is_mounted(path)
    }

    /// What is mounted on the volume's mountpoint, judged by the subtree
    /// the mount table reports for it.
    pub async fn state(&self, volume: &Volume) -> MountState {
        self.mount_table()
            .await
            .state(volume.mountpoint(), &volume.subpath)
    }

    /// Snapshot of the current mount table.
    pub async fn mount_table(&self) -> MountTable {
        MountTable::read(&self.mount_table).await
    }

    /// Enumerate the volumes directly below a filesystem's root.
    ///
    /// Mounts the root at `filesystem.mount_path`, turns every directory
    /// entry into a child volume and unmounts the root again, exactly once,
    /// whether or not the listing succeeded.
    #[instrument(skip(self, filesystem), fields(filesystem = %filesystem.name))]
    pub async fn discover_children(
        &self,
        filesystem: &Filesystem,
    ) -> Result<VolumeList, VolumeError> {
        let root = Volume::root(filesystem.clone());

        tokio::fs::create_dir_all(root.mountpoint())
            .await
            .map_err(|e| VolumeError::MkdirFailed {
                path: root.mountpoint().to_path_buf(),
                reason: e.to_string(),
            })?;

        self.mount(&root).await?;
        let listed = self.list_children(filesystem).await;
        let unmounted = self.unmount(&root).await;

        match (listed, unmounted) {
            (Ok(children), Ok(())) => {
                info!(count = children.len(), "discovered volumes");
                Ok(children)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(unmount_err)) => {
                warn!(
                    error = %unmount_err,
                    "failed to unmount filesystem root after listing error"
                );
                Err(e)
            }
        }
    }

    async fn list_children(&self, filesystem: &Filesystem) -> Result<VolumeList, VolumeError> {
        let root = &filesystem.mount_path;
        let target = root.to_string_lossy().into_owned();

        let out = self
            .runner
            .run("ls", &["-1", &target])
            .await
            .map_err(|e| match e {
                VolumeError::ExternalCommandFailed { output, .. } => {
                    VolumeError::VolumeEnumerationFailed {
                        path: root.clone(),
                        output,
                    }
                }
                other => other,
            })?;

        let mut children = VolumeList::new();
        for entry in out.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let is_dir = tokio::fs::metadata(root.join(entry))
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if is_dir {
                children.push(Volume::new(entry, entry, filesystem.clone()));
            }
        }
        Ok(children)
    }
}

impl std::fmt::Debug for Mounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mounter")
            .field("monitor", &self.monitor)
            .field("user", &self.user)
            .field("fs_type", &self.fs_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;

    fn setup(tmp: &Path) -> (Arc<FakeCluster>, Mounter) {
        let fake = Arc::new(FakeCluster::new(tmp));
        let config = DriverConfig::new(tmp.join("vols"))
            .with_monitor("10.0.0.1:6789")
            .with_auth("admin", "/etc/ceph/admin.secret")
            .with_mount_table(fake.mount_table_path());
        let mounter = Mounter::new(fake.clone(), &config);
        (fake, mounter)
    }

    #[tokio::test]
    async fn mount_uses_monitor_subpath_and_credentials() {
        let tmp = tempfile::tempdir().unwrap();
        let (fake, mounter) = setup(tmp.path());
        let fs = Filesystem::new("fsA", tmp.path().join("vols/data"), "", "");
        let vol = Volume::new("data", "/data", fs);
        std::fs::create_dir_all(vol.mountpoint()).unwrap();

        mounter.mount(&vol).await.unwrap();

        let expected = format!(
            "mount -t ceph 10.0.0.1:6789:/data {} -o name=admin,secretfile=/etc/ceph/admin.secret",
            vol.mountpoint().display()
        );
        assert_eq!(fake.calls(), vec![expected]);
        assert!(mounter.is_mounted(vol.mountpoint()).await);
        assert_eq!(mounter.state(&vol).await, MountState::Mounted);

        mounter.unmount(&vol).await.unwrap();
        assert!(!mounter.is_mounted(vol.mountpoint()).await);
        assert_eq!(mounter.state(&vol).await, MountState::Unmounted);
    }

    #[tokio::test]
    async fn state_tells_a_sibling_subtree_apart() {
        let tmp = tempfile::tempdir().unwrap();
        let (_fake, mounter) = setup(tmp.path());
        let fs = Filesystem::new("fsA", tmp.path().join("vols/shared"), "", "");
        let a = Volume::new("a", "/a", fs.clone());
        let b = Volume::new("b", "/b", fs);
        std::fs::create_dir_all(a.mountpoint()).unwrap();

        mounter.mount(&a).await.unwrap();

        assert_eq!(mounter.state(&a).await, MountState::Mounted);
        assert_eq!(
            mounter.state(&b).await,
            MountState::Foreign("10.0.0.1:6789:/a".to_owned())
        );
    }

    #[tokio::test]
    async fn mount_failure_is_internal_cluster_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (fake, mounter) = setup(tmp.path());
        fake.fail_on("mount", "mount error 13 = Permission denied");
        let vol = Volume::new("data", "/data", Filesystem::new("fsA", "/mnt/x", "", ""));

        let err = mounter.mount(&vol).await.unwrap_err();
        assert!(matches!(
            err,
            VolumeError::InternalClusterError(out) if out.contains("Permission denied")
        ));
    }

    #[tokio::test]
    async fn discovery_returns_directories_only() {
        let tmp = tempfile::tempdir().unwrap();
        let (fake, mounter) = setup(tmp.path());
        let root = tmp.path().join("stage/fsA");
        std::fs::create_dir_all(root.join("alpha")).unwrap();
        std::fs::create_dir_all(root.join("beta")).unwrap();
        std::fs::write(root.join("notes.txt"), b"x").unwrap();

        let fs = Filesystem::new("fsA", &root, "", "");
        let children = mounter.discover_children(&fs).await.unwrap();

        let mut names: Vec<_> = children.iter().map(|v| v.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert_eq!(children.by_name("alpha").unwrap().subpath, "/alpha");
        assert_eq!(fake.count("mount"), 1);
        assert_eq!(fake.count("umount"), 1);
        assert!(!mounter.is_mounted(&root).await);
    }

    #[tokio::test]
    async fn discovery_unmounts_once_when_listing_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let (fake, mounter) = setup(tmp.path());
        fake.fail_on("ls", "ls: reading directory: Input/output error");
        let root = tmp.path().join("stage/fsA");

        let err = mounter
            .discover_children(&Filesystem::new("fsA", &root, "", ""))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VolumeError::VolumeEnumerationFailed { ref output, .. }
                if output.contains("Input/output")
        ));
        assert_eq!(fake.count("umount"), 1);
        assert!(!mounter.is_mounted(&root).await);
    }

    #[tokio::test]
    async fn discovery_does_not_unmount_when_mount_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let (fake, mounter) = setup(tmp.path());
        fake.fail_on("mount", "mount error 2 = No such file or directory");

        let result = mounter
            .discover_children(&Filesystem::new("fsA", tmp.path().join("stage/fsA"), "", ""))
            .await;
        assert!(result.is_err());
        assert_eq!(fake.count("ls"), 0);
        assert_eq!(fake.count("umount"), 0);
    }
}
