//! Core data model: filesystems, volumes, create options and the shapes the
//! driver reports back to the plugin protocol.

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::VolumeError;

/// Name of the transient handle used to mount a filesystem's root.
pub const ROOT_VOLUME_NAME: &str = "root";

// ---------------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------------

/// A cluster-managed filesystem and the local directory its root is (or will
/// be) mounted on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filesystem {
    /// Cluster-side filesystem name.
    pub name: String,
    /// Local mount target.
    pub mount_path: PathBuf,
    /// Data pool backing the filesystem.
    pub data_pool: String,
    /// Metadata pool backing the filesystem.
    pub meta_pool: String,
}

impl Filesystem {
    pub fn new(
        name: impl Into<String>,
        mount_path: impl Into<PathBuf>,
        data_pool: impl Into<String>,
        meta_pool: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
            data_pool: data_pool.into(),
            meta_pool: meta_pool.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Volume
// ---------------------------------------------------------------------------

/// A subtree of a [`Filesystem`], addressed by a rooted subpath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    /// Always `/`-prefixed.
    pub subpath: String,
    pub filesystem: Filesystem,
}

impl Volume {
    pub fn new(name: impl Into<String>, subpath: &str, filesystem: Filesystem) -> Self {
        Self {
            name: name.into(),
            subpath: normalize_subpath(subpath),
            filesystem,
        }
    }

    /// The reserved handle that mounts the root of `filesystem`.
    pub fn root(filesystem: Filesystem) -> Self {
        Self {
            name: ROOT_VOLUME_NAME.to_owned(),
            subpath: "/".to_owned(),
            filesystem,
        }
    }

    /// `filesystem.mount_path + subpath`: where the subtree appears while the
    /// filesystem root is mounted.
    pub fn absolute_path(&self) -> PathBuf {
        join_subpath(&self.filesystem.mount_path, &self.subpath)
    }

    /// Local mount target of the volume.
    pub fn mountpoint(&self) -> &Path {
        &self.filesystem.mount_path
    }

    /// Whether the subpath names a directory strictly below the filesystem
    /// root. Only such volumes may have their subtree deleted.
    pub fn is_subtree(&self) -> bool {
        let mut below_root = false;
        for component in Path::new(&self.subpath).components() {
            match component {
                Component::Normal(_) => below_root = true,
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir | Component::Prefix(_) => return false,
            }
        }
        below_root
    }

    /// Mount source for the network filesystem, `<monitor>:<subpath>`.
    pub fn source(&self, monitor: &str) -> String {
        format!("{monitor}:{}", self.subpath)
    }
}

/// Append a rooted subpath to a base directory.
///
/// `Path::join` would discard `base` for an absolute argument, so the leading
/// separators are stripped first. `"/"` yields `base` itself.
pub fn join_subpath(base: &Path, subpath: &str) -> PathBuf {
    let relative = subpath.trim_start_matches('/');
    if relative.is_empty() {
        base.to_path_buf()
    } else {
        base.join(relative)
    }
}

/// Ensure a subpath carries exactly one leading separator.
pub fn normalize_subpath(subpath: &str) -> String {
    format!("/{}", subpath.trim_start_matches('/'))
}

/// Normalise a user-supplied subpath, rejecting `.`, `..` and empty
/// components so the result always stays inside the filesystem.
pub fn validate_subpath(subpath: &str) -> Result<String, VolumeError> {
    let trimmed = subpath.trim_matches('/');
    if trimmed.is_empty() {
        return Ok("/".to_owned());
    }
    if trimmed
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(VolumeError::InvalidSubpath(subpath.to_owned()));
    }
    Ok(format!("/{trimmed}"))
}

// ---------------------------------------------------------------------------
// VolumeList
// ---------------------------------------------------------------------------

/// An unordered collection of volumes with lookup by exact name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeList(Vec<Volume>);

impl VolumeList {
    pub fn new() -> Self {
        Self::default()
    }

    /// First volume named `name`, if any.
    pub fn by_name(&self, name: &str) -> Option<&Volume> {
        self.0.iter().find(|v| v.name == name)
    }

    pub fn push(&mut self, volume: Volume) {
        self.0.push(volume);
    }

    pub fn extend(&mut self, other: VolumeList) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Volume> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Volume> for VolumeList {
    fn from_iter<I: IntoIterator<Item = Volume>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for VolumeList {
    type Item = Volume;
    type IntoIter = std::vec::IntoIter<Volume>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a VolumeList {
    type Item = &'a Volume;
    type IntoIter = std::slice::Iter<'a, Volume>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Create options
// ---------------------------------------------------------------------------

/// Recognised `Create` options. Unknown keys are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    pub fsname: String,
    pub datapool: String,
    pub metapool: String,
    pub path: String,
    pub subpath: String,
}

impl CreateOptions {
    pub fn from_map(options: &HashMap<String, String>) -> Self {
        let mut opts = Self::default();
        for (key, value) in options {
            match key.as_str() {
                "fsname" => opts.fsname = value.clone(),
                "datapool" => opts.datapool = value.clone(),
                "metapool" => opts.metapool = value.clone(),
                "path" => opts.path = value.clone(),
                "subpath" => opts.subpath = value.clone(),
                _ => {}
            }
        }
        opts
    }

    /// Validate the options and fill in defaults, producing the volume that
    /// `Create` will provision.
    ///
    /// An empty subpath becomes `/<name>`; an empty path becomes
    /// `default_path + subpath`. Subpaths with `.`, `..` or empty components
    /// are rejected with [`VolumeError::InvalidSubpath`].
    pub fn resolve(&self, name: &str, default_path: &Path) -> Result<Volume, VolumeError> {
        if self.fsname.is_empty() {
            return Err(VolumeError::RequiredOptionsMissing);
        }

        let subpath = if self.subpath.is_empty() {
            validate_subpath(name)?
        } else {
            validate_subpath(&self.subpath)?
        };

        let mount_path = if self.path.is_empty() {
            join_subpath(default_path, &subpath)
        } else {
            PathBuf::from(&self.path)
        };

        Ok(Volume {
            name: name.to_owned(),
            subpath,
            filesystem: Filesystem::new(
                &self.fsname,
                mount_path,
                &self.datapool,
                &self.metapool,
            ),
        })
    }

    /// Both pools are present, so a missing filesystem can be created.
    pub fn has_pools(&self) -> bool {
        !self.datapool.is_empty() && !self.metapool.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Reported state
// ---------------------------------------------------------------------------

/// Where a listed volume was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Reported by remote discovery only.
    Ceph,
    /// Present in the local registry only.
    Local,
    /// Both.
    CephLocal,
}

impl Location {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ceph => "ceph",
            Self::Local => "local",
            Self::CephLocal => "ceph+local",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A volume as reported through `List` and `Get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    pub name: String,
    /// Set only while the volume's local path is a live mountpoint.
    pub mountpoint: Option<PathBuf>,
    pub location: Option<Location>,
}

/// Visibility scope advertised to the container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Volumes are cluster-wide.
    Global,
    /// Volumes exist on this node only.
    Local,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Local => "local",
        }
    }
}

/// Capabilities advertised by the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub scope: Scope,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn absolute_path_concatenates_subpath() {
        let fs = Filesystem::new("fsA", "/var/lib/vols/v", "dp", "mp");
        let vol = Volume::new("v", "/v", fs);
        assert_eq!(vol.absolute_path(), PathBuf::from("/var/lib/vols/v/v"));
        assert_eq!(vol.mountpoint(), Path::new("/var/lib/vols/v"));
        assert_eq!(vol.source("10.0.0.1:6789"), "10.0.0.1:6789:/v");
    }

    #[test]
    fn root_volume_is_the_mount_path() {
        let fs = Filesystem::new("fsA", "/mnt/fsA", "", "");
        let root = Volume::root(fs);
        assert_eq!(root.name, ROOT_VOLUME_NAME);
        assert_eq!(root.subpath, "/");
        assert_eq!(root.absolute_path(), PathBuf::from("/mnt/fsA"));
    }

    #[test]
    fn unknown_options_are_ignored() {
        let opts = CreateOptions::from_map(&options(&[
            ("fsname", "fsA"),
            ("size", "10G"),
            ("datapool", "dp"),
        ]));
        assert_eq!(opts.fsname, "fsA");
        assert_eq!(opts.datapool, "dp");
        assert!(opts.metapool.is_empty());
        assert!(!opts.has_pools());
    }

    #[test]
    fn resolve_requires_fsname() {
        let opts = CreateOptions::from_map(&options(&[("datapool", "dp")]));
        assert!(matches!(
            opts.resolve("v", Path::new("/vols")),
            Err(VolumeError::RequiredOptionsMissing)
        ));
    }

    #[test]
    fn resolve_fills_defaults() {
        let opts = CreateOptions::from_map(&options(&[("fsname", "fsA")]));
        let vol = opts.resolve("data", Path::new("/vols")).unwrap();
        assert_eq!(vol.subpath, "/data");
        assert_eq!(vol.filesystem.mount_path, PathBuf::from("/vols/data"));
        assert_eq!(vol.filesystem.name, "fsA");
    }

    #[test]
    fn resolve_roots_relative_subpath() {
        let opts =
            CreateOptions::from_map(&options(&[("fsname", "fsA"), ("subpath", "team/db")]));
        let vol = opts.resolve("db", Path::new("/vols")).unwrap();
        assert_eq!(vol.subpath, "/team/db");
        assert_eq!(vol.filesystem.mount_path, PathBuf::from("/vols/team/db"));
    }

    #[test]
    fn resolve_keeps_explicit_path() {
        let opts = CreateOptions::from_map(&options(&[
            ("fsname", "fsA"),
            ("path", "/srv/db"),
            ("subpath", "/db"),
        ]));
        let vol = opts.resolve("db", Path::new("/vols")).unwrap();
        assert_eq!(vol.filesystem.mount_path, PathBuf::from("/srv/db"));
        assert_eq!(vol.absolute_path(), PathBuf::from("/srv/db/db"));
    }

    #[test]
    fn resolve_rejects_escaping_subpaths() {
        for bad in ["x/..", ".", "..", "a/../b", "a//b", "./a"] {
            let opts =
                CreateOptions::from_map(&options(&[("fsname", "fsA"), ("subpath", bad)]));
            assert!(
                matches!(
                    opts.resolve("v", Path::new("/vols")),
                    Err(VolumeError::InvalidSubpath(ref s)) if s == bad
                ),
                "{bad} accepted"
            );
        }

        let opts = CreateOptions::from_map(&options(&[("fsname", "fsA")]));
        assert!(matches!(
            opts.resolve("..", Path::new("/vols")),
            Err(VolumeError::InvalidSubpath(_))
        ));
    }

    #[test]
    fn resolve_trims_surrounding_separators() {
        let opts = CreateOptions::from_map(&options(&[("fsname", "fsA"), ("subpath", "/db/")]));
        assert_eq!(opts.resolve("db", Path::new("/vols")).unwrap().subpath, "/db");
    }

    #[test]
    fn only_proper_subtrees_qualify_for_deletion() {
        let fs = Filesystem::new("fsA", "/mnt/fsA", "", "");
        assert!(Volume::new("v", "/v", fs.clone()).is_subtree());
        assert!(Volume::new("v", "/team/v", fs.clone()).is_subtree());
        assert!(!Volume::root(fs.clone()).is_subtree());
        assert!(!Volume::new("v", ".", fs.clone()).is_subtree());
        assert!(!Volume::new("v", "x/..", fs).is_subtree());
    }

    #[test]
    fn volume_list_lookup_returns_first_match() {
        let fs = Filesystem::new("fsA", "/mnt", "", "");
        let list: VolumeList = [
            Volume::new("a", "/a", fs.clone()),
            Volume::new("b", "/b", fs.clone()),
        ]
        .into_iter()
        .collect();
        assert_eq!(list.by_name("b").map(|v| v.subpath.as_str()), Some("/b"));
        assert!(list.by_name("c").is_none());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn location_tags() {
        assert_eq!(Location::Ceph.to_string(), "ceph");
        assert_eq!(Location::Local.to_string(), "local");
        assert_eq!(Location::CephLocal.to_string(), "ceph+local");
        assert_eq!(Scope::Global.as_str(), "global");
    }
}
