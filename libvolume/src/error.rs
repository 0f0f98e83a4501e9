//! Volume plugin error types.
//!
//! Every failure in `libvolume` is a [`VolumeError`]. The driver logs these
//! and hands them to the transport unchanged; the transport turns the
//! rendered message into the protocol's `Err` field.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Unified error type for volume operations.
#[derive(Debug, Error, Clone)]
pub enum VolumeError {
    /// `Create` was called without the mandatory `fsname` option.
    #[error("you have to specify all required options (required options: fsname)")]
    RequiredOptionsMissing,

    /// The filesystem does not exist yet and no data/metadata pool was given.
    #[error("you need to specify a datapool and a metapool to create a new filesystem")]
    MissingPoolOption,

    /// One of the pools backing a new filesystem is absent on the cluster.
    #[error("one of the given pools doesn't exist: {0}")]
    MissingPool(String),

    /// The creation command exited zero but the filesystem is not listed.
    #[error("can't find newly created filesystem {0}")]
    FilesystemNotFound(String),

    /// No volume with this name is known to the driver.
    #[error("unable to find the volume: {0}")]
    VolumeNotFound(String),

    /// The volume is known but its mountpoint is not currently mounted.
    #[error("volume {0} is not mounted")]
    VolumeNotMounted(String),

    /// Remove was refused because callers still hold mounts of the volume.
    #[error("volume {name} is in use by {mounts} mount(s)")]
    VolumeInUse {
        /// Volume name.
        name: String,
        /// Number of caller ids holding a mount.
        mounts: usize,
    },

    /// Listing the mounted filesystem root failed.
    #[error("unable to list volumes under {}: {output}", path.display())]
    VolumeEnumerationFailed {
        /// The mounted root that was listed.
        path: PathBuf,
        /// Raw output of the listing command.
        output: String,
    },

    /// The cluster's filesystem report did not have the expected shape.
    #[error("unable to convert output from command \"ceph fs ls\": {line:?}")]
    MalformedClusterReport {
        /// The offending report line.
        line: String,
    },

    /// A `subpath` option that does not name a subtree below the root.
    #[error("invalid subpath {0:?}: use plain directory names separated by '/'")]
    InvalidSubpath(String),

    /// Another subtree is already mounted where the volume wants to be.
    #[error("{} is already a mountpoint for {source_spec}", path.display())]
    MountpointBusy {
        /// Local mount target.
        path: PathBuf,
        /// Source currently mounted there.
        source_spec: String,
    },

    /// The cluster reported no pools at all.
    #[error("there are no pools")]
    NoPoolsReported,

    /// A local directory could not be created.
    #[error("unable to create volume directory {}: {reason}", path.display())]
    MkdirFailed {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        reason: String,
    },

    /// A volume subtree could not be deleted.
    #[error("unable to remove volume directory {}: {reason}", path.display())]
    RemoveFailed {
        /// Directory that could not be removed.
        path: PathBuf,
        /// Underlying I/O error.
        reason: String,
    },

    /// An external command did not finish within its deadline.
    #[error("command `{command}` timed out after {after:?}")]
    Timeout {
        /// Rendered command line.
        command: String,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// An external command could not be spawned or exited non-zero.
    #[error("command `{command}` failed: {output}")]
    ExternalCommandFailed {
        /// Rendered command line.
        command: String,
        /// Captured output, verbatim.
        output: String,
    },

    /// The cluster or mount tooling answered in an unexpected way.
    #[error("internal error (maybe ceph version is not compatible): {0}")]
    InternalClusterError(String),

    /// Socket, HTTP or request decoding failure in the plugin transport.
    #[error("transport error: {0}")]
    Transport(String),
}

impl VolumeError {
    /// Create a [`VolumeError::Transport`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::Transport(e.to_string())
    }

    /// Create a [`VolumeError::InternalClusterError`] from anything that
    /// implements [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::InternalClusterError(e.to_string())
    }

    /// Re-wrap a failed cluster or mount command as an
    /// [`VolumeError::InternalClusterError`] carrying the raw tool output.
    ///
    /// Timeouts pass through untouched.
    pub fn into_cluster_error(self) -> Self {
        match self {
            Self::ExternalCommandFailed { output, .. } => Self::InternalClusterError(output),
            other => other,
        }
    }
}
