//! Volume plugin service trait.
//!
//! The operations a container runtime invokes on a volume driver: create,
//! inspect, mount, unmount and destroy named volumes. The transport decodes
//! each protocol request into exactly one call on this trait.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::VolumeError;
use crate::types::{Capabilities, VolumeInfo};

/// Volume plugin service, one method per protocol operation.
///
/// Implementations must tolerate concurrent calls: the transport dispatches
/// each in-flight request independently.
#[async_trait]
pub trait VolumePlugin: Send + Sync {
    /// Provision `name`, guaranteeing its subtree exists on the cluster.
    ///
    /// Idempotent: creating an existing volume again succeeds.
    async fn create(&self, name: &str, options: HashMap<String, String>)
    -> Result<(), VolumeError>;

    /// Every volume known locally or discovered remotely, each name once.
    async fn list(&self) -> Result<Vec<VolumeInfo>, VolumeError>;

    /// A locally registered volume.
    async fn get(&self, name: &str) -> Result<VolumeInfo, VolumeError>;

    /// Delete the volume's subtree and forget it.
    async fn remove(&self, name: &str) -> Result<(), VolumeError>;

    /// Mountpoint of a volume that is currently mounted.
    async fn path(&self, name: &str) -> Result<PathBuf, VolumeError>;

    /// Mount the volume on behalf of caller `id` and return the mountpoint.
    ///
    /// Mounting an already mounted volume is a no-op.
    async fn mount(&self, id: &str, name: &str) -> Result<PathBuf, VolumeError>;

    /// Release caller `id`'s mount of the volume.
    async fn unmount(&self, id: &str, name: &str) -> Result<(), VolumeError>;

    /// Scope and other static capabilities. Never fails.
    async fn capabilities(&self) -> Capabilities;
}
