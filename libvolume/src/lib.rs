//! # libvolume: CephFS subtree volumes for container runtimes
//!
//! `libvolume` exposes subdirectories of CephFS filesystems as named volumes
//! through the container runtime's volume plugin protocol (JSON over HTTP on
//! a Unix socket). Cluster state is read and changed by shelling out to the
//! `ceph` CLI and the host mount tools. It follows the RK8s conventions
//! (Tokio async runtime, `tracing` for observability, `thiserror` for
//! structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `Filesystem`, `Volume`, create options, list entries. |
//! | [`error`] | [`VolumeError`] enum covering all failure modes. |
//! | [`config`] | [`DriverConfig`], built once at start-up. |
//! | [`runner`] | [`CommandRunner`] trait and the process-spawning [`SystemRunner`]. |
//! | [`ceph`] | Cluster report parsing, filesystem creation, mounting and discovery. |
//! | [`mounts`] | Mount-table lookups: what is mounted where. |
//! | [`locks`] | Per-key async locks serialising mount transitions. |
//! | [`plugin`] | [`VolumePlugin`] trait, one method per protocol operation. |
//! | [`protocol`] | Plugin request decoding and response encoding. |
//! | [`transport`] | Unix socket HTTP server built on `hyper`. |
//! | [`backend`] | The CephFS driver and its volume registry. |

pub mod backend;
pub mod ceph;
pub mod config;
pub mod error;
pub mod locks;
pub mod mounts;
pub mod plugin;
pub mod protocol;
pub mod runner;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::CephFsDriver;
pub use config::DriverConfig;
pub use error::VolumeError;
pub use plugin::VolumePlugin;
pub use protocol::{PluginRequest, PluginResponse};
pub use runner::{CommandRunner, SystemRunner};
pub use transport::PluginServer;
pub use types::*;
