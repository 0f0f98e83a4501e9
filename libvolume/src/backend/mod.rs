//! Storage backend implementations.
//!
//! Each backend module provides a concrete type that implements
//! [`VolumePlugin`](crate::plugin::VolumePlugin).

pub mod cephfs;
mod registry;

pub use cephfs::CephFsDriver;
pub use registry::Registry;
