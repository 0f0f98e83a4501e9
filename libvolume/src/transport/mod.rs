//! Plugin socket transport.
//!
//! [`PluginServer`] serves the volume plugin protocol as HTTP/1.1 over a
//! Unix domain socket using `hyper`.

pub mod server;

pub use server::PluginServer;
