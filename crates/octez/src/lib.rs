//! Async bindings to the `octez-client` binary.

pub mod r#async;

pub use r#async::client::{CommandFailed, OctezClient, OctezClientConfigBuilder};
