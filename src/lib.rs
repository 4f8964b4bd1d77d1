// Library root: exposes the node internals to the binary and integration tests.
// The binary entry point is src/main.rs.

pub mod bootstrap;
pub mod core;
pub mod device;
pub mod hooks;
pub mod net;
pub mod node;

pub use crate::core::{config, error};
pub use bootstrap::{credentials, logger};
