//! Bootstrap layer: modules that run before the network comes up.
//!
//! - **credentials**: RSA key material for the local node and its peers.
//! - **logger**: tracing-subscriber initialisation.

pub mod credentials;
pub mod logger;
