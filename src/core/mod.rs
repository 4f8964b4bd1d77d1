//! Core infrastructure: shared foundation used across the whole crate.
//!
//! - **config**: daemon settings and the node configuration store.
//! - **error**: application-wide error enum.

pub mod config;
pub mod error;
