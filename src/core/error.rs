//! Application-wide error types.

use thiserror::Error;

use crate::bootstrap::credentials::CredentialError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("network error: {0}")]
    Network(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("logger error: {0}")]
    Logger(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn config_error_display() {
        let e = AppError::Config("Invalid routing mode: bridge".into());
        assert!(e.to_string().starts_with("config error"));
        assert!(e.to_string().contains("bridge"));
    }

    #[test]
    fn credential_error_converts() {
        let e: AppError = CredentialError::MissingPublicKey.into();
        assert!(e.to_string().contains("PrivateKey used but no PublicKey found"));
        assert!(e.source().is_some());
    }

    #[test]
    fn network_error_display() {
        let e = AppError::Network("Unable to create any listening socket".into());
        assert!(e.to_string().contains("listening socket"));
    }
}
