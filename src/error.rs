//! Error types shared across the proxy.
//!
//! Routing misses are not errors and never show up here; they are answered
//! with a 404 inside the dispatcher.

use thiserror::Error;

/// Main error type for switchyard.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// Configuration file could not be found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}")]
    ConfigValidation { message: String },

    /// A listener could not bind because the address is taken.
    #[error("Address already in use: {addr}")]
    AddrInUse { addr: String },

    /// Certificate or key material could not be loaded.
    #[error("TLS error: {message}")]
    Tls { message: String },

    /// The backend could not be reached or answered garbage.
    #[error("Upstream error for {target}: {message}")]
    Upstream { target: String, message: String },

    /// The backend did not answer in time.
    #[error("Upstream timeout for {target}")]
    UpstreamTimeout { target: String },

    /// I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Creates a new configuration parse error.
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
        }
    }

    /// Creates a new configuration validation error.
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    pub fn upstream(target: impl Into<String>, message: impl ToString) -> Self {
        Self::Upstream {
            target: target.into(),
            message: message.to_string(),
        }
    }
}

/// Result type alias using ProxyError.
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProxyError::ConfigNotFound {
            path: "/etc/switchyard.yaml".to_string(),
        };
        assert!(err.to_string().contains("/etc/switchyard.yaml"));

        let err = ProxyError::AddrInUse {
            addr: "127.0.0.1:80".to_string(),
        };
        assert!(err.to_string().contains("already in use"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let proxy_err: ProxyError = io_err.into();
        assert!(matches!(proxy_err, ProxyError::Io(_)));
    }
}
