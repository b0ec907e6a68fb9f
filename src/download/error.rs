//! Error types for the download module.
//!
//! This module defines structured errors for all download operations,
//! providing context-rich error messages for debugging and caller feedback.

use std::path::PathBuf;

use thiserror::Error;

use super::validation::ValidationError;

/// Errors that can occur while fetching an artifact.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The server replied with something other than 200.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// FTP control or data channel failure (login, RETR, transfer).
    #[error("FTP transfer failed for {url}: {source}")]
    Ftp {
        /// The URL that failed to download.
        url: String,
        /// The underlying FTP error.
        #[source]
        source: suppaftp::FtpError,
    },

    /// File system error during download (create directory, write, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The URL scheme has no registered protocol adapter.
    #[error("unsupported scheme '{scheme}' in {url}")]
    UnsupportedScheme {
        /// The URL carrying the unsupported scheme.
        url: String,
        /// The scheme itself.
        scheme: String,
    },

    /// Building the shared HTTP client from the download options failed
    /// (bad proxy URL, unreadable CA bundle, etc.)
    #[error("client configuration failed: {source}")]
    Configuration {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// A registered validator rejected the completed download.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an FTP transfer error.
    pub fn ftp(url: impl Into<String>, source: suppaftp::FtpError) -> Self {
        Self::Ftp {
            url: url.into(),
            source,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an unsupported scheme error.
    pub fn unsupported_scheme(url: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            url: url.into(),
            scheme: scheme.into(),
        }
    }

    /// Creates a client configuration error.
    pub fn configuration(source: reqwest::Error) -> Self {
        Self::Configuration { source }
    }
}

// Note on From trait implementations:
// We intentionally do NOT implement `From<reqwest::Error>` or
// `From<std::io::Error>` because those variants require context (url, path)
// that the source errors don't provide. The helper constructors are the
// correct pattern here as they let callers supply that context.
// `From<ValidationError>` is the exception: validation errors already carry
// their destination path.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let error = DownloadError::timeout("https://content.example/dog.rpm");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://content.example/dog.rpm"));
    }

    #[test]
    fn test_http_status_display() {
        let error = DownloadError::http_status("https://content.example/dog.rpm", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(
            msg.contains("https://content.example/dog.rpm"),
            "Expected URL in: {msg}"
        );
    }

    #[test]
    fn test_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = DownloadError::io(PathBuf::from("/tmp/working/dog.rpm"), io_error);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/working/dog.rpm"), "Expected path in: {msg}");
    }

    #[test]
    fn test_invalid_url_display() {
        let error = DownloadError::invalid_url("not-a-url");
        let msg = error.to_string();
        assert!(msg.contains("invalid URL"), "Expected 'invalid URL' in: {msg}");
        assert!(msg.contains("not-a-url"), "Expected URL in: {msg}");
    }

    #[test]
    fn test_unsupported_scheme_display() {
        let error = DownloadError::unsupported_scheme("gopher://content.example/dog", "gopher");
        let msg = error.to_string();
        assert!(msg.contains("gopher"), "Expected scheme in: {msg}");
    }

    #[test]
    fn test_validation_error_is_transparent() {
        let validation = ValidationError::size(PathBuf::from("/tmp/dog.rpm"), 100, 50);
        let expected = validation.to_string();
        let error = DownloadError::from(validation);
        assert_eq!(error.to_string(), expected);
    }
}
