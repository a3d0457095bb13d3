use std::time::Duration;

/// Result type for storage driver operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage URI `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("unsupported storage scheme `{scheme}`")]
    UnsupportedScheme { scheme: String },

    #[error("missing credentials for `{uri}`: {reason}")]
    MissingCredentials { uri: String, reason: String },

    #[error("failed to configure {backend} backend: {reason}")]
    Configuration {
        backend: &'static str,
        reason: String,
    },

    #[error("{operation} timed out after {timeout:?} for {uri}")]
    Timeout {
        operation: &'static str,
        uri: String,
        timeout: Duration,
    },

    #[error("object not found: {uri}")]
    NotFound { uri: String },

    #[error("object store error: {source}")]
    Backend {
        #[from]
        source: object_store::Error,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl StorageError {
    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_credentials(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MissingCredentials {
            uri: uri.into(),
            reason: reason.into(),
        }
    }

    pub fn configuration(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            backend,
            reason: reason.into(),
        }
    }

    /// Map an `object_store` error, turning not-found into [`StorageError::NotFound`].
    pub fn from_object_store(err: object_store::Error, uri: &str) -> Self {
        match err {
            object_store::Error::NotFound { .. } => Self::NotFound {
                uri: uri.to_string(),
            },
            other => Self::Backend { source: other },
        }
    }

    /// Errors caused by the destination or its credentials rather than the backend.
    ///
    /// These are never worth retrying against the same destination.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidUri { .. }
                | Self::UnsupportedScheme { .. }
                | Self::MissingCredentials { .. }
                | Self::Configuration { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidUri { .. }
            | Self::UnsupportedScheme { .. }
            | Self::MissingCredentials { .. }
            | Self::Configuration { .. }
            | Self::NotFound { .. } => false,
            Self::Backend { source } => !matches!(
                source,
                object_store::Error::NotImplemented { .. }
                    | object_store::Error::UnknownConfigurationKey { .. }
                    | object_store::Error::InvalidPath { .. }
            ),
            Self::Timeout { .. } | Self::Io { .. } => true,
        }
    }
}
