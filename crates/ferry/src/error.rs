use storage_driver::StorageError;

pub type Result<T> = std::result::Result<T, UploadError>;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("storage error for {uri}: {source}")]
    Storage {
        uri: String,
        #[source]
        source: StorageError,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("failed to read input: {source}")]
    Input {
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed: {reason}{}", tool_output(.output))]
    ExternalTool {
        tool: &'static str,
        reason: String,
        output: String,
    },

    #[error("primary: {primary}; backup: {backup}")]
    FailoverExhausted {
        primary: Box<UploadError>,
        backup: Box<UploadError>,
    },

    #[error("failed to write {bytes_attempted} bytes to {uri}: {source}")]
    WriteFailed {
        uri: String,
        bytes_attempted: u64,
        #[source]
        source: Box<UploadError>,
    },

    #[error("failed to write final save: {source}")]
    FinalFlush {
        #[source]
        source: Box<UploadError>,
    },

    #[error("background task failed: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

fn tool_output(output: &str) -> String {
    let output = output.trim();
    if output.is_empty() {
        String::new()
    } else {
        format!(" [{output}]")
    }
}

impl UploadError {
    pub fn storage(uri: impl Into<String>, source: StorageError) -> Self {
        Self::Storage {
            uri: uri.into(),
            source,
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn external_tool(
        tool: &'static str,
        reason: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::ExternalTool {
            tool,
            reason: reason.into(),
            output: output.into(),
        }
    }

    /// Whether the failure stems from the destination or failover setup.
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Configuration { .. } => true,
            Self::Storage { source, .. } => source.is_configuration(),
            Self::WriteFailed { source, .. } | Self::FinalFlush { source } => {
                source.is_configuration()
            }
            Self::FailoverExhausted { primary, .. } => primary.is_configuration(),
            _ => false,
        }
    }

    /// Whether another attempt against the same destination may succeed.
    ///
    /// For exhausted failover the primary decides: a misconfigured primary
    /// is not rescheduled even if the backup failed transiently.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage { source, .. } => source.is_retryable(),
            Self::FailoverExhausted { primary, .. } => primary.is_retryable(),
            Self::WriteFailed { source, .. } => source.is_retryable(),
            Self::Io { .. } => true,
            Self::Configuration { .. }
            | Self::Input { .. }
            | Self::ExternalTool { .. }
            | Self::FinalFlush { .. }
            | Self::Join { .. } => false,
        }
    }
}
