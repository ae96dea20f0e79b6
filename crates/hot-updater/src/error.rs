use std::path::PathBuf;

/// Convenient result alias for updater operations.
pub type Result<T> = std::result::Result<T, UpdaterError>;

/// Errors that can occur while synchronising the local asset store.
#[derive(thiserror::Error, Debug)]
pub enum UpdaterError {
    /// Neither the persistent nor the bundled update configuration could be read.
    #[error("update configuration unavailable: {0}")]
    ConfigUnavailable(String),
    /// A manifest byte stream was truncated or malformed.
    #[error("manifest corrupt: {0}")]
    ManifestCorrupt(String),
    /// The HTTP transport failed.
    #[error("http request failed: {0}")]
    Fetch(#[from] reqwest::Error),
    /// The fetch collaborator reported a failure for a URL.
    #[error("fetch of {url} failed: {reason}")]
    Network {
        /// URL that was requested.
        url: String,
        /// Human readable cause.
        reason: String,
    },
    /// Every attempt of a bounded retry loop failed.
    #[error("gave up on {url} after {attempts} attempts")]
    RetriesExhausted {
        /// URL that was requested.
        url: String,
        /// Number of attempts made.
        attempts: u32,
    },
    /// A downloaded payload did not have the declared length.
    #[error("size mismatch for {url} (expected {expected} bytes, got {actual})")]
    SizeMismatch {
        /// URL of the payload.
        url: String,
        /// Declared size.
        expected: u64,
        /// Received size.
        actual: u64,
    },
    /// A downloaded payload did not match the declared CRC32.
    #[error("checksum mismatch for {url} (expected {expected:08x}, got {actual:08x})")]
    ChecksumMismatch {
        /// URL of the payload.
        url: String,
        /// Declared checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },
    /// The local and target versions differ in their major component.
    #[error("version {target} is not compatible with installed version {local}")]
    IncompatibleVersion {
        /// Local version code.
        local: i32,
        /// Target version code.
        target: i32,
    },
    /// The remote eligibility table could not be parsed.
    #[error("invalid version table: {0}")]
    VersionTable(String),
    /// Writing the persistent manifest failed.
    #[error("failed to persist manifest to {path:?}: {source}")]
    Persist {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// A JSON document could not be decoded.
    #[error("json decoding failed: {0}")]
    Decode(#[from] serde_json::Error),
    /// Failed to perform an I/O operation.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),
    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl UpdaterError {
    /// Helper for wrapping validation failures.
    pub fn validation(msg: impl Into<String>) -> Self {
        UpdaterError::Other(msg.into())
    }

    /// Whether the failure came from the network side and may succeed on a later attempt.
    ///
    /// [`fetch_with_retry`](crate::fetch_with_retry) only retries these.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpdaterError::Fetch(_)
                | UpdaterError::Network { .. }
                | UpdaterError::RetriesExhausted { .. }
                | UpdaterError::SizeMismatch { .. }
                | UpdaterError::ChecksumMismatch { .. }
        )
    }
}
