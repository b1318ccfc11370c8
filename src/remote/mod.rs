//! Remote file-store client.
//!
//! The pipeline only depends on the [`FileStore`] trait; [`disk::DiskClient`]
//! is the production implementation against the cloud disk REST API.

pub mod disk;

use async_trait::async_trait;
use thiserror::Error;

pub use disk::DiskClient;

/// One entry of a remote listing, immutable per listing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    /// Base file name, the key of the hash cache.
    pub name: String,
    /// Full remote path used for downloads.
    pub path: String,
    /// Content hash advertised by the store (hex-encoded SHA-256).
    pub content_hash: String,
}

impl RemoteFile {
    /// Only CSV extracts participate in the sync.
    pub fn is_csv(&self) -> bool {
        self.name.to_ascii_lowercase().ends_with(".csv")
    }
}

/// Errors surfaced by a remote file store.
#[derive(Debug, Error)]
pub enum RemoteStoreError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("remote API returned status {status} for {operation}: {message}")]
    Api {
        status: u16,
        operation: &'static str,
        message: String,
    },

    #[error("malformed response from remote API: {details}")]
    MalformedResponse { details: String },

    #[error("invalid remote base URL: {0}")]
    BaseUrl(#[from] url::ParseError),
}

/// Remote object store holding the CSV extracts.
///
/// Listing returns every entry of the folder with its content hash;
/// filtering to `*.csv` is the caller's concern.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Verify the configured credentials. Returns `Ok(false)` when the store
    /// answered but rejected the token.
    async fn check_token(&self) -> Result<bool, RemoteStoreError>;

    /// List the contents of `folder`.
    async fn list(&self, folder: &str) -> Result<Vec<RemoteFile>, RemoteStoreError>;

    /// Download the full content of the file at `path`.
    async fn download(&self, path: &str) -> Result<Vec<u8>, RemoteStoreError>;
}
