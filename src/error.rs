//! Run-level error taxonomy.
//!
//! Fatal conditions abort the whole run with a non-zero signal; recoverable
//! conditions (single-file parse failures, exhausted statement retries during
//! derivation) are logged where they occur and never surface here.

use std::path::PathBuf;

use thiserror::Error;

use crate::remote::RemoteStoreError;

/// Errors that terminate a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Listing or downloading from the remote store failed. The hash cache
    /// entry for the affected file is never advanced, so the next run
    /// re-detects it.
    #[error("remote store operation failed: {0}")]
    Remote(#[from] RemoteStoreError),

    /// A downloaded payload did not match the hash advertised by the listing.
    #[error("content hash mismatch for '{name}': expected {expected}, got {actual}")]
    HashMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// Writing a fetched file or the cache document to disk failed.
    #[error("local file I/O failed for {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing the persisted hash cache failed.
    #[error("hash cache error: {0}")]
    Cache(#[from] crate::hash_cache::CacheError),

    /// An append, duplicate scan, or index creation failed. Downstream
    /// derivation would read an inconsistent base state, so the run aborts.
    #[error("load phase failed on {table}: {message}")]
    Load { table: String, message: String },
}

impl PipelineError {
    pub fn local_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LocalIo {
            path: path.into(),
            source,
        }
    }

    pub fn load(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            table: table.into(),
            message: message.into(),
        }
    }
}
