//! Change detection between a remote listing and the local hash cache.

use crate::hash_cache::HashCache;
use crate::remote::RemoteFile;
use tracing::debug;

/// Outcome of comparing a remote listing against the cache.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangePlan {
    /// Files whose remote hash is new or differs from the cached one.
    pub to_download: Vec<RemoteFile>,
    /// Names whose hash matches the cache exactly.
    pub unchanged: Vec<String>,
}

impl ChangePlan {
    pub fn is_empty(&self) -> bool {
        self.to_download.is_empty()
    }
}

/// Split `listing` into changed and unchanged files.
///
/// Order of the listing is preserved in both buckets. The cache is not
/// mutated here; entries advance one by one only after each verified
/// download so a failed run never marks a file as seen.
pub fn plan(listing: &[RemoteFile], cache: &HashCache) -> ChangePlan {
    let mut result = ChangePlan::default();
    for file in listing {
        match cache.get(&file.name) {
            Some(known) if known == file.content_hash => {
                debug!(name = %file.name, "file unchanged since last run");
                result.unchanged.push(file.name.clone());
            }
            _ => result.to_download.push(file.clone()),
        }
    }
    result
}
