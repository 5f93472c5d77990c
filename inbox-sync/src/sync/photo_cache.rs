//! Sender photo cache
//!
//! Maps a sender email to a resolved photo URL or a negative entry.
//! Negative entries are never retried within a session. The cache is
//! stamped with the session generation so late results from a previous
//! login cannot repopulate it.

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::backend::DirectoryBackend;
use crate::types::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoEntry {
    Resolved(String),
    /// Looked up, nothing available
    Absent,
}

/// Result of claiming a sender for resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Cached(PhotoEntry),
    /// Another task is already resolving this sender
    Pending,
    /// Caller now owns the resolution
    Acquired,
}

/// Outcome of [`resolve_photo`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    Absent,
    /// Someone else is resolving it; nothing to apply
    Pending,
    /// Finished after the session changed; result discarded
    Stale,
}

impl Resolution {
    /// Whether this outcome came out of a completed lookup
    pub fn is_completed(&self) -> bool {
        matches!(self, Resolution::Resolved(_) | Resolution::Absent)
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Resolution::Resolved(url) => Some(url),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct PhotoCache {
    generation: u64,
    entries: HashMap<String, PhotoEntry>,
    pending: HashSet<String>,
}

/// Cache key for a sender address
pub fn cache_key(email: &str) -> String {
    email.trim().to_lowercase()
}

impl PhotoCache {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, email: &str) -> Option<&PhotoEntry> {
        self.entries.get(&cache_key(email))
    }

    /// Look up a sender and, on a miss, mark it as being resolved
    pub fn claim(&mut self, email: &str) -> Claim {
        let key = cache_key(email);
        if let Some(entry) = self.entries.get(&key) {
            return Claim::Cached(entry.clone());
        }
        if !self.pending.insert(key) {
            return Claim::Pending;
        }
        Claim::Acquired
    }

    /// Store a lookup result. Rejected when `generation` is not current.
    pub fn store(&mut self, generation: u64, email: &str, entry: PhotoEntry) -> bool {
        if generation != self.generation {
            return false;
        }
        let key = cache_key(email);
        self.pending.remove(&key);
        self.entries.insert(key, entry);
        true
    }

    /// Drop a claim without caching anything
    pub fn release(&mut self, generation: u64, email: &str) {
        if generation == self.generation {
            self.pending.remove(&cache_key(email));
        }
    }

    /// Forget everything and move to a new generation
    pub fn clear(&mut self, generation: u64) {
        self.entries.clear();
        self.pending.clear();
        self.generation = generation;
    }
}

/// Resolve one sender's photo, memoized in `cache`.
///
/// Only authorization failures are returned as errors; every other
/// failure becomes a sticky negative entry.
pub async fn resolve_photo(
    cache: &RwLock<PhotoCache>,
    directory: &dyn DirectoryBackend,
    generation: u64,
    email: &str,
) -> Result<Resolution, SyncError> {
    {
        let mut cache = cache.write().await;
        if cache.generation() != generation {
            return Ok(Resolution::Stale);
        }
        match cache.claim(email) {
            Claim::Cached(PhotoEntry::Resolved(url)) => return Ok(Resolution::Resolved(url)),
            Claim::Cached(PhotoEntry::Absent) => return Ok(Resolution::Absent),
            Claim::Pending => return Ok(Resolution::Pending),
            Claim::Acquired => {}
        }
    }

    let entry = match fetch_photo(directory, email).await {
        Ok(Some(url)) => PhotoEntry::Resolved(url),
        Ok(None) => {
            debug!("No photo available for {}", email);
            PhotoEntry::Absent
        }
        Err(e) if e.is_auth_expired() => {
            cache.write().await.release(generation, email);
            return Err(e);
        }
        Err(e) => {
            let e = SyncError::PhotoResolutionFailed(format!("{}: {}", email, e));
            warn!("{}", e);
            PhotoEntry::Absent
        }
    };

    if !cache.write().await.store(generation, email, entry.clone()) {
        debug!("Discarding photo for {} from stale generation {}", email, generation);
        return Ok(Resolution::Stale);
    }

    Ok(match entry {
        PhotoEntry::Resolved(url) => Resolution::Resolved(url),
        PhotoEntry::Absent => Resolution::Absent,
    })
}

async fn fetch_photo(
    directory: &dyn DirectoryBackend,
    email: &str,
) -> Result<Option<String>, SyncError> {
    let Some(user_id) = directory.find_user_id_by_email(email).await? else {
        return Ok(None);
    };
    let photo = directory.fetch_user_photo(&user_id).await?;
    Ok(photo.map(|p| p.to_data_url()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::FakeDirectory;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_memoized_resolution() {
        let directory = FakeDirectory::new().with_photo("jane@x.com", "u1", b"jpg");
        let cache = RwLock::new(PhotoCache::new(1));

        let first = resolve_photo(&cache, &directory, 1, "jane@x.com").await.unwrap();
        let second = resolve_photo(&cache, &directory, 1, "Jane@X.com").await.unwrap();

        assert_eq!(first, Resolution::Resolved("data:image/jpeg;base64,anBn".to_string()));
        assert_eq!(first, second);
        assert_eq!(directory.lookups_for("jane@x.com"), 1);
        assert_eq!(directory.photo_fetches(), 1);
    }

    #[tokio::test]
    async fn test_negative_entry_is_sticky() {
        let directory = FakeDirectory::new().with_user("nophoto@x.com", "u2");
        let cache = RwLock::new(PhotoCache::new(1));

        for _ in 0..3 {
            let res = resolve_photo(&cache, &directory, 1, "nophoto@x.com").await.unwrap();
            assert_eq!(res, Resolution::Absent);
        }
        assert_eq!(directory.lookups_for("nophoto@x.com"), 1);
        assert_eq!(
            cache.read().await.get("nophoto@x.com"),
            Some(&PhotoEntry::Absent)
        );
    }

    #[tokio::test]
    async fn test_backend_failure_cached_as_absent() {
        let directory = FakeDirectory::new()
            .with_failure("err@x.com", SyncError::Network("timeout".to_string()));
        let cache = RwLock::new(PhotoCache::new(1));

        let res = resolve_photo(&cache, &directory, 1, "err@x.com").await.unwrap();
        assert_eq!(res, Resolution::Absent);
        resolve_photo(&cache, &directory, 1, "err@x.com").await.unwrap();
        assert_eq!(directory.lookups_for("err@x.com"), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_propagates_and_caches_nothing() {
        let directory = FakeDirectory::new()
            .with_failure("jane@x.com", SyncError::AuthExpired("401".to_string()));
        let cache = RwLock::new(PhotoCache::new(1));

        let err = resolve_photo(&cache, &directory, 1, "jane@x.com").await.unwrap_err();
        assert!(err.is_auth_expired());
        assert!(cache.read().await.get("jane@x.com").is_none());
        assert_eq!(cache.write().await.claim("jane@x.com"), Claim::Acquired);
    }

    #[tokio::test]
    async fn test_stale_generation_discarded() {
        let gate = Arc::new(Notify::new());
        let directory = Arc::new(FakeDirectory::gated(gate.clone()).with_photo("jane@x.com", "u1", b"x"));
        let cache = Arc::new(RwLock::new(PhotoCache::new(1)));

        let task = {
            let cache = cache.clone();
            let directory = directory.clone();
            tokio::spawn(async move {
                resolve_photo(&cache, directory.as_ref(), 1, "jane@x.com").await
            })
        };

        // Wait until the lookup is parked on the gate, then log out
        while directory.lookups_for("jane@x.com") == 0 {
            tokio::task::yield_now().await;
        }
        cache.write().await.clear(2);
        gate.notify_one();

        assert_eq!(task.await.unwrap().unwrap(), Resolution::Stale);
        assert!(cache.read().await.is_empty());
    }

    #[test]
    fn test_concurrent_claim_for_same_sender() {
        let mut cache = PhotoCache::new(1);
        assert_eq!(cache.claim("a@x.com"), Claim::Acquired);
        assert_eq!(cache.claim("A@x.com"), Claim::Pending);
        assert!(cache.store(1, "a@x.com", PhotoEntry::Resolved("u".to_string())));
        assert_eq!(
            cache.claim("a@x.com"),
            Claim::Cached(PhotoEntry::Resolved("u".to_string()))
        );
        assert!(!cache.store(7, "b@x.com", PhotoEntry::Absent));
    }
}
