//! Deduplication cache mapping error fingerprints to issue ids.
//!
//! Owned exclusively by the reporting side; the consumer never writes here.
//! The API is deliberately infallible: cache unavailability reads as a miss
//! (prefer a possible duplicate issue over blocking the reporter), and
//! failed writes are logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::time::Instant;

use faultline_core::IssueId;

use crate::error::CacheError;

/// Default deduplication window: 24 hours.
pub const DEFAULT_DEDUP_TTL: Duration = Duration::from_secs(86_400);

fn dedup_key(reporter: &str, fingerprint: &str) -> String {
    format!("{reporter}:error_fingerprint:{fingerprint}")
}

/// Trait for the fingerprint deduplication cache.
#[async_trait]
pub trait DedupCache: Send + Sync {
    /// Look up the issue id recorded for a fingerprint.
    ///
    /// Never fails the caller: backend errors are logged and read as a miss.
    async fn lookup(&self, reporter: &str, fingerprint: &str) -> Option<IssueId>;

    /// Record a fingerprint sighting. Best effort: failures are logged,
    /// never propagated.
    async fn remember(&self, reporter: &str, fingerprint: &str, issue_id: &IssueId, ttl: Duration);
}

/// In-memory deduplication cache for tests and cacheless development.
///
/// Expiry runs on the tokio clock, so paused-time tests can drive the TTL
/// window.
#[derive(Debug, Clone, Default)]
pub struct MemoryDedupCache {
    entries: Arc<Mutex<HashMap<String, (IssueId, Instant)>>>,
}

impl MemoryDedupCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupCache for MemoryDedupCache {
    async fn lookup(&self, reporter: &str, fingerprint: &str) -> Option<IssueId> {
        let key = dedup_key(reporter, fingerprint);
        let mut entries = self.entries.lock().await;

        match entries.get(&key) {
            Some((_, expires_at)) if Instant::now() >= *expires_at => {
                entries.remove(&key);
                None
            }
            Some((issue_id, _)) => Some(issue_id.clone()),
            None => None,
        }
    }

    async fn remember(&self, reporter: &str, fingerprint: &str, issue_id: &IssueId, ttl: Duration) {
        let key = dedup_key(reporter, fingerprint);
        self.entries
            .lock()
            .await
            .insert(key, (issue_id.clone(), Instant::now() + ttl));
    }
}

/// Valkey/Redis deduplication cache.
#[derive(Clone)]
pub struct ValkeyDedupCache {
    pool: Pool,
    key_prefix: String,
}

impl ValkeyDedupCache {
    /// Create a new Valkey deduplication cache.
    pub async fn new(
        url: &str,
        key_prefix: impl Into<String>,
        pool_size: usize,
    ) -> Result<Self, CacheError> {
        let config = Config::from_url(url);
        let pool = config
            .builder()
            .map_err(|e| CacheError::Connection(e.to_string()))?
            .max_size(pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        // Test the connection
        let mut conn = pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            key_prefix: key_prefix.into(),
        })
    }

    fn prefixed(&self, reporter: &str, fingerprint: &str) -> String {
        format!("{}{}", self.key_prefix, dedup_key(reporter, fingerprint))
    }
}

#[async_trait]
impl DedupCache for ValkeyDedupCache {
    async fn lookup(&self, reporter: &str, fingerprint: &str) -> Option<IssueId> {
        let key = self.prefixed(reporter, fingerprint);

        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "Dedup cache unavailable, treating as miss");
                return None;
            }
        };

        let result: Result<Option<String>, _> = conn.get(&key).await;
        match result {
            Ok(found) => found.map(IssueId::new),
            Err(e) => {
                tracing::warn!(error = %e, "Dedup lookup failed, treating as miss");
                None
            }
        }
    }

    async fn remember(&self, reporter: &str, fingerprint: &str, issue_id: &IssueId, ttl: Duration) {
        let key = self.prefixed(reporter, fingerprint);

        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "Dedup cache unavailable, entry dropped");
                return;
            }
        };

        let result: Result<(), _> = conn
            .set_ex(&key, issue_id.as_str(), ttl.as_secs().max(1))
            .await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "Dedup write failed, entry dropped");
        }
    }
}

impl std::fmt::Debug for ValkeyDedupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyDedupCache")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}
