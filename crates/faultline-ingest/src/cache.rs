//! Read cache for recently ingested issues.
//!
//! The cache holds a denormalised snapshot per issue plus a time-ordered
//! index of issue ids for low-latency listing. It is derived data: always
//! rebuildable from the document store and never the system of record.
//! Every entry carries a TTL; the index TTL is refreshed on each insert.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio::time::Instant;

use faultline_core::{Issue, IssueId};

use crate::error::CacheError;

/// Default snapshot and index TTL: one hour.
pub const DEFAULT_RECENT_TTL: Duration = Duration::from_secs(3600);

/// Trait for the recent-issue read cache.
#[async_trait]
pub trait RecentIssueCache: Send + Sync {
    /// Store a snapshot with TTL and insert/refresh the issue id in the
    /// time-ordered index. The index TTL is refreshed on each insert.
    async fn put(&self, issue: &Issue) -> Result<(), CacheError>;

    /// Fetch a snapshot by id; expired entries read as absent.
    async fn get(&self, id: &IssueId) -> Result<Option<Issue>, CacheError>;

    /// List recent issues, newest first, skipping entries whose snapshot
    /// has already expired.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Issue>, CacheError>;
}

#[derive(Debug, Default)]
struct MemoryCacheInner {
    snapshots: HashMap<String, (Issue, Instant)>,
    /// Keyed by (negated creation millis, id) so iteration yields newest
    /// first.
    index: BTreeMap<(i64, String), ()>,
    index_expires_at: Option<Instant>,
}

/// In-memory recent cache for tests and cacheless development.
///
/// Expiry runs on the tokio clock, so paused-time tests can drive TTLs.
#[derive(Debug, Clone)]
pub struct MemoryRecentCache {
    ttl: Duration,
    inner: Arc<Mutex<MemoryCacheInner>>,
}

impl MemoryRecentCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: Arc::new(Mutex::new(MemoryCacheInner::default())),
        }
    }
}

impl Default for MemoryRecentCache {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_TTL)
    }
}

#[async_trait]
impl RecentIssueCache for MemoryRecentCache {
    async fn put(&self, issue: &Issue) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        inner
            .snapshots
            .insert(issue.id.to_string(), (issue.clone(), now + self.ttl));
        inner
            .index
            .insert((-issue.created_at.timestamp_millis(), issue.id.to_string()), ());
        inner.index_expires_at = Some(now + self.ttl);
        Ok(())
    }

    async fn get(&self, id: &IssueId) -> Result<Option<Issue>, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        match inner.snapshots.get(id.as_str()) {
            Some((_, expires_at)) if now >= *expires_at => {
                inner.snapshots.remove(id.as_str());
                Ok(None)
            }
            Some((issue, _)) => Ok(Some(issue.clone())),
            None => Ok(None),
        }
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Issue>, CacheError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;

        let index_live = inner.index_expires_at.is_some_and(|at| now < at);
        if !index_live {
            inner.index.clear();
            return Ok(Vec::new());
        }

        let ids: Vec<String> = inner.index.keys().map(|(_, id)| id.clone()).collect();

        let mut issues = Vec::new();
        for id in ids {
            if issues.len() >= limit {
                break;
            }
            match inner.snapshots.get(&id) {
                Some((issue, expires_at)) if now < *expires_at => issues.push(issue.clone()),
                _ => {} // snapshot expired before the index; skip
            }
        }

        Ok(issues)
    }
}

/// Valkey/Redis recent cache.
#[derive(Clone)]
pub struct ValkeyRecentCache {
    pool: Pool,
    key_prefix: String,
    ttl: Duration,
}

impl ValkeyRecentCache {
    /// Create a new Valkey recent cache.
    pub async fn new(
        url: &str,
        key_prefix: impl Into<String>,
        ttl: Duration,
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
            ttl,
        })
    }

    fn snapshot_key(&self, id: &str) -> String {
        format!("{}issue:{}", self.key_prefix, id)
    }

    fn index_key(&self) -> String {
        format!("{}issues:recent", self.key_prefix)
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

#[async_trait]
impl RecentIssueCache for ValkeyRecentCache {
    async fn put(&self, issue: &Issue) -> Result<(), CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let snapshot = serde_json::to_string(issue)
            .map_err(|e| CacheError::Serialisation(e.to_string()))?;

        conn.set_ex::<_, _, ()>(self.snapshot_key(issue.id.as_str()), snapshot, self.ttl_secs())
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        // Negated timestamp score: ascending range reads newest first.
        #[allow(clippy::cast_precision_loss)]
        let score = -(issue.created_at.timestamp_millis() as f64);

        redis::cmd("ZADD")
            .arg(self.index_key())
            .arg(score)
            .arg(issue.id.as_str())
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        // Refresh the index TTL on each insert.
        redis::cmd("EXPIRE")
            .arg(self.index_key())
            .arg(self.ttl_secs())
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, id: &IssueId) -> Result<Option<Issue>, CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        let snapshot: Option<String> = conn
            .get(self.snapshot_key(id.as_str()))
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        match snapshot {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CacheError::Serialisation(e.to_string())),
            None => Ok(None),
        }
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Issue>, CacheError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        #[allow(clippy::cast_possible_wrap)]
        let ids: Vec<String> = redis::cmd("ZRANGE")
            .arg(self.index_key())
            .arg(0)
            .arg(limit as i64 - 1)
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        let mut issues = Vec::with_capacity(ids.len());
        for id in ids {
            let snapshot: Option<String> = conn
                .get(self.snapshot_key(&id))
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;

            // Snapshot may have expired ahead of the index; skip it.
            if let Some(json) = snapshot {
                let issue = serde_json::from_str(&json)
                    .map_err(|e| CacheError::Serialisation(e.to_string()))?;
                issues.push(issue);
            }
        }

        Ok(issues)
    }
}

impl std::fmt::Debug for ValkeyRecentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyRecentCache")
            .field("key_prefix", &self.key_prefix)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
