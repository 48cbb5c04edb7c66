//! Faultline ingestion pipeline.
//!
//! Wires the reporting side to the consuming side of the issue tracker:
//!
//! ```text
//! ┌──────────────┐    ┌─────────────┐    ┌────────────────┐
//! │ IssueReporter│───>│IssuePublisher│──>│  broker topic  │
//! │ (dedup path) │    │ (degradable) │   └───────┬────────┘
//! └──────┬───────┘    └─────────────┘            │ poll/commit
//!        │ recurrence                            v
//!        │            ┌──────────────┐   ┌──────────────┐
//!        └───────────>│  IssueStore  │<──│ IssueConsumer│
//!                     │ (authoritative)  └──────┬───────┘
//!                     └──────────────┘          │ put
//!                                        ┌──────┴───────┐
//!                                        │RecentIssueCache│
//!                                        └──────────────┘
//! ```
//!
//! The reporter never blocks on persistence; the consumer is the single
//! writer of issue entities; caches are derived, rebuildable projections.
//! Each seam is a narrow capability trait with an in-memory implementation
//! for tests and a production implementation (Valkey, PostgreSQL).

pub mod cache;
pub mod consumer;
pub mod dedup;
pub mod error;
pub mod publisher;
pub mod reporter;
pub mod store;

// Re-export main types
pub use cache::{MemoryRecentCache, RecentIssueCache, ValkeyRecentCache, DEFAULT_RECENT_TTL};
pub use consumer::{ConsumerConfig, ConsumerHandle, ConsumerState, ConsumerStats, IssueConsumer};
pub use dedup::{DedupCache, MemoryDedupCache, ValkeyDedupCache, DEFAULT_DEDUP_TTL};
pub use error::{CacheError, StoreError};
pub use publisher::{IssuePublisher, PublishOutcome, CONNECT_BACKOFF, ISSUES_TOPIC};
pub use reporter::{IssueReporter, ReportOutcome};
pub use store::{IssueChanges, IssueFilter, IssueStore, MemoryIssueStore, PostgresIssueStore};
