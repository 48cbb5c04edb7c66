//! Broker topic abstraction for the Faultline issue pipeline.
//!
//! A topic is an ordered, partitioned log of messages. Producers publish
//! keyed payloads; key-hash routing pins a key to a partition, and ordering
//! is guaranteed within a partition only. Consumers read under a named
//! group identity and advance a per-(group, partition) commit point, so a
//! restarted consumer resumes after the last committed offset —
//! at-least-once delivery, with idempotent downstream writers absorbing
//! redelivery.
//!
//! Backends are selected by feature:
//!
//! - `memory` — in-process log for tests and brokerless development
//! - `postgres` — durable log backed by PostgreSQL tables

mod error;
mod traits;
mod types;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "postgres")]
mod postgres;

#[cfg(feature = "config")]
mod config;

pub use error::TopicError;
pub use traits::TopicBackend;
pub use types::{TopicMessage, TopicPosition};

#[cfg(feature = "memory")]
pub use memory::MemoryTopic;

#[cfg(feature = "postgres")]
pub use postgres::PostgresTopic;

#[cfg(feature = "config")]
pub use config::TopicConfig;
