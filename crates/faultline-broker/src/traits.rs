use std::time::Duration;

use async_trait::async_trait;

use crate::error::TopicError;
use crate::types::{TopicMessage, TopicPosition};

#[async_trait]
pub trait TopicBackend: Send + Sync {
    /// Register a consumer-group identity for a topic, verifying the
    /// backend is reachable. Called once before a consumer starts polling.
    async fn subscribe(&self, _topic: &str, _group: &str) -> Result<(), TopicError> {
        Ok(())
    }

    /// Append a message to the topic, routed by key.
    ///
    /// Returns the position assigned to the message. Messages sharing a key
    /// land on the same partition and are ordered within it.
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<TopicPosition, TopicError>;

    /// Read up to `max_messages` under the given consumer-group identity.
    ///
    /// Resumes after the group's committed offsets. Waits up to `timeout`
    /// when no messages are available, then returns an empty batch.
    async fn poll(
        &self,
        topic: &str,
        group: &str,
        max_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<TopicMessage>, TopicError>;

    /// Advance the group's commit point for one partition.
    ///
    /// Commits are monotonic: committing an older offset than the current
    /// commit point is a no-op.
    async fn commit(
        &self,
        topic: &str,
        group: &str,
        position: TopicPosition,
    ) -> Result<(), TopicError>;

    /// Number of partitions in this backend.
    fn partitions(&self) -> u32;
}
