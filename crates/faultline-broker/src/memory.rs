use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::error::TopicError;
use crate::traits::TopicBackend;
use crate::types::{partition_for_key, TopicMessage, TopicPosition};

#[derive(Debug, Clone)]
struct StoredMessage {
    key: Option<String>,
    payload: Vec<u8>,
    published_at: SystemTime,
}

/// In-memory topic backend for tests and brokerless development.
///
/// Each topic holds a fixed set of partition logs; offsets are the index of
/// the message within its partition. Commit state is tracked per
/// (topic, group, partition).
#[derive(Debug, Clone)]
pub struct MemoryTopic {
    partitions: u32,
    topics: Arc<Mutex<HashMap<String, Vec<Vec<StoredMessage>>>>>,
    committed: Arc<Mutex<HashMap<(String, String, u32), u64>>>,
    notify: Arc<Notify>,
}

impl MemoryTopic {
    /// Default partition count.
    pub const DEFAULT_PARTITIONS: u32 = 4;

    #[must_use]
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: Arc::new(Mutex::new(HashMap::new())),
            committed: Arc::new(Mutex::new(HashMap::new())),
            notify: Arc::new(Notify::new()),
        }
    }

    async fn collect_batch(
        &self,
        topic: &str,
        group: &str,
        max_messages: usize,
    ) -> Vec<TopicMessage> {
        let topics = self.topics.lock().await;
        let committed = self.committed.lock().await;

        let Some(logs) = topics.get(topic) else {
            return Vec::new();
        };

        let mut batch = Vec::new();
        for (partition, log) in logs.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let partition = partition as u32;
            let start = committed
                .get(&(topic.to_owned(), group.to_owned(), partition))
                .map_or(0, |offset| offset + 1);

            #[allow(clippy::cast_possible_truncation)]
            for (offset, stored) in log.iter().enumerate().skip(start as usize) {
                if batch.len() >= max_messages {
                    return batch;
                }
                batch.push(TopicMessage {
                    position: TopicPosition {
                        partition,
                        offset: offset as u64,
                    },
                    key: stored.key.clone(),
                    payload: stored.payload.clone(),
                    published_at: stored.published_at,
                });
            }
        }

        batch
    }
}

impl Default for MemoryTopic {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PARTITIONS)
    }
}

#[async_trait]
impl TopicBackend for MemoryTopic {
    async fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: &[u8],
    ) -> Result<TopicPosition, TopicError> {
        let partition = partition_for_key(key, self.partitions);

        let mut topics = self.topics.lock().await;
        let logs = topics
            .entry(topic.to_owned())
            .or_insert_with(|| vec![Vec::new(); self.partitions as usize]);

        let log = &mut logs[partition as usize];
        let offset = log.len() as u64;
        log.push(StoredMessage {
            key: key.map(str::to_owned),
            payload: payload.to_vec(),
            published_at: SystemTime::now(),
        });
        drop(topics);

        self.notify.notify_waiters();

        Ok(TopicPosition { partition, offset })
    }

    async fn poll(
        &self,
        topic: &str,
        group: &str,
        max_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<TopicMessage>, TopicError> {
        let batch = self.collect_batch(topic, group, max_messages).await;
        if !batch.is_empty() {
            return Ok(batch);
        }

        // Nothing available: wait bounded for a publish, then re-check once.
        let notified = self.notify.notified();
        if tokio::time::timeout(timeout, notified).await.is_err() {
            return Ok(Vec::new());
        }

        Ok(self.collect_batch(topic, group, max_messages).await)
    }

    async fn commit(
        &self,
        topic: &str,
        group: &str,
        position: TopicPosition,
    ) -> Result<(), TopicError> {
        if position.partition >= self.partitions {
            return Err(TopicError::UnknownPartition(position.partition));
        }

        let mut committed = self.committed.lock().await;
        let entry = committed
            .entry((topic.to_owned(), group.to_owned(), position.partition))
            .or_insert(position.offset);
        *entry = (*entry).max(position.offset);
        Ok(())
    }

    fn partitions(&self) -> u32 {
        self.partitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLL_TIMEOUT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn publish_and_poll() {
        let topic = MemoryTopic::new(1);

        let pos = topic.publish("issues", Some("k"), b"one").await.unwrap();
        assert_eq!(pos, TopicPosition { partition: 0, offset: 0 });

        let batch = topic.poll("issues", "g1", 10, POLL_TIMEOUT).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"one");
        assert_eq!(batch[0].key.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn poll_resumes_after_commit() {
        let topic = MemoryTopic::new(1);

        topic.publish("issues", None, b"one").await.unwrap();
        topic.publish("issues", None, b"two").await.unwrap();

        let batch = topic.poll("issues", "g1", 10, POLL_TIMEOUT).await.unwrap();
        assert_eq!(batch.len(), 2);

        // Without a commit the same batch is redelivered.
        let again = topic.poll("issues", "g1", 10, POLL_TIMEOUT).await.unwrap();
        assert_eq!(again.len(), 2);

        topic
            .commit("issues", "g1", batch[1].position)
            .await
            .unwrap();
        let after = topic.poll("issues", "g1", 10, POLL_TIMEOUT).await.unwrap();
        assert!(after.is_empty());
    }

    #[tokio::test]
    async fn groups_track_independent_offsets() {
        let topic = MemoryTopic::new(1);

        topic.publish("issues", None, b"one").await.unwrap();
        let batch = topic.poll("issues", "g1", 10, POLL_TIMEOUT).await.unwrap();
        topic
            .commit("issues", "g1", batch[0].position)
            .await
            .unwrap();

        // A different group still sees the message.
        let other = topic.poll("issues", "g2", 10, POLL_TIMEOUT).await.unwrap();
        assert_eq!(other.len(), 1);
    }

    #[tokio::test]
    async fn batch_size_is_bounded() {
        let topic = MemoryTopic::new(1);

        for i in 0..15u8 {
            topic.publish("issues", None, &[i]).await.unwrap();
        }

        let batch = topic.poll("issues", "g1", 10, POLL_TIMEOUT).await.unwrap();
        assert_eq!(batch.len(), 10);
    }

    #[tokio::test]
    async fn same_key_stays_ordered_on_one_partition() {
        let topic = MemoryTopic::new(4);

        for i in 0..5u8 {
            topic.publish("issues", Some("svc-a"), &[i]).await.unwrap();
        }

        let batch = topic.poll("issues", "g1", 10, POLL_TIMEOUT).await.unwrap();
        assert_eq!(batch.len(), 5);

        let partition = batch[0].position.partition;
        for (i, message) in batch.iter().enumerate() {
            assert_eq!(message.position.partition, partition);
            assert_eq!(message.payload, [i as u8]);
        }
    }

    #[tokio::test]
    async fn commit_is_monotonic() {
        let topic = MemoryTopic::new(1);

        topic.publish("issues", None, b"one").await.unwrap();
        topic.publish("issues", None, b"two").await.unwrap();

        topic
            .commit("issues", "g1", TopicPosition { partition: 0, offset: 1 })
            .await
            .unwrap();
        // Committing an older offset does not move the commit point back.
        topic
            .commit("issues", "g1", TopicPosition { partition: 0, offset: 0 })
            .await
            .unwrap();

        let batch = topic.poll("issues", "g1", 10, POLL_TIMEOUT).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn empty_poll_times_out() {
        let topic = MemoryTopic::new(1);
        let start = tokio::time::Instant::now();
        let batch = topic
            .poll("issues", "g1", 10, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn poll_wakes_on_publish() {
        let topic = MemoryTopic::new(1);

        let poller = {
            let topic = topic.clone();
            tokio::spawn(async move {
                topic
                    .poll("issues", "g1", 10, Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        topic.publish("issues", None, b"wake").await.unwrap();

        let batch = poller.await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
