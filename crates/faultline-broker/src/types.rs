use std::time::SystemTime;

/// Position of a message within a topic: which partition, which offset.
///
/// Returned by publish and fed back to commit; offsets are dense and
/// monotonically increasing within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicPosition {
    pub partition: u32,
    pub offset: u64,
}

/// A message read from a topic.
#[derive(Debug, Clone)]
pub struct TopicMessage {
    pub position: TopicPosition,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub published_at: SystemTime,
}

/// Route a message key to a partition.
///
/// Deterministic across processes and restarts so that a key's sub-stream
/// stays on one partition. Keyless messages land on partition 0.
#[must_use]
pub fn partition_for_key(key: Option<&str>, partitions: u32) -> u32 {
    let Some(key) = key else {
        return 0;
    };
    let hash = key
        .bytes()
        .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(u64::from(b)));
    #[allow(clippy::cast_possible_truncation)]
    {
        (hash % u64::from(partitions.max(1))) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyless_messages_use_partition_zero() {
        assert_eq!(partition_for_key(None, 4), 0);
    }

    #[test]
    fn routing_is_deterministic() {
        assert_eq!(
            partition_for_key(Some("svc-a"), 4),
            partition_for_key(Some("svc-a"), 4)
        );
    }

    #[test]
    fn routing_stays_in_range() {
        for key in ["a", "bb", "ccc", "dddd", "a-much-longer-key"] {
            assert!(partition_for_key(Some(key), 4) < 4);
        }
    }
}
