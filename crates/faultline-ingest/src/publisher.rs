//! Publisher for issue events.
//!
//! The publisher owns an explicit connection state: either a live broker
//! handle or degraded mode. It is constructed by the composition root and
//! injected where needed; there is no process-wide singleton and no global
//! degraded flag. All failure states are encoded in the return value —
//! `publish` never raises to the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use faultline_broker::{TopicBackend, TopicError};
use faultline_core::IssueEvent;

/// Fixed backoff schedule between connection attempts.
pub const CONNECT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];

/// Logical topic name for issue events.
pub const ISSUES_TOPIC: &str = "issues";

/// Broker connection state, checked on every publish.
enum ConnectionState {
    Connected(Arc<dyn TopicBackend>),
    Degraded,
}

/// Result of a publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The broker acknowledged the event.
    Accepted,
    /// The event was not sent; the caller is responsible for local logging.
    Degraded,
}

/// Publishes issue events to the broker topic.
///
/// Once in degraded mode the publisher stays there until the process is
/// restarted and a new publisher is constructed — there is no background
/// reconnect loop. A send failure in connected mode degrades that call only.
pub struct IssuePublisher {
    topic: String,
    state: ConnectionState,
}

impl IssuePublisher {
    /// Create a publisher around an already-connected backend.
    pub fn new(backend: Arc<dyn TopicBackend>, topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            state: ConnectionState::Connected(backend),
        }
    }

    /// Create a publisher that is permanently degraded.
    pub fn degraded(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            state: ConnectionState::Degraded,
        }
    }

    /// Attempt to connect with bounded retries.
    ///
    /// `connect_fn` is invoked once, then once more after each delay in
    /// `schedule`. If every attempt fails the publisher enters degraded
    /// mode permanently.
    pub async fn connect<F, Fut>(
        topic: impl Into<String>,
        schedule: &[Duration],
        mut connect_fn: F,
    ) -> Self
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Arc<dyn TopicBackend>, TopicError>>,
    {
        let topic = topic.into();

        for attempt in 0..=schedule.len() {
            if attempt > 0 {
                tokio::time::sleep(schedule[attempt - 1]).await;
            }

            match connect_fn().await {
                Ok(backend) => {
                    tracing::info!(topic = %topic, attempt = attempt + 1, "Broker connected");
                    return Self::new(backend, topic);
                }
                Err(e) => {
                    tracing::warn!(
                        topic = %topic,
                        attempt = attempt + 1,
                        error = %e,
                        "Broker connection attempt failed"
                    );
                }
            }
        }

        tracing::error!(
            topic = %topic,
            attempts = schedule.len() + 1,
            "All broker connection attempts failed, entering degraded mode"
        );
        Self::degraded(topic)
    }

    /// Whether the publisher is in degraded mode.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self.state, ConnectionState::Degraded)
    }

    /// The broker handle, when connected.
    ///
    /// The consumer shares this handle; the broker itself is the only
    /// state the two sides have in common.
    #[must_use]
    pub fn backend(&self) -> Option<Arc<dyn TopicBackend>> {
        match &self.state {
            ConnectionState::Connected(backend) => Some(backend.clone()),
            ConnectionState::Degraded => None,
        }
    }

    /// Publish an event to the topic.
    ///
    /// Events are keyed by component so occurrences of the same component
    /// stay ordered on one partition. Returns immediately in degraded mode.
    pub async fn publish(&self, event: &IssueEvent) -> PublishOutcome {
        let backend = match &self.state {
            ConnectionState::Connected(backend) => backend,
            ConnectionState::Degraded => return PublishOutcome::Degraded,
        };

        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialise issue event");
                return PublishOutcome::Degraded;
            }
        };

        match backend
            .publish(&self.topic, Some(&event.component), &payload)
            .await
        {
            Ok(position) => {
                tracing::debug!(
                    topic = %self.topic,
                    partition = position.partition,
                    offset = position.offset,
                    component = %event.component,
                    "Issue event published"
                );
                PublishOutcome::Accepted
            }
            Err(e) => {
                tracing::warn!(topic = %self.topic, error = %e, "Publish failed");
                PublishOutcome::Degraded
            }
        }
    }
}

impl std::fmt::Debug for IssuePublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuePublisher")
            .field("topic", &self.topic)
            .field("degraded", &self.is_degraded())
            .finish()
    }
}
