//! Consumer turning broker messages into persisted issues.
//!
//! One background task per process runs the poll/process/commit loop; it is
//! the only writer of issue entities. Delivery is at-least-once: the commit
//! point advances after each batch regardless of per-message outcome, and
//! the idempotent store absorbs redelivery after a crash. Failed store
//! writes are logged and counted, not retried — broker retention is the
//! replay path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use faultline_broker::{TopicBackend, TopicMessage, TopicPosition};
use faultline_core::{Issue, IssueEvent};

use crate::cache::RecentIssueCache;
use crate::store::IssueStore;

/// Consumer lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Starting,
    Polling,
    Processing,
}

impl ConsumerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Starting,
            2 => Self::Polling,
            3 => Self::Processing,
            _ => Self::Stopped,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Starting => 1,
            Self::Polling => 2,
            Self::Processing => 3,
        }
    }
}

/// Consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Topic to consume.
    pub topic: String,
    /// Consumer-group identity shared by horizontally scaled instances.
    pub group: String,
    /// Bounded poll wait per cycle.
    pub poll_timeout: Duration,
    /// Maximum messages per batch.
    pub max_batch: usize,
    /// Sleep after an empty batch.
    pub idle_backoff: Duration,
    /// Sleep after a poll error before retrying.
    pub error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: crate::publisher::ISSUES_TOPIC.to_owned(),
            group: "issuetracker-consumer".to_owned(),
            poll_timeout: Duration::from_secs(1),
            max_batch: 10,
            idle_backoff: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Counters exposed through [`ConsumerHandle::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages persisted successfully.
    pub processed: u64,
    /// Messages whose store write failed (committed and dropped).
    pub store_failures: u64,
    /// Messages that failed to parse (committed and dropped).
    pub malformed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    store_failures: AtomicU64,
    malformed: AtomicU64,
}

/// Handle for a running consumer task.
pub struct ConsumerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: JoinHandle<()>,
    state: Arc<AtomicU8>,
    counters: Arc<Counters>,
}

impl ConsumerHandle {
    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Snapshot of the processing counters.
    #[must_use]
    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            processed: self.counters.processed.load(Ordering::SeqCst),
            store_failures: self.counters.store_failures.load(Ordering::SeqCst),
            malformed: self.counters.malformed.load(Ordering::SeqCst),
        }
    }

    /// Signal the consumer to stop and wait for it to finish.
    ///
    /// The stop signal is observed at the top of the polling state, never
    /// mid-batch, so a batch in flight is fully handled and committed.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.join_handle.await;
    }

    /// Abort the consumer task immediately.
    pub fn abort(self) {
        self.join_handle.abort();
    }
}

/// The issue consumer: polls the topic and writes issues to the store and
/// read cache.
pub struct IssueConsumer {
    backend: Arc<dyn TopicBackend>,
    store: Arc<dyn IssueStore>,
    cache: Arc<dyn RecentIssueCache>,
    config: ConsumerConfig,
}

impl IssueConsumer {
    pub fn new(
        backend: Arc<dyn TopicBackend>,
        store: Arc<dyn IssueStore>,
        cache: Arc<dyn RecentIssueCache>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            backend,
            store,
            cache,
            config,
        }
    }

    /// Start the consumer in a background task.
    ///
    /// If the broker cannot be reached during subscription the task logs
    /// the failure and remains stopped; the rest of the service continues
    /// without consumption.
    #[must_use]
    pub fn start(self) -> ConsumerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = Arc::new(AtomicU8::new(ConsumerState::Stopped.as_u8()));
        let counters = Arc::new(Counters::default());

        let task_state = state.clone();
        let task_counters = counters.clone();
        let join_handle = tokio::spawn(async move {
            self.run(task_state, task_counters, shutdown_rx).await;
        });

        ConsumerHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle,
            state,
            counters,
        }
    }

    async fn run(
        self,
        state: Arc<AtomicU8>,
        counters: Arc<Counters>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let set_state =
            |next: ConsumerState| state.store(next.as_u8(), Ordering::SeqCst);

        set_state(ConsumerState::Starting);

        if let Err(e) = self
            .backend
            .subscribe(&self.config.topic, &self.config.group)
            .await
        {
            tracing::error!(
                topic = %self.config.topic,
                group = %self.config.group,
                error = %e,
                "Failed to subscribe, consumer remains stopped"
            );
            set_state(ConsumerState::Stopped);
            return;
        }

        tracing::info!(
            topic = %self.config.topic,
            group = %self.config.group,
            "Consumer subscribed"
        );

        loop {
            set_state(ConsumerState::Polling);

            tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    tracing::info!(group = %self.config.group, "Stop signal received");
                    break;
                }
                result = self.backend.poll(
                    &self.config.topic,
                    &self.config.group,
                    self.config.max_batch,
                    self.config.poll_timeout,
                ) => match result {
                    Ok(batch) if batch.is_empty() => {
                        tokio::time::sleep(self.config.idle_backoff).await;
                    }
                    Ok(batch) => {
                        set_state(ConsumerState::Processing);
                        self.process_batch(batch, &counters).await;
                    }
                    Err(e) => {
                        tracing::error!(
                            topic = %self.config.topic,
                            error = %e,
                            "Poll failed"
                        );
                        tokio::time::sleep(self.config.error_backoff).await;
                    }
                }
            }
        }

        set_state(ConsumerState::Stopped);
        tracing::info!(group = %self.config.group, "Consumer stopped");
    }

    /// Handle one batch in arrival order, then advance the commit point.
    ///
    /// The commit covers the last attempted message per partition even when
    /// individual messages failed: poison messages and store failures must
    /// not block the partition.
    async fn process_batch(&self, batch: Vec<TopicMessage>, counters: &Counters) {
        let mut commit_points: HashMap<u32, u64> = HashMap::new();

        for message in batch {
            let position = message.position;
            self.process_message(message, counters).await;

            let entry = commit_points.entry(position.partition).or_insert(position.offset);
            *entry = (*entry).max(position.offset);
        }

        for (partition, offset) in commit_points {
            let position = TopicPosition { partition, offset };
            if let Err(e) = self
                .backend
                .commit(&self.config.topic, &self.config.group, position)
                .await
            {
                tracing::error!(
                    partition = partition,
                    offset = offset,
                    error = %e,
                    "Commit failed"
                );
            }
        }
    }

    async fn process_message(&self, message: TopicMessage, counters: &Counters) {
        let event: IssueEvent = match serde_json::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(
                    partition = message.position.partition,
                    offset = message.position.offset,
                    error = %e,
                    "Malformed message, skipping"
                );
                counters.malformed.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        let issue = Issue::from_event(&event);
        let issue_id = issue.id.clone();

        match self.store.create_or_update(issue.clone()).await {
            Ok(id) => {
                counters.processed.fetch_add(1, Ordering::SeqCst);
                tracing::info!(issue_id = %id, title = %event.title, "Issue persisted");

                if let Err(e) = self.cache.put(&issue).await {
                    tracing::warn!(issue_id = %id, error = %e, "Read cache write failed");
                }
            }
            Err(e) => {
                counters.store_failures.fetch_add(1, Ordering::SeqCst);
                tracing::error!(
                    issue_id = %issue_id,
                    error = %e,
                    "Store write failed, message committed and dropped"
                );
            }
        }
    }
}
