//! Reporting-path orchestration.
//!
//! The reporter is what callers hand an error occurrence to. It computes
//! the fingerprint, consults the deduplication cache, and either records a
//! recurrence against the existing issue or publishes a fresh event. The
//! caller is never blocked on persistence and never sees an error from this
//! path; every outcome is encoded in the return value.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use faultline_core::{
    Activity, ActivityKind, ErrorReport, Fingerprinter, IssueEvent, IssueId, CONTEXT_ERROR_TYPE,
    CONTEXT_FINGERPRINT,
};

use crate::dedup::{DedupCache, DEFAULT_DEDUP_TTL};
use crate::publisher::{IssuePublisher, PublishOutcome};
use crate::store::IssueStore;

/// Outcome of a report call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// A new event was published; the issue will appear under `issue_id`
    /// once the consumer persists it. `tracking_id` is a temporary
    /// identifier for the caller's own logs.
    Accepted {
        tracking_id: Uuid,
        issue_id: IssueId,
    },
    /// The fingerprint matched an issue seen within the dedup window; a
    /// recurrence was recorded instead of a new issue.
    Deduplicated { issue_id: IssueId },
    /// The publisher is degraded; nothing was sent. The caller should log
    /// locally.
    Degraded { tracking_id: Uuid },
}

/// Accepts error reports and routes them through dedup and the publisher.
pub struct IssueReporter {
    fingerprinter: Fingerprinter,
    publisher: Arc<IssuePublisher>,
    dedup: Arc<dyn DedupCache>,
    store: Arc<dyn IssueStore>,
    dedup_ttl: Duration,
}

impl IssueReporter {
    pub fn new(
        publisher: Arc<IssuePublisher>,
        dedup: Arc<dyn DedupCache>,
        store: Arc<dyn IssueStore>,
    ) -> Self {
        Self {
            fingerprinter: Fingerprinter::new(),
            publisher,
            dedup,
            store,
            dedup_ttl: DEFAULT_DEDUP_TTL,
        }
    }

    /// Override the deduplication window.
    #[must_use]
    pub fn with_dedup_ttl(mut self, ttl: Duration) -> Self {
        self.dedup_ttl = ttl;
        self
    }

    /// Report an error occurrence.
    ///
    /// Duplicate fingerprints within the dedup window collapse onto the
    /// existing issue as a `recurred` activity; everything else is
    /// published asynchronously. Never fails the caller.
    pub async fn report(&self, report: ErrorReport) -> ReportOutcome {
        let fingerprint = self.fingerprinter.compute(
            &report.error_type,
            &report.component,
            &report.message,
            report.stack_location.as_deref(),
        );

        if let Some(issue_id) = self.dedup.lookup(&report.reporter_id, &fingerprint).await {
            tracing::debug!(
                issue_id = %issue_id,
                component = %report.component,
                "Duplicate fingerprint, recording recurrence"
            );

            // Best effort: the issue may not be persisted yet if the
            // consumer is lagging behind the dedup entry.
            let activity = Activity::new(ActivityKind::Recurred, &report.reporter_id);
            if let Err(e) = self.store.add_activity(&issue_id, activity).await {
                tracing::warn!(issue_id = %issue_id, error = %e, "Failed to record recurrence");
            }

            return ReportOutcome::Deduplicated { issue_id };
        }

        let reporter_id = report.reporter_id.clone();
        let event = build_event(report, &fingerprint);
        let issue_id = event.document_key();
        let tracking_id = Uuid::new_v4();

        match self.publisher.publish(&event).await {
            PublishOutcome::Accepted => {
                self.dedup
                    .remember(&reporter_id, &fingerprint, &issue_id, self.dedup_ttl)
                    .await;
                ReportOutcome::Accepted {
                    tracking_id,
                    issue_id,
                }
            }
            PublishOutcome::Degraded => {
                tracing::warn!(
                    tracking_id = %tracking_id,
                    title = %event.title,
                    "Publisher degraded, report not sent"
                );
                ReportOutcome::Degraded { tracking_id }
            }
        }
    }
}

impl std::fmt::Debug for IssueReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueReporter")
            .field("dedup_ttl", &self.dedup_ttl)
            .finish_non_exhaustive()
    }
}

/// Turn a report into the immutable wire event.
///
/// The fingerprint and original error type travel in the event context so
/// downstream writers can derive the deterministic document key.
fn build_event(report: ErrorReport, fingerprint: &str) -> IssueEvent {
    let mut context: BTreeMap<String, serde_json::Value> = report.context;
    context.insert(
        CONTEXT_FINGERPRINT.to_owned(),
        serde_json::Value::String(fingerprint.to_owned()),
    );
    context.insert(
        CONTEXT_ERROR_TYPE.to_owned(),
        serde_json::Value::String(report.error_type),
    );

    let description = if report.description.is_empty() {
        report.message
    } else {
        report.description
    };

    IssueEvent {
        title: report.title,
        description,
        kind: report.kind,
        priority: report.priority,
        reporter_id: report.reporter_id,
        assignee_id: report.assignee_id,
        tags: report.tags,
        component: report.component,
        severity: report.severity,
        context,
        created_at: Utc::now(),
        source: report.source,
    }
}
