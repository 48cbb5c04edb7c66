//! Event, entity, and report types for the issue pipeline.
//!
//! [`IssueEvent`] is the wire message published to the broker and is
//! immutable once published. [`Issue`] is the persisted entity owned by the
//! document store; it carries everything the event carried plus the fields
//! the store is authoritative for (id, status, timestamps).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Context key under which the reporting path stores the computed
/// fingerprint of an error occurrence.
pub const CONTEXT_FINGERPRINT: &str = "fingerprint";

/// Context key under which the reporting path stores the original error
/// type of an occurrence.
pub const CONTEXT_ERROR_TYPE: &str = "error_type";

/// Issue classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueKind {
    Bug,
    Feature,
    Task,
    Enhancement,
}

/// Issue priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssuePriority {
    Low,
    Medium,
    High,
    Critical,
}

/// Lifecycle status of a persisted issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl Default for IssueStatus {
    fn default() -> Self {
        Self::Open
    }
}

/// Severity of the reported occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// Kind of entry in an issue's activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityKind {
    Created,
    Updated,
    StatusChanged,
    Commented,
    /// A deduplicated re-occurrence of the same fingerprint.
    Recurred,
}

/// Identifier of a persisted issue.
///
/// Derived deterministically from the event (see
/// [`IssueEvent::document_key`]) so that redelivered events resolve to the
/// same document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(pub String);

impl IssueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Wire message describing one reported issue occurrence.
///
/// Published as JSON to the `issues` topic. Producers other than the
/// publisher must emit the identical schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueEvent {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: IssueKind,
    pub priority: IssuePriority,
    pub reporter_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub component: String,
    pub severity: Severity,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub source: String,
}

impl IssueEvent {
    /// Fingerprint carried in the event context, if the reporting path
    /// computed one.
    #[must_use]
    pub fn fingerprint(&self) -> Option<&str> {
        self.context
            .get(CONTEXT_FINGERPRINT)
            .and_then(serde_json::Value::as_str)
    }

    /// Derive the deterministic document key for this event.
    ///
    /// The key is a truncated SHA-256 over the fingerprint (or, when the
    /// event carries none, over title, component and reporter) combined with
    /// the creation timestamp. Redelivery of the same event therefore
    /// resolves to the same document, never a duplicate.
    #[must_use]
    pub fn document_key(&self) -> IssueId {
        const DELIMITER: &[u8] = b"\x00";

        let mut hasher = Sha256::new();
        match self.fingerprint() {
            Some(fp) => hasher.update(fp.as_bytes()),
            None => {
                hasher.update(self.title.as_bytes());
                hasher.update(DELIMITER);
                hasher.update(self.component.as_bytes());
                hasher.update(DELIMITER);
                hasher.update(self.reporter_id.as_bytes());
            }
        }
        hasher.update(DELIMITER);
        hasher.update(self.created_at.timestamp_millis().to_be_bytes());

        let digest = hasher.finalize();
        IssueId(hex::encode(&digest[..16]))
    }
}

/// A comment on an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(author_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_id: author_id.into(),
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// One tracked field change inside an [`Activity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
}

/// An entry in an issue's append-only activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub kind: ActivityKind,
    pub user_id: String,
    #[serde(default)]
    pub changes: Vec<FieldChange>,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn new(kind: ActivityKind, user_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            user_id: user_id.into(),
            changes: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_changes(mut self, changes: Vec<FieldChange>) -> Self {
        self.changes = changes;
        self
    }
}

/// The persisted issue entity.
///
/// Superset of [`IssueEvent`]; only the document store writer mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: IssueKind,
    pub priority: IssuePriority,
    #[serde(default)]
    pub status: IssueStatus,
    pub severity: Severity,
    pub component: String,
    pub reporter_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Issue {
    /// Build the persisted form of an event.
    ///
    /// The id is the event's deterministic document key; status starts open
    /// and `updated_at` mirrors `created_at` until the first update.
    #[must_use]
    pub fn from_event(event: &IssueEvent) -> Self {
        Self {
            id: event.document_key(),
            title: event.title.clone(),
            description: event.description.clone(),
            kind: event.kind,
            priority: event.priority,
            status: IssueStatus::Open,
            severity: event.severity,
            component: event.component.clone(),
            reporter_id: event.reporter_id.clone(),
            assignee_id: event.assignee_id.clone(),
            tags: event.tags.clone(),
            context: event.context.clone(),
            fingerprint: event.fingerprint().map(str::to_owned),
            source: event.source.clone(),
            created_at: event.created_at,
            updated_at: event.created_at,
            resolved_at: None,
        }
    }
}

/// An error occurrence as submitted by a reporting caller.
///
/// This is the input to the reporting path; the reporter turns it into an
/// [`IssueEvent`] after fingerprinting and deduplication.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorReport {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub error_type: String,
    pub message: String,
    pub component: String,
    #[serde(default)]
    pub stack_location: Option<String>,
    #[serde(default = "default_report_kind")]
    pub kind: IssueKind,
    #[serde(default = "default_report_priority")]
    pub priority: IssuePriority,
    #[serde(default = "default_report_severity")]
    pub severity: Severity,
    pub reporter_id: String,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(default = "default_report_source")]
    pub source: String,
}

fn default_report_kind() -> IssueKind {
    IssueKind::Bug
}

fn default_report_priority() -> IssuePriority {
    IssuePriority::Medium
}

fn default_report_severity() -> Severity {
    Severity::Error
}

fn default_report_source() -> String {
    "error-report".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> IssueEvent {
        IssueEvent {
            title: "Connection refused".to_owned(),
            description: "svc-a cannot reach the database".to_owned(),
            kind: IssueKind::Bug,
            priority: IssuePriority::High,
            reporter_id: "svc-a".to_owned(),
            assignee_id: None,
            tags: BTreeSet::from(["database".to_owned()]),
            component: "svc-a".to_owned(),
            severity: Severity::Error,
            context: BTreeMap::new(),
            created_at: "2024-03-01T12:00:00Z".parse().unwrap(),
            source: "svc-a".to_owned(),
        }
    }

    #[test]
    fn event_json_round_trip() {
        let event = sample_event();
        let json = serde_json::to_string(&event).unwrap();
        let parsed: IssueEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn enum_wire_values() {
        assert_eq!(
            serde_json::to_string(&IssueStatus::InProgress).unwrap(),
            "\"in-progress\""
        );
        assert_eq!(
            serde_json::to_string(&ActivityKind::StatusChanged).unwrap(),
            "\"status-changed\""
        );
        assert_eq!(serde_json::to_string(&IssueKind::Bug).unwrap(), "\"bug\"");
    }

    #[test]
    fn document_key_is_stable() {
        let event = sample_event();
        assert_eq!(event.document_key(), event.document_key());
    }

    #[test]
    fn document_key_prefers_fingerprint() {
        let mut with_fp = sample_event();
        with_fp.context.insert(
            CONTEXT_FINGERPRINT.to_owned(),
            serde_json::Value::String("abc123".to_owned()),
        );
        let without_fp = sample_event();

        assert_ne!(with_fp.document_key(), without_fp.document_key());

        // Title differences are irrelevant once a fingerprint is present.
        let mut retitled = with_fp.clone();
        retitled.title = "Something else".to_owned();
        assert_eq!(with_fp.document_key(), retitled.document_key());
    }

    #[test]
    fn document_key_varies_with_created_at() {
        let first = sample_event();
        let mut later = sample_event();
        later.created_at = "2024-03-02T12:00:00Z".parse().unwrap();
        assert_ne!(first.document_key(), later.document_key());
    }

    #[test]
    fn issue_from_event_defaults() {
        let event = sample_event();
        let issue = Issue::from_event(&event);

        assert_eq!(issue.id, event.document_key());
        assert_eq!(issue.status, IssueStatus::Open);
        assert_eq!(issue.updated_at, event.created_at);
        assert!(issue.resolved_at.is_none());
        assert!(issue.fingerprint.is_none());
    }

    #[test]
    fn error_report_deserialises_with_defaults() {
        let report: ErrorReport = serde_json::from_str(
            r#"{
                "title": "Timeout",
                "error_type": "TimeoutError",
                "message": "upstream timed out",
                "component": "gateway",
                "reporter_id": "svc-b"
            }"#,
        )
        .unwrap();

        assert_eq!(report.kind, IssueKind::Bug);
        assert_eq!(report.priority, IssuePriority::Medium);
        assert_eq!(report.severity, Severity::Error);
        assert_eq!(report.source, "error-report");
        assert!(report.stack_location.is_none());
    }
}
