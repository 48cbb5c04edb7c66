//! HTTP ingestion API.
//!
//! The write side responds "accepted, processing asynchronously" with a
//! temporary tracking id; the final store-assigned id is discovered through
//! a follow-up listing read. The read side serves from the recent cache and
//! falls back to the document store when the cache is stale or unavailable.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use faultline_core::{
    ErrorReport, Issue, IssueEvent, IssueId, IssueKind, IssuePriority, Severity,
};
use faultline_ingest::{
    IssueFilter, IssuePublisher, IssueReporter, IssueStore, PublishOutcome, RecentIssueCache,
    ReportOutcome,
};

/// Shared application state.
pub struct AppState {
    pub reporter: IssueReporter,
    pub publisher: Arc<IssuePublisher>,
    pub store: Arc<dyn IssueStore>,
    pub cache: Arc<dyn RecentIssueCache>,
}

/// Creates the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/errors", post(report_error))
        .route("/v1/issues", post(create_issue))
        .route("/v1/issues/recent", get(list_recent))
        .route("/v1/issues/{id}", get(get_issue))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    publisher: &'static str,
}

/// Health check endpoint.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        publisher: if state.publisher.is_degraded() {
            "degraded"
        } else {
            "connected"
        },
    })
}

#[derive(Serialize)]
struct IngestResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tracking_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    issue_id: Option<IssueId>,
}

/// Report an error occurrence through the deduplicating path.
async fn report_error(
    State(state): State<Arc<AppState>>,
    Json(report): Json<ErrorReport>,
) -> impl IntoResponse {
    let response = match state.reporter.report(report).await {
        ReportOutcome::Accepted { tracking_id, .. } => IngestResponse {
            status: "accepted",
            tracking_id: Some(tracking_id),
            issue_id: None,
        },
        ReportOutcome::Deduplicated { issue_id } => IngestResponse {
            status: "deduplicated",
            tracking_id: None,
            issue_id: Some(issue_id),
        },
        ReportOutcome::Degraded { tracking_id } => IngestResponse {
            status: "degraded",
            tracking_id: Some(tracking_id),
            issue_id: None,
        },
    };

    (StatusCode::ACCEPTED, Json(response))
}

/// Issue creation request: the event fields, with the timestamp optional.
#[derive(Debug, Deserialize)]
pub struct IssueCreateRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub kind: IssueKind,
    pub priority: IssuePriority,
    pub reporter_id: String,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub component: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_severity() -> Severity {
    Severity::Warning
}

fn default_source() -> String {
    "api".to_owned()
}

/// Create an issue by publishing the event directly (no dedup).
async fn create_issue(
    State(state): State<Arc<AppState>>,
    Json(request): Json<IssueCreateRequest>,
) -> impl IntoResponse {
    let event = IssueEvent {
        title: request.title,
        description: request.description,
        kind: request.kind,
        priority: request.priority,
        reporter_id: request.reporter_id,
        assignee_id: request.assignee_id,
        tags: request.tags,
        component: request.component,
        severity: request.severity,
        context: request.context,
        created_at: request.created_at.unwrap_or_else(Utc::now),
        source: request.source,
    };

    let tracking_id = Uuid::new_v4();
    let status = match state.publisher.publish(&event).await {
        PublishOutcome::Accepted => "accepted",
        PublishOutcome::Degraded => {
            tracing::warn!(tracking_id = %tracking_id, "Issue creation degraded");
            "degraded"
        }
    };

    (
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            status,
            tracking_id: Some(tracking_id),
            issue_id: None,
        }),
    )
}

#[derive(Deserialize)]
struct RecentParams {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Serialize)]
struct IssueListResponse {
    issues: Vec<Issue>,
}

/// List recent issues from the cache, falling back to the store.
async fn list_recent(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecentParams>,
) -> Result<Json<IssueListResponse>, StatusCode> {
    match state.cache.list_recent(params.limit).await {
        Ok(issues) if !issues.is_empty() => return Ok(Json(IssueListResponse { issues })),
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Recent cache unavailable, falling back to store");
        }
    }

    let issues = state
        .store
        .list(&IssueFilter::default(), params.limit)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Store listing failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(IssueListResponse { issues }))
}

/// Fetch a single issue, cache first.
async fn get_issue(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Issue>, StatusCode> {
    let id = IssueId::new(id);

    match state.cache.get(&id).await {
        Ok(Some(issue)) => return Ok(Json(issue)),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(error = %e, "Cache read failed, falling back to store");
        }
    }

    match state.store.get(&id).await {
        Ok(Some(issue)) => Ok(Json(issue)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!(issue_id = %id, error = %e, "Store read failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_broker::MemoryTopic;
    use faultline_ingest::{MemoryDedupCache, MemoryIssueStore, MemoryRecentCache, ISSUES_TOPIC};

    fn test_state() -> Arc<AppState> {
        let topic = Arc::new(MemoryTopic::new(1));
        let store = Arc::new(MemoryIssueStore::new());
        let cache = Arc::new(MemoryRecentCache::default());
        let publisher = Arc::new(IssuePublisher::new(topic, ISSUES_TOPIC));
        let reporter = IssueReporter::new(
            publisher.clone(),
            Arc::new(MemoryDedupCache::new()),
            store.clone(),
        );

        Arc::new(AppState {
            reporter,
            publisher,
            store,
            cache,
        })
    }

    #[tokio::test]
    async fn router_builds() {
        let _router = router(test_state());
    }

    #[tokio::test]
    async fn create_request_parses_with_defaults() {
        let request: IssueCreateRequest = serde_json::from_value(serde_json::json!({
            "title": "X",
            "kind": "bug",
            "priority": "high",
            "reporter_id": "svc-a",
            "component": "svc-a",
        }))
        .unwrap();

        assert_eq!(request.severity, Severity::Warning);
        assert_eq!(request.source, "api");
        assert!(request.created_at.is_none());
    }
}
