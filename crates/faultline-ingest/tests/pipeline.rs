//! Integration tests for the issue ingestion pipeline.
//!
//! Runs the full flow over in-memory backends: report -> fingerprint ->
//! dedup -> publish -> consume -> document store + read cache.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use faultline_core::{
    ActivityKind, ErrorReport, IssueEvent, IssueKind, IssuePriority, IssueStatus, Severity,
};
use faultline_ingest::{
    ConsumerConfig, IssueConsumer, IssuePublisher, IssueReporter, IssueStore, MemoryDedupCache,
    MemoryIssueStore, MemoryRecentCache, RecentIssueCache, ReportOutcome, ISSUES_TOPIC,
};
use faultline_broker::MemoryTopic;
use faultline_ingest::IssueFilter;

const CACHE_TTL: Duration = Duration::from_millis(300);

struct Pipeline {
    store: Arc<MemoryIssueStore>,
    cache: Arc<MemoryRecentCache>,
    reporter: IssueReporter,
    publisher: Arc<IssuePublisher>,
    consumer: Option<faultline_ingest::ConsumerHandle>,
}

fn consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        poll_timeout: Duration::from_millis(20),
        idle_backoff: Duration::from_millis(5),
        error_backoff: Duration::from_millis(5),
        ..Default::default()
    }
}

fn start_pipeline() -> Pipeline {
    let topic = Arc::new(MemoryTopic::new(4));
    let store = Arc::new(MemoryIssueStore::new());
    let cache = Arc::new(MemoryRecentCache::new(CACHE_TTL));

    let publisher = Arc::new(IssuePublisher::new(topic.clone(), ISSUES_TOPIC));
    let reporter = IssueReporter::new(
        publisher.clone(),
        Arc::new(MemoryDedupCache::new()),
        store.clone(),
    );

    let consumer = IssueConsumer::new(topic, store.clone(), cache.clone(), consumer_config());

    Pipeline {
        store,
        cache,
        reporter,
        publisher,
        consumer: Some(consumer.start()),
    }
}

async fn wait_for_issue_count(store: &MemoryIssueStore, expected: usize) {
    for _ in 0..200 {
        let issues = store.list(&IssueFilter::default(), 100).await.unwrap();
        if issues.len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("store never reached {expected} issues");
}

fn sample_report() -> ErrorReport {
    serde_json::from_value(serde_json::json!({
        "title": "X",
        "error_type": "ServiceError",
        "message": "handler failed for request id=4411",
        "component": "svc-a",
        "kind": "bug",
        "priority": "high",
        "reporter_id": "svc-a",
    }))
    .unwrap()
}

#[tokio::test]
async fn report_flows_to_store_and_cache_then_cache_expires() {
    let mut pipeline = start_pipeline();

    let outcome = pipeline.reporter.report(sample_report()).await;
    let ReportOutcome::Accepted { issue_id, .. } = outcome else {
        panic!("expected Accepted, got {outcome:?}");
    };

    // Consumer picks the event up within a poll cycle.
    wait_for_issue_count(&pipeline.store, 1).await;

    let issue = pipeline.store.get(&issue_id).await.unwrap().unwrap();
    assert_eq!(issue.title, "X");
    assert_eq!(issue.kind, IssueKind::Bug);
    assert_eq!(issue.priority, IssuePriority::High);
    assert_eq!(issue.status, IssueStatus::Open);

    // Read cache carries the snapshot and lists it as recent.
    let recent = pipeline.cache.list_recent(10).await.unwrap();
    assert!(recent.iter().any(|i| i.id == issue_id));

    // After the TTL the cache index no longer lists the issue, but the
    // document store record is unaffected.
    tokio::time::sleep(CACHE_TTL + Duration::from_millis(100)).await;
    assert!(pipeline.cache.list_recent(10).await.unwrap().is_empty());
    assert!(pipeline.store.get(&issue_id).await.unwrap().is_some());

    pipeline.consumer.take().unwrap().shutdown().await;
}

#[tokio::test]
async fn duplicate_reports_collapse_into_one_issue() {
    let mut pipeline = start_pipeline();

    let first = pipeline.reporter.report(sample_report()).await;
    let ReportOutcome::Accepted { issue_id, .. } = first else {
        panic!("expected Accepted");
    };

    wait_for_issue_count(&pipeline.store, 1).await;

    // Cosmetically different message, same underlying error.
    let mut duplicate = sample_report();
    duplicate.message = "handler failed for request id=9280".to_owned();
    let second = pipeline.reporter.report(duplicate).await;
    assert_eq!(
        second,
        ReportOutcome::Deduplicated {
            issue_id: issue_id.clone()
        }
    );

    // Give the consumer a chance to (incorrectly) persist a second issue.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let issues = pipeline
        .store
        .list(&IssueFilter::default(), 100)
        .await
        .unwrap();
    assert_eq!(issues.len(), 1);

    let activities = pipeline.store.activities(&issue_id).await.unwrap();
    assert!(activities.iter().any(|a| a.kind == ActivityKind::Created));
    assert!(activities.iter().any(|a| a.kind == ActivityKind::Recurred));

    pipeline.consumer.take().unwrap().shutdown().await;
}

#[tokio::test]
async fn direct_event_publish_matches_reporting_schema() {
    let mut pipeline = start_pipeline();

    // A producer other than the reporter emits the identical wire schema.
    let event = IssueEvent {
        title: "Manual issue".to_owned(),
        description: "created via the ingestion endpoint".to_owned(),
        kind: IssueKind::Task,
        priority: IssuePriority::Medium,
        reporter_id: "dashboard".to_owned(),
        assignee_id: Some("dev-1".to_owned()),
        tags: BTreeSet::from(["manual".to_owned()]),
        component: "web".to_owned(),
        severity: Severity::Warning,
        context: BTreeMap::new(),
        created_at: chrono::Utc::now(),
        source: "api".to_owned(),
    };

    let outcome = pipeline.publisher.publish(&event).await;
    assert_eq!(outcome, faultline_ingest::PublishOutcome::Accepted);

    wait_for_issue_count(&pipeline.store, 1).await;

    let issue = pipeline
        .store
        .get(&event.document_key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(issue.title, "Manual issue");
    assert_eq!(issue.assignee_id.as_deref(), Some("dev-1"));

    pipeline.consumer.take().unwrap().shutdown().await;
}

#[tokio::test]
async fn consumer_survives_interleaved_components() {
    let mut pipeline = start_pipeline();

    for component in ["svc-a", "svc-b", "svc-c"] {
        let mut report = sample_report();
        report.component = component.to_owned();
        report.title = format!("failure in {component}");
        let outcome = pipeline.reporter.report(report).await;
        assert!(matches!(outcome, ReportOutcome::Accepted { .. }));
    }

    wait_for_issue_count(&pipeline.store, 3).await;

    let issues = pipeline
        .store
        .list(&IssueFilter::default(), 100)
        .await
        .unwrap();
    assert_eq!(issues.len(), 3);

    pipeline.consumer.take().unwrap().shutdown().await;
}
