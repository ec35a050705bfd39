//! Integration tests for the snapshot ingester.
//!
//! GitHub is replaced by a wiremock server; the database is a migrated
//! SQLite file from `db::test_utils`.

use std::sync::Arc;

use chrono::{Duration, SecondsFormat, Utc};
use db::{
    DBService,
    models::{
        issue_snapshot::IssueSnapshotRepository,
        snapshot::SnapshotRepository,
        sprint::SprintRepository,
    },
    test_utils::create_test_pool,
};
use serde_json::{Value, json};
use services::services::{
    config::{ConfigFile, Settings},
    github::{GitHubClient, GitHubError},
    ingest::{IngestError, Outcome, SnapshotIngester},
};
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param, query_param_is_missing},
};

struct Harness {
    server: MockServer,
    db: DBService,
    ingester: SnapshotIngester,
    _dir: TempDir,
}

async fn harness() -> Harness {
    let server = MockServer::start().await;
    let (pool, dir) = create_test_pool().await;
    let db = DBService { pool };

    let file = ConfigFile {
        github_token: Some("service-token".to_string()),
        organization: Some("acme".to_string()),
        repos: vec!["api".to_string()],
        github_api_url: Some(server.uri()),
        ..Default::default()
    };
    let settings = Arc::new(Settings::resolve(file, |_| None).expect("valid settings"));
    let github = GitHubClient::new(
        &settings.github_api_url,
        &settings.github_web_url,
        settings.github_token.clone(),
    )
    .expect("client");

    Harness {
        ingester: SnapshotIngester::new(db.clone(), github, settings),
        server,
        db,
        _dir: dir,
    }
}

fn milestone(number: i64, title: &str, due_in_days: i64) -> Value {
    let due_on = (Utc::now() + Duration::days(due_in_days)).to_rfc3339_opts(SecondsFormat::Secs, true);
    json!({ "number": number, "title": title, "state": "open", "due_on": due_on })
}

fn issue(number: i64, title: &str, state: &str, labels: &[&str], updated_at: &str) -> Value {
    json!({
        "number": number,
        "title": title,
        "state": state,
        "labels": labels.iter().map(|name| json!({ "name": name, "color": "ededed" })).collect::<Vec<_>>(),
        "updated_at": updated_at,
        "events_url": format!("https://api.github.com/repos/acme/api/issues/{number}/events"),
    })
}

async fn mount_milestones(server: &MockServer, milestones: Value) {
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/milestones"))
        .and(query_param("state", "all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(milestones))
        .mount(server)
        .await;
}

async fn mount_issues(server: &MockServer, milestone: i64, issues: Value) {
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/issues"))
        .and(query_param("milestone", milestone.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(issues))
        .mount(server)
        .await;
}

#[tokio::test]
async fn unchanged_poll_does_not_add_a_snapshot() {
    let h = harness().await;
    mount_milestones(&h.server, json!([milestone(5, "Sprint 5", 2)])).await;
    mount_issues(
        &h.server,
        5,
        json!([issue(12, "(SP3) Fix bug", "open", &["3-in-progress"], "2025-03-03T10:00:00Z")]),
    )
    .await;

    let first = h.ingester.run().await.expect("first pass");
    assert!(matches!(first.milestones[0].outcome, Outcome::Committed { .. }));
    assert_eq!(SnapshotRepository::count(&h.db.pool).await.unwrap(), 1);

    let second = h.ingester.run().await.expect("second pass");
    assert_eq!(second.milestones[0].outcome, Outcome::Unchanged);
    assert_eq!(SnapshotRepository::count(&h.db.pool).await.unwrap(), 1);
}

#[tokio::test]
async fn points_and_state_come_from_title_and_label() {
    let h = harness().await;
    mount_milestones(&h.server, json!([milestone(5, "Sprint 5", 2)])).await;
    mount_issues(
        &h.server,
        5,
        json!([issue(12, "(SP3) Fix bug", "open", &["3-in-progress"], "2025-03-03T10:00:00Z")]),
    )
    .await;

    h.ingester.run().await.expect("pass");

    let recorded = IssueSnapshotRepository::latest_for_issue(&h.db.pool, "acme/api", 12)
        .await
        .unwrap()
        .expect("issue recorded");
    assert_eq!(recorded.points, 3);
    assert_eq!(recorded.state, 1, "Building");
    assert_eq!(recorded.title(), Some("(SP3) Fix bug"));

    let sprint = SprintRepository::find_by_name(&h.db.pool, "Sprint 5")
        .await
        .unwrap()
        .expect("sprint created");
    assert!(!sprint.locked);
    assert_eq!(sprint.data.as_ref().and_then(|d| d["number"].as_i64()), Some(5));
}

#[tokio::test]
async fn changed_issue_adds_a_snapshot() {
    let h = harness().await;
    mount_milestones(&h.server, json!([milestone(5, "Sprint 5", 2)])).await;
    mount_issues(
        &h.server,
        5,
        json!([issue(12, "(SP3) Fix bug", "open", &["3-in-progress"], "2025-03-03T10:00:00Z")]),
    )
    .await;
    h.ingester.run().await.expect("first pass");

    h.server.reset().await;
    mount_milestones(&h.server, json!([milestone(5, "Sprint 5", 2)])).await;
    mount_issues(
        &h.server,
        5,
        json!([issue(12, "(SP3) Fix bug", "closed", &["3-in-progress"], "2025-03-04T08:00:00Z")]),
    )
    .await;

    let report = h.ingester.run().await.expect("second pass");
    assert!(matches!(report.milestones[0].outcome, Outcome::Committed { .. }));
    assert_eq!(SnapshotRepository::count(&h.db.pool).await.unwrap(), 2);

    let latest = IssueSnapshotRepository::latest_for_issue(&h.db.pool, "acme/api", 12)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.state, 4, "closed issues land in the closed state");
}

#[tokio::test]
async fn locked_sprint_is_skipped() {
    let h = harness().await;
    mount_milestones(&h.server, json!([milestone(5, "Sprint 5", 2)])).await;
    mount_issues(
        &h.server,
        5,
        json!([issue(12, "(SP3) Fix bug", "open", &["3-in-progress"], "2025-03-03T10:00:00Z")]),
    )
    .await;
    h.ingester.run().await.expect("first pass");

    let sprint = SprintRepository::find_by_name(&h.db.pool, "Sprint 5")
        .await
        .unwrap()
        .unwrap();
    SprintRepository::set_locked(&h.db.pool, sprint.id, true)
        .await
        .unwrap();

    h.server.reset().await;
    mount_milestones(&h.server, json!([milestone(5, "Sprint 5", 2)])).await;
    mount_issues(
        &h.server,
        5,
        json!([issue(12, "(SP3) Fix bug", "open", &["4-review"], "2025-03-05T08:00:00Z")]),
    )
    .await;

    let report = h.ingester.run().await.expect("second pass");
    assert_eq!(report.milestones[0].outcome, Outcome::Locked);
    assert_eq!(SnapshotRepository::count(&h.db.pool).await.unwrap(), 1);
}

#[tokio::test]
async fn unclassifiable_issue_is_skipped() {
    let h = harness().await;
    mount_milestones(&h.server, json!([milestone(5, "Sprint 5", 2)])).await;
    mount_issues(
        &h.server,
        5,
        json!([
            issue(12, "(SP3) Fix bug", "open", &["3-in-progress"], "2025-03-03T10:00:00Z"),
            issue(13, "(SP2) Triage", "open", &["bug"], "2025-03-03T10:00:00Z"),
        ]),
    )
    .await;

    let report = h.ingester.run().await.expect("pass");
    let outcome = &report.milestones[0];
    assert_eq!(outcome.issues_recorded, 1);
    assert_eq!(outcome.issues_skipped, 1);

    let skipped = IssueSnapshotRepository::latest_for_issue(&h.db.pool, "acme/api", 13)
        .await
        .unwrap();
    assert!(skipped.is_none());
}

#[tokio::test]
async fn milestone_without_issues_leaves_no_trace() {
    let h = harness().await;
    mount_milestones(&h.server, json!([milestone(6, "Sprint 6", 3)])).await;
    mount_issues(&h.server, 6, json!([])).await;

    let report = h.ingester.run().await.expect("pass");
    assert_eq!(report.milestones[0].outcome, Outcome::Unchanged);
    assert_eq!(SnapshotRepository::count(&h.db.pool).await.unwrap(), 0);
    assert!(
        SprintRepository::find_by_name(&h.db.pool, "Sprint 6")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn milestones_outside_the_window_are_ignored() {
    let h = harness().await;
    mount_milestones(
        &h.server,
        json!([
            milestone(1, "Sprint 1", -30),
            milestone(9, "Sprint 9", 30),
            { "number": 10, "title": "Backlog", "due_on": null },
        ]),
    )
    .await;

    let report = h.ingester.run().await.expect("pass");
    assert!(report.milestones.is_empty());
}

#[tokio::test]
async fn issues_are_collected_across_pages() {
    let h = harness().await;
    mount_milestones(&h.server, json!([milestone(5, "Sprint 5", 2)])).await;

    let next = format!(
        "<{}/repos/acme/api/issues?state=all&milestone=5&page=2>; rel=\"next\"",
        h.server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/issues"))
        .and(query_param_is_missing("page"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", next.as_str())
                .set_body_json(json!([issue(1, "(SP1) One", "open", &["1-ready"], "2025-03-03T10:00:00Z")])),
        )
        .mount(&h.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/issues"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([issue(2, "(SP2) Two", "open", &["2-ready"], "2025-03-03T10:00:00Z")])),
        )
        .mount(&h.server)
        .await;

    let report = h.ingester.run().await.expect("pass");
    assert_eq!(report.milestones[0].issues_recorded, 2);
}

#[tokio::test]
async fn upstream_failure_aborts_the_pass() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/api/milestones"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&h.server)
        .await;

    let err = h.ingester.run().await.expect_err("upstream failure");
    assert!(matches!(
        err,
        IngestError::GitHub(GitHubError::Status { status: 502, .. })
    ));
    assert_eq!(SnapshotRepository::count(&h.db.pool).await.unwrap(), 0);
}
