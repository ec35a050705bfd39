//! Sprint administration and the read models served by the dashboard.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use db::{
    DBService,
    models::{
        issue_label::{IssueLabelError, IssueLabelRepository, UpsertIssueLabel},
        issue_snapshot::{IssueHistoryEntry, IssueSnapshot, IssueSnapshotError, IssueSnapshotRepository},
        snapshot::{SnapshotError, SnapshotRepository},
        sprint::{Sprint, SprintError, SprintRepository},
        sprint_commitment::{SprintCommitmentError, SprintCommitmentRepository},
    },
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{info, instrument};

use super::{
    burndown::{self, Burndown, CommitmentFilter, IssuePoints, SnapshotSample},
    github::{GitHubClient, GitHubError},
    stats::{self, ContributorStatistics, LabelStatistics, StateTotal},
    workflow::Workflow,
};

/// Sprint name that selects every sprint due within the coming week.
pub const CURRENT_SPRINT: &str = "current";

#[derive(Debug, Error)]
pub enum SprintAdminError {
    #[error("Could not find sprint '{0}'")]
    NotFound(String),
    #[error(transparent)]
    Sprint(#[from] SprintError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    IssueSnapshot(#[from] IssueSnapshotError),
    #[error(transparent)]
    Commitment(#[from] SprintCommitmentError),
    #[error(transparent)]
    Label(#[from] IssueLabelError),
    #[error(transparent)]
    GitHub(#[from] GitHubError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

async fn resolve_sprints(
    pool: &SqlitePool,
    name_or_current: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Sprint>, SprintAdminError> {
    let sprints = if name_or_current == CURRENT_SPRINT {
        SprintRepository::find_current(pool, now).await?
    } else {
        SprintRepository::find_by_name(pool, name_or_current)
            .await?
            .into_iter()
            .collect()
    };
    if sprints.is_empty() {
        return Err(SprintAdminError::NotFound(name_or_current.to_string()));
    }
    Ok(sprints)
}

/// Lock or unlock a sprint by name, or every current sprint.
#[instrument(skip(db))]
pub async fn lock(
    db: &DBService,
    name_or_current: &str,
    locked: bool,
    now: DateTime<Utc>,
) -> Result<Vec<Sprint>, SprintAdminError> {
    let sprints = resolve_sprints(&db.pool, name_or_current, now).await?;

    let mut tx = db.begin().await?;
    let mut updated = Vec::with_capacity(sprints.len());
    for sprint in sprints {
        SprintRepository::set_locked(&mut *tx, sprint.id, locked).await?;
        updated.push(Sprint { locked, ..sprint });
    }
    tx.commit().await?;

    info!(count = updated.len(), locked, "Updated sprint lock");
    Ok(updated)
}

pub async fn list_sprints(pool: &SqlitePool) -> Result<Vec<Sprint>, SprintAdminError> {
    Ok(SprintRepository::list_by_name(pool).await?)
}

#[derive(Debug, Clone, Serialize)]
pub struct SprintStats {
    pub sprint: Sprint,
    /// `None` when the sprint has never been snapshotted.
    pub totals: Option<Vec<StateTotal>>,
}

/// Per-state totals of the latest snapshot of one sprint, or of all sprints.
pub async fn sprint_stats(
    pool: &SqlitePool,
    workflow: &Workflow,
    name: Option<&str>,
) -> Result<Vec<SprintStats>, SprintAdminError> {
    let sprints = match name {
        Some(name) => vec![
            SprintRepository::find_by_name(pool, name)
                .await?
                .ok_or_else(|| SprintAdminError::NotFound(name.to_string()))?,
        ],
        None => SprintRepository::list_by_finished(pool).await?,
    };

    let mut stats = Vec::with_capacity(sprints.len());
    for sprint in sprints {
        let totals = match SnapshotRepository::most_recent_for_sprint(pool, sprint.id).await? {
            Some(snapshot) => {
                let issues = IssueSnapshotRepository::list_for_snapshot(pool, snapshot.id).await?;
                Some(stats::state_totals(&issues, workflow))
            }
            None => None,
        };
        stats.push(SprintStats { sprint, totals });
    }
    Ok(stats)
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CommitmentChange {
    pub issue_id: i64,
    pub committed: bool,
}

/// Apply every change in one transaction.
#[instrument(skip(db, changes), fields(changes = changes.len()))]
pub async fn reconcile_commitments(
    db: &DBService,
    sprint_id: i64,
    changes: &[CommitmentChange],
) -> Result<(), SprintAdminError> {
    if SprintRepository::find_by_id(&db.pool, sprint_id).await?.is_none() {
        return Err(SprintAdminError::NotFound(sprint_id.to_string()));
    }

    let mut tx = db.begin().await?;
    for change in changes {
        if change.committed {
            SprintCommitmentRepository::insert(&mut tx, sprint_id, change.issue_id).await?;
        } else {
            SprintCommitmentRepository::delete(&mut tx, sprint_id, change.issue_id).await?;
        }
    }
    tx.commit().await?;
    Ok(())
}

/// Fetch and store the labels of every repository. Returns how many were
/// stored.
pub async fn sync_labels(
    pool: &SqlitePool,
    github: &GitHubClient,
    repos: &[String],
) -> Result<usize, SprintAdminError> {
    let mut stored = 0;
    for repo in repos {
        let labels = github.list_labels(repo).await?;
        for label in labels {
            IssueLabelRepository::upsert(
                pool,
                &UpsertIssueLabel {
                    repo: repo.clone(),
                    name: label.name,
                    color: label.color,
                    url: label.url,
                },
            )
            .await?;
            stored += 1;
        }
        info!(repo = %repo, "Stored labels");
    }
    Ok(stored)
}

#[derive(Debug, Clone, Serialize)]
pub struct SprintSummary {
    pub sprint: Sprint,
    pub snapshot_taken_at: DateTime<Utc>,
    pub total: i64,
    pub completed: i64,
    pub completion: Option<i64>,
}

/// Every snapshotted sprint with its latest totals, earliest due date first.
pub async fn dashboard(
    pool: &SqlitePool,
    workflow: &Workflow,
) -> Result<Vec<SprintSummary>, SprintAdminError> {
    let mut summaries = Vec::new();
    for sprint in SprintRepository::list_by_finished(pool).await? {
        let Some(snapshot) = SnapshotRepository::most_recent_for_sprint(pool, sprint.id).await?
        else {
            continue;
        };
        let totals = IssueSnapshotRepository::state_totals(pool, snapshot.id).await?;
        let total: i64 = totals.iter().map(|t| t.points).sum();
        let completed: i64 = totals
            .iter()
            .filter(|t| workflow.is_complete(t.state))
            .map(|t| t.points)
            .sum();

        summaries.push(SprintSummary {
            sprint,
            snapshot_taken_at: snapshot.timestamp,
            total,
            completed,
            completion: burndown::completion_percent(completed, total),
        });
    }
    Ok(summaries)
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportIssue {
    pub sprint_id: i64,
    pub repo: String,
    pub issue_id: i64,
    pub title: Option<String>,
    pub points: i64,
    pub state: i64,
    pub state_label: Option<String>,
    pub committed: bool,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct BurndownPair {
    pub all: Burndown,
    pub committed: Burndown,
}

#[derive(Debug, Clone, Serialize)]
pub struct SprintReport {
    pub sprints: Vec<Sprint>,
    pub burndown: BurndownPair,
    pub labels: Vec<LabelStatistics>,
    pub states: Vec<StateTotal>,
    pub issues: Vec<ReportIssue>,
}

/// Burndown, label statistics and current issues of one or more sprints.
#[instrument(skip(pool, workflow))]
pub async fn sprint_report(
    pool: &SqlitePool,
    workflow: &Workflow,
    tz: Tz,
    sprint_ids: &[i64],
) -> Result<SprintReport, SprintAdminError> {
    let sprints = SprintRepository::find_many(pool, sprint_ids).await?;
    let ids: Vec<i64> = sprints.iter().map(|s| s.id).collect();

    let snapshots = SnapshotRepository::list_for_sprints(pool, &ids).await?;
    let snapshot_ids: Vec<i64> = snapshots.iter().map(|s| s.id).collect();
    let mut points_by_snapshot: HashMap<i64, Vec<IssuePoints>> = HashMap::new();
    for row in IssueSnapshotRepository::points_for_snapshots(pool, &snapshot_ids).await? {
        points_by_snapshot
            .entry(row.snapshot_id)
            .or_default()
            .push(IssuePoints {
                issue_id: row.issue_id,
                points: row.points,
                state: row.state,
            });
    }
    let samples: Vec<SnapshotSample> = snapshots
        .iter()
        .filter_map(|s| {
            Some(SnapshotSample {
                snapshot_id: s.id,
                sprint_id: s.sprint_id?,
                taken_at: s.timestamp,
                issues: points_by_snapshot.remove(&s.id).unwrap_or_default(),
            })
        })
        .collect();

    let commitments = SprintCommitmentRepository::issue_ids_by_sprint(pool, &ids).await?;
    let burndown = BurndownPair {
        all: burndown::aggregate(&samples, &commitments, CommitmentFilter::All, workflow, tz),
        committed: burndown::aggregate(
            &samples,
            &commitments,
            CommitmentFilter::CommittedOnly,
            workflow,
            tz,
        ),
    };

    let mut latest: Vec<(i64, IssueSnapshot)> = Vec::new();
    for sprint in &sprints {
        if let Some(snapshot) = SnapshotRepository::most_recent_for_sprint(pool, sprint.id).await? {
            let issues = IssueSnapshotRepository::list_for_snapshot(pool, snapshot.id).await?;
            latest.extend(issues.into_iter().map(|i| (sprint.id, i)));
        }
    }

    let latest_issues: Vec<IssueSnapshot> = latest.iter().map(|(_, i)| i.clone()).collect();
    let labels = stats::label_statistics(&latest_issues, workflow);
    let states = stats::state_totals(&latest_issues, workflow);

    let mut issues: Vec<ReportIssue> = latest
        .into_iter()
        .map(|(sprint_id, issue)| ReportIssue {
            sprint_id,
            committed: commitments
                .get(&sprint_id)
                .is_some_and(|ids| ids.contains(&issue.issue_id)),
            title: issue.title().map(str::to_string),
            state_label: workflow.state(issue.state).map(|s| s.label.clone()),
            repo: issue.repo,
            issue_id: issue.issue_id,
            points: issue.points,
            state: issue.state,
            data: issue.data,
        })
        .collect();
    issues.sort_by_key(|i| (i.state, i.issue_id));

    Ok(SprintReport {
        sprints,
        burndown,
        labels,
        states,
        issues,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueHistory {
    pub repo: String,
    pub issue_id: i64,
    pub sprint_count: i64,
    pub entries: Vec<IssueHistoryEntry>,
}

pub async fn issue_history(
    pool: &SqlitePool,
    repo: &str,
    issue_id: i64,
) -> Result<IssueHistory, SprintAdminError> {
    let entries = IssueSnapshotRepository::history(pool, repo, issue_id).await?;
    if entries.is_empty() {
        return Err(SprintAdminError::NotFound(format!("{repo}#{issue_id}")));
    }
    let sprint_count = IssueSnapshotRepository::sprint_count(pool, repo, issue_id).await?;
    Ok(IssueHistory {
        repo: repo.to_string(),
        issue_id,
        sprint_count,
        entries,
    })
}

/// Builders and reviewers of the completed issues in a sprint's latest
/// snapshot, from each issue's label events.
pub async fn contributors(
    pool: &SqlitePool,
    github: &GitHubClient,
    workflow: &Workflow,
    sprint_name: &str,
) -> Result<ContributorStatistics, SprintAdminError> {
    let sprint = SprintRepository::find_by_name(pool, sprint_name)
        .await?
        .ok_or_else(|| SprintAdminError::NotFound(sprint_name.to_string()))?;
    let mut result = ContributorStatistics::default();
    let Some(snapshot) = SnapshotRepository::most_recent_for_sprint(pool, sprint.id).await? else {
        return Ok(result);
    };

    for issue in IssueSnapshotRepository::list_for_snapshot(pool, snapshot.id).await? {
        if !workflow.is_complete(issue.state) {
            continue;
        }
        let Some(events_url) = issue.data.get("events_url").and_then(Value::as_str) else {
            continue;
        };
        let events = github.list_issue_events(events_url).await?;
        result.record(&issue, stats::credit_from_events(&events));
    }
    Ok(result)
}
