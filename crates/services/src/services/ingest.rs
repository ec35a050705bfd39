//! Polls GitHub and records a snapshot of every recent milestone.
//!
//! Each milestone is written in a single transaction: the sprint (created on
//! first sight), one snapshot, and one issue snapshot per classifiable issue.
//! The transaction is only committed when at least one issue changed since
//! it was last recorded, so polling an idle tracker never grows the
//! snapshot table.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use db::{
    DBService,
    models::{
        issue_snapshot::{CreateIssueSnapshot, IssueSnapshotError, IssueSnapshotRepository},
        snapshot::{SnapshotError, SnapshotRepository},
        sprint::{CreateSprint, SprintError, SprintRepository},
    },
};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use super::{
    config::Settings,
    github::{GitHubClient, GitHubError, Milestone},
};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    GitHub(#[from] GitHubError),
    #[error(transparent)]
    Sprint(#[from] SprintError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    IssueSnapshot(#[from] IssueSnapshotError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// A new snapshot was stored.
    Committed { snapshot_id: i64 },
    /// Nothing changed since the last poll; the snapshot was discarded.
    Unchanged,
    /// The sprint is locked and was not polled.
    Locked,
}

#[derive(Debug, Clone, Serialize)]
pub struct MilestoneOutcome {
    pub repo: String,
    pub milestone_number: i64,
    pub sprint_name: String,
    pub outcome: Outcome,
    pub issues_recorded: usize,
    pub issues_skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub started_at: DateTime<Utc>,
    pub milestones: Vec<MilestoneOutcome>,
}

impl IngestReport {
    pub fn committed(&self) -> usize {
        self.milestones
            .iter()
            .filter(|m| matches!(m.outcome, Outcome::Committed { .. }))
            .count()
    }
}

#[derive(Clone)]
pub struct SnapshotIngester {
    db: DBService,
    github: GitHubClient,
    settings: Arc<Settings>,
}

impl SnapshotIngester {
    pub fn new(db: DBService, github: GitHubClient, settings: Arc<Settings>) -> Self {
        Self {
            db,
            github,
            settings,
        }
    }

    /// Poll every configured repository once.
    pub async fn run(&self) -> Result<IngestReport, IngestError> {
        self.run_at(Utc::now()).await
    }

    #[instrument(skip(self), fields(repos = self.settings.repos.len()))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<IngestReport, IngestError> {
        let mut report = IngestReport {
            started_at: now,
            milestones: Vec::new(),
        };

        for repo in &self.settings.repos {
            let repo = self.settings.repo_path(repo);
            let milestones = self
                .github
                .recent_milestones(&repo, now, self.settings.milestone_window_days)
                .await?;
            info!(repo = %repo, count = milestones.len(), "Found recent milestones");

            for milestone in milestones {
                let outcome = self.snapshot_milestone(&repo, milestone, now).await?;
                report.milestones.push(outcome);
            }
        }

        info!(
            milestones = report.milestones.len(),
            committed = report.committed(),
            "Snapshot pass finished"
        );
        Ok(report)
    }

    #[instrument(skip(self, milestone), fields(milestone = %milestone.title))]
    async fn snapshot_milestone(
        &self,
        repo: &str,
        milestone: Milestone,
        now: DateTime<Utc>,
    ) -> Result<MilestoneOutcome, IngestError> {
        let mut outcome = MilestoneOutcome {
            repo: repo.to_string(),
            milestone_number: milestone.number,
            sprint_name: milestone.title.clone(),
            outcome: Outcome::Locked,
            issues_recorded: 0,
            issues_skipped: 0,
        };

        if let Some(sprint) = SprintRepository::find_by_name(&self.db.pool, &milestone.title).await?
            && sprint.locked
        {
            info!(sprint = %sprint.name, "Skipping locked sprint");
            return Ok(outcome);
        }

        let issues = self.github.list_issues(repo, milestone.number).await?;
        let workflow = &self.settings.workflow;

        let mut tx = self.db.begin().await?;
        let sprint = SprintRepository::get_or_create(
            &mut tx,
            CreateSprint {
                name: milestone.title.clone(),
                finished: milestone.due_on,
                data: Some(milestone.raw.clone()),
            },
        )
        .await?;
        if sprint.locked {
            tx.rollback().await?;
            return Ok(outcome);
        }

        let snapshot = SnapshotRepository::create(&mut tx, sprint.id, now).await?;
        let mut have_updates = false;

        for issue in issues {
            let Some(state) = workflow.classify(issue.open, issue.label_names()) else {
                warn!(issue = issue.number, "Skipping issue, could not determine state");
                outcome.issues_skipped += 1;
                continue;
            };

            let previous =
                IssueSnapshotRepository::latest_for_issue(&mut *tx, repo, issue.number).await?;
            let changed = previous.is_none_or(|p| p.updated_at != issue.updated_at);
            have_updates |= changed;

            IssueSnapshotRepository::insert(
                &mut tx,
                &CreateIssueSnapshot {
                    snapshot_id: snapshot.id,
                    repo: repo.to_string(),
                    issue_id: issue.number,
                    points: workflow.points_for_title(&issue.title),
                    state: state.id,
                    data: issue.raw,
                    updated_at: issue.updated_at,
                },
            )
            .await?;
            outcome.issues_recorded += 1;
        }

        if have_updates {
            tx.commit().await?;
            info!(snapshot_id = snapshot.id, issues = outcome.issues_recorded, "Committed snapshot");
            outcome.outcome = Outcome::Committed {
                snapshot_id: snapshot.id,
            };
        } else {
            tx.rollback().await?;
            info!("No updates, discarded snapshot");
            outcome.outcome = Outcome::Unchanged;
        }

        Ok(outcome)
    }
}
