//! Point breakdowns of a single snapshot: per label, per workflow state, and
//! per contributor.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use db::models::issue_snapshot::IssueSnapshot;
use serde::Serialize;
use serde_json::Value;

use super::{
    burndown::completion_percent,
    github::IssueEvent,
    workflow::Workflow,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelStatistics {
    pub name: String,
    pub color: Option<String>,
    pub issue_count: usize,
    pub total_points: i64,
    pub completed_points: i64,
    /// This label's completed points as a percentage of all completed points
    /// in the snapshot. Absent when nothing is completed.
    pub completed_share: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateTotal {
    pub state_id: i64,
    pub label: String,
    pub color: String,
    pub points: i64,
}

/// `(name, color)` of every label on a recorded issue.
fn issue_labels(data: &Value) -> Vec<(String, Option<String>)> {
    data.get("labels")
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|label| {
                    let name = label.get("name")?.as_str()?.to_string();
                    let color = label.get("color").and_then(Value::as_str).map(str::to_string);
                    Some((name, color))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn label_statistics(issues: &[IssueSnapshot], workflow: &Workflow) -> Vec<LabelStatistics> {
    let sprint_completed: i64 = issues
        .iter()
        .filter(|i| workflow.is_complete(i.state))
        .map(|i| i.points)
        .sum();

    let mut by_label: HashMap<String, LabelStatistics> = HashMap::new();
    for issue in issues {
        let complete = workflow.is_complete(issue.state);
        for (name, color) in issue_labels(&issue.data) {
            let entry = by_label
                .entry(name.clone())
                .or_insert_with(|| LabelStatistics {
                    name,
                    color: None,
                    issue_count: 0,
                    total_points: 0,
                    completed_points: 0,
                    completed_share: None,
                });
            if entry.color.is_none() {
                entry.color = color;
            }
            entry.issue_count += 1;
            entry.total_points += issue.points;
            if complete {
                entry.completed_points += issue.points;
            }
        }
    }

    let mut stats: Vec<LabelStatistics> = by_label
        .into_values()
        .map(|mut s| {
            s.completed_share = completion_percent(s.completed_points, sprint_completed);
            s
        })
        .collect();
    stats.sort_by(|a, b| {
        b.total_points
            .cmp(&a.total_points)
            .then_with(|| a.name.cmp(&b.name))
    });
    stats
}

/// Point sums for every configured state, in configuration order.
pub fn state_totals(issues: &[IssueSnapshot], workflow: &Workflow) -> Vec<StateTotal> {
    workflow
        .states()
        .iter()
        .map(|state| StateTotal {
            state_id: state.id,
            label: state.label.clone(),
            color: state.color.clone(),
            points: issues
                .iter()
                .filter(|i| i.state == state.id)
                .map(|i| i.points)
                .sum(),
        })
        .collect()
}

/// Who moved an issue through the board, according to its label events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueCredits {
    pub build_starter: Option<String>,
    pub build_finisher: Option<String>,
    pub reviewer: Option<String>,
}

/// Credit the actors that applied `Building`, `Testing` and `Deploy` labels.
/// When a label was applied more than once, the latest actor counts.
pub fn credit_from_events(events: &[IssueEvent]) -> IssueCredits {
    let mut credits = IssueCredits::default();
    for event in events.iter().filter(|e| e.event == "labeled") {
        let (Some(actor), Some(label)) = (&event.actor, &event.label) else {
            continue;
        };
        if label.name.contains("Deploy") {
            credits.reviewer = Some(actor.login.clone());
        }
        if label.name.contains("Testing") {
            credits.build_finisher = Some(actor.login.clone());
        }
        if label.name.contains("Building") {
            credits.build_starter = Some(actor.login.clone());
        }
    }
    credits
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ContributedIssue {
    pub issue_id: i64,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ContributorStatistics {
    pub reviewed: BTreeMap<String, BTreeSet<ContributedIssue>>,
    pub built: BTreeMap<String, BTreeSet<ContributedIssue>>,
}

impl ContributorStatistics {
    pub fn record(&mut self, issue: &IssueSnapshot, credits: IssueCredits) {
        let contributed = ContributedIssue {
            issue_id: issue.issue_id,
            title: issue.title().unwrap_or_default().to_string(),
        };
        if let Some(reviewer) = credits.reviewer {
            self.reviewed
                .entry(reviewer)
                .or_default()
                .insert(contributed.clone());
        }
        for builder in [credits.build_finisher, credits.build_starter]
            .into_iter()
            .flatten()
        {
            self.built
                .entry(builder)
                .or_default()
                .insert(contributed.clone());
        }
    }
}
