//! Maps tracker issues onto the team's configured workflow states.
//!
//! An open issue's state comes from its labels: each label is compared
//! against the label prefixes of every open state. When several labels (or
//! several states) match, the last match wins, so an issue labelled
//! `1-ready` and `3-in-progress` is classified by `3-in-progress`. Closed
//! issues always land in the single closed state.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::config::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub id: i64,
    /// Display name.
    pub label: String,
    /// Label prefixes that put an open issue in this state.
    #[serde(default, alias = "github_label")]
    pub github_labels: Vec<String>,
    pub open: bool,
    #[serde(default)]
    pub color: String,
}

impl WorkflowState {
    fn open(id: i64, label: &str, prefixes: &[&str], color: &str) -> Self {
        Self {
            id,
            label: label.to_string(),
            github_labels: prefixes.iter().map(|p| p.to_string()).collect(),
            open: true,
            color: color.to_string(),
        }
    }

    fn matches_label(&self, name: &str) -> bool {
        self.github_labels.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }
}

/// Default board: Pickup, Building, Code Review, Ready to Deploy, Closed.
pub fn default_states() -> Vec<WorkflowState> {
    vec![
        WorkflowState::open(0, "Pickup", &["1", "2"], "#EA6454"),
        WorkflowState::open(1, "Building", &["3"], "#89ACEA"),
        WorkflowState::open(2, "Code Review", &["4"], "#7CEAE8"),
        WorkflowState::open(3, "Ready to Deploy", &["5"], "#92EAB4"),
        WorkflowState {
            id: 4,
            label: "Closed".to_string(),
            github_labels: Vec::new(),
            open: false,
            color: "#78EA76".to_string(),
        },
    ]
}

pub fn default_complete_states() -> Vec<i64> {
    vec![3, 4]
}

pub const DEFAULT_POINT_PATTERN: &str = r"\(SP(\d+)\)";

#[derive(Debug, Clone)]
pub struct Workflow {
    states: Vec<WorkflowState>,
    complete: HashSet<i64>,
    closed: usize,
    point_pattern: Regex,
}

impl Workflow {
    /// Build a workflow, rejecting configurations that cannot classify issues
    /// unambiguously.
    pub fn new(
        states: Vec<WorkflowState>,
        complete_states: Vec<i64>,
        point_pattern: &str,
    ) -> Result<Self, ConfigError> {
        let closed: Vec<usize> = states
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.open)
            .map(|(i, _)| i)
            .collect();
        if closed.len() != 1 {
            return Err(ConfigError::ValidationError(format!(
                "exactly one closed issue state is required, found {}",
                closed.len()
            )));
        }

        let mut seen = HashSet::new();
        for state in &states {
            if !seen.insert(state.id) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate issue state id {}",
                    state.id
                )));
            }
            if state.open && state.github_labels.iter().all(|p| p.is_empty()) {
                return Err(ConfigError::ValidationError(format!(
                    "open state '{}' needs at least one label prefix",
                    state.label
                )));
            }
        }

        if let Some(unknown) = complete_states.iter().find(|id| !seen.contains(id)) {
            return Err(ConfigError::ValidationError(format!(
                "complete state {unknown} is not a configured issue state"
            )));
        }

        let point_pattern = Regex::new(point_pattern).map_err(|e| {
            ConfigError::ValidationError(format!("invalid point pattern: {e}"))
        })?;
        if point_pattern.captures_len() < 2 {
            return Err(ConfigError::ValidationError(
                "point pattern needs a capture group for the point count".to_string(),
            ));
        }

        Ok(Self {
            states,
            complete: complete_states.into_iter().collect(),
            closed: closed[0],
            point_pattern,
        })
    }

    /// Story points encoded in an issue title, or 0 when there are none.
    pub fn points_for_title(&self, title: &str) -> i64 {
        let Some(captured) = self
            .point_pattern
            .captures(title)
            .and_then(|caps| caps.get(1))
        else {
            return 0;
        };
        match captured.as_str().parse::<i64>() {
            Ok(points) if points >= 0 => points,
            Ok(_) | Err(_) => {
                warn!(title, captured = captured.as_str(), "Unusable point count, using 0");
                0
            }
        }
    }

    pub fn classify<'a, I>(&self, open: bool, labels: I) -> Option<&WorkflowState>
    where
        I: IntoIterator<Item = &'a str>,
    {
        if !open {
            return Some(self.closed_state());
        }

        let mut resolved = None;
        for name in labels {
            for state in self.states.iter().filter(|s| s.open) {
                if state.matches_label(name) {
                    resolved = Some(state);
                }
            }
        }
        resolved
    }

    pub fn closed_state(&self) -> &WorkflowState {
        &self.states[self.closed]
    }

    pub fn states(&self) -> &[WorkflowState] {
        &self.states
    }

    pub fn state(&self, id: i64) -> Option<&WorkflowState> {
        self.states.iter().find(|s| s.id == id)
    }

    pub fn is_complete(&self, state_id: i64) -> bool {
        self.complete.contains(&state_id)
    }

    /// Configured state ids counted as done, in configuration order.
    pub fn complete_state_ids(&self) -> Vec<i64> {
        self.states
            .iter()
            .filter(|s| self.complete.contains(&s.id))
            .map(|s| s.id)
            .collect()
    }

    /// Configured state ids still counted as remaining work.
    pub fn incomplete_state_ids(&self) -> Vec<i64> {
        self.states
            .iter()
            .filter(|s| !self.complete.contains(&s.id))
            .map(|s| s.id)
            .collect()
    }

    pub fn is_incomplete(&self, state_id: i64) -> bool {
        self.state(state_id).is_some() && !self.is_complete(state_id)
    }
}
