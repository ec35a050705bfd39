//! Sprint tracking services.
//!
//! - [`config`] - settings file and environment overrides
//! - [`workflow`] - issue points and workflow state classification
//! - [`github`] - GitHub REST client
//! - [`ingest`] - snapshot polling
//! - [`burndown`] - daily burndown aggregation
//! - [`stats`] - label, state and contributor breakdowns
//! - [`sprints`] - sprint administration and dashboard read models

pub mod burndown;
pub mod config;
pub mod github;
pub mod ingest;
pub mod sprints;
pub mod stats;
pub mod workflow;
