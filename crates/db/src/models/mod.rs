//! Persistence models and their repositories.
//!
//! Every repository operation takes its executor explicitly: a pool for
//! standalone reads, or `&mut Tx` when the write belongs to a batch that
//! must commit or roll back as a unit.

pub mod auth_session;
pub mod issue_label;
pub mod issue_snapshot;
pub mod snapshot;
pub mod sprint;
pub mod sprint_commitment;
pub mod user;
