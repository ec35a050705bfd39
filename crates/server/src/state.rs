use std::sync::Arc;

use db::DBService;
use services::services::{config::Settings, github::GitHubClient, ingest::SnapshotIngester};
use sqlx::SqlitePool;

#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub settings: Arc<Settings>,
    pub github: GitHubClient,
}

impl AppState {
    pub fn new(db: DBService, settings: Arc<Settings>, github: GitHubClient) -> Self {
        Self {
            db,
            settings,
            github,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db.pool
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn ingester(&self) -> SnapshotIngester {
        SnapshotIngester::new(self.db.clone(), self.github.clone(), self.settings.clone())
    }
}
