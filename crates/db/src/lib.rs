use std::{str::FromStr, time::Duration};

use sqlx::{
    Error, Executor, Pool, Sqlite, Transaction,
    migrate::MigrateError,
    sqlite::{
        SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions,
        SqliteSynchronous,
    },
};
use tracing::info;

pub mod models;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

/// Transaction handle passed explicitly to repository operations that are
/// part of a larger batch.
pub type Tx<'a> = Transaction<'a, Sqlite>;

// ============================================================================
// Connection Pool Configuration
// ============================================================================

/// Default maximum connections in the pool.
/// SQLite benefits from limited connections due to single-writer model.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Minimum idle connections to maintain.
const DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// Connection acquisition timeout in seconds.
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Idle connection timeout in seconds (10 minutes).
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Get max connections from environment or use default.
pub fn get_max_connections() -> u32 {
    std::env::var("SPRINTS_SQLITE_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|&n| n > 0 && n <= 100)
        .unwrap_or(DEFAULT_MAX_CONNECTIONS)
}

/// Apply performance pragmas to a SQLite connection.
/// These pragmas are applied on every new connection via `after_connect`.
///
/// - `temp_store = MEMORY` (2): Store temporary tables in memory
/// - `cache_size = -16000`: 16MB page cache (negative = KB)
/// - `synchronous = NORMAL`: safe with WAL, set after the cache pragmas
async fn apply_performance_pragmas(conn: &mut SqliteConnection) -> Result<(), Error> {
    conn.execute("PRAGMA temp_store = 2").await?;
    conn.execute("PRAGMA cache_size = -16000").await?;
    conn.execute("PRAGMA synchronous = NORMAL").await?;
    Ok(())
}

#[derive(Clone)]
pub struct DBService {
    pub pool: Pool<Sqlite>,
}

impl DBService {
    /// Open (creating if missing) the database at `database_url` and apply any
    /// pending migrations.
    pub async fn new(database_url: &str) -> Result<DBService, Error> {
        let max_connections = get_max_connections();

        info!(
            max_connections = max_connections,
            min_connections = DEFAULT_MIN_CONNECTIONS,
            "Initializing SQLite connection pool"
        );

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(DEFAULT_MIN_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS))
            .idle_timeout(Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)))
            .after_connect(|conn, _meta| {
                Box::pin(async move { apply_performance_pragmas(conn).await })
            })
            .connect_with(options)
            .await?;

        let service = DBService { pool };
        service.migrate().await.map_err(|e| Error::Migrate(Box::new(e)))?;
        Ok(service)
    }

    /// Single-connection in-memory database with the schema applied.
    pub async fn in_memory() -> Result<DBService, Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Every connection to `:memory:` is a separate database, so the pool
        // must never open a second one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let service = DBService { pool };
        service.migrate().await.map_err(|e| Error::Migrate(Box::new(e)))?;
        Ok(service)
    }

    /// Apply pending migrations. Safe to call repeatedly.
    pub async fn migrate(&self) -> Result<(), MigrateError> {
        if !has_pending_migrations(&self.pool).await {
            return Ok(());
        }
        info!("Applying pending database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    pub async fn begin(&self) -> Result<Tx<'static>, Error> {
        self.pool.begin().await
    }
}

/// Check if there are pending migrations to run.
///
/// Compares the migrations in the codebase against the `_sqlx_migrations` table
/// to determine if any migrations need to be applied.
async fn has_pending_migrations(pool: &Pool<Sqlite>) -> bool {
    let migrator = sqlx::migrate!("./migrations");
    let applied: Vec<i64> = match sqlx::query_scalar::<_, i64>(
        "SELECT version FROM _sqlx_migrations ORDER BY version",
    )
    .fetch_all(pool)
    .await
    {
        Ok(versions) => versions,
        Err(_) => {
            // Table doesn't exist or query failed - assume we need migrations
            return true;
        }
    };

    migrator
        .iter()
        .any(|migration| !applied.contains(&migration.version))
}
