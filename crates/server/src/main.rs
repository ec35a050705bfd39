use std::{path::PathBuf, process::ExitCode, sync::Arc};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use db::DBService;
use server::{AppState, file_logging, routes};
use services::services::{
    config::Settings,
    github::GitHubClient,
    ingest::{Outcome, SnapshotIngester},
    sprints::{self, SprintAdminError},
};
use utils::{assets, build_info::BUILD_INFO};

#[derive(Parser)]
#[command(name = "sprints")]
#[command(version = BUILD_INFO.version, about = "Sprint burndown tracking backed by GitHub milestones")]
struct Cli {
    /// Path to config.json. Defaults to `$SPRINTS_CONFIG` or the data directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Create or upgrade the database schema
    Init,
    /// Record a snapshot of every recent milestone
    Snapshot,
    /// Point totals per state of the latest snapshot
    Stats {
        #[arg(long)]
        sprint: Option<String>,
    },
    /// Stop recording snapshots for a sprint (`current` for this week's)
    Lock {
        #[arg(long)]
        sprint: Option<String>,
    },
    /// Resume recording snapshots for a sprint
    Unlock {
        #[arg(long)]
        sprint: Option<String>,
    },
    /// List every sprint
    Sprints,
    /// Fetch and store the labels of every configured repository
    Labels,
    /// Who built and reviewed the completed issues of a sprint
    Contributors {
        #[arg(long)]
        sprint: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _file_log_guard = file_logging::init_logging(&log_level);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.unwrap_or_else(assets::config_path);
    let settings = Arc::new(
        Settings::load(&config_path)
            .with_context(|| format!("loading configuration from {}", config_path.display()))?,
    );

    assets::ensure_data_dir().context("creating data directory")?;
    let db = DBService::new(&settings.database_url)
        .await
        .with_context(|| format!("opening database {}", settings.database_url))?;
    let github = GitHubClient::new(
        &settings.github_api_url,
        &settings.github_web_url,
        settings.github_token.clone(),
    )?;

    let code = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            serve(AppState::new(db.clone(), settings, github)).await?;
            ExitCode::SUCCESS
        }
        Command::Init => {
            println!("Database ready at {}", settings.database_url);
            ExitCode::SUCCESS
        }
        Command::Snapshot => snapshot(&db, github, settings).await?,
        Command::Stats { sprint } => stats(&db, &settings, sprint.as_deref()).await?,
        Command::Lock { sprint } => set_locked(&db, sprint.as_deref(), true).await?,
        Command::Unlock { sprint } => set_locked(&db, sprint.as_deref(), false).await?,
        Command::Sprints => {
            for sprint in sprints::list_sprints(&db.pool).await? {
                if sprint.locked {
                    println!("{} (locked)", sprint.name);
                } else {
                    println!("{}", sprint.name);
                }
            }
            ExitCode::SUCCESS
        }
        Command::Labels => {
            let repos: Vec<String> = settings
                .repos
                .iter()
                .map(|repo| settings.repo_path(repo))
                .collect();
            let stored = sprints::sync_labels(&db.pool, &github, &repos).await?;
            println!("Stored {stored} labels from {} repositories", repos.len());
            ExitCode::SUCCESS
        }
        Command::Contributors { sprint } => {
            contributors(&db, &github, &settings, sprint.as_deref()).await?
        }
    };

    checkpoint_and_close(&db).await;
    Ok(code)
}

async fn snapshot(
    db: &DBService,
    github: GitHubClient,
    settings: Arc<Settings>,
) -> anyhow::Result<ExitCode> {
    if !github.has_token() {
        eprintln!("No GitHub token configured.");
        eprintln!("Set GITHUB_TOKEN in the environment or `github_token` in config.json.");
        return Ok(ExitCode::from(2));
    }

    let report = SnapshotIngester::new(db.clone(), github, settings).run().await?;
    for milestone in &report.milestones {
        let status = match milestone.outcome {
            Outcome::Committed { snapshot_id } => format!("committed snapshot {snapshot_id}"),
            Outcome::Unchanged => "no updates".to_string(),
            Outcome::Locked => "locked".to_string(),
        };
        println!(
            "{} {}: {} ({} issues, {} skipped)",
            milestone.repo,
            milestone.sprint_name,
            status,
            milestone.issues_recorded,
            milestone.issues_skipped
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn stats(
    db: &DBService,
    settings: &Settings,
    sprint: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let all = match sprints::sprint_stats(&db.pool, &settings.workflow, sprint).await {
        Ok(all) => all,
        Err(SprintAdminError::NotFound(name)) => {
            eprintln!("Could not find sprint '{name}'");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    for entry in all {
        println!("{}", entry.sprint.name);
        match entry.totals {
            Some(totals) => {
                for total in totals {
                    println!("  {}: {}", total.label, total.points);
                }
            }
            None => println!("  No stats"),
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn set_locked(
    db: &DBService,
    sprint: Option<&str>,
    locked: bool,
) -> anyhow::Result<ExitCode> {
    let Some(name) = sprint else {
        eprintln!("--sprint is required (a sprint name or `current`)");
        return Ok(ExitCode::FAILURE);
    };

    match sprints::lock(db, name, locked, Utc::now()).await {
        Ok(updated) => {
            let verb = if locked { "Locked" } else { "Unlocked" };
            for sprint in updated {
                println!("{verb} {}", sprint.name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(SprintAdminError::NotFound(name)) => {
            eprintln!("Could not find sprint '{name}'");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

async fn contributors(
    db: &DBService,
    github: &GitHubClient,
    settings: &Settings,
    sprint: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let Some(name) = sprint else {
        eprintln!("--sprint is required");
        return Ok(ExitCode::FAILURE);
    };

    let stats = match sprints::contributors(&db.pool, github, &settings.workflow, name).await {
        Ok(stats) => stats,
        Err(SprintAdminError::NotFound(name)) => {
            eprintln!("Could not find sprint '{name}'");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    for (heading, by_user) in [("Reviewed", &stats.reviewed), ("Built", &stats.built)] {
        println!("{heading}:");
        for (user, issues) in by_user {
            println!("  {user}: {}", issues.len());
            for issue in issues {
                println!("    #{} {}", issue.issue_id, issue.title);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = state.settings().listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(version = %BUILD_INFO.short(), "Server running on http://{local_addr}");

    axum::serve(listener, routes::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let terminate = async {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
            } else {
                tracing::error!("Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}

/// Fold the WAL back into the main database file and close the pool.
async fn checkpoint_and_close(db: &DBService) {
    match sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
        .execute(&db.pool)
        .await
    {
        Ok(_) => tracing::debug!("Final WAL checkpoint completed"),
        Err(e) => tracing::warn!("Final WAL checkpoint failed (data may still be in WAL): {}", e),
    }
    db.pool.close().await;
}
