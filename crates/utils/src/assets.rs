use std::path::PathBuf;

use directories::ProjectDirs;

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Directory holding the database, config and logs.
///
/// Respects `SPRINTS_DATA_DIR`. Otherwise the platform data directory
/// (`~/.local/share/sprints` on Linux), falling back to `./.sprints` when the
/// platform reports no home directory.
pub fn data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("SPRINTS_DATA_DIR") {
        return expand_tilde(&path);
    }
    ProjectDirs::from("io", "sprints", "sprints")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".sprints"))
}

/// Create the data directory if needed and return it.
pub fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = data_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Path of the JSON config file. Respects `SPRINTS_CONFIG`.
///
/// Default: `{data_dir}/config.json`
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SPRINTS_CONFIG") {
        return expand_tilde(&path);
    }
    data_dir().join("config.json")
}

/// Default database file. Default: `{data_dir}/sprints.sqlite`
pub fn database_path() -> PathBuf {
    data_dir().join("sprints.sqlite")
}

pub fn default_database_url() -> String {
    format!("sqlite://{}", database_path().display())
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}
