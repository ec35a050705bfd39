//! Runtime settings, read from a JSON file and overridden by environment
//! variables.

use std::{path::Path, sync::Arc};

use chrono_tz::Tz;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::workflow::{
    DEFAULT_POINT_PATTERN, Workflow, WorkflowState, default_complete_states, default_states,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
pub const DEFAULT_LISTEN_PORT: u16 = 8080;
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
pub const DEFAULT_GITHUB_WEB_URL: &str = "https://github.com";
pub const DEFAULT_MILESTONE_WINDOW_DAYS: i64 = 8;

/// The on-disk shape of `config.json`. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub github_token: Option<String>,
    pub organization: Option<String>,
    pub repos: Vec<String>,
    pub github_app_id: Option<String>,
    pub github_app_secret: Option<String>,
    pub required_org: Option<String>,
    pub timezone: Option<String>,
    pub issue_states: Option<Vec<WorkflowState>>,
    pub complete_states: Option<Vec<i64>>,
    pub point_pattern: Option<String>,
    pub database_url: Option<String>,
    pub listen_host: Option<String>,
    pub listen_port: Option<u16>,
    pub public_base_url: Option<String>,
    pub github_api_url: Option<String>,
    pub github_web_url: Option<String>,
    pub milestone_window_days: Option<i64>,
    pub snapshot_trigger_token: Option<String>,
}

impl ConfigFile {
    /// Read the file at `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Validated settings shared by the CLI and the web server.
#[derive(Debug)]
pub struct Settings {
    pub github_token: Option<Arc<SecretString>>,
    pub organization: String,
    pub repos: Vec<String>,
    pub github_app_id: String,
    pub github_app_secret: Option<Arc<SecretString>>,
    pub required_org: String,
    pub timezone: Tz,
    pub workflow: Workflow,
    pub database_url: String,
    pub listen_host: String,
    pub listen_port: u16,
    pub public_base_url: String,
    pub github_api_url: String,
    pub github_web_url: String,
    pub milestone_window_days: i64,
    pub snapshot_trigger_token: Option<Arc<SecretString>>,
}

fn secret(value: Option<String>) -> Option<Arc<SecretString>> {
    value
        .filter(|v| !v.trim().is_empty())
        .map(|v| Arc::new(SecretString::from(v)))
}

impl Settings {
    /// Load `config.json` from `path` and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = ConfigFile::load(path)?;
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge `file` with the variables returned by `env`, then validate.
    pub fn resolve<F>(file: ConfigFile, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timezone_name = file.timezone.unwrap_or_else(|| "UTC".to_string());
        let timezone: Tz = timezone_name.parse().map_err(|_| {
            ConfigError::ValidationError(format!("unknown timezone '{timezone_name}'"))
        })?;

        let workflow = Workflow::new(
            file.issue_states.unwrap_or_else(default_states),
            file.complete_states.unwrap_or_else(default_complete_states),
            file.point_pattern.as_deref().unwrap_or(DEFAULT_POINT_PATTERN),
        )?;

        let listen_host = env("HOST")
            .or(file.listen_host)
            .unwrap_or_else(|| DEFAULT_LISTEN_HOST.to_string());
        let listen_port = match env("PORT") {
            Some(port) => port.trim().parse::<u16>().map_err(|_| {
                ConfigError::ValidationError(format!("PORT is not a valid port: '{port}'"))
            })?,
            None => file.listen_port.unwrap_or(DEFAULT_LISTEN_PORT),
        };

        let milestone_window_days = file
            .milestone_window_days
            .unwrap_or(DEFAULT_MILESTONE_WINDOW_DAYS);
        if milestone_window_days < 0 {
            return Err(ConfigError::ValidationError(
                "milestone_window_days must not be negative".to_string(),
            ));
        }

        let github_app_id = env("GITHUB_APP_ID")
            .or(file.github_app_id)
            .unwrap_or_default();
        let required_org = file.required_org.unwrap_or_default();
        if !github_app_id.is_empty() && required_org.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "required_org must be set when GitHub login is configured".to_string(),
            ));
        }

        let public_base_url = file
            .public_base_url
            .unwrap_or_else(|| format!("http://{listen_host}:{listen_port}"));

        Ok(Self {
            github_token: secret(env("GITHUB_TOKEN").or(file.github_token)),
            organization: file.organization.unwrap_or_default(),
            repos: file.repos,
            github_app_id,
            github_app_secret: secret(env("GITHUB_APP_SECRET").or(file.github_app_secret)),
            required_org,
            timezone,
            workflow,
            database_url: env("SPRINTS_DATABASE_URL")
                .or(file.database_url)
                .unwrap_or_else(utils::assets::default_database_url),
            listen_host,
            listen_port,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            github_api_url: file
                .github_api_url
                .unwrap_or_else(|| DEFAULT_GITHUB_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            github_web_url: file
                .github_web_url
                .unwrap_or_else(|| DEFAULT_GITHUB_WEB_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            milestone_window_days,
            snapshot_trigger_token: secret(file.snapshot_trigger_token),
        })
    }

    /// Full `owner/name` path of a configured repository.
    pub fn repo_path(&self, repo: &str) -> String {
        if repo.contains('/') || self.organization.is_empty() {
            repo.to_string()
        } else {
            format!("{}/{}", self.organization, repo)
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.listen_host, self.listen_port)
    }

    pub fn oauth_redirect_uri(&self) -> String {
        format!("{}/login/authorize", self.public_base_url)
    }

    /// Session cookies carry `Secure` when the site is served over https.
    pub fn secure_cookies(&self) -> bool {
        self.public_base_url
            .get(..8)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;
    use serde_json::json;

    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults_apply_when_file_is_empty() {
        let settings = Settings::resolve(ConfigFile::default(), no_env).unwrap();

        assert_eq!(settings.listen_addr(), "127.0.0.1:8080");
        assert_eq!(settings.timezone, chrono_tz::UTC);
        assert_eq!(settings.milestone_window_days, 8);
        assert_eq!(settings.github_api_url, "https://api.github.com");
        assert_eq!(settings.workflow.complete_state_ids(), vec![3, 4]);
        assert!(settings.github_token.is_none());
        assert_eq!(
            settings.oauth_redirect_uri(),
            "http://127.0.0.1:8080/login/authorize"
        );
    }

    #[test]
    fn environment_overrides_file_values() {
        let file: ConfigFile = serde_json::from_value(json!({
            "github_token": "from-file",
            "listen_port": 9000,
            "database_url": "sqlite://file.sqlite"
        }))
        .unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("GITHUB_TOKEN", "from-env"),
            ("PORT", "9100"),
            ("SPRINTS_DATABASE_URL", "sqlite://env.sqlite"),
        ]);

        let settings =
            Settings::resolve(file, |key| env.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(
            settings.github_token.as_ref().unwrap().expose_secret(),
            "from-env"
        );
        assert_eq!(settings.listen_port, 9100);
        assert_eq!(settings.database_url, "sqlite://env.sqlite");
    }

    #[test]
    fn original_style_state_keys_are_accepted() {
        let file: ConfigFile = serde_json::from_value(json!({
            "timezone": "Canada/Pacific",
            "issue_states": [
                { "label": "Todo", "github_label": ["1"], "open": true, "id": 0, "color": "#fff" },
                { "label": "Done", "open": false, "id": 1, "color": "#000" }
            ],
            "complete_states": [1]
        }))
        .unwrap();

        let settings = Settings::resolve(file, no_env).unwrap();
        assert_eq!(settings.timezone, chrono_tz::Canada::Pacific);
        assert_eq!(
            settings.workflow.classify(true, ["1-todo"]).map(|s| s.id),
            Some(0)
        );
    }

    #[test]
    fn invalid_timezone_is_rejected() {
        let file = ConfigFile {
            timezone: Some("Mars/Olympus".to_string()),
            ..Default::default()
        };
        let err = Settings::resolve(file, no_env);
        assert!(matches!(err, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = Settings::resolve(ConfigFile::default(), |key| {
            (key == "PORT").then(|| "eighty".to_string())
        });
        assert!(matches!(err, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn login_without_required_org_is_rejected() {
        let file = ConfigFile {
            github_app_id: Some("client-id".to_string()),
            github_app_secret: Some("secret".to_string()),
            ..Default::default()
        };
        let err = Settings::resolve(file, no_env);
        assert!(matches!(err, Err(ConfigError::ValidationError(_))));

        let err = Settings::resolve(ConfigFile::default(), |key| {
            (key == "GITHUB_APP_ID").then(|| "client-id".to_string())
        });
        assert!(matches!(err, Err(ConfigError::ValidationError(_))));

        let file = ConfigFile {
            github_app_id: Some("client-id".to_string()),
            required_org: Some("acme".to_string()),
            ..Default::default()
        };
        assert_eq!(Settings::resolve(file, no_env).unwrap().required_org, "acme");
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let file = ConfigFile {
            github_token: Some("  ".to_string()),
            ..Default::default()
        };
        let settings = Settings::resolve(file, no_env).unwrap();
        assert!(settings.github_token.is_none());
    }

    #[test]
    fn https_base_url_enables_secure_cookies() {
        let file = ConfigFile {
            public_base_url: Some("https://sprints.example.com/".to_string()),
            ..Default::default()
        };
        let settings = Settings::resolve(file, no_env).unwrap();
        assert!(settings.secure_cookies());
        assert_eq!(
            settings.oauth_redirect_uri(),
            "https://sprints.example.com/login/authorize"
        );

        let settings = Settings::resolve(ConfigFile::default(), no_env).unwrap();
        assert!(!settings.secure_cookies());
    }

    #[test]
    fn repo_path_prefixes_organization() {
        let file = ConfigFile {
            organization: Some("acme".to_string()),
            ..Default::default()
        };
        let settings = Settings::resolve(file, no_env).unwrap();
        assert_eq!(settings.repo_path("api"), "acme/api");
        assert_eq!(settings.repo_path("other/web"), "other/web");
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::load(&dir.path().join("config.json")).unwrap();
        assert!(file.repos.is_empty());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ConfigFile::load(&path), Err(ConfigError::Json(_))));
    }
}
