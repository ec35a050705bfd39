use serde::Serialize;

/// Build information embedded at compile time by `build.rs`.
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_commit: &'static str,
    pub git_branch: &'static str,
    pub build_timestamp: &'static str,
}

macro_rules! env_or_unknown {
    ($name:expr) => {
        match option_env!($name) {
            Some(v) => v,
            None => "unknown",
        }
    };
}

pub const BUILD_INFO: BuildInfo = BuildInfo {
    version: env!("CARGO_PKG_VERSION"),
    git_commit: env_or_unknown!("SPRINTS_GIT_COMMIT"),
    git_branch: env_or_unknown!("SPRINTS_GIT_BRANCH"),
    build_timestamp: env_or_unknown!("SPRINTS_BUILD_TIMESTAMP"),
};

impl BuildInfo {
    /// `0.1.0 (abc1234)`, used by `--version` and the health endpoint.
    pub fn short(&self) -> String {
        format!("{} ({})", self.version, self.git_commit)
    }
}
