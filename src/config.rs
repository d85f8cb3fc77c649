//! Environment configuration.

use std::env;
use std::path::PathBuf;

pub const PROFILE_PATH_ENV_VAR: &str = "CONDUIT_PROFILE_PATH";
pub const LOG_FILTER_ENV_VAR: &str = "CONDUIT_LOG";
pub const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub profile_path: Option<PathBuf>,
    pub log_filter: String,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self {
            profile_path: env_string_opt(PROFILE_PATH_ENV_VAR).map(PathBuf::from),
            log_filter: env_string_opt(LOG_FILTER_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        }
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value.trim().to_string())
        }
    })
}
