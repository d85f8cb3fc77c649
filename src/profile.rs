//! Connection profile: how to reach one backend.

use std::path::Path;
use std::time::Duration;

use conduit_transport::url::{completions_url, socket_url};
use conduit_transport::{ConnectRequest, HttpStreamConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Transport a profile talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Persistent WebSocket carrying the JSON frame protocol.
    #[default]
    Socket,
    /// OpenAI-compatible chat completions streamed over HTTP.
    HttpStream,
}

/// Read-only description of one backend, immutable for a session.
///
/// ```json
/// {
///   "endpoint": "https://chat.example.com",
///   "bearer_token": "secret",
///   "backend": "socket",
///   "working_directory": "/home/me/project",
///   "auto_approve": false
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionProfile {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub auto_approve: bool,
    /// Whole-request timeout for the HTTP backend, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_sec: Option<u64>,
}

impl ConnectionProfile {
    /// Socket profile for `endpoint` with every optional field unset.
    pub fn socket(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bearer_token: None,
            backend: BackendKind::Socket,
            model: None,
            system_prompt: None,
            working_directory: None,
            auto_approve: false,
            timeout_sec: None,
        }
    }

    /// HTTP-stream profile for `endpoint` serving `model`.
    pub fn http_stream(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            backend: BackendKind::HttpStream,
            model: Some(model.into()),
            ..Self::socket(endpoint)
        }
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    #[must_use]
    pub fn with_working_directory(mut self, cwd: impl Into<String>) -> Self {
        self.working_directory = Some(cwd.into());
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let profile: Self = serde_json::from_str(raw)?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::invalid("endpoint", "must not be empty"));
        }

        let parsed = match self.backend {
            BackendKind::Socket => socket_url(endpoint),
            BackendKind::HttpStream => completions_url(endpoint),
        };
        parsed.map_err(|error| ConfigError::invalid("endpoint", error.to_string()))?;

        if self.backend == BackendKind::HttpStream
            && self.model.as_deref().map_or(true, |model| model.trim().is_empty())
        {
            return Err(ConfigError::invalid(
                "model",
                "required for the http_stream backend",
            ));
        }

        if self
            .bearer_token
            .as_deref()
            .is_some_and(|token| token.trim().is_empty())
        {
            return Err(ConfigError::invalid(
                "bearer_token",
                "must not be blank when present",
            ));
        }

        if self.timeout_sec == Some(0) {
            return Err(ConfigError::invalid("timeout_sec", "must be > 0"));
        }

        Ok(())
    }

    pub fn connect_request(&self) -> ConnectRequest {
        ConnectRequest::new(self.endpoint.trim()).with_bearer_token(self.bearer_token.clone())
    }

    pub fn http_stream_config(&self) -> HttpStreamConfig {
        let mut config = HttpStreamConfig::new(
            self.endpoint.trim(),
            self.model.clone().unwrap_or_default(),
        );
        if let Some(token) = &self.bearer_token {
            config = config.with_bearer_token(token.trim());
        }
        if let Some(prompt) = &self.system_prompt {
            config = config.with_system_prompt(prompt.clone());
        }
        if let Some(seconds) = self.timeout_sec {
            config = config.with_timeout(Duration::from_secs(seconds));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_socket_profile_uses_defaults() {
        let profile = ConnectionProfile::from_json_str(r#"{"endpoint":"ws://localhost:8000"}"#)
            .expect("profile should parse");

        assert_eq!(profile, ConnectionProfile::socket("ws://localhost:8000"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = ConnectionProfile::from_json_str(
            r#"{"endpoint":"ws://localhost:8000","colour":"blue"}"#,
        )
        .expect_err("unknown field must fail");

        assert!(matches!(error, ConfigError::Parse(_)));
    }

    #[test]
    fn http_stream_profile_requires_model() {
        let error = ConnectionProfile::from_json_str(
            r#"{"endpoint":"http://localhost:11434","backend":"http_stream"}"#,
        )
        .expect_err("missing model must fail");

        assert!(matches!(error, ConfigError::Invalid { field: "model", .. }));
    }

    #[test]
    fn blank_token_and_endpoint_are_rejected() {
        let blank_token = ConnectionProfile::socket("ws://localhost").with_bearer_token("  ");
        assert!(matches!(
            blank_token.validate(),
            Err(ConfigError::Invalid {
                field: "bearer_token",
                ..
            })
        ));

        let blank_endpoint = ConnectionProfile::socket(" ");
        assert!(matches!(
            blank_endpoint.validate(),
            Err(ConfigError::Invalid {
                field: "endpoint",
                ..
            })
        ));
    }

    #[test]
    fn http_stream_config_carries_profile_settings() {
        let mut profile = ConnectionProfile::http_stream("http://localhost:11434", "llama3")
            .with_bearer_token(" tok ")
            .with_system_prompt("brief");
        profile.timeout_sec = Some(30);

        let config = profile.http_stream_config();
        assert_eq!(config.model, "llama3");
        assert_eq!(config.bearer_token.as_deref(), Some("tok"));
        assert_eq!(config.system_prompt.as_deref(), Some("brief"));
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
    }
}
