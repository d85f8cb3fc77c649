use std::time::Duration;

use crate::backoff::BackoffPolicy;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Timing configuration for the persistent-socket connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Budget for reaching `ready` (transport open plus `hello`).
    pub connect_timeout: Duration,
    /// Interval between keep-alive probes once `ready`.
    pub heartbeat_interval: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Transport configuration for the HTTP streaming backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpStreamConfig {
    pub endpoint: String,
    pub bearer_token: Option<String>,
    pub model: String,
    pub system_prompt: Option<String>,
    /// Optional whole-request timeout.
    pub timeout: Option<Duration>,
    /// Retries after the initial request attempt.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl HttpStreamConfig {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bearer_token: None,
            model: model.into(),
            system_prompt: None,
            timeout: None,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay = base_delay;
        self
    }
}
