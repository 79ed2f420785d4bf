use std::time::Duration;

use crate::error::{ChatError, ChatResult};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3001";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

pub const BASE_URL_VAR: &str = "PARLANCE_API_BASE_URL";
pub const TIMEOUT_VAR: &str = "PARLANCE_API_TIMEOUT_MS";

/// Where the backend lives and how long plain REST calls may take.
/// The streaming request is exempt from `timeout`.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> ChatResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ChatResult<Self> {
        let mut config = match lookup(BASE_URL_VAR).filter(|url| !url.trim().is_empty()) {
            Some(url) => Self::new(url.trim()),
            None => Self::default(),
        };

        if let Some(raw) = lookup(TIMEOUT_VAR) {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                ChatError::Configuration(format!("{TIMEOUT_VAR} must be a number of milliseconds, got '{raw}'"))
            })?;
            config.timeout = Duration::from_millis(millis);
        }

        Ok(config)
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
