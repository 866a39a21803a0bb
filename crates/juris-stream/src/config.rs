use std::time::Duration;

use crate::errors::{JurisError, PdfError};
use crate::wizard::WizardKind;

/// Configuration for the streaming backend client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the AI backend (for example `https://api.example.fr`).
    pub backend_url: String,
    /// Optional bearer token sent with every request.
    pub api_key: Option<String>,
    /// Connection timeout. There is no whole-request timeout: multi-phase
    /// generations legitimately stream for minutes.
    pub connect_timeout: Duration,
    /// Bounded capacity of the per-session update channel.
    pub update_buffer: usize,
}

impl ClientConfig {
    /// Creates a config with defaults for everything but the backend URL.
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            api_key: None,
            connect_timeout: Duration::from_secs(10),
            update_buffer: 128,
        }
    }

    /// Builds a config from `JURIS_BACKEND_URL`, `JURIS_API_KEY` and
    /// `JURIS_CONNECT_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, JurisError> {
        let backend_url = std::env::var("JURIS_BACKEND_URL").unwrap_or_default();
        if backend_url.trim().is_empty() {
            return Err(JurisError::Config("missing JURIS_BACKEND_URL".into()));
        }
        let mut config = Self::new(backend_url.trim());
        if let Some(key) = non_empty_env("JURIS_API_KEY") {
            config = config.api_key(key);
        }
        if let Some(raw) = non_empty_env("JURIS_CONNECT_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| {
                JurisError::Config(format!("invalid JURIS_CONNECT_TIMEOUT_SECS: {raw}"))
            })?;
            config = config.connect_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn update_buffer(mut self, capacity: usize) -> Self {
        self.update_buffer = capacity;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), JurisError> {
        if self.backend_url.trim().is_empty() {
            return Err(JurisError::Config("backend_url must not be empty".into()));
        }
        if self.update_buffer == 0 {
            return Err(JurisError::Config(
                "update_buffer must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn stream_url(&self, wizard: WizardKind) -> String {
        format!(
            "{}{}",
            self.backend_url.trim_end_matches('/'),
            wizard.stream_path()
        )
    }
}

/// Configuration for the PDF-generation upstream.
#[derive(Clone, Debug)]
pub struct PdfConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    /// Delay between two status polls.
    pub poll_interval: Duration,
    /// Total polling budget before giving up with a timeout.
    pub max_wait: Duration,
}

impl PdfConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: None,
            poll_interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(120),
        }
    }

    /// Builds a config from `JURIS_PDF_API_URL` and `JURIS_PDF_API_KEY`.
    pub fn from_env() -> Result<Self, PdfError> {
        let Some(api_url) = non_empty_env("JURIS_PDF_API_URL") else {
            return Err(PdfError::Config("missing JURIS_PDF_API_URL".into()));
        };
        let mut config = Self::new(api_url);
        if let Some(key) = non_empty_env("JURIS_PDF_API_KEY") {
            config = config.api_key(key);
        }
        Ok(config)
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub(crate) fn generate_url(&self) -> String {
        format!("{}/generate", self.api_url.trim_end_matches('/'))
    }

    pub(crate) fn status_url(&self, job_id: &str) -> String {
        format!("{}/status/{job_id}", self.api_url.trim_end_matches('/'))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
