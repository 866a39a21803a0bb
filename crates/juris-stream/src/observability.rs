use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "juris.logs.jsonl";

/// Logging settings read from the environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogSettings {
    pub enabled: bool,
    /// Filter directive, e.g. `info` or `juris_stream=debug`.
    pub filter: Option<String>,
    /// When set, logs go to this file as JSON lines instead of stderr.
    pub json_path: Option<PathBuf>,
}

impl LogSettings {
    /// Reads `JURIS_OBSERVABILITY_ENABLED`, `JURIS_LOG_LEVEL` and
    /// `JURIS_JSON_LOG_PATH`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup("JURIS_OBSERVABILITY_ENABLED")
            .map(|raw| parse_switch(&raw).unwrap_or(true))
            .unwrap_or(true);
        let filter = lookup("JURIS_LOG_LEVEL").filter(|v| !v.trim().is_empty());
        let json_path = lookup("JURIS_JSON_LOG_PATH")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);
        Self {
            enabled,
            filter,
            json_path,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        if let Some(level) = &self.filter
            && let Ok(filter) = EnvFilter::try_new(level)
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Splits a log path into the directory and file name the appender wants.
fn log_target(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file)
}

/// Installs the global subscriber once per process.
///
/// Console output goes to stderr so that stdout stays free for results.
/// `RUST_LOG` applies when `JURIS_LOG_LEVEL` is unset or invalid.
pub fn init_observability() {
    INIT.get_or_init(|| install(LogSettings::from_env()));
}

fn install(settings: LogSettings) {
    if !settings.enabled {
        return;
    }
    let filter = settings.env_filter();
    match &settings.json_path {
        Some(path) => {
            let (dir, file) = log_target(path);
            let _ = std::fs::create_dir_all(&dir);
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_writer(tracing_appender::rolling::never(dir, file));
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
        }
        None => {
            let layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init();
        }
    }
}
