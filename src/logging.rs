//! Logging setup
//!
//! Installs a `tracing` subscriber with an env filter (`RUST_LOG` wins over the
//! configured level), a stderr layer, and an optional daily-rotated file layer.

use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Logging options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `agent_supervisor=debug`
    pub level: String,

    /// Also write logs here (rotated daily; the date is appended to the name)
    pub log_file: Option<PathBuf>,

    /// Write the file layer as JSON lines
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Defaults overridden by `AGENT_LOG_LEVEL`, `AGENT_LOG_FILE`, `AGENT_LOG_JSON`
    pub fn from_env() -> Self {
        Self::default().apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(level) = var("AGENT_LOG_LEVEL").filter(|l| !l.trim().is_empty()) {
            self.level = level;
        }
        if let Some(file) = var("AGENT_LOG_FILE").filter(|f| !f.trim().is_empty()) {
            self.log_file = Some(PathBuf::from(file));
        }
        if let Some(json) = var("AGENT_LOG_JSON") {
            self.json = matches!(json.trim(), "1" | "true" | "TRUE" | "yes");
        }
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process. `None` when no log file is configured.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("invalid log filter '{}'", config.level))?;

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let (layer, guard) = file_layer(path, config.json)?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal());

    tracing_subscriber::registry()
        .with(file_layer)
        .with(filter)
        .with(stderr_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn file_layer(path: &Path, json: bool) -> anyhow::Result<(BoxedLayer, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("log file path has no file name: {}", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;

    let appender = tracing_appender::rolling::daily(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = if json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_ansi(false).with_writer(writer).boxed()
    };
    Ok((layer, guard))
}
