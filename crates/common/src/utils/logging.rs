use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Whether to include target/module
    #[serde(default = "default_include_target")]
    pub include_target: bool,

    /// Directory for daily-rotated log files; console only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Log file name prefix inside `log_dir`
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            include_target: default_include_target(),
            log_dir: None,
            log_file: default_log_file(),
        }
    }
}

// Default values
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_include_target() -> bool { true }
fn default_log_file() -> String { "hlgate.log".to_string() }

/// Log format types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl From<&str> for LogFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn format_layer<W>(format: LogFormat, include_target: bool, writer: W) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_target(include_target).with_writer(writer);
    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
    }
}

/// Initialize the logging system.
///
/// Returns the file writer's guard when file logging is enabled; it must be
/// kept alive for the duration of the program or buffered lines are lost.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = build_env_filter(config)?;
    let format = LogFormat::from(config.format.as_str());

    let mut layers: Vec<BoxedLayer> = vec![format_layer(format, config.include_target, std::io::stdout)];
    let mut guard = None;

    if let Some(dir) = &config.log_dir {
        std::fs::create_dir_all(dir)?;
        let file_appender = tracing_appender::rolling::daily(dir, &config.log_file);
        let (non_blocking, worker_guard) = tracing_appender::non_blocking(file_appender);
        layers.push(format_layer(format, config.include_target, non_blocking));
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set subscriber: {}", e))?;

    tracing::info!("Logging system initialized with level: {}", config.level);
    Ok(guard)
}

/// Build environment filter from configuration; a non-empty `RUST_LOG` is appended
fn build_env_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    let mut filter_string = config.level.clone();

    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        if !rust_log.is_empty() {
            filter_string.push(',');
            filter_string.push_str(&rust_log);
        }
    }

    Ok(EnvFilter::try_new(filter_string)?)
}
