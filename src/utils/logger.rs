use anyhow::Context;
use std::str::FromStr;
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Logging configuration. Loadable from the environment or from any
/// serde source alongside the rest of the runtime config.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct LoggerConfig {
    pub level: String,
    pub file_dir: Option<String>,
    pub file_prefix: Option<String>,
    pub rolling: Option<String>,
    #[serde(default)]
    pub max_files: usize,
}

impl LoggerConfig {
    /// Read configuration from `LOG_LEVEL`, `LOG_FILE_DIR`,
    /// `LOG_FILE_PREFIX` and `LOG_ROLLING`, with defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            file_dir: std::env::var("LOG_FILE_DIR").ok(),
            file_prefix: std::env::var("LOG_FILE_PREFIX").ok(),
            rolling: std::env::var("LOG_ROLLING").ok(),
            max_files: 2,
        }
    }

    /// Install a global tracing subscriber. With `file_dir` set, logs go to
    /// a rolling file appender; the returned guard must be kept alive for
    /// the non-blocking writer to flush.
    pub fn init(&self) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
        let level = Level::from_str(&self.level).unwrap_or(Level::INFO);

        if let Some(dir) = self.file_dir.as_deref() {
            let prefix = self.file_prefix.as_deref().unwrap_or("");
            let rotation = match self.rolling.as_deref() {
                Some("hourly") => Rotation::HOURLY,
                Some("minutely") => Rotation::MINUTELY,
                _ => Rotation::DAILY,
            };

            let appender: RollingFileAppender = RollingFileAppender::builder()
                .rotation(rotation)
                .max_log_files(self.max_files.max(1))
                .filename_prefix(prefix)
                .build(dir)
                .with_context(|| format!("failed to create rolling appender in {dir}"))?;

            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_writer(writer)
                .try_init();

            tracing::info!(dir, prefix, rotation = ?self.rolling, "logging to file");
            Ok(Some(guard))
        } else {
            let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
            Ok(None)
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
            file_prefix: None,
            rolling: Some("daily".to_string()),
            max_files: 2,
        }
    }
}
