use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::error::StoreError;

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub console_enabled: bool,
    pub file_enabled: bool,
    pub max_files: usize,
    pub log_directory: PathBuf,
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_enabled: true,
            file_enabled: false,
            max_files: 5,
            log_directory: PathBuf::from("logs"),
            include_targets: false,
        }
    }
}

/// Initialize logging system. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers = Vec::new();

    // Console layer; stdout is reserved for command output
    if config.console_enabled {
        let console_layer = fmt::layer()
            .with_target(config.include_targets)
            .with_span_events(FmtSpan::NONE)
            .with_writer(std::io::stderr)
            .boxed();

        layers.push(console_layer);
    }

    // File layer
    if config.file_enabled {
        std::fs::create_dir_all(&config.log_directory)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("lstore")
            .filename_suffix("log")
            .max_log_files(config.max_files)
            .build(&config.log_directory)?;

        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_target(config.include_targets)
            .with_writer(file_appender)
            .boxed();

        layers.push(file_layer);
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()?;

    tracing::debug!("Logging initialized at level {}", config.level);
    if config.file_enabled {
        info!("Log directory: {}", config.log_directory.display());
    }

    Ok(())
}

/// Structured logging context
#[derive(Debug, Clone, Serialize)]
pub struct LogContext {
    pub component: String,
    pub operation: String,
    pub source: Option<String>,
    pub path: Option<String>,
    pub duration_ms: Option<u64>,
    pub status: Option<String>,
    pub error_category: Option<String>,
    pub additional_fields: HashMap<String, serde_json::Value>,
}

impl LogContext {
    pub fn new(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            operation: operation.into(),
            source: None,
            path: None,
            duration_ms: None,
            status: None,
            error_category: None,
            additional_fields: HashMap::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_error_category(mut self, category: impl Into<String>) -> Self {
        self.error_category = Some(category.into());
        self
    }

    pub fn with_string_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_fields.insert(key.into(), serde_json::Value::String(value.into()));
        self
    }

    pub fn with_number_field(mut self, key: impl Into<String>, value: impl Into<i64>) -> Self {
        let value: i64 = value.into();
        self.additional_fields.insert(key.into(), serde_json::Value::from(value));
        self
    }
}

/// Structured logging macro
#[macro_export]
macro_rules! log_info {
    ($context:expr, $message:expr) => {
        tracing::info!(
            component = $context.component,
            operation = $context.operation,
            source = $context.source,
            path = $context.path,
            duration_ms = $context.duration_ms,
            status = $context.status,
            additional_fields = ?$context.additional_fields,
            $message
        );
    };
}

/// Times an operation and logs its outcome with the context attached
pub struct PerformanceLogger {
    context: LogContext,
    start_time: std::time::Instant,
}

impl PerformanceLogger {
    pub fn new(context: LogContext) -> Self {
        Self {
            context,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn finish_with_status(self, message: &str, status: impl Into<String>) {
        let duration = self.start_time.elapsed();
        let context = self.context.with_duration(duration).with_status(status);
        tracing::info!(
            component = context.component,
            operation = context.operation,
            source = context.source,
            path = context.path,
            duration_ms = context.duration_ms,
            status = context.status,
            additional_fields = ?context.additional_fields,
            "{}", message
        );
    }

    pub fn finish_with_error(self, message: &str, error: &StoreError) {
        let duration = self.start_time.elapsed();
        let context = self
            .context
            .with_duration(duration)
            .with_status("error")
            .with_error_category(error.category());
        tracing::error!(
            component = context.component,
            operation = context.operation,
            source = context.source,
            path = context.path,
            duration_ms = context.duration_ms,
            status = context.status,
            error_category = context.error_category,
            additional_fields = ?context.additional_fields,
            error = %error,
            "{}", message
        );
    }
}
