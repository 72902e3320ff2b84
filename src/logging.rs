//! Flat-file traffic and diagnostics logs
//!
//! Every category is a tracing target with its own file layer. A file line
//! reads `<timestamp> [#<id>] [<topic>] [<LEVEL>] <message>, <json>`.

use std::fmt::{self, Write as _};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer, Registry};

use crate::config::{LogConfig, LOGS_FOLDER};
use crate::error::{DebuggerError, Result};

const LOGGER_INITIALIZED: &str = "************* LOGGER INITIALIZED **************";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Network,
    Cpu,
    Mem,
    Requests,
    Connectivity,
    Error,
}

macro_rules! emit {
    ($level:ident, $category:expr, $topic:expr, $uuid:expr, $data:expr, $message:expr) => {
        match $category {
            LogCategory::Network => tracing::$level!(target: "rd::network", topic = $topic, uuid = $uuid, data = $data, "{}", $message),
            LogCategory::Cpu => tracing::$level!(target: "rd::cpu", topic = $topic, uuid = $uuid, data = $data, "{}", $message),
            LogCategory::Mem => tracing::$level!(target: "rd::mem", topic = $topic, uuid = $uuid, data = $data, "{}", $message),
            LogCategory::Requests => tracing::$level!(target: "rd::requests", topic = $topic, uuid = $uuid, data = $data, "{}", $message),
            LogCategory::Connectivity => tracing::$level!(target: "rd::connectivity", topic = $topic, uuid = $uuid, data = $data, "{}", $message),
            LogCategory::Error => tracing::$level!(target: "rd::error", topic = $topic, uuid = $uuid, data = $data, "{}", $message),
        }
    };
}

impl LogCategory {
    pub const ALL: [LogCategory; 6] = [
        LogCategory::Network,
        LogCategory::Cpu,
        LogCategory::Mem,
        LogCategory::Requests,
        LogCategory::Connectivity,
        LogCategory::Error,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Network => "NetworkStats.log",
            Self::Cpu => "CPUStats.log",
            Self::Mem => "MemStats.log",
            Self::Requests => "Requests.log",
            Self::Connectivity => "Connectivity.log",
            Self::Error => "RD_Error.log",
        }
    }

    pub fn target(&self) -> &'static str {
        match self {
            Self::Network => "rd::network",
            Self::Cpu => "rd::cpu",
            Self::Mem => "rd::mem",
            Self::Requests => "rd::requests",
            Self::Connectivity => "rd::connectivity",
            Self::Error => "rd::error",
        }
    }

    pub fn info(&self, topic: &str, message: &str, data: &Value, uuid: Option<&str>) {
        let data = render_data(data);
        emit!(info, self, topic, uuid.unwrap_or(""), data.as_str(), message);
    }

    pub fn error(&self, topic: &str, message: &str, data: &Value, uuid: Option<&str>) {
        let data = render_data(data);
        emit!(error, self, topic, uuid.unwrap_or(""), data.as_str(), message);
    }
}

/// JSON payload of a log line; empty objects and null render as nothing
pub fn render_data(data: &Value) -> String {
    match data {
        Value::Null => String::new(),
        Value::Object(map) if map.is_empty() => String::new(),
        other => other.to_string(),
    }
}

/// Assemble one file line
pub fn format_line(
    timestamp: &str,
    uuid: Option<&str>,
    topic: Option<&str>,
    level: &Level,
    message: &str,
    data: Option<&str>,
) -> String {
    let mut line = String::from(timestamp);
    if let Some(uuid) = uuid.filter(|u| !u.is_empty()) {
        let _ = write!(line, " [#{}]", uuid);
    }
    if let Some(topic) = topic.filter(|t| !t.is_empty()) {
        let _ = write!(line, " [{}]", topic);
    }
    let _ = write!(line, " [{}] {}, {}", level, message, data.unwrap_or(""));
    line
}

#[derive(Default)]
struct LineFields {
    message: String,
    topic: Option<String>,
    uuid: Option<String>,
    data: Option<String>,
}

impl LineFields {
    fn set(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = value,
            "topic" => self.topic = Some(value),
            "uuid" => self.uuid = Some(value),
            "data" => self.data = Some(value),
            _ => {}
        }
    }
}

impl Visit for LineFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.set(field.name(), format!("{:?}", value));
    }
}

/// Event formatter for the flat log files
pub struct LogLineFormat;

impl<S, N> FormatEvent<S, N> for LogLineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut fields = LineFields::default();
        event.record(&mut fields);

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let line = format_line(
            &timestamp,
            fields.uuid.as_deref(),
            fields.topic.as_deref(),
            event.metadata().level(),
            &fields.message,
            fields.data.as_deref(),
        );
        writeln!(writer, "{}", line)
    }
}

/// Create the logs directory, optionally clearing previous log files.
///
/// An already existing directory is fine; any other failure is fatal.
pub fn prepare_directory(config: &LogConfig) -> Result<()> {
    if config.delete_existing {
        for category in LogCategory::ALL {
            let _ = fs::remove_file(config.directory.join(category.file_name()));
        }
    }

    match fs::create_dir(&config.directory) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(source) => Err(DebuggerError::LogDirectory {
            folder: LOGS_FOLDER.to_string(),
            path: config
                .directory
                .parent()
                .unwrap_or(Path::new("."))
                .display()
                .to_string(),
            source,
        }),
    }
}

/// Initialize tracing: console output plus one file per [`LogCategory`]
pub fn init(config: &LogConfig) -> Result<()> {
    prepare_directory(config)?;

    let mut file_layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    for category in LogCategory::ALL {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(config.directory.join(category.file_name()))?;

        file_layers.push(
            tracing_subscriber::fmt::layer()
                .event_format(LogLineFormat)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(Targets::new().with_target(category.target(), LevelFilter::TRACE))
                .boxed(),
        );
    }

    let console_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "requests_debugger=info".into())
    };
    let console = if config.format == "json" {
        tracing_subscriber::fmt::layer()
            .json()
            .with_filter(console_filter())
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_filter(console_filter())
            .boxed()
    };

    tracing_subscriber::registry()
        .with(file_layers)
        .with(console)
        .try_init()
        .map_err(|e| DebuggerError::Internal(format!("Failed to initialize logging: {}", e)))?;

    for category in LogCategory::ALL {
        category.info("", LOGGER_INITIALIZED, &Value::Null, None);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn temp_logs_config(delete_existing: bool) -> LogConfig {
        let base = std::env::temp_dir().join(format!("rd-logs-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&base).unwrap();
        LogConfig {
            directory: base.join(LOGS_FOLDER),
            delete_existing,
            format: "pretty".to_string(),
        }
    }

    #[test]
    fn test_formats_full_line() {
        let line = format_line(
            "2024-01-01T00:00:00.000Z",
            Some("1::abc"),
            Some("CLIENT REQUEST START"),
            &Level::INFO,
            "GET http://host/path",
            Some(r#"{"headers":{}}"#),
        );
        assert_eq!(
            line,
            r#"2024-01-01T00:00:00.000Z [#1::abc] [CLIENT REQUEST START] [INFO] GET http://host/path, {"headers":{}}"#
        );
    }

    #[test]
    fn test_omits_empty_groups() {
        let line = format_line("ts", Some(""), None, &Level::ERROR, "boom", None);
        assert_eq!(line, "ts [ERROR] boom, ");
    }

    #[test]
    fn test_renders_data_payloads() {
        assert_eq!(render_data(&json!({})), "");
        assert_eq!(render_data(&Value::Null), "");
        assert_eq!(render_data(&json!({"data": "x"})), r#"{"data":"x"}"#);
    }

    #[test]
    fn test_every_category_has_its_own_file_and_target() {
        let files: std::collections::HashSet<_> =
            LogCategory::ALL.iter().map(|c| c.file_name()).collect();
        let targets: std::collections::HashSet<_> =
            LogCategory::ALL.iter().map(|c| c.target()).collect();
        assert_eq!(files.len(), LogCategory::ALL.len());
        assert_eq!(targets.len(), LogCategory::ALL.len());
    }

    #[test]
    fn test_prepare_directory_tolerates_existing_directory() {
        let config = temp_logs_config(false);
        prepare_directory(&config).unwrap();
        prepare_directory(&config).unwrap();
        assert!(config.directory.is_dir());
    }

    #[test]
    fn test_prepare_directory_deletes_existing_logs() {
        let config = temp_logs_config(true);
        fs::create_dir_all(&config.directory).unwrap();
        let requests_log = config.directory.join(LogCategory::Requests.file_name());
        fs::write(&requests_log, "old").unwrap();

        prepare_directory(&config).unwrap();
        assert!(!requests_log.exists());
    }

    #[test]
    fn test_prepare_directory_fails_when_parent_is_missing() {
        let config = LogConfig {
            directory: PathBuf::from("/nonexistent-rd-parent")
                .join(uuid::Uuid::new_v4().to_string())
                .join(LOGS_FOLDER),
            delete_existing: false,
            format: "pretty".to_string(),
        };
        let err = prepare_directory(&config).unwrap_err();
        assert!(matches!(err, DebuggerError::LogDirectory { .. }));
    }
}
