// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The structured log record handed to the pipeline.
//!
//! A [`LogEvent`] carries everything a logging facade knows about one call: the source name,
//! the level, the message template and its substitution arguments, extra attributes, an optional
//! captured error, and where and when it was created. The pipeline only reads events.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde_json::{Map, Number, Value};

use crate::errors;

/// Severity of a log event, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    /// Numeric level, spaced so collectors can sort and range-filter on it.
    pub const fn ordinal(self) -> u8 {
        match self {
            Level::Trace => 5,
            Level::Debug => 10,
            Level::Info => 20,
            Level::Warning => 30,
            Level::Error => 40,
            Level::Critical => 50,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown log level '{0}'")]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Level::Trace),
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARNING" | "WARN" => Ok(Level::Warning),
            "ERROR" => Ok(Level::Error),
            "CRITICAL" | "FATAL" => Ok(Level::Critical),
            _ => Err(ParseLevelError(s.to_string())),
        }
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warning,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Substitution arguments for the message template.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Args {
    #[default]
    None,
    /// Consumed in order by `%s`, `%d`, ... conversions.
    Positional(Vec<Value>),
    /// Looked up by `%(name)s` conversions.
    Named(Map<String, Value>),
}

impl Args {
    pub fn is_empty(&self) -> bool {
        match self {
            Args::None => true,
            Args::Positional(values) => values.is_empty(),
            Args::Named(map) => map.is_empty(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Args::None => Value::Array(Vec::new()),
            Args::Positional(values) => Value::Array(values.clone()),
            Args::Named(map) => Value::Object(map.clone()),
        }
    }
}

/// An extra attribute attached to an event.
///
/// Most values are plain JSON. Floats and raw bytes are kept unconverted because they may not
/// be representable: JSON has no NaN or infinity, and bytes must decode as UTF-8.
#[derive(Debug, Clone, PartialEq)]
pub enum Attr {
    Json(Value),
    Float(f64),
    Time(DateTime<Utc>),
    Bytes(Vec<u8>),
}

impl Attr {
    /// Converts the attribute to a JSON value.
    pub fn to_json(&self) -> Result<Value, errors::Serialize> {
        match self {
            Attr::Json(value) => Ok(value.clone()),
            Attr::Float(value) => Number::from_f64(*value).map(Value::Number).ok_or_else(|| {
                errors::Serialize::Unserializable(format!("{value} is not JSON serializable"))
            }),
            Attr::Time(time) => Ok(Value::String(
                time.to_rfc3339_opts(SecondsFormat::Micros, true),
            )),
            Attr::Bytes(bytes) => String::from_utf8(bytes.clone())
                .map(Value::String)
                .map_err(|e| errors::Serialize::Decode(e.to_string())),
        }
    }
}

impl From<Value> for Attr {
    fn from(value: Value) -> Self {
        Attr::Json(value)
    }
}

impl From<&str> for Attr {
    fn from(value: &str) -> Self {
        Attr::Json(Value::String(value.to_string()))
    }
}

impl From<String> for Attr {
    fn from(value: String) -> Self {
        Attr::Json(Value::String(value))
    }
}

impl From<bool> for Attr {
    fn from(value: bool) -> Self {
        Attr::Json(Value::Bool(value))
    }
}

impl From<i64> for Attr {
    fn from(value: i64) -> Self {
        Attr::Json(Value::from(value))
    }
}

impl From<i32> for Attr {
    fn from(value: i32) -> Self {
        Attr::Json(Value::from(value))
    }
}

impl From<u64> for Attr {
    fn from(value: u64) -> Self {
        Attr::Json(Value::from(value))
    }
}

impl From<u32> for Attr {
    fn from(value: u32) -> Self {
        Attr::Json(Value::from(value))
    }
}

impl From<f64> for Attr {
    fn from(value: f64) -> Self {
        Attr::Float(value)
    }
}

impl From<DateTime<Utc>> for Attr {
    fn from(value: DateTime<Utc>) -> Self {
        Attr::Time(value)
    }
}

impl From<Vec<u8>> for Attr {
    fn from(value: Vec<u8>) -> Self {
        Attr::Bytes(value)
    }
}

/// A captured error: its type and a rendered cause chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub class: String,
    pub traceback: String,
}

impl ExceptionInfo {
    pub fn new(class: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            traceback: traceback.into(),
        }
    }

    /// Captures `err` with its full `source()` chain, one cause per line.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let mut traceback = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            traceback.push_str("\nCaused by: ");
            traceback.push_str(&cause.to_string());
            source = cause.source();
        }
        Self {
            class: std::any::type_name::<E>().to_string(),
            traceback,
        }
    }
}

/// One log record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    /// Name of the emitting logger or tracing target.
    pub name: String,
    pub level: Level,
    /// Message template, substituted with `args` when no pre-rendered message is present.
    pub msg: String,
    pub args: Args,
    /// Pre-rendered message; takes precedence over `msg % args` when non-empty.
    pub message: Option<String>,
    pub extra: BTreeMap<String, Attr>,
    pub exc_info: Option<ExceptionInfo>,
    pub module: Option<String>,
    pub pathname: Option<String>,
    pub lineno: Option<u32>,
    pub created: DateTime<Utc>,
    pub process: u32,
    pub thread: String,
    pub thread_name: Option<String>,
}

impl LogEvent {
    /// Creates an event stamped with the current time, process and thread.
    pub fn new(name: impl Into<String>, level: Level, msg: impl Into<String>) -> Self {
        let current = std::thread::current();
        Self {
            name: name.into(),
            level,
            msg: msg.into(),
            args: Args::None,
            message: None,
            extra: BTreeMap::new(),
            exc_info: None,
            module: None,
            pathname: None,
            lineno: None,
            created: Utc::now(),
            process: std::process::id(),
            thread: format!("{:?}", current.id()),
            thread_name: current.name().map(str::to_string),
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Args) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Attr>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_exception(mut self, exc_info: ExceptionInfo) -> Self {
        self.exc_info = Some(exc_info);
        self
    }

    #[must_use]
    pub fn with_location(
        mut self,
        module: Option<&str>,
        pathname: Option<&str>,
        lineno: Option<u32>,
    ) -> Self {
        self.module = module.map(str::to_string);
        self.pathname = pathname.map(str::to_string);
        self.lineno = lineno;
        self
    }

    #[must_use]
    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = created;
        self
    }

    /// Every attribute of the record as a JSON mapping.
    ///
    /// Extras never replace record attributes. Exception info is left out; it is expanded by the
    /// serializer. Fails if an extra attribute cannot be represented as JSON.
    pub fn attributes(&self) -> Result<Map<String, Value>, errors::Serialize> {
        let mut data = Map::new();
        data.insert("name".to_string(), Value::String(self.name.clone()));
        data.insert(
            "levelname".to_string(),
            Value::String(self.level.name().to_string()),
        );
        data.insert("levelno".to_string(), Value::from(self.level.ordinal()));
        data.insert("msg".to_string(), Value::String(self.msg.clone()));
        data.insert("args".to_string(), self.args.to_json());
        if let Some(message) = &self.message {
            data.insert("message".to_string(), Value::String(message.clone()));
        }
        data.insert(
            "created".to_string(),
            Value::from(self.created.timestamp_micros() as f64 / 1_000_000.0),
        );
        data.insert(
            "msecs".to_string(),
            Value::from(self.created.nanosecond() / 1_000_000),
        );
        data.insert("process".to_string(), Value::from(self.process));
        data.insert("processName".to_string(), Value::from(process_name()));
        data.insert("thread".to_string(), Value::String(self.thread.clone()));
        data.insert(
            "threadName".to_string(),
            self.thread_name.clone().map_or(Value::Null, Value::String),
        );
        data.insert(
            "module".to_string(),
            self.module.clone().map_or(Value::Null, Value::String),
        );
        data.insert(
            "pathname".to_string(),
            self.pathname.clone().map_or(Value::Null, Value::String),
        );
        data.insert(
            "lineno".to_string(),
            self.lineno.map_or(Value::Null, Value::from),
        );

        for (key, attr) in &self.extra {
            if !data.contains_key(key) {
                data.insert(key.clone(), attr.to_json()?);
            }
        }
        Ok(data)
    }
}

fn process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_default()
}
