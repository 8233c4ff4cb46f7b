// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Serialization of log events into bulk-insert documents.
//!
//! Every event becomes a two-line message: an index descriptor line followed by the document
//! line, each terminated by a newline. This is the line-delimited format accepted by document
//! store bulk APIs, so any number of messages can be concatenated into one payload.
//!
//! The serializer never fails. Events from ignored sources yield an empty string, documents that
//! cannot be rendered are replaced with a fixed error document, and documents larger than the
//! size limit have their `message` cut from the tail and carry a truncation marker.

use std::io;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::errors;
use crate::event::LogEvent;
use crate::format::percent_format;

/// Field set to `true` on documents whose message was truncated.
pub const TRUNCATION_FIELD: &str = "ES_MTL";

/// Byte size reserved for the truncation marker as it appears in a rendered document.
pub const MARKER_OVERHEAD: usize = r#", "ES_MTL": true"#.len();

/// Message used when the template cannot be substituted with its arguments.
pub const UNPARSABLE_MESSAGE: &str = "could not parse arguments to message";

/// Sources whose events are never shipped: the pipeline's own diagnostics and the socket layer.
pub const DEFAULT_IGNORED_SOURCES: &[&str] = &["logship", "mio"];

/// Record attributes that carry no value for the collector.
const NOISE_FIELDS: &[&str] = &[
    "process",
    "relativeCreated",
    "args",
    "thread",
    "created",
    "threadName",
    "msecs",
    "levelno",
    "processName",
];

/// Routing metadata written on the line preceding each document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    #[serde(rename = "_index")]
    pub target_collection: String,
    #[serde(rename = "_type")]
    pub document_kind: String,
    #[serde(rename = "_id")]
    pub document_id: String,
}

impl IndexDescriptor {
    /// Descriptor for a new document of kind `doc_type`, in the collection for `date`.
    pub fn new(doc_type: &str, date: NaiveDate) -> Self {
        Self {
            target_collection: index_name(doc_type, date),
            document_kind: doc_type.to_string(),
            document_id: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Serialize)]
struct IndexLine<'a> {
    index: &'a IndexDescriptor,
}

/// Time-bucketed collection name: `{doc_type}-{YYYY-MM-DD}`.
pub fn index_name(doc_type: &str, date: NaiveDate) -> String {
    format!("{doc_type}-{}", date.format("%Y-%m-%d"))
}

/// Renders JSON with `", "` and `": "` separators.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

fn to_spaced_json<T>(value: &T) -> Result<String, errors::Serialize>
where
    T: Serialize + ?Sized,
{
    let mut buf = Vec::with_capacity(256);
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    value
        .serialize(&mut serializer)
        .map_err(|e| errors::Serialize::Unserializable(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| errors::Serialize::Decode(e.to_string()))
}

fn jsonify(
    index: &IndexDescriptor,
    data: &Map<String, Value>,
) -> Result<String, errors::Serialize> {
    let index_line = to_spaced_json(&IndexLine { index })?;
    let document_line = to_spaced_json(data)?;
    Ok(format!("{index_line}\n{document_line}\n"))
}

/// Replacement message for a document that could not be rendered.
fn fallback(index: &IndexDescriptor, err: &errors::Serialize) -> String {
    warn!("{err}");
    let reason = match err {
        errors::Serialize::Unserializable(_) => "unable to serialize",
        errors::Serialize::Decode(_) => "unable to decode",
    };
    let index_line = to_spaced_json(&IndexLine { index }).unwrap_or_default();
    let document_line = to_spaced_json(&json!({ "error": reason })).unwrap_or_default();
    format!("{index_line}\n{document_line}\n")
}

/// Bytes `ch` occupies inside a rendered JSON string.
fn encoded_width(ch: char) -> usize {
    match ch {
        '"' | '\\' | '\u{08}' | '\u{0c}' | '\n' | '\r' | '\t' => 2,
        c if (c as u32) < 0x20 => 6,
        c => c.len_utf8(),
    }
}

/// Byte offset to cut `message` at so at least `over_limit` encoded bytes leave its tail.
fn tail_cut(message: &str, over_limit: usize) -> usize {
    let mut removed = 0;
    for (offset, ch) in message.char_indices().rev() {
        if removed >= over_limit {
            return offset + ch.len_utf8();
        }
        removed += encoded_width(ch);
    }
    0
}

fn truncate_message(data: &mut Map<String, Value>, size: usize, limit: usize) {
    let budget = limit.saturating_sub(MARKER_OVERHEAD);
    let over_limit = size - budget + MARKER_OVERHEAD;
    if let Some(Value::String(message)) = data.get_mut("message") {
        let cut = tail_cut(message, over_limit);
        message.truncate(cut);
    }
    data.insert(TRUNCATION_FIELD.to_string(), Value::Bool(true));
}

/// The document body for `event`, with the message resolved and noise fields removed.
fn document_body(
    event: &LogEvent,
    now: DateTime<Utc>,
) -> Result<Map<String, Value>, errors::Serialize> {
    let mut data = event.attributes()?;
    data.insert(
        "@timestamp".to_string(),
        Value::String(now.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()),
    );

    let has_message = data
        .get("message")
        .and_then(Value::as_str)
        .is_some_and(|m| !m.is_empty());
    if !has_message {
        let message = if event.args.is_empty() {
            event.msg.clone()
        } else {
            percent_format(&event.msg, &event.args)
                .unwrap_or_else(|_| UNPARSABLE_MESSAGE.to_string())
        };
        data.insert("message".to_string(), Value::String(message));
    }

    for field in NOISE_FIELDS {
        data.remove(*field);
    }

    if let Some(exc_info) = &event.exc_info {
        data.insert(
            "exc_class".to_string(),
            Value::String(exc_info.class.clone()),
        );
        data.insert(
            "traceback".to_string(),
            Value::String(exc_info.traceback.clone()),
        );
    }
    Ok(data)
}

/// Turns events into size-bounded bulk messages for one document kind.
#[derive(Debug, Clone)]
pub struct RecordSerializer {
    doc_type: String,
    limit: usize,
    ignored_sources: Vec<String>,
}

impl RecordSerializer {
    pub fn new(doc_type: impl Into<String>, limit: usize, ignored_sources: Vec<String>) -> Self {
        Self {
            doc_type: doc_type.into(),
            limit,
            ignored_sources,
        }
    }

    pub fn doc_type(&self) -> &str {
        &self.doc_type
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether events from `name` (or a module below it) are suppressed.
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored_sources.iter().any(|ignored| {
            name == ignored
                || name
                    .strip_prefix(ignored.as_str())
                    .is_some_and(|rest| rest.starts_with("::"))
        })
    }

    /// A fresh descriptor for a document created now.
    pub fn index_descriptor(&self) -> IndexDescriptor {
        IndexDescriptor::new(&self.doc_type, Utc::now().date_naive())
    }

    /// Serializes `event` under a fresh descriptor with the configured limit.
    pub fn format(&self, event: &LogEvent) -> String {
        let index = self.index_descriptor();
        self.serialize(event, &index, self.limit)
    }

    /// Serializes `event`, stamping it with the current time.
    pub fn serialize(&self, event: &LogEvent, index: &IndexDescriptor, limit: usize) -> String {
        self.serialize_at(event, index, limit, Utc::now())
    }

    /// Serializes `event` as of `now`. Returns an empty string for ignored sources.
    pub fn serialize_at(
        &self,
        event: &LogEvent,
        index: &IndexDescriptor,
        limit: usize,
        now: DateTime<Utc>,
    ) -> String {
        if self.is_ignored(&event.name) {
            return String::new();
        }

        let mut data = match document_body(event, now) {
            Ok(data) => data,
            Err(e) => return fallback(index, &e),
        };
        let message = match jsonify(index, &data) {
            Ok(message) => message,
            Err(e) => return fallback(index, &e),
        };

        let size = message.len();
        if size <= limit.saturating_sub(MARKER_OVERHEAD) {
            return message;
        }

        truncate_message(&mut data, size, limit);
        jsonify(index, &data).unwrap_or_else(|e| fallback(index, &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Args, ExceptionInfo, Level};
    use chrono::TimeZone;
    use tracing_test::traced_test;

    fn serializer() -> RecordSerializer {
        RecordSerializer::new(
            "logs",
            9000,
            DEFAULT_IGNORED_SOURCES.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn fixed_index() -> IndexDescriptor {
        IndexDescriptor {
            target_collection: "logs-2024-03-01".to_string(),
            document_kind: "logs".to_string(),
            document_id: "9a1c4b2e-0000-4000-8000-000000000001".to_string(),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
    }

    fn document(message: &str) -> Value {
        let line = message.lines().nth(1).expect("document line");
        serde_json::from_str(line).expect("document is JSON")
    }

    #[test]
    fn test_two_line_message_with_index_descriptor() {
        let event = LogEvent::new("app", Level::Info, "hello");
        let message = serializer().serialize_at(&event, &fixed_index(), 9000, fixed_now());

        assert!(message.ends_with('\n'));
        assert_eq!(message.lines().count(), 2);
        let index: Value = serde_json::from_str(message.lines().next().unwrap()).unwrap();
        assert_eq!(index["index"]["_index"], "logs-2024-03-01");
        assert_eq!(index["index"]["_type"], "logs");
        assert_eq!(
            index["index"]["_id"],
            "9a1c4b2e-0000-4000-8000-000000000001"
        );
    }

    #[test]
    fn test_message_rendered_with_spaced_separators() {
        let event = LogEvent::new("app", Level::Debug, "m");
        let message = serializer().serialize_at(&event, &fixed_index(), 9000, fixed_now());
        assert!(message.contains(r#""message": "m""#));
        assert!(!message.contains(TRUNCATION_FIELD));
    }

    #[test]
    fn test_noise_fields_removed_and_timestamp_added() {
        let event = LogEvent::new("app", Level::Info, "hello");
        let doc = document(&serializer().serialize_at(&event, &fixed_index(), 9000, fixed_now()));

        for field in NOISE_FIELDS {
            assert!(doc.get(*field).is_none(), "{field} should be removed");
        }
        assert_eq!(doc["@timestamp"], "2024-03-01T12:30:00.000000Z");
        assert_eq!(doc["levelname"], "INFO");
        assert_eq!(doc["name"], "app");
        assert_eq!(doc["msg"], "hello");
    }

    #[test]
    fn test_template_substituted_with_arguments() {
        let event = LogEvent::new("app", Level::Info, "user %s has %d items")
            .with_args(Args::Positional(vec![json!("ana"), json!(4)]));
        let doc = document(&serializer().serialize_at(&event, &fixed_index(), 9000, fixed_now()));
        assert_eq!(doc["message"], "user ana has 4 items");
        assert_eq!(doc["msg"], "user %s has %d items");
    }

    #[test]
    fn test_unparsable_arguments_use_sentinel() {
        let event = LogEvent::new("app", Level::Info, "%s and %s")
            .with_args(Args::Positional(vec![json!("one")]));
        let doc = document(&serializer().serialize_at(&event, &fixed_index(), 9000, fixed_now()));
        assert_eq!(doc["message"], UNPARSABLE_MESSAGE);
    }

    #[test]
    fn test_huge_field_width_uses_sentinel() {
        for template in ["%99999999999999999999s", "%99999999999999999999d", "%.99999999999f"] {
            let event = LogEvent::new("app", Level::Info, template)
                .with_args(Args::Positional(vec![json!(7)]));
            let message = serializer().serialize_at(&event, &fixed_index(), 9000, fixed_now());
            assert!(message.len() <= 9000);
            assert_eq!(document(&message)["message"], UNPARSABLE_MESSAGE, "{template}");
        }
    }

    #[test]
    fn test_prerendered_message_is_kept() {
        let event = LogEvent::new("app", Level::Info, "%s")
            .with_args(Args::Positional(vec![json!("ignored")]))
            .with_message("already rendered");
        let doc = document(&serializer().serialize_at(&event, &fixed_index(), 9000, fixed_now()));
        assert_eq!(doc["message"], "already rendered");
    }

    #[test]
    fn test_template_without_arguments_is_verbatim() {
        let event = LogEvent::new("app", Level::Info, "100% done");
        let doc = document(&serializer().serialize_at(&event, &fixed_index(), 9000, fixed_now()));
        assert_eq!(doc["message"], "100% done");
    }

    #[test]
    fn test_exception_replaced_by_class_and_traceback() {
        let event = LogEvent::new("app", Level::Error, "boom").with_exception(ExceptionInfo::new(
            "std::io::Error",
            "disk full\nCaused by: quota",
        ));
        let doc = document(&serializer().serialize_at(&event, &fixed_index(), 9000, fixed_now()));
        assert_eq!(doc["exc_class"], "std::io::Error");
        assert_eq!(doc["traceback"], "disk full\nCaused by: quota");
        assert!(doc.get("exc_info").is_none());
    }

    #[test]
    fn test_extras_are_shipped() {
        let event = LogEvent::new("app", Level::Info, "hello")
            .with_extra("request_id", "r-1")
            .with_extra("latency_ms", 12.5);
        let doc = document(&serializer().serialize_at(&event, &fixed_index(), 9000, fixed_now()));
        assert_eq!(doc["request_id"], "r-1");
        assert_eq!(doc["latency_ms"], 12.5);
    }

    #[test]
    fn test_ignored_sources_produce_empty_message() {
        let serializer = serializer();
        for name in ["logship", "logship::handler", "mio::net::udp"] {
            let event = LogEvent::new(name, Level::Info, "self logging");
            assert_eq!(
                serializer.serialize_at(&event, &fixed_index(), 9000, fixed_now()),
                ""
            );
        }
        let event = LogEvent::new("logshipper", Level::Info, "not ignored");
        assert!(!serializer
            .serialize_at(&event, &fixed_index(), 9000, fixed_now())
            .is_empty());
    }

    #[test]
    #[traced_test]
    fn test_unserializable_value_falls_back() {
        let event = LogEvent::new("app", Level::Info, "hello").with_extra("ratio", f64::NAN);
        let message = serializer().serialize_at(&event, &fixed_index(), 9000, fixed_now());

        assert_eq!(message.lines().count(), 2);
        assert_eq!(
            message.lines().nth(1),
            Some(r#"{"error": "unable to serialize"}"#)
        );
        let index: Value = serde_json::from_str(message.lines().next().unwrap()).unwrap();
        assert_eq!(index["index"]["_index"], "logs-2024-03-01");
        assert!(logs_contain("cannot serialize"));
    }

    #[test]
    #[traced_test]
    fn test_undecodable_bytes_fall_back() {
        let event =
            LogEvent::new("app", Level::Info, "hello").with_extra("payload", vec![0xc3, 0x28]);
        let message = serializer().serialize_at(&event, &fixed_index(), 9000, fixed_now());

        assert_eq!(
            message.lines().nth(1),
            Some(r#"{"error": "unable to decode"}"#)
        );
        assert!(logs_contain("cannot decode as utf8"));
    }

    #[test]
    fn test_oversized_message_is_truncated() {
        let limit = 1000;
        let event = LogEvent::new("app", Level::Info, "%s")
            .with_args(Args::Positional(vec![json!("x".repeat(5000))]));
        let message = serializer().serialize_at(&event, &fixed_index(), limit, fixed_now());

        assert!(message.len() <= limit - MARKER_OVERHEAD);
        assert!(message.contains(r#""ES_MTL": true"#));
        let doc = document(&message);
        let kept = doc["message"].as_str().unwrap();
        assert!(!kept.is_empty());
        assert!(kept.chars().all(|c| c == 'x'));
    }

    #[test]
    fn test_truncation_respects_multibyte_and_escaped_characters() {
        let limit = 800;
        let event = LogEvent::new("app", Level::Info, "%s")
            .with_args(Args::Positional(vec![json!("é\"\n".repeat(600))]));
        let message = serializer().serialize_at(&event, &fixed_index(), limit, fixed_now());

        assert!(message.len() <= limit - MARKER_OVERHEAD);
        let doc = document(&message);
        assert_eq!(doc[TRUNCATION_FIELD], true);
    }

    #[test]
    fn test_message_exactly_at_budget_is_not_truncated() {
        let event = LogEvent::new("app", Level::Info, "fits");
        let full = serializer().serialize_at(&event, &fixed_index(), 9000, fixed_now());
        let limit = full.len() + MARKER_OVERHEAD;
        let message = serializer().serialize_at(&event, &fixed_index(), limit, fixed_now());
        assert_eq!(message, full);
    }

    #[test]
    fn test_output_is_deterministic_for_fixed_id_and_time() {
        let event = LogEvent::new("app", Level::Warning, "same %s")
            .with_args(Args::Positional(vec![json!("input")]))
            .with_extra("k", "v");
        let serializer = serializer();
        let first = serializer.serialize_at(&event, &fixed_index(), 9000, fixed_now());
        let second = serializer.serialize_at(&event, &fixed_index(), 9000, fixed_now());
        assert_eq!(first, second);
    }

    #[test]
    fn test_index_name_is_time_bucketed() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 9).unwrap();
        assert_eq!(index_name("app-logs", date), "app-logs-2024-01-09");
        let descriptor = IndexDescriptor::new("app-logs", date);
        assert_eq!(descriptor.target_collection, "app-logs-2024-01-09");
        assert_eq!(descriptor.document_kind, "app-logs");
        assert!(Uuid::parse_str(&descriptor.document_id).is_ok());
    }
}
