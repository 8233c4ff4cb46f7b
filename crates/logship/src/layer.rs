// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A `tracing` layer that ships events through a [`Sink`], usually a [`Handler`].
//!
//! The event target becomes the source name, the `message` field the template and every other
//! field an extra attribute. Events from this crate are skipped so that shipping diagnostics
//! never feed back into the pipeline.
//!
//! [`Handler`]: crate::handler::Handler

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::event::{Attr, Level, LogEvent};
use crate::logger::Sink;

const OWN_TARGET: &str = "logship";

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Vec<(String, Attr)>,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Attr) {
        self.fields.push((field.name().to_string(), value));
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.insert(field, Attr::from(format!("{value:?}")));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, Attr::from(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Attr::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Attr::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Attr::Float(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Attr::Json(Value::Bool(value)));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Attr::from(value.to_string()));
    }
}

/// Forwards `tracing` events at or above a minimum level to a sink.
#[derive(Clone)]
pub struct ShippingLayer {
    sink: Arc<dyn Sink>,
    min_level: Level,
}

impl ShippingLayer {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            min_level: Level::Trace,
        }
    }

    #[must_use]
    pub fn with_min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    fn is_own(target: &str) -> bool {
        target == OWN_TARGET
            || target
                .strip_prefix(OWN_TARGET)
                .is_some_and(|rest| rest.starts_with("::"))
    }

    /// Converts a `tracing` event, or returns `None` when it should not be shipped.
    fn convert(&self, event: &Event<'_>) -> Option<LogEvent> {
        let metadata = event.metadata();
        let level = Level::from(*metadata.level());
        if level < self.min_level || Self::is_own(metadata.target()) {
            return None;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut log_event = LogEvent::new(
            metadata.target(),
            level,
            visitor.message.unwrap_or_default(),
        )
        .with_location(metadata.module_path(), metadata.file(), metadata.line());
        for (key, value) in visitor.fields {
            log_event.extra.insert(key, value);
        }
        Some(log_event)
    }
}

impl<S> Layer<S> for ShippingLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let Some(log_event) = self.convert(event) else {
            return;
        };
        // There is no caller to return an error to, and logging it would re-enter this layer.
        if let Err(e) = self.sink.emit(&log_event) {
            eprintln!("logship: failed to ship event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HandlerConfig;
    use crate::handler::Handler;
    use crate::logger::tests::MemorySink;
    use crate::packer::tests::RecordingTransport;
    use crate::rotator::Endpoint;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture(layer: ShippingLayer, f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_event_fields_become_extras() {
        let sink = Arc::new(MemorySink::default());
        capture(ShippingLayer::new(sink.clone()), || {
            tracing::info!(target: "app::auth", user = "ana", attempts = 3, ok = true, "logged in");
        });

        let event = sink.pop().unwrap();
        assert_eq!(event.name, "app::auth");
        assert_eq!(event.level, Level::Info);
        assert_eq!(event.msg, "logged in");
        assert_eq!(event.extra["user"], Attr::from("ana"));
        assert_eq!(event.extra["attempts"], Attr::from(3i64));
        assert_eq!(event.extra["ok"], Attr::from(true));
        assert!(event.lineno.is_some());
        assert!(event.pathname.unwrap().ends_with("layer.rs"));
    }

    #[test]
    fn test_min_level_filters() {
        let sink = Arc::new(MemorySink::default());
        capture(
            ShippingLayer::new(sink.clone()).with_min_level(Level::Warning),
            || {
                tracing::info!("quiet");
                tracing::warn!("loud");
            },
        );
        assert_eq!(sink.messages(), [("loud".to_string(), Level::Warning)]);
    }

    #[test]
    fn test_own_events_are_skipped() {
        let sink = Arc::new(MemorySink::default());
        capture(ShippingLayer::new(sink.clone()), || {
            tracing::warn!(target: "logship::handler", "internal");
            tracing::warn!(target: "logshipper", "external");
        });
        assert_eq!(sink.messages(), [("external".to_string(), Level::Warning)]);
    }

    #[test]
    fn test_formatted_message() {
        let sink = Arc::new(MemorySink::default());
        capture(ShippingLayer::new(sink.clone()), || {
            let n = 5;
            tracing::error!("retried {n} times");
        });
        assert_eq!(sink.pop().unwrap().msg, "retried 5 times");
    }

    #[test]
    fn test_events_reach_the_wire_as_documents() {
        let transport = RecordingTransport::default();
        let handler = Arc::new(
            Handler::with_transport(
                HandlerConfig::new(vec![Endpoint::new("localhost", 9700)]),
                transport.clone(),
            )
            .unwrap(),
        );

        capture(ShippingLayer::new(handler.clone()), || {
            tracing::info!(target: "app", request_id = "r-1", "served");
        });
        handler.flush().unwrap();

        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        let document: Value = serde_json::from_str(sent[0].0.lines().nth(1).unwrap()).unwrap();
        assert_eq!(document["name"], "app");
        assert_eq!(document["message"], "served");
        assert_eq!(document["request_id"], "r-1");
        assert_eq!(document["levelname"], "INFO");
    }
}
