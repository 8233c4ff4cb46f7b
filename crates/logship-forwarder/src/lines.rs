// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of input lines into log events.
//!
//! A line holding a JSON object is treated as a structured record: `message` (or `msg`) gives
//! the message, `level` (or `levelname`) the level, `logger` (or `name`) the source, and every
//! other key becomes an extra attribute. Anything else is shipped verbatim at INFO.

use logship::{Level, LogEvent};
use serde_json::{Map, Value};

const MESSAGE_KEYS: &[&str] = &["message", "msg"];
const LEVEL_KEYS: &[&str] = &["level", "levelname"];
const NAME_KEYS: &[&str] = &["logger", "name"];

fn take_str(object: &mut Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match object.get(*key) {
        Some(Value::String(_)) => match object.remove(*key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        },
        _ => None,
    })
}

pub fn parse_line(source: &str, line: &str) -> LogEvent {
    let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(line) else {
        return LogEvent::new(source, Level::Info, line);
    };

    let message = take_str(&mut object, MESSAGE_KEYS).unwrap_or_default();
    let level = take_str(&mut object, LEVEL_KEYS)
        .and_then(|level| level.parse::<Level>().ok())
        .unwrap_or(Level::Info);
    let name = take_str(&mut object, NAME_KEYS).unwrap_or_else(|| source.to_string());

    let mut event = LogEvent::new(name, level, message);
    for (key, value) in object {
        event = event.with_extra(key, value);
    }
    event
}
