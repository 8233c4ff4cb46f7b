// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use crate::event::{Attr, LogEvent};

/// Fields bound to a logger and attached to every event it emits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextBinder {
    fields: BTreeMap<String, Attr>,
}

impl ContextBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of this context with `key` bound to `value`.
    #[must_use]
    pub fn bind(&self, key: impl Into<String>, value: impl Into<Attr>) -> Self {
        let mut fields = self.fields.clone();
        fields.insert(key.into(), value.into());
        Self { fields }
    }

    /// A copy of this context without `keys`.
    #[must_use]
    pub fn unbind(&self, keys: &[&str]) -> Self {
        let mut fields = self.fields.clone();
        for key in keys {
            fields.remove(*key);
        }
        Self { fields }
    }

    pub fn fields(&self) -> &BTreeMap<String, Attr> {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Adds the bound fields to `event`. Extras already on the event are kept.
    pub fn apply(&self, event: &mut LogEvent) {
        for (key, value) in &self.fields {
            event
                .extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}
