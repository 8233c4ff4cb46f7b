// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Level overrides shared by a family of loggers.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::event::Level;

#[derive(Debug, Default)]
struct State {
    global: Option<Level>,
    per_name: HashMap<String, Level>,
}

/// Forced levels that take precedence over each logger's own level.
///
/// A per-name override wins over the global one.
#[derive(Debug, Default)]
pub struct LevelOverrides {
    state: RwLock<State>,
}

impl LevelOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces every logger sharing these overrides to `level`.
    pub fn force(&self, level: Level) {
        self.write(|state| state.global = Some(level));
    }

    /// Replaces the per-name overrides with `levels`.
    pub fn force_names<I, K>(&self, levels: I)
    where
        I: IntoIterator<Item = (K, Level)>,
        K: Into<String>,
    {
        let per_name = levels.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.write(|state| state.per_name = per_name);
    }

    pub fn force_name(&self, name: impl Into<String>, level: Level) {
        let name = name.into();
        self.write(|state| {
            state.per_name.insert(name, level);
        });
    }

    /// Clears the global override. Per-name overrides stay.
    pub fn reset(&self) {
        self.write(|state| state.global = None);
    }

    pub fn clear_names(&self) {
        self.write(|state| state.per_name.clear());
    }

    pub fn global(&self) -> Option<Level> {
        self.read(|state| state.global)
    }

    /// The forced level for logger `name`, if any.
    pub fn resolve(&self, name: &str) -> Option<Level> {
        self.read(|state| state.per_name.get(name).copied().or(state.global))
    }

    /// Runs `f` with the global level forced to `level`, restoring the previous global override
    /// afterwards, including when `f` panics.
    pub fn propagate<R>(&self, level: Level, f: impl FnOnce() -> R) -> R {
        let _guard = ForcedLevel::new(self, level);
        f()
    }

    fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn write(&self, f: impl FnOnce(&mut State)) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }
}

struct ForcedLevel<'a> {
    overrides: &'a LevelOverrides,
    previous: Option<Level>,
}

impl<'a> ForcedLevel<'a> {
    fn new(overrides: &'a LevelOverrides, level: Level) -> Self {
        let previous = overrides.global();
        overrides.force(level);
        Self {
            overrides,
            previous,
        }
    }
}

impl Drop for ForcedLevel<'_> {
    fn drop(&mut self) {
        let previous = self.previous;
        self.overrides.write(|state| state.global = previous);
    }
}
