// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! A logger front-end for the shipping pipeline, composed from optional capabilities.
//!
//! - **structured**: fields bound with [`Logger::bind`] are attached to every event.
//! - **propagation**: levels can be forced for a whole family of loggers, globally or per name.
//! - **tracking**: [`Logger::trace`] captures events at DEBUG and replays them when the scope
//!   ends. Tracking implies propagation.
//!
//! Loggers created from one another with [`Logger::named`] share the sink, the overrides and
//! the trace buffer.

mod context;
mod levels;
mod trace;

use std::panic::Location;
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

pub use context::ContextBinder;
pub use levels::LevelOverrides;
pub use trace::{TraceBuffer, TraceGuard, TRACE_LEVEL};

use crate::errors;
use crate::event::{Args, Attr, ExceptionInfo, Level, LogEvent};

/// Destination of the events a logger lets through.
pub trait Sink: Send + Sync {
    fn emit(&self, event: &LogEvent) -> Result<(), errors::Flush>;
}

impl<S: Sink + ?Sized> Sink for Arc<S> {
    fn emit(&self, event: &LogEvent) -> Result<(), errors::Flush> {
        (**self).emit(event)
    }
}

/// Chooses the capabilities of a [`Logger`].
pub struct LoggerBuilder {
    name: String,
    level: Level,
    sink: Arc<dyn Sink>,
    structured: bool,
    propagation: bool,
    tracking: bool,
    overrides: Option<Arc<LevelOverrides>>,
}

impl LoggerBuilder {
    pub fn new(name: impl Into<String>, sink: Arc<dyn Sink>) -> Self {
        Self {
            name: name.into(),
            level: Level::Info,
            sink,
            structured: false,
            propagation: false,
            tracking: false,
            overrides: None,
        }
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn structured(mut self, enabled: bool) -> Self {
        self.structured = enabled;
        self
    }

    pub fn propagation(mut self, enabled: bool) -> Self {
        self.propagation = enabled;
        self
    }

    pub fn tracking(mut self, enabled: bool) -> Self {
        self.tracking = enabled;
        self
    }

    /// Shares existing overrides instead of creating new ones. Enables propagation.
    pub fn overrides(mut self, overrides: Arc<LevelOverrides>) -> Self {
        self.propagation = true;
        self.overrides = Some(overrides);
        self
    }

    pub fn build(self) -> Logger {
        let overrides = if self.propagation || self.tracking {
            Some(self.overrides.unwrap_or_default())
        } else {
            None
        };
        let tracker = match (&overrides, self.tracking) {
            (Some(overrides), true) => Some(Arc::new(TraceBuffer::new(Arc::clone(overrides)))),
            _ => None,
        };

        Logger {
            name: self.name,
            level: self.level,
            sink: self.sink,
            context: self.structured.then(ContextBinder::new),
            overrides,
            tracker,
        }
    }
}

/// A named logger that turns calls into [`LogEvent`]s for its sink.
#[derive(Clone)]
pub struct Logger {
    name: String,
    level: Level,
    sink: Arc<dyn Sink>,
    context: Option<ContextBinder>,
    overrides: Option<Arc<LevelOverrides>>,
    tracker: Option<Arc<TraceBuffer>>,
}

impl Logger {
    pub fn builder(name: impl Into<String>, sink: Arc<dyn Sink>) -> LoggerBuilder {
        LoggerBuilder::new(name, sink)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn set_level(&mut self, level: Level) {
        self.level = level;
    }

    /// A logger called `name` with the same capabilities and shared state, and no bound context.
    pub fn named(&self, name: impl Into<String>) -> Logger {
        Logger {
            name: name.into(),
            context: self.context.as_ref().map(|_| ContextBinder::new()),
            ..self.clone()
        }
    }

    /// The forced level for this logger if there is one, else its own level.
    pub fn effective_level(&self) -> Level {
        self.overrides
            .as_ref()
            .and_then(|overrides| overrides.resolve(&self.name))
            .unwrap_or(self.level)
    }

    pub fn is_enabled_for(&self, level: Level) -> bool {
        level >= self.effective_level()
    }

    /// Sends `event` to the sink if its level is enabled, holding it back during a trace.
    pub fn log_event(&self, mut event: LogEvent) -> Result<(), errors::Flush> {
        if !self.is_enabled_for(event.level) {
            return Ok(());
        }
        if let Some(context) = &self.context {
            context.apply(&mut event);
        }
        let event = match &self.tracker {
            Some(tracker) => match tracker.capture(event, self.level, &self.sink) {
                Some(event) => event,
                None => return Ok(()),
            },
            None => event,
        };
        self.sink.emit(&event)
    }

    #[track_caller]
    pub fn log(
        &self,
        level: Level,
        msg: impl Into<String>,
        args: Args,
    ) -> Result<(), errors::Flush> {
        if !self.is_enabled_for(level) {
            return Ok(());
        }
        let event = self.event(level, msg, Location::caller()).with_args(args);
        self.log_event(event)
    }

    #[track_caller]
    pub fn trace_event(&self, msg: impl Into<String>) -> Result<(), errors::Flush> {
        self.log(Level::Trace, msg, Args::None)
    }

    #[track_caller]
    pub fn debug(&self, msg: impl Into<String>) -> Result<(), errors::Flush> {
        self.log(Level::Debug, msg, Args::None)
    }

    #[track_caller]
    pub fn info(&self, msg: impl Into<String>) -> Result<(), errors::Flush> {
        self.log(Level::Info, msg, Args::None)
    }

    #[track_caller]
    pub fn warning(&self, msg: impl Into<String>) -> Result<(), errors::Flush> {
        self.log(Level::Warning, msg, Args::None)
    }

    #[track_caller]
    pub fn error(&self, msg: impl Into<String>) -> Result<(), errors::Flush> {
        self.log(Level::Error, msg, Args::None)
    }

    #[track_caller]
    pub fn critical(&self, msg: impl Into<String>) -> Result<(), errors::Flush> {
        self.log(Level::Critical, msg, Args::None)
    }

    /// Logs `msg` at ERROR with the class and cause chain of `err` attached.
    #[track_caller]
    pub fn exception<E>(&self, msg: impl Into<String>, err: &E) -> Result<(), errors::Flush>
    where
        E: std::error::Error + 'static,
    {
        if !self.is_enabled_for(Level::Error) {
            return Ok(());
        }
        let event = self
            .event(Level::Error, msg, Location::caller())
            .with_exception(ExceptionInfo::from_error(err));
        self.log_event(event)
    }

    fn event(&self, level: Level, msg: impl Into<String>, location: &Location<'_>) -> LogEvent {
        let module = Path::new(location.file())
            .file_stem()
            .and_then(|stem| stem.to_str());
        LogEvent::new(self.name.clone(), level, msg).with_location(
            module,
            Some(location.file()),
            Some(location.line()),
        )
    }

    /// A copy of this logger whose events carry `key = value`.
    pub fn bind(
        &self,
        key: impl Into<String>,
        value: impl Into<Attr>,
    ) -> Result<Logger, errors::Capability> {
        let context = self.require(self.context.as_ref(), "structured")?;
        Ok(Logger {
            context: Some(context.bind(key, value)),
            ..self.clone()
        })
    }

    /// A copy of this logger without the bound `keys`.
    pub fn unbind(&self, keys: &[&str]) -> Result<Logger, errors::Capability> {
        let context = self.require(self.context.as_ref(), "structured")?;
        Ok(Logger {
            context: Some(context.unbind(keys)),
            ..self.clone()
        })
    }

    pub fn context(&self) -> Option<&ContextBinder> {
        self.context.as_ref()
    }

    /// The overrides shared by this logger family.
    pub fn overrides(&self) -> Result<&Arc<LevelOverrides>, errors::Capability> {
        self.require(self.overrides.as_ref(), "propagation")
    }

    /// Forces every logger of the family to `level` until [`Logger::reset_level`].
    pub fn force_level(&self, level: Level) -> Result<(), errors::Capability> {
        self.overrides()?.force(level);
        Ok(())
    }

    /// Replaces the per-name forced levels.
    pub fn force_levels<I, K>(&self, levels: I) -> Result<(), errors::Capability>
    where
        I: IntoIterator<Item = (K, Level)>,
        K: Into<String>,
    {
        self.overrides()?.force_names(levels);
        Ok(())
    }

    pub fn reset_level(&self) -> Result<(), errors::Capability> {
        self.overrides()?.reset();
        Ok(())
    }

    /// Runs `f` with the family forced to `level`.
    pub fn level_propagation<R>(
        &self,
        level: Level,
        f: impl FnOnce() -> R,
    ) -> Result<R, errors::Capability> {
        Ok(self.overrides()?.propagate(level, f))
    }

    /// Starts a trace that ends when the returned guard is finished, failed or dropped.
    pub fn trace(&self) -> Result<TraceGuard, errors::Capability> {
        Ok(self.require(self.tracker.as_ref(), "tracking")?.start())
    }

    /// Runs `f` inside a trace. An `Err` from `f` ends the trace as failed.
    pub fn traced<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce() -> Result<R, E>,
        E: From<errors::Capability>,
    {
        let guard = self.trace()?;
        let result = f();
        let replayed = if result.is_ok() {
            guard.finish()
        } else {
            guard.fail()
        };
        if let Err(e) = replayed {
            warn!("Failed to replay traced events: {e}");
        }
        result
    }

    pub fn is_tracking(&self) -> bool {
        self.tracker
            .as_ref()
            .is_some_and(|tracker| tracker.is_active())
    }

    fn require<'a, T>(
        &self,
        capability: Option<&'a T>,
        name: &'static str,
    ) -> Result<&'a T, errors::Capability> {
        capability.ok_or_else(|| errors::Capability {
            logger: self.name.clone(),
            capability: name,
        })
    }
}
