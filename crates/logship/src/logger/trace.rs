// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scoped tracing: while a trace is active every logger sharing the buffer runs at DEBUG and
//! holds its events back. When the scope ends the events are replayed. A clean exit replays them
//! against the restored levels, so only what would normally be logged gets through. A failed exit
//! replays everything that was captured.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::warn;

use super::levels::LevelOverrides;
use super::Sink;
use crate::errors;
use crate::event::{Level, LogEvent};

/// Level forced while a trace is active.
pub const TRACE_LEVEL: Level = Level::Debug;

struct Buffered {
    event: LogEvent,
    /// Own level of the logger that emitted the event.
    level: Level,
    sink: Arc<dyn Sink>,
}

#[derive(Default)]
struct TraceState {
    depth: usize,
    failed: bool,
    previous: Option<Level>,
    events: Vec<Buffered>,
}

/// Events captured during the active trace, shared by a family of loggers.
pub struct TraceBuffer {
    overrides: Arc<LevelOverrides>,
    state: Mutex<TraceState>,
}

impl TraceBuffer {
    pub fn new(overrides: Arc<LevelOverrides>) -> Self {
        Self {
            overrides,
            state: Mutex::new(TraceState::default()),
        }
    }

    pub fn overrides(&self) -> &Arc<LevelOverrides> {
        &self.overrides
    }

    pub fn is_active(&self) -> bool {
        self.lock().depth > 0
    }

    /// Number of events waiting for the trace to end.
    pub fn pending(&self) -> usize {
        self.lock().events.len()
    }

    /// Starts a trace, or joins the one already active.
    pub fn start(self: &Arc<Self>) -> TraceGuard {
        let mut state = self.lock();
        if state.depth == 0 {
            state.previous = self.overrides.global();
            state.failed = false;
            self.overrides.force(TRACE_LEVEL);
        }
        state.depth += 1;
        TraceGuard {
            buffer: Arc::clone(self),
            done: false,
        }
    }

    /// Holds `event` back if a trace is active, otherwise hands it back.
    pub(crate) fn capture(
        &self,
        event: LogEvent,
        level: Level,
        sink: &Arc<dyn Sink>,
    ) -> Option<LogEvent> {
        let mut state = self.lock();
        if state.depth == 0 {
            return Some(event);
        }
        state.events.push(Buffered {
            event,
            level,
            sink: Arc::clone(sink),
        });
        None
    }

    fn exit(&self, failed: bool) -> Result<(), errors::Flush> {
        let (events, failed, previous) = {
            let mut state = self.lock();
            if state.depth == 0 {
                return Ok(());
            }
            state.depth -= 1;
            state.failed |= failed;
            if state.depth > 0 {
                return Ok(());
            }
            (
                std::mem::take(&mut state.events),
                state.failed,
                state.previous.take(),
            )
        };

        if failed {
            let result = self.replay(events);
            self.restore(previous);
            result
        } else {
            self.restore(previous);
            self.replay(events)
        }
    }

    fn restore(&self, previous: Option<Level>) {
        match previous {
            Some(level) => self.overrides.force(level),
            None => self.overrides.reset(),
        }
    }

    /// Emits each buffered event its logger is currently enabled for. Keeps going after a failed
    /// emit and returns the first error.
    fn replay(&self, events: Vec<Buffered>) -> Result<(), errors::Flush> {
        let mut first_error = None;
        for buffered in events {
            let effective = self
                .overrides
                .resolve(&buffered.event.name)
                .unwrap_or(buffered.level);
            if buffered.event.level < effective {
                continue;
            }
            if let Err(e) = buffered.sink.emit(&buffered.event) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn lock(&self) -> MutexGuard<'_, TraceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ends the trace it was created for.
///
/// Dropping the guard ends the trace cleanly, or as failed if the thread is panicking.
#[must_use = "the trace ends when the guard is dropped"]
pub struct TraceGuard {
    buffer: Arc<TraceBuffer>,
    done: bool,
}

impl TraceGuard {
    /// Ends the trace normally.
    pub fn finish(mut self) -> Result<(), errors::Flush> {
        self.done = true;
        self.buffer.exit(false)
    }

    /// Ends the trace as failed: every captured event is emitted.
    pub fn fail(mut self) -> Result<(), errors::Flush> {
        self.done = true;
        self.buffer.exit(true)
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = self.buffer.exit(thread::panicking()) {
            warn!("Failed to replay traced events: {e}");
        }
    }
}
