// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory accumulation of serialized messages, bounded by byte size rather than count.

/// Messages drained from the buffer in the order they were appended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    messages: Vec<String>,
    size: usize,
}

impl Batch {
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Sum of the byte sizes of the messages.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<String> {
        self.messages
    }

    fn push(&mut self, message: String) {
        self.size += message.len();
        self.messages.push(message);
    }
}

/// Accumulates messages until the next one would push the total past `limit` bytes.
///
/// A message that alone exceeds the limit is still accepted; it becomes the only message of its
/// batch.
#[derive(Debug)]
pub struct BatchBuffer {
    batch: Batch,
    limit: usize,
}

impl BatchBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            batch: Batch::default(),
            limit,
        }
    }

    /// Appends `message`, first draining the current batch if the message would not fit.
    ///
    /// Returns the drained batch, which the caller must flush before anything else is drained.
    pub fn append(&mut self, message: String) -> Option<Batch> {
        let drained = if self.batch.size + message.len() > self.limit && !self.batch.is_empty() {
            Some(self.take())
        } else {
            None
        };
        self.batch.push(message);
        drained
    }

    /// Drains the buffer, resetting the size accounting.
    pub fn take(&mut self) -> Batch {
        std::mem::take(&mut self.batch)
    }

    pub fn current_size(&self) -> usize {
        self.batch.size
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}
