// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The shipping pipeline: serialize, buffer by byte size, and flush to a rotating set of
//! collectors with an optional local backup.
//!
//! Size accounting and draining happen under the buffer lock. Shipping state (endpoint rotation,
//! socket, backup file) lives under a second lock, which a flushing caller acquires before it
//! releases the buffer lock. Batches therefore reach the network in the order they were drained,
//! while callers that only append never wait on network I/O.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::backup::BackupSink;
use crate::buffer::{Batch, BatchBuffer};
use crate::config::HandlerConfig;
use crate::errors;
use crate::event::LogEvent;
use crate::logger::Sink;
use crate::packer::{DatagramPacker, Transport, UdpTransport};
use crate::rotator::{Endpoint, EndpointRotator};
use crate::serializer::{index_name, RecordSerializer};

struct Shipper<T> {
    packer: DatagramPacker<T>,
    backup: BackupSink,
}

impl<T: Transport> Shipper<T> {
    /// Sends then backs up `batch`. Both steps run even when the first fails.
    fn ship(&mut self, batch: Batch) -> Result<(), errors::Flush> {
        if batch.is_empty() {
            return Ok(());
        }
        debug!(
            "Flushing {} messages ({} bytes) to {}",
            batch.len(),
            batch.size(),
            self.packer.current_endpoint()
        );

        let sent = self.packer.send(batch.messages());
        let backed_up = self.backup.backup(batch.messages());
        match (sent, backed_up) {
            (Err(e), Err(backup_err)) => {
                error!("{backup_err}");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), result) => result,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializes events and ships them in size-bounded batches.
///
/// Safe to share between threads; every method takes `&self`.
pub struct Handler<T: Transport = UdpTransport> {
    serializer: RecordSerializer,
    buffer: Mutex<BatchBuffer>,
    shipper: Mutex<Shipper<T>>,
}

impl Handler<UdpTransport> {
    /// Binds a UDP socket on an ephemeral port. `config` is validated before the socket is bound.
    pub fn new(config: HandlerConfig) -> Result<Self, errors::Creation> {
        config.validate()?;
        let transport = UdpTransport::bind()?;
        Self::assemble(config, transport)
    }
}

impl<T: Transport> Handler<T> {
    pub fn with_transport(config: HandlerConfig, transport: T) -> Result<Self, errors::Creation> {
        config.validate()?;
        Self::assemble(config, transport)
    }

    /// Builds the pipeline from an already validated `config`.
    fn assemble(config: HandlerConfig, transport: T) -> Result<Self, errors::Creation> {
        let HandlerConfig {
            name,
            limit,
            backup_enabled,
            backup_directory,
            endpoints,
            ignored_sources,
        } = config;

        let rotator = EndpointRotator::new(endpoints)?;
        let shipper = Shipper {
            packer: DatagramPacker::new(transport, rotator, limit),
            backup: BackupSink::new(name.clone(), backup_directory, backup_enabled),
        };

        Ok(Self {
            serializer: RecordSerializer::new(name, limit, ignored_sources),
            buffer: Mutex::new(BatchBuffer::new(limit)),
            shipper: Mutex::new(shipper),
        })
    }

    /// Serializes `event` and buffers it, flushing the buffered batch first if it would not fit.
    ///
    /// Events from ignored sources are dropped here. An error means the flush this append
    /// triggered failed; the event itself is buffered either way.
    pub fn emit(&self, event: &LogEvent) -> Result<(), errors::Flush> {
        let message = self.serializer.format(event);
        if message.is_empty() {
            return Ok(());
        }

        let mut buffer = lock(&self.buffer);
        match buffer.append(message) {
            None => Ok(()),
            Some(batch) => {
                let mut shipper = lock(&self.shipper);
                drop(buffer);
                shipper.ship(batch)
            }
        }
    }

    /// Ships whatever is buffered. A no-op when the buffer is empty.
    pub fn flush(&self) -> Result<(), errors::Flush> {
        let mut buffer = lock(&self.buffer);
        let batch = buffer.take();
        if batch.is_empty() {
            return Ok(());
        }
        let mut shipper = lock(&self.shipper);
        drop(buffer);
        shipper.ship(batch)
    }

    /// Flushes remaining events. The handler stays usable afterwards.
    pub fn close(&self) -> Result<(), errors::Flush> {
        self.flush()
    }

    pub fn enable_backup(&self) {
        lock(&self.shipper).backup.enable();
    }

    pub fn disable_backup(&self) {
        lock(&self.shipper).backup.disable();
    }

    pub fn set_backup_path(&self, directory: impl Into<PathBuf>) {
        lock(&self.shipper).backup.set_directory(directory);
    }

    pub fn backup_enabled(&self) -> bool {
        lock(&self.shipper).backup.is_enabled()
    }

    /// Today's index name, `{name}-{YYYY-MM-DD}`.
    pub fn index_name(&self) -> String {
        index_name(self.serializer.doc_type(), Utc::now().date_naive())
    }

    /// Messages dropped so far because they did not fit in a single datagram.
    pub fn dropped_oversize(&self) -> u64 {
        lock(&self.shipper).packer.dropped_oversize()
    }

    /// The endpoint the next flush goes to.
    pub fn current_endpoint(&self) -> Endpoint {
        lock(&self.shipper).packer.current_endpoint().clone()
    }

    /// Bytes currently buffered.
    pub fn buffered_size(&self) -> usize {
        lock(&self.buffer).current_size()
    }

    pub fn buffered_len(&self) -> usize {
        lock(&self.buffer).len()
    }

    pub fn serializer(&self) -> &RecordSerializer {
        &self.serializer
    }
}

impl<T: Transport> Sink for Handler<T> {
    fn emit(&self, event: &LogEvent) -> Result<(), errors::Flush> {
        Handler::emit(self, event)
    }
}

impl<T: Transport> Drop for Handler<T> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Failed to flush buffered events on drop: {e}");
        }
    }
}
