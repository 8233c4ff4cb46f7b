// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ships log records to bulk-indexing collectors over UDP.
//!
//! Each record is rendered as a two-line bulk document (an index line and a JSON body), kept
//! under a byte limit by truncating its message. Documents are buffered by byte size and flushed
//! as greedily packed datagrams to one collector per flush, rotating through the configured
//! endpoints. Flushed batches can also be appended to a local per-day backup file.
//!
//! Records enter through [`handler::Handler::emit`], a [`logger::Logger`], or the
//! [`layer::ShippingLayer`] for `tracing`.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod backup;
pub mod buffer;
pub mod config;
pub mod errors;
pub mod event;
pub mod format;
pub mod handler;
pub mod layer;
pub mod logger;
pub mod packer;
pub mod rotator;
pub mod serializer;

pub use config::HandlerConfig;
pub use event::{Args, Attr, ExceptionInfo, Level, LogEvent};
pub use handler::Handler;
pub use layer::ShippingLayer;
pub use logger::{Logger, LoggerBuilder, Sink};
pub use rotator::Endpoint;
