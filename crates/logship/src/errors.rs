// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for building and running the shipping pipeline.

use std::io;

/// Errors raised while constructing a handler. Configuration problems fail fast here.
#[derive(Debug, thiserror::Error)]
pub enum Creation {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to bind UDP socket: {0}")]
    Bind(#[source] io::Error),
}

/// Errors surfaced from the flush path (and therefore from `emit` when an append triggers a flush).
#[derive(Debug, thiserror::Error)]
pub enum Flush {
    #[error("Failed to send datagram to {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to append batch to backup file {path}: {source}")]
    Backup {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Reasons a document could not be rendered. Recovered locally with a fallback document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Serialize {
    #[error("cannot serialize: {0}")]
    Unserializable(String),

    #[error("cannot decode as utf8: {0}")]
    Decode(String),
}

/// A logger operation needs a capability the logger was built without.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Logger '{logger}' was built without {capability} support")]
pub struct Capability {
    pub logger: String,
    pub capability: &'static str,
}
