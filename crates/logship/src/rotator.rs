// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collector endpoints and round-robin selection between them.

use std::fmt;
use std::str::FromStr;

use crate::errors;

/// A collector address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseEndpointError {
    #[error("endpoint '{0}' must be in host:port form")]
    MissingPort(String),

    #[error("endpoint '{0}' has an empty host")]
    EmptyHost(String),

    #[error("endpoint '{0}' has an invalid port")]
    InvalidPort(String),
}

impl FromStr for Endpoint {
    type Err = ParseEndpointError;

    /// Parses `host:port`; IPv6 hosts are written in brackets (`[::1]:9700`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| ParseEndpointError::MissingPort(s.to_string()))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(ParseEndpointError::EmptyHost(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| ParseEndpointError::InvalidPort(s.to_string()))?;
        Ok(Endpoint::new(host, port))
    }
}

/// Cycles through a fixed, non-empty list of endpoints, one step per flush.
#[derive(Debug, Clone)]
pub struct EndpointRotator {
    endpoints: Vec<Endpoint>,
    current: usize,
}

impl EndpointRotator {
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, errors::Creation> {
        if endpoints.is_empty() {
            return Err(errors::Creation::InvalidConfig(
                "at least one endpoint is required".to_string(),
            ));
        }
        Ok(Self {
            endpoints,
            current: 0,
        })
    }

    /// The endpoint the next flush goes to.
    pub fn current(&self) -> &Endpoint {
        &self.endpoints[self.current]
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.endpoints.len();
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }
}
