// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::path::PathBuf;

use crate::errors;
use crate::rotator::Endpoint;
use crate::serializer::{DEFAULT_IGNORED_SOURCES, MARKER_OVERHEAD};

/// Default byte limit for one document, one batch and one datagram.
pub const DEFAULT_LIMIT: usize = 9000;

pub const DEFAULT_NAME: &str = "logs";

/// Configuration for a shipping [`Handler`](crate::handler::Handler)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerConfig {
    /// Document kind, and prefix of the index and backup file names
    pub name: String,
    /// Byte limit applied to documents, batches and datagrams
    pub limit: usize,
    /// Whether flushed batches are also appended to a local file
    pub backup_enabled: bool,
    /// Directory backup files are written to
    pub backup_directory: PathBuf,
    /// Collectors, used round-robin one flush at a time
    pub endpoints: Vec<Endpoint>,
    /// Source names whose events are never shipped
    pub ignored_sources: Vec<String>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            limit: DEFAULT_LIMIT,
            backup_enabled: false,
            backup_directory: PathBuf::from("."),
            endpoints: Vec::new(),
            ignored_sources: DEFAULT_IGNORED_SOURCES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl HandlerConfig {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints,
            ..Default::default()
        }
    }

    /// Create configuration from `LOGSHIP_*` environment variables
    pub fn from_env() -> Result<Self, errors::Creation> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from any key lookup, using the same keys as [`Self::from_env`]
    pub fn from_lookup<F>(lookup: F) -> Result<Self, errors::Creation>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let name = lookup("LOGSHIP_NAME").unwrap_or(defaults.name);
        let limit = match lookup("LOGSHIP_LIMIT") {
            Some(val) => val.trim().parse::<usize>().map_err(|_| {
                errors::Creation::InvalidConfig(format!("LOGSHIP_LIMIT '{val}' is not a number"))
            })?,
            None => defaults.limit,
        };
        let backup_enabled = lookup("LOGSHIP_BACKUP")
            .map(|val| matches!(val.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(defaults.backup_enabled);
        let backup_directory = lookup("LOGSHIP_BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.backup_directory);
        let endpoints = lookup("LOGSHIP_ENDPOINTS")
            .map(|val| parse_endpoints(&val))
            .transpose()?
            .unwrap_or_default();
        let ignored_sources = lookup("LOGSHIP_IGNORED_SOURCES")
            .map(|val| split_list(&val).map(str::to_string).collect())
            .unwrap_or(defaults.ignored_sources);

        let config = Self {
            name,
            limit,
            backup_enabled,
            backup_directory,
            endpoints,
            ignored_sources,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), errors::Creation> {
        if self.endpoints.is_empty() {
            return Err(errors::Creation::InvalidConfig(
                "at least one endpoint is required".to_string(),
            ));
        }

        if self.name.trim().is_empty() {
            return Err(errors::Creation::InvalidConfig(
                "name cannot be empty".to_string(),
            ));
        }

        // Truncation needs room for its marker.
        if self.limit <= MARKER_OVERHEAD {
            return Err(errors::Creation::InvalidConfig(format!(
                "limit must be greater than {MARKER_OVERHEAD} bytes, got {}",
                self.limit
            )));
        }

        Ok(())
    }
}

fn split_list(val: &str) -> impl Iterator<Item = &str> {
    val.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Parses a comma separated `host:port` list.
pub fn parse_endpoints(val: &str) -> Result<Vec<Endpoint>, errors::Creation> {
    split_list(val)
        .map(|s| {
            s.parse::<Endpoint>()
                .map_err(|e| errors::Creation::InvalidConfig(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config_needs_endpoints() {
        assert!(HandlerConfig::default().validate().is_err());
        assert!(HandlerConfig::new(vec![Endpoint::new("localhost", 9700)])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = HandlerConfig::default();
        assert_eq!(config.name, "logs");
        assert_eq!(config.limit, 9000);
        assert!(!config.backup_enabled);
        assert_eq!(config.backup_directory, PathBuf::from("."));
        assert_eq!(config.ignored_sources, ["logship", "mio"]);
    }

    #[test]
    fn test_validate_empty_name() {
        let config = HandlerConfig {
            name: "  ".to_string(),
            ..HandlerConfig::new(vec![Endpoint::new("localhost", 9700)])
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_limit_must_exceed_marker() {
        let config = HandlerConfig {
            limit: MARKER_OVERHEAD,
            ..HandlerConfig::new(vec![Endpoint::new("localhost", 9700)])
        };
        assert!(config.validate().is_err());

        let config = HandlerConfig {
            limit: MARKER_OVERHEAD + 1,
            ..HandlerConfig::new(vec![Endpoint::new("localhost", 9700)])
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let config = HandlerConfig::from_lookup(lookup(&[
            ("LOGSHIP_NAME", "app"),
            ("LOGSHIP_LIMIT", "1200"),
            ("LOGSHIP_BACKUP", "TRUE"),
            ("LOGSHIP_BACKUP_DIR", "/tmp/backup"),
            ("LOGSHIP_ENDPOINTS", "localhost:9700, 10.0.0.2:9701"),
            ("LOGSHIP_IGNORED_SOURCES", "logship,hyper,"),
        ]))
        .unwrap();

        assert_eq!(config.name, "app");
        assert_eq!(config.limit, 1200);
        assert!(config.backup_enabled);
        assert_eq!(config.backup_directory, PathBuf::from("/tmp/backup"));
        assert_eq!(
            config.endpoints,
            [
                Endpoint::new("localhost", 9700),
                Endpoint::new("10.0.0.2", 9701)
            ]
        );
        assert_eq!(config.ignored_sources, ["logship", "hyper"]);
    }

    #[test]
    fn test_from_lookup_requires_endpoints() {
        assert!(HandlerConfig::from_lookup(lookup(&[])).is_err());
        assert!(HandlerConfig::from_lookup(lookup(&[("LOGSHIP_ENDPOINTS", " , ")])).is_err());
    }

    #[test]
    fn test_from_lookup_rejects_bad_values() {
        let err = HandlerConfig::from_lookup(lookup(&[
            ("LOGSHIP_ENDPOINTS", "localhost:9700"),
            ("LOGSHIP_LIMIT", "lots"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("LOGSHIP_LIMIT"));

        let err =
            HandlerConfig::from_lookup(lookup(&[("LOGSHIP_ENDPOINTS", "localhost")])).unwrap_err();
        assert!(matches!(err, errors::Creation::InvalidConfig(_)));
    }

    #[test]
    fn test_backup_flag_values() {
        for (val, expected) in [("1", true), ("yes", true), ("false", false), ("0", false)] {
            let config = HandlerConfig::from_lookup(lookup(&[
                ("LOGSHIP_ENDPOINTS", "localhost:9700"),
                ("LOGSHIP_BACKUP", val),
            ]))
            .unwrap();
            assert_eq!(config.backup_enabled, expected, "LOGSHIP_BACKUP={val}");
        }
    }
}
