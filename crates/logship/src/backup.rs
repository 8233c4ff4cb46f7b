// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Append-only, per-day backup files for flushed batches.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use tracing::debug;

use crate::errors;
use crate::serializer::index_name;

/// Persists flushed batches to `{directory}/{collection}-{YYYY-MM-DD}` when enabled.
#[derive(Debug, Clone)]
pub struct BackupSink {
    enabled: bool,
    directory: PathBuf,
    collection: String,
}

impl BackupSink {
    pub fn new(collection: impl Into<String>, directory: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            enabled,
            directory: directory.into(),
            collection: collection.into(),
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_directory(&mut self, directory: impl Into<PathBuf>) {
        self.directory = directory.into();
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The file a batch flushed on `date` is appended to.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.directory.join(index_name(&self.collection, date))
    }

    /// Appends `messages` to today's file. Does nothing when disabled or given nothing to write.
    pub fn backup<S>(&self, messages: &[S]) -> Result<(), errors::Flush>
    where
        S: AsRef<str>,
    {
        self.backup_on(messages, Utc::now().date_naive())
    }

    pub fn backup_on<S>(&self, messages: &[S], date: NaiveDate) -> Result<(), errors::Flush>
    where
        S: AsRef<str>,
    {
        if !self.enabled || messages.is_empty() {
            return Ok(());
        }

        let path = self.path_for(date);
        let data = messages
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<&str>>()
            .join("\n");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| backup_error(&path, source))?;
        file.write_all(data.as_bytes())
            .map_err(|source| backup_error(&path, source))?;

        debug!(
            "Backed up {} messages to {}",
            messages.len(),
            path.display()
        );
        Ok(())
    }

    /// Reads back what has been written for `date`, if anything.
    pub fn read(&self, date: NaiveDate) -> Result<Option<String>, errors::Flush> {
        let path = self.path_for(date);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(backup_error(&path, source)),
        }
    }
}

fn backup_error(path: &Path, source: std::io::Error) -> errors::Flush {
    errors::Flush::Backup {
        path: path.display().to_string(),
        source,
    }
}
