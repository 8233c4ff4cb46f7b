// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod lines;

use std::{env, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::{interval, Duration},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logship::{Handler, HandlerConfig};

const DEFAULT_FLUSH_INTERVAL: u64 = 10;
const DEFAULT_SOURCE: &str = "stdin";

#[tokio::main]
pub async fn main() {
    let log_level = env::var("LOGSHIP_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    let flush_interval_secs = env::var("LOGSHIP_FLUSH_INTERVAL")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_FLUSH_INTERVAL);
    let source = env::var("LOGSHIP_SOURCE").unwrap_or_else(|_| DEFAULT_SOURCE.to_string());

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(log_level).expect("could not parse log level in configuration"),
        )
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match HandlerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error creating config on forwarder startup: {e}");
            return;
        }
    };
    let endpoints = config
        .endpoints
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");

    let handler = match Handler::new(config) {
        Ok(handler) => Arc::new(handler),
        Err(e) => {
            error!("Error creating handler on forwarder startup: {e}");
            return;
        }
    };
    info!("Shipping lines from {source} to {endpoints}, index {}", handler.index_name());

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {e}");
            return;
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    forward(&handler, &source, flush_interval_secs, cancel_token).await;

    if let Err(e) = handler.close() {
        error!("Final flush failed: {e}");
    }
    info!(
        "Forwarder stopped, {} messages dropped for size",
        handler.dropped_oversize()
    );
}

/// Ships stdin lines until end of input or cancellation, flushing on a fixed interval.
async fn forward(
    handler: &Handler,
    source: &str,
    flush_interval_secs: u64,
    cancel_token: CancellationToken,
) {
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut flush_interval = interval(Duration::from_secs(flush_interval_secs));
    flush_interval.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = flush_interval.tick() => {
                debug!("Flushing buffered lines");
                if let Err(e) = handler.flush() {
                    error!("Periodic flush failed: {e}");
                }
            }
            line = input.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Err(e) = handler.emit(&lines::parse_line(source, &line)) {
                        error!("Flush triggered by incoming line failed: {e}");
                    }
                }
                Ok(None) => {
                    debug!("End of input");
                    break;
                }
                Err(e) => {
                    error!("Unable to read input: {e}");
                    break;
                }
            },
        }
    }
}
