// ABOUTME: MySQL connection management with retry
// ABOUTME: Opens the single long-lived connection used for each side of a run

use anyhow::{Context, Result};
use mysql_async::{Conn, Opts};
use std::time::Duration;

use crate::utils::{redact, retry_with_backoff};

/// Open a connection to the database named by `url`.
pub async fn connect(url: &str) -> Result<Conn> {
    let opts = Opts::from_url(url)
        .with_context(|| format!("Invalid MySQL connection string: {}", redact(url)))?;

    let conn = Conn::new(opts)
        .await
        .with_context(|| format!("Failed to connect to {}", redact(url)))?;

    tracing::debug!("Connected to {}", redact(url));
    Ok(conn)
}

/// Open a connection, retrying transient failures with exponential backoff.
pub async fn connect_with_retry(url: &str, max_retries: u32) -> Result<Conn> {
    retry_with_backoff(|| connect(url), max_retries, Duration::from_secs(1)).await
}
