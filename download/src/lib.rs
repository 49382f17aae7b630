/*
 * Copyright 2024 Oxide Computer Company
 */

/*
 * Fetch a job result from the object store.  A result is not always
 * available the moment the service reports the job as finished, so failed
 * attempts are retried with a linearly increasing wait.
 */

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use helio_common::CancelCheck;
use reqwest::StatusCode;
use serde::Deserialize;
use slog::{debug, o, Logger};

mod stopwatch;

use stopwatch::Stopwatch;

/**
 * Performs one attempt at fetching a URL.  Anything other than a complete
 * 200 response is a failure, described as "status: N, error: <body>".
 */
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, String>;
}

#[async_trait]
impl ArtifactFetcher for reqwest::Client {
    async fn fetch(&self, url: &str) -> std::result::Result<Bytes, String> {
        let res = match self.get(url).send().await {
            Ok(res) => res,
            Err(e) => return Err(format!("status: 0, error: {e}")),
        };

        let status = res.status();
        if status == StatusCode::OK {
            res.bytes()
                .await
                .map_err(|e| format!("status: 200, error: {e}"))
        } else {
            let body = res.text().await.unwrap_or_default();
            Err(format!("status: {}, error: {}", status.as_u16(), body.trim()))
        }
    }
}

/**
 * A client suitable for fetching results: presigned URLs need no
 * credentials.
 */
pub fn http_fetcher() -> Result<reqwest::Client> {
    Ok(reqwest::ClientBuilder::new()
        .connect_timeout(Duration::from_secs(20))
        .timeout(Duration::from_secs(100))
        .build()?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DownloadPolicy {
    pub max_attempts: u32,
    /**
     * After the Nth failed attempt, wait N times this long.
     */
    #[serde(with = "helio_common::seconds")]
    pub backoff_step: Duration,
    /**
     * Waits are served in increments of this size, checking for
     * cancellation in between.
     */
    #[serde(with = "helio_common::seconds")]
    pub tick: Duration,
}

impl Default for DownloadPolicy {
    fn default() -> Self {
        DownloadPolicy {
            max_attempts: 7,
            backoff_step: Duration::from_secs(5),
            tick: Duration::from_secs(1),
        }
    }
}

impl DownloadPolicy {
    /**
     * A zero tick would never wear down a wait, and zero attempts would
     * never fetch anything.
     */
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("download max_attempts must be at least 1");
        }
        if self.tick.is_zero() {
            bail!("download tick must be at least one second");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadProgress {
    Failed { attempts_left: u32 },
    Waiting { remaining: Duration },
}

impl std::fmt::Display for DownloadProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadProgress::Failed { attempts_left } => write!(
                f,
                "Could not download file. Attempts left {}",
                attempts_left
            ),
            DownloadProgress::Waiting { remaining } => {
                write!(f, "Next attempt in {} seconds", remaining.as_secs())
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Max attempts reached but file was not found\n{last}")]
    MaxAttempts { attempts: u32, last: String },
    #[error("download canceled")]
    Canceled,
    #[error("writing {path:?}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/**
 * Strip the query string, which for a presigned URL holds the signature, so
 * that the URL can be logged.
 */
fn loggable(url: &str) -> &str {
    url.split_once('?').map(|(u, _)| u).unwrap_or(url)
}

pub struct Downloader<'a> {
    log: Logger,
    fetcher: &'a dyn ArtifactFetcher,
    policy: DownloadPolicy,
}

impl<'a> Downloader<'a> {
    pub fn new(
        log: &Logger,
        fetcher: &'a dyn ArtifactFetcher,
        policy: DownloadPolicy,
    ) -> Downloader<'a> {
        Downloader {
            log: log.new(o!("component" => "download")),
            fetcher,
            policy,
        }
    }

    /**
     * Fetch the URL, retrying until it succeeds, the attempt limit is
     * reached, or we are canceled.  Cancellation is observed at least once
     * per tick while waiting between attempts.
     */
    pub async fn download<F>(
        &self,
        url: &str,
        cancel: &dyn CancelCheck,
        mut progress: F,
    ) -> std::result::Result<Bytes, DownloadError>
    where
        F: FnMut(DownloadProgress),
    {
        let p = &self.policy;
        let mut attempts = 0;
        let mut wait = Duration::ZERO;

        loop {
            if cancel.was_canceled() {
                return Err(DownloadError::Canceled);
            }

            if wait.is_zero() {
                let mut sw =
                    Stopwatch::start(loggable(url).to_string(), attempts + 1);
                match self.fetcher.fetch(url).await {
                    Ok(body) => {
                        sw.add_bytes(body.len());
                        sw.complete(&self.log);
                        return Ok(body);
                    }
                    Err(e) => {
                        sw.fail(&self.log, &e);
                        attempts += 1;
                        progress(DownloadProgress::Failed {
                            attempts_left: p
                                .max_attempts
                                .saturating_sub(attempts),
                        });
                        if attempts >= p.max_attempts {
                            return Err(DownloadError::MaxAttempts {
                                attempts,
                                last: e,
                            });
                        }
                        wait = p.backoff_step * attempts;
                    }
                }
            } else {
                progress(DownloadProgress::Waiting { remaining: wait });
            }

            tokio::time::sleep(p.tick).await;
            wait = wait.saturating_sub(p.tick);
        }
    }

    /**
     * Download the URL and write the contents to a local file, returning the
     * number of bytes written.
     */
    pub async fn download_to<F>(
        &self,
        url: &str,
        path: &Path,
        cancel: &dyn CancelCheck,
        progress: F,
    ) -> std::result::Result<u64, DownloadError>
    where
        F: FnMut(DownloadProgress),
    {
        let body = self.download(url, cancel, progress).await?;

        /*
         * A stop that arrived during the final fetch wins over the result.
         */
        if cancel.was_canceled() {
            return Err(DownloadError::Canceled);
        }

        tokio::fs::write(path, &body).await.map_err(|source| {
            DownloadError::Save { path: path.to_path_buf(), source }
        })?;
        debug!(self.log, "wrote {} bytes to {:?}", body.len(), path);

        Ok(body.len() as u64)
    }
}
