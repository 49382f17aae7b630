/*
 * Copyright 2024 Oxide Computer Company
 */

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use helio_download::DownloadPolicy;
use serde::Deserialize;

/**
 * Timing and retry limits for a run.  Every field has a default, so a policy
 * file need only mention what it changes; e.g.,
 *
 *     poll_interval = 5
 *
 *     [download]
 *     max_attempts = 10
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Policy {
    /**
     * Time between polls of a running job.
     */
    #[serde(with = "helio_common::seconds")]
    pub poll_interval: Duration,
    /**
     * Give up on a job after this many polls in a row fail to get an answer.
     */
    pub max_poll_failures: u32,
    pub download: DownloadPolicy,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            poll_interval: Duration::from_secs(3),
            max_poll_failures: 5,
            download: Default::default(),
        }
    }
}

impl Policy {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Policy> {
        let p: Policy = helio_common::read_toml(path)?;
        p.validate()?;
        Ok(p)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            bail!("poll_interval must be at least one second");
        }
        if self.max_poll_failures == 0 {
            bail!("max_poll_failures must be at least 1");
        }
        self.download.validate()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let p: Policy = toml::from_str("").unwrap();
        assert_eq!(p, Policy::default());
        assert_eq!(p.poll_interval, Duration::from_secs(3));
        assert_eq!(p.max_poll_failures, 5);
        assert_eq!(p.download.max_attempts, 7);
    }

    #[test]
    fn partial_file() -> Result<()> {
        let mut f = tempfile::NamedTempFile::new()?;
        writeln!(f, "poll_interval = 5\n\n[download]\nmax_attempts = 10")?;

        let p = Policy::load(f.path())?;
        assert_eq!(p.poll_interval, Duration::from_secs(5));
        assert_eq!(p.max_poll_failures, 5);
        assert_eq!(p.download.max_attempts, 10);
        assert_eq!(p.download.backoff_step, Duration::from_secs(5));
        Ok(())
    }

    #[test]
    fn refuses_degenerate_files() -> Result<()> {
        for body in [
            "[download]\ntick = 0",
            "[download]\nmax_attempts = 0",
            "poll_interval = 0",
            "max_poll_failures = 0",
        ] {
            let mut f = tempfile::NamedTempFile::new()?;
            writeln!(f, "{body}")?;
            assert!(Policy::load(f.path()).is_err(), "accepted {body:?}");
        }
        Ok(())
    }
}
