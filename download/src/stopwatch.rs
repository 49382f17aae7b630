/*
 * Copyright 2024 Oxide Computer Company
 */

use std::time::Duration;

use helio_common::DurationExt;
use slog::{info, warn, Logger};
use tokio::time::Instant;

pub struct Stopwatch {
    start: Instant,
    info: String,
    attempt: u32,
    bytes_transferred: u64,
}

impl Stopwatch {
    pub fn start(info: String, attempt: u32) -> Stopwatch {
        Stopwatch { start: Instant::now(), info, attempt, bytes_transferred: 0 }
    }

    pub fn add_bytes(&mut self, bytes: usize) {
        self.bytes_transferred = self
            .bytes_transferred
            .saturating_add(u64::try_from(bytes).unwrap_or(u64::MAX));
    }

    fn complete_common(&self) -> (Duration, f64) {
        let dur = Instant::now().saturating_duration_since(self.start);
        let secs = dur.as_secs_f64();
        let rate_mb = if secs > 0.0 {
            (self.bytes_transferred as f64 / secs) / (1024.0 * 1024.0)
        } else {
            0.0
        };

        (dur, rate_mb)
    }

    pub fn complete(self, log: &Logger) {
        let (dur, rate_mb) = self.complete_common();

        info!(log, "download complete in {}: {}", dur.render(), self.info;
            "attempt" => self.attempt,
            "bytes_transferred" => self.bytes_transferred,
            "rate_mb" => rate_mb,
            "msec" => dur.as_millis(),
        );
    }

    pub fn fail(self, log: &Logger, how: &str) {
        let (dur, _) = self.complete_common();

        warn!(log, "download failed: {}: {}", self.info, how;
            "attempt" => self.attempt,
            "msec" => dur.as_millis(),
        );
    }
}
