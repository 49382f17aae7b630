/*
 * Copyright 2024 Oxide Computer Company
 */

use std::io::{IsTerminal, Read};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::prelude::*;
use serde::Deserialize;
use slog::{o, Drain, Logger};

pub fn read_toml<P: AsRef<Path>, T>(n: P) -> Result<T>
where
    for<'de> T: Deserialize<'de>,
{
    let n = n.as_ref();
    let mut f = std::fs::File::open(n)
        .with_context(|| format!("opening {:?}", n))?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    Ok(toml::from_str(&buf).with_context(|| format!("parsing {:?}", n))?)
}

pub fn make_log(name: &'static str) -> Logger {
    let filter_level = match std::env::var("HELIO_DEBUG")
        .map(|v| v.to_ascii_lowercase())
        .as_deref()
    {
        Ok("yes") | Ok("1") | Ok("true") => slog::Level::Debug,
        _ => slog::Level::Info,
    };

    if std::io::stdout().is_terminal() {
        /*
         * Use a terminal-formatted logger for interactive processes.
         */
        let dec = slog_term::TermDecorator::new().stdout().build();
        let dr = Mutex::new(
            slog_term::FullFormat::new(dec).use_original_order().build(),
        )
        .filter_level(filter_level)
        .fuse();
        Logger::root(dr, o!("name" => name))
    } else {
        /*
         * Otherwise, emit bunyan-formatted records:
         */
        let dr = Mutex::new(
            slog_bunyan::with_name(name, std::io::stdout())
                .set_flush(true)
                .build(),
        )
        .filter_level(filter_level)
        .fuse();
        Logger::root(dr, o!())
    }
}

/**
 * A logger that discards everything, for tests and for callers that do not
 * care.
 */
pub fn discard_log() -> Logger {
    Logger::root(slog::Discard, o!())
}

/**
 * Long-running remote operations check this between blocking steps to learn
 * whether the user has asked for the work to stop.  Implementations must be
 * cheap and callable from any thread.
 */
pub trait CancelCheck: Send + Sync {
    fn was_canceled(&self) -> bool;
}

/**
 * A probe that is never canceled.
 */
pub struct NeverCancel;

impl CancelCheck for NeverCancel {
    fn was_canceled(&self) -> bool {
        false
    }
}

/**
 * Render a list of server-provided messages as a single string.  A lone entry
 * is returned as-is; multiple entries become a numbered list, one per line.
 */
pub fn numbered_list<S: AsRef<str>>(items: &[S]) -> String {
    if items.len() == 1 {
        return items[0].as_ref().to_string();
    }

    items
        .iter()
        .enumerate()
        .map(|(i, m)| format!("{}. {}", i + 1, m.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

/**
 * Produce a name for a remote object that records who made it and when; e.g.,
 * "HelioDragon 2025-03-12T14:23:45".
 */
pub fn timestamped_name(prefix: &str, when: DateTime<Utc>) -> String {
    format!("{} {}", prefix, when.format("%Y-%m-%dT%H:%M:%S"))
}

pub trait DurationExt {
    fn render(&self) -> String;
}

impl DurationExt for std::time::Duration {
    fn render(&self) -> String {
        let mut out = String::new();
        let mut secs = self.as_secs();
        let hours = secs / 3600;
        if hours > 0 {
            secs -= hours * 3600;
            out += &format!(" {} h", hours);
        }
        let minutes = secs / 60;
        if minutes > 0 || hours > 0 {
            secs -= minutes * 60;
            out += &format!(" {} m", minutes);
        }
        out += &format!(" {} s", secs);

        out.trim().to_string()
    }
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/**
 * Durations in configuration files are written as a whole number of seconds.
 * Use with `#[serde(with = "helio_common::seconds")]`.
 */
pub mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D>(d: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
