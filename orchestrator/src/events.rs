/*
 * Copyright 2024 Oxide Computer Company
 */

use std::path::PathBuf;

use helio_types::{JobKind, JobMetrics};
use slog::{warn, Logger};
use tokio::sync::mpsc;

/**
 * The terminal outcome of a run.  Exactly one is sent for a run that was not
 * stopped by the user.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub success: bool,
    /**
     * Where the downloaded result was written; only set on success.
     */
    pub result_path: Option<PathBuf>,
    /**
     * The G-code the job was run against.
     */
    pub original_path: PathBuf,
    /**
     * Non-empty on failure, and names the phase that failed.
     */
    pub error_message: String,
    pub kind: JobKind,
    pub metrics: Option<JobMetrics>,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /**
     * The upstream prerequisite was met and the run is under way.
     */
    Started,
    /**
     * Informational only; a percentage of 100 does not mean the run is over.
     */
    Progress { percent: f32, message: String },
    Completed(Completion),
}

/**
 * The worker's half of the event channel.  Progress is best effort and never
 * makes the worker wait: if the owner is not keeping up, progress events are
 * dropped.  Other events wait for room in the channel.
 */
pub(crate) struct EventSink {
    log: Logger,
    tx: mpsc::Sender<Event>,
    high_water: f32,
}

impl EventSink {
    pub fn new(log: &Logger, tx: mpsc::Sender<Event>) -> EventSink {
        EventSink { log: log.clone(), tx, high_water: 0.0 }
    }

    /**
     * Report progress.  The percentage reported never goes backwards within a
     * run.
     */
    pub fn progress<S: Into<String>>(&mut self, percent: f32, message: S) {
        let percent = percent.clamp(0.0, 100.0).max(self.high_water);
        self.high_water = percent;

        let message = message.into();
        match self.tx.try_send(Event::Progress { percent, message }) {
            Ok(()) => (),
            Err(mpsc::error::TrySendError::Full(ev)) => {
                warn!(self.log, "event channel full; dropping {:?}", ev);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => (),
        }
    }

    pub async fn started(&self) {
        self.send(Event::Started).await;
    }

    pub async fn completed(&self, c: Completion) {
        self.send(Event::Completed(c)).await;
    }

    async fn send(&self, ev: Event) {
        if self.tx.send(ev).await.is_err() {
            warn!(self.log, "event receiver has gone away");
        }
    }
}
