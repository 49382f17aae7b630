/*
 * Copyright 2024 Oxide Computer Company
 */

use std::sync::Mutex;

use anyhow::{bail, Result};
use helio_common::CancelCheck;
use serde::Serialize;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrchestratorState {
    /**
     * Constructed or reset; no run launched.
     */
    Initial,
    /**
     * A worker exists and is waiting for the upstream prerequisite.
     */
    Started,
    Running,
    Finished,
    /**
     * Stopped by the user, or abandoned because of a failure.
     */
    Canceled,
}

impl OrchestratorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorState::Finished | OrchestratorState::Canceled
        )
    }
}

struct Inner {
    state: OrchestratorState,
    /**
     * Whether a worker has been launched since the last reset.
     */
    launched: bool,
}

/**
 * The lifecycle state shared between the owner and the worker.  Both terminal
 * states absorb every transition other than a reset.
 */
pub struct StateCell {
    inner: Mutex<Inner>,
    wake: Notify,
}

impl Default for StateCell {
    fn default() -> Self {
        StateCell {
            inner: Mutex::new(Inner {
                state: OrchestratorState::Initial,
                launched: false,
            }),
            wake: Notify::new(),
        }
    }
}

impl StateCell {
    pub fn get(&self) -> OrchestratorState {
        self.inner.lock().unwrap().state
    }

    /**
     * Mark a worker as launched.  A stop that arrived before launch is
     * honoured: the state stays canceled and the worker will exit without
     * doing anything.
     */
    pub(crate) fn launch(&self) -> Result<()> {
        let mut i = self.inner.lock().unwrap();
        if i.launched {
            bail!("a run was already launched (state {}); reset first",
                i.state);
        }

        match i.state {
            OrchestratorState::Initial => {
                i.state = OrchestratorState::Started;
            }
            OrchestratorState::Canceled => (),
            other => bail!("cannot launch in state {other}"),
        }
        i.launched = true;
        Ok(())
    }

    /**
     * Move from Started to Running; false if the run was canceled first.
     */
    pub(crate) fn begin(&self) -> bool {
        let mut i = self.inner.lock().unwrap();
        if i.state == OrchestratorState::Started {
            i.state = OrchestratorState::Running;
            true
        } else {
            false
        }
    }

    /**
     * Record success; false if a stop won the race.
     */
    pub(crate) fn finish(&self) -> bool {
        let mut i = self.inner.lock().unwrap();
        if i.state == OrchestratorState::Running {
            i.state = OrchestratorState::Finished;
            true
        } else {
            false
        }
    }

    /**
     * Enter Canceled unless the run has already finished.  Returns true if
     * this call changed the state.
     */
    pub(crate) fn cancel(&self) -> bool {
        let changed = {
            let mut i = self.inner.lock().unwrap();
            if i.state.is_terminal() {
                false
            } else {
                i.state = OrchestratorState::Canceled;
                true
            }
        };

        /*
         * No permit is stored: a waiter decides from the state itself, so
         * nothing from this run can wake a waiter in the next one.
         */
        self.wake.notify_waiters();
        changed
    }

    pub(crate) fn reset(&self) -> Result<()> {
        let mut i = self.inner.lock().unwrap();
        match i.state {
            OrchestratorState::Started | OrchestratorState::Running => {
                bail!("cannot reset while a run is active (state {})", i.state);
            }
            _ => {
                i.state = OrchestratorState::Initial;
                i.launched = false;
                Ok(())
            }
        }
    }

    /**
     * Resolve once the run has been stopped.
     */
    pub(crate) async fn stopped(&self) {
        loop {
            /*
             * Registered before the check, so a stop between the two is
             * not missed.
             */
            let n = self.wake.notified();
            if self.was_canceled() {
                return;
            }
            n.await;
        }
    }
}

impl CancelCheck for StateCell {
    fn was_canceled(&self) -> bool {
        self.get() == OrchestratorState::Canceled
    }
}
