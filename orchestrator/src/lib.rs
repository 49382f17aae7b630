/*
 * Copyright 2024 Oxide Computer Company
 */

/*
 * Drives one remote simulation or optimization from start to finish: upload
 * the G-code, create the job, wait for it to complete, fetch the result and
 * hand it to the owner.  The work happens on a tokio task; the owner hears
 * about it only through the event channel, and may stop it at any time.
 */

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use helio_client::{Catalog, JobApi};
use helio_download::ArtifactFetcher;
use helio_types::{JobHandle, JobInput, JobKind, JobResult};
use slog::{info, o, warn, Logger};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

mod error;
mod events;
pub mod paths;
mod policy;
mod prerequisite;
mod state;
mod worker;

pub use error::Failure;
pub use events::{Completion, Event};
pub use policy::Policy;
pub use prerequisite::{
    prerequisite, Prerequisite, PrerequisiteSender, Upstream,
};
pub use state::OrchestratorState;

use events::EventSink;
use state::StateCell;

/**
 * Turns a downloaded result into whatever the owner needs; e.g., parsing the
 * G-code for preview.  Called on the worker once the result is on disk.
 */
#[async_trait]
pub trait ResultLoader: Send + Sync {
    async fn load(
        &self,
        kind: JobKind,
        result: &Path,
        original: &Path,
    ) -> Result<()>;
}

/**
 * A loader for owners that only want the file.
 */
pub struct LeaveOnDisk;

#[async_trait]
impl ResultLoader for LeaveOnDisk {
    async fn load(&self, _: JobKind, _: &Path, _: &Path) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub kind: JobKind,
    /**
     * The sliced G-code to submit.  The result is written next to it.
     */
    pub gcode: PathBuf,
    pub printer_id: String,
    pub material_id: String,
    pub input: JobInput,
}

pub(crate) struct Shared {
    state: StateCell,
    last: Mutex<Option<JobResult>>,
    handle: Mutex<Option<JobHandle>>,
    trace_id: Mutex<Option<String>>,
}

impl Shared {
    fn clear(&self) {
        *self.last.lock().unwrap() = None;
        *self.handle.lock().unwrap() = None;
        *self.trace_id.lock().unwrap() = None;
    }
}

pub(crate) struct Worker {
    log: Logger,
    api: Arc<dyn JobApi>,
    fetcher: Arc<dyn ArtifactFetcher>,
    loader: Arc<dyn ResultLoader>,
    catalog: Option<Arc<Catalog>>,
    policy: Policy,
    client_name: String,
    shared: Arc<Shared>,
}

pub struct OrchestratorBuilder {
    log: Logger,
    api: Arc<dyn JobApi>,
    fetcher: Arc<dyn ArtifactFetcher>,
    loader: Arc<dyn ResultLoader>,
    catalog: Option<Arc<Catalog>>,
    policy: Policy,
    client_name: String,
}

impl OrchestratorBuilder {
    pub fn new(
        log: Logger,
        api: Arc<dyn JobApi>,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            log,
            api,
            fetcher,
            loader: Arc::new(LeaveOnDisk),
            catalog: None,
            policy: Default::default(),
            client_name: "helio".to_string(),
        }
    }

    pub fn loader(mut self, loader: Arc<dyn ResultLoader>) -> Self {
        self.loader = loader;
        self
    }

    /**
     * With a catalog, optimization inputs are checked against the print
     * priorities the server offers before a job is created.
     */
    pub fn catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /**
     * Jobs are named for the client and the time they were created.
     */
    pub fn client_name<S: AsRef<str>>(mut self, name: S) -> Self {
        self.client_name = name.as_ref().to_string();
        self
    }

    pub fn build(self) -> Orchestrator {
        Orchestrator {
            log: self.log.new(o!("component" => "orchestrator")),
            api: self.api,
            fetcher: self.fetcher,
            loader: self.loader,
            catalog: self.catalog,
            policy: self.policy,
            client_name: self.client_name,
            shared: Arc::new(Shared {
                state: Default::default(),
                last: Default::default(),
                handle: Default::default(),
                trace_id: Default::default(),
            }),
        }
    }
}

pub struct Orchestrator {
    log: Logger,
    api: Arc<dyn JobApi>,
    fetcher: Arc<dyn ArtifactFetcher>,
    loader: Arc<dyn ResultLoader>,
    catalog: Option<Arc<Catalog>>,
    policy: Policy,
    client_name: String,
    shared: Arc<Shared>,
}

impl Orchestrator {
    /**
     * Start a run.  The worker waits for the prerequisite before doing
     * anything, then reports through the event channel.  Only one run may be
     * launched between resets.
     */
    pub fn launch(
        &self,
        job: Job,
        prereq: Prerequisite,
        events: mpsc::Sender<Event>,
    ) -> Result<JoinHandle<()>> {
        self.policy.validate()?;
        if job.kind == JobKind::Optimization {
            if let Some(oi) = &job.input.optimization {
                oi.validate()?;
            }
        }
        if job.gcode.file_name().is_none() {
            bail!("{:?} does not name a G-code file", job.gcode);
        }

        self.shared.state.launch()?;
        self.shared.clear();

        let w = Arc::new(Worker {
            log: self.log.clone(),
            api: Arc::clone(&self.api),
            fetcher: Arc::clone(&self.fetcher),
            loader: Arc::clone(&self.loader),
            catalog: self.catalog.clone(),
            policy: self.policy,
            client_name: self.client_name.clone(),
            shared: Arc::clone(&self.shared),
        });
        let es = EventSink::new(&self.log, events);

        Ok(tokio::task::spawn(w.run(job, prereq, es)))
    }

    /**
     * Ask the current run to stop.  This may be called at any time, and any
     * number of times; a run that has already finished is unaffected.  The
     * worker notices between steps, so a request already in flight is allowed
     * to complete.
     */
    pub fn stop(&self) {
        if self.shared.state.cancel() {
            info!(self.log, "stop requested");
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.shared.state.get()
    }

    /**
     * Return to Initial so that another run can be launched, forgetting the
     * previous result.
     */
    pub fn reset(&self) -> Result<()> {
        self.shared.state.reset()?;
        self.shared.clear();
        Ok(())
    }

    /**
     * The outcome of the most recent run, once it is known.
     */
    pub fn last_result(&self) -> Option<JobResult> {
        self.shared.last.lock().unwrap().clone()
    }

    pub fn last_trace_id(&self) -> Option<String> {
        self.shared.trace_id.lock().unwrap().clone()
    }

    pub fn current_job(&self) -> Option<JobHandle> {
        self.shared.handle.lock().unwrap().clone()
    }

    /**
     * Ask the server to stop the remote job of the current run, if one was
     * created.  The request is made in the background and a failure is only
     * logged.
     */
    pub fn stop_remote_job(&self) -> Option<JoinHandle<()>> {
        let handle = self.current_job()?;
        let api = Arc::clone(&self.api);
        let log = self.log.new(o!("job" => handle.id.clone()));

        Some(tokio::task::spawn(async move {
            let r = api.stop_job(&handle).await;
            match r.outcome {
                Ok(()) => info!(log, "stopped remote {}", handle.kind),
                Err(e) => {
                    warn!(log, "could not stop remote {}: {}", handle.kind, e;
                        "status" => r.status)
                }
            }
        }))
    }

    /**
     * Remove the unmodified copy of the G-code the slicer may have kept.
     */
    pub fn clear_file_cache(&self, gcode: &Path) {
        match paths::clear_file_cache(gcode) {
            Ok(true) => info!(self.log, "removed cached copy of {:?}", gcode),
            Ok(false) => (),
            Err(e) => warn!(self.log, "clearing file cache: {:?}", e),
        }
    }
}
