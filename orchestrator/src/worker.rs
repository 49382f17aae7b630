/*
 * Copyright 2024 Oxide Computer Company
 */

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use helio_client::{CreateJob, CreateJobError, JobApi, Reply};
use helio_common::{timestamped_name, CancelCheck};
use helio_download::{DownloadError, Downloader};
use helio_types::{JobHandle, JobKind, JobMetrics, JobResult};
use slog::{debug, error, info, o, warn, Logger};

use super::error::Failure;
use super::events::{Completion, EventSink};
use super::paths;
use super::prerequisite::Prerequisite;
use super::{Job, Shared, Worker};

struct Success {
    url: String,
    result_path: PathBuf,
    metrics: Option<JobMetrics>,
}

/**
 * Poll progress occupies the band between 20 and 80 percent.
 */
fn poll_percent(progress: f32) -> f32 {
    20.0 + 60.0 * progress / 100.0
}

fn working_message(label: &str, times_queried: u32) -> String {
    let dots = "....".repeat((times_queried % 3) as usize);
    format!("Helio: {} working{}", label, dots)
}

impl Worker {
    fn shared(&self) -> &Shared {
        &self.shared
    }

    fn canceled(&self) -> bool {
        self.shared().state.was_canceled()
    }

    fn note_trace<T, E>(&self, r: &Reply<T, E>) {
        if let Some(t) = r.trace_id.as_deref() {
            *self.shared().trace_id.lock().unwrap() = Some(t.to_string());
        }
    }

    /**
     * Run the job from upload through to delivery of the result.  Returns
     * None if the run was stopped along the way.
     */
    async fn pipeline(
        &self,
        log: &Logger,
        job: &Job,
        es: &mut EventSink,
    ) -> Result<Option<Success>, Failure> {
        let kind = job.kind;
        let label = kind.label();
        let api: &dyn JobApi = &*self.api;

        if api.endpoint().trim().is_empty() {
            return Err(Failure::EmptyEndpoint);
        }
        if !api.has_credential() {
            return Err(Failure::EmptyCredential);
        }

        let upload = paths::upload_source(&job.gcode)
            .map_err(|e| Failure::Upload(e.to_string()))?;
        let file_name = job
            .gcode
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        /*
         * Obtain somewhere to put the G-code.
         */
        let r = api.create_presigned_upload_target(&file_name).await;
        self.note_trace(&r);
        if self.canceled() {
            return Ok(None);
        }
        let target = match r.outcome {
            Ok(t) if r.status == 200 => t,
            Ok(_) => {
                return Err(Failure::UploadTarget {
                    status: r.status,
                    message: format!("status: {}", r.status),
                });
            }
            Err(message) => {
                return Err(Failure::UploadTarget { status: r.status, message });
            }
        };
        es.progress(0.0, "Helio: Presigned URL Created");

        let r = api.upload_artifact(&upload, &target.url).await;
        self.note_trace(&r);
        if self.canceled() {
            return Ok(None);
        }
        if let Err(e) = r.outcome {
            return Err(Failure::Upload(e));
        }
        info!(log, "uploaded {:?} as {}", upload, target.key);
        es.progress(5.0, "Helio: file successfully uploaded");

        /*
         * Register the G-code and start the job.
         */
        let mut input = job.input.clone();
        if let (JobKind::Optimization, Some(catalog), Some(oi)) =
            (kind, self.catalog.as_deref(), input.optimization.as_mut())
        {
            if catalog.apply_priority_fallback(oi) {
                info!(log, "server offers no matching print priority; \
                    using outer wall mode");
            }
        }

        let cj = CreateJob {
            kind,
            upload_key: target.key,
            printer_id: job.printer_id.clone(),
            material_id: job.material_id.clone(),
            input,
            name: timestamped_name(&self.client_name, Utc::now()),
        };
        let r = api.create_job(&cj, &self.shared().state).await;
        self.note_trace(&r);
        if self.canceled() {
            return Ok(None);
        }
        let handle: JobHandle = match r.outcome {
            Ok(h) => h,
            Err(CreateJobError::Ingest(m)) => return Err(Failure::Ingest(m)),
            Err(CreateJobError::Create(message)) => {
                return Err(Failure::Create { kind, message });
            }
            Err(CreateJobError::Canceled) => return Ok(None),
        };
        *self.shared().handle.lock().unwrap() = Some(handle.clone());
        let log = log.new(o!("job" => handle.id.clone()));
        info!(log, "created {} {:?}", kind, handle.name);
        es.progress(10.0, format!("Helio: {} successfully created", label));

        /*
         * Wait for the job to finish.  A poll that gets no answer is retried
         * a limited number of times; a poll in which the server reports that
         * the job has failed ends the run.
         */
        es.progress(20.0, format!("Helio: waiting for {}", label));
        let mut times_tried = 0;
        let mut times_queried = 0;
        let finished = loop {
            if self.canceled() {
                return Ok(None);
            }

            let r = api.poll_job(&handle).await;
            self.note_trace(&r);
            if self.canceled() {
                return Ok(None);
            }

            if r.status == 200 {
                times_tried = 0;

                let p = match r.outcome {
                    Ok(p) => p,
                    Err(message) => return Err(Failure::Job { kind, message }),
                };
                if let Some(message) = p.error(kind) {
                    return Err(Failure::Job { kind, message });
                }

                debug!(log, "progress {}%, {:?}", p.status.progress,
                    p.status.state);
                es.progress(
                    poll_percent(p.status.progress),
                    working_message(label, times_queried),
                );

                /*
                 * Failed and Restricted were reported above.
                 */
                if p.status.state.is_terminal() {
                    break p;
                }
            } else {
                times_tried += 1;
                let last = r
                    .outcome
                    .err()
                    .unwrap_or_else(|| format!("status: {}", r.status));
                warn!(log, "{} check failed ({} in a row): {}", kind,
                    times_tried, last; "status" => r.status);
                es.progress(35.0, format!("Helio: {} check failed", label));

                if times_tried >= self.policy.max_poll_failures {
                    return Err(Failure::Poll {
                        kind,
                        attempts: times_tried,
                        last,
                    });
                }
            }

            times_queried += 1;
            tokio::select! {
                _ = tokio::time::sleep(self.policy.poll_interval) => (),
                _ = self.shared().state.stopped() => return Ok(None),
            }
        };

        let Some(url) = finished.url else {
            return Err(Failure::Job {
                kind,
                message: "the server did not provide a result".to_string(),
            });
        };

        /*
         * Fetch the result.
         */
        let result_path = paths::result_path(&job.gcode, kind)
            .map_err(|e| Failure::Download(e.to_string()))?;
        es.progress(80.0, "Helio: downloading result");
        let dl =
            Downloader::new(&log, &*self.fetcher, self.policy.download);
        match dl
            .download_to(&url, &result_path, &self.shared().state, |p| {
                es.progress(80.0, format!("Helio: {p}"))
            })
            .await
        {
            Ok(n) => info!(log, "saved {} bytes to {:?}", n, result_path),
            Err(DownloadError::Canceled) => return Ok(None),
            Err(e) => return Err(Failure::Download(e.to_string())),
        }
        es.progress(100.0, "Helio: GCode downloaded successfully");

        if let Err(e) = self.loader.load(kind, &result_path, &job.gcode).await {
            return Err(Failure::Load(format!("{e:#}")));
        }
        if self.canceled() {
            return Ok(None);
        }

        Ok(Some(Success { url, result_path, metrics: finished.metrics }))
    }

    pub(crate) async fn run(
        self: Arc<Self>,
        job: Job,
        prereq: Prerequisite,
        mut es: EventSink,
    ) {
        let log = self.log.new(o!(
            "run" => rusty_ulid::Ulid::generate().to_string(),
            "kind" => job.kind.to_string(),
        ));
        let state = &self.shared().state;

        if !prereq.wait(state).await || !state.begin() {
            info!(log, "run canceled before it started");
            state.cancel();
            return;
        }

        info!(log, "run started"; "gcode" => ?job.gcode);
        es.started().await;
        es.progress(0.0, "Helio: Process Started");

        match self.pipeline(&log, &job, &mut es).await {
            Ok(Some(s)) => {
                if !state.finish() {
                    info!(log, "run stopped as it completed");
                    return;
                }

                *self.shared().last.lock().unwrap() = Some(JobResult::Success {
                    url: s.url,
                    metrics: s.metrics.clone(),
                });
                let trace_id = self.shared().trace_id.lock().unwrap().clone();

                info!(log, "run complete"; "result" => ?s.result_path);
                es.completed(Completion {
                    success: true,
                    result_path: Some(s.result_path),
                    original_path: job.gcode.clone(),
                    error_message: String::new(),
                    kind: job.kind,
                    metrics: s.metrics,
                    trace_id,
                })
                .await;
            }
            Ok(None) => {
                info!(log, "run stopped");
            }
            Err(f) => {
                /*
                 * If the user stopped the run, a failure that followed is
                 * not reported.
                 */
                if !state.cancel() {
                    info!(log, "run stopped"; "late_failure" => %f);
                    return;
                }

                let trace_id = self.shared().trace_id.lock().unwrap().clone();
                let mut message = f.to_string();
                if let Some(t) = trace_id.as_deref() {
                    message += &format!("\nTrace ID: {t}");
                }
                error!(log, "run failed: {}", message);

                *self.shared().last.lock().unwrap() = Some(JobResult::Failure {
                    message: message.clone(),
                    http_status: f.http_status(),
                    trace_id: trace_id.clone(),
                });

                es.completed(Completion {
                    success: false,
                    result_path: None,
                    original_path: job.gcode.clone(),
                    error_message: message,
                    kind: job.kind,
                    metrics: None,
                    trace_id,
                })
                .await;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn poll_band() {
        assert_eq!(poll_percent(0.0), 20.0);
        assert_eq!(poll_percent(10.0), 26.0);
        assert_eq!(poll_percent(50.0), 50.0);
        assert_eq!(poll_percent(100.0), 80.0);
    }

    #[test]
    fn trailing_dots() {
        assert_eq!(
            working_message("Simulation", 0),
            "Helio: Simulation working"
        );
        assert_eq!(
            working_message("Simulation", 1),
            "Helio: Simulation working...."
        );
        assert_eq!(
            working_message("Simulation", 5),
            "Helio: Simulation working........"
        );
        assert_eq!(
            working_message("Simulation", 3),
            "Helio: Simulation working"
        );
    }
}
