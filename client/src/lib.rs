/*
 * Copyright 2024 Oxide Computer Company
 */

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use helio_common::{numbered_list, CancelCheck};
use helio_types::{JobHandle, JobInput, JobKind};
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT_LANGUAGE, AUTHORIZATION, CONTENT_LENGTH,
    CONTENT_TYPE,
};
use serde::Deserialize;
use serde_json::json;
use slog::{debug, info, o, warn, Logger};

pub mod catalog;
pub mod config;
mod graphql;

pub use catalog::{Catalog, CatalogApi, CatalogEntry, Page, PriorityOption};
pub use config::{Profile, Region};
pub use graphql::{IngestStatus, JobProgress};

use graphql::*;

/**
 * The outcome of one call to the service.  Server-side problems are not Rust
 * errors: the caller needs the HTTP status (0 if no response arrived) and the
 * trace id alongside the message in order to tell the user what went wrong.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T, E = String> {
    pub status: u16,
    pub trace_id: Option<String>,
    pub outcome: Result<T, E>,
}

impl<T, E> Reply<T, E> {
    pub fn ok(status: u16, value: T) -> Reply<T, E> {
        Reply { status, trace_id: None, outcome: Ok(value) }
    }

    pub fn err(status: u16, error: E) -> Reply<T, E> {
        Reply { status, trace_id: None, outcome: Err(error) }
    }

    /**
     * A call that produced no HTTP response at all; e.g., a connection
     * failure or timeout.
     */
    pub fn no_response(error: E) -> Reply<T, E> {
        Reply::err(0, error)
    }

    pub fn with_trace_id(mut self, trace_id: Option<String>) -> Reply<T, E> {
        self.trace_id = trace_id;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == 200 && self.outcome.is_ok()
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Reply<U, E> {
        Reply {
            status: self.status,
            trace_id: self.trace_id,
            outcome: self.outcome.map(f),
        }
    }

    pub fn map_err<G, F: FnOnce(E) -> G>(self, f: F) -> Reply<T, G> {
        Reply {
            status: self.status,
            trace_id: self.trace_id,
            outcome: self.outcome.map_err(f),
        }
    }

    pub fn and_then<U, F>(self, f: F) -> Reply<U, E>
    where
        F: FnOnce(T) -> Result<U, E>,
    {
        Reply {
            status: self.status,
            trace_id: self.trace_id,
            outcome: self.outcome.and_then(f),
        }
    }
}

impl<T> Reply<T, String> {
    /**
     * Collapse into an ordinary result, for callers that do not distinguish
     * failure kinds.
     */
    pub fn into_result(self) -> Result<T> {
        match self.outcome {
            Ok(v) => Ok(v),
            Err(e) => Err(anyhow!("{e}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub url: String,
    pub key: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateJob {
    pub kind: JobKind,
    /**
     * Storage key returned with the upload target.
     */
    pub upload_key: String,
    pub printer_id: String,
    pub material_id: String,
    pub input: JobInput,
    pub name: String,
}

/**
 * Creating a job happens in two stages: the uploaded G-code must be accepted
 * by the service before a job can be started against it.
 */
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreateJobError {
    #[error("{0}")]
    Ingest(String),
    #[error("{0}")]
    Create(String),
    #[error("canceled while waiting for G-code processing")]
    Canceled,
}

/**
 * How long to wait for uploaded G-code to be processed.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IngestPolicy {
    #[serde(with = "helio_common::seconds")]
    pub interval: Duration,
    pub max_iterations: u32,
}

impl Default for IngestPolicy {
    fn default() -> Self {
        IngestPolicy { interval: Duration::from_secs(2), max_iterations: 60 }
    }
}

/**
 * The calls the orchestrator makes against the service.
 */
#[async_trait]
pub trait JobApi: Send + Sync {
    fn endpoint(&self) -> &str;
    fn has_credential(&self) -> bool;

    async fn create_presigned_upload_target(
        &self,
        file_name: &str,
    ) -> Reply<UploadTarget>;

    /**
     * PUT the contents of a local file to a presigned URL.
     */
    async fn upload_artifact(&self, path: &Path, url: &str) -> Reply<()>;

    /**
     * Register the uploaded G-code, wait for the service to finish processing
     * it, then start a job against it.
     */
    async fn create_job(
        &self,
        job: &CreateJob,
        cancel: &dyn CancelCheck,
    ) -> Reply<JobHandle, CreateJobError>;

    async fn poll_job(&self, job: &JobHandle) -> Reply<JobProgress>;

    async fn stop_job(&self, job: &JobHandle) -> Reply<()>;
}

/**
 * Poll the processing status of uploaded G-code until the service either
 * accepts or rejects it.  Polls that fail outright are ignored; only the
 * iteration limit or a stop ends the wait early.
 */
pub async fn await_ingestion<F, Fut>(
    log: &Logger,
    policy: &IngestPolicy,
    initial: IngestStatus,
    cancel: &dyn CancelCheck,
    mut poll: F,
) -> Result<(), CreateJobError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Reply<IngestStatus>>,
{
    let mut status = initial;
    let mut iteration = 0;

    loop {
        /*
         * A stop takes precedence over whatever the last check reported.
         */
        if cancel.was_canceled() {
            return Err(CreateJobError::Canceled);
        }

        match status {
            IngestStatus::Ready => return Ok(()),
            IngestStatus::Error(e) => {
                return Err(CreateJobError::Ingest(if e.is_empty() {
                    "G-code processing failed".to_string()
                } else {
                    numbered_list(&e)
                }));
            }
            IngestStatus::Restricted(r) => {
                return Err(CreateJobError::Ingest(if r.is_empty() {
                    "G-code is restricted".to_string()
                } else {
                    numbered_list(&r)
                }));
            }
            IngestStatus::Pending => (),
        }

        if iteration >= policy.max_iterations {
            return Err(CreateJobError::Ingest(format!(
                "timed out waiting for G-code processing after {} checks",
                policy.max_iterations,
            )));
        }
        iteration += 1;

        tokio::time::sleep(policy.interval).await;

        let r = poll().await;
        status = match r.outcome {
            Ok(s) => {
                debug!(log, "G-code status check {}: {:?}", iteration, s);
                s
            }
            Err(e) => {
                warn!(log, "G-code status check {} failed: {}", iteration, e;
                    "status" => r.status);
                IngestStatus::Pending
            }
        };
    }
}

fn trace_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("trace-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub struct ClientBuilder {
    log: Logger,
    url: String,
    token: Option<String>,
    region: Region,
    client_name: String,
    client_version: String,
    ingest: IngestPolicy,
}

impl ClientBuilder {
    pub fn new(log: Logger, url: &str) -> ClientBuilder {
        ClientBuilder {
            log,
            url: url.trim().to_string(),
            token: None,
            region: Region::default(),
            client_name: "helio".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            ingest: Default::default(),
        }
    }

    pub fn from_profile(log: Logger, profile: &Profile) -> ClientBuilder {
        let mut cb = ClientBuilder::new(log, &profile.url);
        cb.bearer_token(&profile.pat).region(profile.region);
        cb
    }

    pub fn bearer_token<S: AsRef<str>>(&mut self, token: S) -> &mut Self {
        self.token = Some(token.as_ref().trim().to_string());
        self
    }

    pub fn region(&mut self, region: Region) -> &mut Self {
        self.region = region;
        self
    }

    /**
     * Identify the application on whose behalf requests are made; used in
     * the User-Agent header and in the names given to jobs.
     */
    pub fn client_name<S: AsRef<str>>(&mut self, name: S) -> &mut Self {
        self.client_name = name.as_ref().to_string();
        self
    }

    pub fn client_version<S: AsRef<str>>(&mut self, version: S) -> &mut Self {
        self.client_version = version.as_ref().to_string();
        self
    }

    pub fn ingest_policy(&mut self, policy: IngestPolicy) -> &mut Self {
        self.ingest = policy;
        self
    }

    pub fn build(&self) -> Result<Client> {
        let mut dh = HeaderMap::new();
        dh.insert("X-Version-Type", HeaderValue::from_static("Official"));
        if let Some(lang) = self.region.accept_language() {
            dh.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(lang));
        }

        let token = self.token.clone().filter(|t| !t.is_empty());
        if let Some(token) = token.as_deref() {
            let mut hv = HeaderValue::from_str(&format!("Bearer {}", token))?;
            hv.set_sensitive(true);
            dh.insert(AUTHORIZATION, hv);
        }

        let ua = format!("{}/{}", self.client_name, self.client_version);

        let api = reqwest::ClientBuilder::new()
            .user_agent(&ua)
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(100))
            .default_headers(dh.clone())
            .build()?;

        /*
         * Status checks during G-code processing are frequent and cheap, so
         * they are given less time.
         */
        let status = reqwest::ClientBuilder::new()
            .user_agent(&ua)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .default_headers(dh)
            .build()?;

        /*
         * Presigned URLs carry their own authorisation and must not be sent
         * our bearer token.
         */
        let storage = reqwest::ClientBuilder::new()
            .user_agent(&ua)
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(100))
            .build()?;

        Ok(Client {
            log: self.log.new(o!("component" => "helio-client")),
            api,
            status,
            storage,
            url: self.url.clone(),
            token,
            region: self.region,
            client_name: self.client_name.clone(),
            ingest: self.ingest,
        })
    }
}

pub struct Client {
    log: Logger,
    api: reqwest::Client,
    status: reqwest::Client,
    storage: reqwest::Client,
    url: String,
    token: Option<String>,
    region: Region,
    client_name: String,
    ingest: IngestPolicy,
}

/**
 * The result of asking for a token that is not tied to an account.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnonymousToken {
    Issued(String),
    QuotaExhausted,
}

fn parse_anonymous_token(status: u16, body: &str) -> Result<AnonymousToken> {
    #[derive(Deserialize)]
    struct TokenBody {
        pat: Option<String>,
    }

    match status {
        200 => {
            let tb: TokenBody = serde_json::from_str(body)?;
            match tb.pat.filter(|p| !p.is_empty()) {
                Some(pat) => Ok(AnonymousToken::Issued(pat)),
                None => bail!("response did not include a token"),
            }
        }
        429 => Ok(AnonymousToken::QuotaExhausted),
        s => bail!("status: {s}, error: {}", body.trim()),
    }
}

/**
 * Request an anonymous personal access token for the named client
 * application.
 */
pub async fn request_anonymous_token(
    log: &Logger,
    region: Region,
    client_name: &str,
) -> Result<AnonymousToken> {
    let url =
        format!("{}/auth/anonymous_token/{}", region.rest_url(), client_name);

    let client = reqwest::ClientBuilder::new()
        .connect_timeout(Duration::from_secs(20))
        .timeout(Duration::from_secs(100))
        .build()?;

    let mut req = client.get(&url);
    if let Some(lang) = region.accept_language() {
        req = req.header(ACCEPT_LANGUAGE, lang);
    }

    let res = req.send().await?;
    let status = res.status().as_u16();
    let body = res.text().await?;

    let t = parse_anonymous_token(status, &body)?;
    info!(log, "anonymous token request";
        "status" => status,
        "issued" => matches!(t, AnonymousToken::Issued(_)));
    Ok(t)
}

fn remaining_from(data: UserData) -> (i64, i64) {
    match data.user {
        Some(u) => (
            u.remaining_opts_this_month.unwrap_or(0),
            u.add_on_optimizations.unwrap_or(0),
        ),
        None => (0, 0),
    }
}

fn catalog_page(p: Option<PageNode>, fallback_to_name: bool) -> Page {
    let Some(p) = p else {
        return Page::default();
    };

    let entries = p
        .objects
        .into_iter()
        .filter_map(|o| {
            let id = o.id?;
            let name = o.name.unwrap_or_default();
            let native = o
                .alternative_names
                .and_then(|a| a.bambustudio)
                .filter(|n| !n.is_empty());
            let native_name = match native {
                Some(n) => n,
                None if fallback_to_name && !name.is_empty() => name.clone(),
                None => return None,
            };
            Some(CatalogEntry { id, name, native_name })
        })
        .collect();

    Page {
        entries,
        has_next_page: p.page_info.map(|pi| pi.has_next_page).unwrap_or(false),
    }
}

impl Client {
    pub fn region(&self) -> Region {
        self.region
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    async fn post_graphql<T>(
        &self,
        http: &reqwest::Client,
        query: &str,
        variables: serde_json::Value,
    ) -> Reply<T>
    where
        for<'de> T: Deserialize<'de>,
    {
        let res = match http
            .post(&self.url)
            .json(&Request::new(query, variables))
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => return Reply::no_response(e.to_string()),
        };

        let status = res.status().as_u16();
        let trace_id = trace_id(res.headers());
        match res.text().await {
            Ok(body) => parse_envelope(status, trace_id, &body),
            Err(e) => Reply::err(status, format!("reading response: {e}"))
                .with_trace_id(trace_id),
        }
    }

    async fn gcode_status(&self, id: &str) -> Reply<IngestStatus> {
        self.post_graphql::<GcodeStatusData>(
            &self.status,
            Q_GCODE_STATUS,
            json!({ "id": id }),
        )
        .await
        .and_then(|d| {
            d.gcode_v2
                .map(|g| g.ingest_status())
                .ok_or_else(|| "G-code not found".to_string())
        })
    }

    /**
     * How many optimizations the account may still run: those left in this
     * month's allowance, and purchased add-ons.  Any failure is reported as
     * none remaining.
     */
    pub async fn remaining_optimizations(&self) -> (i64, i64) {
        let r = self
            .post_graphql::<UserData>(&self.api, Q_REMAINING_OPTS, json!({}))
            .await;
        match r.outcome {
            Ok(d) => remaining_from(d),
            Err(e) => {
                warn!(self.log, "could not query remaining optimizations: {}",
                    e; "status" => r.status);
                (0, 0)
            }
        }
    }
}

#[async_trait]
impl JobApi for Client {
    fn endpoint(&self) -> &str {
        &self.url
    }

    fn has_credential(&self) -> bool {
        self.token.is_some()
    }

    async fn create_presigned_upload_target(
        &self,
        file_name: &str,
    ) -> Reply<UploadTarget> {
        self.post_graphql::<PresignedData>(
            &self.api,
            Q_PRESIGNED_URL,
            json!({ "fileName": file_name }),
        )
        .await
        .map(|d| UploadTarget {
            url: d.get_presigned_url.url,
            key: d.get_presigned_url.key,
            mime_type: d.get_presigned_url.mime_type,
        })
    }

    async fn upload_artifact(&self, path: &Path, url: &str) -> Reply<()> {
        let f = match tokio::fs::File::open(path).await {
            Ok(f) => f,
            Err(e) => {
                return Reply::no_response(format!("opening {:?}: {e}", path))
            }
        };
        let len = match f.metadata().await {
            Ok(md) => md.len(),
            Err(e) => {
                return Reply::no_response(format!("stat {:?}: {e}", path))
            }
        };

        let body = reqwest::Body::wrap_stream(
            tokio_util::io::ReaderStream::new(f),
        );

        let res = match self
            .storage
            .put(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send()
            .await
        {
            Ok(res) => res,
            Err(e) => return Reply::no_response(e.to_string()),
        };

        let status = res.status();
        let trace_id = trace_id(res.headers());
        if status.is_success() {
            info!(self.log, "uploaded {} bytes from {:?}", len, path);
            Reply::ok(status.as_u16(), ()).with_trace_id(trace_id)
        } else {
            let body = res.text().await.unwrap_or_default();
            Reply::err(
                status.as_u16(),
                format!("status: {}, error: {}", status.as_u16(), body.trim()),
            )
            .with_trace_id(trace_id)
        }
    }

    async fn create_job(
        &self,
        job: &CreateJob,
        cancel: &dyn CancelCheck,
    ) -> Reply<JobHandle, CreateJobError> {
        let log = self.log.new(o!("kind" => job.kind.to_string()));
        let gcode_name = gcode_name_from_key(&job.upload_key);

        let input = CreateGcodeInput {
            name: gcode_name,
            printer_id: &job.printer_id,
            material_id: &job.material_id,
            gcode_key: &job.upload_key,
            is_single_shell: true,
        };
        let r = self
            .post_graphql::<CreateGcodeData>(
                &self.api,
                Q_CREATE_GCODE,
                json!({ "input": input }),
            )
            .await
            .and_then(|d| {
                d.create_gcode_v2
                    .ok_or_else(|| "no G-code was created".to_string())
            });
        let (gcode, status, trace_id) = match r.outcome {
            Ok(g) => (g, r.status, r.trace_id),
            Err(e) => {
                return Reply::err(r.status, CreateJobError::Ingest(e))
                    .with_trace_id(r.trace_id);
            }
        };
        info!(log, "registered G-code {:?} as {}",
            gcode.name.as_deref().unwrap_or(gcode_name), gcode.id);

        if let Err(e) = await_ingestion(
            &log,
            &self.ingest,
            gcode.ingest_status(),
            cancel,
            || self.gcode_status(&gcode.id),
        )
        .await
        {
            return Reply::err(status, e).with_trace_id(trace_id);
        }
        if cancel.was_canceled() {
            return Reply::err(status, CreateJobError::Canceled)
                .with_trace_id(trace_id);
        }

        let vars = json!({
            "input": job_input(job.kind, &job.name, &gcode.id, &job.input),
        });
        let created = match job.kind {
            JobKind::Simulation => self
                .post_graphql::<CreateSimulationData>(
                    &self.api,
                    Q_CREATE_SIMULATION,
                    vars,
                )
                .await
                .map(|d| d.create_simulation),
            JobKind::Optimization => self
                .post_graphql::<CreateOptimizationData>(
                    &self.api,
                    Q_CREATE_OPTIMIZATION,
                    vars,
                )
                .await
                .map(|d| d.create_optimization),
        };

        created
            .and_then(|n| {
                n.ok_or_else(|| format!("no {} was created", job.kind))
            })
            .map(|n| JobHandle { id: n.id, name: n.name, kind: job.kind })
            .map_err(CreateJobError::Create)
    }

    async fn poll_job(&self, job: &JobHandle) -> Reply<JobProgress> {
        let vars = json!({ "id": job.id });
        match job.kind {
            JobKind::Simulation => self
                .post_graphql::<SimulationData>(&self.api, Q_SIMULATION, vars)
                .await
                .and_then(|d| {
                    d.simulation.map(JobProgress::from).ok_or_else(|| {
                        format!("simulation {} not found", job.id)
                    })
                }),
            JobKind::Optimization => self
                .post_graphql::<OptimizationData>(
                    &self.api,
                    Q_OPTIMIZATION,
                    vars,
                )
                .await
                .and_then(|d| {
                    d.optimization.map(JobProgress::from).ok_or_else(|| {
                        format!("optimization {} not found", job.id)
                    })
                }),
        }
    }

    async fn stop_job(&self, job: &JobHandle) -> Reply<()> {
        let q = match job.kind {
            JobKind::Simulation => Q_STOP_SIMULATION,
            JobKind::Optimization => Q_STOP_OPTIMIZATION,
        };
        self.post_graphql::<serde_json::Value>(
            &self.api,
            q,
            json!({ "id": job.id }),
        )
        .await
        .map(|_| ())
    }
}

#[async_trait]
impl CatalogApi for Client {
    async fn printers_page(&self, page: u32) -> Result<Page> {
        self.post_graphql::<PrintersData>(
            &self.api,
            Q_PRINTERS,
            json!({ "page": page }),
        )
        .await
        .map(|d| catalog_page(d.printers, false))
        .into_result()
    }

    async fn materials_page(&self, page: u32) -> Result<Page> {
        self.post_graphql::<MaterialsData>(
            &self.api,
            Q_MATERIALS,
            json!({ "page": page }),
        )
        .await
        .map(|d| catalog_page(d.materials, true))
        .into_result()
    }

    async fn print_priority_options(&self) -> Result<Vec<PriorityOption>> {
        self.post_graphql::<PrintPrioritiesData>(
            &self.api,
            Q_PRINT_PRIORITIES,
            json!({}),
        )
        .await
        .map(|d| {
            d.print_priority_options
                .into_iter()
                .map(|p| PriorityOption {
                    label: p.label.unwrap_or_else(|| p.value.clone()),
                    description: p.description.unwrap_or_default(),
                    value: p.value,
                })
                .collect()
        })
        .into_result()
    }
}
