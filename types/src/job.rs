/*
 * Copyright 2024 Oxide Computer Company
 */

use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    Simulation,
    Optimization,
}

impl JobKind {
    /**
     * The capitalised name used in user-visible messages; e.g., "Failed to
     * create Simulation".
     */
    pub fn label(&self) -> &'static str {
        match self {
            JobKind::Simulation => "Simulation",
            JobKind::Optimization => "Optimization",
        }
    }

    /**
     * File name prefix for the artefact produced by a job of this kind, which
     * is written next to the G-code that was submitted.
     */
    pub fn result_prefix(&self) -> &'static str {
        match self {
            JobKind::Simulation => "simulated_",
            JobKind::Optimization => "optimized_",
        }
    }
}

/**
 * Identifies one remote job once the server has accepted it.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub id: String,
    pub name: String,
    pub kind: JobKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteState {
    Running,
    Finished,
    Failed,
    Restricted,
}

impl RemoteState {
    /**
     * Map a job status string reported by the server.  Anything we do not
     * recognise as terminal (e.g., "QUEUED" or "RUNNING") is still in
     * progress.
     */
    pub fn from_server(status: &str) -> RemoteState {
        match status.trim().to_ascii_uppercase().as_str() {
            "FINISHED" => RemoteState::Finished,
            "FAILED" | "ERROR" => RemoteState::Failed,
            "RESTRICTED" => RemoteState::Restricted,
            _ => RemoteState::Running,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RemoteState::Running)
    }
}

/**
 * A snapshot of a remote job, superseded by each poll.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /**
     * Percentage, clamped to 0-100.
     */
    pub progress: f32,
    pub state: RemoteState,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub restrictions: Vec<String>,
}

impl JobStatus {
    pub fn new(progress: f32, state: RemoteState) -> JobStatus {
        JobStatus {
            progress: progress.clamp(0.0, 100.0),
            state,
            errors: Default::default(),
            restrictions: Default::default(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == RemoteState::Finished
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedFix {
    pub category: Option<String>,
    pub fix: String,
    #[serde(default)]
    pub extra_details: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationMetrics {
    /**
     * Classification of the predicted print outcome; e.g., "WILL_PRINT".
     */
    pub outcome: Option<String>,
    pub outcome_description: Option<String>,
    #[serde(default)]
    pub suggested_fixes: Vec<SuggestedFix>,
    pub speed_factor: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    pub quality_mean_improvement: Option<String>,
    pub quality_std_improvement: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobMetrics {
    Simulation(SimulationMetrics),
    Optimization(OptimizationMetrics),
}

impl JobMetrics {
    pub fn kind(&self) -> JobKind {
        match self {
            JobMetrics::Simulation(_) => JobKind::Simulation,
            JobMetrics::Optimization(_) => JobKind::Optimization,
        }
    }
}

/**
 * The terminal payload of one orchestration run.
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum JobResult {
    Success {
        url: String,
        metrics: Option<JobMetrics>,
    },
    Failure {
        message: String,
        http_status: Option<u16>,
        trace_id: Option<String>,
    },
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success { .. })
    }
}
