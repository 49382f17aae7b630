/*
 * Copyright 2024 Oxide Computer Company
 */

/*
 * Request and response shapes for the Helio GraphQL API.  Requests are built
 * from typed structures rather than by pasting strings together; fields the
 * caller has not set are omitted so that the server applies its own defaults.
 */

use helio_common::numbered_list;
use helio_types::{
    convert_speed, convert_volume_speed, JobInput, JobKind, JobMetrics,
    JobStatus, OptimizationMetrics, OptimizationMode, RemoteState,
    SimulationInput, SimulationMetrics, SuggestedFix,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Reply;

pub(crate) const Q_PRESIGNED_URL: &str = "query getPresignedUrl($fileName: \
    String!) { getPresignedUrl(fileName: $fileName) { mimeType url key } }";

pub(crate) const Q_CREATE_GCODE: &str = "mutation CreateGcode($input: \
    CreateGcodeInputV2!) { createGcodeV2(input: $input) { id name sizeKb \
    status progress } }";

pub(crate) const Q_GCODE_STATUS: &str = "query GcodeV2($id: ID!) { \
    gcodeV2(id: $id) { id name sizeKb status progress errors \
    restrictions { code description } } }";

pub(crate) const Q_CREATE_SIMULATION: &str = "mutation CreateSimulation(\
    $input: CreateSimulationInput!) { createSimulation(input: $input) { id \
    name progress status gcode { id name } printer { id name } material { id \
    name } reportJsonUrl thermalIndexGcodeUrl \
    estimatedSimulationDurationSeconds insertedAt updatedAt } }";

pub(crate) const Q_CREATE_OPTIMIZATION: &str = "mutation CreateOptimization(\
    $input: CreateOptimizationInput!) { createOptimization(input: $input) { \
    id name progress status gcode { id name } printer { id name } material { \
    id name } insertedAt updatedAt } }";

pub(crate) const Q_SIMULATION: &str = "query Simulation($id: ID!) { \
    simulation(id: $id) { id name progress status thermalIndexGcodeUrl \
    printInfo { printOutcome printOutcomeDescription speedFactor \
    suggestedFixes { category fix extraDetails } } } }";

pub(crate) const Q_OPTIMIZATION: &str = "query Optimization($id: ID!) { \
    optimization(id: $id) { id name progress status \
    optimizedGcodeWithThermalIndexesUrl qualityMeanImprovement \
    qualityStdImprovement } }";

pub(crate) const Q_STOP_SIMULATION: &str =
    "mutation StopSimulation($id: ID!) { stopSimulation(id: $id) }";

pub(crate) const Q_STOP_OPTIMIZATION: &str =
    "mutation StopOptimization($id: ID!) { stopOptimization(id: $id) }";

pub(crate) const Q_PRINTERS: &str = "query GetPrinters($page: Int) { \
    printers(page: $page, pageSize: 20) { pages pageInfo { hasNextPage } \
    objects { ... on Printer { id name alternativeNames { bambustudio } } } \
    } }";

pub(crate) const Q_MATERIALS: &str = "query GetMaterials($page: Int) { \
    materials(page: $page, pageSize: 20) { pages pageInfo { hasNextPage } \
    objects { ... on Material { id name alternativeNames { bambustudio } } } \
    } }";

pub(crate) const Q_PRINT_PRIORITIES: &str = "query PrintPriorityOptions { \
    printPriorityOptions { value label description } }";

pub(crate) const Q_REMAINING_OPTS: &str = "query GetUserRemainingOpts { \
    user { remainingOptsThisMonth addOnOptimizations } }";

#[derive(Serialize, Debug)]
pub(crate) struct Request<'a> {
    pub query: &'a str,
    pub variables: Value,
}

impl<'a> Request<'a> {
    pub fn new(query: &'a str, variables: Value) -> Request<'a> {
        Request { query, variables }
    }
}

/*
 * Errors may arrive either as the conventional GraphQL list or, from some
 * gateways, as a single object.
 */
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum GqlErrors {
    List(Vec<GqlError>),
    One(GqlError),
}

#[derive(Deserialize, Debug)]
struct GqlError {
    message: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Envelope<T> {
    data: Option<T>,
    errors: Option<GqlErrors>,
    error: Option<Value>,
}

impl GqlErrors {
    fn render(&self) -> String {
        match self {
            GqlErrors::List(l) => {
                let msgs = l
                    .iter()
                    .filter_map(|e| e.message.as_deref())
                    .collect::<Vec<_>>();
                numbered_list(&msgs)
            }
            GqlErrors::One(e) => e.message.clone().unwrap_or_default(),
        }
    }
}

/**
 * Turn the status and body of a GraphQL response into a reply.  A 200 response
 * can still carry errors; those are reported in the outcome while the status
 * is preserved, so that callers can tell a job-level failure from a transport
 * failure.
 */
pub(crate) fn parse_envelope<T>(
    status: u16,
    trace_id: Option<String>,
    body: &str,
) -> Reply<T>
where
    for<'de> T: Deserialize<'de>,
{
    let outcome = match serde_json::from_str::<Envelope<T>>(body) {
        Ok(env) => {
            if let Some(errors) = env.errors {
                let msg = errors.render();
                if msg.is_empty() {
                    Err(format!("status: {status}, unspecified error"))
                } else {
                    Err(msg)
                }
            } else if let Some(error) = env.error {
                Err(match error {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
            } else if status != 200 {
                Err(format!("status: {status}, error: {body}"))
            } else if let Some(data) = env.data {
                Ok(data)
            } else {
                Err("response contained no data".to_string())
            }
        }
        Err(e) if status != 200 => {
            let body = body.trim();
            if body.is_empty() {
                Err(format!("status: {status}, error: {e}"))
            } else {
                Err(format!("status: {status}, error: {body}"))
            }
        }
        Err(e) => Err(format!("failed to parse response: {e}")),
    };

    Reply { status, trace_id, outcome }
}

/*
 * Presigned upload target.
 */

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PresignedData {
    pub get_presigned_url: PresignedUrl,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PresignedUrl {
    pub mime_type: Option<String>,
    pub url: String,
    pub key: String,
}

/*
 * G-code ingestion.
 */

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateGcodeInput<'a> {
    pub name: &'a str,
    pub printer_id: &'a str,
    pub material_id: &'a str,
    pub gcode_key: &'a str,
    pub is_single_shell: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateGcodeData {
    pub create_gcode_v2: Option<GcodeNode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GcodeStatusData {
    pub gcode_v2: Option<GcodeNode>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GcodeNode {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
    #[serde(default)]
    pub restrictions: Option<Vec<Restriction>>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct Restriction {
    #[allow(unused)]
    pub code: Option<String>,
    pub description: Option<String>,
}

/**
 * Where the server is in validating an uploaded G-code file.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus {
    Pending,
    Ready,
    Error(Vec<String>),
    Restricted(Vec<String>),
}

impl IngestStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, IngestStatus::Pending)
    }
}

impl GcodeNode {
    pub fn ingest_status(&self) -> IngestStatus {
        match self.status.as_deref().map(str::to_ascii_uppercase).as_deref() {
            Some("READY") => IngestStatus::Ready,
            Some("ERROR") => IngestStatus::Error(
                self.errors.clone().unwrap_or_default(),
            ),
            Some("RESTRICTED") => IngestStatus::Restricted(
                self.restrictions
                    .iter()
                    .flatten()
                    .filter_map(|r| r.description.clone())
                    .collect(),
            ),
            _ => IngestStatus::Pending,
        }
    }
}

/**
 * The name under which an uploaded file is registered: the final component of
 * the storage key.
 */
pub(crate) fn gcode_name_from_key(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/*
 * Simulation and optimization creation.
 */

#[derive(Serialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SimulationSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_stabilization_height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub air_temperature_above_build_plate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stabilized_air_temperature: Option<f64>,
}

impl From<&SimulationInput> for SimulationSettings {
    fn from(si: &SimulationInput) -> SimulationSettings {
        SimulationSettings {
            temperature_stabilization_height: Some(
                si.stabilization_height_meters(),
            ),
            air_temperature_above_build_plate: si
                .initial_room_air_temp_kelvin(),
            stabilized_air_temperature: si.object_proximity_air_temp_kelvin(),
        }
    }
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct StrategySettings {
    pub strategy: &'static str,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LayerSpan {
    pub from_layer: u32,
    pub to_layer: u32,
}

#[derive(Serialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OptimizationSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimize_outerwall: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub print_priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_velocity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_velocity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_extruder_flow_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_extruder_flow_rate: Option<f64>,
    pub residual_strategy_settings: StrategySettings,
    pub optimizer: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layers_to_optimize: Option<Vec<LayerSpan>>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateJobInput<'a> {
    pub name: &'a str,
    pub gcode_id: &'a str,
    pub simulation_settings: SimulationSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization_settings: Option<OptimizationSettings>,
}

/**
 * Build the "input" variable for a createSimulation or createOptimization
 * mutation.  Physical quantities are converted to the SI units the service
 * expects.
 */
pub(crate) fn job_input<'a>(
    kind: JobKind,
    name: &'a str,
    gcode_id: &'a str,
    input: &JobInput,
) -> CreateJobInput<'a> {
    let optimization_settings = match kind {
        JobKind::Simulation => None,
        JobKind::Optimization => {
            let oi = input.optimization.clone().unwrap_or_default();

            let (optimize_outerwall, print_priority) = match oi.mode() {
                OptimizationMode::OuterWall(ow) => (Some(ow), None),
                OptimizationMode::Priority(p) => (None, Some(p.to_string())),
                OptimizationMode::Default => (None, None),
            };

            Some(OptimizationSettings {
                optimize_outerwall,
                print_priority,
                min_velocity: oi.min_velocity.map(convert_speed),
                max_velocity: oi.max_velocity.map(convert_speed),
                min_extruder_flow_rate: oi
                    .min_volumetric_speed
                    .map(convert_volume_speed),
                max_extruder_flow_rate: oi
                    .max_volumetric_speed
                    .map(convert_volume_speed),
                residual_strategy_settings: StrategySettings {
                    strategy: "LINEAR",
                },
                optimizer: "HYBRID",
                layers_to_optimize: oi.layers.map(|l| {
                    vec![LayerSpan {
                        from_layer: l.effective_from(),
                        to_layer: l.to,
                    }]
                }),
            })
        }
    };

    CreateJobInput {
        name,
        gcode_id,
        simulation_settings: SimulationSettings::from(&input.simulation),
        optimization_settings,
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreatedNode {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateSimulationData {
    pub create_simulation: Option<CreatedNode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateOptimizationData {
    pub create_optimization: Option<CreatedNode>,
}

/*
 * Polling.
 */

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SimulationData {
    pub simulation: Option<SimulationNode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SimulationNode {
    pub progress: Option<f32>,
    pub status: String,
    pub thermal_index_gcode_url: Option<String>,
    pub print_info: Option<PrintInfo>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PrintInfo {
    pub print_outcome: Option<String>,
    pub print_outcome_description: Option<String>,
    pub speed_factor: Option<f64>,
    #[serde(default)]
    pub suggested_fixes: Option<Vec<FixNode>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FixNode {
    pub category: Option<String>,
    pub fix: Option<String>,
    #[serde(default)]
    pub extra_details: Option<Vec<String>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OptimizationData {
    pub optimization: Option<OptimizationNode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OptimizationNode {
    pub progress: Option<f32>,
    pub status: String,
    pub optimized_gcode_with_thermal_indexes_url: Option<String>,
    pub quality_mean_improvement: Option<String>,
    pub quality_std_improvement: Option<String>,
}

/**
 * One poll of a remote job.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    pub status: JobStatus,
    /**
     * Location of the result artefact; only present once the job has
     * finished.
     */
    pub url: Option<String>,
    pub metrics: Option<JobMetrics>,
}

impl JobProgress {
    /**
     * If the server says the job has failed or was refused, describe why.
     */
    pub fn error(&self, kind: JobKind) -> Option<String> {
        match self.status.state {
            RemoteState::Failed => {
                let what = format!("Helio {kind} task failed");
                if self.status.errors.is_empty() {
                    Some(what)
                } else {
                    Some(format!(
                        "{what}\n{}",
                        numbered_list(&self.status.errors)
                    ))
                }
            }
            RemoteState::Restricted => {
                if self.status.restrictions.is_empty() {
                    Some(format!("Helio {} task was restricted", kind))
                } else {
                    Some(numbered_list(&self.status.restrictions))
                }
            }
            RemoteState::Running | RemoteState::Finished => None,
        }
    }
}

impl From<SimulationNode> for JobProgress {
    fn from(n: SimulationNode) -> JobProgress {
        let state = RemoteState::from_server(&n.status);
        let status = JobStatus::new(n.progress.unwrap_or(0.0), state);

        let metrics = n.print_info.map(|pi| {
            JobMetrics::Simulation(SimulationMetrics {
                outcome: pi.print_outcome,
                outcome_description: pi.print_outcome_description,
                suggested_fixes: pi
                    .suggested_fixes
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|f| {
                        Some(SuggestedFix {
                            category: f.category,
                            fix: f.fix?,
                            extra_details: f.extra_details.unwrap_or_default(),
                        })
                    })
                    .collect(),
                speed_factor: pi.speed_factor,
            })
        });

        JobProgress {
            url: if status.is_finished() {
                n.thermal_index_gcode_url
            } else {
                None
            },
            status,
            metrics,
        }
    }
}

impl From<OptimizationNode> for JobProgress {
    fn from(n: OptimizationNode) -> JobProgress {
        let state = RemoteState::from_server(&n.status);
        let status = JobStatus::new(n.progress.unwrap_or(0.0), state);

        let metrics = if n.quality_mean_improvement.is_some()
            || n.quality_std_improvement.is_some()
        {
            Some(JobMetrics::Optimization(OptimizationMetrics {
                quality_mean_improvement: n.quality_mean_improvement,
                quality_std_improvement: n.quality_std_improvement,
            }))
        } else {
            None
        };

        JobProgress {
            url: if status.is_finished() {
                n.optimized_gcode_with_thermal_indexes_url
            } else {
                None
            },
            status,
            metrics,
        }
    }
}

/*
 * Catalog.
 */

#[derive(Deserialize, Debug)]
pub(crate) struct PrintersData {
    pub printers: Option<PageNode>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct MaterialsData {
    pub materials: Option<PageNode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageNode {
    pub page_info: Option<PageInfo>,
    #[serde(default)]
    pub objects: Vec<CatalogNode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageInfo {
    #[serde(default)]
    pub has_next_page: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CatalogNode {
    pub id: Option<String>,
    pub name: Option<String>,
    pub alternative_names: Option<AlternativeNames>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct AlternativeNames {
    pub bambustudio: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PrintPrioritiesData {
    #[serde(default)]
    pub print_priority_options: Vec<PriorityNode>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct PriorityNode {
    pub value: String,
    pub label: Option<String>,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct UserData {
    pub user: Option<UserNode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserNode {
    pub remaining_opts_this_month: Option<i64>,
    pub add_on_optimizations: Option<i64>,
}

#[cfg(test)]
mod test {
    use super::*;
    use helio_types::{LayerRange, OptimizationInput};
    use serde_json::json;

    #[test]
    fn errors_are_numbered_when_many() {
        let body = r#"{"errors":[{"message":"bad printer"},
            {"message":"bad material"}]}"#;
        let r = parse_envelope::<Value>(200, None, body);
        assert_eq!(r.status, 200);
        assert_eq!(
            r.outcome.unwrap_err(),
            "1. bad printer\n2. bad material"
        );

        let body = r#"{"errors":[{"message":"bad printer"}]}"#;
        let r = parse_envelope::<Value>(200, None, body);
        assert_eq!(r.outcome.unwrap_err(), "bad printer");

        let body = r#"{"errors":{"message":"gateway says no"}}"#;
        let r = parse_envelope::<Value>(200, None, body);
        assert_eq!(r.outcome.unwrap_err(), "gateway says no");
    }

    #[test]
    fn unparseable_error_bodies_keep_the_status() {
        let r = parse_envelope::<Value>(401, Some("t-1".into()), "denied");
        assert_eq!(r.status, 401);
        assert_eq!(r.trace_id.as_deref(), Some("t-1"));
        assert_eq!(r.outcome.unwrap_err(), "status: 401, error: denied");

        let r = parse_envelope::<Value>(200, None, "<html>");
        assert!(r.outcome.unwrap_err().starts_with("failed to parse"));
    }

    #[test]
    fn top_level_error_field() {
        let r = parse_envelope::<Value>(
            401,
            None,
            r#"{"error":"invalid token"}"#,
        );
        assert_eq!(r.outcome.unwrap_err(), "invalid token");
    }

    #[test]
    fn presigned_url() {
        let body = r#"{"data":{"getPresignedUrl":{"mimeType":"text/plain",
            "url":"https://store/x","key":"uploads/abc/test.gcode"}}}"#;
        let r = parse_envelope::<PresignedData>(200, None, body);
        let p = r.outcome.unwrap().get_presigned_url;
        assert_eq!(p.url, "https://store/x");
        assert_eq!(gcode_name_from_key(&p.key), "test.gcode");
        assert_eq!(gcode_name_from_key("plain"), "plain");
    }

    #[test]
    fn ingest_statuses() {
        let n: GcodeNode = serde_json::from_value(json!({
            "id": "g1",
            "status": "RESTRICTED",
            "restrictions": [
                { "code": "A", "description": "printer not supported" },
                { "code": "B", "description": "too large" },
            ],
        }))
        .unwrap();
        assert_eq!(
            n.ingest_status(),
            IngestStatus::Restricted(vec![
                "printer not supported".into(),
                "too large".into()
            ])
        );

        let n: GcodeNode = serde_json::from_value(json!({
            "id": "g1", "status": "PROCESSING",
        }))
        .unwrap();
        assert_eq!(n.ingest_status(), IngestStatus::Pending);
        assert!(!n.ingest_status().is_settled());

        let n: GcodeNode =
            serde_json::from_value(json!({ "id": "g1", "status": "READY" }))
                .unwrap();
        assert!(n.ingest_status().is_settled());
    }

    #[test]
    fn unset_simulation_fields_are_omitted() {
        let input = JobInput::default();
        let ji = job_input(JobKind::Simulation, "n", "g1", &input);
        let v = serde_json::to_value(&ji).unwrap();

        assert_eq!(
            v,
            json!({
                "name": "n",
                "gcodeId": "g1",
                "simulationSettings": {
                    "temperatureStabilizationHeight": 0.02,
                },
            })
        );
    }

    #[test]
    fn optimization_settings() {
        let input = JobInput {
            optimization: Some(OptimizationInput {
                priority: Some("QUALITY".into()),
                outer_wall: true,
                use_old_method: false,
                min_velocity: Some(50.0),
                max_velocity: None,
                min_volumetric_speed: None,
                max_volumetric_speed: Some(20.0),
                layers: Some(LayerRange { from: 1, to: 40 }),
            }),
            ..Default::default()
        };
        let ji = job_input(JobKind::Optimization, "n", "g1", &input);
        let v = serde_json::to_value(&ji).unwrap();
        let os = &v["optimizationSettings"];

        assert_eq!(os["printPriority"], "QUALITY");
        assert!(os.get("optimizeOuterwall").is_none());
        assert_eq!(os["minVelocity"], 0.05);
        assert!(os.get("maxVelocity").is_none());
        assert_eq!(os["maxExtruderFlowRate"], 0.00000002);
        assert_eq!(os["optimizer"], "HYBRID");
        assert_eq!(os["residualStrategySettings"]["strategy"], "LINEAR");
        assert_eq!(
            os["layersToOptimize"],
            json!([{ "fromLayer": 2, "toLayer": 40 }])
        );

        /*
         * The legacy switch replaces the priority outright.
         */
        let mut input = input;
        input.optimization.as_mut().unwrap().fall_back_to_old_method();
        let ji = job_input(JobKind::Optimization, "n", "g1", &input);
        let v = serde_json::to_value(&ji).unwrap();
        let os = &v["optimizationSettings"];
        assert_eq!(os["optimizeOuterwall"], true);
        assert!(os.get("printPriority").is_none());
    }

    #[test]
    fn simulation_progress() {
        let body = r#"{"data":{"simulation":{"id":"s1","name":"n",
            "progress":100,"status":"FINISHED",
            "thermalIndexGcodeUrl":"https://store/sim.gcode",
            "printInfo":{"printOutcome":"WILL_PRINT",
            "printOutcomeDescription":"looks fine","speedFactor":1.2,
            "suggestedFixes":[{"category":"COOLING","fix":"more fan",
            "extraDetails":["layer 3"]},{"category":"X"}]}}}}"#;
        let r = parse_envelope::<SimulationData>(200, None, body);
        let jp = JobProgress::from(r.outcome.unwrap().simulation.unwrap());

        assert!(jp.status.is_finished());
        assert_eq!(jp.url.as_deref(), Some("https://store/sim.gcode"));
        assert_eq!(jp.error(JobKind::Simulation), None);
        match jp.metrics.unwrap() {
            JobMetrics::Simulation(m) => {
                assert_eq!(m.outcome.as_deref(), Some("WILL_PRINT"));
                assert_eq!(m.speed_factor, Some(1.2));
                assert_eq!(m.suggested_fixes.len(), 1);
                assert_eq!(m.suggested_fixes[0].fix, "more fan");
            }
            other => panic!("unexpected metrics {other:?}"),
        }
    }

    #[test]
    fn failed_jobs_report_an_error() {
        let n = OptimizationNode {
            progress: Some(40.0),
            status: "FAILED".into(),
            optimized_gcode_with_thermal_indexes_url: Some("u".into()),
            quality_mean_improvement: None,
            quality_std_improvement: None,
        };
        let jp = JobProgress::from(n);
        assert_eq!(jp.url, None);
        assert_eq!(
            jp.error(JobKind::Optimization).as_deref(),
            Some("Helio optimization task failed")
        );
        assert!(jp.metrics.is_none());

        let mut status = JobStatus::new(10.0, RemoteState::Restricted);
        status.restrictions = vec!["quota".into(), "region".into()];
        let jp = JobProgress { status, url: None, metrics: None };
        assert_eq!(
            jp.error(JobKind::Simulation).as_deref(),
            Some("1. quota\n2. region")
        );
    }
}
