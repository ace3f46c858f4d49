//! Wire types exchanged with the analysis service.
//!
//! Field names follow the service's JSON: request and result payloads are
//! camelCase, while the status response uses `current_stage`.

use serde::{Deserialize, Serialize};

/// Body of the start-job request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobRequest {
    /// Handle of the previously uploaded media file.
    #[serde(rename = "videoId")]
    pub media_handle: String,
    /// Device the recording was made with.
    #[serde(rename = "deviceType")]
    pub device_id: String,
    pub save_individual_report: bool,
}

/// Response to a successful start-job request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobResponse {
    #[serde(rename = "analysisId")]
    pub job_id: String,
    /// Server's estimate in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<f64>,
}

/// Coarse status of a server-side job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatusKind {
    #[serde(alias = "pending", alias = "processing")]
    Running,
    Completed,
    Error,
    /// Anything the service adds later is treated as still running.
    #[serde(other)]
    Unknown,
}

impl JobStatusKind {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Unknown)
    }
}

/// One status observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub status: JobStatusKind,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub current_stage: String,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobStatus {
    /// Progress as a whole percentage clamped to 0..=100.
    pub fn percent(&self) -> u8 {
        if self.progress.is_nan() {
            return 0;
        }
        self.progress.clamp(0.0, 100.0).floor() as u8
    }
}

/// Outcome of one action step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Pass,
    #[default]
    #[serde(other)]
    Fail,
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Metadata of the analysed recording.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoInfo {
    pub file_name: String,
    /// Seconds.
    pub duration: f64,
    /// Bytes; zero when the server does not know.
    pub size: u64,
    pub resolution: String,
    pub width: u32,
    pub height: u32,
    pub frame_count: u64,
}

/// A single evaluated action step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionStep {
    pub id: String,
    pub order: u32,
    pub name: String,
    pub description: String,
    /// Detection times in seconds.
    pub time: Vec<f64>,
    pub score: Vec<i64>,
    /// `(time, confidence)` pairs, confidence in 0.0..=1.0.
    pub confidence_score: Vec<(f64, f64)>,
    pub result: StepOutcome,
}

/// Aggregate step counts.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResultSummary {
    pub total_steps: u32,
    pub passed_steps: u32,
    pub failed_steps: u32,
    /// Percentage of passed steps.
    pub score: f64,
}

/// Which models produced the result and how long it took.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelInfo {
    pub models: Vec<String>,
    /// Seconds as reported by the server.
    pub analysis_time: f64,
}

/// Final result payload of a completed job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisResult {
    pub status: String,
    pub device_type: Option<String>,
    pub video_info: Option<VideoInfo>,
    pub action_steps: Vec<ActionStep>,
    pub summary: Option<ResultSummary>,
    pub model_info: Option<ModelInfo>,
    pub errors: Vec<String>,
    pub final_summary: Option<String>,
    pub individual_html_paths: Vec<String>,
}

/// Server-side configuration exposed to clients.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub llm_models: Vec<String>,
    pub version: String,
}
