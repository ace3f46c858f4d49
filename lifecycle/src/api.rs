//! Collaborator seams for the controller.
//!
//! The controller never talks HTTP itself. It drives a [`JobApi`] for the
//! job endpoints and a [`HealthProbe`] for the liveness check, so tests can
//! script both and deployments can swap the transport.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::types::{AnalysisResult, JobStatus, StartJobRequest, StartJobResponse};

/// Job endpoints of the analysis service.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Submit a new job.
    async fn start_job(&self, request: &StartJobRequest) -> Result<StartJobResponse, ApiError>;

    /// Fetch the current status of a job.
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus, ApiError>;

    /// Fetch the result of a completed job.
    async fn fetch_result(&self, job_id: &str) -> Result<AnalysisResult, ApiError>;
}

/// Liveness check against the service root.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `true` when the service answered with a success status.
    async fn is_alive(&self) -> bool;
}
