//! HTTP transport for the analysis service
//!
//! Implements [`JobApi`] and [`HealthProbe`] over reqwest. Failures are
//! classified from the HTTP status and the reqwest error kind, so the
//! controller receives an [`ApiErrorKind`] instead of a message to parse.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use analysis_lifecycle::{
    AnalysisResult, ApiError, ApiErrorKind, HealthProbe, JobApi, JobStatus, ServerConfig,
    StartJobRequest, StartJobResponse,
};
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::media::inspect_media;

/// Uploads can be large; they get their own timeout.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Longest error detail carried into an [`ApiError`] message.
const MAX_DETAIL_CHARS: usize = 200;

/// Service endpoints, used to interpret error statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Upload,
    Start,
    Status,
    Result,
    Download,
    Config,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Start => write!(f, "start"),
            Self::Status => write!(f, "status"),
            Self::Result => write!(f, "result"),
            Self::Download => write!(f, "download"),
            Self::Config => write!(f, "config"),
        }
    }
}

/// Server-side metadata of an uploaded file.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadMetadata {
    pub file_name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: Option<String>,
}

/// Response to a media upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedMedia {
    /// Media handle to pass to `start`.
    #[serde(rename = "videoId")]
    pub media_handle: String,
    #[serde(default)]
    pub metadata: UploadMetadata,
}

/// reqwest-backed client for the analysis service
#[derive(Debug, Clone)]
pub struct HttpJobClient {
    config: ClientConfig,
    http: reqwest::Client,
}

impl HttpJobClient {
    /// Create a client
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::HttpClient(e.to_string()))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Validate and upload a media file. Returns the server's media handle.
    pub async fn upload_media(
        &self,
        path: &Path,
        device_id: Option<&str>,
    ) -> Result<UploadedMedia, ClientError> {
        let media = inspect_media(path).await?;
        info!(
            file = %media.file_name,
            size = media.size,
            "Uploading media file"
        );
        let file = tokio::fs::File::open(&media.path).await?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = reqwest::multipart::Part::stream_with_length(body, media.size)
            .file_name(media.file_name.clone())
            .mime_str(media.mime)
            .map_err(|e| ClientError::HttpClient(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut request = self
            .http
            .post(self.config.endpoint("/api/video/upload"))
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form);
        if let Some(device_id) = device_id {
            request = request.query(&[("deviceType", device_id)]);
        }
        let uploaded: UploadedMedia = self.read_json(Route::Upload, request).await?;
        info!(media_handle = %uploaded.media_handle, "Media uploaded");
        Ok(uploaded)
    }

    /// Fetch the server's model list and version.
    pub async fn fetch_server_config(&self) -> Result<ServerConfig, ApiError> {
        let request = self.http.get(self.config.endpoint("/api/config"));
        self.read_json(Route::Config, request).await
    }

    /// Download the stored result file of a completed job.
    ///
    /// The service only knows the `json` format; anything else comes back as
    /// a 400 from the server.
    pub async fn download_result(&self, job_id: &str, format: &str) -> Result<Vec<u8>, ApiError> {
        let request = self
            .http
            .get(self.config.endpoint(&format!("/api/analysis/download/{}", job_id)))
            .query(&[("format", format)]);
        self.read_bytes(Route::Download, request).await
    }

    /// One liveness check against the service root.
    ///
    /// The timeout covers headers and body so a hung server counts as dead.
    pub async fn check_health(&self) -> Result<(), ApiError> {
        let url = self.config.endpoint("/");
        let probe = async {
            let response = self
                .http
                .get(&url)
                .timeout(self.config.health_timeout)
                .send()
                .await
                .map_err(transport_error)?;
            let status = response.status();
            // Read body to ensure server is fully responsive, not just accepting connections
            response.bytes().await.map_err(transport_error)?;
            if !status.is_success() {
                return Err(ApiError::new(
                    ApiErrorKind::Server(status.as_u16()),
                    format!("health check returned {}", status),
                ));
            }
            Ok::<(), ApiError>(())
        };
        match tokio::time::timeout(self.config.health_timeout, probe).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ApiError::timeout("health check timed out")),
        }
    }

    async fn read_bytes(
        &self,
        route: Route,
        request: RequestBuilder,
    ) -> Result<Vec<u8>, ApiError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.bytes().await.map_err(transport_error)?;
        debug!(route = %route, status = status.as_u16(), bytes = body.len(), "Response received");

        if !status.is_success() {
            return Err(status_error(route, status, &body));
        }
        Ok(Vec::from(body))
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        route: Route,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        let body = self.read_bytes(route, request).await?;
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::protocol(format!("invalid {} response: {}", route, e)))
    }
}

#[async_trait]
impl JobApi for HttpJobClient {
    async fn start_job(&self, request: &StartJobRequest) -> Result<StartJobResponse, ApiError> {
        let builder = self
            .http
            .post(self.config.endpoint("/api/analysis/start"))
            .json(request);
        self.read_json(Route::Start, builder).await
    }

    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus, ApiError> {
        let builder = self
            .http
            .get(self.config.endpoint(&format!("/api/analysis/status/{}", job_id)));
        self.read_json(Route::Status, builder).await
    }

    async fn fetch_result(&self, job_id: &str) -> Result<AnalysisResult, ApiError> {
        let builder = self
            .http
            .get(self.config.endpoint(&format!("/api/analysis/result/{}", job_id)));
        self.read_json(Route::Result, builder).await
    }
}

#[async_trait]
impl HealthProbe for HttpJobClient {
    async fn is_alive(&self) -> bool {
        match self.check_health().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Health probe failed");
                false
            }
        }
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    let kind = if err.is_timeout() {
        ApiErrorKind::Timeout
    } else if err.is_decode() {
        ApiErrorKind::Protocol
    } else {
        ApiErrorKind::Network
    };
    ApiError::new(kind, err.to_string())
}

fn status_error(route: Route, status: StatusCode, body: &[u8]) -> ApiError {
    let kind = match (route, status) {
        (_, StatusCode::NOT_FOUND) => ApiErrorKind::NotFound,
        (Route::Result | Route::Download, StatusCode::BAD_REQUEST) => ApiErrorKind::NotReady,
        (Route::Result, StatusCode::INTERNAL_SERVER_ERROR) => ApiErrorKind::NoResult,
        (_, other) => ApiErrorKind::Server(other.as_u16()),
    };
    ApiError::new(
        kind,
        format!("{} request returned {}: {}", route, status.as_u16(), error_detail(body)),
    )
}

/// Extract a readable detail from an error body.
fn error_detail(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct Detail {
        detail: serde_json::Value,
    }

    let text = match serde_json::from_slice::<Detail>(body) {
        Ok(Detail {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(Detail { detail }) => detail.to_string(),
        Err(_) => String::from_utf8_lossy(body).trim().to_string(),
    };
    if text.chars().count() > MAX_DETAIL_CHARS {
        let truncated: String = text.chars().take(MAX_DETAIL_CHARS).collect();
        format!("{}...", truncated)
    } else {
        text
    }
}
