//! Client for the media analysis service
//!
//! - [`http::HttpJobClient`]: reqwest transport implementing the lifecycle
//!   controller's `JobApi` and `HealthProbe` seams, plus upload and config
//! - [`media`]: local file validation before upload
//! - [`report`] and [`export`]: text and CSV renderings of a result
//! - [`config::ClientConfig`]: environment-driven connection settings

pub mod config;
pub mod error;
pub mod export;
pub mod http;
pub mod media;
pub mod report;
pub mod telemetry;

pub use config::ClientConfig;
pub use error::ClientError;
pub use export::{default_file_name, export_csv, format_file_size, write_csv};
pub use http::{HttpJobClient, UploadedMedia};
pub use media::{inspect_media, MediaFile, MAX_MEDIA_BYTES};
pub use report::render_summary;
