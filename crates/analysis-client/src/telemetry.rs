//! Tracing setup and span helpers
//!
//! ```text
//! analysis.run          (root, one per CLI run)
//!   ├─ analysis.upload  (media upload)
//!   └─ analysis.session (one lifecycle session)
//! ```

use tracing::Span;

/// Root span of one CLI run.
pub const SPAN_RUN: &str = "analysis.run";

/// Media upload.
pub const SPAN_UPLOAD: &str = "analysis.upload";

/// One lifecycle session, from submission to terminal event.
pub const SPAN_SESSION: &str = "analysis.session";

/// Install the fmt subscriber. `RUST_LOG` wins; otherwise `default_filter`.
pub fn init(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn run_span(api_url: &str) -> Span {
    tracing::info_span!("analysis.run", api.url = api_url)
}

pub fn upload_span(file: &str) -> Span {
    tracing::info_span!("analysis.upload", media.file = file)
}

/// Session span; `job.id` is recorded once the job is accepted.
pub fn session_span(device_id: &str, media_handle: &str) -> Span {
    tracing::info_span!(
        "analysis.session",
        device.id = device_id,
        media.handle = media_handle,
        job.id = tracing::field::Empty,
        session.outcome = tracing::field::Empty,
    )
}

pub fn record_job_id(span: &Span, job_id: &str) {
    span.record("job.id", job_id);
}

pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("session.outcome", outcome);
}
