//! Analysis job lifecycle
//!
//! Client-side controller for long-running media analysis jobs:
//! - Submits a job and polls its status on an adaptive schedule
//! - Tolerates transient failures within an error budget, then gates
//!   recovery behind a health probe
//! - Keeps the displayed progress moving with a synthetic trajectory that
//!   never runs backwards
//! - Publishes every change as a [`LifecycleEvent`] on a broadcast bus
//!
//! The transport is abstract: implement [`JobApi`] and [`HealthProbe`] for
//! the service you talk to.

pub mod api;
pub mod budget;
pub mod controller;
pub mod error;
pub mod events;
pub mod progress;
pub mod scheduler;
pub mod session;
pub mod ticker;
pub mod types;

pub use api::{HealthProbe, JobApi};
pub use budget::{BudgetLimits, ErrorBudgetTracker, FailureClass};
pub use controller::JobLifecycleController;
pub use error::{ApiError, ApiErrorKind, LifecycleError, LifecycleResult};
pub use events::{EventBus, Generation, LifecycleEvent, SessionReceiver, SharedEventBus};
pub use progress::{merge_progress, ProgressSimulator};
pub use scheduler::{PollPolicy, PollScheduler};
pub use session::{JobSession, LifecycleState, SessionSnapshot};
pub use ticker::{format_elapsed, LogTicker, SessionLog};
pub use types::{
    ActionStep, AnalysisResult, JobStatus, JobStatusKind, ModelInfo, ResultSummary, ServerConfig,
    StartJobRequest, StartJobResponse, StepOutcome, VideoInfo,
};
