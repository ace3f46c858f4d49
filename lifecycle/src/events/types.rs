//! Lifecycle events published to the presentation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AnalysisResult;

/// Session generation number. Increases on every `start` and `reset`.
pub type Generation = u64;

/// All lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// The job was accepted and polling began
    SessionStarted {
        generation: Generation,
        job_id: String,
        estimated_time: Option<f64>,
        timestamp: DateTime<Utc>,
    },

    /// Displayed progress or stage changed
    ProgressUpdated {
        generation: Generation,
        progress: u8,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// A line was appended to the session log
    LogAppended {
        generation: Generation,
        line: String,
        timestamp: DateTime<Utc>,
    },

    /// The "network unstable" advisory was raised or cleared
    NetworkAdvisory {
        generation: Generation,
        active: bool,
        timestamp: DateTime<Utc>,
    },

    /// A health probe ran after the error budget was used up
    HealthChecked {
        generation: Generation,
        alive: bool,
        health_fail_count: u32,
        timestamp: DateTime<Utc>,
    },

    /// The job finished and its result was fetched
    Completed {
        generation: Generation,
        result: Box<AnalysisResult>,
        timestamp: DateTime<Utc>,
    },

    /// The session ended with an error
    Failed {
        generation: Generation,
        code: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The session ran past its wall-clock ceiling
    TimedOut {
        generation: Generation,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The caller discarded the session
    Reset {
        generation: Generation,
        timestamp: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            LifecycleEvent::SessionStarted { timestamp, .. } => *timestamp,
            LifecycleEvent::ProgressUpdated { timestamp, .. } => *timestamp,
            LifecycleEvent::LogAppended { timestamp, .. } => *timestamp,
            LifecycleEvent::NetworkAdvisory { timestamp, .. } => *timestamp,
            LifecycleEvent::HealthChecked { timestamp, .. } => *timestamp,
            LifecycleEvent::Completed { timestamp, .. } => *timestamp,
            LifecycleEvent::Failed { timestamp, .. } => *timestamp,
            LifecycleEvent::TimedOut { timestamp, .. } => *timestamp,
            LifecycleEvent::Reset { timestamp, .. } => *timestamp,
        }
    }

    /// Generation of the session that produced this event
    pub fn generation(&self) -> Generation {
        match self {
            LifecycleEvent::SessionStarted { generation, .. } => *generation,
            LifecycleEvent::ProgressUpdated { generation, .. } => *generation,
            LifecycleEvent::LogAppended { generation, .. } => *generation,
            LifecycleEvent::NetworkAdvisory { generation, .. } => *generation,
            LifecycleEvent::HealthChecked { generation, .. } => *generation,
            LifecycleEvent::Completed { generation, .. } => *generation,
            LifecycleEvent::Failed { generation, .. } => *generation,
            LifecycleEvent::TimedOut { generation, .. } => *generation,
            LifecycleEvent::Reset { generation, .. } => *generation,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::SessionStarted { .. } => "session_started",
            LifecycleEvent::ProgressUpdated { .. } => "progress_updated",
            LifecycleEvent::LogAppended { .. } => "log_appended",
            LifecycleEvent::NetworkAdvisory { .. } => "network_advisory",
            LifecycleEvent::HealthChecked { .. } => "health_checked",
            LifecycleEvent::Completed { .. } => "completed",
            LifecycleEvent::Failed { .. } => "failed",
            LifecycleEvent::TimedOut { .. } => "timed_out",
            LifecycleEvent::Reset { .. } => "reset",
        }
    }

    /// Whether this event ends its session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::Completed { .. }
                | LifecycleEvent::Failed { .. }
                | LifecycleEvent::TimedOut { .. }
        )
    }

    /// Whether no further events of this generation follow.
    pub fn ends_session(&self) -> bool {
        self.is_terminal() || matches!(self, LifecycleEvent::Reset { .. })
    }
}
