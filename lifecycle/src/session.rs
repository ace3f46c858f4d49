//! Job session: lifecycle states, legal transitions and the per-session record.
//!
//! A [`JobSession`] is the only stateful entity of the controller. Every
//! mutation goes through one of its methods, which validate the transition,
//! update counters and push the resulting [`LifecycleEvent`]s into a
//! caller-supplied buffer. The caller decides whether the session is still
//! current before publishing them.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::budget::{ErrorBudgetTracker, FailureClass, FailureVerdict};
use crate::error::{ApiError, LifecycleError};
use crate::events::{Generation, LifecycleEvent};
use crate::progress::{is_initialization_stage, merge_progress, ProgressSimulator};
use crate::scheduler::{PollDecision, PollPolicy, PollScheduler};
use crate::ticker::{started_line, LogTicker, SessionLog};
use crate::types::{AnalysisResult, JobStatus, JobStatusKind, StartJobResponse};

/// Controller lifecycle states.
///
/// `Idle` and `Ready` exist before any session; a session starts at
/// `Starting` and ends at one of the three terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Nothing selected.
    Idle,
    /// Device and media handle selected; `start` may be called.
    Ready,
    /// Start request in flight.
    Starting,
    /// Job accepted; status polling and both tickers running.
    Polling,
    /// Result fetched. Terminal.
    Completed,
    /// Any unrecoverable error. Terminal.
    Failed,
    /// Wall-clock ceiling exceeded. Terminal.
    TimedOut,
}

impl LifecycleState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Ready => write!(f, "Ready"),
            Self::Starting => write!(f, "Starting"),
            Self::Polling => write!(f, "Polling"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// Legal transitions inside one session:
/// ```text
/// Starting → Polling | Failed
/// Polling  → Completed | Failed | TimedOut
/// ```
/// `Idle`/`Ready` → `Starting` and anything → `Idle` belong to the
/// controller: they create or discard sessions rather than move one.
fn is_legal_transition(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::*;

    matches!(
        (from, to),
        (Starting, Polling)
            | (Starting, Failed)
            | (Polling, Completed)
            | (Polling, Failed)
            | (Polling, TimedOut)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: LifecycleState,
    pub to: LifecycleState,
    /// Milliseconds since the session was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// What the poll loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep {
    /// Issue the next status request after this delay.
    PollAfter(Duration),
    /// Run the health probe.
    ProbeHealth,
    /// The job completed; stop the tickers and fetch the result once.
    FetchResult,
    /// The session reached a terminal state.
    Finished,
}

/// Point-in-time view of a session for the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub generation: Generation,
    pub state: LifecycleState,
    pub device_id: Option<String>,
    pub media_handle: Option<String>,
    pub job_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub displayed_progress: u8,
    pub stage: String,
    pub consecutive_errors: u32,
    pub health_fail_count: u32,
    pub current_poll_interval_ms: u64,
    pub network_advisory: bool,
    pub log: Vec<String>,
    pub transitions: Vec<TransitionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Client-side record of one job from submission to terminal outcome.
#[derive(Debug)]
pub struct JobSession {
    generation: Generation,
    device_id: String,
    media_handle: String,
    job_id: Option<String>,
    state: LifecycleState,
    started_at: DateTime<Utc>,
    created_at: Instant,
    first_poll_at: Option<Instant>,
    displayed_progress: u8,
    stage: String,
    budget: ErrorBudgetTracker,
    scheduler: PollScheduler,
    simulator: ProgressSimulator,
    ticker: LogTicker,
    log: SessionLog,
    transitions: Vec<TransitionRecord>,
    error: Option<LifecycleError>,
}

impl JobSession {
    /// Create a session in `Starting`, coming from the controller state `from`.
    pub fn new(
        generation: Generation,
        device_id: impl Into<String>,
        media_handle: impl Into<String>,
        policy: &PollPolicy,
        from: LifecycleState,
    ) -> Self {
        let created_at = Instant::now();
        Self {
            generation,
            device_id: device_id.into(),
            media_handle: media_handle.into(),
            job_id: None,
            state: LifecycleState::Starting,
            started_at: Utc::now(),
            created_at,
            first_poll_at: None,
            displayed_progress: 0,
            stage: crate::progress::PROCESSING_STAGE.to_string(),
            budget: ErrorBudgetTracker::new(policy.budget),
            scheduler: PollScheduler::new(policy.clone()),
            simulator: ProgressSimulator::new(policy.progress_ceiling),
            ticker: LogTicker::new(),
            log: SessionLog::new(),
            transitions: vec![TransitionRecord {
                from,
                to: LifecycleState::Starting,
                elapsed_ms: 0,
                reason: None,
            }],
            error: None,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn media_handle(&self) -> &str {
        &self.media_handle
    }

    pub fn displayed_progress(&self) -> u8 {
        self.displayed_progress
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.budget.consecutive_errors()
    }

    pub fn health_fail_count(&self) -> u32 {
        self.budget.health_fail_count()
    }

    pub fn current_poll_interval(&self) -> Duration {
        self.scheduler.current_interval()
    }

    pub fn network_advisory(&self) -> bool {
        self.budget.advisory()
    }

    pub fn log(&self) -> &SessionLog {
        &self.log
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn error(&self) -> Option<&LifecycleError> {
        self.error.as_ref()
    }

    /// Time since submission.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            generation: self.generation,
            state: self.state,
            device_id: Some(self.device_id.clone()),
            media_handle: Some(self.media_handle.clone()),
            job_id: self.job_id.clone(),
            started_at: Some(self.started_at),
            displayed_progress: self.displayed_progress,
            stage: self.stage.clone(),
            consecutive_errors: self.budget.consecutive_errors(),
            health_fail_count: self.budget.health_fail_count(),
            current_poll_interval_ms: self.scheduler.current_interval().as_millis() as u64,
            network_advisory: self.budget.advisory(),
            log: self.log.lines(),
            transitions: self.transitions.clone(),
            error: self.error.as_ref().map(|e| e.to_string()),
        }
    }

    /// Attempt to advance to the next state.
    pub fn advance(
        &mut self,
        to: LifecycleState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.state, to) {
            return Err(IllegalTransition {
                from: self.state,
                to,
            });
        }
        let record = TransitionRecord {
            from: self.state,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };
        info!(
            generation = self.generation,
            from = %self.state,
            to = %to,
            reason = reason.unwrap_or(""),
            "Session transition"
        );
        self.transitions.push(record);
        self.state = to;
        Ok(())
    }

    /// The start request succeeded: record the job id and enter `Polling`.
    ///
    /// Legal only from `Starting`, so the job id is assigned exactly once.
    pub fn enter_polling(
        &mut self,
        response: &StartJobResponse,
        out: &mut Vec<LifecycleEvent>,
    ) -> Result<(), IllegalTransition> {
        self.advance(LifecycleState::Polling, None)?;
        self.job_id = Some(response.job_id.clone());
        self.first_poll_at = Some(Instant::now());
        self.displayed_progress = 0;

        out.push(LifecycleEvent::SessionStarted {
            generation: self.generation,
            job_id: response.job_id.clone(),
            estimated_time: response.estimated_time,
            timestamp: Utc::now(),
        });
        let line = started_line(self.started_at);
        self.append_log(line, out);
        Ok(())
    }

    /// The start request failed.
    pub fn fail_start(&mut self, err: ApiError, out: &mut Vec<LifecycleEvent>) -> LifecycleError {
        let error = LifecycleError::StartFailed(err);
        self.fail(error.clone(), out);
        error
    }

    /// Session ceiling check, run before every poll. Enters `TimedOut` when
    /// the ceiling has passed.
    pub fn check_expired(&mut self, out: &mut Vec<LifecycleEvent>) -> bool {
        let Some(first_poll_at) = self.first_poll_at else {
            return false;
        };
        if !self.scheduler.is_expired(first_poll_at.elapsed()) {
            return false;
        }
        let error = LifecycleError::SessionTimeout {
            minutes: self.scheduler.timeout_minutes(),
        };
        let reason = error.to_string();
        if let Err(e) = self.advance(LifecycleState::TimedOut, Some(reason.as_str())) {
            warn!(generation = self.generation, "{}", e);
            return false;
        }
        self.clear_advisory(out);
        self.error = Some(error);
        out.push(LifecycleEvent::TimedOut {
            generation: self.generation,
            reason,
            timestamp: Utc::now(),
        });
        true
    }

    /// Apply the outcome of one status request.
    pub fn observe_status(
        &mut self,
        outcome: Result<JobStatus, ApiError>,
        out: &mut Vec<LifecycleEvent>,
    ) -> PollStep {
        match outcome {
            Ok(status) => self.observe_success(status, out),
            Err(err) => self.observe_failure(err, out),
        }
    }

    fn observe_success(&mut self, status: JobStatus, out: &mut Vec<LifecycleEvent>) -> PollStep {
        self.clear_advisory(out);
        self.budget.record_success();
        let next = self.scheduler.on_success();

        let merged = merge_progress(self.displayed_progress, status.percent());
        let stage_changed = !status.current_stage.is_empty()
            && !is_initialization_stage(&status.current_stage)
            && status.current_stage != self.stage;
        if stage_changed {
            self.stage = status.current_stage.clone();
        }
        if merged != self.displayed_progress || stage_changed {
            self.displayed_progress = merged;
            self.push_progress(out);
        }

        for line in self.log.merge_server_lines(&status.logs) {
            out.push(LifecycleEvent::LogAppended {
                generation: self.generation,
                line,
                timestamp: Utc::now(),
            });
        }

        match status.status {
            JobStatusKind::Completed => PollStep::FetchResult,
            JobStatusKind::Error => {
                let reason = status
                    .error
                    .filter(|r| !r.trim().is_empty())
                    .unwrap_or_else(|| "unknown error".to_string());
                self.fail(LifecycleError::JobFailed { reason }, out);
                PollStep::Finished
            }
            JobStatusKind::Running | JobStatusKind::Unknown => PollStep::PollAfter(next),
        }
    }

    fn observe_failure(&mut self, err: ApiError, out: &mut Vec<LifecycleEvent>) -> PollStep {
        let job_id = self.job_id.clone().unwrap_or_default();
        let classified = LifecycleError::from_poll_failure(err, &job_id);
        let class = match &classified {
            LifecycleError::TimeoutClassified(_) => FailureClass::Timeout,
            LifecycleError::TransientNetwork(_) => FailureClass::Transient,
            _ => {
                self.fail(classified, out);
                return PollStep::Finished;
            }
        };

        let advisory_before = self.budget.advisory();
        let verdict = self.budget.record_failure(class);
        debug!(
            generation = self.generation,
            consecutive_errors = self.budget.consecutive_errors(),
            error = %classified,
            "Status poll failed"
        );
        if self.budget.advisory() && !advisory_before {
            warn!(
                generation = self.generation,
                consecutive_errors = self.budget.consecutive_errors(),
                "Network unstable, retrying automatically"
            );
            out.push(LifecycleEvent::NetworkAdvisory {
                generation: self.generation,
                active: true,
                timestamp: Utc::now(),
            });
        }
        if verdict == FailureVerdict::ProbeHealth {
            info!(
                generation = self.generation,
                consecutive_errors = self.budget.consecutive_errors(),
                budget = self.budget.limits().budget_for(class),
                "Error budget exhausted, probing server health"
            );
        }
        let decision = self.scheduler.on_failure(verdict);
        self.apply_decision(decision, out)
    }

    /// Apply the outcome of a health probe.
    pub fn observe_probe(&mut self, alive: bool, out: &mut Vec<LifecycleEvent>) -> PollStep {
        let verdict = self.budget.record_probe(alive);
        out.push(LifecycleEvent::HealthChecked {
            generation: self.generation,
            alive,
            health_fail_count: self.budget.health_fail_count(),
            timestamp: Utc::now(),
        });
        if alive {
            info!(generation = self.generation, "Health check passed, polling slowly");
        } else {
            warn!(
                generation = self.generation,
                health_fail_count = self.budget.health_fail_count(),
                budget = self.budget.limits().health_fail_budget,
                "Health check failed"
            );
        }
        let decision = self.scheduler.on_probe(verdict);
        self.apply_decision(decision, out)
    }

    fn apply_decision(&mut self, decision: PollDecision, out: &mut Vec<LifecycleEvent>) -> PollStep {
        match decision {
            PollDecision::PollAfter(delay) => PollStep::PollAfter(delay),
            PollDecision::ProbeHealth => PollStep::ProbeHealth,
            PollDecision::Stop(error) => {
                self.fail(error, out);
                PollStep::Finished
            }
        }
    }

    /// One synthetic progress tick. No-op outside `Polling`.
    pub fn simulate_progress(&mut self, out: &mut Vec<LifecycleEvent>) {
        if self.state != LifecycleState::Polling {
            return;
        }
        if let Some(update) = self.simulator.tick(self.displayed_progress, &self.stage) {
            self.displayed_progress = update.displayed;
            if let Some(stage) = update.stage {
                self.stage = stage.to_string();
            }
            self.push_progress(out);
        }
    }

    /// One elapsed-time log tick. No-op outside `Polling`.
    pub fn log_elapsed(&mut self, out: &mut Vec<LifecycleEvent>) {
        if self.state != LifecycleState::Polling {
            return;
        }
        let line = self.ticker.tick(self.elapsed());
        self.append_log(line, out);
    }

    /// The result was fetched after a `completed` status.
    pub fn complete(&mut self, result: AnalysisResult, out: &mut Vec<LifecycleEvent>) {
        if let Err(e) = self.advance(LifecycleState::Completed, None) {
            warn!(generation = self.generation, "{}", e);
            return;
        }
        self.clear_advisory(out);
        out.push(LifecycleEvent::Completed {
            generation: self.generation,
            result: Box::new(result),
            timestamp: Utc::now(),
        });
    }

    /// Enter `Failed` with `error`.
    pub fn fail(&mut self, error: LifecycleError, out: &mut Vec<LifecycleEvent>) {
        let reason = error.to_string();
        if let Err(e) = self.advance(LifecycleState::Failed, Some(error.code())) {
            warn!(generation = self.generation, "{}", e);
            return;
        }
        self.clear_advisory(out);
        out.push(LifecycleEvent::Failed {
            generation: self.generation,
            code: error.code().to_string(),
            reason,
            timestamp: Utc::now(),
        });
        self.error = Some(error);
    }

    fn append_log(&mut self, line: String, out: &mut Vec<LifecycleEvent>) {
        self.log.append(line.clone());
        out.push(LifecycleEvent::LogAppended {
            generation: self.generation,
            line,
            timestamp: Utc::now(),
        });
    }

    fn push_progress(&self, out: &mut Vec<LifecycleEvent>) {
        out.push(LifecycleEvent::ProgressUpdated {
            generation: self.generation,
            progress: self.displayed_progress,
            stage: self.stage.clone(),
            timestamp: Utc::now(),
        });
    }

    fn clear_advisory(&mut self, out: &mut Vec<LifecycleEvent>) {
        if !self.budget.clear_advisory() {
            return;
        }
        out.push(LifecycleEvent::NetworkAdvisory {
            generation: self.generation,
            active: false,
            timestamp: Utc::now(),
        });
    }
}
