//! Job lifecycle controller.
//!
//! Owns at most one [`JobSession`] and drives it from a single spawned task.
//! That task multiplexes the poll timer, the in-flight request, the progress
//! tick and the log tick in one `select!` loop, so the three activities never
//! run at the same time and at most one request is outstanding.
//!
//! Every mutation goes through [`SessionHandle::update`], which checks the
//! session's cancellation token and generation under the session lock. A
//! callback that fires after `reset` (or after a newer `start`) sees the stale
//! generation and does nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, OptionFuture};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{HealthProbe, JobApi};
use crate::error::{ApiError, LifecycleError, LifecycleResult};
use crate::events::{EventBus, Generation, LifecycleEvent, SessionReceiver, SharedEventBus};
use crate::scheduler::PollPolicy;
use crate::session::{JobSession, LifecycleState, PollStep, SessionSnapshot};
use crate::types::{JobStatus, StartJobRequest};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared handle to one session, held by the controller and its driver.
#[derive(Clone)]
struct SessionHandle {
    session: Arc<Mutex<JobSession>>,
    generation: Generation,
    current: Arc<AtomicU64>,
    token: CancellationToken,
    bus: SharedEventBus,
}

impl SessionHandle {
    fn new(session: JobSession, current: Arc<AtomicU64>, bus: SharedEventBus) -> Self {
        Self {
            generation: session.generation(),
            session: Arc::new(Mutex::new(session)),
            current,
            token: CancellationToken::new(),
            bus,
        }
    }

    fn is_live(&self) -> bool {
        !self.token.is_cancelled() && self.current.load(Ordering::SeqCst) == self.generation
    }

    /// Mutate the session if it is still current, then publish the events the
    /// mutation produced. Returns `None` for a stale session.
    ///
    /// Publication happens under the session lock, so a concurrent `reset`
    /// either runs before (and the update is skipped) or after every event
    /// of this update is out.
    fn update<R>(
        &self,
        apply: impl FnOnce(&mut JobSession, &mut Vec<LifecycleEvent>) -> R,
    ) -> Option<R> {
        let mut session = lock(&self.session);
        if !self.is_live() {
            debug!(generation = self.generation, "Ignoring callback of stale session");
            return None;
        }
        let mut events = Vec::new();
        let result = apply(&mut session, &mut events);
        for event in events {
            self.bus.publish(event);
        }
        if session.state().is_terminal() {
            self.token.cancel();
        }
        Some(result)
    }

    fn snapshot(&self) -> SessionSnapshot {
        lock(&self.session).snapshot()
    }

    fn state(&self) -> LifecycleState {
        lock(&self.session).state()
    }
}

#[derive(Default)]
struct ControllerInner {
    device_id: Option<String>,
    media_handle: Option<String>,
    session: Option<SessionHandle>,
    driver: Option<JoinHandle<()>>,
}

/// Top-level state machine for one analysis job at a time.
///
/// ```text
/// Idle → Ready → Starting → Polling → { Completed | Failed | TimedOut }
///   ▲                                             │
///   └──────────────────── reset ──────────────────┘
/// ```
pub struct JobLifecycleController {
    api: Arc<dyn JobApi>,
    probe: Arc<dyn HealthProbe>,
    policy: PollPolicy,
    bus: SharedEventBus,
    save_individual_report: bool,
    generation: Arc<AtomicU64>,
    inner: Mutex<ControllerInner>,
}

impl JobLifecycleController {
    pub fn new(api: Arc<dyn JobApi>, probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            api,
            probe,
            policy: PollPolicy::default(),
            bus: EventBus::new().shared(),
            save_individual_report: true,
            generation: Arc::new(AtomicU64::new(0)),
            inner: Mutex::new(ControllerInner::default()),
        }
    }

    pub fn with_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = bus;
        self
    }

    /// Whether the server should also write per-step HTML reports.
    pub fn with_individual_report(mut self, enabled: bool) -> Self {
        self.save_individual_report = enabled;
        self
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    pub fn event_bus(&self) -> SharedEventBus {
        Arc::clone(&self.bus)
    }

    /// Subscribe to every lifecycle event.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.bus.subscribe()
    }

    /// Wrap an earlier subscription so it only yields the current session.
    pub fn session_events(&self, receiver: broadcast::Receiver<LifecycleEvent>) -> SessionReceiver {
        SessionReceiver::new(receiver, self.current_generation())
    }

    pub fn current_generation(&self) -> Generation {
        self.generation.load(Ordering::SeqCst)
    }

    /// Record the caller's device and media selection.
    pub fn select(&self, device_id: Option<&str>, media_handle: Option<&str>) -> LifecycleState {
        let mut inner = lock(&self.inner);
        inner.device_id = non_empty(device_id).map(String::from);
        inner.media_handle = non_empty(media_handle).map(String::from);
        let state = Self::state_of(&inner);
        debug!(state = %state, "Selection updated");
        state
    }

    pub fn state(&self) -> LifecycleState {
        Self::state_of(&lock(&self.inner))
    }

    fn state_of(inner: &ControllerInner) -> LifecycleState {
        match &inner.session {
            Some(handle) => handle.state(),
            None if inner.device_id.is_some() && inner.media_handle.is_some() => {
                LifecycleState::Ready
            }
            None => LifecycleState::Idle,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = lock(&self.inner);
        if let Some(handle) = &inner.session {
            return handle.snapshot();
        }
        SessionSnapshot {
            generation: self.current_generation(),
            state: Self::state_of(&inner),
            device_id: inner.device_id.clone(),
            media_handle: inner.media_handle.clone(),
            job_id: None,
            started_at: None,
            displayed_progress: 0,
            stage: String::new(),
            consecutive_errors: 0,
            health_fail_count: 0,
            current_poll_interval_ms: self.policy.normal_interval.as_millis() as u64,
            network_advisory: false,
            log: Vec::new(),
            transitions: Vec::new(),
            error: None,
        }
    }

    /// Start the selected job.
    pub async fn start_selected(&self) -> LifecycleResult<String> {
        let (device_id, media_handle) = {
            let inner = lock(&self.inner);
            (inner.device_id.clone(), inner.media_handle.clone())
        };
        self.start(device_id.as_deref(), media_handle.as_deref()).await
    }

    /// Submit a job and begin polling it.
    ///
    /// Any previous session is discarded first. Returns the server's job id
    /// once the job is accepted; polling continues in the background and its
    /// outcome arrives on the event stream.
    pub async fn start(
        &self,
        device_id: Option<&str>,
        media_handle: Option<&str>,
    ) -> LifecycleResult<String> {
        let device_id = non_empty(device_id).ok_or(LifecycleError::Precondition { missing: "device" })?;
        let media_handle = non_empty(media_handle).ok_or(LifecycleError::Precondition {
            missing: "media handle",
        })?;

        let handle = {
            let mut inner = lock(&self.inner);
            let from = match Self::state_of(&inner) {
                LifecycleState::Idle => LifecycleState::Idle,
                _ => LifecycleState::Ready,
            };
            self.discard_session(&mut inner);
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let session = JobSession::new(generation, device_id, media_handle, &self.policy, from);
            let handle = SessionHandle::new(session, Arc::clone(&self.generation), Arc::clone(&self.bus));
            inner.device_id = Some(device_id.to_string());
            inner.media_handle = Some(media_handle.to_string());
            inner.session = Some(handle.clone());
            handle
        };

        info!(
            generation = handle.generation,
            device_id,
            media_handle,
            "Submitting analysis job"
        );
        let request = StartJobRequest {
            media_handle: media_handle.to_string(),
            device_id: device_id.to_string(),
            save_individual_report: self.save_individual_report,
        };
        let outcome = tokio::select! {
            biased;
            _ = handle.token.cancelled() => return Err(LifecycleError::Superseded),
            outcome = self.api.start_job(&request) => outcome,
        };

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                warn!(generation = handle.generation, error = %err, "Start request failed");
                return Err(handle
                    .update(|session, out| session.fail_start(err, out))
                    .unwrap_or(LifecycleError::Superseded));
            }
        };

        match handle.update(|session, out| session.enter_polling(&response, out)) {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!(generation = handle.generation, "{}", e);
                return Err(LifecycleError::Superseded);
            }
            None => return Err(LifecycleError::Superseded),
        }
        info!(
            generation = handle.generation,
            job_id = %response.job_id,
            estimated_time = response.estimated_time,
            "Analysis job accepted, polling"
        );

        let driver = tokio::spawn(drive(
            handle.clone(),
            Arc::clone(&self.api),
            Arc::clone(&self.probe),
            response.job_id.clone(),
            self.policy.clone(),
        ));
        let mut inner = lock(&self.inner);
        if handle.is_live() {
            inner.driver = Some(driver);
        } else {
            driver.abort();
        }
        Ok(response.job_id)
    }

    /// Discard the current session and clear the selection.
    ///
    /// Pending polls and ticks of the discarded session become no-ops.
    pub fn reset(&self) {
        let mut inner = lock(&self.inner);
        self.discard_session(&mut inner);
        inner.device_id = None;
        inner.media_handle = None;
        info!(generation = self.current_generation(), "Controller reset");
    }

    fn discard_session(&self, inner: &mut ControllerInner) {
        if let Some(driver) = inner.driver.take() {
            driver.abort();
        }
        let Some(handle) = inner.session.take() else {
            return;
        };
        // Taking the session lock waits out an update already in progress.
        let session = lock(&handle.session);
        self.generation.fetch_add(1, Ordering::SeqCst);
        handle.token.cancel();
        let was_active = !session.state().is_terminal();
        drop(session);

        if was_active {
            debug!(generation = handle.generation, "Discarding active session");
            self.bus.publish(LifecycleEvent::Reset {
                generation: handle.generation,
                timestamp: chrono::Utc::now(),
            });
        }
    }
}

impl Drop for JobLifecycleController {
    fn drop(&mut self) {
        let mut inner = lock(&self.inner);
        if let Some(driver) = inner.driver.take() {
            driver.abort();
        }
        if let Some(handle) = inner.session.take() {
            handle.token.cancel();
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

enum Observation {
    Status(Result<JobStatus, ApiError>),
    Probe(bool),
}

/// Poll loop of one session. Returns when the session ends or is discarded.
async fn drive(
    handle: SessionHandle,
    api: Arc<dyn JobApi>,
    probe: Arc<dyn HealthProbe>,
    job_id: String,
    policy: PollPolicy,
) {
    let token = handle.token.clone();
    let began = Instant::now();
    let mut progress_tick = interval_at(began + policy.progress_tick, policy.progress_tick);
    progress_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut log_tick = interval_at(began + policy.log_tick, policy.log_tick);
    log_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let poll_timer = sleep(Duration::ZERO);
    tokio::pin!(poll_timer);
    let mut awaiting_timer = true;
    let mut in_flight: Option<BoxFuture<'static, Observation>> = None;
    let mut fetch_result = false;

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => break,

            Some(observation) = OptionFuture::from(in_flight.as_mut()), if in_flight.is_some() => {
                in_flight = None;
                let step = match observation {
                    Observation::Status(outcome) => {
                        handle.update(|session, out| session.observe_status(outcome, out))
                    }
                    Observation::Probe(alive) => {
                        handle.update(|session, out| session.observe_probe(alive, out))
                    }
                };
                match step {
                    Some(PollStep::PollAfter(delay)) => {
                        debug!(
                            job_id = %job_id,
                            interval_ms = delay.as_millis() as u64,
                            "Next poll scheduled"
                        );
                        poll_timer.as_mut().reset(Instant::now() + delay);
                        awaiting_timer = true;
                    }
                    Some(PollStep::ProbeHealth) => {
                        let probe = Arc::clone(&probe);
                        in_flight = Some(async move { Observation::Probe(probe.is_alive().await) }.boxed());
                    }
                    Some(PollStep::FetchResult) => {
                        fetch_result = true;
                        break;
                    }
                    Some(PollStep::Finished) | None => break,
                }
            }

            _ = &mut poll_timer, if awaiting_timer => {
                awaiting_timer = false;
                match handle.update(|session, out| session.check_expired(out)) {
                    Some(false) => {}
                    Some(true) | None => break,
                }
                let api = Arc::clone(&api);
                let id = job_id.clone();
                in_flight = Some(async move { Observation::Status(api.fetch_status(&id).await) }.boxed());
            }

            _ = progress_tick.tick() => {
                if handle.update(|session, out| session.simulate_progress(out)).is_none() {
                    break;
                }
            }

            _ = log_tick.tick() => {
                if handle.update(|session, out| session.log_elapsed(out)).is_none() {
                    break;
                }
            }
        }
    }

    if fetch_result {
        info!(job_id = %job_id, "Job completed, fetching result");
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            outcome = api.fetch_result(&job_id) => outcome,
        };
        handle.update(|session, out| match outcome {
            Ok(result) => session.complete(result, out),
            Err(err) => {
                warn!(job_id = %job_id, error = %err, "Result fetch failed");
                session.fail(LifecycleError::ResultUnavailable(err), out)
            }
        });
    }
    debug!(job_id = %job_id, generation = handle.generation, "Session driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnalysisResult, StartJobResponse};
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl JobApi for Unreachable {
        async fn start_job(&self, _: &StartJobRequest) -> Result<StartJobResponse, ApiError> {
            Err(ApiError::network("connection refused"))
        }
        async fn fetch_status(&self, _: &str) -> Result<JobStatus, ApiError> {
            Err(ApiError::network("connection refused"))
        }
        async fn fetch_result(&self, _: &str) -> Result<AnalysisResult, ApiError> {
            Err(ApiError::network("connection refused"))
        }
    }

    #[async_trait]
    impl HealthProbe for Unreachable {
        async fn is_alive(&self) -> bool {
            false
        }
    }

    fn controller() -> JobLifecycleController {
        JobLifecycleController::new(Arc::new(Unreachable), Arc::new(Unreachable))
    }

    #[test]
    fn test_select_moves_idle_to_ready() {
        let controller = controller();
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert_eq!(controller.select(Some("dev"), None), LifecycleState::Idle);
        assert_eq!(controller.select(Some("dev"), Some("  ")), LifecycleState::Idle);
        assert_eq!(controller.select(Some("dev"), Some("vid")), LifecycleState::Ready);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.state, LifecycleState::Ready);
        assert_eq!(snapshot.device_id.as_deref(), Some("dev"));
        assert!(snapshot.job_id.is_none());
    }

    #[tokio::test]
    async fn test_start_requires_device_and_media() {
        let controller = controller();
        let err = controller.start(None, Some("vid")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Precondition { missing: "device" }));
        let err = controller.start(Some("dev"), Some("")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Precondition { missing: "media handle" }));
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert_eq!(controller.current_generation(), 0);
    }

    #[tokio::test]
    async fn test_start_failure_allows_retry() {
        let controller = controller();
        let err = controller.start(Some("dev"), Some("vid")).await.unwrap_err();
        assert_eq!(err.code(), "START_FAILED");
        assert_eq!(controller.state(), LifecycleState::Failed);

        let err = controller.start_selected().await.unwrap_err();
        assert_eq!(err.code(), "START_FAILED");
        // One bump to discard the failed session, one for the new session.
        assert_eq!(controller.current_generation(), 3);
    }

    #[tokio::test]
    async fn test_reset_returns_to_idle() {
        let controller = controller();
        let _ = controller.start(Some("dev"), Some("vid")).await;
        controller.reset();
        assert_eq!(controller.state(), LifecycleState::Idle);
        assert!(controller.snapshot().device_id.is_none());
    }
}
