//! Controller behaviour against a scripted fake server under a paused clock.
//!
//! Every test runs on the current-thread runtime with time paused, so the
//! 2 s / 5 s / 40 min constants elapse instantly and call times are exact.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analysis_lifecycle::{
    AnalysisResult, ApiError, ApiErrorKind, HealthProbe, JobApi, JobLifecycleController,
    JobStatus, JobStatusKind, LifecycleEvent, LifecycleState, SessionReceiver, StartJobRequest,
    StartJobResponse,
};
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};

/// Fake analysis service: scripted status responses, recorded calls.
struct FakeServer {
    start: Mutex<Result<StartJobResponse, ApiError>>,
    script: Mutex<VecDeque<Result<JobStatus, ApiError>>>,
    fallback: Mutex<Result<JobStatus, ApiError>>,
    status_delay: Duration,
    result: Mutex<Result<AnalysisResult, ApiError>>,
    probes: Mutex<VecDeque<bool>>,
    probe_fallback: bool,
    probe_delay: Duration,

    status_calls: Mutex<Vec<Instant>>,
    /// (time, status calls seen so far) per probe.
    probe_calls: Mutex<Vec<(Instant, usize)>>,
    result_calls: AtomicUsize,
    /// Outstanding status requests and health probes together.
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeServer {
    fn new(fallback: Result<JobStatus, ApiError>) -> Self {
        Self {
            start: Mutex::new(Ok(StartJobResponse {
                job_id: "job-1".into(),
                estimated_time: Some(120.0),
            })),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            status_delay: Duration::ZERO,
            result: Mutex::new(Ok(AnalysisResult {
                status: "completed".into(),
                final_summary: Some("all steps passed".into()),
                ..AnalysisResult::default()
            })),
            probes: Mutex::new(VecDeque::new()),
            probe_fallback: true,
            probe_delay: Duration::ZERO,
            status_calls: Mutex::new(Vec::new()),
            probe_calls: Mutex::new(Vec::new()),
            result_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_script(self, script: Vec<Result<JobStatus, ApiError>>) -> Self {
        *self.script.lock().unwrap() = script.into();
        self
    }

    fn with_status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    fn with_probes(mut self, fallback: bool) -> Self {
        self.probe_fallback = fallback;
        self
    }

    fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn status_calls(&self) -> Vec<Instant> {
        self.status_calls.lock().unwrap().clone()
    }

    fn probe_calls(&self) -> Vec<(Instant, usize)> {
        self.probe_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobApi for FakeServer {
    async fn start_job(&self, _request: &StartJobRequest) -> Result<StartJobResponse, ApiError> {
        self.start.lock().unwrap().clone()
    }

    async fn fetch_status(&self, _job_id: &str) -> Result<JobStatus, ApiError> {
        self.status_calls.lock().unwrap().push(Instant::now());
        self.enter();
        if !self.status_delay.is_zero() {
            sleep(self.status_delay).await;
        }
        self.leave();

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }

    async fn fetch_result(&self, _job_id: &str) -> Result<AnalysisResult, ApiError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        self.result.lock().unwrap().clone()
    }
}

#[async_trait]
impl HealthProbe for FakeServer {
    async fn is_alive(&self) -> bool {
        let seen = self.status_calls.lock().unwrap().len();
        self.probe_calls.lock().unwrap().push((Instant::now(), seen));
        self.enter();
        if !self.probe_delay.is_zero() {
            sleep(self.probe_delay).await;
        }
        self.leave();
        self.probes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.probe_fallback)
    }
}

fn running(progress: f64, stage: &str) -> Result<JobStatus, ApiError> {
    Ok(JobStatus {
        status: JobStatusKind::Running,
        progress,
        current_stage: stage.to_string(),
        logs: Vec::new(),
        error: None,
    })
}

fn completed() -> Result<JobStatus, ApiError> {
    Ok(JobStatus {
        status: JobStatusKind::Completed,
        progress: 100.0,
        current_stage: "Analysis complete".to_string(),
        logs: vec!["report written".to_string()],
        error: None,
    })
}

fn controller(server: &Arc<FakeServer>) -> JobLifecycleController {
    JobLifecycleController::new(server.clone(), server.clone())
}

async fn start(
    controller: &JobLifecycleController,
) -> (SessionReceiver, broadcast::Receiver<LifecycleEvent>) {
    let rx = controller.subscribe();
    let raw = controller.subscribe();
    let job_id = controller
        .start(Some("inhaler-a"), Some("video-1"))
        .await
        .expect("start");
    assert_eq!(job_id, "job-1");
    (controller.session_events(rx), raw)
}

/// Collect events of one session until it ends.
async fn collect(rx: &mut SessionReceiver) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(3 * 3600), async {
        while let Some(event) = rx.recv().await {
            let done = event.ends_session();
            events.push(event);
            if done {
                break;
            }
        }
    })
    .await
    .expect("session never ended");
    events
}

fn failure_code(event: &LifecycleEvent) -> &str {
    match event {
        LifecycleEvent::Failed { code, .. } => code,
        other => panic!("expected failure, got {:?}", other),
    }
}

fn drain(raw: &mut broadcast::Receiver<LifecycleEvent>) -> Vec<LifecycleEvent> {
    let mut events = Vec::new();
    while let Ok(event) = raw.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_completed_job_delivers_result_once() {
    let server = Arc::new(
        FakeServer::new(running(0.0, "")).with_script(vec![
            running(10.0, "pose estimation"),
            running(4.0, "pose estimation"),
            running(30.0, "pose estimation"),
            completed(),
        ]),
    );
    let controller = controller(&server);
    let (mut rx, _) = start(&controller).await;

    let events = collect(&mut rx).await;

    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            LifecycleEvent::ProgressUpdated { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![10, 30, 100]);

    match events.last().unwrap() {
        LifecycleEvent::Completed { result, .. } => {
            assert_eq!(result.final_summary.as_deref(), Some("all steps passed"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(controller.state(), LifecycleState::Completed);
    assert_eq!(server.result_calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.status_calls().len(), 4);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.job_id.as_deref(), Some("job-1"));
    assert_eq!(snapshot.displayed_progress, 100);
    assert!(snapshot.log[0].starts_with("started at"));
    assert!(snapshot.log.contains(&"report written".to_string()));

    // Nothing runs after the terminal state.
    sleep(Duration::from_secs(600)).await;
    assert_eq!(server.status_calls().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_single_request_in_flight() {
    let mut script: Vec<_> = (0..8).map(|i| running(i as f64 * 10.0, "detect")).collect();
    script.push(completed());
    let server = Arc::new(
        FakeServer::new(running(0.0, ""))
            .with_script(script)
            .with_status_delay(Duration::from_secs(3)),
    );
    let controller = controller(&server);
    let (mut rx, _) = start(&controller).await;

    collect(&mut rx).await;

    assert_eq!(server.max_in_flight.load(Ordering::SeqCst), 1);
    let calls = server.status_calls();
    assert_eq!(calls.len(), 9);
    for pair in calls.windows(2) {
        // Response latency plus the normal interval.
        assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
    }
}

#[tokio::test(start_paused = true)]
async fn test_single_request_in_flight_across_failures_and_probes() {
    let server = Arc::new(
        FakeServer::new(Err(ApiError::network("connection reset")))
            .with_status_delay(Duration::from_secs(3))
            .with_probe_delay(Duration::from_secs(2))
            .with_probes(false),
    );
    let controller = controller(&server);
    let (mut rx, _) = start(&controller).await;

    let events = collect(&mut rx).await;
    assert_eq!(failure_code(events.last().unwrap()), "SERVER_UNREACHABLE");
    // Status requests and probes never overlap.
    assert_eq!(server.max_in_flight.load(Ordering::SeqCst), 1);

    let calls = server.status_calls();
    assert_eq!(calls.len(), 90);
    // Failure latency plus the unchanged normal interval.
    assert_eq!(calls[1] - calls[0], Duration::from_secs(5));
    for (i, (probe_at, seen)) in server.probe_calls().into_iter().enumerate() {
        assert_eq!(seen, 30 * (i + 1));
        // The probe starts after the last failure resolved.
        assert_eq!(probe_at - calls[seen - 1], Duration::from_secs(3));
        if seen < calls.len() {
            // Probe latency plus the 3 s x n backoff.
            let backoff = Duration::from_secs(3 * (i as u64 + 1));
            assert_eq!(calls[seen] - probe_at, Duration::from_secs(2) + backoff);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_mixed_failures_use_budget_of_latest_failure() {
    let mut script = Vec::new();
    for _ in 0..3 {
        script.extend((0..29).map(|_| Err(ApiError::network("connection reset"))));
        script.extend((0..16).map(|_| Err(ApiError::timeout("request timed out"))));
    }
    let server = Arc::new(
        FakeServer::new(running(10.0, "detect"))
            .with_script(script)
            .with_probes(false),
    );
    let controller = controller(&server);
    let (mut rx, _) = start(&controller).await;

    let events = collect(&mut rx).await;
    assert_eq!(failure_code(events.last().unwrap()), "SERVER_UNREACHABLE");
    let seen: Vec<usize> = server.probe_calls().iter().map(|(_, n)| *n).collect();
    assert_eq!(seen, vec![45, 90, 135]);
    assert_eq!(server.status_calls().len(), 135);
    assert_eq!(server.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(controller.snapshot().health_fail_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_probe_after_thirty_plain_failures() {
    let server = Arc::new(FakeServer::new(Err(ApiError::network("connection reset"))));
    let controller = controller(&server);
    let (mut rx, _) = start(&controller).await;

    loop {
        if let Some(LifecycleEvent::HealthChecked { .. }) = rx.recv().await {
            break;
        }
    }
    assert_eq!(server.probe_calls()[0].1, 30);
    controller.reset();
}

#[tokio::test(start_paused = true)]
async fn test_probe_after_forty_five_timeouts() {
    let server = Arc::new(FakeServer::new(Err(ApiError::timeout("request timed out"))));
    let controller = controller(&server);
    let (mut rx, _) = start(&controller).await;

    loop {
        if let Some(LifecycleEvent::HealthChecked { .. }) = rx.recv().await {
            break;
        }
    }
    assert_eq!(server.probe_calls()[0].1, 45);
    controller.reset();
}

#[tokio::test(start_paused = true)]
async fn test_alive_probe_resets_counters_and_slows_polling() {
    let mut script: Vec<_> = (0..30)
        .map(|_| Err(ApiError::new(ApiErrorKind::Server(503), "unavailable")))
        .collect();
    script.push(running(20.0, "detect"));
    let server = Arc::new(FakeServer::new(running(20.0, "detect")).with_script(script));
    let controller = controller(&server);
    let (mut rx, _) = start(&controller).await;

    let mut advisories = Vec::new();
    loop {
        match rx.recv().await {
            Some(LifecycleEvent::NetworkAdvisory { active, .. }) => advisories.push(active),
            Some(LifecycleEvent::HealthChecked { alive, .. }) => {
                assert!(alive);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(advisories, vec![true]);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.consecutive_errors, 0);
    assert_eq!(snapshot.health_fail_count, 0);
    assert_eq!(snapshot.current_poll_interval_ms, 5000);

    loop {
        if let Some(LifecycleEvent::NetworkAdvisory { active: false, .. }) = rx.recv().await {
            break;
        }
    }
    let probe_at = server.probe_calls()[0].0;
    assert_eq!(server.status_calls()[30] - probe_at, Duration::from_millis(5000));
    assert_eq!(controller.snapshot().current_poll_interval_ms, 2000);
    controller.reset();
}

#[tokio::test(start_paused = true)]
async fn test_three_dead_probes_end_session() {
    let server = Arc::new(FakeServer::new(Err(ApiError::network("connection refused"))).with_probes(false));
    let controller = controller(&server);
    let (mut rx, mut raw) = start(&controller).await;

    let events = collect(&mut rx).await;
    assert_eq!(failure_code(events.last().unwrap()), "SERVER_UNREACHABLE");
    assert_eq!(controller.state(), LifecycleState::Failed);
    assert_eq!(controller.snapshot().health_fail_count, 3);

    let probes = server.probe_calls();
    assert_eq!(
        probes.iter().map(|(_, seen)| *seen).collect::<Vec<_>>(),
        vec![30, 60, 90]
    );
    let calls = server.status_calls();
    assert_eq!(calls.len(), 90);
    assert_eq!(calls[30] - probes[0].0, Duration::from_millis(3000));
    assert_eq!(calls[60] - probes[1].0, Duration::from_millis(6000));
    assert_eq!(calls[32] - calls[31], Duration::from_millis(5000));

    drain(&mut raw);
    sleep(Duration::from_secs(3600)).await;
    assert_eq!(server.status_calls().len(), 90);
    assert_eq!(server.probe_calls().len(), 3);
    assert!(drain(&mut raw).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_session_times_out_while_polls_succeed() {
    let server = Arc::new(FakeServer::new(running(10.0, "detect")));
    let controller = controller(&server);
    let began = Instant::now();
    let (mut rx, _) = start(&controller).await;

    let events = collect(&mut rx).await;
    let elapsed = began.elapsed();
    assert!(matches!(events.last(), Some(LifecycleEvent::TimedOut { .. })));
    assert!(elapsed > Duration::from_secs(40 * 60));
    assert!(elapsed <= Duration::from_secs(40 * 60 + 2));
    assert_eq!(controller.state(), LifecycleState::TimedOut);
    assert_eq!(
        controller.snapshot().error.as_deref(),
        Some("No result after 40 minutes of polling. Start the analysis again")
    );

    let polls = server.status_calls().len();
    sleep(Duration::from_secs(600)).await;
    assert_eq!(server.status_calls().len(), polls);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_job_fails_without_retry() {
    let server = Arc::new(
        FakeServer::new(running(0.0, ""))
            .with_script(vec![running(15.0, "detect"), Err(ApiError::not_found("job missing"))]),
    );
    let controller = controller(&server);
    let (mut rx, _) = start(&controller).await;

    let events = collect(&mut rx).await;
    match events.last().unwrap() {
        LifecycleEvent::Failed { code, reason, .. } => {
            assert_eq!(code, "JOB_NOT_FOUND");
            assert!(reason.contains("restarted"));
        }
        other => panic!("unexpected {:?}", other),
    }
    sleep(Duration::from_secs(120)).await;
    assert_eq!(server.status_calls().len(), 2);
    assert!(server.probe_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_server_error_status_fails_with_reason() {
    let server = Arc::new(FakeServer::new(running(0.0, "")).with_script(vec![Ok(JobStatus {
        status: JobStatusKind::Error,
        progress: 40.0,
        current_stage: String::new(),
        logs: Vec::new(),
        error: Some("no person detected".into()),
    })]));
    let controller = controller(&server);
    let (mut rx, _) = start(&controller).await;

    let events = collect(&mut rx).await;
    assert_eq!(failure_code(events.last().unwrap()), "JOB_FAILED");
    assert!(controller
        .snapshot()
        .error
        .unwrap()
        .contains("no person detected"));
}

#[tokio::test(start_paused = true)]
async fn test_result_fetch_failure_is_terminal() {
    let server = Arc::new(FakeServer::new(running(0.0, "")).with_script(vec![completed()]));
    *server.result.lock().unwrap() = Err(ApiError::new(ApiErrorKind::NoResult, "no result"));
    let controller = controller(&server);
    let (mut rx, _) = start(&controller).await;

    let events = collect(&mut rx).await;
    assert_eq!(failure_code(events.last().unwrap()), "RESULT_UNAVAILABLE");
    sleep(Duration::from_secs(120)).await;
    assert_eq!(server.status_calls().len(), 1);
    assert_eq!(server.result_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_is_surfaced() {
    let server = Arc::new(FakeServer::new(running(0.0, "")));
    *server.start.lock().unwrap() = Err(ApiError::new(ApiErrorKind::Server(500), "boom"));
    let controller = controller(&server);
    let mut raw = controller.subscribe();

    let err = controller
        .start(Some("inhaler-a"), Some("video-1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "START_FAILED");
    assert_eq!(controller.state(), LifecycleState::Failed);
    let events = drain(&mut raw);
    assert_eq!(events.len(), 1);
    assert_eq!(failure_code(&events[0]), "START_FAILED");

    sleep(Duration::from_secs(60)).await;
    assert!(server.status_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_simulated_progress_and_elapsed_log() {
    let server = Arc::new(FakeServer::new(running(0.0, "Initializing models")));
    let controller = controller(&server);
    let _ = start(&controller).await;

    sleep(Duration::from_secs(75)).await;
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, LifecycleState::Polling);
    assert_eq!(snapshot.displayed_progress, 10);
    assert_eq!(snapshot.stage, "processing...");

    let ticks: Vec<_> = snapshot
        .log
        .iter()
        .filter(|l| l.starts_with("in progress:"))
        .collect();
    assert_eq!(ticks.len(), 7);
    assert_eq!(ticks[6], "in progress: 1m 10s");
    controller.reset();
}

#[tokio::test(start_paused = true)]
async fn test_reset_discards_pending_callbacks() {
    let server = Arc::new(
        FakeServer::new(running(50.0, "detect")).with_status_delay(Duration::from_secs(1)),
    );
    let controller = controller(&server);
    let (_, mut raw) = start(&controller).await;
    let old_generation = controller.current_generation();

    // First status request is in flight; both tickers are pending.
    sleep(Duration::from_millis(500)).await;
    controller.reset();
    assert_eq!(controller.state(), LifecycleState::Idle);

    sleep(Duration::from_secs(120)).await;
    let events = drain(&mut raw);
    let reset_at = events
        .iter()
        .position(|e| matches!(e, LifecycleEvent::Reset { .. }))
        .expect("reset event");
    assert_eq!(events[reset_at].generation(), old_generation);
    assert!(events[reset_at + 1..].is_empty());
    assert_eq!(server.status_calls().len(), 1);

    let snapshot = controller.snapshot();
    assert!(snapshot.log.is_empty());
    assert_eq!(snapshot.displayed_progress, 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_start_supersedes_previous_session() {
    let server = Arc::new(FakeServer::new(running(10.0, "detect")));
    let controller = controller(&server);
    let (_, mut raw) = start(&controller).await;
    let first = controller.current_generation();

    sleep(Duration::from_secs(15)).await;
    let (mut rx, _) = start(&controller).await;
    let second = controller.current_generation();
    assert!(second > first);

    sleep(Duration::from_secs(30)).await;
    let events = drain(&mut raw);
    let reset_at = events
        .iter()
        .position(|e| matches!(e, LifecycleEvent::Reset { .. }))
        .expect("reset event");
    assert_eq!(events[reset_at].generation(), first);
    assert!(events[reset_at + 1..]
        .iter()
        .all(|e| e.generation() == second));

    match rx.recv().await {
        Some(LifecycleEvent::SessionStarted { generation, .. }) => assert_eq!(generation, second),
        other => panic!("unexpected {:?}", other),
    }
    // The new session starts from zero.
    assert_eq!(controller.snapshot().transitions.len(), 2);
    controller.reset();
}
