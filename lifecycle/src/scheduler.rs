//! Poll scheduling policy.
//!
//! [`PollPolicy`] holds the fixed timing constants. [`PollScheduler`] turns
//! each poll outcome into the delay before the next request.

use std::time::Duration;

use crate::budget::{BudgetLimits, FailureVerdict, ProbeVerdict};
use crate::error::LifecycleError;

/// Timing and budget constants for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay between polls while the server is healthy.
    pub normal_interval: Duration,
    /// Delay after the health probe had to step in.
    pub slow_interval: Duration,
    /// Wall-clock ceiling measured from the first poll.
    pub session_timeout: Duration,
    /// Backoff unit after a dead probe; multiplied by the dead-probe count.
    pub health_backoff_step: Duration,
    /// Period of the synthetic progress tick.
    pub progress_tick: Duration,
    /// Highest value the simulator may show.
    pub progress_ceiling: u8,
    /// Period of the elapsed-time log entry.
    pub log_tick: Duration,
    pub budget: BudgetLimits,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            normal_interval: Duration::from_secs(2),
            slow_interval: Duration::from_secs(5),
            session_timeout: Duration::from_secs(40 * 60),
            health_backoff_step: Duration::from_millis(3000),
            progress_tick: Duration::from_secs(7),
            progress_ceiling: 95,
            log_tick: Duration::from_secs(10),
            budget: BudgetLimits::default(),
        }
    }
}

/// Next step of the poll cycle.
#[derive(Debug, Clone)]
pub enum PollDecision {
    /// Issue the next status request after this delay.
    PollAfter(Duration),
    /// Run the health probe now.
    ProbeHealth,
    /// End the session with this error.
    Stop(LifecycleError),
}

/// Decides poll delays from poll and probe outcomes.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    policy: PollPolicy,
    current_interval: Duration,
}

impl PollScheduler {
    pub fn new(policy: PollPolicy) -> Self {
        let current_interval = policy.normal_interval;
        Self {
            policy,
            current_interval,
        }
    }

    /// Delay the next regular poll would use.
    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Whether the session ran past its wall-clock ceiling.
    pub fn is_expired(&self, since_first_poll: Duration) -> bool {
        since_first_poll > self.policy.session_timeout
    }

    /// A poll succeeded: back to the normal cadence.
    pub fn on_success(&mut self) -> Duration {
        self.current_interval = self.policy.normal_interval;
        self.current_interval
    }

    /// A poll failed and the budget tracker ruled on it.
    pub fn on_failure(&mut self, verdict: FailureVerdict) -> PollDecision {
        match verdict {
            FailureVerdict::Retry => PollDecision::PollAfter(self.current_interval),
            FailureVerdict::ProbeHealth => PollDecision::ProbeHealth,
        }
    }

    /// The health probe answered and the budget tracker ruled on it.
    pub fn on_probe(&mut self, verdict: ProbeVerdict) -> PollDecision {
        match verdict {
            ProbeVerdict::Recovered => {
                self.current_interval = self.policy.slow_interval;
                PollDecision::PollAfter(self.current_interval)
            }
            ProbeVerdict::Backoff { attempt } => {
                self.current_interval = self.policy.slow_interval;
                PollDecision::PollAfter(self.policy.health_backoff_step * attempt)
            }
            ProbeVerdict::Exhausted { attempts } => {
                PollDecision::Stop(LifecycleError::ServerUnreachable { probes: attempts })
            }
        }
    }

    /// Minutes in the session ceiling, for error messages.
    pub fn timeout_minutes(&self) -> u64 {
        self.policy.session_timeout.as_secs() / 60
    }
}
