//! Consecutive-failure budget for status polling.
//!
//! Counts failed polls in a row. Once the budget for the failure class is
//! used up the poll cycle must ask the health probe before continuing, and
//! repeated dead probes end the session.
//!
//! ```text
//! failure ──► consecutive_errors += 1
//!               ├─ < budget → Retry
//!               └─ ≥ budget → ProbeHealth
//!                               ├─ alive → Recovered (counters reset)
//!                               └─ dead  → health_fail_count += 1
//!                                           ├─ < health budget → Backoff
//!                                           └─ ≥ health budget → Exhausted
//! ```

use serde::{Deserialize, Serialize};

/// Class of a failed poll as far as the budget is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network errors, 5xx and undecodable responses.
    Transient,
    /// Client timeout; the server may just be busy.
    Timeout,
}

/// Budget limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetLimits {
    /// Consecutive plain failures before a health probe.
    pub error_budget: u32,
    /// Dead probes before the session is declared disconnected.
    pub health_fail_budget: u32,
    /// Consecutive failures that raise the network advisory.
    pub advisory_threshold: u32,
}

impl BudgetLimits {
    /// Budget for a failure class: timeouts get one and a half times the base.
    pub fn budget_for(&self, class: FailureClass) -> u32 {
        match class {
            FailureClass::Transient => self.error_budget,
            FailureClass::Timeout => self.error_budget.saturating_mul(3) / 2,
        }
    }
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            error_budget: 30,
            health_fail_budget: 3,
            advisory_threshold: 5,
        }
    }
}

/// What to do after a failed poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// Still within budget; poll again at the current interval.
    Retry,
    /// Budget reached; run the health probe before anything else.
    ProbeHealth,
}

/// What to do after a health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// Server answered; counters are clear.
    Recovered,
    /// Server dead but budget remains. `attempt` is the dead-probe count.
    Backoff { attempt: u32 },
    /// Health budget exhausted.
    Exhausted { attempts: u32 },
}

/// Tracks consecutive poll failures and dead health probes.
#[derive(Debug, Clone)]
pub struct ErrorBudgetTracker {
    limits: BudgetLimits,
    consecutive_errors: u32,
    health_fail_count: u32,
    advisory: bool,
}

impl ErrorBudgetTracker {
    pub fn new(limits: BudgetLimits) -> Self {
        Self {
            limits,
            consecutive_errors: 0,
            health_fail_count: 0,
            advisory: false,
        }
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn health_fail_count(&self) -> u32 {
        self.health_fail_count
    }

    /// Whether the "network unstable" advisory is raised.
    pub fn advisory(&self) -> bool {
        self.advisory
    }

    pub fn limits(&self) -> BudgetLimits {
        self.limits
    }

    /// Record a successful poll. Returns `true` if this cleared the advisory.
    pub fn record_success(&mut self) -> bool {
        self.consecutive_errors = 0;
        self.health_fail_count = 0;
        self.clear_advisory()
    }

    /// Drop the advisory without touching the counters. Returns `true` if it
    /// was raised.
    pub fn clear_advisory(&mut self) -> bool {
        std::mem::replace(&mut self.advisory, false)
    }

    /// Record a failed poll.
    pub fn record_failure(&mut self, class: FailureClass) -> FailureVerdict {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if self.consecutive_errors >= self.limits.advisory_threshold {
            self.advisory = true;
        }
        if self.consecutive_errors >= self.limits.budget_for(class) {
            FailureVerdict::ProbeHealth
        } else {
            FailureVerdict::Retry
        }
    }

    /// Record the outcome of a health probe.
    pub fn record_probe(&mut self, alive: bool) -> ProbeVerdict {
        if alive {
            self.consecutive_errors = 0;
            self.health_fail_count = 0;
            return ProbeVerdict::Recovered;
        }
        self.health_fail_count = self.health_fail_count.saturating_add(1);
        if self.health_fail_count >= self.limits.health_fail_budget {
            return ProbeVerdict::Exhausted {
                attempts: self.health_fail_count,
            };
        }
        self.consecutive_errors = 0;
        ProbeVerdict::Backoff {
            attempt: self.health_fail_count,
        }
    }
}

impl Default for ErrorBudgetTracker {
    fn default() -> Self {
        Self::new(BudgetLimits::default())
    }
}
