//! Displayed progress: merge rule and synthetic trajectory.
//!
//! Real progress from the server and simulated progress both flow through
//! [`merge_progress`], so the displayed value can only grow.

/// Stage label shown while the simulator is driving the display.
pub const PROCESSING_STAGE: &str = "processing...";

/// Stage texts the service emits during initialisation. Shown stages are not
/// replaced by these to avoid flicker.
const INITIALIZATION_MARKERS: &[&str] = &["initializ", "초기화"];

/// Stage texts that signal the job is done; the simulator leaves them alone.
const COMPLETION_MARKERS: &[&str] = &["complete", "완료"];

/// Merge an incoming progress value into the displayed one.
pub fn merge_progress(displayed: u8, incoming: u8) -> u8 {
    displayed.max(incoming.min(100))
}

/// Whether a server stage text denotes an initialisation phase.
pub fn is_initialization_stage(stage: &str) -> bool {
    let lower = stage.to_lowercase();
    INITIALIZATION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Whether a stage label already signals completion.
pub fn is_completion_stage(stage: &str) -> bool {
    let lower = stage.to_lowercase();
    COMPLETION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Result of one simulator tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedProgress {
    /// New displayed value (already merged).
    pub displayed: u8,
    /// Replacement stage label, if the current one should be overwritten.
    pub stage: Option<&'static str>,
}

/// Synthetic progress generator.
///
/// Climbs one point per tick until `ceiling`, independent of what the
/// server reports. Its value only reaches the display when it is higher
/// than the displayed value.
#[derive(Debug, Clone)]
pub struct ProgressSimulator {
    counter: u8,
    ceiling: u8,
}

impl ProgressSimulator {
    pub fn new(ceiling: u8) -> Self {
        Self {
            counter: 0,
            ceiling: ceiling.min(99),
        }
    }

    /// Current internal counter.
    pub fn counter(&self) -> u8 {
        self.counter
    }

    /// Advance one tick.
    ///
    /// Returns `None` once the ceiling is reached or when a real value
    /// already exceeds the simulated one.
    pub fn tick(&mut self, displayed: u8, stage: &str) -> Option<SimulatedProgress> {
        if self.counter >= self.ceiling {
            return None;
        }
        self.counter += 1;
        if self.counter <= displayed {
            return None;
        }
        let stage = if is_completion_stage(stage) {
            None
        } else {
            Some(PROCESSING_STAGE)
        };
        Some(SimulatedProgress {
            displayed: merge_progress(displayed, self.counter),
            stage,
        })
    }
}
