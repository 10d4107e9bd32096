//! Core types used by the capture management subsystem.

use std::fmt;

/// Lifecycle of the rotation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Not started yet.
    Idle,
    /// A capture process is writing the current segment.
    Capturing,
    /// Between stopping one capture process and starting the next.
    Rotating,
    /// The loop has ended, after a shutdown request or a fatal error.
    Terminated,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorState::Idle => write!(f, "idle"),
            SupervisorState::Capturing => write!(f, "capturing"),
            SupervisorState::Rotating => write!(f, "rotating"),
            SupervisorState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Aggregate counters describing the current and historical capture state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Number of capture processes currently running (0 or 1).
    pub active_count: usize,
    /// Capture processes successfully started since the supervisor began.
    pub total_started: u64,
    /// Timer-driven rotations completed.
    pub rotations: u64,
    /// Capture processes that could not be stopped cleanly.
    pub failed_terminations: u64,
    /// Segments handed over for parsing.
    pub segments_dispatched: u64,
}

/// What ended one capture period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RotationTrigger {
    Timer,
    Shutdown,
}
