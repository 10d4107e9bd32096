//! Capture process supervision.
//!
//! The supervisor keeps exactly one external capture process running, each
//! writing its own time-boxed segment file. On every rotation it stops the
//! running process, hands the finalized segment to a [`SegmentSink`], bumps
//! and persists the rotation index, prunes expired segments and starts the
//! next process. A shutdown request finalizes the active segment the same way
//! and ends the loop.
//!
//! Re-exports:
//! - [`CaptureSupervisor`]: the rotation loop.
//! - [`CaptureLauncher`], [`CaptureProcess`], [`CommandLauncher`], [`CaptureHandle`]:
//!   process control.
//! - [`SupervisorState`], [`CaptureStats`]: observable state.
//!
//! [`SegmentSink`]: crate::data_capture::SegmentSink

pub mod capture_handle;
pub mod capture_supervisor;
pub mod types;

pub use capture_handle::{CaptureHandle, CaptureLauncher, CaptureProcess, CommandLauncher};
pub use capture_supervisor::CaptureSupervisor;
pub use types::{CaptureStats, SupervisorState};
