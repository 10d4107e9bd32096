use log::{debug, error, info, warn};
use std::future::Future;
use std::time::{Duration, SystemTime};

use super::capture_handle::{CaptureLauncher, CaptureProcess};
use super::types::{CaptureStats, RotationTrigger, SupervisorState};
use crate::data_capture::SegmentSink;
use crate::error_handling::types::ProcessError;
use crate::storage::types::{CaptureSegment, RotationState};
use crate::storage::RetentionStore;

/// Drives the capture rotation loop.
///
/// ```text
/// Idle ─▶ Capturing ──timer──▶ Rotating ─▶ Capturing ─▶ ...
///             │                               │
///             └──────────shutdown─────────────┴──▶ Terminated
/// ```
///
/// Only one capture process is alive at a time: the running one is killed and
/// reaped before the next is spawned.
pub struct CaptureSupervisor<L: CaptureLauncher> {
    launcher: L,
    store: RetentionStore,
    rotation_interval: Duration,
    state: SupervisorState,
    rotation: RotationState,
    current: Option<L::Handle>,
    stats: CaptureStats,
}

impl<L: CaptureLauncher> CaptureSupervisor<L> {
    pub fn new(launcher: L, store: RetentionStore, rotation_interval: Duration) -> Self {
        Self {
            launcher,
            store,
            rotation_interval,
            state: SupervisorState::Idle,
            rotation: RotationState::default(),
            current: None,
            stats: CaptureStats::default(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    pub fn rotation_state(&self) -> RotationState {
        self.rotation
    }

    /// Runs until `shutdown` completes or a capture process cannot be
    /// started. Every segment that was captured, including the one active
    /// at shutdown, is passed to `sink` exactly once.
    pub async fn run<S, F>(
        &mut self,
        sink: &mut S,
        shutdown: F,
    ) -> Result<CaptureStats, ProcessError>
    where
        S: SegmentSink,
        F: Future<Output = ()>,
    {
        if let Err(e) = self.store.ensure_output_dir() {
            error!("{}", e);
        }
        self.rotation = self.store.resume_rotation_state();
        info!(
            "Capture rotation every {:?}, starting at segment {} in {}",
            self.rotation_interval,
            self.rotation.last_index,
            self.store.output_dir().display()
        );

        tokio::pin!(shutdown);
        loop {
            let segment = self.store.segment(self.rotation.last_index);
            self.start_capture(&segment)?;

            let trigger = tokio::select! {
                _ = tokio::time::sleep(self.rotation_interval) => RotationTrigger::Timer,
                _ = &mut shutdown => RotationTrigger::Shutdown,
            };

            self.state = SupervisorState::Rotating;
            self.finish_capture(segment, sink).await;

            match trigger {
                RotationTrigger::Shutdown => {
                    self.state = SupervisorState::Terminated;
                    info!(
                        "Capture stopped after {} segment(s), {} rotation(s)",
                        self.stats.segments_dispatched, self.stats.rotations
                    );
                    return Ok(self.stats.clone());
                }
                RotationTrigger::Timer => self.advance_rotation(),
            }
        }
    }

    fn start_capture(&mut self, segment: &CaptureSegment) -> Result<(), ProcessError> {
        match self.launcher.launch(segment) {
            Ok(handle) => {
                self.current = Some(handle);
                self.stats.active_count = 1;
                self.stats.total_started += 1;
                self.state = SupervisorState::Capturing;
                Ok(())
            }
            Err(e) => {
                error!("Cannot start capture for segment {}: {}", segment.index, e);
                self.stats.active_count = 0;
                self.state = SupervisorState::Terminated;
                Err(e)
            }
        }
    }

    /// Stops the active process and hands its segment to the sink.
    async fn finish_capture<S: SegmentSink>(&mut self, segment: CaptureSegment, sink: &mut S) {
        if let Some(mut handle) = self.current.take() {
            if let Err(e) = handle.terminate().await {
                warn!("Capture for segment {}: {}", segment.index, e);
                self.stats.failed_terminations += 1;
            }
        }
        self.stats.active_count = 0;
        info!("Segment {} finalized: {}", segment.index, segment.path.display());
        sink.dispatch(segment);
        self.stats.segments_dispatched += 1;
    }

    /// Advances and persists the index, then prunes expired segments.
    /// Failures here are logged and do not stop the loop.
    fn advance_rotation(&mut self) {
        let next = self.rotation.advance();
        if let Err(e) = self.store.persist_rotation_state(&self.rotation) {
            error!("{}", e);
        }
        self.stats.rotations += 1;
        debug!("Rotated to segment {}", next);

        match self.store.cleanup_expired_segments(SystemTime::now()) {
            Ok(report) if !report.removed.is_empty() => info!(
                "Retention removed {} expired segment(s)",
                report.removed.len()
            ),
            Ok(_) => {}
            Err(e) => error!("{}", e),
        }
    }
}
