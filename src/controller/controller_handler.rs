use log::{error, info};
use std::future::Future;
use std::io::Write;
use tokio::sync::mpsc;

use super::shutdown::shutdown_signal;
use crate::capture_management::{CaptureLauncher, CaptureStats, CaptureSupervisor, CommandLauncher};
use crate::configuration::config::Config;
use crate::data_capture::{ParseOptions, SegmentDispatcher};
use crate::error_handling::types::*;
use crate::payload_analysis::{RecordProcessor, RenderOptions};
use crate::storage::RetentionStore;

/// What a finished run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub capture: CaptureStats,
    /// Records rendered by the consumer.
    pub records: u64,
}

pub struct Controller {
    pub config: Config,
}

impl Controller {
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Runs the configured capture program until SIGINT/SIGTERM, rendering
    /// records to stdout.
    pub async fn run(self) -> Result<RunSummary, ControllerError> {
        let launcher = CommandLauncher::new(self.config.capture.clone());
        self.run_with(launcher, std::io::stdout(), shutdown_signal())
            .await
    }

    /// Runs the pipeline until `shutdown` completes, then drains it: every
    /// dispatched segment is parsed and every queued record is rendered
    /// before this returns.
    pub async fn run_with<L, W, F>(
        self,
        launcher: L,
        out: W,
        shutdown: F,
    ) -> Result<RunSummary, ControllerError>
    where
        L: CaptureLauncher,
        W: Write + Send + 'static,
        F: Future<Output = ()>,
    {
        let config = self.config;
        let (records_tx, records_rx) = mpsc::channel(config.queue_capacity);

        let processor = RecordProcessor::new(
            out,
            RenderOptions {
                dump_binary: config.dump_binary,
            },
        );
        let consumer = tokio::spawn(processor.run(records_rx));

        let mut dispatcher = SegmentDispatcher::new(
            records_tx,
            config.parse_workers,
            ParseOptions {
                max_flow_buffer: config.max_flow_buffer,
            },
        );
        let store = RetentionStore::new(&config.output_dir, config.retention_policy());
        let mut supervisor = CaptureSupervisor::new(launcher, store, config.rotation_interval());

        let outcome = supervisor.run(&mut dispatcher, shutdown).await;

        dispatcher.drain().await;
        let records = match consumer.await {
            Ok(count) => count,
            Err(e) => {
                error!("Record processor failed: {}", e);
                0
            }
        };

        let capture = outcome?;
        info!(
            "Shutdown complete: {} segment(s), {} record(s)",
            capture.segments_dispatched, records
        );
        Ok(RunSummary { capture, records })
    }
}
