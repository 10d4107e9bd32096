use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use super::segment_parser::{parse_segment, ParseOptions};
use super::types::ReassembledRecord;
use crate::storage::types::CaptureSegment;

/// Receiver of finalized segments.
///
/// `dispatch` must return promptly: the supervisor calls it between stopping
/// one capture process and starting the next.
pub trait SegmentSink: Send {
    fn dispatch(&mut self, segment: CaptureSegment);
}

/// Parses finalized segments in the background and feeds the record queue.
///
/// At most `workers` segments are parsed at once; further segments wait for
/// a permit. Parsing itself runs on the blocking pool.
pub struct SegmentDispatcher {
    records: mpsc::Sender<ReassembledRecord>,
    gate: Arc<Semaphore>,
    options: ParseOptions,
    tasks: JoinSet<()>,
    dispatched: u64,
}

impl SegmentDispatcher {
    pub fn new(
        records: mpsc::Sender<ReassembledRecord>,
        workers: usize,
        options: ParseOptions,
    ) -> Self {
        Self {
            records,
            gate: Arc::new(Semaphore::new(workers.max(1))),
            options,
            tasks: JoinSet::new(),
            dispatched: 0,
        }
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Parse tasks that have not finished yet, including those still waiting
    /// for a permit.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every dispatched parse to finish, then drops this side of
    /// the record queue.
    pub async fn drain(mut self) {
        if !self.tasks.is_empty() {
            info!("Waiting for {} segment parse(s) to finish", self.tasks.len());
        }
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!("Segment parse task failed: {}", e);
            }
        }
        debug!("All {} dispatched segments parsed", self.dispatched);
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                error!("Segment parse task failed: {}", e);
            }
        }
    }
}

impl SegmentSink for SegmentDispatcher {
    fn dispatch(&mut self, segment: CaptureSegment) {
        self.reap_finished();
        self.dispatched += 1;

        let gate = Arc::clone(&self.gate);
        let records = self.records.clone();
        let options = self.options.clone();
        debug!("Dispatching segment {} for parsing", segment.index);

        self.tasks.spawn(async move {
            let Ok(_permit) = gate.acquire_owned().await else {
                return;
            };
            let index = segment.index;
            let outcome =
                tokio::task::spawn_blocking(move || parse_segment(&segment, &options, &records))
                    .await;
            match outcome {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!("Skipping segment {}: {}", index, e),
                Err(e) => error!("Parser for segment {} panicked: {}", index, e),
            }
        });
    }
}
