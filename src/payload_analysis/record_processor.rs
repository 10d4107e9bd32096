use std::io::Write;

use log::{debug, error, info};
use tokio::sync::mpsc;

use super::renderer::{render_record, RenderOptions};
use crate::data_capture::types::ReassembledRecord;

/// Drains the record queue and writes one rendered block per record.
pub struct RecordProcessor<W: Write> {
    out: W,
    options: RenderOptions,
    sequence: u64,
}

impl<W: Write> RecordProcessor<W> {
    pub fn new(out: W, options: RenderOptions) -> Self {
        Self {
            out,
            options,
            sequence: 0,
        }
    }

    /// Records rendered so far.
    pub fn processed(&self) -> u64 {
        self.sequence
    }

    /// Renders a single record. Output failures are logged and the record is
    /// counted anyway.
    pub fn process(&mut self, record: &ReassembledRecord) {
        self.sequence += 1;
        let block = render_record(self.sequence, record, &self.options);
        if let Err(e) = self
            .out
            .write_all(block.as_bytes())
            .and_then(|_| self.out.flush())
        {
            error!("Cannot write record {}: {}", self.sequence, e);
        }
    }

    /// Consumes records until every sender is gone, returning how many were
    /// rendered.
    pub async fn run(mut self, mut records: mpsc::Receiver<ReassembledRecord>) -> u64 {
        debug!("Record processor started");
        while let Some(record) = records.recv().await {
            self.process(&record);
        }
        info!("Record queue closed after {} record(s)", self.sequence);
        self.sequence
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
