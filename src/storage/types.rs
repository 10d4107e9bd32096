//! Data types describing the contents of the output directory.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// File name prefix shared by all segment files.
pub const SEGMENT_PREFIX: &str = "capture_";
/// File extension of segment files.
pub const SEGMENT_EXTENSION: &str = "pcapng";
/// Name of the persisted rotation index inside the output directory.
pub const ROTATION_STATE_FILE: &str = "last_index.txt";
/// Index used when no rotation state has ever been persisted.
pub const INITIAL_INDEX: u64 = 1;

/// One time-boxed capture file produced by one run of the capture process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSegment {
    /// Monotonically increasing index, unique within the output directory.
    pub index: u64,
    /// Location of the `capture_<index>.pcapng` file.
    pub path: PathBuf,
    /// When the capture process for this segment was started.
    pub created_at: DateTime<Utc>,
}

impl CaptureSegment {
    pub fn new(output_dir: &Path, index: u64) -> Self {
        Self {
            index,
            path: output_dir.join(segment_file_name(index)),
            created_at: Utc::now(),
        }
    }
}

/// The only state that survives a restart: the index of the segment to
/// capture next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationState {
    pub last_index: u64,
}

impl RotationState {
    pub fn new(last_index: u64) -> Self {
        Self { last_index }
    }

    /// Moves to the next segment index and returns it.
    pub fn advance(&mut self) -> u64 {
        self.last_index += 1;
        self.last_index
    }
}

impl Default for RotationState {
    fn default() -> Self {
        Self::new(INITIAL_INDEX)
    }
}

pub fn segment_file_name(index: u64) -> String {
    format!("{}{}.{}", SEGMENT_PREFIX, index, SEGMENT_EXTENSION)
}

/// Extracts the index from a `capture_<index>.pcapng` file name.
pub fn parse_segment_index(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_EXTENSION)?
        .strip_suffix('.')?
        .parse()
        .ok()
}
