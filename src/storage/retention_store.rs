use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, error, info, warn};

use super::types::{
    parse_segment_index, CaptureSegment, RotationState, ROTATION_STATE_FILE, SEGMENT_PREFIX,
};
use crate::configuration::types::RetentionPolicy;
use crate::error_handling::types::PersistenceError;

/// Outcome of one retention pass over the output directory.
#[derive(Debug, Default)]
pub struct RetentionReport {
    /// Segment files that were inspected.
    pub scanned: usize,
    /// Segment files that were deleted.
    pub removed: Vec<PathBuf>,
    /// Segment files that were expired but could not be deleted.
    pub failures: usize,
}

/// Owner of the output directory state: the rotation index file and the
/// segment files themselves.
pub struct RetentionStore {
    output_dir: PathBuf,
    state_path: PathBuf,
    policy: RetentionPolicy,
}

impl RetentionStore {
    pub fn new<P: AsRef<Path>>(output_dir: P, policy: RetentionPolicy) -> Self {
        let output_dir = output_dir.as_ref().to_path_buf();
        let state_path = output_dir.join(ROTATION_STATE_FILE);
        Self {
            output_dir,
            state_path,
            policy,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn ensure_output_dir(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| PersistenceError::CreateDirFailed(self.output_dir.clone(), e))
    }

    pub fn segment(&self, index: u64) -> CaptureSegment {
        CaptureSegment::new(&self.output_dir, index)
    }

    /// Reads the persisted rotation index.
    ///
    /// A missing state file is not an error: it yields the initial index.
    pub fn load_rotation_state(&self) -> Result<RotationState, PersistenceError> {
        let content = match fs::read_to_string(&self.state_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(
                    "No rotation state at {}, starting from the initial index",
                    self.state_path.display()
                );
                return Ok(RotationState::default());
            }
            Err(e) => return Err(PersistenceError::ReadIndexFailed(e)),
        };
        let trimmed = content.trim();
        trimmed
            .parse::<u64>()
            .map(RotationState::new)
            .map_err(|_| PersistenceError::InvalidIndex(trimmed.to_string()))
    }

    /// Loads the rotation state and moves it past any index whose segment
    /// file already exists, so that a restart never overwrites a segment.
    /// Failures fall back to the initial index and are logged.
    pub fn resume_rotation_state(&self) -> RotationState {
        let mut state = self.load_rotation_state().unwrap_or_else(|e| {
            error!("{}; falling back to the initial index", e);
            RotationState::default()
        });

        let loaded = state.last_index;
        while self.segment(state.last_index).path.exists() {
            state.advance();
        }
        if state.last_index != loaded {
            warn!(
                "Segment capture_{} already exists, resuming at index {}",
                loaded, state.last_index
            );
            if let Err(e) = self.persist_rotation_state(&state) {
                error!("{}", e);
            }
        }
        state
    }

    /// Writes the rotation index. The value is written to a sibling file and
    /// renamed over the state file.
    pub fn persist_rotation_state(&self, state: &RotationState) -> Result<(), PersistenceError> {
        let tmp_path = self.state_path.with_extension("txt.tmp");
        fs::write(&tmp_path, state.last_index.to_string())
            .and_then(|_| fs::rename(&tmp_path, &self.state_path))
            .map_err(PersistenceError::WriteIndexFailed)?;
        debug!(
            "Persisted rotation index {} to {}",
            state.last_index,
            self.state_path.display()
        );
        Ok(())
    }

    /// Deletes every `capture_*` file whose modification time precedes
    /// `now - window`, including leftovers that do not follow the
    /// `capture_<index>.pcapng` naming. Per-file failures are logged and counted; only a
    /// failure to list the directory is returned.
    pub fn cleanup_expired_segments(
        &self,
        now: SystemTime,
    ) -> Result<RetentionReport, PersistenceError> {
        let mut report = RetentionReport::default();
        let Some(cutoff) = now.checked_sub(self.policy.window) else {
            return Ok(report);
        };

        let entries = fs::read_dir(&self.output_dir).map_err(PersistenceError::ScanFailed)?;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable directory entry: {}", e);
                    continue;
                }
            };
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name == ROTATION_STATE_FILE || !name.starts_with(SEGMENT_PREFIX) {
                continue;
            }
            let path = entry.path();
            let modified = match entry.metadata().and_then(|m| {
                if m.is_dir() {
                    Err(std::io::Error::new(ErrorKind::Other, "is a directory"))
                } else {
                    m.modified()
                }
            }) {
                Ok(modified) => modified,
                Err(e) => {
                    debug!("Skipping {}: {}", path.display(), e);
                    continue;
                }
            };
            report.scanned += 1;

            if modified < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        match parse_segment_index(name) {
                            Some(index) => info!("Removed expired segment {}", index),
                            None => info!("Removed expired capture file {}", name),
                        }
                        report.removed.push(path);
                    }
                    Err(e) => {
                        error!("{}", PersistenceError::RemoveFailed(path, e));
                        report.failures += 1;
                    }
                }
            }
        }

        debug!(
            "Retention pass: scanned={}, removed={}, failures={}",
            report.scanned,
            report.removed.len(),
            report.failures
        );
        Ok(report)
    }
}
