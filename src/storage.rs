//! Storage subsystem
//!
//! Filesystem state of the output directory: the capture segment files and the
//! persisted rotation index.
//!
//! Components:
//! - `types`: `CaptureSegment` and `RotationState`.
//! - `retention_store`: loads and persists the rotation index and deletes
//!   segments that fell out of the retention window.

pub mod retention_store;
pub mod types;

pub use retention_store::{RetentionReport, RetentionStore};
pub use types::{CaptureSegment, RotationState};
