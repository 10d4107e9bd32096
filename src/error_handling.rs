//! Error taxonomy shared by every subsystem.
//!
//! Components reduce failures to a log line plus a local recovery action; the
//! enums here exist so those log lines carry a precise cause. Only
//! [`types::ProcessError::SpawnFailed`] ends the capture loop.

pub mod types;
