use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum age a segment file may reach before retention deletes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub window: Duration,
}

impl RetentionPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn from_hours(hours: u64) -> Self {
        Self::new(Duration::from_secs(hours * 3600))
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from_hours(24)
    }
}

/// How the external capture collaborator is invoked.
///
/// The resulting command line is
/// `[sudo] <program> <module> -m pcapng -i <interface> --pcapfile <segment>`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureCommand {
    /// Capture binary, e.g. `./ecapture`.
    pub program: PathBuf,
    /// Sub-command passed as the first argument (`tls`).
    pub module: String,
    /// Interface selector; `any` captures on every interface.
    pub interface: String,
    /// Run the program through `sudo`, the collaborator needs elevated privilege.
    pub use_sudo: bool,
}

impl Default for CaptureCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from("./ecapture"),
            module: String::from("tls"),
            interface: String::from("any"),
            use_sudo: true,
        }
    }
}

impl CaptureCommand {
    /// Returns the executable and its argument list for one segment.
    pub fn command_line(&self, segment_path: &Path) -> (PathBuf, Vec<String>) {
        let mut args = Vec::with_capacity(8);
        let program = if self.use_sudo {
            args.push(self.program.display().to_string());
            PathBuf::from("sudo")
        } else {
            self.program.clone()
        };
        args.push(self.module.clone());
        args.push("-m".to_string());
        args.push("pcapng".to_string());
        args.push("-i".to_string());
        args.push(self.interface.clone());
        args.push("--pcapfile".to_string());
        args.push(segment_path.display().to_string());
        (program, args)
    }
}
