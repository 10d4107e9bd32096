use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::configuration::types::CaptureCommand;
use crate::error_handling::types::ProcessError;
use crate::storage::types::CaptureSegment;

/// Time a capture process gets to exit after SIGTERM before it is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(3);

/// A started capture that the supervisor can stop.
pub trait CaptureProcess: Send {
    fn segment_index(&self) -> u64;

    /// Stops the capture and everything it started, and reaps it. Calling it
    /// again after it returned must be a no-op.
    fn terminate(&mut self) -> impl Future<Output = Result<(), ProcessError>> + Send;
}

/// Starts one capture process per segment.
pub trait CaptureLauncher: Send {
    type Handle: CaptureProcess;

    fn launch(&self, segment: &CaptureSegment) -> Result<Self::Handle, ProcessError>;
}

/// A running capture process and the segment it writes.
///
/// When the process leads its own process group, stopping it signals the
/// whole group, so helpers it forked (the real capture binary behind `sudo`)
/// go down with it.
#[derive(Debug)]
pub struct CaptureHandle {
    pub segment_index: u64,
    pub started_at: DateTime<Utc>,
    pid: Option<u32>,
    process_group: bool,
    grace: Duration,
    process: Option<Child>,
}

impl CaptureHandle {
    pub fn new(segment_index: u64, process: Child) -> Self {
        Self {
            segment_index,
            started_at: Utc::now(),
            pid: process.id(),
            process_group: false,
            grace: TERMINATE_GRACE,
            process: Some(process),
        }
    }

    /// For a process spawned as the leader of a new process group.
    pub fn process_group_leader(segment_index: u64, process: Child) -> Self {
        Self {
            process_group: true,
            ..Self::new(segment_index, process)
        }
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// OS process id, as seen at spawn time.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    async fn stop(&mut self) -> Result<(), ProcessError> {
        let Some(mut process) = self.process.take() else {
            debug!(
                "Capture process for segment {} already terminated",
                self.segment_index
            );
            return Ok(());
        };

        match process.try_wait() {
            Ok(Some(status)) => {
                warn!(
                    "Capture process for segment {} exited on its own ({})",
                    self.segment_index, status
                );
                self.kill_stragglers();
                return Ok(());
            }
            Ok(None) => {}
            Err(e) => return Err(ProcessError::WaitFailed(e)),
        }

        debug!(
            "Terminating capture process {:?} for segment {}",
            self.pid, self.segment_index
        );
        self.request_stop(&mut process)?;
        match tokio::time::timeout(self.grace, process.wait()).await {
            Ok(Ok(status)) => debug!(
                "Capture process for segment {} exited ({})",
                self.segment_index, status
            ),
            Ok(Err(e)) => return Err(ProcessError::WaitFailed(e)),
            Err(_) => {
                warn!(
                    "Capture process for segment {} still running after {:?}, killing it",
                    self.segment_index, self.grace
                );
                self.kill_stragglers();
                process.kill().await.map_err(ProcessError::TerminateFailed)?;
            }
        }
        self.kill_stragglers();
        debug!(
            "Capture process for segment {} terminated",
            self.segment_index
        );
        Ok(())
    }

    /// SIGTERM to the process (and its group); `sudo` relays it to the
    /// program it runs.
    #[cfg(unix)]
    fn request_stop(&self, _process: &mut Child) -> Result<(), ProcessError> {
        self.signal(nix::sys::signal::Signal::SIGTERM)
    }

    #[cfg(not(unix))]
    fn request_stop(&self, process: &mut Child) -> Result<(), ProcessError> {
        process.start_kill().map_err(ProcessError::TerminateFailed)
    }

    /// SIGKILL to whatever is left in the process group.
    #[cfg(unix)]
    fn kill_stragglers(&self) {
        if !self.process_group {
            return;
        }
        if let Err(e) = self.signal(nix::sys::signal::Signal::SIGKILL) {
            debug!(
                "Process group of segment {} not fully killed: {}",
                self.segment_index, e
            );
        }
    }

    #[cfg(not(unix))]
    fn kill_stragglers(&self) {}

    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) -> Result<(), ProcessError> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, killpg};
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return Ok(());
        };
        let pid = Pid::from_raw(pid as i32);
        let sent = if self.process_group {
            killpg(pid, signal)
        } else {
            kill(pid, signal)
        };
        match sent {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(ProcessError::TerminateFailed(errno.into())),
        }
    }
}

impl CaptureProcess for CaptureHandle {
    fn segment_index(&self) -> u64 {
        self.segment_index
    }

    /// SIGTERM, then SIGKILL once the grace period has passed.
    async fn terminate(&mut self) -> Result<(), ProcessError> {
        self.stop().await
    }
}

/// Launches the configured external capture program.
///
/// Its stdout and stderr are forwarded line by line to the debug log.
pub struct CommandLauncher {
    command: CaptureCommand,
}

impl CommandLauncher {
    pub fn new(command: CaptureCommand) -> Self {
        Self { command }
    }
}

impl CaptureLauncher for CommandLauncher {
    type Handle = CaptureHandle;

    fn launch(&self, segment: &CaptureSegment) -> Result<CaptureHandle, ProcessError> {
        let (program, args) = self.command.command_line(&segment.path);
        debug!("Spawning capture process: {} {:?}", program.display(), args);

        let mut command = std::process::Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut process = Command::from(command)
            .kill_on_drop(true)
            .spawn()
            .map_err(ProcessError::SpawnFailed)?;

        let index = segment.index;
        if let Some(stderr) = process.stderr.take() {
            let mut reader = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("[capture:{}][stderr] {}", index, line);
                }
                debug!("stderr monitoring ended for capture {}", index);
            });
        }
        if let Some(stdout) = process.stdout.take() {
            let mut reader = BufReader::new(stdout).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("[capture:{}][stdout] {}", index, line);
                }
                debug!("stdout monitoring ended for capture {}", index);
            });
        }

        #[cfg(unix)]
        let handle = CaptureHandle::process_group_leader(index, process);
        #[cfg(not(unix))]
        let handle = CaptureHandle::new(index, process);
        info!(
            "Capture process {:?} writing {}",
            handle.pid(),
            segment.path.display()
        );
        Ok(handle)
    }
}
