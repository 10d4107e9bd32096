use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    NotInRange(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures around the external capture subprocess.
///
/// Only `SpawnFailed` is fatal to the rotation loop; the others are logged and
/// the segment is still handed to the parser.
#[derive(Debug)]
pub enum ProcessError {
    SpawnFailed(std::io::Error),
    TerminateFailed(std::io::Error),
    WaitFailed(std::io::Error),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::SpawnFailed(e) => write!(f, "Capture process failed to start: {}", e),
            ProcessError::TerminateFailed(e) => {
                write!(f, "Capture process failed to terminate: {}", e)
            }
            ProcessError::WaitFailed(e) => write!(f, "Capture process wait failed: {}", e),
        }
    }
}

impl std::error::Error for ProcessError {}

/// Filesystem state failures: output directory, rotation index, retention.
#[derive(Debug)]
pub enum PersistenceError {
    CreateDirFailed(PathBuf, std::io::Error),
    ReadIndexFailed(std::io::Error),
    InvalidIndex(String),
    WriteIndexFailed(std::io::Error),
    ScanFailed(std::io::Error),
    RemoveFailed(PathBuf, std::io::Error),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::CreateDirFailed(p, e) => {
                write!(f, "Failed to create directory {}: {}", p.display(), e)
            }
            PersistenceError::ReadIndexFailed(e) => write!(f, "Failed to read rotation index: {}", e),
            PersistenceError::InvalidIndex(s) => write!(f, "Invalid rotation index: {:?}", s),
            PersistenceError::WriteIndexFailed(e) => {
                write!(f, "Failed to write rotation index: {}", e)
            }
            PersistenceError::ScanFailed(e) => write!(f, "Failed to scan output directory: {}", e),
            PersistenceError::RemoveFailed(p, e) => {
                write!(f, "Failed to remove {}: {}", p.display(), e)
            }
        }
    }
}

impl std::error::Error for PersistenceError {}

/// A segment file that cannot be (fully) read through the decoding layer.
#[derive(Debug)]
pub enum SegmentError {
    OpenFailed(PathBuf, std::io::Error),
    InvalidFormat(String),
    Truncated(String),
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::OpenFailed(p, e) => {
                write!(f, "Failed to open segment {}: {}", p.display(), e)
            }
            SegmentError::InvalidFormat(e) => write!(f, "Invalid capture format: {}", e),
            SegmentError::Truncated(e) => write!(f, "Segment ended unexpectedly: {}", e),
        }
    }
}

impl std::error::Error for SegmentError {}

/// Failure while draining one reassembled flow. The flow is abandoned.
#[derive(Debug)]
pub enum StreamError {
    BufferLimitExceeded { flow: String, buffered: usize, limit: usize },
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::BufferLimitExceeded {
                flow,
                buffered,
                limit,
            } => write!(
                f,
                "Flow {} buffered {} out-of-order bytes (limit {})",
                flow, buffered, limit
            ),
        }
    }
}

impl std::error::Error for StreamError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    ProcessError(ProcessError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::ProcessError(e) => write!(f, "Capture process error: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ProcessError> for ControllerError {
    fn from(err: ProcessError) -> Self {
        ControllerError::ProcessError(err)
    }
}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}
