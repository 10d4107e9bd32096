use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::LevelFilter;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound for the parse worker gate.
const MAX_PARSE_WORKERS: usize = 64;

/// Command-line surface of the binary.
///
/// Every tuning flag is optional: when absent, the value comes from the TOML
/// file given with `--config`, and then from the built-in defaults of
/// [`Config`].
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "netsentry")]
#[command(version)]
#[command(about = "Rotating traffic capture with live stream reassembly and payload inspection")]
pub struct CliArgs {
    /// Path to a TOML configuration file
    ///
    /// Values from the file are overridden by any flag given on the command line.
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Directory where `capture_<index>.pcapng` segments and `last_index.txt` live
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Duration of one capture segment, in seconds
    #[arg(long)]
    pub rotation_secs: Option<u64>,

    /// Segments older than this many hours are deleted after each rotation
    #[arg(long)]
    pub retention_hours: Option<u64>,

    /// Capacity of the record queue between the parsers and the renderer
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Number of segments that may be parsed concurrently
    #[arg(long)]
    pub parse_workers: Option<usize>,

    /// Out-of-order bytes a single TCP flow may buffer before it is abandoned
    #[arg(long)]
    pub max_flow_buffer: Option<usize>,

    /// Print a hex dump below the marker of binary payloads
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub dump_binary: bool,

    /// Default log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long)]
    pub log_level: Option<String>,

    /// External capture program
    #[arg(long)]
    pub capture_program: Option<PathBuf>,

    /// Run the capture program directly instead of through sudo
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub no_sudo: bool,
}

/// Resolved runtime configuration.
///
/// Built from defaults, then an optional TOML file, then the command line.
/// A TOML file uses the same key names as the fields below, with the capture
/// command in a `[capture]` table:
///
/// ```toml
/// output_dir = "/var/lib/netsentry"
/// rotation_secs = 60
/// retention_hours = 24
///
/// [capture]
/// program = "/opt/ecapture/ecapture"
/// use_sudo = false
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub output_dir: PathBuf,
    pub rotation_secs: u64,
    pub retention_hours: u64,
    pub queue_capacity: usize,
    pub parse_workers: usize,
    pub max_flow_buffer: usize,
    pub dump_binary: bool,
    pub log_level: String,
    pub capture: CaptureCommand,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./pcaps"),
            rotation_secs: 60,
            retention_hours: 24,
            queue_capacity: 1000,
            parse_workers: 1,
            max_flow_buffer: 4 * 1024 * 1024,
            dump_binary: false,
            log_level: String::from("info"),
            capture: CaptureCommand::default(),
        }
    }
}

impl Config {
    /// Resolves the configuration for the given command-line arguments and
    /// validates it.
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        config.validate()?;
        Ok(config)
    }

    /// Reads a TOML configuration file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    fn apply_args(&mut self, args: &CliArgs) {
        if let Some(dir) = &args.output_dir {
            self.output_dir = dir.clone();
        }
        if let Some(secs) = args.rotation_secs {
            self.rotation_secs = secs;
        }
        if let Some(hours) = args.retention_hours {
            self.retention_hours = hours;
        }
        if let Some(capacity) = args.queue_capacity {
            self.queue_capacity = capacity;
        }
        if let Some(workers) = args.parse_workers {
            self.parse_workers = workers;
        }
        if let Some(limit) = args.max_flow_buffer {
            self.max_flow_buffer = limit;
        }
        if args.dump_binary {
            self.dump_binary = true;
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        if let Some(program) = &args.capture_program {
            self.capture.program = program.clone();
        }
        if args.no_sudo {
            self.capture.use_sudo = false;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rotation_secs == 0 {
            return Err(ConfigError::NotInRange(
                "rotation_secs must be greater than 0".to_string(),
            ));
        }
        if self.retention_hours == 0 {
            return Err(ConfigError::NotInRange(
                "retention_hours must be greater than 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::NotInRange(
                "queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.parse_workers == 0 || self.parse_workers > MAX_PARSE_WORKERS {
            return Err(ConfigError::NotInRange(format!(
                "parse_workers must be between 1 and {}, got {}",
                MAX_PARSE_WORKERS, self.parse_workers
            )));
        }
        if self.max_flow_buffer == 0 {
            return Err(ConfigError::NotInRange(
                "max_flow_buffer must be greater than 0".to_string(),
            ));
        }
        if self.log_level.parse::<LevelFilter>().is_err() {
            return Err(ConfigError::NotInRange(format!(
                "unknown log level {:?}",
                self.log_level
            )));
        }
        Ok(())
    }

    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_secs)
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::from_hours(self.retention_hours)
    }

    pub fn log_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn args_under_test(extra: &[&str]) -> Result<CliArgs, clap::Error> {
        let mut argv = vec!["netsentry"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv)
    }

    #[test]
    fn defaults_match_the_capture_contract() {
        let config = Config::load(&args_under_test(&[]).unwrap()).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("./pcaps"));
        assert_eq!(config.rotation_interval(), Duration::from_secs(60));
        assert_eq!(config.retention_policy().window, Duration::from_secs(24 * 3600));
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.parse_workers, 1);
        assert!(!config.dump_binary);
        assert!(config.capture.use_sudo);
        assert_eq!(config.log_filter(), LevelFilter::Info);
    }

    #[test]
    fn command_line_overrides_file_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "output_dir = \"/srv/pcaps\"\nrotation_secs = 30\nqueue_capacity = 10\n\n[capture]\nprogram = \"/opt/ecapture\"\nuse_sudo = true\n"
        )
        .unwrap();
        let path = file.path().display().to_string();

        let args = args_under_test(&[
            "--config",
            path.as_str(),
            "--rotation-secs",
            "5",
            "--no-sudo",
            "--dump-binary",
        ])
        .unwrap();
        let config = Config::load(&args).unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/srv/pcaps"));
        assert_eq!(config.rotation_secs, 5);
        assert_eq!(config.queue_capacity, 10);
        assert_eq!(config.capture.program, PathBuf::from("/opt/ecapture"));
        assert!(!config.capture.use_sudo);
        assert!(config.dump_binary);
        // untouched keys keep their defaults
        assert_eq!(config.capture.interface, "any");
        assert_eq!(config.retention_hours, 24);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        match Config::from_toml_str("rotation = 10\n") {
            Err(ConfigError::TomlError(_)) => {}
            other => panic!("expected TomlError, got {:?}", other),
        }
    }

    #[test]
    fn zero_values_fail_validation() {
        let args = args_under_test(&["--rotation-secs", "0"]).unwrap();
        assert!(matches!(Config::load(&args), Err(ConfigError::NotInRange(_))));

        let args = args_under_test(&["--parse-workers", "0"]).unwrap();
        assert!(matches!(Config::load(&args), Err(ConfigError::NotInRange(_))));

        let args = args_under_test(&["--queue-capacity", "0"]).unwrap();
        assert!(matches!(Config::load(&args), Err(ConfigError::NotInRange(_))));
    }

    #[test]
    fn bad_log_level_fails_validation() {
        let args = args_under_test(&["--log-level", "chatty"]).unwrap();
        assert!(matches!(Config::load(&args), Err(ConfigError::NotInRange(_))));

        let args = args_under_test(&["--log-level", "debug"]).unwrap();
        assert_eq!(Config::load(&args).unwrap().log_filter(), LevelFilter::Debug);
    }

    #[test]
    fn missing_config_file_is_an_io_error() {
        let args = args_under_test(&["--config", "/nonexistent/netsentry.toml"]).unwrap();
        assert!(matches!(Config::load(&args), Err(ConfigError::IoError(_))));
    }
}
