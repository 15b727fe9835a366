//! Error types for the provisioning orchestrator.
//!
//! Every failure a deployment can hit is classified into one of a handful of
//! families: privilege, configuration, host resources, builds, external
//! tools, and the post-deploy health probe. All of them are wrapped by
//! [`DeployError`], which also decides the process exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code used when the run is interrupted by a signal.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Exit code used for validation and phase failures.
pub const EXIT_FAILURE: u8 = 1;

/// Number of trailing stderr lines kept in tool errors.
const STDERR_TAIL_LINES: usize = 12;

/// The main error type for the orchestrator.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The caller lacks the rights needed to provision the host.
    #[error("Privilege error: {0}")]
    Privilege(#[from] PrivilegeError),

    /// Invalid, missing, or contradictory input.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The host does not have the resources the deployment needs.
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    /// A build tool failed or produced unusable output.
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// A wrapped subprocess exited unsuccessfully.
    #[error("External tool error: {0}")]
    ExternalTool(#[from] ExternalToolError),

    /// The post-deploy probe never reported healthy within its budget.
    #[error("Health check timed out: {url} did not become healthy after {attempts} attempts ({interval_secs}s apart)")]
    HealthCheckTimeout {
        /// Probed URL.
        url: String,
        /// Attempts performed.
        attempts: u32,
        /// Seconds between attempts.
        interval_secs: u64,
    },

    /// A phase failed; wraps the underlying cause with the phase name.
    #[error("Phase '{phase}' failed: {source}")]
    PhaseFailed {
        /// Human-readable phase name.
        phase: String,
        /// Underlying error.
        #[source]
        source: Box<DeployError>,
    },

    /// The run was interrupted by a signal.
    #[error("Deployment interrupted by {signal}")]
    Interrupted {
        /// Signal name (SIGINT, SIGTERM).
        signal: String,
    },

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Insufficient rights.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// The process is not running as root.
    #[error("{operation} requires root privileges (effective uid {uid})")]
    NotRoot {
        /// What was attempted.
        operation: String,
        /// Effective uid of the process.
        uid: u32,
    },
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// A required parameter was not supplied.
    #[error("Missing required parameter: {name}")]
    MissingParameter {
        /// Flag or field name.
        name: String,
    },

    /// A required directory or file does not exist or cannot be read.
    #[error("Required path is missing or unreadable: {path}")]
    PathUnavailable {
        /// The offending path.
        path: PathBuf,
    },

    /// Exactly one half of the TLS certificate/key pair was given.
    #[error("TLS certificate and key must be supplied together (both or neither)")]
    TlsPairIncomplete,

    /// Neither TLS material nor a contact email was supplied.
    #[error("A contact email is required to request a certificate when no TLS material is supplied")]
    MissingContact,
}

/// Host resource errors.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Not enough free disk space.
    #[error("Insufficient disk space on {mount}: {available_bytes} bytes free, {required_bytes} required")]
    InsufficientDisk {
        /// Mount point that was checked.
        mount: String,
        /// Bytes available.
        available_bytes: u64,
        /// Bytes required.
        required_bytes: u64,
    },

    /// A required port is bound by an unrecognized process.
    #[error("Port {port} is already in use by '{process}'")]
    PortInUse {
        /// The port.
        port: u16,
        /// The process holding it.
        process: String,
    },

    /// Disk information could not be obtained.
    #[error("Cannot determine filesystem for {path}")]
    UnknownFilesystem {
        /// Path that was checked.
        path: PathBuf,
    },
}

/// Build failures.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build tool failed.
    #[error("{component} build failed: {source}")]
    ToolFailed {
        /// Which component was being built.
        component: String,
        /// Underlying tool error.
        #[source]
        source: ExternalToolError,
    },

    /// No deployable artifact was produced.
    #[error("No deployable artifact found in {dir}")]
    ArtifactMissing {
        /// Directory that was searched.
        dir: PathBuf,
    },

    /// More than one candidate artifact was produced.
    #[error("Ambiguous build output in {dir}: {candidates:?}")]
    ArtifactAmbiguous {
        /// Directory that was searched.
        dir: PathBuf,
        /// Candidate file names.
        candidates: Vec<String>,
    },
}

/// A subprocess returned a non-zero exit status.
#[derive(Debug, Error)]
#[error("`{command}` exited with {status_text}{}", stderr_suffix(.stderr))]
pub struct ExternalToolError {
    /// Rendered command line.
    pub command: String,
    /// Exit code if the process exited normally.
    pub code: Option<i32>,
    /// Human-readable status.
    pub status_text: String,
    /// Tail of the captured stderr.
    pub stderr: String,
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

/// Result type alias for orchestrator operations.
pub type Result<T> = std::result::Result<T, DeployError>;

impl DeployError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wraps an error with the name of the phase it came from.
    #[must_use]
    pub fn in_phase(self, phase: impl Into<String>) -> Self {
        match self {
            already @ Self::PhaseFailed { .. } => already,
            other => Self::PhaseFailed {
                phase: phase.into(),
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, looking through phase wrappers.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::PhaseFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns true if the error must halt the phase sequence and trigger rollback.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self.root(), Self::HealthCheckTimeout { .. })
    }

    /// Returns the process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self.root() {
            Self::Interrupted { .. } => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a missing-parameter error.
    #[must_use]
    pub fn missing(name: impl Into<String>) -> Self {
        Self::MissingParameter { name: name.into() }
    }
}

impl ExternalToolError {
    /// Builds an error from a finished process.
    #[must_use]
    pub fn from_parts(command: impl Into<String>, code: Option<i32>, stderr: &str) -> Self {
        let status_text = code.map_or_else(
            || String::from("termination by signal"),
            |code| format!("status {code}"),
        );
        Self {
            command: command.into(),
            code,
            status_text,
            stderr: tail_lines(stderr, STDERR_TAIL_LINES),
        }
    }

    /// Builds an error for a process that could not be spawned at all.
    #[must_use]
    pub fn spawn_failed(command: impl Into<String>, err: &std::io::Error) -> Self {
        Self {
            command: command.into(),
            code: None,
            status_text: String::from("spawn failure"),
            stderr: err.to_string(),
        }
    }
}

/// Keeps the last `max` non-empty lines of `text`.
fn tail_lines(text: &str, max: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max);
    lines[start..].join("\n")
}
