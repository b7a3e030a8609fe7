//! CLI-specific error types and exit code mapping

use ophiron_core::error::OphironError;
use ophiron_cve_scanner::CveScannerError;

/// CLI-specific error type.
///
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from ophiron-core.
    #[error("{0}")]
    Core(#[from] OphironError),

    /// The scan completed and found vulnerable packages.
    #[error("scan found vulnerabilities: {0}")]
    Scan(String),

    /// The host or container runs a distribution the scanner does not support.
    #[error("unsupported target: {0}")]
    Unsupported(String),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                              |
    /// |------|--------------------------------------|
    /// | 0    | Success, no findings                  |
    /// | 1    | General / command error               |
    /// | 2    | Configuration error                   |
    /// | 4    | Scan found vulnerabilities            |
    /// | 5    | Unsupported OS                        |
    /// | 10   | IO error                              |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Core(OphironError::Config(_)) => 2,
            Self::Scan(_) => 4,
            Self::Unsupported(_) => 5,
            Self::Io(_) => 10,
            Self::JsonSerialize(_) | Self::Command(_) | Self::Core(_) => 1,
        }
    }
}

impl From<CveScannerError> for CliError {
    fn from(e: CveScannerError) -> Self {
        match e {
            CveScannerError::UnsupportedOs(os) => Self::Unsupported(os),
            CveScannerError::Config { .. } => Self::Config(e.to_string()),
            other => Self::Command(other.to_string()),
        }
    }
}
