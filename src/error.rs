use std::fmt::Display;

/// When things go awry
#[derive(Debug)]
pub enum SteadyDnsError {
    IoError(std::io::Error),
    /// Something failed while loading or writing configuration
    StartupError(String),
    FileError(String),
    EmptyFile,
    DateParseError(String),
    Generic(String),
    Regex(String),
    InvalidValue(String),
    /// A record or zone failed a content invariant (eg: CNAME conflict)
    Validation(String),
    /// The archive file failed a structural check: bad magic, version out
    /// of the supported window, checksum mismatch, or a missing content
    /// block. Never auto-repaired.
    ArchiveCorrupt(String),
    /// `check-conf`/`check-zone` returned a non-zero exit status.
    ValidatorFailed {
        stdout: String,
        stderr: String,
        status: Option<i32>,
    },
    /// A sub-process did not finish inside its deadline.
    Timeout(String),
    NotFound(String),
    /// The requested zone is one of the reserved system zones.
    SystemZone(String),
}

impl Display for SteadyDnsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SteadyDnsError::IoError(err) => write!(f, "IO error: {err}"),
            SteadyDnsError::StartupError(err) => write!(f, "startup error: {err}"),
            SteadyDnsError::FileError(err) => write!(f, "file error: {err}"),
            SteadyDnsError::EmptyFile => write!(f, "empty file"),
            SteadyDnsError::DateParseError(err) => write!(f, "date parse error: {err}"),
            SteadyDnsError::Generic(err) => write!(f, "{err}"),
            SteadyDnsError::Regex(err) => write!(f, "regex error: {err}"),
            SteadyDnsError::InvalidValue(err) => write!(f, "invalid value: {err}"),
            SteadyDnsError::Validation(err) => write!(f, "validation error: {err}"),
            SteadyDnsError::ArchiveCorrupt(err) => write!(f, "archive corrupt: {err}"),
            SteadyDnsError::ValidatorFailed {
                stdout,
                stderr,
                status,
            } => write!(
                f,
                "validator failed (status={status:?}):\nstdout:\n{stdout}\nstderr:\n{stderr}"
            ),
            SteadyDnsError::Timeout(err) => write!(f, "timed out: {err}"),
            SteadyDnsError::NotFound(err) => write!(f, "not found: {err}"),
            SteadyDnsError::SystemZone(err) => write!(f, "system zone: {err}"),
        }
    }
}

impl std::error::Error for SteadyDnsError {}

impl From<regex::Error> for SteadyDnsError {
    fn from(error: regex::Error) -> Self {
        SteadyDnsError::Regex(error.to_string())
    }
}

impl From<std::io::Error> for SteadyDnsError {
    fn from(error: std::io::Error) -> Self {
        SteadyDnsError::IoError(error)
    }
}

impl From<serde_json::Error> for SteadyDnsError {
    fn from(error: serde_json::Error) -> Self {
        SteadyDnsError::FileError(error.to_string())
    }
}

impl From<uuid::Error> for SteadyDnsError {
    fn from(error: uuid::Error) -> Self {
        SteadyDnsError::InvalidValue(error.to_string())
    }
}

impl From<chrono::format::ParseError> for SteadyDnsError {
    fn from(error: chrono::format::ParseError) -> Self {
        SteadyDnsError::DateParseError(error.to_string())
    }
}

impl From<SteadyDnsError> for std::io::Error {
    fn from(error: SteadyDnsError) -> Self {
        match error {
            SteadyDnsError::IoError(err) => err,
            other => std::io::Error::other(other.to_string()),
        }
    }
}
