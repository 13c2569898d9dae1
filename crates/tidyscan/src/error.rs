//! Error types for the worker boundary and the session controller

use crate::model::ScanStatus;
use thiserror::Error;

/// Failure reported by (or on the way to) the worker process.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The host cannot provide the capability at all, e.g. the native runtime is missing
    #[error("host capability unavailable: {0}")]
    Unavailable(String),

    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("malformed payload from `{command}`: {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("not supported: {0}")]
    Unsupported(String),
}

impl BackendError {
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            message: message.into(),
        }
    }

    pub fn is_environment(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Errors returned by controller operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a scan is already {status}")]
    AlreadyActive { status: ScanStatus },

    #[error("no scan result is loaded")]
    NoResult,

    #[error("no active session")]
    NoSession,

    #[error("category `{0}` is already loading")]
    LoadInFlight(String),

    #[error("unknown category `{0}`")]
    UnknownCategory(String),

    #[error("nothing is selected")]
    EmptySelection,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// Where a stored error came from. Drives how it is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Environment,
    StartFailure,
    MidScan,
    Control,
    Load,
    Delete,
    Stalled,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Environment => "E-ENV",
            ErrorKind::StartFailure => "E-START",
            ErrorKind::MidScan => "E-SCAN",
            ErrorKind::Control => "E-CONTROL",
            ErrorKind::Load => "E-LOAD",
            ErrorKind::Delete => "E-DELETE",
            ErrorKind::Stalled => "E-STALL",
        }
    }

    /// Banner with a retry action; everything else is transient
    pub fn offers_retry(&self) -> bool {
        matches!(
            self,
            ErrorKind::StartFailure | ErrorKind::MidScan | ErrorKind::Stalled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_detection() {
        assert!(BackendError::Unavailable("no runtime".into()).is_environment());
        assert!(!BackendError::command("x_start", "boom").is_environment());
    }

    #[test]
    fn test_messages() {
        let err = SessionError::AlreadyActive {
            status: ScanStatus::Paused,
        };
        assert_eq!(err.to_string(), "a scan is already paused");

        let err: SessionError = BackendError::command("disk_scan_start", "denied").into();
        assert_eq!(err.to_string(), "command `disk_scan_start` failed: denied");
    }

    #[test]
    fn test_retry_only_for_scan_failures() {
        assert!(ErrorKind::StartFailure.offers_retry());
        assert!(ErrorKind::Stalled.offers_retry());
        assert!(!ErrorKind::Environment.offers_retry());
        assert!(!ErrorKind::Control.offers_retry());
        assert_eq!(ErrorKind::Delete.code(), "E-DELETE");
    }
}
