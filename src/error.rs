//! Error taxonomy shared by the supervisor, the bag catalog and the
//! control surface.

use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::supervisor::ProcessKind;

#[derive(Error, Debug)]
pub enum BagError {
    #[error("{kind} process is already running ({label})")]
    AlreadyRunning { kind: ProcessKind, label: String },
    #[error("no {0} process is running")]
    NotRunning(ProcessKind),
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },
    #[error("{tool}: {reason}")]
    ExternalTool { tool: String, reason: String },
    #[error("failed to {operation} {}: {source}", path.display())]
    Filesystem {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl BagError {
    pub fn not_found(what: &'static str, key: impl ToString) -> Self {
        BagError::NotFound {
            what,
            key: key.to_string(),
        }
    }

    pub fn filesystem(operation: &'static str, path: &Path, source: io::Error) -> Self {
        BagError::Filesystem {
            operation,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Maps a spawn failure to an actionable message; a missing binary is
    /// the common case.
    pub fn spawn_failed(program: &str, err: io::Error, install_hint: &str) -> Self {
        let reason = if err.kind() == io::ErrorKind::NotFound {
            format!("{program} not found. {install_hint}")
        } else {
            format!("failed to start {program}: {err}")
        };
        BagError::ExternalTool {
            tool: program.to_string(),
            reason,
        }
    }

    /// Stable machine-readable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            BagError::AlreadyRunning { .. } => "already_running",
            BagError::NotRunning(_) => "not_running",
            BagError::NotFound { .. } => "not_found",
            BagError::ExternalTool { .. } => "external_tool",
            BagError::Filesystem { .. } => "filesystem",
            BagError::InvalidArgument(_) => "invalid_argument",
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            BagError::AlreadyRunning { kind, .. } => {
                format!("Stop the current {kind} before starting a new one.")
            }
            BagError::NotRunning(kind) => format!("Start a {kind} first."),
            BagError::NotFound { what: "bag", .. } => {
                "Rescan the folder to refresh the bag list.".to_string()
            }
            BagError::NotFound { .. } => "Check the value and try again.".to_string(),
            BagError::ExternalTool { reason, .. } => reason.clone(),
            BagError::Filesystem {
                operation: "parse",
                path,
                ..
            } => format!(
                "{} is malformed. Rescan the folder to set it aside and rebuild it.",
                path.display()
            ),
            BagError::Filesystem { path, .. } => {
                format!("Check that {} exists and is writable.", path.display())
            }
            BagError::InvalidArgument(_) => "Correct the request and try again.".to_string(),
        }
    }
}

/// Serializable form of [`BagError`] returned by control-surface commands.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommandError {
    pub code: String,
    pub message: String,
    pub suggestion: String,
}

impl CommandError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: "invalid_request".into(),
            message: message.into(),
            suggestion: "Send one JSON object per line with a \"command\" field.".into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: "internal".into(),
            message: message.into(),
            suggestion: "Run with BAG_MANAGER_DEBUG=1 and check the log.".into(),
        }
    }
}

impl From<BagError> for CommandError {
    fn from(err: BagError) -> Self {
        Self {
            code: err.code().to_string(),
            suggestion: err.suggestion(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_names_the_install_hint() {
        let err = BagError::spawn_failed(
            "7z",
            io::Error::from(io::ErrorKind::NotFound),
            "Please install p7zip-full",
        );
        assert_eq!(err.code(), "external_tool");
        assert_eq!(err.to_string(), "7z: 7z not found. Please install p7zip-full");
    }

    #[test]
    fn malformed_file_suggests_a_rebuild() {
        let err = BagError::filesystem(
            "parse",
            Path::new("/data/bags_metadata.json"),
            io::Error::new(io::ErrorKind::InvalidData, "missing field"),
        );
        assert!(err.suggestion().starts_with("/data/bags_metadata.json is malformed."));

        let err = BagError::filesystem(
            "write",
            Path::new("/data/bags_metadata.json"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(err.suggestion().contains("writable"));
    }

    #[test]
    fn command_error_keeps_code_and_message() {
        let err: CommandError = BagError::NotRunning(ProcessKind::Playback).into();
        assert_eq!(err.code, "not_running");
        assert_eq!(err.message, "no playback process is running");
        assert_eq!(err.suggestion, "Start a playback first.");
    }
}
