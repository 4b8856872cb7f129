//! Unified error type for the compression pipeline.
//!
//! All crates funnel their failures into [`Error`]. [`Error::kind`] maps every
//! variant onto the failure taxonomy reported to the transport layer.

use std::fmt;
use std::path::PathBuf;

/// Unified error type covering all failure modes of a compression job.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Scratch storage could not be allocated or released.
    #[error("Storage error at {}: {message}", path.display())]
    Storage {
        /// The scratch path involved.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// The submitted file could not be accepted.
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    /// A bundle was unreadable, malformed, or tried to escape its target directory.
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    /// No classifiable media was found, or the input kind is not supported.
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    /// No profile was chosen within the selection window.
    #[error("No profile chosen for job {job_id} within {waited_secs}s")]
    SelectionTimeout {
        /// The job that expired.
        job_id: String,
        /// Length of the selection window in seconds.
        waited_secs: u64,
    },

    /// Every input of the job failed to encode.
    #[error("All {count} encodes failed: {detail}")]
    AllEncodesFailed {
        /// Number of inputs that were attempted or skipped.
        count: usize,
        /// Per-input failure summary.
        detail: String,
    },

    /// A profile choice referenced an unknown or already-resolved job.
    #[error("Stale selection for job {job_id}: {reason}")]
    StaleSelection {
        /// The job id carried by the selection.
        job_id: String,
        /// Why the selection was rejected.
        reason: String,
    },

    /// A profile id that is unknown or was not offered for the job.
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    /// The owner already has a live job and the conflict policy rejects a second one.
    #[error("Session {owner} already has a job in progress")]
    SessionBusy {
        /// The owner session that submitted twice.
        owner: String,
    },

    /// The job was replaced by a newer submission from the same owner.
    #[error("Superseded by a newer submission")]
    Superseded,

    /// The pipeline shut down before the job finished.
    #[error("Cancelled")]
    Cancelled,

    /// The deliverable could not be assembled.
    #[error("Packaging failed: {0}")]
    Packaging(String),

    /// The transport layer refused or failed to take the deliverable.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// An external tool (ffmpeg) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Configuration or request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Name of the failure class reported to the submitter.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Storage { .. } => "StorageError",
            Error::Ingestion(_) => "IngestionError",
            Error::CorruptArchive(_) => "CorruptArchiveError",
            Error::UnsupportedInput(_) => "UnsupportedInputError",
            Error::SelectionTimeout { .. } => "SelectionTimeoutError",
            Error::AllEncodesFailed { .. } => "EncodeFailure",
            Error::StaleSelection { .. } => "StaleSelectionError",
            Error::InvalidProfile(_) => "InvalidProfileError",
            Error::SessionBusy { .. } => "SessionBusyError",
            Error::Superseded => "SupersededError",
            Error::Cancelled => "CancelledError",
            Error::Packaging(_) => "PackagingError",
            Error::Delivery(_) => "DeliveryError",
            Error::Tool { .. } => "EncodeFailure",
            Error::Io { .. } => "StorageError",
            Error::Validation(_) => "ValidationError",
            Error::Internal(_) => "InternalError",
        }
    }

    /// Convenience constructor for [`Error::Storage`].
    pub fn storage(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Error::Storage {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::StaleSelection`].
    pub fn stale(job_id: impl fmt::Display, reason: impl Into<String>) -> Self {
        Error::StaleSelection {
            job_id: job_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_display() {
        let err = Error::storage("/tmp/scratch/job-1", "already exists");
        assert_eq!(
            err.to_string(),
            "Storage error at /tmp/scratch/job-1: already exists"
        );
        assert_eq!(err.kind(), "StorageError");
    }

    #[test]
    fn corrupt_archive_display() {
        let err = Error::CorruptArchive("entry escapes target: ../../etc/passwd".into());
        assert!(err.to_string().contains("../../etc/passwd"));
        assert_eq!(err.kind(), "CorruptArchiveError");
    }

    #[test]
    fn selection_timeout_display() {
        let err = Error::SelectionTimeout {
            job_id: "abc-1234".into(),
            waited_secs: 120,
        };
        assert_eq!(
            err.to_string(),
            "No profile chosen for job abc-1234 within 120s"
        );
        assert_eq!(err.kind(), "SelectionTimeoutError");
    }

    #[test]
    fn all_encodes_failed_kind() {
        let err = Error::AllEncodesFailed {
            count: 2,
            detail: "a.mp3: timed out; b.mp4: exit 1".into(),
        };
        assert_eq!(err.kind(), "EncodeFailure");
    }

    #[test]
    fn stale_selection_display() {
        let err = Error::stale("job-9", "job is not awaiting a profile");
        assert_eq!(
            err.to_string(),
            "Stale selection for job job-9: job is not awaiting a profile"
        );
        assert_eq!(err.kind(), "StaleSelectionError");
    }

    #[test]
    fn session_busy_display() {
        let err = Error::SessionBusy {
            owner: "user-42".into(),
        };
        assert_eq!(err.to_string(), "Session user-42 already has a job in progress");
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "exit code 1");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: exit code 1");
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.kind(), "StorageError");
    }

    #[test]
    fn result_alias() {
        fn ok_fn() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(ok_fn().unwrap(), 42);

        fn err_fn() -> Result<i32> {
            Err(Error::Internal("boom".into()))
        }
        assert!(err_fn().is_err());
    }
}
