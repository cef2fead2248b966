//! Error types for the NAS abstraction layer
//!
//! Every failure a driver can report is a variant of [`Error`]. Resource
//! specific failures carry the [`ResourceKind`] they concern, so a caller can
//! match `Error::DoesNotExist { kind: ResourceKind::Cache, .. }` instead of
//! juggling one exception type per object class.

use crate::domain::objects::ParsedData;
use crate::domain::size::Size;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Kind of NAS resource an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    FileSystem,
    Share,
    Disk,
    Pool,
    Cache,
    Snapshot,
    NasServer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::FileSystem => write!(f, "filesystem"),
            ResourceKind::Share => write!(f, "share"),
            ResourceKind::Disk => write!(f, "disk"),
            ResourceKind::Pool => write!(f, "pool"),
            ResourceKind::Cache => write!(f, "cache"),
            ResourceKind::Snapshot => write!(f, "snapshot"),
            ResourceKind::NasServer => write!(f, "nasserver"),
        }
    }
}

/// Unified error type for all drivers
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Implementation error: {0}")]
    Implementation(String),

    #[error("{0}")]
    InvalidArguments(String),

    // =========================================================================
    // Resource Errors
    // =========================================================================
    #[error("{message}")]
    DoesNotExist { kind: ResourceKind, message: String },

    #[error("{message}")]
    AlreadyExists { kind: ResourceKind, message: String },

    #[error("{message}")]
    Creation { kind: ResourceKind, message: String },

    #[error("{message}")]
    Deletion { kind: ResourceKind, message: String },

    #[error("{operation} is not supported for {kind} resources")]
    Unsupported {
        kind: ResourceKind,
        operation: &'static str,
    },

    // =========================================================================
    // Storage Size Errors
    // =========================================================================
    #[error("{message}")]
    Size { kind: ResourceKind, message: String },

    #[error("{message}")]
    Resize { kind: ResourceKind, message: String },

    #[error("{message}")]
    SameSize { kind: ResourceKind, message: String },

    #[error("{message}")]
    CannotShrink { kind: ResourceKind, message: String },

    #[error("{message}")]
    InsufficientSpace {
        kind: ResourceKind,
        message: String,
        suggested: Option<Size>,
    },

    #[error("{0}")]
    SizeFormat(String),

    #[error("{0}")]
    SizeOverflow(String),

    // =========================================================================
    // State Errors
    // =========================================================================
    #[error("{0}")]
    Online(String),

    #[error("{0}")]
    Offline(String),

    #[error("{0}")]
    Restore(String),

    #[error("{0}")]
    RollsyncRunning(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("{message}")]
    IncompleteParsedInformation { message: String, parsed: ParsedData },

    #[error("{0}")]
    UnexpectedOutput(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    #[error("{0}")]
    ExecCommand(String),

    #[error("{0}")]
    ExecutionTimeout(String),

    #[error("{0}")]
    VxCommand(String),

    #[error("{0}")]
    BadUser(String),

    #[error("{0}")]
    BadPrivileges(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("{0}")]
    UnableToDiscoverDriver(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract category of an error, independent of the vendor wording
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    Conflict,
    ValidationFailure,
    CapacityFailure,
    StateConflict,
    TransientAmbiguous,
    ParseIncomplete,
    PermissionDenied,
    Backend,
    Internal,
}

/// Action a caller may take on error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Verify the outcome (e.g. with `exists`) then retry if needed
    Verify,
    /// Retry the whole operation after the given delay
    RetryAfter(Duration),
    /// Do not retry, the request itself must change
    NoRetry,
}

impl Error {
    pub fn does_not_exist(kind: ResourceKind, message: impl Into<String>) -> Self {
        Error::DoesNotExist {
            kind,
            message: message.into(),
        }
    }

    pub fn already_exists(kind: ResourceKind, message: impl Into<String>) -> Self {
        Error::AlreadyExists {
            kind,
            message: message.into(),
        }
    }

    pub fn creation(kind: ResourceKind, message: impl Into<String>) -> Self {
        Error::Creation {
            kind,
            message: message.into(),
        }
    }

    pub fn deletion(kind: ResourceKind, message: impl Into<String>) -> Self {
        Error::Deletion {
            kind,
            message: message.into(),
        }
    }

    pub fn size(kind: ResourceKind, message: impl Into<String>) -> Self {
        Error::Size {
            kind,
            message: message.into(),
        }
    }

    pub fn resize(kind: ResourceKind, message: impl Into<String>) -> Self {
        Error::Resize {
            kind,
            message: message.into(),
        }
    }

    pub fn insufficient_space(kind: ResourceKind, message: impl Into<String>) -> Self {
        Error::InsufficientSpace {
            kind,
            message: message.into(),
            suggested: None,
        }
    }

    pub fn unsupported(kind: ResourceKind, operation: &'static str) -> Self {
        Error::Unsupported { kind, operation }
    }

    pub fn incomplete(message: impl Into<String>, parsed: impl Into<ParsedData>) -> Self {
        Error::IncompleteParsedInformation {
            message: message.into(),
            parsed: parsed.into(),
        }
    }

    /// Resource kind the error is about, when it is resource specific
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            Error::DoesNotExist { kind, .. }
            | Error::AlreadyExists { kind, .. }
            | Error::Creation { kind, .. }
            | Error::Deletion { kind, .. }
            | Error::Unsupported { kind, .. }
            | Error::Size { kind, .. }
            | Error::Resize { kind, .. }
            | Error::SameSize { kind, .. }
            | Error::CannotShrink { kind, .. }
            | Error::InsufficientSpace { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True when this is the "does not exist" error of the given kind
    pub fn is_not_found(&self, of: ResourceKind) -> bool {
        matches!(self, Error::DoesNotExist { kind, .. } if *kind == of)
    }

    /// Map the error onto the abstract taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::DoesNotExist { .. } => ErrorCategory::NotFound,
            Error::AlreadyExists { .. } => ErrorCategory::Conflict,
            Error::InvalidArguments(_)
            | Error::Size { .. }
            | Error::SizeFormat(_)
            | Error::SizeOverflow(_)
            | Error::Unsupported { .. } => ErrorCategory::ValidationFailure,
            Error::InsufficientSpace { .. } => ErrorCategory::CapacityFailure,
            Error::SameSize { .. }
            | Error::CannotShrink { .. }
            | Error::RollsyncRunning(_)
            | Error::Online(_)
            | Error::Offline(_) => ErrorCategory::StateConflict,
            Error::ExecutionTimeout(_) | Error::Connection(_) | Error::Http(_) => {
                ErrorCategory::TransientAmbiguous
            }
            Error::IncompleteParsedInformation { .. } => ErrorCategory::ParseIncomplete,
            Error::BadUser(_) | Error::BadPrivileges(_) => ErrorCategory::PermissionDenied,
            Error::Internal(_)
            | Error::Configuration(_)
            | Error::Implementation(_)
            | Error::Pattern(_) => ErrorCategory::Internal,
            _ => ErrorCategory::Backend,
        }
    }

    /// Determine what a caller should do about this error
    pub fn action(&self) -> ErrorAction {
        match self.category() {
            ErrorCategory::TransientAmbiguous => ErrorAction::Verify,
            ErrorCategory::ParseIncomplete => ErrorAction::RetryAfter(Duration::from_secs(15)),
            ErrorCategory::StateConflict if matches!(self, Error::RollsyncRunning(_)) => {
                ErrorAction::RetryAfter(Duration::from_secs(60))
            }
            _ => ErrorAction::NoRetry,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRetry)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(self.category(), ErrorCategory::TransientAmbiguous)
    }

    /// Partial results carried by an incomplete-information error
    pub fn parsed_data(&self) -> Option<&ParsedData> {
        match self {
            Error::IncompleteParsedInformation { parsed, .. } => Some(parsed),
            _ => None,
        }
    }
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;
