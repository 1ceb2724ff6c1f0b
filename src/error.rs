//! Error types for PDF Template MCP Server

use thiserror::Error;

/// Result type alias for PDF Template MCP Server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for PDF Template MCP Server
#[derive(Error, Debug)]
pub enum Error {
    /// PDF file not found
    #[error("PDF not found: {path}")]
    PdfNotFound { path: String },

    /// Path exists but cannot be opened for the requested access
    #[error("Permission denied ({access}): {path}")]
    PermissionDenied { path: String, access: &'static str },

    /// Path does not name a PDF file
    #[error("Not a PDF file: {path}")]
    NotAPdf { path: String },

    /// PDF could not be opened or parsed
    #[error("Unreadable PDF: {reason}")]
    UnreadablePdf { reason: String },

    /// Coordinate key does not match `x<int>y<int>_p<int>[_<label>]`
    #[error("Malformed coordinate key {key:?}: {reason}")]
    MalformedKey { key: String, reason: String },

    /// Sidecar alias file could not be parsed or violates its invariants
    #[error("Malformed alias file {path}: {reason}")]
    MalformedAliasFile { path: String, reason: String },

    /// Staged document could not be committed to disk
    #[error("Failed to write {path}: {reason}")]
    WriteFailure { path: String, reason: String },

    /// Replacement batch was empty
    #[error("No fields to set")]
    EmptyBatch,

    /// Path access denied (outside allowed resource directories)
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },

    /// Content stream or object graph could not be rewritten
    #[error("PDF edit failed: {reason}")]
    Edit { reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable name of the failure, used in structured reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::PdfNotFound { .. } => "PdfNotFound",
            Error::PermissionDenied { .. } => "PermissionDenied",
            Error::NotAPdf { .. } => "NotAPdf",
            Error::UnreadablePdf { .. } => "UnreadablePdf",
            Error::MalformedKey { .. } => "MalformedKey",
            Error::MalformedAliasFile { .. } => "MalformedAliasFile",
            Error::WriteFailure { .. } => "WriteFailure",
            Error::EmptyBatch => "EmptyBatch",
            Error::PathAccessDenied { .. } => "PathAccessDenied",
            Error::Edit { .. } => "EditFailure",
            Error::Io(_) => "Io",
            Error::Serialization(_) => "Serialization",
        }
    }

    /// Return a sanitized error message safe to send to clients.
    /// Internal details (library errors, temp paths) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::PdfNotFound { path } => format!("PDF not found: {}", path),
            Error::PermissionDenied { path, access } => {
                format!("Permission denied ({}): {}", access, path)
            }
            Error::NotAPdf { path } => format!("File must be a PDF: {}", path),
            Error::UnreadablePdf { .. } => "PDF could not be opened or parsed".to_string(),
            Error::MalformedKey { key, .. } => format!("Malformed coordinate key: {}", key),
            Error::MalformedAliasFile { path, reason } => {
                format!("Malformed alias file {}: {}", path, reason)
            }
            Error::WriteFailure { path, .. } => {
                format!("Failed to write {}; the original file is unchanged", path)
            }
            Error::EmptyBatch => "fields must be a non-empty mapping".to_string(),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
            Error::Edit { .. } => "PDF edit failed".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
        }
    }
}

impl From<lopdf::Error> for Error {
    fn from(e: lopdf::Error) -> Self {
        Error::UnreadablePdf {
            reason: e.to_string(),
        }
    }
}
