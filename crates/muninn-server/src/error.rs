// crates/muninn-server/src/error.rs
// Standardized error types for Muninn

use thiserror::Error;

/// Main error type for the Muninn library.
///
/// The variants follow the error taxonomy of the engine: validation failures
/// are surfaced to the caller verbatim, integrity failures are fatal to the
/// store handle, schema-behind is a warning, and everything adapter-level is
/// propagated with enough structure to log by source.
#[derive(Error, Debug)]
pub enum MuninnError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("project not set")]
    ProjectNotSet,

    #[error("integrity check failed: {0}")]
    Integrity(String),

    #[error("schema version {found} is newer than supported {supported}")]
    SchemaBehind { found: i64, supported: i64 },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote primary unreachable: {0}")]
    Unreachable(String),

    #[error("unavailable in {mode} mode: {what}")]
    Unavailable { mode: &'static str, what: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("task cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown error: {0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Convenience type alias for Result using MuninnError
pub type Result<T> = std::result::Result<T, MuninnError>;

impl MuninnError {
    /// Convert to user-facing string for tool boundaries
    pub fn to_user_string(&self) -> String {
        self.to_string()
    }

    /// Process exit code for the CLI surface.
    /// 0 success, 1 validation/usage, 2 integrity, 3 unreachable remote.
    pub fn exit_code(&self) -> i32 {
        match self {
            MuninnError::Integrity(_) => 2,
            MuninnError::Unreachable(_) => 3,
            _ => 1,
        }
    }
}

impl From<String> for MuninnError {
    fn from(s: String) -> Self {
        MuninnError::Other(s)
    }
}

impl From<tokio::task::JoinError> for MuninnError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            MuninnError::Cancelled
        } else {
            MuninnError::Other(err.to_string())
        }
    }
}

impl From<MuninnError> for String {
    fn from(err: MuninnError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MuninnError::Integrity("bad".into()).exit_code(), 2);
        assert_eq!(MuninnError::Unreachable("down".into()).exit_code(), 3);
        assert_eq!(MuninnError::InvalidInput("nope".into()).exit_code(), 1);
        assert_eq!(MuninnError::ProjectNotSet.exit_code(), 1);
    }

    #[test]
    fn test_unavailable_message_names_mode() {
        let err = MuninnError::Unavailable {
            mode: "http",
            what: "raw connection access",
        };
        let msg = err.to_string();
        assert!(msg.contains("http"));
        assert!(msg.contains("raw connection access"));
    }

    #[test]
    fn test_schema_behind_is_structured() {
        let err = MuninnError::SchemaBehind {
            found: 9,
            supported: 7,
        };
        assert!(err.to_string().contains('9'));
        assert!(err.to_string().contains('7'));
    }
}
