//! Error types for flatbridge.

use thiserror::Error;

/// The main error type for flatbridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The session could not be established, or a catalog probe failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A table or file schema could not be determined.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Invalid projection/join combination.
    #[error("Plan error: {0}")]
    Plan(String),

    /// Failure while reading from a source or writing to a sink.
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Unknown job id.
    #[error("Job not found: {0}")]
    NotFound(String),

    /// The database rejected a statement.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration or request validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Stable, lowercase name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Schema(_) => "schema",
            Self::Plan(_) => "plan",
            Self::Transfer(_) => "transfer",
            Self::NotFound(_) => "not_found",
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
        }
    }

    /// Re-classify a failure that happened while moving rows.
    ///
    /// Errors that already carry a more specific kind (connection,
    /// schema, plan) are kept; everything else becomes a `Transfer` error
    /// prefixed with `context`.
    pub fn into_transfer(self, context: &str) -> Self {
        match self {
            Self::Connection(_) | Self::Schema(_) | Self::Plan(_) | Self::Transfer(_) => self,
            Self::Database(msg) | Self::Config(msg) | Self::NotFound(msg) => {
                Self::Transfer(format!("{}: {}", context, msg))
            }
            Self::Io(e) => Self::Transfer(format!("{}: {}", context, e)),
        }
    }
}

impl From<csv::Error> for BridgeError {
    fn from(e: csv::Error) -> Self {
        let message = e.to_string();
        match e.into_kind() {
            csv::ErrorKind::Io(io) => Self::Io(io),
            _ => Self::Transfer(format!("malformed record: {}", message)),
        }
    }
}

/// Result type alias for flatbridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
