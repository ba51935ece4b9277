//! Errors produced while building, checking, and running pipelines.

use serde::{Deserialize, Serialize};

/// The error type of the engine.
///
/// Each variant is a machine-checkable kind, and carries a human-readable message.
#[derive(thiserror::Error, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Bad operator arguments or execution configuration; fatal to pipeline startup.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// Incompatible operator composition; fatal at pipeline-build time.
    #[error("type clash: {0}")]
    TypeClash(String),
    /// A malformed input element.
    #[error("invalid data: {0}")]
    Data(String),
    /// A failed remote spawn, or a lost connection.
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),
    /// A violated internal invariant, or a panic inside an operator.
    #[error("internal error: {0}")]
    Internal(String),
    /// The error has already been reported through the diagnostics channel.
    #[error("error already reported")]
    Silent,
}

impl Error {
    /// True for errors that were already reported as diagnostics.
    pub fn is_silent(&self) -> bool {
        matches!(self, Error::Silent)
    }

    /// A short name for the kind of error.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::TypeClash(_) => "type_clash",
            Error::Data(_) => "data",
            Error::Infrastructure(_) => "infrastructure",
            Error::Internal(_) => "internal",
            Error::Silent => "silent",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Infrastructure(error.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(error: bincode::Error) -> Self {
        Error::Infrastructure(format!("serialization failed: {}", error))
    }
}

/// A `Result` carrying the engine's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_their_kind() {
        let error = Error::TypeClash("expected events".to_string());
        assert_eq!(error.to_string(), "type clash: expected events");
        assert_eq!(error.kind(), "type_clash");
        assert!(!error.is_silent());
        assert!(Error::Silent.is_silent());
    }

    #[test]
    fn io_errors_are_infrastructure_failures() {
        let error: Error = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert!(matches!(error, Error::Infrastructure(_)));
    }
}
