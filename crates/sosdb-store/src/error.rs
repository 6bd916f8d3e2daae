//! Error type shared by the storage facade and its backends

use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Failure from a storage operation.
///
/// Argument validation failures ([`StoreError::InvalidArgument`]) are raised
/// before the backend is touched. Connectivity failures surface as
/// [`StoreError::Unavailable`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store unavailable at {target}: {reason}")]
    Unavailable { target: String, reason: String },

    #[error("backend: {0}")]
    Backend(#[from] duckdb::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record {collection}/{id}: {reason}")]
    Corrupt {
        collection: String,
        id: String,
        reason: String,
    },
}

impl StoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Whether the store could not be reached at all (as opposed to
    /// rejecting a request).
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn unavailable_is_connectivity() {
        let err = StoreError::Unavailable {
            target: "duckdb:///tmp/x.duckdb".into(),
            reason: "locked".into(),
        };
        assert!(err.is_connectivity());
        assert!(!err.is_invalid_argument());
    }

    #[test]
    fn io_timeout_is_connectivity() {
        let err = StoreError::Io(std::io::Error::new(ErrorKind::TimedOut, "slow"));
        assert!(err.is_connectivity());
    }

    #[test]
    fn io_not_found_is_not_connectivity() {
        let err = StoreError::Io(std::io::Error::new(ErrorKind::NotFound, "gone"));
        assert!(!err.is_connectivity());
    }

    #[test]
    fn invalid_argument_display() {
        let err = StoreError::invalid("bad field");
        assert!(err.is_invalid_argument());
        assert_eq!(err.to_string(), "invalid argument: bad field");
    }

    #[test]
    fn corrupt_display_names_record() {
        let err = StoreError::Corrupt {
            collection: "cc_pdf.files".into(),
            id: "p1".into(),
            reason: "hash mismatch".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("cc_pdf.files/p1"));
        assert!(msg.contains("hash mismatch"));
    }
}
