//! Error types for sigbuf.
//!
//! Backpressure is not an error: a buffer with no room reports `0` from
//! `space_available()` and a blocked callback that cannot help returns
//! `Ok(false)`. The variants below are for conditions the caller has to act on.

use thiserror::Error;

/// Result type alias using sigbuf's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for buffer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Storage for a buffer could not be acquired.
    #[error("buffer allocation failed: {0}")]
    AllocationFailed(String),

    /// A copy between (or within) memory domains failed.
    ///
    /// The buffer's data path is no longer trustworthy; the current
    /// production step must be abandoned.
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    /// The backend does not support the requested primitive or context.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// A programming error, such as detaching a reader that was never attached.
    ///
    /// Not meant to be caught and retried.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// System call error (via rustix).
    #[error("system error: {0}")]
    System(#[from] rustix::io::Errno),
}

impl Error {
    /// Returns true for errors that indicate a bug in the caller.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::InvariantViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::TransferFailed("device lost".into());
        assert_eq!(err.to_string(), "transfer failed: device lost");
    }

    #[test]
    fn test_invariant_violation_is_distinct() {
        assert!(Error::InvariantViolation("x".into()).is_invariant_violation());
        assert!(!Error::AllocationFailed("x".into()).is_invariant_violation());
    }
}
