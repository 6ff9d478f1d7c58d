//! Error types for the Shepherd crawl-state daemon.
//!
//! We use `thiserror` for automatic `Display`/`Error` impls, the same as
//! every other crate in the workspace. `Error` is the unified type that
//! storage/durability/concurrency/engine errors convert into at their
//! public boundaries, so the master loop can match on one type when
//! deciding whether a failure is fatal.

use std::io;
use thiserror::Error;

/// Result type alias for Shepherd operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the Shepherd workspace.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Structural corruption in an on-disk file: bad magic, short read,
    /// trailer mismatch. Always fatal.
    #[error("pool corrupted: {0}")]
    Corruption(String),

    /// A record violated an invariant (duplicate footprint in a closed
    /// index, zombie carrying SACRISIMMUS, etc).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The content filter rejected a contribution or job.
    #[error("filter rejected (code {code}): {message}")]
    FilterRejected {
        /// Filter-provided numeric code, forwarded as-is.
        code: i32,
        /// Human-readable rejection reason.
        message: String,
    },

    /// The select stage would drop more gathered URLs than
    /// `Config::safety_brake_limit` allows; the whole cycle aborts.
    #[error("safety brake tripped: {lost} URLs would be lost (limit {limit})")]
    SafetyBrakeTripped {
        /// Number of URLs that would have been lost.
        lost: u64,
        /// The configured limit that was exceeded.
        limit: u64,
    },

    /// Free disk space or bucket-file headroom fell below the configured
    /// minimum; new cycles are blocked until a cleanup runs.
    #[error("disk pressure: {0}")]
    DiskPressure(String),

    /// Invalid or out-of-range configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A requested state directory or phase transition doesn't exist or
    /// isn't reachable from the current state.
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    /// Serialization/deserialization of an on-disk record failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A wire-protocol message was malformed: bad leader, unknown
    /// command byte, truncated payload, or similar.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// True for errors that should terminate the master process outright
    /// (§7 "Fatal structural").
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Corruption(_))
    }

    /// True for errors that should cause the master to roll the state
    /// back to the last closed state rather than merely log and continue.
    pub fn requires_rollback(&self) -> bool {
        matches!(
            self,
            Error::InvariantViolation(_) | Error::SafetyBrakeTripped { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_is_fatal() {
        let err = Error::Corruption("bad trailer magic".into());
        assert!(err.is_fatal());
        assert!(!err.requires_rollback());
    }

    #[test]
    fn invariant_violation_requires_rollback() {
        let err = Error::InvariantViolation("duplicate footprint".into());
        assert!(err.requires_rollback());
        assert!(!err.is_fatal());
    }

    #[test]
    fn safety_brake_display() {
        let err = Error::SafetyBrakeTripped {
            lost: 500,
            limit: 100,
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("100"));
    }
}
