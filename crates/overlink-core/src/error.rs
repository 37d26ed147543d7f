//! Error types for the OVERLINK message transport core.
//!
//! Every failure the linearizer can observe is surfaced as a terminal close
//! status rather than as a per-call error, so the error type is `Clone` and
//! comparable: one latched status is handed to every current and future read.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, LinearizeError>;

/// Terminal status of a reassembled message stream
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinearizeError {
    /// Data beyond the declared end of message, or a conflicting end-of-message
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Overlapping chunks carried different content
    #[error("data loss: {0}")]
    DataLoss(String),

    /// Stream closed before the whole message was delivered
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Transport below the linearizer became unavailable
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Internal failure reported by a collaborator
    #[error("internal error: {0}")]
    Internal(String),
}

/// Category of a [`LinearizeError`], without its message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// See [`LinearizeError::InvalidArgument`]
    InvalidArgument,
    /// See [`LinearizeError::DataLoss`]
    DataLoss,
    /// See [`LinearizeError::Cancelled`]
    Cancelled,
    /// See [`LinearizeError::Unavailable`]
    Unavailable,
    /// See [`LinearizeError::Internal`]
    Internal,
}

impl LinearizeError {
    /// Get the status category
    #[must_use]
    pub fn code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::InvalidArgument,
            Self::DataLoss(_) => StatusCode::DataLoss,
            Self::Cancelled(_) => StatusCode::Cancelled,
            Self::Unavailable(_) => StatusCode::Unavailable,
            Self::Internal(_) => StatusCode::Internal,
        }
    }

    /// Get the human-readable message
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidArgument(msg)
            | Self::DataLoss(msg)
            | Self::Cancelled(msg)
            | Self::Unavailable(msg)
            | Self::Internal(msg) => msg,
        }
    }
}

/// A broken data-model invariant, reported by
/// [`Linearizer::check_invariants`](crate::Linearizer::check_invariants)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    /// A closed stream still buffers data
    #[error("closed stream holds {0} pending ranges")]
    ClosedWithPending(usize),

    /// A pending range starts before the delivery offset
    #[error("pending range at {key} starts before offset {offset}")]
    BehindOffset {
        /// Start of the offending range
        key: u64,
        /// Current delivery offset
        offset: u64,
    },

    /// Two pending ranges overlap
    #[error("pending range at {key} overlaps previous range ending at {prev_end}")]
    Overlap {
        /// Start of the offending range
        key: u64,
        /// End of the preceding range
        prev_end: u64,
    },

    /// A pending range is empty
    #[error("empty pending range at {0}")]
    EmptyRange(u64),

    /// Data is buffered or delivered past the declared message length
    #[error("byte {end} lies past message length {length}")]
    PastLength {
        /// End of the offending data
        end: u64,
        /// Latched message length
        length: u64,
    },

    /// The buffered byte counter disagrees with the pending map
    #[error("buffered byte count {counted} disagrees with pending total {actual}")]
    BufferedMismatch {
        /// Value of the running counter
        counted: u64,
        /// Sum over the pending map
        actual: u64,
    },
}
