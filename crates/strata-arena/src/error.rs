//! Allocation error types.

use std::error::Error;
use std::fmt;

/// Errors that can occur during arena and heap operations.
///
/// All variants are local and recoverable: the failed call leaves the
/// arena or heap in the state it was in before the call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The system allocator (or a configured memory limit) could not
    /// provide a block large enough for the request.
    OutOfMemory {
        /// Number of bytes requested from the system.
        requested: usize,
    },
    /// A size computation (request plus overhead and alignment) would
    /// overflow the address space.
    Overflow {
        /// Number of bytes the caller asked for.
        requested: usize,
    },
    /// The call was given an argument it cannot act on.
    InvalidArgument {
        /// Which argument was rejected and why.
        reason: &'static str,
    },
    /// An [`ArenaConfig`](crate::ArenaConfig) or
    /// [`HeapConfig`](crate::HeapConfig) failed validation.
    InvalidConfig {
        /// Which invariant was violated.
        reason: &'static str,
    },
}

impl AllocError {
    /// Whether this error means "could not obtain memory".
    ///
    /// Overflow is reported as a distinct variant but callers usually
    /// treat it the same way as running out of memory.
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. } | Self::Overflow { .. })
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory: could not allocate {requested} bytes")
            }
            Self::Overflow { requested } => {
                write!(
                    f,
                    "allocation size overflow: {requested} bytes plus overhead exceeds address space"
                )
            }
            Self::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            Self::InvalidConfig { reason } => write!(f, "invalid configuration: {reason}"),
        }
    }
}

impl Error for AllocError {}
