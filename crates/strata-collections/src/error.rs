//! Container error types.

use std::error::Error;
use std::fmt;

use strata_arena::AllocError;

/// Errors returned by the heap-backed containers.
///
/// A failed operation leaves the container exactly as it was.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollectionError {
    /// The heap could not provide storage.
    Alloc(AllocError),
    /// A range had its start after its end.
    InvalidRange {
        /// Start of the range.
        from: usize,
        /// End of the range (exclusive).
        to: usize,
    },
    /// An index or range end lay past the container's length.
    IndexOutOfBounds {
        /// The offending index.
        index: usize,
        /// Container length at the time of the call.
        len: usize,
    },
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alloc(e) => write!(f, "container storage: {e}"),
            Self::InvalidRange { from, to } => {
                write!(f, "invalid range: start {from} is past end {to}")
            }
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for length {len}")
            }
        }
    }
}

impl Error for CollectionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Alloc(e) => Some(e),
            _ => None,
        }
    }
}

impl From<AllocError> for CollectionError {
    fn from(e: AllocError) -> Self {
        Self::Alloc(e)
    }
}
