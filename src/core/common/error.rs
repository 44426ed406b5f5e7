use std::io;

use crate::core::common::types::{ObjectId, PageId};

/// Errors raised by the index, its storage layer, and its collaborators.
#[derive(Debug)]
pub enum MkAppError {
    /// The configured page size cannot hold even a minimal node.
    PageTooSmall { page_size: usize },
    /// Too few distinct sample points for the requested polynomial degree.
    DegenerateFit { distinct: usize, required: usize },
    /// Aggregation was requested over zero identifiers.
    EmptyInput,
    /// Query parameter k outside `[1, k_max]`.
    InvalidK { k: usize, k_max: usize },
    /// The operation is not supported by this index.
    UnsupportedOperation(&'static str),
    Io(io::Error),
    Serialization(String),
    NodeNotFound(PageId),
    UnknownObject(ObjectId),
    DimensionMismatch { dim1: usize, dim2: usize },
    TreeLogic(String),
}

impl std::fmt::Display for MkAppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PageTooSmall { page_size } => {
                write!(f, "Page size of {page_size} bytes is chosen too small")
            }
            Self::DegenerateFit { distinct, required } => {
                write!(f, "Degenerate fit: {distinct} distinct samples, {required} required")
            }
            Self::EmptyInput => write!(f, "Aggregation over an empty identifier set"),
            Self::InvalidK { k, k_max } => {
                write!(f, "Invalid k: {k}, must be within [1, {k_max}]")
            }
            Self::UnsupportedOperation(msg) => write!(f, "Unsupported operation: {msg}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            Self::NodeNotFound(page_id) => write!(f, "Node not found on page {page_id}"),
            Self::UnknownObject(id) => write!(f, "Unknown object id: {id}"),
            Self::DimensionMismatch { dim1, dim2 } => {
                write!(f, "Vector dimension mismatch: {dim1} vs {dim2}")
            }
            Self::TreeLogic(msg) => write!(f, "Tree logic error: {msg}"),
        }
    }
}

impl std::error::Error for MkAppError {}

impl From<io::Error> for MkAppError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

// Result type alias for convenience
pub type MkAppResult<T> = Result<T, MkAppError>;
