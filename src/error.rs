use std::collections::TryReserveError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AllocError>;

/// Node storage could not be grown.
///
/// This is the only failure the tree and map report. It is raised before any
/// link is rewritten, so the structure that returned it is unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to allocate {requested} tree node(s)")]
pub struct AllocError {
    /// Number of node slots the operation tried to reserve.
    pub requested: usize,
    #[source]
    source: TryReserveError,
}

impl AllocError {
    pub(crate) fn new(requested: usize, source: TryReserveError) -> Self {
        tracing::warn!(requested, error = %source, "node allocation failed");
        Self { requested, source }
    }
}
