use thiserror::Error;

use crate::search::SearchError;

/// Errors raised while coordinating a filter-join search.
///
/// Any variant fails the whole request: no partially rewritten query is
/// ever delivered downstream.
#[derive(Debug, Error)]
pub enum CoordinateError {
    /// Malformed query source, or a malformed embedded wrapper query.
    /// No lookups are issued once this is raised.
    #[error("failed to parse query source: {0}")]
    Parse(String),

    /// A filter-join clause is missing a required attribute, carries an
    /// attribute of the wrong type, or a lookup result exceeded its size
    /// bound.
    #[error("invalid filter join: {0}")]
    Validation(String),

    /// The search backend failed while resolving a join lookup.
    #[error("filter join lookup failed: {0}")]
    Lookup(#[source] SearchError),

    /// The rewritten main query failed at the search backend. Propagated
    /// unchanged; no coordinate metadata is attached.
    #[error("search execution failed: {0}")]
    Execution(#[source] SearchError),
}

impl CoordinateError {
    /// Whether the failure is the caller's fault (bad request) rather
    /// than a backend problem.
    pub fn is_client_error(&self) -> bool {
        matches!(self, CoordinateError::Parse(_) | CoordinateError::Validation(_))
    }
}
