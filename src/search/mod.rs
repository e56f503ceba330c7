//! External search-execution capability
//!
//! The coordination layer never talks to a concrete backend directly; it
//! consumes this trait. Production wires in [`elastic::ElasticSearchService`],
//! tests inject scripted implementations.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod elastic;

/// Backend failures. Clone is required so an in-flight cache computation
/// can report the same failure to every caller awaiting it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    /// The backend could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with an error.
    #[error("search backend error: {0}")]
    Backend(String),

    /// The backend answered, but not in the shape we asked for.
    #[error("unexpected backend response: {0}")]
    InvalidResponse(String),

    /// The task computing a shared lookup was dropped before finishing.
    #[error("lookup computation was cancelled")]
    Cancelled,
}

/// The two operations the coordination layer needs from the host engine.
#[async_trait]
pub trait SearchService: Send + Sync {
    /// Collect the distinct values of `field` across documents of
    /// `indices` matching `filter` (all documents when `None`). At most
    /// `size_hint` values are returned; the caller detects bound
    /// overflow by asking for one more value than it will accept.
    async fn execute_lookup(
        &self,
        indices: &[String],
        field: &str,
        filter: Option<&Value>,
        size_hint: usize,
    ) -> Result<Vec<Value>, SearchError>;

    /// Execute the (rewritten) main query document against `indices`
    /// and return the backend's response document.
    async fn execute_query(&self, indices: &[String], query: &Value)
        -> Result<Value, SearchError>;
}
