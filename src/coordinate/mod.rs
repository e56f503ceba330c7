//! Coordinated search pipeline
//!
//! Ties the phases together for one request: parse the query source,
//! unwrap wrapper queries, plan the Filter-Join Forest, resolve it
//! (rewriting every join clause into a `terms` filter), delegate the
//! rewritten query to the search backend, and attach the accumulated
//! join metadata to the successful response. A failure anywhere fails
//! the whole request; failures never carry metadata.

use std::sync::Arc;

use serde_json::Value;

use crate::cache::FilterJoinCache;
use crate::errors::CoordinateError;
use crate::query_tree::wrapper::unwrap_wrapper_queries;
use crate::query_tree::QueryTree;
use crate::search::SearchService;

pub mod executor;
pub mod metadata;
pub mod planner;

use executor::FilterJoinExecutor;
use metadata::CoordinateSearchMetadata;

pub struct CoordinateSearchService {
    search: Arc<dyn SearchService>,
    cache: Arc<FilterJoinCache>,
    default_lookup_size: usize,
}

impl CoordinateSearchService {
    pub fn new(
        search: Arc<dyn SearchService>,
        cache: Arc<FilterJoinCache>,
        default_lookup_size: usize,
    ) -> Self {
        CoordinateSearchService {
            search,
            cache,
            default_lookup_size,
        }
    }

    pub fn cache(&self) -> &Arc<FilterJoinCache> {
        &self.cache
    }

    /// Run one coordinated search: resolve all filter joins in `source`,
    /// execute the rewritten query against `indices`, and return the
    /// backend response with the `coordinate_search` metadata section
    /// merged in.
    pub async fn execute(
        &self,
        indices: &[String],
        source: &Value,
    ) -> Result<Value, CoordinateError> {
        log::debug!("Executing coordinated search on {}", indices.join(","));

        // Planning is synchronous over this request's private tree.
        let mut tree = QueryTree::from_value(source);
        unwrap_wrapper_queries(&mut tree)?;
        let forest = planner::plan(&mut tree)?;

        let (rewritten, metadata) = if forest.is_empty() {
            // Nothing to resolve; the query passes through unrewritten
            // (modulo wrapper unwrapping).
            (tree.to_value(), CoordinateSearchMetadata::default())
        } else {
            let executor = FilterJoinExecutor::new(
                self.search.clone(),
                self.cache.clone(),
                self.default_lookup_size,
            );
            let (tree, metadata) = executor.execute(tree, &forest).await?;
            (tree.to_value(), metadata)
        };

        // Delegate to the backend; the metadata continuation only runs
        // on success, failures propagate unchanged.
        let response = self
            .search
            .execute_query(indices, &rewritten)
            .await
            .map_err(CoordinateError::Execution)?;

        log::debug!(
            "Coordinated search completed ({} join(s) resolved)",
            metadata.actions.len()
        );
        Ok(attach_metadata(response, &metadata))
    }

    /// Like [`execute`](Self::execute), for a raw serialized source.
    pub async fn execute_raw(
        &self,
        indices: &[String],
        source: &[u8],
    ) -> Result<Value, CoordinateError> {
        let tree = QueryTree::parse(source)?;
        self.execute(indices, &tree.to_value()).await
    }
}

/// Merge the coordinate metadata into the backend response document.
fn attach_metadata(mut response: Value, metadata: &CoordinateSearchMetadata) -> Value {
    let section = serde_json::to_value(metadata).unwrap_or_else(|_| Value::Null);
    match response.as_object_mut() {
        Some(map) => {
            map.insert("coordinate_search".to_string(), section);
            response
        }
        // A non-object backend response is wrapped rather than lost.
        None => serde_json::json!({
            "response": response,
            "coordinate_search": section,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attach_metadata_merges_section() {
        let metadata = CoordinateSearchMetadata::default();
        let merged = attach_metadata(json!({"hits": {"total": 0}}), &metadata);
        assert_eq!(
            merged,
            json!({"hits": {"total": 0}, "coordinate_search": {"actions": []}})
        );
    }

    #[test]
    fn test_attach_metadata_wraps_non_object_response() {
        let metadata = CoordinateSearchMetadata::default();
        let merged = attach_metadata(json!([1, 2]), &metadata);
        assert_eq!(merged["response"], json!([1, 2]));
        assert_eq!(merged["coordinate_search"]["actions"], json!([]));
    }
}
