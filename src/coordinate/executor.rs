//! Join executor
//!
//! Resolves a Filter-Join Forest bottom-up. A join is eligible only once
//! all of its children have resolved and rewritten their portion of its
//! lookup filter, so a parent's lookup always carries the children's
//! generated `terms` filters. Sibling joins have no dependency edge and
//! resolve concurrently.
//!
//! The tree is shared between sibling tasks behind a mutex; it is locked
//! only for the synchronous serialize/rewrite sections and never across
//! an await. If any lookup fails the whole resolution aborts: rewrites
//! already applied by siblings are discarded together with the tree.

use std::sync::{Arc, Mutex};

use futures_util::future::{try_join_all, BoxFuture};
use futures_util::FutureExt;
use serde_json::{json, Value};

use crate::cache::{CacheKey, FilterJoinCache};
use crate::errors::CoordinateError;
use crate::query_tree::QueryTree;
use crate::search::SearchService;

use super::metadata::{CoordinateSearchMetadata, JoinExecutionStat};
use super::planner::{FilterJoinForest, FilterJoinNode};

pub struct FilterJoinExecutor {
    search: Arc<dyn SearchService>,
    cache: Arc<FilterJoinCache>,
    /// Bound applied to joins that carry no explicit `size`.
    default_lookup_size: usize,
}

impl FilterJoinExecutor {
    pub fn new(
        search: Arc<dyn SearchService>,
        cache: Arc<FilterJoinCache>,
        default_lookup_size: usize,
    ) -> Self {
        FilterJoinExecutor {
            search,
            cache,
            default_lookup_size,
        }
    }

    /// Resolve every join of the forest and rewrite the tree in place.
    /// Returns the rewritten tree and the stats in deterministic
    /// resolution order (children before parent, siblings in discovery
    /// order).
    pub async fn execute(
        &self,
        tree: QueryTree,
        forest: &FilterJoinForest,
    ) -> Result<(QueryTree, CoordinateSearchMetadata), CoordinateError> {
        let shared = Mutex::new(tree);
        let stats = try_join_all(
            forest
                .roots
                .iter()
                .map(|root| self.resolve(&shared, root)),
        )
        .await?;
        let tree = shared.into_inner().unwrap();
        let actions = stats.into_iter().flatten().collect();
        Ok((tree, CoordinateSearchMetadata::new(actions)))
    }

    /// Resolve one join node: children first (concurrently), then the
    /// node's own lookup and rewrite.
    fn resolve<'a>(
        &'a self,
        tree: &'a Mutex<QueryTree>,
        node: &'a FilterJoinNode,
    ) -> BoxFuture<'a, Result<Vec<JoinExecutionStat>, CoordinateError>> {
        async move {
            // Happens-before barrier: the parent's lookup filter embeds
            // the children's rewrites, so all children complete first.
            let child_stats = try_join_all(
                node.children
                    .iter()
                    .map(|child| self.resolve(tree, child)),
            )
            .await?;

            let descriptor = &node.descriptor;
            let size_bound = descriptor.size.unwrap_or(self.default_lookup_size);

            // Serialize the (child-rewritten) lookup filter under the
            // lock, then release it before any lookup I/O.
            let filter = {
                let tree = tree.lock().unwrap();
                descriptor.filter.map(|id| tree.node_to_value(id))
            };

            let key = CacheKey::from_lookup(
                &descriptor.indices,
                &descriptor.path,
                filter.as_ref(),
                size_bound,
            );
            log::debug!(
                "Resolving filter join on '{}' against {}/{} ({})",
                descriptor.source_field,
                descriptor.indices.join(","),
                descriptor.path,
                key
            );

            let outcome = self
                .cache
                .get_or_compute(key, || async move {
                    // One extra value makes bound overflow observable.
                    self.search
                        .execute_lookup(
                            &descriptor.indices,
                            &descriptor.path,
                            filter.as_ref(),
                            size_bound.saturating_add(1),
                        )
                        .await
                })
                .await
                .map_err(CoordinateError::Lookup)?;

            if outcome.values.len() > size_bound {
                return Err(CoordinateError::Validation(format!(
                    "filter join on field '{}' matched more than {} values; \
                     raise 'size' or narrow the lookup query",
                    descriptor.source_field, size_bound
                )));
            }

            // An empty value set is not an error: the generated filter
            // simply matches nothing.
            let mut terms = serde_json::Map::new();
            terms.insert(
                descriptor.source_field.clone(),
                Value::Array(outcome.values.as_ref().clone()),
            );
            {
                let mut tree = tree.lock().unwrap();
                tree.replace(node.node_id, &json!({"terms": terms}));
            }

            let mut stats: Vec<JoinExecutionStat> = child_stats.into_iter().flatten().collect();
            stats.push(JoinExecutionStat {
                source_field: descriptor.source_field.clone(),
                target_index: descriptor.indices.join(","),
                target_field: descriptor.path.clone(),
                value_count: outcome.values.len(),
                execution_time: outcome.lookup_time.as_millis() as u64,
                cache_hit: outcome.cache_hit,
            });
            Ok(stats)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::planner::plan;
    use crate::search::SearchError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Scripted backend: lookup results keyed by target field, every
    /// lookup call recorded for assertions.
    struct ScriptedSearch {
        lookups: HashMap<String, Result<Vec<Value>, SearchError>>,
        calls: StdMutex<Vec<(String, Option<Value>)>>,
    }

    impl ScriptedSearch {
        fn new(lookups: Vec<(&str, Result<Vec<Value>, SearchError>)>) -> Self {
            ScriptedSearch {
                lookups: lookups
                    .into_iter()
                    .map(|(field, result)| (field.to_string(), result))
                    .collect(),
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn recorded_filter(&self, field: &str) -> Option<Value> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .find(|(f, _)| f == field)
                .and_then(|(_, filter)| filter.clone())
        }
    }

    #[async_trait]
    impl SearchService for ScriptedSearch {
        async fn execute_lookup(
            &self,
            _indices: &[String],
            field: &str,
            filter: Option<&Value>,
            _size_hint: usize,
        ) -> Result<Vec<Value>, SearchError> {
            self.calls
                .lock()
                .unwrap()
                .push((field.to_string(), filter.cloned()));
            self.lookups
                .get(field)
                .cloned()
                .unwrap_or_else(|| Err(SearchError::Backend(format!("unscripted field {field}"))))
        }

        async fn execute_query(
            &self,
            _indices: &[String],
            _query: &Value,
        ) -> Result<Value, SearchError> {
            unimplemented!("executor tests never run the main query")
        }
    }

    async fn run(
        source: Value,
        search: Arc<ScriptedSearch>,
    ) -> Result<(Value, CoordinateSearchMetadata), CoordinateError> {
        let mut tree = QueryTree::from_value(&source);
        let forest = plan(&mut tree)?;
        let cache = Arc::new(FilterJoinCache::with_defaults());
        let executor = FilterJoinExecutor::new(search, cache, 1000);
        let (tree, metadata) = executor.execute(tree, &forest).await?;
        Ok((tree.to_value(), metadata))
    }

    #[test]
    fn test_rewrites_join_into_terms_filter() {
        tokio_test::block_on(async {
            let search = Arc::new(ScriptedSearch::new(vec![(
                "ref",
                Ok(vec![json!(1), json!(2), json!(3)]),
            )]));
            let (rewritten, metadata) = run(
                json!({"query": {"filterjoin": {
                    "field": "id",
                    "indices": ["other"],
                    "path": "ref",
                    "query": {"match": {"status": "active"}}
                }}}),
                search,
            )
            .await
            .unwrap();

            assert_eq!(rewritten, json!({"query": {"terms": {"id": [1, 2, 3]}}}));
            assert_eq!(metadata.actions.len(), 1);
            let stat = &metadata.actions[0];
            assert_eq!(stat.source_field, "id");
            assert_eq!(stat.target_index, "other");
            assert_eq!(stat.target_field, "ref");
            assert_eq!(stat.value_count, 3);
            assert!(!stat.cache_hit);
        });
    }

    #[test]
    fn test_nested_join_resolves_inner_first() {
        tokio_test::block_on(async {
            let search = Arc::new(ScriptedSearch::new(vec![
                ("inner_ref", Ok(vec![json!("k1")])),
                ("mid_ref", Ok(vec![json!(10), json!(20)])),
            ]));
            let (rewritten, metadata) = run(
                json!({"query": {"filterjoin": {
                    "field": "id",
                    "indices": ["middle"],
                    "path": "mid_ref",
                    "query": {"bool": {"filter": [{"filterjoin": {
                        "field": "mid_id",
                        "indices": ["inner"],
                        "path": "inner_ref"
                    }}]}}
                }}}),
                search.clone(),
            )
            .await
            .unwrap();

            // The outer lookup saw the inner join already rewritten.
            let outer_filter = search.recorded_filter("mid_ref").unwrap();
            assert_eq!(
                outer_filter,
                json!({"bool": {"filter": [{"terms": {"mid_id": ["k1"]}}]}})
            );
            assert_eq!(rewritten, json!({"query": {"terms": {"id": [10, 20]}}}));

            // Metadata order: child before parent.
            assert_eq!(metadata.actions.len(), 2);
            assert_eq!(metadata.actions[0].target_field, "inner_ref");
            assert_eq!(metadata.actions[1].target_field, "mid_ref");
        });
    }

    #[test]
    fn test_empty_value_set_matches_nothing_and_succeeds() {
        tokio_test::block_on(async {
            let search = Arc::new(ScriptedSearch::new(vec![("ref", Ok(vec![]))]));
            let (rewritten, metadata) = run(
                json!({"query": {"filterjoin": {"field": "id", "indices": ["other"], "path": "ref"}}}),
                search,
            )
            .await
            .unwrap();
            assert_eq!(rewritten, json!({"query": {"terms": {"id": []}}}));
            assert_eq!(metadata.actions[0].value_count, 0);
        });
    }

    #[test]
    fn test_size_bound_overflow_fails_request() {
        tokio_test::block_on(async {
            let search = Arc::new(ScriptedSearch::new(vec![(
                "ref",
                Ok(vec![json!(1), json!(2), json!(3)]),
            )]));
            let err = run(
                json!({"query": {"filterjoin": {
                    "field": "id", "indices": ["other"], "path": "ref", "size": 2
                }}}),
                search,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, CoordinateError::Validation(_)));
        });
    }

    #[test]
    fn test_maximum_size_bound_resolves_without_wrapping() {
        tokio_test::block_on(async {
            let search = Arc::new(ScriptedSearch::new(vec![(
                "ref",
                Ok(vec![json!(1), json!(2)]),
            )]));
            let (rewritten, metadata) = run(
                json!({"query": {"filterjoin": {
                    "field": "id", "indices": ["other"], "path": "ref", "size": u64::MAX
                }}}),
                search,
            )
            .await
            .unwrap();
            assert_eq!(rewritten, json!({"query": {"terms": {"id": [1, 2]}}}));
            assert_eq!(metadata.actions[0].value_count, 2);
        });
    }

    #[test]
    fn test_lookup_failure_aborts_whole_resolution() {
        tokio_test::block_on(async {
            let search = Arc::new(ScriptedSearch::new(vec![
                ("good_ref", Ok(vec![json!(1)])),
                ("bad_ref", Err(SearchError::Transport("refused".to_string()))),
            ]));
            let err = run(
                json!({"query": {"bool": {"must": [
                    {"filterjoin": {"field": "a", "indices": ["x"], "path": "good_ref"}},
                    {"filterjoin": {"field": "b", "indices": ["y"], "path": "bad_ref"}}
                ]}}}),
                search,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, CoordinateError::Lookup(_)));
        });
    }

    #[test]
    fn test_identical_clauses_second_resolution_hits_cache() {
        tokio_test::block_on(async {
            let search = Arc::new(ScriptedSearch::new(vec![("ref", Ok(vec![json!(1)]))]));
            let source = json!({"query": {"bool": {"should": [
                {"filterjoin": {"field": "id", "indices": ["other"], "path": "ref"}},
                {"filterjoin": {"field": "id", "indices": ["other"], "path": "ref"}}
            ]}}});
            let (rewritten, metadata) = run(source, search.clone()).await.unwrap();

            assert_eq!(
                rewritten,
                json!({"query": {"bool": {"should": [
                    {"terms": {"id": [1]}},
                    {"terms": {"id": [1]}}
                ]}}})
            );
            assert_eq!(search.calls.lock().unwrap().len(), 1);
            let hits: Vec<bool> = metadata.actions.iter().map(|a| a.cache_hit).collect();
            assert_eq!(hits.iter().filter(|h| **h).count(), 1);
        });
    }
}
