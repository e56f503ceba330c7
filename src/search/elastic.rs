//! Elasticsearch-compatible HTTP backend
//!
//! Lookups are expressed as a `terms` aggregation over the join field so
//! only the distinct key values travel back, never the documents.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{SearchError, SearchService};

pub struct ElasticSearchService {
    http: reqwest::Client,
    base_url: String,
}

impl ElasticSearchService {
    pub fn new(base_url: impl Into<String>) -> Self {
        ElasticSearchService {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn search_url(&self, indices: &[String]) -> String {
        format!("{}/{}/_search", self.base_url, indices.join(","))
    }

    async fn post_search(&self, indices: &[String], body: &Value) -> Result<Value, SearchError> {
        let response = self
            .http
            .post(self.search_url(indices))
            .json(body)
            .send()
            .await
            .map_err(|e| SearchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SearchError::Backend(format!("{status}: {detail}")));
        }
        response
            .json()
            .await
            .map_err(|e| SearchError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl SearchService for ElasticSearchService {
    async fn execute_lookup(
        &self,
        indices: &[String],
        field: &str,
        filter: Option<&Value>,
        size_hint: usize,
    ) -> Result<Vec<Value>, SearchError> {
        let query = filter.cloned().unwrap_or_else(|| json!({"match_all": {}}));
        let body = json!({
            "size": 0,
            "query": query,
            "aggs": {
                "join_keys": {
                    "terms": {"field": field, "size": size_hint}
                }
            }
        });
        log::debug!(
            "Executing join lookup on {}/{} (size_hint={})",
            indices.join(","),
            field,
            size_hint
        );

        let response = self.post_search(indices, &body).await?;
        let buckets = response
            .pointer("/aggregations/join_keys/buckets")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                SearchError::InvalidResponse(
                    "lookup response is missing the join_keys aggregation".to_string(),
                )
            })?;
        buckets
            .iter()
            .map(|bucket| {
                bucket.get("key").cloned().ok_or_else(|| {
                    SearchError::InvalidResponse("aggregation bucket without a key".to_string())
                })
            })
            .collect()
    }

    async fn execute_query(
        &self,
        indices: &[String],
        query: &Value,
    ) -> Result<Value, SearchError> {
        log::debug!("Executing rewritten query on {}", indices.join(","));
        self.post_search(indices, query).await
    }
}
