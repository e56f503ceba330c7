//! Wrapper query normalizer
//!
//! A `wrapper` query embeds an opaque, usually base64-encoded, serialized
//! sub-query: `{"wrapper": {"query": "<base64 JSON>"}}`. Planning works
//! on node shapes, so every wrapper is unwrapped into its normal tree
//! form first. The traversal revisits grafted subtrees, which takes care
//! of wrappers nested inside wrappers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;

use super::visitor::{traverse, TreeVisitor, VisitAction};
use super::{NodeId, QueryTree};
use crate::errors::CoordinateError;

/// Unwrap every wrapper query in the tree, recursively. A malformed
/// embedded sub-query fails the whole request before any lookup runs.
pub fn unwrap_wrapper_queries(tree: &mut QueryTree) -> Result<(), CoordinateError> {
    traverse(tree, &mut WrapperQueryVisitor)
}

struct WrapperQueryVisitor;

impl TreeVisitor for WrapperQueryVisitor {
    type Error = CoordinateError;

    fn visit(&mut self, tree: &QueryTree, id: NodeId) -> Result<VisitAction, CoordinateError> {
        let Some(wrapper_id) = tree.object_get(id, "wrapper") else {
            return Ok(VisitAction::Continue);
        };
        let embedded = tree
            .object_get(wrapper_id, "query")
            .and_then(|query_id| tree.as_str(query_id))
            .ok_or_else(|| {
                CoordinateError::Parse(
                    "wrapper query must carry a 'query' attribute holding a serialized sub-query"
                        .to_string(),
                )
            })?;
        log::debug!("Unwrapping wrapper query ({} bytes)", embedded.len());
        Ok(VisitAction::Replace(decode_embedded(embedded)?))
    }
}

/// The embedded source is tried as base64-encoded JSON first, then as
/// raw JSON.
fn decode_embedded(embedded: &str) -> Result<Value, CoordinateError> {
    let bytes = match BASE64.decode(embedded) {
        Ok(decoded) => decoded,
        Err(_) => embedded.as_bytes().to_vec(),
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| CoordinateError::Parse(format!("malformed wrapper sub-query: {e}")))
}
