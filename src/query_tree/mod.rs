//! Query tree model
//!
//! A mutable, arena-backed representation of a parsed query document.
//! Nodes are addressed by `NodeId` (an index into the arena) instead of
//! owned pointers, so rewrite passes can hold on to the id of a subtree
//! and graft a replacement into that slot later without invalidating any
//! sibling iteration that is still in progress.
//!
//! Object key order and array element order are preserved exactly as
//! parsed (serde_json is compiled with `preserve_order`), which keeps
//! traversal order, join discovery order and therefore response metadata
//! order deterministic.

use serde_json::{Map, Value};

use crate::errors::CoordinateError;

pub mod visitor;
pub mod wrapper;

/// Index of a node in a [`QueryTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// A single node of the query document.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// Ordered mapping of attribute name to child node.
    Object(Vec<(String, NodeId)>),
    /// Ordered sequence of child nodes.
    Array(Vec<NodeId>),
    /// Leaf value: string, number, boolean or null.
    Scalar(Value),
}

/// Arena-backed query document, owned exclusively by the pipeline that
/// processes one request.
#[derive(Debug, Clone)]
pub struct QueryTree {
    nodes: Vec<QueryNode>,
    root: NodeId,
}

impl QueryTree {
    /// Parse a raw query source into a tree.
    pub fn parse(source: &[u8]) -> Result<Self, CoordinateError> {
        let value: Value =
            serde_json::from_slice(source).map_err(|e| CoordinateError::Parse(e.to_string()))?;
        Ok(Self::from_value(&value))
    }

    /// Build a tree from an already-deserialized document.
    pub fn from_value(value: &Value) -> Self {
        let mut tree = QueryTree {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        tree.root = tree.add_value(value);
        tree
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &QueryNode {
        &self.nodes[id.0]
    }

    /// Serialize the whole tree back into a document.
    pub fn to_value(&self) -> Value {
        self.node_to_value(self.root)
    }

    /// Serialize the subtree rooted at `id`.
    pub fn node_to_value(&self, id: NodeId) -> Value {
        match self.node(id) {
            QueryNode::Object(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, child) in entries {
                    map.insert(key.clone(), self.node_to_value(*child));
                }
                Value::Object(map)
            }
            QueryNode::Array(elements) => {
                Value::Array(elements.iter().map(|c| self.node_to_value(*c)).collect())
            }
            QueryNode::Scalar(value) => value.clone(),
        }
    }

    /// Graft `value` into the arena slot of `id`, replacing the subtree
    /// rooted there. The ids of the old descendants become unreachable
    /// garbage in the arena; they are reclaimed when the request's tree
    /// is dropped.
    pub fn replace(&mut self, id: NodeId, value: &Value) {
        let replacement = self.build_node(value);
        self.nodes[id.0] = replacement;
    }

    /// Look up a direct attribute of an object node.
    pub fn object_get(&self, id: NodeId, key: &str) -> Option<NodeId> {
        match self.node(id) {
            QueryNode::Object(entries) => entries
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, child)| *child),
            _ => None,
        }
    }

    /// The string content of a scalar node, if it is a string.
    pub fn as_str(&self, id: NodeId) -> Option<&str> {
        match self.node(id) {
            QueryNode::Scalar(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// The non-negative integer content of a scalar node.
    pub fn as_u64(&self, id: NodeId) -> Option<u64> {
        match self.node(id) {
            QueryNode::Scalar(value) => value.as_u64(),
            _ => None,
        }
    }

    fn add_value(&mut self, value: &Value) -> NodeId {
        let node = self.build_node(value);
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    fn build_node(&mut self, value: &Value) -> QueryNode {
        match value {
            Value::Object(map) => {
                let entries = map
                    .iter()
                    .map(|(key, child)| (key.clone(), self.add_value(child)))
                    .collect();
                QueryNode::Object(entries)
            }
            Value::Array(elements) => {
                let children = elements.iter().map(|child| self.add_value(child)).collect();
                QueryNode::Array(children)
            }
            scalar => QueryNode::Scalar(scalar.clone()),
        }
    }
}
