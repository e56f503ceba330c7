//! Join planner
//!
//! Walks the normalized query tree, recognizes `filterjoin` clauses by
//! their structural shape, validates them, and assembles the
//! Filter-Join Forest. A clause whose embedded lookup filter itself
//! contains `filterjoin` clauses gets those as children: the executor
//! must resolve them first, because the parent's lookup embeds their
//! rewritten sub-filters.
//!
//! Recognized shape (extra attributes are ignored):
//!
//! ```json
//! {"filterjoin": {
//!     "field":   "<source field>",          // required
//!     "indices": ["<target index>", ...],   // required, non-empty
//!     "path":    "<target field>",          // required
//!     "query":   { ... },                   // optional lookup filter
//!     "size":    <max value count>          // optional bound
//! }}
//! ```

use crate::errors::CoordinateError;
use crate::query_tree::visitor::{traverse_from, TreeVisitor, VisitAction};
use crate::query_tree::{NodeId, QueryNode, QueryTree};

/// Everything extracted from one recognized join clause. Immutable once
/// parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClauseDescriptor {
    pub source_field: String,
    pub indices: Vec<String>,
    pub path: String,
    /// Subtree of the embedded lookup filter, if any.
    pub filter: Option<NodeId>,
    pub size: Option<usize>,
}

/// A join clause positioned in the forest: the descriptor, the id of the
/// query node it will rewrite, and the joins nested inside its lookup
/// filter.
#[derive(Debug, Clone)]
pub struct FilterJoinNode {
    pub descriptor: JoinClauseDescriptor,
    /// The `{"filterjoin": ...}` object node replaced by the generated
    /// inclusion filter once this join resolves.
    pub node_id: NodeId,
    pub children: Vec<FilterJoinNode>,
}

/// All join clauses of one request; roots are joins with no parent join.
#[derive(Debug, Clone, Default)]
pub struct FilterJoinForest {
    pub roots: Vec<FilterJoinNode>,
}

impl FilterJoinForest {
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total number of join clauses in the forest.
    pub fn len(&self) -> usize {
        fn count(node: &FilterJoinNode) -> usize {
            1 + node.children.iter().map(count).sum::<usize>()
        }
        self.roots.iter().map(count).sum()
    }
}

/// Plan the filter joins of a normalized tree. Trees without join
/// clauses yield an empty forest and stay untouched.
pub fn plan(tree: &mut QueryTree) -> Result<FilterJoinForest, CoordinateError> {
    let root = tree.root();
    let forest = FilterJoinForest {
        roots: plan_from(tree, root)?,
    };
    if !forest.is_empty() {
        log::debug!("Planned filter-join forest with {} clause(s)", forest.len());
    }
    Ok(forest)
}

/// Collect the join clauses reachable from `start`, then recursively
/// plan each clause's embedded filter to establish its children.
fn plan_from(tree: &mut QueryTree, start: NodeId) -> Result<Vec<FilterJoinNode>, CoordinateError> {
    let mut visitor = JoinPlanVisitor { joins: Vec::new() };
    traverse_from(tree, start, &mut visitor)?;
    let mut nodes = visitor.joins;
    for node in &mut nodes {
        if let Some(filter_id) = node.descriptor.filter {
            node.children = plan_from(tree, filter_id)?;
        }
    }
    Ok(nodes)
}

/// Collects join clauses in document order. On a recognized clause the
/// embedded filter is planned recursively and the outer traversal prunes
/// the subtree, so a nested join never also shows up as a root.
struct JoinPlanVisitor {
    joins: Vec<FilterJoinNode>,
}

impl TreeVisitor for JoinPlanVisitor {
    type Error = CoordinateError;

    fn visit(&mut self, tree: &QueryTree, id: NodeId) -> Result<VisitAction, CoordinateError> {
        let Some(clause_id) = tree.object_get(id, "filterjoin") else {
            return Ok(VisitAction::Continue);
        };
        let descriptor = parse_clause(tree, clause_id)?;
        self.joins.push(FilterJoinNode {
            descriptor,
            node_id: id,
            children: Vec::new(),
        });
        // Prune: the clause subtree (embedded filter included) belongs to
        // this join and is planned separately, so a nested join never
        // also shows up at this level.
        Ok(VisitAction::Prune)
    }
}

fn parse_clause(
    tree: &QueryTree,
    clause_id: NodeId,
) -> Result<JoinClauseDescriptor, CoordinateError> {
    if !matches!(tree.node(clause_id), QueryNode::Object(_)) {
        return Err(CoordinateError::Validation(
            "filterjoin clause must be an object".to_string(),
        ));
    }

    let source_field = required_string(tree, clause_id, "field")?;
    let path = required_string(tree, clause_id, "path")?;
    let indices = required_indices(tree, clause_id)?;

    let filter = match tree.object_get(clause_id, "query") {
        Some(query_id) => {
            if !matches!(tree.node(query_id), QueryNode::Object(_)) {
                return Err(CoordinateError::Validation(
                    "filterjoin attribute 'query' must be an object".to_string(),
                ));
            }
            Some(query_id)
        }
        None => None,
    };

    let size = match tree.object_get(clause_id, "size") {
        Some(size_id) => Some(tree.as_u64(size_id).ok_or_else(|| {
            CoordinateError::Validation(
                "filterjoin attribute 'size' must be a non-negative integer".to_string(),
            )
        })? as usize),
        None => None,
    };

    Ok(JoinClauseDescriptor {
        source_field,
        indices,
        path,
        filter,
        size,
    })
}

fn required_string(
    tree: &QueryTree,
    clause_id: NodeId,
    key: &str,
) -> Result<String, CoordinateError> {
    let id = tree.object_get(clause_id, key).ok_or_else(|| {
        CoordinateError::Validation(format!("filterjoin clause missing required attribute '{key}'"))
    })?;
    match tree.as_str(id) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(CoordinateError::Validation(format!(
            "filterjoin attribute '{key}' must be a non-empty string"
        ))),
    }
}

fn required_indices(tree: &QueryTree, clause_id: NodeId) -> Result<Vec<String>, CoordinateError> {
    let id = tree.object_get(clause_id, "indices").ok_or_else(|| {
        CoordinateError::Validation(
            "filterjoin clause missing required attribute 'indices'".to_string(),
        )
    })?;
    let QueryNode::Array(elements) = tree.node(id) else {
        return Err(CoordinateError::Validation(
            "filterjoin attribute 'indices' must be an array of index names".to_string(),
        ));
    };
    let mut indices = Vec::with_capacity(elements.len());
    for element in elements {
        match tree.as_str(*element) {
            Some(s) if !s.is_empty() => indices.push(s.to_string()),
            _ => {
                return Err(CoordinateError::Validation(
                    "filterjoin attribute 'indices' must contain non-empty strings".to_string(),
                ))
            }
        }
    }
    if indices.is_empty() {
        return Err(CoordinateError::Validation(
            "filterjoin attribute 'indices' must not be empty".to_string(),
        ));
    }
    Ok(indices)
}
