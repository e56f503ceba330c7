//! Depth-first traversal framework for [`QueryTree`]
//!
//! A visitor sees every node in document order (object keys and array
//! elements in their parsed order) and can rewrite the tree as it goes.
//! Replacement is always performed by the traversal on behalf of the
//! node's parent: the visitor returns the replacement document, and the
//! traversal grafts it into the visited node's own arena slot. Sibling
//! ids are untouched by a graft, so iteration over the parent's children
//! stays valid.

use serde_json::Value;

use super::{NodeId, QueryNode, QueryTree};

/// What the traversal should do after visiting a node.
pub enum VisitAction {
    /// Descend into the node's children.
    Continue,
    /// Do not descend into this subtree.
    Prune,
    /// Replace the subtree rooted at this node with the parsed form of
    /// the given document, then visit the replacement again (the
    /// replacement may itself require rewriting).
    Replace(Value),
}

/// A traversal callback. The associated error aborts the walk.
pub trait TreeVisitor {
    type Error;

    fn visit(&mut self, tree: &QueryTree, id: NodeId) -> Result<VisitAction, Self::Error>;
}

/// Walk the whole tree depth-first.
pub fn traverse<V: TreeVisitor>(tree: &mut QueryTree, visitor: &mut V) -> Result<(), V::Error> {
    traverse_from(tree, tree.root(), visitor)
}

/// Walk the subtree rooted at `start` depth-first.
pub fn traverse_from<V: TreeVisitor>(
    tree: &mut QueryTree,
    start: NodeId,
    visitor: &mut V,
) -> Result<(), V::Error> {
    loop {
        match visitor.visit(tree, start)? {
            VisitAction::Replace(value) => {
                tree.replace(start, &value);
                // Revisit the grafted subtree from the top.
                continue;
            }
            VisitAction::Prune => return Ok(()),
            VisitAction::Continue => break,
        }
    }

    // Child ids are collected up front: a child replacing itself only
    // overwrites its own slot, never its siblings' ids.
    let children: Vec<NodeId> = match tree.node(start) {
        QueryNode::Object(entries) => entries.iter().map(|(_, child)| *child).collect(),
        QueryNode::Array(elements) => elements.clone(),
        QueryNode::Scalar(_) => Vec::new(),
    };
    for child in children {
        traverse_from(tree, child, visitor)?;
    }
    Ok(())
}
