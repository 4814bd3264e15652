use std::fmt::{Debug, Display};

use crate::tree::NodeIdx::{self, Internal as Int, Leaf};

/// Recorded change of type on the branch above a node. Going from the node towards the
/// root, the lineage has type `new_type` above `height`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TypeChange {
    pub height: f64,
    pub new_type: usize,
}

impl TypeChange {
    pub fn new(height: f64, new_type: usize) -> Self {
        TypeChange { height, new_type }
    }
}

#[derive(Clone, PartialEq)]
pub struct Node {
    pub idx: NodeIdx,
    pub parent: Option<NodeIdx>,
    pub children: Vec<NodeIdx>,
    /// Time before the present.
    pub height: f64,
    pub node_type: usize,
    /// Type changes on the branch above the node, ordered by increasing height.
    pub changes: Vec<TypeChange>,
    pub id: String,
}

impl Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.id.is_empty() {
            write!(f, "{}", self.idx)
        } else {
            write!(f, "{} with id {}", self.idx, self.id)
        }
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.id.is_empty() {
            write!(f, "({}) ", self.id)?;
        }
        writeln!(
            f,
            "{:?} of type {} at {}, parent: {:?}, children: {:?}, changes: {:?}",
            self.idx, self.node_type, self.height, self.parent, self.children, self.changes,
        )
    }
}

impl Node {
    pub(crate) fn new_leaf(idx: usize, height: f64, node_type: usize, id: String) -> Self {
        Self {
            idx: Leaf(idx),
            parent: None,
            children: Vec::new(),
            height,
            node_type,
            changes: Vec::new(),
            id,
        }
    }

    pub(crate) fn new_internal(
        idx: usize,
        children: Vec<NodeIdx>,
        height: f64,
        node_type: usize,
        id: String,
    ) -> Self {
        Self {
            idx: Int(idx),
            parent: None,
            children,
            height,
            node_type,
            changes: Vec::new(),
            id,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.idx, Leaf(_))
    }

    /// Type at the top of the branch above the node.
    pub fn final_type(&self) -> usize {
        self.changes
            .last()
            .map_or(self.node_type, |change| change.new_type)
    }

    /// Type just below change `change`, i.e. the node's own type for the first change.
    pub fn type_below(&self, change: usize) -> usize {
        if change == 0 {
            self.node_type
        } else {
            self.changes[change - 1].new_type
        }
    }
}
