use std::fmt::Display;

use anyhow::bail;

use crate::intervals::TIME_TOLERANCE;
use crate::likelihood::LikelihoodError;
use crate::Result;

mod random;
pub use random::random_typed_tree;
mod tree_node;
pub use tree_node::*;
pub mod tree_parser;
pub use tree_parser::from_typed_newick;

use NodeIdx::{Internal as Int, Leaf};

#[derive(Debug, PartialEq, Clone, Copy, PartialOrd, Eq, Ord, Hash)]
pub enum NodeIdx {
    Internal(usize),
    Leaf(usize),
}

impl From<NodeIdx> for usize {
    fn from(node_idx: NodeIdx) -> usize {
        match node_idx {
            Int(idx) => idx,
            Leaf(idx) => idx,
        }
    }
}

impl From<&NodeIdx> for usize {
    fn from(node_idx: &NodeIdx) -> usize {
        usize::from(*node_idx)
    }
}

impl Display for NodeIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Int(idx) => write!(f, "Internal node {idx}"),
            Leaf(idx) => write!(f, "Leaf node {idx}"),
        }
    }
}

fn invalid_tree(message: String) -> Result<()> {
    bail!(LikelihoodError::InvalidTree(message))
}

/// Rooted binary tree whose nodes carry a type and whose branches carry the recorded type
/// changes. Heights are times before the present.
///
/// Nodes are added bottom-up; the node index used for ordering siblings is the position of
/// the node in [`TypedTree::nodes`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypedTree {
    root: Option<NodeIdx>,
    nodes: Vec<Node>,
    postorder: Vec<NodeIdx>,
}

impl TypedTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_leaf(&mut self, id: &str, height: f64, node_type: usize) -> NodeIdx {
        let idx = self.nodes.len();
        self.nodes
            .push(Node::new_leaf(idx, height, node_type, id.to_string()));
        self.root = None;
        Leaf(idx)
    }

    pub fn add_internal(
        &mut self,
        id: &str,
        height: f64,
        node_type: usize,
        children: [NodeIdx; 2],
    ) -> Result<NodeIdx> {
        for child in children {
            match self.nodes.get(usize::from(child)) {
                None => bail!("{child} does not exist."),
                Some(node) if node.parent.is_some() => bail!("{child} already has a parent."),
                Some(_) => {}
            }
        }
        if children[0] == children[1] {
            bail!("{} cannot be both children of the same node.", children[0]);
        }
        let idx = self.nodes.len();
        for child in children {
            self.nodes[usize::from(child)].parent = Some(Int(idx));
        }
        self.nodes.push(Node::new_internal(
            idx,
            children.to_vec(),
            height,
            node_type,
            id.to_string(),
        ));
        self.root = None;
        Ok(Int(idx))
    }

    /// Records a type change on the branch above `node`. Changes have to be added from the
    /// node upwards, i.e. in order of increasing height.
    pub fn add_type_change(&mut self, node: NodeIdx, height: f64, new_type: usize) -> Result<()> {
        let Some(node) = self.nodes.get_mut(usize::from(node)) else {
            bail!("{node} does not exist.");
        };
        node.changes.push(TypeChange::new(height, new_type));
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        let mut roots = self.nodes.iter().filter(|node| node.parent.is_none());
        let (Some(root), None) = (roots.next(), roots.next()) else {
            bail!("A tree needs exactly one node without a parent.");
        };
        let root = root.idx;
        self.root = Some(root);
        self.compute_postorder(root);
        Ok(())
    }

    fn compute_postorder(&mut self, root: NodeIdx) {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![root];
        while let Some(node_idx) = stack.pop() {
            order.push(node_idx);
            stack.extend(self.nodes[usize::from(node_idx)].children.iter().copied());
        }
        order.reverse();
        self.postorder = order;
    }

    pub fn is_complete(&self) -> bool {
        self.root.is_some()
    }

    pub fn root(&self) -> NodeIdx {
        self.root
            .or_else(|| self.nodes.last().map(|node| node.idx))
            .unwrap_or(Leaf(0))
    }

    pub fn node(&self, idx: NodeIdx) -> &Node {
        &self.nodes[usize::from(idx)]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn postorder(&self) -> &[NodeIdx] {
        &self.postorder
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| node.is_leaf())
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().count()
    }

    pub fn root_height(&self) -> f64 {
        self.node(self.root()).height
    }

    pub fn ordered_children(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        let mut children = self.node(idx).children.clone();
        children.sort_by_key(|child| usize::from(child));
        children
    }

    /// A direct ancestor is a sampled ancestor: a tip sitting on a zero-length branch.
    pub fn is_direct_ancestor(&self, idx: NodeIdx) -> bool {
        let node = self.node(idx);
        node.is_leaf()
            && node
                .parent
                .is_some_and(|parent| (self.node(parent).height - node.height).abs() < TIME_TOLERANCE)
    }

    pub fn direct_ancestor_count(&self) -> usize {
        self.leaves()
            .filter(|node| self.is_direct_ancestor(node.idx))
            .count()
    }

    pub fn contemporaneous_tips(&self) -> usize {
        self.leaves()
            .filter(|node| node.height.abs() < TIME_TOLERANCE)
            .count()
    }

    pub fn total_type_changes(&self) -> usize {
        self.nodes.iter().map(|node| node.changes.len()).sum()
    }

    /// Checks the tree and its type history. Bails with [`LikelihoodError::InvalidTree`] if
    /// the tree is incomplete, not binary, a child is older than its parent, a type is out of
    /// range or the type changes along a branch are inconsistent.
    pub fn validate(&self, n_types: usize) -> Result<()> {
        let Some(root) = self.root else {
            return invalid_tree("The tree is not complete.".to_string());
        };
        if !self.node(root).changes.is_empty() {
            return invalid_tree("The root branch cannot carry type changes.".to_string());
        }
        for node in &self.nodes {
            if !node.height.is_finite() || node.height < 0.0 {
                return invalid_tree(format!("{node} has invalid height {}.", node.height));
            }
            if node.node_type >= n_types {
                return invalid_tree(format!(
                    "{node} has type {}, but there are only {n_types} types.",
                    node.node_type
                ));
            }
            match (node.is_leaf(), node.children.len()) {
                (true, 0) | (false, 2) => {}
                (_, count) => {
                    return invalid_tree(format!("{node} has {count} children, expected 0 or 2."))
                }
            }
            if let Some(parent) = node.parent {
                self.validate_branch(node, self.node(parent), n_types)?;
            }
        }
        Ok(())
    }

    fn validate_branch(&self, node: &Node, parent: &Node, n_types: usize) -> Result<()> {
        if node.height > parent.height {
            return invalid_tree(format!("{node} is older than its parent {parent}."));
        }
        let mut below = node.node_type;
        let mut last_height = node.height;
        for (i, change) in node.changes.iter().enumerate() {
            if change.new_type >= n_types {
                return invalid_tree(format!(
                    "Type change to {} above {node} is out of range.",
                    change.new_type
                ));
            }
            if change.new_type == below {
                return invalid_tree(format!(
                    "Type change above {node} at {} does not change the type.",
                    change.height
                ));
            }
            let ordered = if i == 0 {
                change.height >= last_height
            } else {
                change.height > last_height
            };
            if !ordered || change.height > parent.height {
                return invalid_tree(format!(
                    "Type change above {node} at {} is out of order or outside the branch.",
                    change.height
                ));
            }
            below = change.new_type;
            last_height = change.height;
        }
        if below != parent.node_type {
            return invalid_tree(format!(
                "Branch above {node} ends in type {below}, but {parent} has type {}.",
                parent.node_type
            ));
        }
        Ok(())
    }
}

/// Branch above the root up to the origin of the process, with its own type changes.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginBranch {
    pub origin: f64,
    pub changes: Vec<TypeChange>,
}

impl OriginBranch {
    pub fn new(origin: f64) -> Self {
        OriginBranch {
            origin,
            changes: Vec::new(),
        }
    }

    pub fn with_changes(origin: f64, changes: Vec<TypeChange>) -> Self {
        OriginBranch { origin, changes }
    }

    pub fn final_type(&self, root_type: usize) -> usize {
        self.changes
            .last()
            .map_or(root_type, |change| change.new_type)
    }

    pub fn type_below(&self, change: usize, root_type: usize) -> usize {
        if change == 0 {
            root_type
        } else {
            self.changes[change - 1].new_type
        }
    }

    /// Bails with [`LikelihoodError::InvalidTree`] if the origin lies below the root, a change
    /// lies outside [root height, origin], the first change keeps the root's type or two
    /// consecutive changes share a type.
    pub fn validate(&self, tree: &TypedTree, n_types: usize) -> Result<()> {
        let root = tree.node(tree.root());
        if !self.origin.is_finite() || self.origin < root.height {
            return invalid_tree(format!(
                "Origin {} lies below the root at {}.",
                self.origin, root.height
            ));
        }
        let mut below = root.node_type;
        let mut last_height = root.height;
        for (i, change) in self.changes.iter().enumerate() {
            if change.height < root.height || change.height > self.origin {
                return invalid_tree(format!(
                    "Origin branch type change at {} lies outside [{}, {}].",
                    change.height, root.height, self.origin
                ));
            }
            if i > 0 && change.height <= last_height {
                return invalid_tree(format!(
                    "Origin branch type change at {} is out of order.",
                    change.height
                ));
            }
            if change.new_type >= n_types || change.new_type == below {
                return invalid_tree(format!(
                    "Origin branch type change at {} to type {} is invalid.",
                    change.height, change.new_type
                ));
            }
            below = change.new_type;
            last_height = change.height;
        }
        Ok(())
    }
}
