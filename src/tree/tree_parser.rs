use std::fmt;

use anyhow::bail;
use log::{info, trace};
use pest::{error::Error as PestError, iterators::Pair, Parser};
use pest_derive::Parser;

use crate::tree::{NodeIdx, TypedTree};
use crate::Result;

#[derive(Parser)]
#[grammar = "./tree/newick.pest"]
pub struct NewickParser;

#[derive(Debug)]
pub struct ParsingError(pub(crate) Box<PestError<Rule>>);

impl fmt::Display for ParsingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Malformed newick string")?;
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ParsingError {}

const TYPE_KEY: &str = "type";

#[derive(Debug, Default)]
struct ParsedNode {
    label: String,
    node_type: Option<usize>,
    length: f64,
    children: Vec<ParsedNode>,
}

/// Parses rooted newick trees whose nodes carry their type as `[&type=K]` metadata.
///
/// Nodes with a single child are type changes on the branch above that child: the change
/// happens at the height of the single-child node, which carries the type above the change.
/// Heights are computed from the branch lengths, with the deepest tip at height 0.
///
/// # Example
/// ```
/// use bdmm::tree::from_typed_newick;
/// let trees =
///     from_typed_newick("((A[&type=0]:1.0)[&type=1]:1.0,B[&type=1]:2.0)[&type=1];").unwrap();
/// let tree = &trees[0];
/// assert_eq!(tree.leaf_count(), 2);
/// assert_eq!(tree.total_type_changes(), 1);
/// assert_eq!(tree.root_height(), 2.0);
/// ```
pub fn from_typed_newick(newick: &str) -> Result<Vec<TypedTree>> {
    info!("Parsing typed newick trees.");
    let pairs = match NewickParser::parse(Rule::newick, newick) {
        Ok(pairs) => pairs,
        Err(error) => bail!(ParsingError(Box::new(error))),
    };
    let mut trees = Vec::new();
    for newick_rule in pairs {
        for tree_rule in newick_rule.into_inner() {
            if tree_rule.as_rule() != Rule::tree {
                continue;
            }
            if let Some(node_rule) = tree_rule.into_inner().next() {
                let parsed = parse_node_rule(node_rule)?;
                trees.push(build_tree(&parsed)?);
            }
        }
    }
    info!("Finished parsing {} typed trees successfully.", trees.len());
    Ok(trees)
}

fn parse_node_rule(rule: Pair<Rule>) -> Result<ParsedNode> {
    let mut node = ParsedNode::default();
    for inner in rule.into_inner() {
        match inner.as_rule() {
            Rule::internal | Rule::leaf => node.children.push(parse_node_rule(inner)?),
            Rule::label => node.label = parse_label_rule(inner),
            Rule::branch_length => node.length = parse_branch_length_rule(inner)?,
            Rule::metadata => parse_metadata_rule(inner, &mut node)?,
            other => bail!("Unexpected {other:?} in newick tree."),
        }
    }
    Ok(node)
}

fn parse_label_rule(rule: Pair<Rule>) -> String {
    rule.as_str().trim_matches('\'').to_string()
}

fn parse_branch_length_rule(rule: Pair<Rule>) -> Result<f64> {
    let text = rule.as_str().trim_start_matches(':').trim();
    match text.parse::<f64>() {
        Ok(length) => Ok(length),
        Err(_) => bail!("Invalid branch length {text}."),
    }
}

fn parse_metadata_rule(rule: Pair<Rule>, node: &mut ParsedNode) -> Result<()> {
    for attribute in rule.into_inner() {
        let mut parts = attribute.into_inner();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            bail!("Malformed metadata on node '{}'.", node.label);
        };
        let value = value.as_str().trim_matches('"');
        if key.as_str() != TYPE_KEY {
            trace!("Ignoring metadata {}={} on node '{}'.", key.as_str(), value, node.label);
            continue;
        }
        match value.parse::<usize>() {
            Ok(node_type) => node.node_type = Some(node_type),
            Err(_) => bail!("Invalid type {value} on node '{}'.", node.label),
        }
    }
    Ok(())
}

fn build_tree(root: &ParsedNode) -> Result<TypedTree> {
    let max_depth = max_leaf_depth(root, 0.0);
    let mut tree = TypedTree::new();
    add_subtree(&mut tree, root, 0.0, max_depth)?;
    tree.complete()?;
    Ok(tree)
}

fn max_leaf_depth(node: &ParsedNode, depth: f64) -> f64 {
    node.children
        .iter()
        .map(|child| max_leaf_depth(child, depth + child.length))
        .fold(depth, f64::max)
}

fn add_subtree(
    tree: &mut TypedTree,
    node: &ParsedNode,
    depth: f64,
    max_depth: f64,
) -> Result<NodeIdx> {
    let height = max_depth - depth;
    let Some(node_type) = node.node_type else {
        bail!("Node '{}' has no {TYPE_KEY} annotation.", node.label);
    };
    match node.children.as_slice() {
        [] => Ok(tree.add_leaf(&node.label, height, node_type)),
        [child] => {
            let below = add_subtree(tree, child, depth + child.length, max_depth)?;
            tree.add_type_change(below, height, node_type)?;
            Ok(below)
        }
        [left, right] => {
            let left = add_subtree(tree, left, depth + left.length, max_depth)?;
            let right = add_subtree(tree, right, depth + right.length, max_depth)?;
            tree.add_internal(&node.label, height, node_type, [left, right])
        }
        children => bail!(
            "Node '{}' has {} children, typed trees have to be binary.",
            node.label,
            children.len()
        ),
    }
}
