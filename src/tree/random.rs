use anyhow::bail;
use rand::seq::index::sample;
use rand::Rng;

use crate::tree::{NodeIdx, TypedTree};
use crate::Result;

/// Random typed tree with `leaves` serially sampled tips of uniformly random types. Sibling
/// lineages are merged at increasing heights, and every branch whose type differs from its
/// parent's gets one type change at a uniformly random height on the branch.
pub fn random_typed_tree<R: Rng>(rng: &mut R, leaves: usize, n_types: usize) -> Result<TypedTree> {
    if leaves < 2 || n_types == 0 {
        bail!("A random tree needs at least two leaves and one type.");
    }
    let mut tree = TypedTree::new();
    let mut lineages: Vec<(NodeIdx, f64, usize)> = (0..leaves)
        .map(|i| {
            let height = rng.gen::<f64>();
            let node_type = rng.gen_range(0..n_types);
            (tree.add_leaf(&format!("t{i}"), height, node_type), height, node_type)
        })
        .collect();
    let mut height = lineages
        .iter()
        .map(|(_, height, _)| *height)
        .fold(0.0, f64::max);
    while lineages.len() > 1 {
        height += rng.gen_range(0.05..0.5);
        let mut picked = sample(rng, lineages.len(), 2).into_vec();
        picked.sort_unstable();
        let first = lineages.swap_remove(picked[1]);
        let second = lineages.swap_remove(picked[0]);
        let node_type = rng.gen_range(0..n_types);
        for &(child, child_height, child_type) in &[first, second] {
            if child_type != node_type {
                let change = child_height + rng.gen::<f64>() * (height - child_height);
                tree.add_type_change(child, change, node_type)?;
            }
        }
        let parent = tree.add_internal("", height, node_type, [first.0, second.0])?;
        lineages.push((parent, height, node_type));
    }
    tree.complete()?;
    Ok(tree)
}
