use log::trace;

use crate::density::{Density, PgState};
use crate::likelihood::recursion::{LineageEvent, Recursion};
use crate::likelihood::LikelihoodError;
use crate::ode::{IntegrationStats, StateIntegrator};
use crate::tree::{NodeIdx, OriginBranch};
use crate::Result;

impl<I: StateIntegrator> Recursion<'_, I> {
    /// State at the horizon (time 0) for the whole tree, with or without an origin branch.
    pub(crate) fn root_state<D: Density>(
        &self,
        origin: Option<&OriginBranch>,
        stats: &mut IntegrationStats,
    ) -> Result<PgState<D>> {
        let root = self.tree.root();
        match origin {
            Some(origin) if !origin.changes.is_empty() => {
                let last = origin.changes.len() - 1;
                let to = self.horizon() - origin.changes[last].height;
                self.origin_state(origin, last, 0.0, to, stats)
            }
            Some(_) => {
                let event = LineageEvent::at_node(self.tree, root)?;
                self.subtree(event, 0.0, self.time_of(&event), stats)
            }
            None => self.root_children(root, stats),
        }
    }

    /// State at `from` of the origin branch whose youngest event is origin change `change`,
    /// happening at `to`.
    fn origin_state<D: Density>(
        &self,
        origin: &OriginBranch,
        change: usize,
        from: f64,
        to: f64,
        stats: &mut IntegrationStats,
    ) -> Result<PgState<D>> {
        let root = self.tree.root();
        let root_type = self.tree.node(root).node_type;
        let above = origin.changes[change].new_type;
        let below = origin.type_below(change, root_type);
        let below_state = if change > 0 {
            let next = self.horizon() - origin.changes[change - 1].height;
            self.origin_state(origin, change - 1, to, next, stats)?
        } else {
            let event = LineageEvent::at_node(self.tree, root)?;
            self.subtree(event, to, self.time_of(&event), stats)?
        };
        trace!("Origin branch type change from {below} to {above} at {to}.");
        let mut state = self.migrate(below_state, above, below, to);
        self.propagate(&mut state, from, to, stats)?;
        Ok(state)
    }

    fn children_of_root(&self, root: NodeIdx) -> Result<[NodeIdx; 2]> {
        match self.tree.ordered_children(root).as_slice() {
            [first, second] => Ok([*first, *second]),
            children => Err(LikelihoodError::InvalidTree(format!(
                "Without an origin the root needs two children, {root} has {}.",
                children.len()
            ))
            .into()),
        }
    }

    /// Without an origin both root branches start at the horizon and no birth event is
    /// counted at the root.
    fn combine_root_branches<D: Density>(
        &self,
        root: NodeIdx,
        first: PgState<D>,
        second: PgState<D>,
    ) -> PgState<D> {
        let root_type = self.tree.node(root).node_type;
        let mut state = PgState::new(first.p);
        state.ge[root_type] = first.ge[root_type].mul(second.ge[root_type]);
        state
    }
}

cfg_if::cfg_if! {
if #[cfg(feature = "par-root")] {
impl<I: StateIntegrator> Recursion<'_, I> {
    fn root_children<D: Density>(
        &self,
        root: NodeIdx,
        stats: &mut IntegrationStats,
    ) -> Result<PgState<D>> {
        let [first, second] = self.children_of_root(root)?;
        let (first, second) = rayon::join(
            || {
                let mut stats = IntegrationStats::default();
                self.branch::<D>(first, 0.0, &mut stats).map(|state| (state, stats))
            },
            || {
                let mut stats = IntegrationStats::default();
                self.branch::<D>(second, 0.0, &mut stats).map(|state| (state, stats))
            },
        );
        let (first, first_stats) = first?;
        let (second, second_stats) = second?;
        stats.merge(&first_stats);
        stats.merge(&second_stats);
        Ok(self.combine_root_branches(root, first, second))
    }
}
} else {
impl<I: StateIntegrator> Recursion<'_, I> {
    fn root_children<D: Density>(
        &self,
        root: NodeIdx,
        stats: &mut IntegrationStats,
    ) -> Result<PgState<D>> {
        let [first, second] = self.children_of_root(root)?;
        let first = self.branch::<D>(first, 0.0, stats)?;
        let second = self.branch::<D>(second, 0.0, stats)?;
        Ok(self.combine_root_branches(root, first, second))
    }
}
}
}
