use anyhow::bail;
use log::trace;

use crate::density::{Density, PgState};
use crate::intervals::TIME_TOLERANCE;
use crate::likelihood::LikelihoodError;
use crate::ode::{IntegrationStats, PgSystem, StateIntegrator};
use crate::rate_model::{RateKind, RateModel};
use crate::tree::{NodeIdx, TypedTree};
use crate::Result;

/// What happens at the young end of a stretch of lineage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineageEvent {
    /// Type change `change` on the branch above `node`.
    Migration { node: NodeIdx, change: usize },
    /// The tip `node` is sampled.
    Sample { node: NodeIdx },
    /// The lineage splits at `node`, children ordered by node index.
    Birth {
        node: NodeIdx,
        children: [NodeIdx; 2],
    },
}

impl LineageEvent {
    /// Sampling or birth event at the node itself.
    pub fn at_node(tree: &TypedTree, node: NodeIdx) -> Result<Self> {
        match tree.ordered_children(node).as_slice() {
            [] => Ok(LineageEvent::Sample { node }),
            [first, second] => Ok(LineageEvent::Birth {
                node,
                children: [*first, *second],
            }),
            children => bail!(LikelihoodError::InvalidTree(format!(
                "{node} has {} children.",
                children.len()
            ))),
        }
    }

    /// Oldest event on the branch above `node`, i.e. the first one met going down from the
    /// parent.
    pub fn top_of_branch(tree: &TypedTree, node: NodeIdx) -> Result<Self> {
        match tree.node(node).changes.len() {
            0 => Self::at_node(tree, node),
            count => Ok(LineageEvent::Migration {
                node,
                change: count - 1,
            }),
        }
    }

    /// Next event below a type change.
    pub fn below(&self, tree: &TypedTree) -> Result<Option<Self>> {
        match *self {
            LineageEvent::Migration { node, change: 0 } => Self::at_node(tree, node).map(Some),
            LineageEvent::Migration { node, change } => Ok(Some(LineageEvent::Migration {
                node,
                change: change - 1,
            })),
            _ => Ok(None),
        }
    }

    pub fn height(&self, tree: &TypedTree) -> f64 {
        match *self {
            LineageEvent::Migration { node, change } => tree.node(node).changes[change].height,
            LineageEvent::Sample { node } | LineageEvent::Birth { node, .. } => {
                tree.node(node).height
            }
        }
    }
}

/// Shared read-only context of one likelihood evaluation.
///
/// Times are elapsed times since the horizon: the horizon is at 0, the present at
/// `horizon`, and a node of height `h` sits at `horizon - h`.
pub(crate) struct Recursion<'a, I: StateIntegrator> {
    pub(crate) tree: &'a TypedTree,
    pub(crate) model: &'a RateModel,
    pub(crate) integrator: &'a I,
}

impl<I: StateIntegrator> Recursion<'_, I> {
    pub(crate) fn horizon(&self) -> f64 {
        self.model.horizon()
    }

    pub(crate) fn time_of(&self, event: &LineageEvent) -> f64 {
        self.horizon() - event.height(self.tree)
    }

    /// Probability that a lineage alive at `time` leaves no sampled descendant, per type.
    pub(crate) fn extinction_at(&self, time: f64, stats: &mut IntegrationStats) -> Result<Vec<f64>> {
        let mut p = self.model.present_survival();
        let present = self.horizon();
        if present - time < TIME_TOLERANCE {
            return Ok(p);
        }
        for segment in self.model.intervals().segments(time, present) {
            let system = PgSystem::new(self.model.interval_rates(segment.interval));
            stats.record(self.integrator.integrate(&system, &mut p, segment.young, segment.old)?);
            if segment.crosses_breakpoint && self.model.rho_sampling() {
                let rho = &self.model.interval_rates(segment.interval - 1).rho;
                p.iter_mut().zip(rho).for_each(|(p, rho)| *p *= 1.0 - rho);
            }
        }
        Ok(p)
    }

    /// Propagates `state` from `to` back to `from`, interval by interval, applying the
    /// scheduled sampling events crossed on the way.
    pub(crate) fn propagate<D: Density>(
        &self,
        state: &mut PgState<D>,
        from: f64,
        to: f64,
        stats: &mut IntegrationStats,
    ) -> Result<()> {
        if to - from < TIME_TOLERANCE || (self.horizon() - from).abs() < TIME_TOLERANCE {
            return Ok(());
        }
        for segment in self.model.intervals().segments(from, to) {
            let system = PgSystem::new(self.model.interval_rates(segment.interval));
            stats.record(state.integrate(self.integrator, &system, segment.young, segment.old)?);
            if segment.crosses_breakpoint && self.model.rho_sampling() {
                let survival: Vec<f64> = self
                    .model
                    .interval_rates(segment.interval - 1)
                    .rho
                    .iter()
                    .map(|rho| 1.0 - rho)
                    .collect();
                state.scale_all(&survival);
            }
        }
        Ok(())
    }

    /// State right above a type change at `time`: the density of the type above the change is
    /// the density of the type below it times the migration rate between the two.
    pub(crate) fn migrate<D: Density>(
        &self,
        below_state: PgState<D>,
        above: usize,
        below: usize,
        time: f64,
    ) -> PgState<D> {
        let interval = self.model.interval_of(time);
        let rate = self.model.migration_rate(above, below, interval);
        let density = below_state.ge[below].scale(rate);
        let mut state = PgState::new(below_state.p);
        state.ge[above] = density;
        state
    }

    /// State at `from` of the lineage whose youngest event is `event`, happening at `to`.
    pub(crate) fn subtree<D: Density>(
        &self,
        event: LineageEvent,
        from: f64,
        to: f64,
        stats: &mut IntegrationStats,
    ) -> Result<PgState<D>> {
        let mut state = match event {
            LineageEvent::Migration { node, change } => {
                let node = self.tree.node(node);
                let above = node.changes[change].new_type;
                let below = node.type_below(change);
                let Some(next) = event.below(self.tree)? else {
                    bail!("A type change always has an event below it.");
                };
                let below_state = self.subtree(next, to, self.time_of(&next), stats)?;
                trace!("Type change from {below} to {above} at {to}.");
                self.migrate(below_state, above, below, to)
            }
            LineageEvent::Sample { node } => self.sample(node, to, stats)?,
            LineageEvent::Birth { node, children } => {
                let [first, second] = children;
                let first = self.branch::<D>(first, to, stats)?;
                let second = self.branch::<D>(second, to, stats)?;
                let node_type = self.tree.node(node).node_type;
                let interval = self.model.interval_of(to);
                let birth = self.model.rate(RateKind::Birth, node_type, interval);
                trace!("Birth of type {node_type} at {to}.");
                let mut state = PgState::new(first.p);
                state.ge[node_type] = first.ge[node_type].mul(second.ge[node_type]).scale(birth);
                state
            }
        };
        self.propagate(&mut state, from, to, stats)?;
        Ok(state)
    }

    /// State at `parent_time` of the branch above `node`.
    pub(crate) fn branch<D: Density>(
        &self,
        node: NodeIdx,
        parent_time: f64,
        stats: &mut IntegrationStats,
    ) -> Result<PgState<D>> {
        let event = LineageEvent::top_of_branch(self.tree, node)?;
        self.subtree(event, parent_time, self.time_of(&event), stats)
    }

    fn sample<D: Density>(
        &self,
        node: NodeIdx,
        time: f64,
        stats: &mut IntegrationStats,
    ) -> Result<PgState<D>> {
        let node_type = self.tree.node(node).node_type;
        let p = self.extinction_at(time, stats)?;
        let interval = self.model.interval_of(time);
        let density = match self.model.scheduled_sample(node_type, time) {
            Some(rho) => rho,
            None => {
                let sampling = self.model.rate(RateKind::Sampling, node_type, interval);
                if self.model.sampled_ancestors() {
                    let removal = self.model.rate(RateKind::Removal, node_type, interval);
                    sampling * (removal + (1.0 - removal) * p[node_type])
                } else {
                    sampling
                }
            }
        };
        trace!("Sample of type {node_type} at {time} with density {density}.");
        let mut state = PgState::new(p);
        state.ge[node_type] = D::from_f64(density);
        Ok(state)
    }
}
