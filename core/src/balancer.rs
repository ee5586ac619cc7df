use rand::prelude::*;

use crate::error::{Result, SimError};
use crate::flow::Flow;
use crate::topology::{NodeId, Topology};

/// Invoked once per flow as it transitions from pending to running. May
/// rewrite the flow's path among valid alternatives; the rewritten path must
/// keep both endpoints and use only existing links.
pub trait Balance {
    fn rebalance(&mut self, topo: &Topology, flow: &mut Flow) -> Result<()>;
}

/// Alternative nodes that could replace an interior hop: successors of the
/// previous hop that also link onward to the next hop.
fn alternatives(topo: &Topology, prev: NodeId, next: NodeId) -> Vec<NodeId> {
    let Some(node) = topo.node(prev) else {
        return Vec::new();
    };
    node.links
        .iter()
        .filter(|link| link.0 == prev)
        .map(|link| link.1)
        .filter(|&mid| topo.has_link((mid, next)))
        .collect()
}

/// Swap the hop at `idx` for `mid`, patching the two adjacent links.
fn rewrite_hop(topo: &Topology, flow: &mut Flow, idx: usize, mid: NodeId) -> Result<()> {
    let prev = flow.path_nodes[idx - 1];
    let next = flow.path_nodes[idx + 1];
    if !topo.has_link((prev, mid)) || !topo.has_link((mid, next)) {
        return Err(SimError::InvalidTopology(format!(
            "rebalanced hop {mid} breaks the path between {prev} and {next}"
        )));
    }
    flow.path_nodes[idx] = mid;
    flow.path_links[idx - 1] = (prev, mid);
    flow.path_links[idx] = (mid, next);
    Ok(())
}

/// Leaves every path untouched. The default policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityBalancer;

impl Balance for IdentityBalancer {
    fn rebalance(&mut self, _topo: &Topology, _flow: &mut Flow) -> Result<()> {
        Ok(())
    }
}

/// Moves each interior hop onto the least-loaded valid alternative, ties to
/// the lowest node id. This is spine re-selection in a leaf-spine fabric,
/// expressed as a policy over any tier with parallel candidates.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoadedBalancer;

impl Balance for LeastLoadedBalancer {
    fn rebalance(&mut self, topo: &Topology, flow: &mut Flow) -> Result<()> {
        for idx in 1..flow.path_nodes.len().saturating_sub(1) {
            let prev = flow.path_nodes[idx - 1];
            let next = flow.path_nodes[idx + 1];
            let candidates = alternatives(topo, prev, next);
            if candidates.len() < 2 {
                continue;
            }
            let pick = topo.least_loaded_among(&candidates)?;
            if pick != flow.path_nodes[idx] {
                rewrite_hop(topo, flow, idx, pick)?;
            }
        }
        Ok(())
    }
}

/// Picks uniformly among valid alternatives with a seeded generator, so runs
/// stay reproducible.
#[derive(Debug)]
pub struct RandomBalancer {
    rng: StdRng,
}

impl RandomBalancer {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Balance for RandomBalancer {
    fn rebalance(&mut self, topo: &Topology, flow: &mut Flow) -> Result<()> {
        for idx in 1..flow.path_nodes.len().saturating_sub(1) {
            let prev = flow.path_nodes[idx - 1];
            let next = flow.path_nodes[idx + 1];
            let candidates = alternatives(topo, prev, next);
            if candidates.len() < 2 {
                continue;
            }
            let pick = candidates[self.rng.gen_range(0..candidates.len())];
            if pick != flow.path_nodes[idx] {
                rewrite_hop(topo, flow, idx, pick)?;
            }
        }
        Ok(())
    }
}
