use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::{Result, SimError};
use crate::topology::{NodeId, Topology};

/// Computes and caches paths from topology structure alone, never from
/// current load.
pub trait Route {
    /// Compute and cache a path for `(src, dst)`. A disconnected pair leaves
    /// the cache empty; `path` reports it.
    fn build_path(&mut self, topo: &Topology, src: NodeId, dst: NodeId) -> Result<()>;

    /// Cached node sequence for the pair, if one exists.
    fn path(&self, src: NodeId, dst: NodeId) -> Option<&[NodeId]>;
}

/// Breadth-first shortest-path routing with a per-pair cache.
///
/// Neighbors expand in ascending node-id order, so equal-length paths
/// resolve identically on every run.
#[derive(Debug, Default)]
pub struct ShortestPathRouting {
    cache: BTreeMap<(NodeId, NodeId), Vec<NodeId>>,
}

impl ShortestPathRouting {
    pub fn new() -> Self {
        Self::default()
    }

    fn bfs(topo: &Topology, src: NodeId, dst: NodeId) -> Option<Vec<NodeId>> {
        let mut prev: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut seen: BTreeSet<NodeId> = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        seen.insert(src);
        queue.push_back(src);

        while let Some(current) = queue.pop_front() {
            if current == dst {
                break;
            }
            let Some(node) = topo.node(current) else {
                continue;
            };
            for &(from, to) in &node.links {
                if from != current {
                    continue;
                }
                if seen.insert(to) {
                    prev.insert(to, current);
                    queue.push_back(to);
                }
            }
        }

        if src != dst && !prev.contains_key(&dst) {
            return None;
        }
        let mut path = vec![dst];
        let mut current = dst;
        while current != src {
            current = *prev.get(&current)?;
            path.push(current);
        }
        path.reverse();
        Some(path)
    }
}

impl Route for ShortestPathRouting {
    fn build_path(&mut self, topo: &Topology, src: NodeId, dst: NodeId) -> Result<()> {
        if topo.node(src).is_none() || topo.node(dst).is_none() {
            return Err(SimError::InvalidTopology(format!(
                "route endpoints {src} -> {dst} reference a missing node"
            )));
        }
        if self.cache.contains_key(&(src, dst)) {
            return Ok(());
        }
        if let Some(path) = Self::bfs(topo, src, dst) {
            self.cache.insert((src, dst), path);
        }
        Ok(())
    }

    fn path(&self, src: NodeId, dst: NodeId) -> Option<&[NodeId]> {
        self.cache.get(&(src, dst)).map(Vec::as_slice)
    }
}
