use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, SimError};
use crate::flow::FlowId;

pub mod spine_leaf;

pub use spine_leaf::SpineLeafConfig;

pub type NodeId = u32;

/// Directed link identifier `(from, to)`.
pub type LinkId = (NodeId, NodeId);

#[derive(Debug, Clone, Default)]
pub struct Node {
    pub id: NodeId,
    /// Incident link ids, both directions.
    pub links: BTreeSet<LinkId>,
    /// Flows currently routed through this node.
    pub flows: BTreeSet<FlowId>,
}

/// A directed, capacity-bearing edge.
///
/// Invariant: the allocated rates of `flows` never sum past `capacity`.
#[derive(Debug, Clone)]
pub struct Link {
    pub id: LinkId,
    /// Bandwidth in bits per second.
    pub capacity: f64,
    /// Flows currently traversing this link.
    pub flows: BTreeSet<FlowId>,
}

/// The physical graph. Owns every node and link; flows refer to them by id.
#[derive(Debug, Default)]
pub struct Topology {
    nodes: BTreeMap<NodeId, Node>,
    links: BTreeMap<LinkId, Link>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: NodeId) {
        self.nodes.entry(id).or_insert_with(|| Node {
            id,
            ..Node::default()
        });
    }

    /// Add a directed link. Both endpoints must already exist.
    pub fn add_link(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&from) || !self.nodes.contains_key(&to) {
            return Err(SimError::InvalidTopology(format!(
                "link ({from}, {to}) references a missing node"
            )));
        }
        let id = (from, to);
        self.links.entry(id).or_insert_with(|| Link {
            id,
            capacity: 0.0,
            flows: BTreeSet::new(),
        });
        if let Some(node) = self.nodes.get_mut(&from) {
            node.links.insert(id);
        }
        if let Some(node) = self.nodes.get_mut(&to) {
            node.links.insert(id);
        }
        Ok(())
    }

    /// Add a link in both directions.
    pub fn add_duplex_link(&mut self, a: NodeId, b: NodeId) -> Result<()> {
        self.add_link(a, b)?;
        self.add_link(b, a)
    }

    /// Assign `capacity` to every link. Must run after construction and
    /// before the simulation starts.
    pub fn set_all_capacity(&mut self, capacity: f64) -> Result<()> {
        if self.links.is_empty() {
            return Err(SimError::InvalidTopology(
                "no links to assign capacity to".into(),
            ));
        }
        for link in self.links.values_mut() {
            link.capacity = capacity;
        }
        Ok(())
    }

    /// Override a single link's capacity.
    pub fn set_link_capacity(&mut self, id: LinkId, capacity: f64) -> Result<()> {
        match self.links.get_mut(&id) {
            Some(link) => {
                link.capacity = capacity;
                Ok(())
            }
            None => Err(SimError::InvalidTopology(format!(
                "unknown link ({}, {})",
                id.0, id.1
            ))),
        }
    }

    pub fn nodes(&self) -> &BTreeMap<NodeId, Node> {
        &self.nodes
    }

    pub fn links(&self) -> &BTreeMap<LinkId, Link> {
        &self.links
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    pub fn has_link(&self, id: LinkId) -> bool {
        self.links.contains_key(&id)
    }

    /// Node with the fewest currently-assigned flows among `candidates`,
    /// ties broken by lowest id.
    pub fn least_loaded_among(&self, candidates: &[NodeId]) -> Result<NodeId> {
        let mut best: Option<(usize, NodeId)> = None;
        for &id in candidates {
            let node = self.nodes.get(&id).ok_or_else(|| {
                SimError::InvalidTopology(format!("unknown candidate node {id}"))
            })?;
            let key = (node.flows.len(), id);
            if best.map_or(true, |current| key < current) {
                best = Some(key);
            }
        }
        best.map(|(_, id)| id)
            .ok_or_else(|| SimError::InvalidTopology("empty candidate set".into()))
    }

    /// Register `flow` on its path. Scheduler-only.
    pub(crate) fn attach_flow(&mut self, flow: FlowId, nodes: &[NodeId], links: &[LinkId]) {
        for id in nodes {
            if let Some(node) = self.nodes.get_mut(id) {
                node.flows.insert(flow);
            }
        }
        for id in links {
            if let Some(link) = self.links.get_mut(id) {
                link.flows.insert(flow);
            }
        }
    }

    /// Unregister `flow` from its path. Scheduler-only.
    pub(crate) fn detach_flow(&mut self, flow: FlowId, nodes: &[NodeId], links: &[LinkId]) {
        for id in nodes {
            if let Some(node) = self.nodes.get_mut(id) {
                node.flows.remove(&flow);
            }
        }
        for id in links {
            if let Some(link) = self.links.get_mut(id) {
                link.flows.remove(&flow);
            }
        }
    }
}
