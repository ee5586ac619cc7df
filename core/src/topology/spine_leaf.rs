use serde::{Deserialize, Serialize};

use super::{NodeId, Topology};
use crate::error::Result;

/// Dimensions of a two-tier leaf-spine fabric.
///
/// Node ids run contiguously from 1: servers first, then ToR switches, then
/// cores. Every server hangs off one ToR; ToRs and cores form a full mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpineLeafConfig {
    pub servers_per_rack: u32,
    pub tors: u32,
    pub cores: u32,
}

impl Default for SpineLeafConfig {
    fn default() -> Self {
        Self {
            servers_per_rack: 2,
            tors: 8,
            cores: 2,
        }
    }
}

impl SpineLeafConfig {
    pub fn servers(&self) -> u32 {
        self.servers_per_rack * self.tors
    }

    /// Node id of server `i` (1-based within the tier).
    pub fn server_node(&self, i: u32) -> NodeId {
        i
    }

    /// Node id of ToR `i` (1-based within the tier).
    pub fn tor_node(&self, i: u32) -> NodeId {
        self.servers() + i
    }

    /// Node id of core `i` (1-based within the tier).
    pub fn core_node(&self, i: u32) -> NodeId {
        self.servers() + self.tors + i
    }

    /// ToR node id that server node `server` connects to.
    pub fn tor_of(&self, server: NodeId) -> NodeId {
        self.servers() + (server - 1) / self.servers_per_rack + 1
    }

    /// The core-tier candidate set, for load-balancing policies.
    pub fn core_ids(&self) -> Vec<NodeId> {
        (1..=self.cores).map(|i| self.core_node(i)).collect()
    }

    /// Build the fabric: duplex server-ToR links plus a full ToR-core mesh.
    pub fn build(&self) -> Result<Topology> {
        let mut topo = Topology::new();
        for s in 1..=self.servers() {
            topo.add_node(self.server_node(s));
        }
        for t in 1..=self.tors {
            topo.add_node(self.tor_node(t));
        }
        for c in 1..=self.cores {
            topo.add_node(self.core_node(c));
        }

        for s in 1..=self.servers() {
            let server = self.server_node(s);
            topo.add_duplex_link(server, self.tor_of(server))?;
        }
        for t in 1..=self.tors {
            for c in 1..=self.cores {
                topo.add_duplex_link(self.tor_node(t), self.core_node(c))?;
            }
        }
        Ok(topo)
    }
}
