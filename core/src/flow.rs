use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::topology::{LinkId, NodeId};

pub type FlowId = u64;

/// One record of the input flow set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowSpec {
    pub src: NodeId,
    pub dst: NodeId,
    /// Transfer size in bits.
    pub size: f64,
    /// Scheduled start in seconds.
    pub start_time: f64,
}

impl FlowSpec {
    /// Reject malformed records before any simulation step runs.
    pub fn validate(&self, index: usize) -> Result<()> {
        if !self.size.is_finite() || self.size < 0.0 {
            return Err(SimError::InvalidFlowSpec {
                index,
                reason: format!("size {} must be finite and non-negative", self.size),
            });
        }
        if !self.start_time.is_finite() || self.start_time < 0.0 {
            return Err(SimError::InvalidFlowSpec {
                index,
                reason: format!(
                    "start time {} must be finite and non-negative",
                    self.start_time
                ),
            });
        }
        if self.src == self.dst {
            return Err(SimError::InvalidFlowSpec {
                index,
                reason: format!("source and destination are both node {}", self.src),
            });
        }
        Ok(())
    }
}

/// Parse a flow set from its JSON representation.
pub fn load_specs(json: &str) -> Result<Vec<FlowSpec>> {
    let specs: Vec<FlowSpec> = serde_json::from_str(json)?;
    for (index, spec) in specs.iter().enumerate() {
        spec.validate(index)?;
    }
    Ok(specs)
}

/// Read and parse a flow set from a JSON file.
pub fn load_specs_file<P: AsRef<Path>>(path: P) -> Result<Vec<FlowSpec>> {
    let raw = std::fs::read_to_string(path)?;
    load_specs(&raw)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    Pending,
    Running,
    Finished,
}

/// A single transfer moving through the topology. References nodes and links
/// by id only; the topology owns them.
#[derive(Debug, Clone)]
pub struct Flow {
    pub id: FlowId,
    pub src: NodeId,
    pub dst: NodeId,
    pub size: f64,
    pub start_time: f64,
    pub path_nodes: Vec<NodeId>,
    pub path_links: Vec<LinkId>,
    /// Current allocated rate in bits per second.
    pub rate: f64,
    /// Bits left to transfer as of `last_update`.
    pub remaining: f64,
    pub last_update: f64,
    /// Projected finish; `f64::INFINITY` while starved or pending.
    pub finish_time: f64,
    pub state: FlowState,
}

impl Flow {
    pub fn new(id: FlowId, spec: &FlowSpec) -> Self {
        Self {
            id,
            src: spec.src,
            dst: spec.dst,
            size: spec.size,
            start_time: spec.start_time,
            path_nodes: Vec::new(),
            path_links: Vec::new(),
            rate: 0.0,
            remaining: spec.size,
            last_update: spec.start_time,
            finish_time: f64::INFINITY,
            state: FlowState::Pending,
        }
    }

    /// Install the routed node sequence and derive the link sequence from
    /// consecutive node pairs.
    pub fn build_path(&mut self, nodes: Vec<NodeId>) {
        self.path_links = nodes.windows(2).map(|pair| (pair[0], pair[1])).collect();
        self.path_nodes = nodes;
    }

    /// Account transfer progress up to `now` at the current rate.
    pub(crate) fn advance_to(&mut self, now: f64) {
        if now <= self.last_update {
            return;
        }
        if self.rate > 0.0 {
            self.remaining = (self.remaining - self.rate * (now - self.last_update)).max(0.0);
        }
        self.last_update = now;
    }

    /// Fix a new allocated rate at `now` and recompute the projected finish.
    pub(crate) fn set_rate(&mut self, now: f64, rate: f64) {
        self.rate = rate;
        self.finish_time = if rate > 0.0 {
            now + self.remaining / rate
        } else {
            f64::INFINITY
        };
    }
}
