use thiserror::Error;

use crate::flow::FlowId;
use crate::topology::{LinkId, NodeId};

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("flow {flow}: no route from node {src} to node {dst}")]
    UnroutableFlow {
        flow: FlowId,
        src: NodeId,
        dst: NodeId,
    },

    #[error("invalid flow spec at index {index}: {reason}")]
    InvalidFlowSpec { index: usize, reason: String },

    #[error("link {link:?} over capacity: allocated {allocated} of {capacity}")]
    OverCapacity {
        link: LinkId,
        allocated: f64,
        capacity: f64,
    },

    #[error("unknown flow {0}")]
    UnknownFlow(FlowId),

    #[error("flow {0} is already running")]
    AlreadyStarted(FlowId),

    #[error("flow {0} is already finished")]
    AlreadyFinished(FlowId),

    #[error("flows starved at zero rate: {0:?}")]
    Starved(Vec<FlowId>),

    #[error("simulation is missing a component: {0}")]
    Unconfigured(&'static str),

    #[error("could not read flow set: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse flow set JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
