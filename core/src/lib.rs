pub mod balancer;
pub mod engine;
pub mod error;
pub mod flow;
pub mod report;
pub mod routing;
pub mod scheduler;
pub mod topology;

pub use balancer::{Balance, IdentityBalancer, LeastLoadedBalancer, RandomBalancer};
pub use engine::{Simulation, UnroutablePolicy};
pub use error::{Result, SimError};
pub use flow::{load_specs, load_specs_file, Flow, FlowId, FlowSpec, FlowState};
pub use report::{FctReport, FctRow};
pub use routing::{Route, ShortestPathRouting};
pub use scheduler::{FlowOp, FlowScheduler};
pub use topology::{Link, LinkId, Node, NodeId, SpineLeafConfig, Topology};

/// Size and bandwidth units. Sizes are bits, rates bits per second, times
/// seconds.
pub const KBIT: f64 = 1e3;
pub const MBIT: f64 = 1e6;
pub const GBIT: f64 = 1e9;
pub const KB: f64 = 8e3; // kilobyte, in bits
pub const MB: f64 = 8e6;
pub const GB: f64 = 8e9;

/// Relative tolerance for floating-point capacity accounting.
pub const RATE_EPS: f64 = 1e-9;
