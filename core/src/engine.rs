use tracing::{debug, info, warn};

use crate::balancer::{Balance, IdentityBalancer};
use crate::error::{Result, SimError};
use crate::flow::{Flow, FlowId, FlowSpec};
use crate::routing::Route;
use crate::scheduler::{FlowOp, FlowScheduler};
use crate::topology::{LinkId, Topology};

/// What to do with a flow whose endpoints have no route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnroutablePolicy {
    /// Abort the run, naming the flow. The default.
    #[default]
    Abort,
    /// Drop the flow and continue. Opt-in, and logged.
    Drop,
}

/// Drives logical time forward over a configured topology, routing engine,
/// flow set, and load balancer, producing the finished-flow sequence.
///
/// Configuration order follows the data: topology and routing engine first,
/// then the flow set (which is routed as it loads), then optionally a load
/// balancer. `run` consumes events until both the pending and running sets
/// are empty.
pub struct Simulation {
    pub time: f64,
    topo: Option<Topology>,
    routing: Option<Box<dyn Route>>,
    balancer: Box<dyn Balance>,
    sched: FlowScheduler,
    unroutable: UnroutablePolicy,
    loaded: bool,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub fn new() -> Self {
        Self {
            time: 0.0,
            topo: None,
            routing: None,
            balancer: Box::new(IdentityBalancer),
            sched: FlowScheduler::new(),
            unroutable: UnroutablePolicy::default(),
            loaded: false,
        }
    }

    /// Bind a pre-built topology and assign `capacity` to every link.
    pub fn assign_topology(&mut self, mut topo: Topology, capacity: f64) -> Result<()> {
        topo.set_all_capacity(capacity)?;
        self.topo = Some(topo);
        Ok(())
    }

    /// Setup-time override of a single link's capacity.
    pub fn set_link_capacity(&mut self, link: LinkId, capacity: f64) -> Result<()> {
        match self.topo.as_mut() {
            Some(topo) => topo.set_link_capacity(link, capacity),
            None => Err(SimError::Unconfigured("topology")),
        }
    }

    /// Bind the routing capability.
    pub fn assign_routing_engine(&mut self, routing: Box<dyn Route>) {
        self.routing = Some(routing);
    }

    /// Policy for flows the routing engine cannot place. Must be chosen
    /// before the flow set loads.
    pub fn unroutable_policy(&mut self, policy: UnroutablePolicy) {
        self.unroutable = policy;
    }

    /// Load the flow set: validate every record, fix each flow's default
    /// path, and hand the set to the scheduler. Flow ids are input order.
    pub fn assign_scheduler(&mut self, specs: &[FlowSpec]) -> Result<()> {
        let topo = self.topo.as_ref().ok_or(SimError::Unconfigured("topology"))?;
        let routing = self
            .routing
            .as_mut()
            .ok_or(SimError::Unconfigured("routing engine"))?;

        for (index, spec) in specs.iter().enumerate() {
            spec.validate(index)?;
            let id = index as FlowId;
            routing.build_path(topo, spec.src, spec.dst)?;
            match routing.path(spec.src, spec.dst) {
                Some(path) => self.sched.assign_flow(id, spec, path.to_vec()),
                None => match self.unroutable {
                    UnroutablePolicy::Abort => {
                        return Err(SimError::UnroutableFlow {
                            flow: id,
                            src: spec.src,
                            dst: spec.dst,
                        });
                    }
                    UnroutablePolicy::Drop => {
                        warn!(
                            flow = id,
                            src = spec.src,
                            dst = spec.dst,
                            "dropping unroutable flow"
                        );
                    }
                },
            }
        }
        self.loaded = true;
        Ok(())
    }

    /// Bind the load-balancing capability; identity when never called.
    pub fn assign_load_balancer(&mut self, balancer: Box<dyn Balance>) {
        self.balancer = balancer;
    }

    /// Execute the full simulation.
    ///
    /// Phase one walks pending flows in start order, first finishing every
    /// running flow due at or before each start; phase two drains whatever
    /// still runs, earliest finish first. Identical timestamps resolve by
    /// ascending flow id.
    pub fn run(&mut self) -> Result<()> {
        if !self.loaded {
            return Err(SimError::Unconfigured("flow set"));
        }
        let topo = self.topo.as_mut().ok_or(SimError::Unconfigured("topology"))?;

        while let Some((start, id)) = self.sched.peek_pending() {
            while let Some((finish, done)) = self.sched.peek_running() {
                if finish > start {
                    break;
                }
                self.sched.pop_running();
                self.time = finish;
                self.sched.update_flow(topo, done, FlowOp::Remove, finish)?;
                debug!(flow = done, time = finish, "flow finished");
            }

            self.time = self.time.max(start);
            self.sched.pop_pending();
            // The balancer sees the load picture as of this instant.
            if let Some(flow) = self.sched.flow_mut(id) {
                self.balancer.rebalance(topo, flow)?;
            }
            self.sched.update_flow(topo, id, FlowOp::Insert, start)?;
            debug!(flow = id, time = start, "flow started");
        }

        while let Some((finish, id)) = self.sched.peek_running() {
            if finish.is_infinite() {
                return Err(SimError::Starved(self.sched.starved()));
            }
            self.sched.pop_running();
            self.time = finish;
            self.sched.update_flow(topo, id, FlowOp::Remove, finish)?;
            debug!(flow = id, time = finish, "flow finished");
        }

        info!(
            finished = self.sched.finished().len(),
            time = self.time,
            "simulation complete"
        );
        Ok(())
    }

    /// Finished flows in completion order, for reporting collaborators.
    pub fn finished_flows(&self) -> Vec<&Flow> {
        self.sched
            .finished()
            .iter()
            .filter_map(|&id| self.sched.flow(id))
            .collect()
    }

    pub fn topology(&self) -> Option<&Topology> {
        self.topo.as_ref()
    }

    pub fn scheduler(&self) -> &FlowScheduler {
        &self.sched
    }
}
