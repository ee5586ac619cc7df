use fabricflow_core::*;

pub struct TestHarness {
    pub sim: Simulation,
}

impl TestHarness {
    /// Two hosts joined by a duplex link of the given capacity.
    pub fn single_link(capacity: f64) -> Self {
        let mut topo = Topology::new();
        topo.add_node(1);
        topo.add_node(2);
        topo.add_duplex_link(1, 2).unwrap();
        Self::with_topology(topo, capacity)
    }

    /// A leaf-spine fabric with uniform link capacity.
    pub fn spine_leaf(config: SpineLeafConfig, capacity: f64) -> Self {
        Self::with_topology(config.build().unwrap(), capacity)
    }

    pub fn with_topology(topo: Topology, capacity: f64) -> Self {
        let mut sim = Simulation::new();
        sim.assign_topology(topo, capacity).unwrap();
        sim.assign_routing_engine(Box::new(ShortestPathRouting::new()));
        Self { sim }
    }

    pub fn load(&mut self, specs: &[FlowSpec]) -> Result<()> {
        self.sim.assign_scheduler(specs)
    }

    pub fn run(&mut self) -> Result<()> {
        self.sim.run()
    }

    /// `(flow id, finish time)` in completion order.
    pub fn finish_times(&self) -> Vec<(FlowId, f64)> {
        self.sim
            .finished_flows()
            .iter()
            .map(|flow| (flow.id, flow.finish_time))
            .collect()
    }
}

pub fn spec(src: NodeId, dst: NodeId, size: f64, start_time: f64) -> FlowSpec {
    FlowSpec {
        src,
        dst,
        size,
        start_time,
    }
}
