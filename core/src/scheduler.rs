use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use tracing::trace;

use crate::error::{Result, SimError};
use crate::flow::{Flow, FlowId, FlowSpec, FlowState};
use crate::topology::{LinkId, NodeId, Topology};
use crate::RATE_EPS;

/// Membership change applied by [`FlowScheduler::update_flow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOp {
    Insert,
    Remove,
}

/// Heap key ordered by event time, ties broken by ascending flow id so equal
/// timestamps replay identically.
#[derive(Debug, Clone, Copy)]
struct EventKey {
    time: f64,
    flow: FlowId,
}

impl PartialEq for EventKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EventKey {}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then(self.flow.cmp(&other.flow))
    }
}

/// Water-filling bookkeeping for one link.
struct FillState {
    remaining: f64,
    unresolved: usize,
}

/// Owns the flow lifecycle and the fair-share recomputation.
///
/// Flows live in an arena keyed by id; the pending and running orders are
/// binary heaps holding `(time, id)` keys only. Running-heap entries go stale
/// whenever a rate change moves a projected finish, so reads skip any entry
/// that no longer matches its flow.
#[derive(Default)]
pub struct FlowScheduler {
    flows: BTreeMap<FlowId, Flow>,
    pending: BinaryHeap<Reverse<EventKey>>,
    running: BinaryHeap<Reverse<EventKey>>,
    finished: Vec<FlowId>,
}

impl FlowScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a routed flow under `id`, entering it into the pending set.
    pub fn assign_flow(&mut self, id: FlowId, spec: &FlowSpec, path: Vec<NodeId>) {
        let mut flow = Flow::new(id, spec);
        flow.build_path(path);
        self.pending.push(Reverse(EventKey {
            time: flow.start_time,
            flow: id,
        }));
        self.flows.insert(id, flow);
    }

    pub fn flow(&self, id: FlowId) -> Option<&Flow> {
        self.flows.get(&id)
    }

    pub(crate) fn flow_mut(&mut self, id: FlowId) -> Option<&mut Flow> {
        self.flows.get_mut(&id)
    }

    pub fn flows(&self) -> &BTreeMap<FlowId, Flow> {
        &self.flows
    }

    /// Flow ids in completion order.
    pub fn finished(&self) -> &[FlowId] {
        &self.finished
    }

    /// Earliest-start pending flow, if any.
    pub fn peek_pending(&self) -> Option<(f64, FlowId)> {
        self.pending.peek().map(|Reverse(key)| (key.time, key.flow))
    }

    pub fn pop_pending(&mut self) -> Option<FlowId> {
        self.pending.pop().map(|Reverse(key)| key.flow)
    }

    /// Earliest-finishing running flow. Discards stale heap entries on the
    /// way; an infinite time means every running flow is starved.
    pub fn peek_running(&mut self) -> Option<(f64, FlowId)> {
        while let Some(Reverse(key)) = self.running.peek() {
            let stale = match self.flows.get(&key.flow) {
                Some(flow) => flow.state != FlowState::Running || flow.finish_time != key.time,
                None => true,
            };
            if stale {
                self.running.pop();
                continue;
            }
            return Some((key.time, key.flow));
        }
        None
    }

    pub fn pop_running(&mut self) -> Option<(f64, FlowId)> {
        let head = self.peek_running()?;
        self.running.pop();
        Some(head)
    }

    /// Running flows pinned at zero rate (infinite projected finish).
    pub fn starved(&self) -> Vec<FlowId> {
        self.flows
            .values()
            .filter(|flow| flow.state == FlowState::Running && flow.finish_time.is_infinite())
            .map(|flow| flow.id)
            .collect()
    }

    /// Apply a lifecycle change at simulated time `now` and recompute the
    /// fair-share rate of every flow the change can affect.
    pub fn update_flow(
        &mut self,
        topo: &mut Topology,
        id: FlowId,
        op: FlowOp,
        now: f64,
    ) -> Result<()> {
        let flow = self.flows.get_mut(&id).ok_or(SimError::UnknownFlow(id))?;
        let seeds = flow.path_links.clone();

        match op {
            FlowOp::Insert => {
                match flow.state {
                    FlowState::Pending => {}
                    FlowState::Running => return Err(SimError::AlreadyStarted(id)),
                    FlowState::Finished => return Err(SimError::AlreadyFinished(id)),
                }
                for link in &seeds {
                    if !topo.has_link(*link) {
                        return Err(SimError::InvalidTopology(format!(
                            "flow {id} routed over unknown link ({}, {})",
                            link.0, link.1
                        )));
                    }
                }
                flow.state = FlowState::Running;
                flow.last_update = now;
                let nodes = flow.path_nodes.clone();
                topo.attach_flow(id, &nodes, &seeds);
            }
            FlowOp::Remove => {
                match flow.state {
                    FlowState::Running => {}
                    FlowState::Pending | FlowState::Finished => {
                        return Err(SimError::AlreadyFinished(id));
                    }
                }
                flow.advance_to(now);
                flow.state = FlowState::Finished;
                flow.rate = 0.0;
                flow.finish_time = now;
                let nodes = flow.path_nodes.clone();
                topo.detach_flow(id, &nodes, &seeds);
                self.finished.push(id);
            }
        }

        self.reallocate(topo, &seeds, now)
    }

    /// Max-min fair water-filling over the sharing closure of `seeds`.
    ///
    /// The affected set grows to a fixpoint: every flow on a touched link,
    /// then every link those flows traverse. Rates outside the closure cannot
    /// change, so recomputing inside it keeps the capacity invariant on every
    /// link.
    fn reallocate(&mut self, topo: &Topology, seeds: &[LinkId], now: f64) -> Result<()> {
        let mut links: BTreeSet<LinkId> = seeds.iter().copied().collect();
        let mut members: BTreeSet<FlowId> = BTreeSet::new();
        let mut frontier: Vec<LinkId> = links.iter().copied().collect();
        while let Some(link_id) = frontier.pop() {
            let Some(link) = topo.link(link_id) else {
                continue;
            };
            for &flow_id in &link.flows {
                if !members.insert(flow_id) {
                    continue;
                }
                if let Some(flow) = self.flows.get(&flow_id) {
                    for &other in &flow.path_links {
                        if links.insert(other) {
                            frontier.push(other);
                        }
                    }
                }
            }
        }
        if members.is_empty() {
            return Ok(());
        }

        // Every flow on a closure link is itself in the closure, so the raw
        // membership count doubles as the unresolved count.
        let mut fill: BTreeMap<LinkId, FillState> = BTreeMap::new();
        for &link_id in &links {
            if let Some(link) = topo.link(link_id) {
                fill.insert(
                    link_id,
                    FillState {
                        remaining: link.capacity,
                        unresolved: link.flows.len(),
                    },
                );
            }
        }

        let mut unresolved = members.clone();
        let mut rates: BTreeMap<FlowId, f64> = BTreeMap::new();
        while !unresolved.is_empty() {
            // The most constrained link: smallest remaining share per
            // unresolved flow. BTreeMap order fixes ties.
            let mut bottleneck: Option<(LinkId, f64)> = None;
            for (&link_id, state) in &fill {
                if state.unresolved == 0 {
                    continue;
                }
                let share = (state.remaining / state.unresolved as f64).max(0.0);
                if bottleneck.map_or(true, |(_, best)| share < best) {
                    bottleneck = Some((link_id, share));
                }
            }
            let Some((link_id, share)) = bottleneck else {
                break;
            };

            // Fix every unresolved flow on the bottleneck at its fair share;
            // their rates never rise again. Each fixed flow releases its seat
            // on every other link it traverses.
            let resolved: Vec<FlowId> = match topo.link(link_id) {
                Some(link) => link
                    .flows
                    .iter()
                    .copied()
                    .filter(|flow_id| unresolved.contains(flow_id))
                    .collect(),
                None => Vec::new(),
            };
            for flow_id in resolved {
                unresolved.remove(&flow_id);
                rates.insert(flow_id, share);
                let Some(flow) = self.flows.get(&flow_id) else {
                    continue;
                };
                let traversed: BTreeSet<LinkId> = flow.path_links.iter().copied().collect();
                for link in traversed {
                    if let Some(state) = fill.get_mut(&link) {
                        state.remaining = (state.remaining - share).max(0.0);
                        state.unresolved = state.unresolved.saturating_sub(1);
                    }
                }
            }
        }

        // Commit: account progress at the old rate up to `now`, then fix the
        // new rate, reproject the finish, and queue a fresh heap key.
        for (&flow_id, &rate) in &rates {
            let Some(flow) = self.flows.get_mut(&flow_id) else {
                continue;
            };
            flow.advance_to(now);
            flow.set_rate(now, rate);
            self.running.push(Reverse(EventKey {
                time: flow.finish_time,
                flow: flow_id,
            }));
            trace!(
                flow = flow_id,
                rate,
                finish = flow.finish_time,
                "rate reassigned"
            );
        }

        // Allocations past capacity mean the allocator itself is broken;
        // surface it instead of clamping.
        for &link_id in &links {
            let Some(link) = topo.link(link_id) else {
                continue;
            };
            let allocated: f64 = link
                .flows
                .iter()
                .filter_map(|flow_id| self.flows.get(flow_id))
                .map(|flow| flow.rate)
                .sum();
            if allocated > link.capacity + link.capacity.abs() * RATE_EPS + RATE_EPS {
                return Err(SimError::OverCapacity {
                    link: link_id,
                    allocated,
                    capacity: link.capacity,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Chain 1 -> 2 -> 3 -> 4 with both directions present.
    fn line_topology(n: NodeId, capacity: f64) -> Topology {
        let mut topo = Topology::new();
        for id in 1..=n {
            topo.add_node(id);
        }
        for id in 1..n {
            topo.add_duplex_link(id, id + 1).unwrap();
        }
        topo.set_all_capacity(capacity).unwrap();
        topo
    }

    fn spec(src: NodeId, dst: NodeId, size: f64, start_time: f64) -> FlowSpec {
        FlowSpec {
            src,
            dst,
            size,
            start_time,
        }
    }

    fn start(
        sched: &mut FlowScheduler,
        topo: &mut Topology,
        id: FlowId,
        spec: &FlowSpec,
        path: Vec<NodeId>,
        now: f64,
    ) {
        sched.assign_flow(id, spec, path);
        sched.pop_pending();
        sched.update_flow(topo, id, FlowOp::Insert, now).unwrap();
    }

    #[test]
    fn two_flows_split_a_link_evenly() {
        let mut topo = line_topology(2, 1000.0);
        let mut sched = FlowScheduler::new();
        start(&mut sched, &mut topo, 0, &spec(1, 2, 2000.0, 0.0), vec![1, 2], 0.0);
        start(&mut sched, &mut topo, 1, &spec(1, 2, 2000.0, 0.0), vec![1, 2], 0.0);

        assert_eq!(sched.flow(0).unwrap().rate, 500.0);
        assert_eq!(sched.flow(1).unwrap().rate, 500.0);
        assert_eq!(sched.flow(0).unwrap().finish_time, 4.0);
    }

    #[test]
    fn elsewhere_capped_flow_releases_its_share() {
        // Flows A (1->3->4), B and C (2->3->4) contend on (3, 4) with
        // capacity 3; A's private first hop is capped at 1.
        let mut topo = Topology::new();
        for id in 1..=4 {
            topo.add_node(id);
        }
        for (a, b) in [(1, 3), (2, 3), (3, 4)] {
            topo.add_duplex_link(a, b).unwrap();
        }
        topo.set_all_capacity(100.0).unwrap();
        topo.set_link_capacity((1, 3), 1.0).unwrap();
        topo.set_link_capacity((3, 4), 3.0).unwrap();

        let mut sched = FlowScheduler::new();
        start(&mut sched, &mut topo, 0, &spec(1, 4, 10.0, 0.0), vec![1, 3, 4], 0.0);
        start(&mut sched, &mut topo, 1, &spec(2, 4, 10.0, 0.0), vec![2, 3, 4], 0.0);
        start(&mut sched, &mut topo, 2, &spec(2, 4, 10.0, 0.0), vec![2, 3, 4], 0.0);

        assert!((sched.flow(0).unwrap().rate - 1.0).abs() < 1e-9);
        assert!((sched.flow(1).unwrap().rate - 1.0).abs() < 1e-9);
        assert!((sched.flow(2).unwrap().rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn removal_restores_full_rate_to_survivors() {
        let mut topo = line_topology(2, 1000.0);
        let mut sched = FlowScheduler::new();
        start(&mut sched, &mut topo, 0, &spec(1, 2, 2000.0, 0.0), vec![1, 2], 0.0);
        start(&mut sched, &mut topo, 1, &spec(1, 2, 500.0, 0.0), vec![1, 2], 0.0);

        // Flow 1 finishes at t = 1; flow 0 has 1500 bits left and the whole
        // link again.
        sched.update_flow(&mut topo, 1, FlowOp::Remove, 1.0).unwrap();
        let survivor = sched.flow(0).unwrap();
        assert_eq!(survivor.rate, 1000.0);
        assert_eq!(survivor.remaining, 1500.0);
        assert_eq!(survivor.finish_time, 2.5);
        assert_eq!(sched.finished(), &[1]);
    }

    #[test]
    fn rate_change_ripples_through_shared_links() {
        // Flow 0 spans (1,2) and (2,3); flow 1 only (1,2); flow 2 only (2,3).
        // Starting flow 1 squeezes flow 0, which must free headroom for
        // flow 2 even though flow 1 and flow 2 share no link.
        let mut topo = line_topology(3, 1000.0);
        let mut sched = FlowScheduler::new();
        start(&mut sched, &mut topo, 0, &spec(1, 3, 1e6, 0.0), vec![1, 2, 3], 0.0);
        start(&mut sched, &mut topo, 2, &spec(2, 3, 1e6, 0.0), vec![2, 3], 0.0);
        assert_eq!(sched.flow(0).unwrap().rate, 500.0);
        assert_eq!(sched.flow(2).unwrap().rate, 500.0);

        start(&mut sched, &mut topo, 1, &spec(1, 2, 1e6, 0.0), vec![1, 2], 0.0);
        assert_eq!(sched.flow(0).unwrap().rate, 500.0);
        assert_eq!(sched.flow(1).unwrap().rate, 500.0);
        assert_eq!(sched.flow(2).unwrap().rate, 500.0);

        // Dropping flow 1 lets flow 0 back up, and flow 2 shrinks to match.
        sched.update_flow(&mut topo, 1, FlowOp::Remove, 1.0).unwrap();
        assert_eq!(sched.flow(0).unwrap().rate, 500.0);
        assert_eq!(sched.flow(2).unwrap().rate, 500.0);
    }

    #[test]
    fn removing_a_finished_flow_is_rejected() {
        let mut topo = line_topology(2, 1000.0);
        let mut sched = FlowScheduler::new();
        start(&mut sched, &mut topo, 0, &spec(1, 2, 1000.0, 0.0), vec![1, 2], 0.0);
        sched.update_flow(&mut topo, 0, FlowOp::Remove, 1.0).unwrap();

        let err = sched
            .update_flow(&mut topo, 0, FlowOp::Remove, 1.0)
            .unwrap_err();
        assert!(matches!(err, SimError::AlreadyFinished(0)));
        // The link's membership was not double-subtracted.
        assert!(topo.link((1, 2)).unwrap().flows.is_empty());
    }

    #[test]
    fn double_insert_is_rejected() {
        let mut topo = line_topology(2, 1000.0);
        let mut sched = FlowScheduler::new();
        start(&mut sched, &mut topo, 0, &spec(1, 2, 1000.0, 0.0), vec![1, 2], 0.0);
        let err = sched
            .update_flow(&mut topo, 0, FlowOp::Insert, 0.0)
            .unwrap_err();
        assert!(matches!(err, SimError::AlreadyStarted(0)));
    }

    #[test]
    fn insert_rejects_paths_over_unknown_links() {
        let mut topo = line_topology(2, 1000.0);
        let mut sched = FlowScheduler::new();
        sched.assign_flow(0, &spec(1, 2, 1000.0, 0.0), vec![1, 5, 2]);
        sched.pop_pending();
        let err = sched
            .update_flow(&mut topo, 0, FlowOp::Insert, 0.0)
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidTopology(_)));
    }

    #[test]
    fn zero_capacity_starves_flows() {
        let mut topo = line_topology(2, 0.0);
        let mut sched = FlowScheduler::new();
        start(&mut sched, &mut topo, 0, &spec(1, 2, 1000.0, 0.0), vec![1, 2], 0.0);
        assert_eq!(sched.flow(0).unwrap().rate, 0.0);
        assert!(sched.flow(0).unwrap().finish_time.is_infinite());
        assert_eq!(sched.starved(), vec![0]);
    }

    #[test]
    fn stale_heap_entries_are_skipped() {
        let mut topo = line_topology(2, 1000.0);
        let mut sched = FlowScheduler::new();
        start(&mut sched, &mut topo, 0, &spec(1, 2, 1000.0, 0.0), vec![1, 2], 0.0);
        assert_eq!(sched.peek_running(), Some((1.0, 0)));

        // The second flow halves the rate; the old (1.0, 0) key is stale.
        start(&mut sched, &mut topo, 1, &spec(1, 2, 1000.0, 0.0), vec![1, 2], 0.0);
        assert_eq!(sched.peek_running(), Some((2.0, 0)));
    }

    #[test]
    fn equal_finish_times_order_by_flow_id() {
        let mut topo = line_topology(2, 1000.0);
        let mut sched = FlowScheduler::new();
        start(&mut sched, &mut topo, 0, &spec(1, 2, 1000.0, 0.0), vec![1, 2], 0.0);
        start(&mut sched, &mut topo, 1, &spec(1, 2, 1000.0, 0.0), vec![1, 2], 0.0);
        // Both project t = 2.
        assert_eq!(sched.pop_running(), Some((2.0, 0)));
    }
}
