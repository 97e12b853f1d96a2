//! Round-robin flow scheduler.
//!
//! Each flow gets its own offset-sorted queue; flows with pending work wait
//! in a round-robin list for their turn at the device. The active flow is
//! served until it either exhausts its byte budget or goes idle past its
//! anticipation window, at which point the next flow in the list takes
//! over. Because no flow can exceed its budget before yielding, the byte
//! shares of continuously active flows converge to 1:1 within one budget
//! unit.
//!
//! Flow queues are looked up by [`FlowId`] in a single map; the round-robin
//! list and the active slot hold flow identities, not owning references.
//! A queue is removed from the map as soon as it is neither active nor
//! listed and has nothing queued, so an idle flow leaves no residual state.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bio::Bio;
use crate::bioq::Bioq;
use crate::flow::FlowId;
use crate::policy::{Anticipation, SchedPolicy, Verdict};

/// Configuration for the round-robin flow scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrConfig {
    /// Maximum bytes one flow may be served consecutively before rotation.
    pub budget: u64,
    /// Anticipation window in timer ticks.
    pub wait_ticks: u32,
    /// Initial capacity of the flow table.
    pub flow_buckets: usize,
}

impl Default for RrConfig {
    fn default() -> Self {
        Self {
            budget: 8 * 1024 * 1024,
            wait_ticks: 2,
            flow_buckets: 32,
        }
    }
}

/// Counters for the round-robin flow scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RrStats {
    /// Requests released to the transport.
    pub dispatched: u64,
    /// Flow queues created.
    pub flows_created: u64,
    /// Flow queues removed after going idle.
    pub flows_removed: u64,
    /// Activations forced to yield by the byte budget.
    pub budget_rotations: u64,
    /// Anticipation windows ended by timer expiry.
    pub waits_expired: u64,
}

#[derive(Debug)]
struct FlowQueue {
    queue: Bioq,
    /// Bytes served in the current activation.
    service: u64,
    state: Anticipation,
}

impl FlowQueue {
    fn new() -> Self {
        Self {
            queue: Bioq::new(),
            service: 0,
            state: Anticipation::NoWait,
        }
    }
}

/// Round-robin per-flow scheduling policy.
#[derive(Debug)]
pub struct RrSched {
    cfg: RrConfig,
    flows: HashMap<FlowId, FlowQueue>,
    /// Flows with pending work awaiting activation, oldest first. Never
    /// contains the active flow.
    round: VecDeque<FlowId>,
    active: Option<FlowId>,
    /// A completion arrived for the active WaitReq queue; the next `next()`
    /// call turns this into a Hold verdict.
    arm_pending: bool,
    stats: RrStats,
}

impl RrSched {
    /// Creates the policy with the given configuration.
    pub fn new(cfg: RrConfig) -> Self {
        let flows = HashMap::with_capacity(cfg.flow_buckets);
        Self {
            cfg,
            flows,
            round: VecDeque::new(),
            active: None,
            arm_pending: false,
            stats: RrStats::default(),
        }
    }

    /// Number of live per-flow queue objects.
    pub fn live_flows(&self) -> usize {
        self.flows.len()
    }

    /// Flow currently holding device attention, if any.
    pub fn active_flow(&self) -> Option<FlowId> {
        self.active
    }

    /// Scheduler counters.
    pub fn stats(&self) -> &RrStats {
        &self.stats
    }

    fn remove_flow(&mut self, flow: FlowId) {
        self.flows.remove(&flow);
        self.stats.flows_removed += 1;
        debug!(%flow, live = self.flows.len(), "flow queue removed");
    }
}

impl SchedPolicy for RrSched {
    fn name(&self) -> &'static str {
        "rr"
    }

    fn start(&mut self, bio: Bio) {
        let flow = bio.flow();
        let fq = match self.flows.entry(flow) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                self.stats.flows_created += 1;
                debug!(%flow, "flow queue created");
                e.insert(FlowQueue::new())
            }
        };
        let was_empty = fq.queue.is_empty();
        fq.queue.insert_sorted(bio);
        if was_empty {
            if self.active == Some(flow) {
                // The anticipated flow came back; stop idling.
                fq.state = Anticipation::NoWait;
                self.arm_pending = false;
            } else if !self.round.contains(&flow) {
                self.round.push_back(flow);
            }
        }
    }

    fn next(&mut self, force: bool) -> Verdict {
        loop {
            let flow = match self.active {
                Some(flow) => flow,
                None => match self.round.pop_front() {
                    Some(flow) => {
                        // New activation: the service counter resets here
                        // and only here.
                        if let Some(fq) = self.flows.get_mut(&flow) {
                            fq.service = 0;
                            fq.state = Anticipation::NoWait;
                        }
                        self.active = Some(flow);
                        flow
                    }
                    None => return Verdict::Idle,
                },
            };

            let Some(fq) = self.flows.get_mut(&flow) else {
                // The identity outlived its queue; drop the stale slot.
                self.active = None;
                continue;
            };

            if force && fq.state != Anticipation::NoWait {
                fq.state = Anticipation::NoWait;
                self.arm_pending = false;
            }

            match fq.state {
                Anticipation::NoWait => {
                    let (bio, over_budget, empty_after) = match fq.queue.pop_front() {
                        Some(bio) => {
                            fq.service += bio.length;
                            let over = fq.service > self.cfg.budget;
                            let empty = fq.queue.is_empty();
                            if !over && empty {
                                fq.state = Anticipation::WaitReq;
                            }
                            (Some(bio), over, empty)
                        }
                        None => (None, false, true),
                    };
                    let Some(bio) = bio else {
                        // Active but empty and not anticipating; happens
                        // only after a forced deactivation.
                        self.active = None;
                        self.remove_flow(flow);
                        continue;
                    };
                    if over_budget {
                        self.stats.budget_rotations += 1;
                        self.active = None;
                        if empty_after {
                            self.remove_flow(flow);
                        } else {
                            self.round.push_back(flow);
                        }
                    }
                    self.stats.dispatched += 1;
                    return Verdict::Dispatch(bio);
                }
                Anticipation::WaitReq => {
                    if self.arm_pending {
                        self.arm_pending = false;
                        fq.state = Anticipation::Waiting;
                        return Verdict::Hold(self.cfg.wait_ticks);
                    }
                    return Verdict::Idle;
                }
                Anticipation::Waiting => return Verdict::Idle,
            }
        }
    }

    fn done(&mut self, bio: &Bio) {
        let Some(flow) = self.active else {
            return;
        };
        if bio.flow() != flow {
            return;
        }
        if let Some(fq) = self.flows.get(&flow) {
            if fq.state == Anticipation::WaitReq {
                self.arm_pending = true;
            }
        }
    }

    fn timer_fired(&mut self) {
        let Some(flow) = self.active.take() else {
            return;
        };
        self.stats.waits_expired += 1;
        self.arm_pending = false;
        let empty = match self.flows.get_mut(&flow) {
            Some(fq) => {
                let empty = fq.queue.is_empty();
                if !empty {
                    fq.state = Anticipation::NoWait;
                }
                empty
            }
            None => return,
        };
        if empty {
            self.remove_flow(flow);
        } else {
            // A request slipped in as the timer fired; the flow loses its
            // turn but keeps its place in the rotation.
            self.round.push_back(flow);
        }
    }

    fn pending(&self) -> usize {
        self.flows.values().map(|fq| fq.queue.len()).sum()
    }

    fn drain(&mut self) -> Vec<Bio> {
        let mut out = Vec::new();
        for (_, mut fq) in self.flows.drain() {
            out.append(&mut fq.queue.drain());
        }
        self.round.clear();
        self.active = None;
        self.arm_pending = false;
        out
    }
}
