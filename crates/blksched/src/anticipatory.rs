//! Anticipatory scheduler.
//!
//! One offset-sorted queue per disk. After serving a request the policy bets
//! that the same flow will submit a follow-up shortly, and holds the device
//! idle for a bounded number of ticks rather than seeking away to another
//! flow. The bet is capped by a per-flow byte budget: once a flow has been
//! served more than `max_batch` bytes in a row, anticipation is switched
//! off and the queue is served strictly in sorted order.
//!
//! State cycle: NoWait -> WaitReq (request in flight) -> Waiting (timer
//! armed) -> NoWait, either because a same-flow request arrived (the bet
//! paid off) or because the timer expired (the cost of losing it).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bio::Bio;
use crate::bioq::Bioq;
use crate::flow::FlowId;
use crate::policy::{Anticipation, SchedPolicy, Verdict};

/// Configuration for the anticipatory scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsConfig {
    /// Maximum bytes served to one flow consecutively before anticipation
    /// is abandoned for it.
    pub max_batch: u64,
    /// Anticipation window in timer ticks.
    pub wait_ticks: u32,
}

impl Default for AsConfig {
    fn default() -> Self {
        Self {
            max_batch: 8 * 1024 * 1024,
            wait_ticks: 2,
        }
    }
}

/// Counters for the anticipatory scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsStats {
    /// Requests released to the transport.
    pub dispatched: u64,
    /// Anticipation windows that a same-flow follow-up arrived inside.
    pub waits_won: u64,
    /// Anticipation windows ended by timer expiry.
    pub waits_expired: u64,
    /// Dispatches that pushed a flow over its batch budget.
    pub batch_exceeded: u64,
}

/// Anticipatory scheduling policy.
#[derive(Debug, Default)]
pub struct AsSched {
    cfg: AsConfig,
    queue: Bioq,
    state: Anticipation,
    /// Flow served by the most recent dispatch; anticipation waits for it.
    cur_flow: FlowId,
    /// Bytes served to `cur_flow` consecutively.
    service: u64,
    /// A completion arrived while in WaitReq; the next `next()` call turns
    /// this into a Hold verdict.
    arm_pending: bool,
    stats: AsStats,
}

impl AsSched {
    /// Creates the policy with the given configuration.
    pub fn new(cfg: AsConfig) -> Self {
        Self {
            cfg,
            ..Default::default()
        }
    }

    /// Current anticipation state.
    pub fn state(&self) -> Anticipation {
        self.state
    }

    /// Flow currently holding device attention.
    pub fn current_flow(&self) -> FlowId {
        self.cur_flow
    }

    /// Scheduler counters.
    pub fn stats(&self) -> &AsStats {
        &self.stats
    }

    fn stop_anticipating(&mut self) {
        self.state = Anticipation::NoWait;
        self.arm_pending = false;
    }
}

impl SchedPolicy for AsSched {
    fn name(&self) -> &'static str {
        "as"
    }

    fn start(&mut self, bio: Bio) {
        let flow = bio.flow();
        self.queue.insert_sorted(bio);
        if self.state != Anticipation::NoWait && flow == self.cur_flow {
            // The anticipated flow came back: the bet paid off.
            debug!(%flow, "anticipation won");
            self.stats.waits_won += 1;
            self.stop_anticipating();
        }
    }

    fn next(&mut self, force: bool) -> Verdict {
        if force && self.state != Anticipation::NoWait {
            self.stop_anticipating();
        }
        if self.arm_pending {
            self.arm_pending = false;
            self.state = Anticipation::Waiting;
            return Verdict::Hold(self.cfg.wait_ticks);
        }
        match self.state {
            Anticipation::NoWait => match self.queue.pop_front() {
                Some(bio) => {
                    let flow = bio.flow();
                    if flow != self.cur_flow {
                        // Serving flow changed; the batch counter follows it.
                        self.cur_flow = flow;
                        self.service = 0;
                    }
                    self.service += bio.length;
                    if self.service > self.cfg.max_batch {
                        self.stats.batch_exceeded += 1;
                        self.state = Anticipation::NoWait;
                    } else {
                        self.state = Anticipation::WaitReq;
                    }
                    self.stats.dispatched += 1;
                    Verdict::Dispatch(bio)
                }
                None => {
                    self.cur_flow = FlowId::NONE;
                    self.service = 0;
                    Verdict::Idle
                }
            },
            Anticipation::WaitReq | Anticipation::Waiting => Verdict::Idle,
        }
    }

    fn done(&mut self, _bio: &Bio) {
        if self.state == Anticipation::WaitReq {
            match self.queue.front() {
                // Same-flow work is already queued at the head; idling the
                // device would buy nothing.
                Some(head) if head.flow() == self.cur_flow => self.stop_anticipating(),
                _ => self.arm_pending = true,
            }
        }
    }

    fn timer_fired(&mut self) {
        if self.state == Anticipation::Waiting {
            debug!(flow = %self.cur_flow, "anticipation window expired");
            self.stats.waits_expired += 1;
            self.state = Anticipation::NoWait;
        }
    }

    fn pending(&self) -> usize {
        self.queue.len()
    }

    fn drain(&mut self) -> Vec<Bio> {
        self.stop_anticipating();
        self.cur_flow = FlowId::NONE;
        self.service = 0;
        self.queue.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::{BioId, BioOp, BioOrigin};

    fn bio(id: u64, flow: u64, offset: u64, length: u64) -> Bio {
        Bio::new(BioId(id), BioOp::Read, offset, length)
            .with_origin(BioOrigin::root(FlowId(flow)))
    }

    fn cfg(max_batch: u64, wait_ticks: u32) -> AsConfig {
        AsConfig {
            max_batch,
            wait_ticks,
        }
    }

    fn expect_dispatch(sched: &mut AsSched, force: bool) -> Bio {
        match sched.next(force) {
            Verdict::Dispatch(b) => b,
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn test_scenario_a_different_flow_waits_for_timer() {
        let mut sched = AsSched::new(cfg(100, 2));

        // R1 arrives in NoWait and dispatches immediately.
        sched.start(bio(1, 1, 0, 10));
        let r1 = expect_dispatch(&mut sched, false);
        assert_eq!(r1.id, BioId(1));
        assert_eq!(sched.state(), Anticipation::WaitReq);

        // R2 from a different flow does not cancel the anticipation.
        sched.start(bio(2, 2, 5, 10));
        assert!(matches!(sched.next(false), Verdict::Idle));

        // R1 completes: the policy asks for a 2-tick hold.
        sched.done(&bio(1, 1, 0, 10));
        match sched.next(false) {
            Verdict::Hold(ticks) => assert_eq!(ticks, 2),
            other => panic!("expected hold, got {other:?}"),
        }
        assert_eq!(sched.state(), Anticipation::Waiting);
        assert!(matches!(sched.next(false), Verdict::Idle));

        // Timer expiry releases R2.
        sched.timer_fired();
        let r2 = expect_dispatch(&mut sched, false);
        assert_eq!(r2.id, BioId(2));
        assert_eq!(sched.stats().waits_expired, 1);
    }

    #[test]
    fn test_same_flow_arrival_cancels_wait() {
        let mut sched = AsSched::new(cfg(1000, 2));
        sched.start(bio(1, 7, 0, 10));
        expect_dispatch(&mut sched, false);
        sched.done(&bio(1, 7, 0, 10));
        assert!(matches!(sched.next(false), Verdict::Hold(_)));

        // Same-flow follow-up while Waiting: dispatch without timer expiry.
        sched.start(bio(2, 7, 10, 10));
        assert_eq!(sched.state(), Anticipation::NoWait);
        let b = expect_dispatch(&mut sched, false);
        assert_eq!(b.id, BioId(2));
        assert_eq!(sched.stats().waits_won, 1);
        assert_eq!(sched.stats().waits_expired, 0);
    }

    #[test]
    fn test_single_flow_dispatches_in_ascending_offset_order() {
        let mut sched = AsSched::new(cfg(1 << 30, 2));
        // Submitted out of offset order, all one flow and within budget.
        sched.start(bio(1, 3, 40, 10));
        sched.start(bio(2, 3, 0, 10));
        sched.start(bio(3, 3, 20, 10));

        let mut last_offset = 0;
        for _ in 0..3 {
            let b = expect_dispatch(&mut sched, false);
            assert!(b.offset >= last_offset);
            last_offset = b.offset;
            sched.done(&b);
            // The follow-up is already queued, so no hold is ever issued
            // before the next dispatch.
        }
        assert_eq!(sched.stats().waits_expired, 0);
    }

    #[test]
    fn test_batch_budget_disables_anticipation() {
        let mut sched = AsSched::new(cfg(25, 2));
        sched.start(bio(1, 1, 0, 10));
        sched.start(bio(2, 1, 10, 10));
        sched.start(bio(3, 1, 20, 10));
        sched.start(bio(4, 2, 30, 10));

        expect_dispatch(&mut sched, false); // service 10
        sched.done(&bio(1, 1, 0, 10));
        expect_dispatch(&mut sched, false); // service 20
        sched.done(&bio(2, 1, 10, 10));
        // Third dispatch pushes flow 1 over budget: state drops to NoWait.
        expect_dispatch(&mut sched, false); // service 30 > 25
        assert_eq!(sched.state(), Anticipation::NoWait);
        assert_eq!(sched.stats().batch_exceeded, 1);

        // Flow 2 is served immediately, no completion or timer needed.
        let b = expect_dispatch(&mut sched, false);
        assert_eq!(b.id, BioId(4));
    }

    #[test]
    fn test_flow_change_resets_service_counter() {
        let mut sched = AsSched::new(cfg(15, 2));
        sched.start(bio(1, 1, 0, 10));
        expect_dispatch(&mut sched, false);
        sched.done(&bio(1, 1, 0, 10));
        assert!(matches!(sched.next(false), Verdict::Hold(_)));
        sched.start(bio(2, 2, 10, 10));
        sched.timer_fired();
        // Flow 2's first dispatch starts from a zeroed counter, so it stays
        // under the 15-byte budget and anticipates.
        expect_dispatch(&mut sched, false);
        assert_eq!(sched.current_flow(), FlowId(2));
        assert_eq!(sched.state(), Anticipation::WaitReq);
    }

    #[test]
    fn test_empty_queue_resets_tracking() {
        let mut sched = AsSched::new(cfg(100, 2));
        sched.start(bio(1, 9, 0, 10));
        expect_dispatch(&mut sched, false);
        sched.done(&bio(1, 9, 0, 10));
        assert!(matches!(sched.next(false), Verdict::Hold(_)));
        sched.timer_fired();
        assert!(matches!(sched.next(false), Verdict::Idle));
        assert_eq!(sched.current_flow(), FlowId::NONE);
        assert_eq!(sched.state(), Anticipation::NoWait);
    }

    #[test]
    fn test_force_abandons_anticipation() {
        let mut sched = AsSched::new(cfg(100, 2));
        sched.start(bio(1, 1, 0, 10));
        expect_dispatch(&mut sched, false);
        sched.start(bio(2, 2, 10, 10));
        sched.done(&bio(1, 1, 0, 10));
        assert!(matches!(sched.next(false), Verdict::Hold(_)));
        // Forced: the waiting state is abandoned and flow 2 comes out now.
        let b = expect_dispatch(&mut sched, true);
        assert_eq!(b.id, BioId(2));
    }

    #[test]
    fn test_drain_resets_state() {
        let mut sched = AsSched::new(cfg(100, 2));
        sched.start(bio(1, 1, 0, 10));
        sched.start(bio(2, 2, 10, 10));
        let drained = sched.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(sched.pending(), 0);
        assert_eq!(sched.state(), Anticipation::NoWait);
        assert_eq!(sched.current_flow(), FlowId::NONE);
    }
}
