//! Scheduling policy interface.
//!
//! A policy decides when and in what order queued requests are released to
//! the transport. Policies are passive state machines driven entirely by the
//! gateway under its per-disk lock: `start` queues work, `next` yields a
//! [`Verdict`], `done` observes completions, and `timer_fired` ends an
//! anticipation period. Policies never touch the transport or the callout
//! themselves; holding the device idle is expressed as [`Verdict::Hold`]
//! and the gateway arms the timer on the policy's behalf, which keeps the
//! timer race confined to one place.

use crate::bio::Bio;
use crate::bioq::Bioq;

/// What the policy wants the gateway to do next.
#[derive(Debug)]
pub enum Verdict {
    /// Release this request to the transport now.
    Dispatch(Bio),
    /// Withhold work and arm the anticipation timer for this many ticks.
    Hold(u32),
    /// Nothing to release right now.
    Idle,
}

/// Anticipation state machine shared by the AS and RR policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anticipation {
    /// Not anticipating; serve strictly in queue order.
    #[default]
    NoWait,
    /// Waiting for the current I/O to complete before deciding.
    WaitReq,
    /// Timer armed, waiting for a same-flow follow-up request.
    Waiting,
}

/// One scheduling policy instance, bound to a single disk.
pub trait SchedPolicy: Send + std::fmt::Debug {
    /// Registered name of this policy.
    fn name(&self) -> &'static str;

    /// Accepts a new request into the policy's queues.
    fn start(&mut self, bio: Bio);

    /// Yields the next scheduling decision. With `force` set the policy must
    /// surface any pending request it is allowed to release, abandoning
    /// anticipation (forward-progress guarantee for shutdown and pressure).
    fn next(&mut self, force: bool) -> Verdict;

    /// Observes the completion of a previously dispatched request.
    fn done(&mut self, bio: &Bio);

    /// The anticipation timer armed by an earlier [`Verdict::Hold`] expired.
    fn timer_fired(&mut self);

    /// Number of requests currently queued (not in flight).
    fn pending(&self) -> usize;

    /// Removes and returns every queued request, resetting policy state.
    /// Used to fail everything when a device disappears.
    fn drain(&mut self) -> Vec<Bio>;
}

/// Pass-through policy: plain FIFO, no sorting, no anticipation.
///
/// Registered as "none"; the escape hatch when scheduling itself is
/// suspected of causing trouble.
#[derive(Debug, Default)]
pub struct NoopSched {
    queue: Bioq,
}

impl NoopSched {
    /// Creates an empty pass-through policy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchedPolicy for NoopSched {
    fn name(&self) -> &'static str {
        "none"
    }

    fn start(&mut self, bio: Bio) {
        self.queue.push_back(bio);
    }

    fn next(&mut self, _force: bool) -> Verdict {
        match self.queue.pop_front() {
            Some(bio) => Verdict::Dispatch(bio),
            None => Verdict::Idle,
        }
    }

    fn done(&mut self, _bio: &Bio) {}

    fn timer_fired(&mut self) {}

    fn pending(&self) -> usize {
        self.queue.len()
    }

    fn drain(&mut self) -> Vec<Bio> {
        self.queue.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::{BioId, BioOp};

    fn bio(id: u64, offset: u64) -> Bio {
        Bio::new(BioId(id), BioOp::Read, offset, 512)
    }

    #[test]
    fn test_noop_is_fifo() {
        let mut sched = NoopSched::new();
        sched.start(bio(1, 100));
        sched.start(bio(2, 0));
        sched.start(bio(3, 50));
        // Arrival order, never offset order.
        for expect in [1, 2, 3] {
            match sched.next(false) {
                Verdict::Dispatch(b) => assert_eq!(b.id, BioId(expect)),
                other => panic!("expected dispatch, got {other:?}"),
            }
        }
        assert!(matches!(sched.next(false), Verdict::Idle));
    }

    #[test]
    fn test_noop_never_holds() {
        let mut sched = NoopSched::new();
        assert!(matches!(sched.next(false), Verdict::Idle));
        sched.start(bio(1, 0));
        assert!(matches!(sched.next(true), Verdict::Dispatch(_)));
        sched.done(&bio(1, 0));
        assert!(matches!(sched.next(false), Verdict::Idle));
    }

    #[test]
    fn test_noop_drain() {
        let mut sched = NoopSched::new();
        sched.start(bio(1, 0));
        sched.start(bio(2, 0));
        assert_eq!(sched.pending(), 2);
        let drained = sched.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(sched.pending(), 0);
    }
}
