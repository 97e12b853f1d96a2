//! Dispatch gateway.
//!
//! One gateway sits on each disk's request path and wires the selected
//! policy to the transport. All scheduling work happens synchronously
//! inside `start`, `done` and the timer callback, under one mutex per
//! gateway; critical sections are short queue mutations and state
//! transitions. Requests to submit and completions to deliver are collected
//! under the lock and fired after it is released, so the lock is never held
//! across a call back into this layer.
//!
//! The timer race is resolved here, once, for every policy: the gateway
//! stamps each armed callback with a generation number, and the callback
//! re-checks it under the lock before acting. A callback that lost the race
//! to a same-flow arrival finds a stale generation and does nothing.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bio::Bio;
use crate::callout::Callout;
use crate::error::{SchedError, SchedResult};
use crate::policy::{SchedPolicy, Verdict};
use crate::registry::Registry;
use crate::transport::Transport;

/// Counters for one gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayStats {
    /// Requests accepted for scheduling.
    pub started: u64,
    /// Non-reorderable requests sent straight to the transport.
    pub bypassed: u64,
    /// Requests released to the transport by a policy.
    pub dispatched: u64,
    /// Completions delivered.
    pub completed: u64,
    /// Requests failed by a device drain.
    pub failed: u64,
    /// Anticipation timers that expired.
    pub timer_fires: u64,
    /// Timer callbacks that found themselves outdated and did nothing.
    pub stale_timer_fires: u64,
}

struct GatewayInner {
    policy: Box<dyn SchedPolicy>,
    inflight: usize,
    timer_armed: bool,
    timer_gen: u64,
    stats: GatewayStats,
}

/// Per-disk dispatch gateway binding one policy to one transport.
pub struct Gateway {
    transport: Arc<dyn Transport>,
    callout: Arc<dyn Callout>,
    inner: Mutex<GatewayInner>,
    weak: Weak<Gateway>,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

impl Gateway {
    /// Creates a gateway running the named policy from `registry`.
    pub fn new(
        policy_name: &str,
        registry: &Registry,
        transport: Arc<dyn Transport>,
        callout: Arc<dyn Callout>,
    ) -> SchedResult<Arc<Self>> {
        let policy = registry.create(policy_name)?;
        debug!(policy = policy_name, "creating dispatch gateway");
        Ok(Arc::new_cyclic(|weak| Self {
            transport,
            callout,
            inner: Mutex::new(GatewayInner {
                policy,
                inflight: 0,
                timer_armed: false,
                timer_gen: 0,
                stats: GatewayStats::default(),
            }),
            weak: weak.clone(),
        }))
    }

    /// Accepts a request. Non-reorderable kinds bypass the policy and go
    /// straight to the transport.
    pub fn start(&self, bio: Bio) {
        if !bio.op.is_reorderable() {
            self.inner.lock().stats.bypassed += 1;
            self.transport.submit(bio);
            return;
        }
        let to_submit = {
            let mut inner = self.inner.lock();
            inner.stats.started += 1;
            inner.policy.start(bio);
            self.pump(&mut inner, false)
        };
        self.submit_all(to_submit);
    }

    /// Transport completion callback. Delivers the result to the request's
    /// originator and lets the policy react.
    pub fn done(&self, bio: Bio, result: SchedResult<()>) {
        if !bio.op.is_reorderable() {
            bio.complete(result);
            return;
        }
        let to_submit = {
            let mut inner = self.inner.lock();
            if inner.inflight == 0 {
                warn!(id = bio.id.0, "completion for a request this gateway never dispatched");
            } else {
                inner.inflight -= 1;
            }
            inner.stats.completed += 1;
            inner.policy.done(&bio);
            self.pump(&mut inner, false)
        };
        bio.complete(result);
        self.submit_all(to_submit);
    }

    /// Forces out every request the policy is allowed to release, abandoning
    /// anticipation. Used at shutdown and under memory pressure.
    pub fn drain_forced(&self) {
        let to_submit = {
            let mut inner = self.inner.lock();
            self.pump(&mut inner, true)
        };
        self.submit_all(to_submit);
    }

    /// Swaps the active policy. Fails with [`SchedError::Busy`] unless the
    /// outgoing policy's queues are empty and nothing is in flight; no
    /// partially swapped state is ever observable.
    pub fn configure(&self, policy_name: &str, registry: &Registry) -> SchedResult<()> {
        let mut inner = self.inner.lock();
        let pending = inner.policy.pending();
        if pending > 0 || inner.inflight > 0 {
            warn!(
                policy = policy_name,
                pending,
                inflight = inner.inflight,
                "policy swap refused"
            );
            return Err(SchedError::Busy {
                pending,
                inflight: inner.inflight,
            });
        }
        // Build the replacement before touching anything observable.
        let policy = registry.create(policy_name)?;
        if inner.timer_armed {
            self.callout.cancel();
            inner.timer_armed = false;
            inner.timer_gen += 1;
        }
        debug!(policy = policy_name, "policy swapped");
        inner.policy = policy;
        Ok(())
    }

    /// Fails every queued request with [`SchedError::DeviceGone`]. Called
    /// when the device disappears, so nothing is left pending forever.
    pub fn fail_all(&self, reason: &str) {
        let bios = {
            let mut inner = self.inner.lock();
            if inner.timer_armed {
                self.callout.cancel();
                inner.timer_armed = false;
                inner.timer_gen += 1;
            }
            let bios = inner.policy.drain();
            inner.stats.failed += bios.len() as u64;
            bios
        };
        warn!(count = bios.len(), reason, "failing all queued requests");
        for bio in bios {
            bio.fail(SchedError::DeviceGone {
                reason: reason.to_string(),
            });
        }
    }

    /// Tears the gateway down. The layer above must have stopped submitting
    /// and drained all in-flight requests; this is checked by assertion.
    /// Blocks until any in-flight timer callback has returned.
    pub fn fini(&self) {
        {
            let inner = self.inner.lock();
            assert_eq!(inner.policy.pending(), 0, "fini with queued requests");
            assert_eq!(inner.inflight, 0, "fini with requests in flight");
        }
        self.callout.drain();
    }

    /// Name of the active policy.
    pub fn policy_name(&self) -> &'static str {
        self.inner.lock().policy.name()
    }

    /// Requests currently queued by the policy.
    pub fn pending(&self) -> usize {
        self.inner.lock().policy.pending()
    }

    /// Requests dispatched but not yet completed.
    pub fn inflight(&self) -> usize {
        self.inner.lock().inflight
    }

    /// Snapshot of the gateway counters.
    pub fn stats(&self) -> GatewayStats {
        self.inner.lock().stats.clone()
    }

    /// Runs the policy until it stops yielding requests, collecting them
    /// for submission after the lock is dropped. A Hold verdict arms the
    /// anticipation timer and ends the run.
    fn pump(&self, inner: &mut GatewayInner, force: bool) -> Vec<Bio> {
        let mut out = Vec::new();
        loop {
            match inner.policy.next(force) {
                Verdict::Dispatch(bio) => {
                    if inner.timer_armed {
                        self.callout.cancel();
                        inner.timer_armed = false;
                        inner.timer_gen += 1;
                    }
                    inner.inflight += 1;
                    inner.stats.dispatched += 1;
                    out.push(bio);
                }
                Verdict::Hold(ticks) => {
                    inner.timer_gen += 1;
                    inner.timer_armed = true;
                    let gen = inner.timer_gen;
                    let weak = self.weak.clone();
                    self.callout.arm(
                        ticks,
                        Box::new(move || {
                            if let Some(gateway) = weak.upgrade() {
                                gateway.timer_fire(gen);
                            }
                        }),
                    );
                    break;
                }
                Verdict::Idle => break,
            }
        }
        out
    }

    /// Anticipation timer callback. Re-checks the generation under the lock
    /// before acting, which makes a late fire benign.
    fn timer_fire(&self, gen: u64) {
        let to_submit = {
            let mut inner = self.inner.lock();
            if !inner.timer_armed || gen != inner.timer_gen {
                inner.stats.stale_timer_fires += 1;
                return;
            }
            inner.timer_armed = false;
            inner.stats.timer_fires += 1;
            inner.policy.timer_fired();
            self.pump(&mut inner, false)
        };
        self.submit_all(to_submit);
    }

    fn submit_all(&self, bios: Vec<Bio>) {
        for bio in bios {
            self.transport.submit(bio);
        }
    }
}
