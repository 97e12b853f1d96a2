//! Baseline trim-aware scheduler.
//!
//! The simple default policy: ordinary reads/writes in one queue, deletes
//! in another, and never more than one delete in flight. The delete queue
//! is always kept offset-sorted because downstream trim collapsing depends
//! on seeing ranges in order; for the same reason, queued deletes are not
//! overtaken by ordinary work while a delete is outstanding. Sorting of
//! the ordinary queue is a tunable.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bio::{Bio, BioOp};
use crate::bioq::Bioq;
use crate::policy::{SchedPolicy, Verdict};

/// Configuration for the baseline scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimConfig {
    /// Sort the ordinary queue by start offset instead of arrival order.
    pub sort_ordinary: bool,
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            sort_ordinary: true,
        }
    }
}

/// Counters for the baseline scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrimStats {
    /// Ordinary requests released to the transport.
    pub ordinary_dispatched: u64,
    /// Deletes released to the transport.
    pub trims_dispatched: u64,
    /// `next` calls that found work held behind an outstanding delete.
    pub trims_blocked: u64,
}

/// Trim-aware baseline scheduling policy.
#[derive(Debug, Default)]
pub struct TrimSched {
    cfg: TrimConfig,
    ordinary: Bioq,
    deletes: Bioq,
    trim_outstanding: bool,
    stats: TrimStats,
}

impl TrimSched {
    /// Creates the policy with the given configuration.
    pub fn new(cfg: TrimConfig) -> Self {
        Self {
            cfg,
            ..Default::default()
        }
    }

    /// Returns true while a delete is in flight.
    pub fn trim_outstanding(&self) -> bool {
        self.trim_outstanding
    }

    /// Scheduler counters.
    pub fn stats(&self) -> &TrimStats {
        &self.stats
    }

    fn submit_trim(&mut self) {
        debug_assert!(!self.trim_outstanding);
        self.trim_outstanding = true;
    }

    fn trim_done(&mut self) {
        if !self.trim_outstanding {
            warn!("delete completion with no delete outstanding");
        }
        self.trim_outstanding = false;
    }
}

impl SchedPolicy for TrimSched {
    fn name(&self) -> &'static str {
        "trim"
    }

    fn start(&mut self, bio: Bio) {
        match bio.op {
            BioOp::Delete => self.deletes.insert_sorted(bio),
            _ if self.cfg.sort_ordinary => self.ordinary.insert_sorted(bio),
            _ => self.ordinary.push_back(bio),
        }
    }

    fn next(&mut self, force: bool) -> Verdict {
        if !self.deletes.is_empty() {
            if !self.trim_outstanding {
                if let Some(bio) = self.deletes.pop_front() {
                    self.submit_trim();
                    self.stats.trims_dispatched += 1;
                    return Verdict::Dispatch(bio);
                }
            }
            self.stats.trims_blocked += 1;
            if !force {
                // Queued deletes hold everything behind them until the
                // outstanding one completes.
                return Verdict::Idle;
            }
            // Forced progress may release ordinary work, but never a
            // second delete.
        }
        match self.ordinary.pop_front() {
            Some(bio) => {
                self.stats.ordinary_dispatched += 1;
                Verdict::Dispatch(bio)
            }
            None => Verdict::Idle,
        }
    }

    fn done(&mut self, bio: &Bio) {
        if bio.op == BioOp::Delete {
            self.trim_done();
        }
    }

    fn timer_fired(&mut self) {}

    fn pending(&self) -> usize {
        self.ordinary.len() + self.deletes.len()
    }

    fn drain(&mut self) -> Vec<Bio> {
        debug!(
            ordinary = self.ordinary.len(),
            deletes = self.deletes.len(),
            "draining baseline scheduler"
        );
        let mut out = self.deletes.drain();
        out.append(&mut self.ordinary.drain());
        out
    }
}
