//! Block I/O request model.
//!
//! A [`Bio`] describes one in-flight block operation. The scheduler only
//! holds it while queued; ownership passes to the transport on dispatch and
//! returns to the gateway on completion. The optional completion slot fires
//! exactly once, either with the transport's result or with the error used
//! to drain a dying device.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};
use crate::flow::{self, FlowId};

/// Unique identifier for a block I/O request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BioId(pub u64);

/// Kind of block operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BioOp {
    /// Read a block range.
    Read,
    /// Write a block range.
    Write,
    /// Deallocate a block range (trim/discard).
    Delete,
    /// Cache flush barrier. Never reordered, bypasses scheduling.
    Flush,
}

impl BioOp {
    /// Returns true for operation kinds the scheduler may reorder.
    #[inline]
    pub fn is_reorderable(&self) -> bool {
        !matches!(self, BioOp::Flush)
    }
}

impl fmt::Display for BioOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BioOp::Read => write!(f, "read"),
            BioOp::Write => write!(f, "write"),
            BioOp::Delete => write!(f, "delete"),
            BioOp::Flush => write!(f, "flush"),
        }
    }
}

/// Provenance chain attached to a request by the stacking layer.
///
/// Intermediate layers clone requests; each clone points back at the bio it
/// was derived from. Classification walks to the root of this chain, so a
/// clone's own flow tag never matters.
#[derive(Debug)]
pub struct BioOrigin {
    /// Flow identity recorded when this link was created.
    pub flow: FlowId,
    /// The bio this one was cloned from, if any.
    pub parent: Option<Arc<BioOrigin>>,
}

impl BioOrigin {
    /// A top-level origin, the root of an ancestry chain.
    pub fn root(flow: FlowId) -> Arc<Self> {
        Arc::new(Self { flow, parent: None })
    }

    /// An origin derived from `parent` by a stacking transformation.
    pub fn derived(flow: FlowId, parent: &Arc<BioOrigin>) -> Arc<Self> {
        Arc::new(Self {
            flow,
            parent: Some(Arc::clone(parent)),
        })
    }
}

/// Completion callback fired exactly once per request.
pub type CompletionFn = Box<dyn FnOnce(SchedResult<()>) + Send>;

/// One block I/O request.
pub struct Bio {
    /// Unique request identifier.
    pub id: BioId,
    /// Operation kind.
    pub op: BioOp,
    /// Start offset in blocks.
    pub offset: u64,
    /// Transfer length in bytes.
    pub length: u64,
    /// Ancestry chain for flow classification. `None` classifies as the
    /// shared sentinel flow.
    pub origin: Option<Arc<BioOrigin>>,
    completion: Option<CompletionFn>,
}

impl Bio {
    /// Creates a request with no ancestry and no completion callback.
    pub fn new(id: BioId, op: BioOp, offset: u64, length: u64) -> Self {
        Self {
            id,
            op,
            offset,
            length,
            origin: None,
            completion: None,
        }
    }

    /// Attaches an ancestry chain.
    pub fn with_origin(mut self, origin: Arc<BioOrigin>) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Attaches a completion callback.
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: FnOnce(SchedResult<()>) + Send + 'static,
    {
        self.completion = Some(Box::new(f));
        self
    }

    /// Classifies this request to its flow identity.
    #[inline]
    pub fn flow(&self) -> FlowId {
        flow::classify(self)
    }

    /// Consumes the request and fires its completion callback, if any.
    pub fn complete(mut self, result: SchedResult<()>) {
        if let Some(f) = self.completion.take() {
            f(result);
        }
    }

    /// Consumes the request and fails it with the given error.
    #[inline]
    pub fn fail(self, err: SchedError) {
        self.complete(Err(err));
    }
}

impl fmt::Debug for Bio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bio")
            .field("id", &self.id)
            .field("op", &self.op)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("flow", &self.flow())
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}
