#![warn(missing_docs)]

//! Pluggable block I/O scheduling layer.
//!
//! This crate sits between a block-storage request path and the disk
//! driver, deciding when and in what order queued requests are released to
//! hardware. It ships three policies behind one gateway:
//!
//! - `"as"`: anticipatory scheduling, which briefly idles the device after
//!   serving a flow on the bet that the same flow will follow up.
//! - `"rr"`: round-robin per-flow queues with a byte budget, giving
//!   continuously active flows equal byte shares of the device.
//! - `"trim"`: the baseline policy, which only separates deletes from
//!   ordinary work and keeps at most one delete in flight.
//!
//! A pass-through `"none"` policy is the escape hatch. Policies are named,
//! registered in an explicit [`Registry`] and swappable per disk at
//! runtime through [`Gateway::configure`].
//!
//! The layer holds only transient in-memory state: no internal threads,
//! one mutex per disk, timers supplied by the environment through the
//! [`Callout`] trait.

pub mod anticipatory;
pub mod bio;
pub mod bioq;
pub mod callout;
pub mod error;
pub mod flow;
pub mod gateway;
pub mod policy;
pub mod registry;
pub mod rr;
pub mod transport;
pub mod trim;

pub use anticipatory::{AsConfig, AsSched, AsStats};
pub use bio::{Bio, BioId, BioOp, BioOrigin, CompletionFn};
pub use bioq::Bioq;
pub use callout::{Callout, CalloutFn, ManualCallout, TickCallout};
pub use error::{SchedError, SchedResult};
pub use flow::{classify, FlowId};
pub use gateway::{Gateway, GatewayStats};
pub use policy::{Anticipation, NoopSched, SchedPolicy, Verdict};
pub use registry::{PolicyFactory, Registry};
pub use rr::{RrConfig, RrSched, RrStats};
pub use transport::{MockTransport, Transport};
pub use trim::{TrimConfig, TrimSched, TrimStats};
