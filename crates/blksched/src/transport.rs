//! Downstream transport abstraction.
//!
//! The transport is the driver that actually issues a request to hardware.
//! Submission is asynchronous: `submit` queues the request with the device
//! and returns; the driver later reports completion by handing the request
//! back to [`Gateway::done`](crate::gateway::Gateway::done).

use parking_lot::Mutex;

use crate::bio::Bio;

/// Driver-side request path consumed by the scheduler.
pub trait Transport: Send + Sync {
    /// Hands a request to the hardware queue. Must not block.
    fn submit(&self, bio: Bio);
}

/// In-memory transport for tests: records submissions in dispatch order and
/// lets the test complete them in any order it likes.
#[derive(Default)]
pub struct MockTransport {
    submitted: Mutex<Vec<Bio>>,
    total: Mutex<u64>,
}

impl MockTransport {
    /// Creates an empty mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes every submission received so far, in dispatch order.
    pub fn take(&self) -> Vec<Bio> {
        std::mem::take(&mut *self.submitted.lock())
    }

    /// Number of submissions not yet taken.
    pub fn pending(&self) -> usize {
        self.submitted.lock().len()
    }

    /// Total submissions ever received.
    pub fn total_submitted(&self) -> u64 {
        *self.total.lock()
    }
}

impl Transport for MockTransport {
    fn submit(&self, bio: Bio) {
        *self.total.lock() += 1;
        self.submitted.lock().push(bio);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::{BioId, BioOp};

    #[test]
    fn test_mock_records_in_dispatch_order() {
        let transport = MockTransport::new();
        transport.submit(Bio::new(BioId(1), BioOp::Read, 0, 512));
        transport.submit(Bio::new(BioId(2), BioOp::Write, 8, 512));
        assert_eq!(transport.pending(), 2);
        let taken = transport.take();
        assert_eq!(taken[0].id, BioId(1));
        assert_eq!(taken[1].id, BioId(2));
        assert_eq!(transport.pending(), 0);
        assert_eq!(transport.total_submitted(), 2);
    }
}
