//! Flow classification.
//!
//! The fairness unit of the scheduler is a flow, normally the thread or
//! process that issued the top-level request. Intermediate storage layers
//! clone requests, so classification walks the ancestry chain back to the
//! original submitter. Classification never fails: a request with no
//! ancestry degrades to the shared sentinel flow, which is unfair but
//! harmless.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::bio::Bio;

/// Opaque flow identity, stable for the life of a top-level request chain.
/// The default value is the sentinel [`FlowId::NONE`].
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FlowId(pub u64);

impl FlowId {
    /// Sentinel identity for requests with absent or malformed ancestry.
    /// Shared by all such requests, so it receives no fairness guarantees.
    pub const NONE: FlowId = FlowId(0);
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow#{}", self.0)
    }
}

/// Maps a request to its flow by walking to the top-level ancestor.
///
/// O(ancestry depth), deterministic, infallible.
pub fn classify(bio: &Bio) -> FlowId {
    let mut cur = match &bio.origin {
        Some(origin) => origin,
        None => return FlowId::NONE,
    };
    while let Some(parent) = &cur.parent {
        cur = parent;
    }
    cur.flow
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::{BioId, BioOp, BioOrigin};

    #[test]
    fn test_missing_ancestry_maps_to_sentinel() {
        let bio = Bio::new(BioId(1), BioOp::Read, 0, 512);
        assert_eq!(classify(&bio), FlowId::NONE);
    }

    #[test]
    fn test_root_origin() {
        let bio =
            Bio::new(BioId(1), BioOp::Read, 0, 512).with_origin(BioOrigin::root(FlowId(42)));
        assert_eq!(classify(&bio), FlowId(42));
    }

    #[test]
    fn test_clone_chain_resolves_to_top_ancestor() {
        let root = BioOrigin::root(FlowId(7));
        let mid = BioOrigin::derived(FlowId(900), &root);
        let leaf = BioOrigin::derived(FlowId(901), &mid);
        let bio = Bio::new(BioId(1), BioOp::Write, 0, 512).with_origin(leaf);
        // Clone-level tags are ignored; only the root identity counts.
        assert_eq!(classify(&bio), FlowId(7));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let root = BioOrigin::root(FlowId(5));
        let bio = Bio::new(BioId(1), BioOp::Read, 0, 512)
            .with_origin(BioOrigin::derived(FlowId(6), &root));
        assert_eq!(classify(&bio), classify(&bio));
    }
}
