//! Identifier and addressing types shared across the catalog and store.

use crate::catalog::bucket_map::{fold_to_u16, BucketHash};

/// A bundle protocol endpoint id, as the node-id/service-id pair the
/// cataloging layer actually needs (the full endpoint-string form is a
/// convergence-layer concern outside this crate).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Eid {
    pub node: u64,
    pub service: u64,
}

impl Eid {
    pub const fn new(node: u64, service: u64) -> Self {
        Self { node, service }
    }
}

/// Identifies a bundle for duplicate/lookup purposes independent of
/// fragmentation. Two bundles with identical source, creation time and
/// sequence number but different fragment offsets are fragments of the
/// same original bundle.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NonFragmentUuid {
    pub creation_seconds: u64,
    pub sequence: u64,
    pub src_node: u64,
    pub src_service: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentUuid {
    pub creation_seconds: u64,
    pub sequence: u64,
    pub src_node: u64,
    pub src_service: u64,
    pub fragment_offset: u64,
    pub data_length: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BundleUuid {
    NonFragment(NonFragmentUuid),
    Fragment(FragmentUuid),
}

fn crc32_over(fields: &[u64]) -> u16 {
    let mut hasher = crc32fast::Hasher::new();
    for field in fields {
        hasher.update(&field.to_le_bytes());
    }
    fold_to_u16(hasher.finalize() as u64)
}

impl BucketHash for NonFragmentUuid {
    fn bucket_hash(&self) -> u16 {
        crc32_over(&[self.creation_seconds, self.sequence, self.src_node, self.src_service])
    }
}

impl BucketHash for FragmentUuid {
    fn bucket_hash(&self) -> u16 {
        crc32_over(&[
            self.creation_seconds,
            self.sequence,
            self.src_node,
            self.src_service,
            self.fragment_offset,
            self.data_length,
        ])
    }
}

/// A destination a caller is currently able to forward to, used when
/// selecting the next bundle to pop. `NodeWildcard` matches any service
/// number at that node (the convergence layer doesn't care which service a
/// bundle was addressed to, only that the node is reachable).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AvailableDest {
    Exact(Eid),
    NodeWildcard(u64),
}

impl AvailableDest {
    pub fn matches(&self, eid: &Eid) -> bool {
        match self {
            AvailableDest::Exact(e) => e == eid,
            AvailableDest::NodeWildcard(node) => *node == eid.node,
        }
    }
}

/// How ties in expiration time within a single destination/priority bucket
/// are broken when more than one bundle shares the same expiration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DuplicateExpiryOrder {
    Fifo,
    Filo,
    BySequence,
}
