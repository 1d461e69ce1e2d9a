//! Configuration surface the core consumes directly. Loading this from JSON,
//! wiring up convergence-layer inducts/outducts, and routing/scheduling all
//! live outside this crate; `StoreConfig` only carries the handful of fields
//! the storage engine itself needs in order to lay out disks and derive the
//! segment allocator's capacity.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Fixed segment payload+header size, in bytes. Not runtime-configurable:
/// the on-disk layout, the allocator's bit-tree, and the disk offset math
/// all assume every segment file is an exact multiple of this value.
pub const SEGMENT_SIZE: usize = 65_536;

/// Width of a segment id. `u32` comfortably covers tens of terabytes of
/// backing storage at the default segment size.
pub type SegmentId = u32;

/// Sentinel meaning "no next segment" in a segment chain.
pub const NO_NEXT_SEGMENT: SegmentId = SegmentId::MAX;

/// Depth of the read-ahead cache a read session keeps per disk chain walk.
pub const DEFAULT_READ_CACHE_SEGMENTS_PER_SESSION: usize = 16;

/// Depth of each disk's pending-I/O ring buffer.
pub const DEFAULT_DISK_RING_DEPTH: usize = 30;

#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// One file path per backing disk. Bundles are striped across these in
    /// segment-id order (`segment_id % store_file_paths.len()`).
    pub store_file_paths: Vec<PathBuf>,
    /// Total usable bytes across all disks combined. Must be evenly
    /// divisible by `store_file_paths.len() * SEGMENT_SIZE`.
    pub total_capacity_bytes: u64,
    /// Reconstruct the allocator and catalog from the existing segment
    /// files on startup instead of starting from an empty store.
    pub try_restore_from_disk: bool,
    /// Delete the backing segment files when the store is dropped. Useful
    /// for ephemeral/test stores; real deployments leave this false.
    pub auto_delete_files_on_exit: bool,
    /// Number of segments a read session keeps staged ahead of the
    /// caller's read position.
    pub read_cache_segments_per_session: usize,
    /// Depth of each disk's pending-I/O ring.
    pub disk_ring_depth: usize,
}

impl StoreConfig {
    pub fn new(store_file_paths: Vec<PathBuf>, total_capacity_bytes: u64) -> Self {
        Self {
            store_file_paths,
            total_capacity_bytes,
            try_restore_from_disk: false,
            auto_delete_files_on_exit: false,
            read_cache_segments_per_session: DEFAULT_READ_CACHE_SEGMENTS_PER_SESSION,
            disk_ring_depth: DEFAULT_DISK_RING_DEPTH,
        }
    }

    pub fn num_disks(&self) -> usize {
        self.store_file_paths.len()
    }

    /// Total number of fixed-size segments the allocator should manage.
    pub fn max_segments(&self) -> Result<u64> {
        self.validate()?;
        Ok(self.total_capacity_bytes / SEGMENT_SIZE as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_file_paths.is_empty() {
            return Err(Error::InvalidConfig("store_file_paths must be non-empty"));
        }
        let stripe = self.store_file_paths.len() as u64 * SEGMENT_SIZE as u64;
        if stripe == 0 || self.total_capacity_bytes % stripe != 0 {
            return Err(Error::InvalidConfig(
                "total_capacity_bytes must be divisible by num_disks * SEGMENT_SIZE",
            ));
        }
        let max_segments = self.total_capacity_bytes / SEGMENT_SIZE as u64;
        if max_segments > SegmentId::MAX as u64 {
            return Err(Error::InvalidConfig(
                "total_capacity_bytes exceeds the addressable segment id space",
            ));
        }
        if self.disk_ring_depth == 0 {
            return Err(Error::InvalidConfig("disk_ring_depth must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_divisible_capacity() {
        let cfg = StoreConfig::new(vec![PathBuf::from("/tmp/a")], SEGMENT_SIZE as u64 + 1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_disk_list() {
        let cfg = StoreConfig::new(vec![], SEGMENT_SIZE as u64);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_aligned_capacity() {
        let cfg = StoreConfig::new(
            vec![PathBuf::from("/tmp/a"), PathBuf::from("/tmp/b")],
            2 * 4 * SEGMENT_SIZE as u64,
        );
        assert_eq!(cfg.max_segments().unwrap(), 8);
    }
}
