//! Startup reconstruction of the allocator and catalog from whatever is
//! already on disk, so a restart doesn't lose bundles that were persisted
//! before the previous run stopped.
//!
//! This walks candidate head segments in ascending id order across all
//! disks, skipping ids the allocator already claimed while walking an
//! earlier chain, detects a tombstoned or never-written head via the
//! sentinel `bundle_size_bytes` value, and otherwise follows
//! `next_segment_id` to the end of the chain, marking every visited
//! segment allocated as it goes (via the allocator's restore-only,
//! non-thread-safe `allocate_id`, safe here because no disk worker thread
//! exists yet).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};

use crate::alloc::SegmentAllocator;
use crate::catalog::{Catalog, CatalogEntry};
use crate::config::{SegmentId, StoreConfig, NO_NEXT_SEGMENT, SEGMENT_SIZE};
use crate::error::{Error, Result};
use crate::header::{SegmentHeader, SEGMENT_HEADER_SIZE};
use crate::ids::{DuplicateExpiryOrder, Eid};

/// Recovers the cataloging fields (destination, priority, expiration,
/// sequence) for a bundle's restored payload. These fields live in the
/// bundle's primary block, which this crate does not parse itself — the
/// caller supplies this so restore can still re-populate the awaiting-send
/// index without this crate depending on a bundle codec.
pub trait CatalogingFieldsExtractor {
    fn extract(&self, bundle_bytes: &[u8]) -> Option<(Eid, u8, u64, u64)>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreReport {
    pub successfully_restored: bool,
    pub total_bundles_restored: u64,
    pub total_bytes_restored: u64,
    pub total_segments_restored: u64,
    pub next_custody_id_hint: u64,
}

fn read_at(file: &mut File, offset: u64, buf: &mut [u8]) -> Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)?;
    Ok(())
}

/// Opens every configured disk file directly (no worker threads exist yet)
/// and reconstructs allocator + catalog state from whatever segments are
/// present. `extractor` recovers the awaiting-send fields a segment header
/// alone cannot carry; see [`CatalogingFieldsExtractor`].
pub fn restore_from_disk(
    config: &StoreConfig,
    allocator: &SegmentAllocator,
    catalog: &mut Catalog,
) -> Result<RestoreReport> {
    restore_from_disk_with_extractor(config, allocator, catalog, &NoopExtractor)
}

pub fn restore_from_disk_with_extractor(
    config: &StoreConfig,
    allocator: &SegmentAllocator,
    catalog: &mut Catalog,
    extractor: &dyn CatalogingFieldsExtractor,
) -> Result<RestoreReport> {
    let num_disks = config.num_disks() as u64;
    let mut files = Vec::with_capacity(config.store_file_paths.len());
    let mut file_sizes = Vec::with_capacity(config.store_file_paths.len());
    for path in &config.store_file_paths {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        file_sizes.push(file.metadata()?.len());
        files.push(file);
    }

    let max_segments = config.max_segments()?;
    let mut report = RestoreReport {
        successfully_restored: true,
        next_custody_id_hint: 1,
        ..Default::default()
    };

    for candidate in 0..max_segments {
        let candidate_id = candidate as SegmentId;
        if !allocator.is_free(candidate_id) {
            continue;
        }
        let disk_idx = (candidate % num_disks) as usize;
        let offset = (candidate / num_disks) * SEGMENT_SIZE as u64;
        if offset + SEGMENT_SIZE as u64 > file_sizes[disk_idx] {
            continue;
        }

        let mut header_buf = vec![0u8; SEGMENT_HEADER_SIZE];
        read_at(&mut files[disk_idx], offset, &mut header_buf)?;
        let head = match SegmentHeader::from_slice(&header_buf) {
            Ok(h) => h,
            Err(_) => continue,
        };
        if head.is_tombstone_or_non_head() {
            // either an actual tombstone or a segment that was never
            // written as a head; neither is a live bundle to restore
            continue;
        }

        let custody_id = head.custody_id;
        let bundle_size = head.bundle_size_bytes;
        let payload_per_segment = (SEGMENT_SIZE - SEGMENT_HEADER_SIZE) as u64;
        let expected_segments = if bundle_size == 0 {
            1
        } else {
            (bundle_size + payload_per_segment - 1) / payload_per_segment
        };

        let mut chain = vec![candidate_id];
        allocator.allocate_id(candidate_id);

        let mut payload = read_segment_payload(&mut files[disk_idx], offset, bundle_size)?;
        let mut next = head.next_segment_id;
        while next != NO_NEXT_SEGMENT {
            if chain.len() as u64 >= expected_segments {
                return Err(Error::RestoreInconsistency(format!(
                    "custody id {custody_id}: chain exceeds expected length of {expected_segments} segments for bundle size {bundle_size} before a terminating segment was found"
                )));
            }
            if !allocator.is_free(next) {
                return Err(Error::RestoreInconsistency(format!(
                    "custody id {custody_id}: segment {next} is already allocated by another chain"
                )));
            }
            let d = (next as u64 % num_disks) as usize;
            let off = (next as u64 / num_disks) * SEGMENT_SIZE as u64;
            let mut buf = vec![0u8; SEGMENT_HEADER_SIZE];
            read_at(&mut files[d], off, &mut buf)?;
            let h = SegmentHeader::from_slice(&buf)?;
            if h.custody_id != custody_id {
                return Err(Error::RestoreInconsistency(format!(
                    "segment {next} custody id {} does not match chain head custody id {custody_id}",
                    h.custody_id
                )));
            }
            let remaining = bundle_size - payload.len() as u64;
            payload.extend(read_segment_payload(&mut files[d], off, remaining)?);
            chain.push(next);
            allocator.allocate_id(next);
            next = h.next_segment_id;
        }

        if chain.len() as u64 != expected_segments {
            return Err(Error::RestoreInconsistency(format!(
                "custody id {custody_id}: chain length {} does not match the {expected_segments} segments expected for bundle size {bundle_size}",
                chain.len()
            )));
        }

        report.total_segments_restored += chain.len() as u64;

        match extractor.extract(&payload) {
            Some((dest, priority, expiration_seconds, sequence)) => {
                let entry = CatalogEntry::new(bundle_size, chain, dest, priority, expiration_seconds, sequence);
                if catalog
                    .catalog_incoming_bundle(entry, None, custody_id, DuplicateExpiryOrder::Fifo)
                    .is_ok()
                {
                    report.total_bundles_restored += 1;
                    report.total_bytes_restored += bundle_size;
                } else {
                    report.successfully_restored = false;
                }
            }
            None => {
                log::warn!("restore: could not recover cataloging fields for custody id {custody_id}; segments kept allocated but bundle is not re-cataloged");
                report.successfully_restored = false;
            }
        }

        if custody_id >= report.next_custody_id_hint {
            report.next_custody_id_hint = custody_id + 1;
        }
    }

    Ok(report)
}

fn read_segment_payload(file: &mut File, segment_offset: u64, bundle_remaining: u64) -> Result<Vec<u8>> {
    let payload_capacity = SEGMENT_SIZE - SEGMENT_HEADER_SIZE;
    let take = (bundle_remaining as usize).min(payload_capacity);
    let mut buf = vec![0u8; take];
    read_at(file, segment_offset + SEGMENT_HEADER_SIZE as u64, &mut buf)?;
    Ok(buf)
}

struct NoopExtractor;
impl CatalogingFieldsExtractor for NoopExtractor {
    fn extract(&self, _bundle_bytes: &[u8]) -> Option<(Eid, u8, u64, u64)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::ids::AvailableDest;
    use crate::store::Store;
    use tempfile::tempdir;

    struct TestExtractor;
    impl CatalogingFieldsExtractor for TestExtractor {
        fn extract(&self, bundle_bytes: &[u8]) -> Option<(Eid, u8, u64, u64)> {
            if bundle_bytes.len() < 8 {
                return None;
            }
            let node = u64::from_le_bytes(bundle_bytes[0..8].try_into().unwrap());
            Some((Eid::new(node, 1), 1, 1_000_000, 0))
        }
    }

    #[test]
    fn restore_reconstructs_allocator_and_catalog_after_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("disk0.seg");
        let cfg = StoreConfig::new(vec![path], 16 * SEGMENT_SIZE as u64);

        let dest = Eid::new(42, 1);
        let mut payload = dest.node.to_le_bytes().to_vec();
        payload.extend_from_slice(b"payload body for restore test");
        let custody_id;
        {
            let (store, _) = Store::open(cfg.clone()).unwrap();
            let (id, _) = store.push_all_segments(7, dest, 1, 1_000_000, 0, &payload, None).unwrap();
            custody_id = id;
            // store drops here, disk workers flush via their own Drop
        }

        let mut restore_cfg = cfg;
        restore_cfg.try_restore_from_disk = true;
        let max_segments = restore_cfg.max_segments().unwrap();
        let allocator = SegmentAllocator::new(max_segments);
        let mut catalog = Catalog::new();
        let report =
            restore_from_disk_with_extractor(&restore_cfg, &allocator, &mut catalog, &TestExtractor).unwrap();

        assert!(report.successfully_restored);
        assert_eq!(report.total_bundles_restored, 1);
        assert_eq!(catalog.bundles_in_catalog(), 1);
        let (popped_id, entry) = catalog.pop_best(&[AvailableDest::Exact(dest)]).unwrap();
        assert_eq!(popped_id, custody_id);
        assert_eq!(entry.bundle_size_bytes, payload.len() as u64);
    }

    #[test]
    fn restore_aborts_when_chain_custody_id_is_inconsistent() {
        use crate::store::SEGMENT_PAYLOAD_SIZE;
        use std::fs::OpenOptions;
        use std::io::{Seek, SeekFrom, Write};

        let dir = tempdir().unwrap();
        let path = dir.path().join("disk0.seg");
        let cfg = StoreConfig::new(vec![path.clone()], 16 * SEGMENT_SIZE as u64);

        let dest = Eid::new(42, 1);
        // two-segment bundle so there's a non-head segment to corrupt.
        let payload = vec![0xAB; SEGMENT_PAYLOAD_SIZE + 10];
        {
            let (store, _) = Store::open(cfg.clone()).unwrap();
            store.push_all_segments(7, dest, 1, 1_000_000, 0, &payload, None).unwrap();
        }

        // corrupt segment 1's custody id field (bytes 8..16) in place.
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(SEGMENT_SIZE as u64 + 8)).unwrap();
        file.write_all(&999u64.to_le_bytes()).unwrap();
        drop(file);

        let mut restore_cfg = cfg;
        restore_cfg.try_restore_from_disk = true;
        let max_segments = restore_cfg.max_segments().unwrap();
        let allocator = SegmentAllocator::new(max_segments);
        let mut catalog = Catalog::new();
        let err = restore_from_disk_with_extractor(&restore_cfg, &allocator, &mut catalog, &TestExtractor).unwrap_err();
        assert!(matches!(err, Error::RestoreInconsistency(_)));
    }

    #[test]
    fn restore_aborts_when_chain_length_does_not_match_declared_bundle_size() {
        use std::fs::OpenOptions;
        use std::io::{Seek, SeekFrom, Write};

        let dir = tempdir().unwrap();
        let path = dir.path().join("disk0.seg");
        let cfg = StoreConfig::new(vec![path.clone()], 16 * SEGMENT_SIZE as u64);

        let dest = Eid::new(42, 1);
        let payload = vec![0xCD; 10];
        {
            let (store, _) = Store::open(cfg.clone()).unwrap();
            store.push_all_segments(7, dest, 1, 1_000_000, 0, &payload, None).unwrap();
        }

        // claim a bundle size that would need a second segment, but leave
        // next_segment_id as NO_NEXT_SEGMENT so the chain terminates early.
        let mut file = OpenOptions::new().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.write_all(&(SEGMENT_SIZE as u64 * 2).to_le_bytes()).unwrap();
        drop(file);

        let mut restore_cfg = cfg;
        restore_cfg.try_restore_from_disk = true;
        let max_segments = restore_cfg.max_segments().unwrap();
        let allocator = SegmentAllocator::new(max_segments);
        let mut catalog = Catalog::new();
        let err = restore_from_disk_with_extractor(&restore_cfg, &allocator, &mut catalog, &TestExtractor).unwrap_err();
        assert!(matches!(err, Error::RestoreInconsistency(_)));
    }
}
