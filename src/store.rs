//! `Store` is the engine's single entry point: it owns the segment
//! allocator, the in-memory catalog, and one disk I/O worker per backing
//! file, and exposes the push/pop/read/remove operations everything else
//! in this crate supports.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::alloc::SegmentAllocator;
use crate::catalog::{Catalog, CatalogEntry, CatalogError, CatalogInsertResult};
use crate::config::{SegmentId, StoreConfig, NO_NEXT_SEGMENT, SEGMENT_SIZE};
use crate::diskio::{DiskIo, MainWait, ReadSlot};
use crate::error::{Error, Result};
use crate::header::{SegmentHeader, SEGMENT_HEADER_SIZE};
use crate::ids::{AvailableDest, BundleUuid, DuplicateExpiryOrder, Eid};
use crate::metrics::StoreMetrics;
use crate::restore::{restore_from_disk, RestoreReport};

pub const SEGMENT_PAYLOAD_SIZE: usize = SEGMENT_SIZE - SEGMENT_HEADER_SIZE;

pub struct Store {
    config: StoreConfig,
    allocator: Arc<SegmentAllocator>,
    catalog: Mutex<Catalog>,
    disks: Vec<DiskIo>,
    main_wait: Arc<MainWait>,
}

/// In-progress write of one bundle's segment chain. Segments are written
/// to disk one behind the caller's submissions, since a segment's header
/// needs to know the id of the segment that follows it.
pub struct WriteSession {
    custody_id: u64,
    dest: Eid,
    priority: u8,
    expiration_seconds: u64,
    sequence: u64,
    total_bytes: u64,
    bytes_pushed: u64,
    chain: Vec<SegmentId>,
    pending: Option<(SegmentId, Vec<u8>)>,
    finished: bool,
}

/// An in-progress read of a popped bundle's segment chain, with a bounded
/// read-ahead window of staged disk reads.
pub struct ReadSession {
    pub custody_id: u64,
    chain: Vec<SegmentId>,
    total_bytes: u64,
    bytes_delivered: u64,
    next_read_index: usize,
    next_stage_index: usize,
    cache: VecDeque<(usize, Arc<ReadSlot>)>,
    cache_depth: usize,
}

impl Store {
    pub fn open(config: StoreConfig) -> Result<(Self, Option<RestoreReport>)> {
        config.validate()?;
        let max_segments = config.max_segments()?;
        let allocator = Arc::new(SegmentAllocator::new(max_segments));
        let mut catalog = Catalog::new();

        let report = if config.try_restore_from_disk {
            Some(restore_from_disk(&config, &allocator, &mut catalog)?)
        } else {
            None
        };

        let main_wait = Arc::new(MainWait::default());
        let num_disks = config.num_disks() as u64;
        let mut disks = Vec::with_capacity(config.store_file_paths.len());
        for (i, path) in config.store_file_paths.iter().enumerate() {
            disks.push(DiskIo::spawn(
                path,
                i as u64,
                num_disks,
                SEGMENT_SIZE,
                config.disk_ring_depth,
                Arc::clone(&main_wait),
            )?);
        }

        Ok((
            Self {
                config,
                allocator,
                catalog: Mutex::new(catalog),
                disks,
                main_wait,
            },
            report,
        ))
    }

    fn disk_for(&self, segment_id: SegmentId) -> &DiskIo {
        let idx = segment_id as u64 % self.disks.len() as u64;
        &self.disks[idx as usize]
    }

    fn alloc_one(&self) -> Result<SegmentId> {
        self.allocator
            .allocate(1)
            .map(|ids| ids[0])
            .ok_or(Error::OutOfSegments)
    }

    /// Begins a streaming write of a bundle of `total_bytes` total length.
    /// `custody_id` is supplied by the caller — the engine never generates
    /// custody ids itself, they arrive as an input on every push.
    pub fn begin_write(
        &self,
        custody_id: u64,
        dest: Eid,
        priority: u8,
        expiration_seconds: u64,
        sequence: u64,
        total_bytes: u64,
    ) -> WriteSession {
        WriteSession {
            custody_id,
            dest,
            priority,
            expiration_seconds,
            sequence,
            total_bytes,
            bytes_pushed: 0,
            chain: Vec::new(),
            pending: None,
            finished: false,
        }
    }

    /// Appends one segment's worth of payload (must be <=
    /// `SEGMENT_PAYLOAD_SIZE`) to an in-progress write.
    pub fn push_segment(&self, session: &mut WriteSession, chunk: &[u8]) -> Result<()> {
        if chunk.len() > SEGMENT_PAYLOAD_SIZE {
            return Err(Error::InvalidConfig("chunk exceeds segment payload size"));
        }
        let id = self.alloc_one()?;

        if let Some((prev_id, mut buf)) = session.pending.take() {
            buf[SEGMENT_HEADER_SIZE - 4..SEGMENT_HEADER_SIZE].copy_from_slice(&id.to_le_bytes());
            self.write_header_in_place(&mut buf, prev_id, session, false);
            self.disk_for(prev_id)
                .enqueue_write(prev_id, buf.into_boxed_slice(), &self.main_wait);
        }

        let mut buf = vec![0u8; SEGMENT_SIZE];
        buf[SEGMENT_HEADER_SIZE..SEGMENT_HEADER_SIZE + chunk.len()].copy_from_slice(chunk);
        session.pending = Some((id, buf));
        session.chain.push(id);
        session.bytes_pushed += chunk.len() as u64;
        Ok(())
    }

    fn write_header_in_place(&self, buf: &mut [u8], segment_id: SegmentId, session: &WriteSession, is_tail: bool) {
        let is_head = session.chain.first() == Some(&segment_id);
        let next_segment_id = if is_tail {
            NO_NEXT_SEGMENT
        } else {
            SegmentId::from_le_bytes(buf[SEGMENT_HEADER_SIZE - 4..SEGMENT_HEADER_SIZE].try_into().unwrap())
        };
        let header = if is_head {
            SegmentHeader::new(session.total_bytes, session.custody_id, next_segment_id)
        } else {
            SegmentHeader::non_head(session.custody_id, next_segment_id)
        };
        buf[0..SEGMENT_HEADER_SIZE].copy_from_slice(&header.to_bytes());
    }

    /// Flushes the last buffered segment, catalogs the completed bundle
    /// FIFO, and returns its custody id plus the uuid-map insert outcome.
    pub fn finish_write(
        &self,
        mut session: WriteSession,
        uuid: Option<BundleUuid>,
    ) -> Result<(u64, CatalogInsertResult)> {
        if session.bytes_pushed != session.total_bytes {
            return Err(Error::InvalidConfig("pushed byte count does not match declared total"));
        }
        if let Some((id, mut buf)) = session.pending.take() {
            self.write_header_in_place(&mut buf, id, &session, true);
            self.disk_for(id).enqueue_write(id, buf.into_boxed_slice(), &self.main_wait);
        }
        session.finished = true;

        let entry = CatalogEntry::new(
            session.total_bytes,
            session.chain.clone(),
            session.dest,
            session.priority,
            session.expiration_seconds,
            session.sequence,
        );
        let mut catalog = self.catalog.lock().expect("catalog mutex poisoned");
        let result = catalog
            .catalog_incoming_bundle(entry, uuid, session.custody_id, DuplicateExpiryOrder::Fifo)
            .map_err(|e| match e {
                CatalogError::DuplicateSequence => {
                    Error::InvalidConfig("duplicate sequence number in awaiting-send index")
                }
                CatalogError::DuplicateCustodyId => Error::InvalidConfig("custody id is already in use"),
            })?;
        Ok((session.custody_id, result))
    }

    /// Convenience one-shot write: chunks `data` into segments, pushes
    /// them all, and finishes the bundle. `custody_id` is supplied by the
    /// caller, per spec — the engine never assigns custody ids itself.
    pub fn push_all_segments(
        &self,
        custody_id: u64,
        dest: Eid,
        priority: u8,
        expiration_seconds: u64,
        sequence: u64,
        data: &[u8],
        uuid: Option<BundleUuid>,
    ) -> Result<(u64, CatalogInsertResult)> {
        let mut session = self.begin_write(custody_id, dest, priority, expiration_seconds, sequence, data.len() as u64);
        if data.is_empty() {
            self.push_segment(&mut session, &[])?;
        } else {
            for chunk in data.chunks(SEGMENT_PAYLOAD_SIZE) {
                self.push_segment(&mut session, chunk)?;
            }
        }
        self.finish_write(session, uuid)
    }

    /// Pops the best available bundle addressed to any of `available` and
    /// begins a read session over its segment chain.
    pub fn pop_top(&self, available: &[AvailableDest]) -> Option<ReadSession> {
        let mut catalog = self.catalog.lock().expect("catalog mutex poisoned");
        let (custody_id, entry) = catalog.pop_best(available)?;
        let chain = entry.segment_id_chain.clone();
        let total_bytes = entry.bundle_size_bytes;
        drop(catalog);

        let mut session = ReadSession {
            custody_id,
            chain,
            total_bytes,
            bytes_delivered: 0,
            next_read_index: 0,
            next_stage_index: 0,
            cache: VecDeque::new(),
            cache_depth: self.config.read_cache_segments_per_session,
        };
        self.prime_read_ahead(&mut session);
        Some(session)
    }

    fn prime_read_ahead(&self, session: &mut ReadSession) {
        while session.cache.len() < session.cache_depth && session.next_stage_index < session.chain.len() {
            let idx = session.next_stage_index;
            let segment_id = session.chain[idx];
            let slot = self.disk_for(segment_id).enqueue_read(segment_id, SEGMENT_SIZE, &self.main_wait);
            session.cache.push_back((idx, slot));
            session.next_stage_index += 1;
        }
    }

    /// Returns the next segment's payload without removing the bundle from
    /// disk, or `None` once the chain is exhausted.
    pub fn top_segment(&self, session: &mut ReadSession) -> Result<Option<Vec<u8>>> {
        if session.next_read_index >= session.chain.len() {
            return Ok(None);
        }
        self.prime_read_ahead(session);
        let (idx, slot) = session.cache.pop_front().expect("primed above");
        debug_assert_eq!(idx, session.next_read_index);

        while !slot.is_ready() {
            self.main_wait.wait_timeout(std::time::Duration::from_millis(10));
        }
        let bytes = slot.take();
        if slot.failed() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "segment read failed",
            )));
        }

        let header = SegmentHeader::from_slice(&bytes[..SEGMENT_HEADER_SIZE])?;
        if header.custody_id != session.custody_id {
            log::warn!(
                "segment {} header custody id {} does not match expected {}; continuing",
                session.chain[idx],
                header.custody_id,
                session.custody_id
            );
        }

        let is_last = idx + 1 == session.chain.len();
        let payload_len = if is_last {
            (session.total_bytes - session.bytes_delivered) as usize
        } else {
            SEGMENT_PAYLOAD_SIZE
        };
        let payload = bytes[SEGMENT_HEADER_SIZE..SEGMENT_HEADER_SIZE + payload_len].to_vec();

        session.bytes_delivered += payload_len as u64;
        session.next_read_index += 1;
        Ok(Some(payload))
    }

    /// Reads every remaining segment of the session's bundle in order.
    pub fn read_all_segments(&self, session: &mut ReadSession) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(session.total_bytes as usize);
        while let Some(chunk) = self.top_segment(session)? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Abandons a read session without removing the bundle from disk,
    /// returning it to the front of its destination's awaiting-send queue.
    pub fn return_top(&self, session: ReadSession) {
        self.return_custody_id_to_awaiting_send(session.custody_id);
    }

    pub fn return_custody_id_to_awaiting_send(&self, custody_id: u64) -> bool {
        let mut catalog = self.catalog.lock().expect("catalog mutex poisoned");
        catalog.return_to_awaiting(custody_id)
    }

    /// Permanently deletes a bundle that a read session finished reading:
    /// tombstones the head segment, frees every segment in the chain, and
    /// removes the catalog entry.
    pub fn remove_read_bundle(&self, session: ReadSession) -> Result<()> {
        self.remove_bundle_by_custody_id(session.custody_id)
    }

    pub fn remove_bundle_by_custody_id(&self, custody_id: u64) -> Result<()> {
        let chain = {
            let catalog = self.catalog.lock().expect("catalog mutex poisoned");
            catalog
                .entry(custody_id)
                .map(|e| e.segment_id_chain.clone())
                .ok_or(Error::Corrupt("unknown custody id"))?
        };
        if let Some(&head) = chain.first() {
            let tombstone = SegmentHeader::non_head(custody_id, NO_NEXT_SEGMENT);
            let mut buf = vec![0u8; SEGMENT_SIZE];
            buf[0..SEGMENT_HEADER_SIZE].copy_from_slice(&tombstone.to_bytes());
            self.disk_for(head)
                .enqueue_write(head, buf.into_boxed_slice(), &self.main_wait);
        }
        self.allocator.free(&chain);
        let mut catalog = self.catalog.lock().expect("catalog mutex poisoned");
        catalog.remove_completely(custody_id);
        Ok(())
    }

    pub fn entry(&self, custody_id: u64) -> Option<CatalogEntry> {
        self.catalog.lock().expect("catalog mutex poisoned").entry(custody_id).cloned()
    }

    pub fn free_space_bytes(&self) -> u64 {
        self.allocator.free_segments() * SEGMENT_SIZE as u64
    }

    pub fn used_space_bytes(&self) -> u64 {
        self.allocator.used_segments() * SEGMENT_SIZE as u64
    }

    pub fn total_capacity_bytes(&self) -> u64 {
        self.config.total_capacity_bytes
    }

    pub fn metrics(&self) -> StoreMetrics {
        let catalog = self.catalog.lock().expect("catalog mutex poisoned");
        let stats = catalog.stats();
        StoreMetrics {
            bundles_in_catalog: catalog.bundles_in_catalog() as u64,
            bytes_in_catalog: stats.total_byte_write_ops.saturating_sub(stats.total_byte_erase_ops),
            total_write_ops: stats.total_write_ops,
            total_byte_write_ops: stats.total_byte_write_ops,
            total_erase_ops: stats.total_erase_ops,
            total_byte_erase_ops: stats.total_byte_erase_ops,
            used_space_bytes: self.used_space_bytes(),
            free_space_bytes: self.free_space_bytes(),
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        for disk in &mut self.disks {
            disk.stop();
        }
        if self.config.auto_delete_files_on_exit {
            for path in &self.config.store_file_paths {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}
