//! On-disk layout of the fixed 32-byte header every segment carries at its
//! offset 0. Three little-endian fields: the bundle's total size in bytes
//! (only meaningful on the head segment of a chain; `u64::MAX` on the head
//! segment is a tombstone marking the whole chain as deleted, and is the
//! unconditional value written into non-head segments), the custody id the
//! segment belongs to, and the id of the next segment in the chain
//! (`NO_NEXT_SEGMENT` on the tail segment).

use crate::config::{SegmentId, NO_NEXT_SEGMENT};
use crate::error::{Error, Result};

pub const SEGMENT_HEADER_SIZE: usize = 32;
pub const TOMBSTONE_BUNDLE_SIZE: u64 = u64::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SegmentHeader {
    pub bundle_size_bytes: u64,
    pub custody_id: u64,
    pub next_segment_id: SegmentId,
}

impl SegmentHeader {
    pub fn new(bundle_size_bytes: u64, custody_id: u64, next_segment_id: SegmentId) -> Self {
        Self {
            bundle_size_bytes,
            custody_id,
            next_segment_id,
        }
    }

    pub fn non_head(custody_id: u64, next_segment_id: SegmentId) -> Self {
        Self::new(TOMBSTONE_BUNDLE_SIZE, custody_id, next_segment_id)
    }

    pub fn tail(bundle_size_bytes: u64, custody_id: u64) -> Self {
        Self::new(bundle_size_bytes, custody_id, NO_NEXT_SEGMENT)
    }

    pub fn is_tombstone_or_non_head(&self) -> bool {
        self.bundle_size_bytes == TOMBSTONE_BUNDLE_SIZE
    }

    pub fn has_next(&self) -> bool {
        self.next_segment_id != NO_NEXT_SEGMENT
    }

    pub fn to_bytes(&self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.bundle_size_bytes.to_le_bytes());
        buf[8..16].copy_from_slice(&self.custody_id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.next_segment_id.to_le_bytes());
        // bytes 20..32 reserved, left zeroed
        buf
    }

    pub fn from_bytes(buf: &[u8; SEGMENT_HEADER_SIZE]) -> Result<Self> {
        let bundle_size_bytes = u64::from_le_bytes(
            buf[0..8]
                .try_into()
                .expect("slice of length 8 from a fixed-size array"),
        );
        let custody_id = u64::from_le_bytes(
            buf[8..16]
                .try_into()
                .expect("slice of length 8 from a fixed-size array"),
        );
        let next_segment_id = SegmentId::from_le_bytes(
            buf[16..20]
                .try_into()
                .expect("slice of length 4 from a fixed-size array"),
        );
        Ok(Self {
            bundle_size_bytes,
            custody_id,
            next_segment_id,
        })
    }

    pub fn from_slice(buf: &[u8]) -> Result<Self> {
        if buf.len() < SEGMENT_HEADER_SIZE {
            return Err(Error::BadSegmentHeader("segment shorter than header size"));
        }
        let fixed: [u8; SEGMENT_HEADER_SIZE] = buf[0..SEGMENT_HEADER_SIZE]
            .try_into()
            .expect("checked length above");
        Self::from_bytes(&fixed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip_preserves_fields() {
        let header = SegmentHeader::new(1234, 9876, 42);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), SEGMENT_HEADER_SIZE);
        let decoded = SegmentHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn tombstone_sentinel_round_trips() {
        let header = SegmentHeader::non_head(9876, 7);
        assert!(header.is_tombstone_or_non_head());
        let decoded = SegmentHeader::from_bytes(&header.to_bytes()).unwrap();
        assert!(decoded.is_tombstone_or_non_head());
    }

    #[test]
    fn tail_segment_has_no_next() {
        let header = SegmentHeader::tail(10, 5);
        assert!(!header.has_next());
    }

    #[test]
    fn from_slice_rejects_short_buffers() {
        let buf = [0u8; 10];
        assert!(SegmentHeader::from_slice(&buf).is_err());
    }
}
