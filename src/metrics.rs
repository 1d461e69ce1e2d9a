//! Read-only telemetry snapshot. Not a wire format: there's no serde
//! derive here, since shipping this over a network is a collaborator's
//! concern, not this crate's.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreMetrics {
    pub bundles_in_catalog: u64,
    pub bytes_in_catalog: u64,
    pub total_write_ops: u64,
    pub total_byte_write_ops: u64,
    pub total_erase_ops: u64,
    pub total_byte_erase_ops: u64,
    pub used_space_bytes: u64,
    pub free_space_bytes: u64,
}
