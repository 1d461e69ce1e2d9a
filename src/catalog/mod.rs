//! In-memory indexing for everything the store needs to pick and locate
//! bundles: a custody-id-to-entry map, two uuid-to-custody-id maps (one for
//! fragments, one for whole bundles), and the awaiting-send priority index.

pub mod awaiting;
pub mod bucket_map;
pub mod entry;

use std::collections::HashMap;

pub use awaiting::AwaitingSendIndex;
pub use entry::CatalogEntry;

use crate::ids::{AvailableDest, BundleUuid, DuplicateExpiryOrder, Eid, FragmentUuid, NonFragmentUuid};
use bucket_map::BucketMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogError {
    DuplicateSequence,
    DuplicateCustodyId,
}

/// Result of cataloging one incoming bundle. `uuid_duplicate` is `true`
/// when a uuid was supplied but another custody id already claims it in
/// the uuid map — the custody id itself is still cataloged either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogInsertResult {
    pub uuid_duplicate: bool,
}

#[derive(Default)]
pub struct CatalogStats {
    pub total_write_ops: u64,
    pub total_byte_write_ops: u64,
    pub total_erase_ops: u64,
    pub total_byte_erase_ops: u64,
}

pub struct Catalog {
    custody_to_entry: BucketMap<u64, CatalogEntry>,
    uuid_to_custody: BucketMap<FragmentUuid, u64>,
    uuid_nofrag_to_custody: BucketMap<NonFragmentUuid, u64>,
    awaiting: AwaitingSendIndex,
    stats: CatalogStats,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            custody_to_entry: BucketMap::new(),
            uuid_to_custody: BucketMap::new(),
            uuid_nofrag_to_custody: BucketMap::new(),
            awaiting: AwaitingSendIndex::new(),
            stats: CatalogStats::default(),
        }
    }

    pub fn catalog_incoming_bundle(
        &mut self,
        mut entry: CatalogEntry,
        uuid: Option<BundleUuid>,
        custody_id: u64,
        order: DuplicateExpiryOrder,
    ) -> Result<CatalogInsertResult, CatalogError> {
        let dest = entry.dest_eid;
        let priority = entry.priority();
        let expiration = entry.expiration_seconds();
        let sequence = entry.sequence;

        self.awaiting
            .insert(dest, priority, expiration, custody_id, sequence, order)
            .map_err(|_| CatalogError::DuplicateSequence)?;

        let mut uuid_duplicate = false;
        if let Some(u) = &uuid {
            entry.intended_uuid = Some(u.clone());
            let inserted = match u {
                BundleUuid::NonFragment(nf) => self.uuid_nofrag_to_custody.insert(nf.clone(), custody_id),
                BundleUuid::Fragment(f) => self.uuid_to_custody.insert(f.clone(), custody_id),
            };
            if inserted {
                entry.uuid_registered = true;
            } else {
                uuid_duplicate = true;
            }
        }

        let byte_size = entry.bundle_size_bytes;
        if !self.custody_to_entry.insert(custody_id, entry) {
            self.awaiting.remove(&dest, priority, expiration, custody_id);
            if !uuid_duplicate {
                if let Some(u) = &uuid {
                    match u {
                        BundleUuid::NonFragment(nf) => {
                            self.uuid_nofrag_to_custody.remove(nf);
                        }
                        BundleUuid::Fragment(f) => {
                            self.uuid_to_custody.remove(f);
                        }
                    }
                }
            }
            return Err(CatalogError::DuplicateCustodyId);
        }

        self.stats.total_write_ops += 1;
        self.stats.total_byte_write_ops += byte_size;
        Ok(CatalogInsertResult { uuid_duplicate })
    }

    pub fn pop_best(&mut self, available: &[AvailableDest]) -> Option<(u64, &CatalogEntry)> {
        let (_, _, _, custody_id) = self.awaiting.pop_best(available)?;
        let entry = self.custody_to_entry.get(&custody_id)?;
        Some((custody_id, entry))
    }

    pub fn return_to_awaiting(&mut self, custody_id: u64) -> bool {
        let Some(entry) = self.custody_to_entry.get(&custody_id) else {
            return false;
        };
        self.awaiting.return_to_head(
            entry.dest_eid,
            entry.priority(),
            entry.expiration_seconds(),
            custody_id,
            entry.sequence,
        );
        true
    }

    pub fn remove_completely(&mut self, custody_id: u64) -> (bool, u16) {
        let Some(entry) = self.custody_to_entry.remove(&custody_id) else {
            return (false, 0);
        };
        let mut touched: u16 = 1;
        if self
            .awaiting
            .remove(&entry.dest_eid, entry.priority(), entry.expiration_seconds(), custody_id)
        {
            touched += 1;
        }
        if entry.uuid_registered {
            if let Some(uuid) = &entry.intended_uuid {
                let removed = match uuid {
                    BundleUuid::NonFragment(nf) => self.uuid_nofrag_to_custody.remove(nf).is_some(),
                    BundleUuid::Fragment(f) => self.uuid_to_custody.remove(f).is_some(),
                };
                if removed {
                    touched += 1;
                }
            }
        }
        self.stats.total_erase_ops += 1;
        self.stats.total_byte_erase_ops += entry.bundle_size_bytes;
        (true, touched)
    }

    /// Retries the uuid-map insert for a catalog entry whose intended uuid
    /// lost a race against another custody id at cataloging time. No-op if
    /// there's no entry, no intended uuid, or it's already registered.
    pub fn reconcile_uuid_registration(&mut self, custody_id: u64) -> bool {
        let Some(entry) = self.custody_to_entry.get(&custody_id) else {
            return false;
        };
        if entry.uuid_registered {
            return true;
        }
        let Some(uuid) = entry.intended_uuid.clone() else {
            return false;
        };
        let inserted = match &uuid {
            BundleUuid::NonFragment(nf) => self.uuid_nofrag_to_custody.insert(nf.clone(), custody_id),
            BundleUuid::Fragment(f) => self.uuid_to_custody.insert(f.clone(), custody_id),
        };
        if inserted {
            if let Some(entry) = self.custody_to_entry.get_mut(&custody_id) {
                entry.uuid_registered = true;
            }
        }
        inserted
    }

    pub fn entry(&self, custody_id: u64) -> Option<&CatalogEntry> {
        self.custody_to_entry.get(&custody_id)
    }

    pub fn custody_id_from_uuid(&self, uuid: &BundleUuid) -> Option<u64> {
        match uuid {
            BundleUuid::NonFragment(nf) => self.uuid_nofrag_to_custody.get(nf).copied(),
            BundleUuid::Fragment(f) => self.uuid_to_custody.get(f).copied(),
        }
    }

    pub fn expired_bundle_ids(&self, threshold_seconds: u64, max: usize) -> Vec<u64> {
        self.awaiting.expired_before(threshold_seconds, max)
    }

    /// Aggregates, per destination node, the count and total bytes of
    /// bundles still held in the catalog at or below `priority` whose
    /// expiration is at or before `threshold_seconds`.
    pub fn storage_expiring_before_threshold(
        &self,
        priority: u8,
        threshold_seconds: u64,
    ) -> HashMap<u64, (u64, u64)> {
        let mut out: HashMap<u64, (u64, u64)> = HashMap::new();
        for (_, entry) in self.custody_to_entry.iter() {
            if entry.priority() <= priority && entry.expiration_seconds() <= threshold_seconds {
                let agg = out.entry(entry.dest_eid.node).or_insert((0, 0));
                agg.0 += 1;
                agg.1 += entry.bundle_size_bytes;
            }
        }
        out
    }

    pub fn bundles_in_catalog(&self) -> usize {
        self.custody_to_entry.len()
    }

    pub fn stats(&self) -> &CatalogStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Eid;

    fn entry(custody_id_seed: u64) -> CatalogEntry {
        CatalogEntry::new(128, vec![1, 2], Eid::new(7, 1), 1, 1000, custody_id_seed)
    }

    #[test]
    fn catalogs_and_pops_a_bundle() {
        let mut cat = Catalog::new();
        cat.catalog_incoming_bundle(entry(0), None, 11, DuplicateExpiryOrder::Fifo)
            .unwrap();
        assert_eq!(cat.bundles_in_catalog(), 1);
        let (custody_id, _) = cat.pop_best(&[AvailableDest::Exact(Eid::new(7, 1))]).unwrap();
        assert_eq!(custody_id, 11);
    }

    #[test]
    fn duplicate_uuid_reports_failure_but_still_catalogs_custody_id() {
        let mut cat = Catalog::new();
        let uuid = BundleUuid::NonFragment(NonFragmentUuid {
            creation_seconds: 1,
            sequence: 1,
            src_node: 9,
            src_service: 1,
        });
        let first = cat
            .catalog_incoming_bundle(entry(0), Some(uuid.clone()), 11, DuplicateExpiryOrder::Fifo)
            .unwrap();
        assert!(!first.uuid_duplicate);

        let second = cat
            .catalog_incoming_bundle(entry(1), Some(uuid.clone()), 12, DuplicateExpiryOrder::Fifo)
            .unwrap();
        assert!(second.uuid_duplicate);
        assert_eq!(cat.custody_id_from_uuid(&uuid), Some(11));
        assert_eq!(cat.bundles_in_catalog(), 2);

        // removing the original owner frees the uuid map entry, but it
        // doesn't automatically repoint at the other custody id
        cat.remove_completely(11);
        assert_eq!(cat.custody_id_from_uuid(&uuid), None);

        assert!(cat.reconcile_uuid_registration(12));
        assert_eq!(cat.custody_id_from_uuid(&uuid), Some(12));
    }

    #[test]
    fn remove_completely_reports_not_found_for_unknown_custody_id() {
        let mut cat = Catalog::new();
        assert_eq!(cat.remove_completely(999), (false, 0));
    }

    #[test]
    fn return_to_awaiting_reinserts_entry_for_later_pop() {
        let mut cat = Catalog::new();
        cat.catalog_incoming_bundle(entry(0), None, 11, DuplicateExpiryOrder::Fifo)
            .unwrap();
        cat.pop_best(&[AvailableDest::Exact(Eid::new(7, 1))]).unwrap();
        assert!(cat.return_to_awaiting(11));
        let (custody_id, _) = cat.pop_best(&[AvailableDest::Exact(Eid::new(7, 1))]).unwrap();
        assert_eq!(custody_id, 11);
    }
}
