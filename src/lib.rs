//! Persistent, multi-disk bundle storage engine.
//!
//! A [`Store`] persists delay/disruption-tolerant-networking bundles across
//! one or more backing disk files as chains of fixed-size segments, keeps
//! an in-memory [`catalog::Catalog`] for picking the next bundle to forward
//! by destination/priority/expiration, and can reconstruct both from
//! whatever is already on disk after a restart via [`restore::restore_from_disk`].

pub mod alloc;
pub mod catalog;
pub mod config;
pub mod diskio;
pub mod error;
pub mod header;
pub mod ids;
pub mod metrics;
pub mod restore;
pub mod store;

pub use catalog::{Catalog, CatalogEntry};
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use ids::{AvailableDest, BundleUuid, DuplicateExpiryOrder, Eid, FragmentUuid, NonFragmentUuid};
pub use metrics::StoreMetrics;
pub use restore::{restore_from_disk, CatalogingFieldsExtractor, RestoreReport};
pub use store::{ReadSession, Store, WriteSession};
