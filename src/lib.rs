//! Tablet lifecycle and storage-directory management core of a columnar
//! storage engine.
//!
//! A process owns a set of [`DataDir`]s, one per physical volume. The
//! [`TabletManager`] is the registry of all [`Tablet`]s living in those
//! directories: it creates them (seeding an initial rowset through the
//! [`rowset::RowsetWriter`]), looks them up, drops them through a trash
//! pipeline, and tracks schema-change links between tablet pairs.

#![deny(unused_must_use)]

pub mod data_dir;
pub mod error;
pub mod meta_store;
pub mod metrics;
pub mod options;
pub mod rowset;
pub mod tablet;
pub mod tablet_manager;
pub mod tablet_meta;
pub mod types;

pub use self::data_dir::{DataDir, DataDirInfo, StorageMedium};
pub use self::error::{StorageError, StorageResult, TracedStorageError};
pub use self::meta_store::MetaStore;
pub use self::metrics::StorageMetrics;
pub use self::options::StorageOptions;
pub use self::tablet::Tablet;
pub use self::tablet_manager::{TabletManager, TabletStat};
pub use self::tablet_meta::{CreateTabletRequest, TabletMeta};
