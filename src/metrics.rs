//! Request counters for the tablet manager.
//!
//! The counters are plain prometheus metrics that the caller may register
//! into whatever registry it exposes. They are injected into
//! [`TabletManager::new`](crate::tablet_manager::TabletManager::new) instead
//! of living in a process-wide singleton so the core stays testable.

use prometheus::IntCounter;

pub struct StorageMetrics {
    pub create_tablet_requests_total: IntCounter,
    pub create_tablet_requests_failed: IntCounter,
    pub drop_tablet_requests_total: IntCounter,
}

impl StorageMetrics {
    pub fn new() -> StorageMetrics {
        StorageMetrics {
            create_tablet_requests_total: IntCounter::new(
                "tabletstore_create_tablet_requests_total",
                "Total number of create tablet requests",
            )
            .unwrap(),
            create_tablet_requests_failed: IntCounter::new(
                "tabletstore_create_tablet_requests_failed",
                "Number of failed create tablet requests",
            )
            .unwrap(),
            drop_tablet_requests_total: IntCounter::new(
                "tabletstore_drop_tablet_requests_total",
                "Total number of drop tablet requests",
            )
            .unwrap(),
        }
    }
}

impl Default for StorageMetrics {
    fn default() -> StorageMetrics {
        StorageMetrics::new()
    }
}
