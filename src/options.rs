use std::time::Duration;

/// Number of shard subdirectories fanned out under `<root>/data`. The shard
/// counter wraps at this bound.
pub const MAX_SHARD_NUM: u64 = 1024;

/// Options for the storage core. One instance is shared by all data
/// directories and the tablet manager.
#[derive(Clone, Debug)]
pub struct StorageOptions {
    /// Minimum age of the tablet stat cache before a refresh.
    pub tablet_stat_cache_update_interval: Duration,
    /// Incremental rowsets older than this are dropped by the trash sweeper.
    pub inc_rowset_expired: Duration,
    /// Size of the health-probe buffers. Must be a multiple of the direct-I/O
    /// alignment.
    pub probe_buf_size: usize,
    /// Alignment required by the direct-I/O probe buffers.
    pub direct_io_alignment: usize,
    /// Open the health-probe test file with `O_DIRECT`. Disabled in tests
    /// because tmpfs rejects direct I/O.
    pub odirect_probe: bool,
}

impl Default for StorageOptions {
    fn default() -> StorageOptions {
        StorageOptions {
            tablet_stat_cache_update_interval: Duration::from_secs(300),
            inc_rowset_expired: Duration::from_secs(1800),
            probe_buf_size: 4096,
            direct_io_alignment: 512,
            odirect_probe: true,
        }
    }
}

impl StorageOptions {
    pub fn default_for_test() -> StorageOptions {
        StorageOptions {
            odirect_probe: false,
            ..StorageOptions::default()
        }
    }
}
