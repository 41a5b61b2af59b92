//! One filesystem root owned by the process.
//!
//! A `DataDir` validates its root path, discovers the mount point backing it,
//! claims the root through an advisory lock on the cluster-id file, probes
//! disk health with aligned direct I/O, fans tablets out across shard
//! subdirectories, and hosts the per-directory meta store plus the monotonic
//! rowset-id generator.

use std::alloc::Layout;
use std::collections::HashSet;
use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{error, info, warn};

use crate::error::{StorageError, StorageResult, TracedStorageError};
use crate::meta_store::MetaStore;
use crate::options::{StorageOptions, MAX_SHARD_NUM};
use crate::tablet_meta::TabletMeta;
use crate::types::{RowsetId, TabletId, TabletInfo};

pub const DATA_PREFIX: &str = "data";
pub const TRASH_PREFIX: &str = "trash";
const CLUSTER_ID_FILE_NAME: &str = "cluster_id";
const TEST_FILE_NAME: &str = ".testfile";
const ALIGN_TAG_NAME: &str = ".align_tag";
const MOUNTS_PATH: &str = "/proc/mounts";
const NEXT_ROWSET_ID_KEY: &str = "next_rowset_id";
const ROWSET_ID_BATCH: u64 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageMedium {
    Ssd,
    Hdd,
}

/// Aggregated per-directory capacity info, filled in by the tablet manager.
#[derive(Clone, Debug, Default)]
pub struct DataDirInfo {
    pub is_used: bool,
    pub data_used_capacity: i64,
}

/// Buffer allocated at the direct-I/O alignment, retained for the directory's
/// lifetime.
#[derive(Debug)]
struct AlignedBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl AlignedBuf {
    fn alloc(size: usize, align: usize) -> StorageResult<AlignedBuf> {
        let layout = Layout::from_size_align(size, align)
            .map_err(|e| TracedStorageError::params(format!("bad probe buffer layout: {}", e)))?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(AlignedBuf { ptr, layout }),
            None => {
                warn!("fail to allocate memory. size={}", size);
                Err(StorageError::NoMemory(size).into())
            }
        }
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

unsafe impl Send for AlignedBuf {}

#[derive(Debug)]
struct ProbeState {
    write_buf: AlignedBuf,
    read_buf: AlignedBuf,
    rng: StdRng,
}

#[derive(Debug, Default)]
struct DataDirInner {
    current_shard: u64,
    tablet_set: HashSet<TabletInfo>,
    pending_ids: HashSet<String>,
}

#[derive(Debug)]
struct RowsetIdState {
    next: u64,
    batch_end: u64,
}

#[derive(Debug)]
pub struct DataDir {
    path: PathBuf,
    path_hash: u64,
    capacity_bytes: i64,
    storage_medium: StorageMedium,
    file_system: String,
    cluster_id: AtomicI32,
    is_used: AtomicBool,
    options: Arc<StorageOptions>,
    inner: Mutex<DataDirInner>,
    probe: Mutex<ProbeState>,
    meta: MetaStore,
    id_gen: Mutex<RowsetIdState>,
    // Keeps the exclusive advisory lock on the cluster-id file for the
    // directory's lifetime.
    _cluster_id_lock: File,
}

impl DataDir {
    /// Open a storage root. Runs every initialization step in order; any
    /// failure leaves the directory unusable (no `DataDir` is returned).
    ///
    /// `capacity_bytes == -1` adopts the filesystem's total capacity.
    pub fn open(
        path: impl Into<PathBuf>,
        capacity_bytes: i64,
        options: Arc<StorageOptions>,
    ) -> StorageResult<DataDir> {
        let path = path.into();
        let write_buf = AlignedBuf::alloc(options.probe_buf_size, options.direct_io_alignment)?;
        let read_buf = AlignedBuf::alloc(options.probe_buf_size, options.direct_io_alignment)?;

        check_path_exist(&path)?;
        if path.join(ALIGN_TAG_NAME).exists() {
            warn!("align tag was found, path={}", path.display());
            return Err(TracedStorageError::invalid_store_path(format!(
                "align tag found under {}",
                path.display()
            )));
        }

        let (cluster_id, cluster_id_lock) = init_cluster_id(&path)?;
        let (storage_medium, capacity_bytes) = init_extension_and_capacity(&path, capacity_bytes)?;
        let file_system = find_file_system(&path)?;
        let path_hash = hash_of_path(&path);
        info!("get hash of path: {}: {}", path.display(), path_hash);

        let meta = MetaStore::open(&path)?;
        let id_gen = init_rowset_id_generator(&meta)?;
        let rng = StdRng::seed_from_u64(Utc::now().timestamp() as u64);

        Ok(DataDir {
            path,
            path_hash,
            capacity_bytes,
            storage_medium,
            file_system,
            cluster_id: AtomicI32::new(cluster_id),
            is_used: AtomicBool::new(true),
            options,
            inner: Mutex::new(DataDirInner::default()),
            probe: Mutex::new(ProbeState {
                write_buf,
                read_buf,
                rng,
            }),
            meta,
            id_gen: Mutex::new(id_gen),
            _cluster_id_lock: cluster_id_lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn path_hash(&self) -> u64 {
        self.path_hash
    }

    pub fn capacity_bytes(&self) -> i64 {
        self.capacity_bytes
    }

    pub fn storage_medium(&self) -> StorageMedium {
        self.storage_medium
    }

    pub fn file_system(&self) -> &str {
        &self.file_system
    }

    pub fn options(&self) -> &Arc<StorageOptions> {
        &self.options
    }

    pub fn meta_store(&self) -> &MetaStore {
        &self.meta
    }

    pub fn is_used(&self) -> bool {
        self.is_used.load(Ordering::Acquire)
    }

    pub fn cluster_id(&self) -> i32 {
        self.cluster_id.load(Ordering::Acquire)
    }

    /// Assign the cluster id. Succeeds when the directory is unassigned or
    /// already carries the same id; any other value is rejected.
    pub fn set_cluster_id(&self, cluster_id: i32) -> StorageResult<()> {
        if cluster_id < 0 {
            return Err(TracedStorageError::params(format!(
                "cluster id must be non-negative: {}",
                cluster_id
            )));
        }
        let current = self.cluster_id.load(Ordering::Acquire);
        if current != -1 {
            if current == cluster_id {
                return Ok(());
            }
            error!(
                "going to set cluster id to already assigned store, cluster_id={}, new_cluster_id={}",
                current, cluster_id
            );
            return Err(TracedStorageError::invalid_store_path(
                "going to set cluster id to already assigned store",
            ));
        }
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(self.path.join(CLUSTER_ID_FILE_NAME))?;
        file.write_all(cluster_id.to_string().as_bytes())?;
        file.sync_data()?;
        self.cluster_id.store(cluster_id, Ordering::Release);
        Ok(())
    }

    /// Periodic disk probe. A real I/O error marks the directory unusable;
    /// a byte mismatch is reported but leaves the flag untouched.
    pub fn health_check(&self) {
        if !self.is_used() {
            return;
        }
        if let Err(e) = self.read_and_write_test_file() {
            warn!(
                "store read/write test file occur IO Error. path={}, error={}",
                self.path.display(),
                e
            );
            if matches!(e.kind(), StorageError::Io(_)) {
                self.is_used.store(false, Ordering::Release);
            }
        }
    }

    fn read_and_write_test_file(&self) -> StorageResult<()> {
        let test_file = self.path.join(TEST_FILE_NAME);
        if test_file.exists() {
            fs::remove_file(&test_file)?;
        }

        let mut open_options = OpenOptions::new();
        open_options.read(true).write(true).create(true).mode(0o600);
        if self.options.odirect_probe {
            open_options.custom_flags(libc::O_DIRECT);
        }
        let file = open_options.open(&test_file)?;

        let mut probe = self.probe.lock();
        let ProbeState {
            write_buf,
            read_buf,
            rng,
        } = &mut *probe;
        rng.fill_bytes(write_buf.as_mut_slice());
        file.write_all_at(write_buf.as_slice(), 0)?;
        file.read_exact_at(read_buf.as_mut_slice(), 0)?;
        if write_buf.as_slice() != read_buf.as_slice() {
            warn!("the test file write buf and read buf not equal.");
            return Err(StorageError::TestFile.into());
        }
        drop(file);
        fs::remove_file(&test_file)?;
        Ok(())
    }

    /// Next shard index, round-robin in `0..MAX_SHARD_NUM`. Creates the shard
    /// subdirectory if missing.
    pub fn get_shard(&self) -> StorageResult<u64> {
        let mut inner = self.inner.lock();
        let shard = inner.current_shard;
        inner.current_shard = (inner.current_shard + 1) % MAX_SHARD_NUM;
        let shard_path = self.absolute_shard_path(shard);
        if !shard_path.exists() {
            fs::create_dir_all(&shard_path)?;
        }
        Ok(shard)
    }

    pub fn register_tablet(&self, tablet_info: TabletInfo) {
        self.inner.lock().tablet_set.insert(tablet_info);
    }

    pub fn deregister_tablet(&self, tablet_info: TabletInfo) {
        self.inner.lock().tablet_set.remove(&tablet_info);
    }

    /// Drain all registered tablet identities.
    pub fn clear_tablets(&self) -> Vec<TabletInfo> {
        self.inner.lock().tablet_set.drain().collect()
    }

    pub fn add_pending_ids(&self, id: &str) {
        self.inner.lock().pending_ids.insert(id.to_string());
    }

    pub fn remove_pending_ids(&self, id: &str) {
        self.inner.lock().pending_ids.remove(id);
    }

    pub fn has_pending_ids(&self, id: &str) -> bool {
        self.inner.lock().pending_ids.contains(id)
    }

    /// Monotonic rowset-id allocation. The high watermark is persisted to the
    /// meta store once per batch so ids never repeat across restarts.
    pub fn next_rowset_id(&self) -> StorageResult<RowsetId> {
        let mut state = self.id_gen.lock();
        if state.next >= state.batch_end {
            let batch_end = state.next + ROWSET_ID_BATCH;
            self.meta
                .put_kv(NEXT_ROWSET_ID_KEY, batch_end.to_string().as_bytes())?;
            state.batch_end = batch_end;
        }
        let id = state.next;
        state.next += 1;
        Ok(id)
    }

    pub fn absolute_shard_path(&self, shard: u64) -> PathBuf {
        self.path.join(DATA_PREFIX).join(shard.to_string())
    }

    pub fn absolute_tablet_path(&self, tablet_meta: &TabletMeta, with_schema_hash: bool) -> PathBuf {
        let tablet_dir = self
            .absolute_shard_path(tablet_meta.shard_id())
            .join(tablet_meta.tablet_id().to_string());
        if with_schema_hash {
            tablet_dir.join(tablet_meta.schema_hash().to_string())
        } else {
            tablet_dir
        }
    }

    /// List time-labelled trash subdirectories that contain the tablet id.
    pub fn find_tablet_in_trash(&self, tablet_id: TabletId) -> Vec<PathBuf> {
        let trash_path = self.path.join(TRASH_PREFIX);
        let mut paths = Vec::new();
        let Ok(entries) = fs::read_dir(&trash_path) else {
            return paths;
        };
        for entry in entries.flatten() {
            let sub_path = entry.path();
            if !sub_path.is_dir() {
                continue;
            }
            let tablet_path = sub_path.join(tablet_id.to_string());
            if tablet_path.exists() {
                paths.push(tablet_path);
            }
        }
        paths
    }

    /// Atomically move a tablet's schema-hash directory into the trash under
    /// a fresh time label, and prune the emptied tablet directory.
    pub fn move_to_trash(
        &self,
        tablet_path: &Path,
        tablet_id: TabletId,
        schema_hash: i32,
    ) -> StorageResult<PathBuf> {
        let trash_root = self.path.join(TRASH_PREFIX);
        let base_label = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let mut sequence = 0u32;
        let target = loop {
            let label = if sequence == 0 {
                base_label.clone()
            } else {
                format!("{}.{}", base_label, sequence)
            };
            let candidate = trash_root
                .join(label)
                .join(tablet_id.to_string())
                .join(schema_hash.to_string());
            if !candidate.exists() {
                break candidate;
            }
            sequence += 1;
        };
        // parent is always present: target has label/tablet_id components
        fs::create_dir_all(target.parent().unwrap())?;
        fs::rename(tablet_path, &target)?;
        if let Some(tablet_dir) = tablet_path.parent() {
            // the tablet-id directory may still hold sibling schema hashes
            let _ = fs::remove_dir(tablet_dir);
        }
        Ok(target)
    }

    /// Root path of the data dir that owns a schema-hash directory sitting in
    /// the trash (`<root>/trash/<label>/<tablet_id>/<schema_hash>`).
    pub fn root_path_from_trash_path(schema_hash_dir_in_trash: &Path) -> Option<&Path> {
        schema_hash_dir_in_trash.ancestors().nth(4)
    }
}

fn check_path_exist(path: &Path) -> StorageResult<()> {
    let mut entries = fs::read_dir(path).map_err(|e| {
        warn!("opendir failed, path={}, err={}", path.display(), e);
        TracedStorageError::from(e)
    })?;
    if let Some(Err(e)) = entries.next() {
        warn!("readdir failed, path={}, err={}", path.display(), e);
        return Err(e.into());
    }
    Ok(())
}

/// Create the cluster-id file if absent, take the exclusive advisory lock,
/// and read the current id (-1 when the file is empty).
fn init_cluster_id(path: &Path) -> StorageResult<(i32, File)> {
    let cluster_id_path = path.join(CLUSTER_ID_FILE_NAME);
    if !cluster_id_path.exists() {
        OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o600)
            .open(&cluster_id_path)
            .map_err(|e| {
                warn!("fail to create file. path={}, err={}", cluster_id_path.display(), e);
                TracedStorageError::invalid_store_path("create cluster id file failed")
            })?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&cluster_id_path)
        .map_err(|e| {
            warn!("fail to open cluster id path. path={}, err={}", cluster_id_path.display(), e);
            TracedStorageError::invalid_store_path("open cluster id file failed")
        })?;

    let lock_res = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if lock_res < 0 {
        warn!("fail to lock file descriptor. path={}", cluster_id_path.display());
        return Err(TracedStorageError::invalid_store_path(format!(
            "store is locked by another process: {}",
            cluster_id_path.display()
        )));
    }

    let cluster_id = read_cluster_id(&cluster_id_path)?;
    Ok((cluster_id, file))
}

fn read_cluster_id(path: &Path) -> StorageResult<i32> {
    let content = fs::read_to_string(path)?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(-1);
    }
    match trimmed.parse::<i32>() {
        Ok(id) if id >= 0 => Ok(id),
        _ => {
            warn!("fail to read cluster id from file. content={:?}", trimmed);
            Err(TracedStorageError::invalid_store_path(
                "cluster id file corrupt",
            ))
        }
    }
}

/// Derive the storage medium from the root path's extension and settle the
/// configured capacity against the filesystem. Ensures `<root>/data` exists.
fn init_extension_and_capacity(
    path: &Path,
    capacity_bytes: i64,
) -> StorageResult<(StorageMedium, i64)> {
    let canonical = fs::canonicalize(path)?;
    let storage_medium = match canonical.extension() {
        None => StorageMedium::Hdd,
        Some(ext) if ext.eq_ignore_ascii_case("ssd") => StorageMedium::Ssd,
        Some(ext) if ext.eq_ignore_ascii_case("hdd") => StorageMedium::Hdd,
        Some(_) => {
            warn!("store path has wrong extension. path={}", path.display());
            return Err(TracedStorageError::invalid_store_path(format!(
                "invalid extension on {}",
                path.display()
            )));
        }
    };

    let disk_capacity = filesystem_capacity(&canonical)?;
    let capacity_bytes = if capacity_bytes == -1 {
        disk_capacity
    } else if capacity_bytes > disk_capacity {
        warn!(
            "root path capacity should not larger than disk capacity. path={}, capacity_bytes={}, disk_capacity={}",
            path.display(),
            capacity_bytes,
            disk_capacity
        );
        return Err(TracedStorageError::invalid_store_path(
            "configured capacity exceeds disk capacity",
        ));
    } else {
        capacity_bytes
    };

    let data_path = path.join(DATA_PREFIX);
    if !data_path.exists() {
        fs::create_dir_all(&data_path).map_err(|e| {
            warn!("failed to create data root path. path={}, err={}", data_path.display(), e);
            TracedStorageError::invalid_store_path("failed to create data directory")
        })?;
    }

    Ok((storage_medium, capacity_bytes))
}

fn filesystem_capacity(path: &Path) -> StorageResult<i64> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| TracedStorageError::invalid_store_path("path contains NUL byte"))?;
    let mut vfs: libc::statvfs = unsafe { std::mem::zeroed() };
    if unsafe { libc::statvfs(c_path.as_ptr(), &mut vfs) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(vfs.f_blocks as i64 * vfs.f_frsize as i64)
}

/// Walk the mount table and return the fsname backing `path`. A match is one
/// of: identical mount dir or fsname string, the fsname's `st_rdev` equal to
/// the path's mount device, or the mount dir's `st_dev` equal.
fn find_file_system(path: &Path) -> StorageResult<String> {
    let md = fs::metadata(path).map_err(|e| {
        warn!("stat failed, path={}, err={}", path.display(), e);
        TracedStorageError::from(e)
    })?;
    let mount_device = if md.mode() & libc::S_IFMT == libc::S_IFBLK {
        md.rdev()
    } else {
        md.dev()
    };

    let path_str = path.to_string_lossy();
    let mounts = fs::read_to_string(MOUNTS_PATH).map_err(|e| {
        warn!("fail to read mount table, path={}, err={}", MOUNTS_PATH, e);
        TracedStorageError::from(e)
    })?;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(fsname), Some(mount_dir)) = (fields.next(), fields.next()) else {
            continue;
        };
        if mount_dir == path_str || fsname == path_str {
            return Ok(fsname.to_string());
        }
        if let Ok(m) = fs::metadata(fsname) {
            if m.rdev() == mount_device {
                return Ok(fsname.to_string());
            }
        }
        if let Ok(m) = fs::metadata(mount_dir) {
            if m.dev() == mount_device {
                return Ok(fsname.to_string());
            }
        }
    }

    warn!("fail to find file system, path={}", path.display());
    Err(TracedStorageError::invalid_store_path(format!(
        "no mounted file system found for {}",
        path.display()
    )))
}

/// Stable over host + path.
fn hash_of_path(path: &Path) -> u64 {
    use std::hash::{Hash, Hasher};
    let hostname = fs::read_to_string("/proc/sys/kernel/hostname").unwrap_or_default();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    hostname.trim().hash(&mut hasher);
    path.hash(&mut hasher);
    hasher.finish()
}

fn init_rowset_id_generator(meta: &MetaStore) -> StorageResult<RowsetIdState> {
    let watermark = match meta.get_kv(NEXT_ROWSET_ID_KEY)? {
        Some(blob) => String::from_utf8_lossy(&blob)
            .trim()
            .parse::<u64>()
            .map_err(|_| TracedStorageError::header_parse("next_rowset_id key corrupt"))?,
        None => 1,
    };
    Ok(RowsetIdState {
        next: watermark,
        batch_end: watermark,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_dir(path: &Path) -> StorageResult<DataDir> {
        DataDir::open(path, -1, Arc::new(StorageOptions::default_for_test()))
    }

    #[test]
    fn test_open_and_layout() {
        let tempdir = tempfile::tempdir().unwrap();
        let dir = open_dir(tempdir.path()).unwrap();
        assert!(dir.is_used());
        assert_eq!(dir.cluster_id(), -1);
        assert_eq!(dir.storage_medium(), StorageMedium::Hdd);
        assert!(tempdir.path().join("data").is_dir());
        assert!(tempdir.path().join("cluster_id").is_file());
        assert!(dir.capacity_bytes() > 0);
    }

    #[test]
    fn test_ssd_extension() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path().join("store.ssd");
        fs::create_dir(&root).unwrap();
        let dir = open_dir(&root).unwrap();
        assert_eq!(dir.storage_medium(), StorageMedium::Ssd);
    }

    #[test]
    fn test_bad_extension() {
        let tempdir = tempfile::tempdir().unwrap();
        let root = tempdir.path().join("store.nvme");
        fs::create_dir(&root).unwrap();
        let err = open_dir(&root).unwrap_err();
        assert!(matches!(err.kind(), StorageError::InvalidStorePath(_)));
    }

    #[test]
    fn test_align_tag_refuses_init() {
        let tempdir = tempfile::tempdir().unwrap();
        fs::write(tempdir.path().join(".align_tag"), b"").unwrap();
        let err = open_dir(tempdir.path()).unwrap_err();
        assert!(matches!(err.kind(), StorageError::InvalidStorePath(_)));
    }

    #[test]
    fn test_capacity_exceeds_disk() {
        let tempdir = tempfile::tempdir().unwrap();
        let err = DataDir::open(
            tempdir.path(),
            i64::MAX,
            Arc::new(StorageOptions::default_for_test()),
        )
        .unwrap_err();
        assert!(matches!(err.kind(), StorageError::InvalidStorePath(_)));
    }

    #[test]
    fn test_cluster_id_rules() {
        let tempdir = tempfile::tempdir().unwrap();
        let dir = open_dir(tempdir.path()).unwrap();
        assert_eq!(dir.cluster_id(), -1);
        dir.set_cluster_id(42).unwrap();
        assert_eq!(dir.cluster_id(), 42);
        // same value is a no-op
        dir.set_cluster_id(42).unwrap();
        // different value fails
        let err = dir.set_cluster_id(43).unwrap_err();
        assert!(matches!(err.kind(), StorageError::InvalidStorePath(_)));
        drop(dir);

        // the id survives reopen
        let dir = open_dir(tempdir.path()).unwrap();
        assert_eq!(dir.cluster_id(), 42);
    }

    #[test]
    fn test_cluster_id_corrupt() {
        let tempdir = tempfile::tempdir().unwrap();
        fs::write(tempdir.path().join("cluster_id"), b"not a number").unwrap();
        let err = open_dir(tempdir.path()).unwrap_err();
        assert!(matches!(err.kind(), StorageError::InvalidStorePath(_)));
    }

    #[test]
    fn test_store_lock_is_exclusive() {
        let tempdir = tempfile::tempdir().unwrap();
        let _first = open_dir(tempdir.path()).unwrap();
        let err = open_dir(tempdir.path()).unwrap_err();
        assert!(matches!(err.kind(), StorageError::InvalidStorePath(_)));
    }

    #[test]
    fn test_shard_round_robin() {
        let tempdir = tempfile::tempdir().unwrap();
        let dir = open_dir(tempdir.path()).unwrap();
        let first = dir.get_shard().unwrap();
        assert_eq!(first, 0);
        for expected in 1..MAX_SHARD_NUM {
            assert_eq!(dir.get_shard().unwrap(), expected);
        }
        // wraps silently
        assert_eq!(dir.get_shard().unwrap(), 0);
        assert!(tempdir.path().join("data/0").is_dir());
    }

    #[test]
    fn test_register_and_clear_tablets() {
        let tempdir = tempfile::tempdir().unwrap();
        let dir = open_dir(tempdir.path()).unwrap();
        dir.register_tablet(TabletInfo::new(1, 10));
        dir.register_tablet(TabletInfo::new(2, 20));
        dir.deregister_tablet(TabletInfo::new(1, 10));
        let mut drained = dir.clear_tablets();
        drained.sort_by_key(|t| t.tablet_id);
        assert_eq!(drained, vec![TabletInfo::new(2, 20)]);
        assert!(dir.clear_tablets().is_empty());
    }

    #[test]
    fn test_rowset_id_monotonic_across_reopen() {
        let tempdir = tempfile::tempdir().unwrap();
        let last = {
            let dir = open_dir(tempdir.path()).unwrap();
            let a = dir.next_rowset_id().unwrap();
            let b = dir.next_rowset_id().unwrap();
            assert!(b > a);
            b
        };
        // drop released the flock, reopen must not reuse ids
        let dir = open_dir(tempdir.path()).unwrap();
        assert!(dir.next_rowset_id().unwrap() > last);
    }

    #[test]
    fn test_health_check_ok() {
        let tempdir = tempfile::tempdir().unwrap();
        let dir = open_dir(tempdir.path()).unwrap();
        dir.health_check();
        assert!(dir.is_used());
        assert!(!tempdir.path().join(".testfile").exists());
    }

    #[test]
    fn test_find_tablet_in_trash() {
        let tempdir = tempfile::tempdir().unwrap();
        let dir = open_dir(tempdir.path()).unwrap();
        let trashed = tempdir.path().join("trash/20240101000000/15/77");
        fs::create_dir_all(&trashed).unwrap();
        let found = dir.find_tablet_in_trash(15);
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("15"));
        assert!(dir.find_tablet_in_trash(16).is_empty());

        let root = DataDir::root_path_from_trash_path(&trashed).unwrap();
        assert_eq!(root, tempdir.path());
    }
}
