//! Runtime tablet object: a tablet meta bound to its data directory, with a
//! reader-writer header lock guarding the meta and the rowset list.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

use crate::data_dir::DataDir;
use crate::error::{StorageResult, TracedStorageError};
use crate::rowset::Rowset;
use crate::tablet_meta::{AlterState, AlterTabletTask, TabletMeta, TabletSchema, TabletState};
use crate::types::{RowsetId, SchemaHash, TabletId, TabletInfo, Version, VersionHash};

/// Meta and rowset list of one tablet, guarded by the tablet's header lock.
/// Callers that need to compose several mutations with one persistence step
/// hold the write guard and finish with [`Tablet::save_header`].
pub struct TabletHeader {
    meta: TabletMeta,
    rowsets: Vec<Arc<Rowset>>,
}

impl TabletHeader {
    pub fn meta(&self) -> &TabletMeta {
        &self.meta
    }

    pub fn rowsets(&self) -> &[Arc<Rowset>] {
        &self.rowsets
    }

    pub fn max_version(&self) -> Version {
        self.meta.max_version()
    }

    pub fn set_tablet_state(&mut self, state: TabletState) {
        self.meta.set_tablet_state(state);
    }

    pub fn alter_task(&self) -> Option<&AlterTabletTask> {
        self.meta.alter_task()
    }

    pub fn set_alter_task(&mut self, task: Option<AlterTabletTask>) {
        self.meta.set_alter_task(task);
    }

    pub fn set_alter_state(&mut self, state: AlterState) {
        if let Some(task) = self.meta.alter_task() {
            let mut task = task.clone();
            task.alter_state = state;
            self.meta.set_alter_task(Some(task));
        }
    }

    pub fn delete_alter_task(&mut self) {
        self.meta.set_alter_task(None);
    }

    pub fn set_cumulative_layer_point(&mut self, point: i64) {
        self.meta.set_cumulative_layer_point(point);
    }

    /// Rowset versions must stay strictly increasing within non-overlapping
    /// ranges.
    fn add_rowset(&mut self, rowset: Arc<Rowset>) -> StorageResult<()> {
        let version = rowset.version();
        for existing in &self.rowsets {
            if existing.version().overlaps(&version) {
                return Err(TracedStorageError::params(format!(
                    "rowset version {} overlaps existing {}",
                    version,
                    existing.version()
                )));
            }
        }
        self.meta.rs_metas.push(rowset.rowset_meta().clone());
        self.rowsets.push(rowset);
        self.rowsets.sort_by_key(|r| r.version().begin);
        self.meta.rs_metas.sort_by_key(|m| m.version.begin);
        Ok(())
    }
}

pub struct Tablet {
    tablet_id: TabletId,
    schema_hash: SchemaHash,
    full_name: String,
    tablet_path: PathBuf,
    schema: Arc<TabletSchema>,
    data_dir: Arc<DataDir>,
    header: RwLock<TabletHeader>,
    init_succeeded: AtomicBool,
}

impl Tablet {
    pub fn new_from_meta(meta: TabletMeta, data_dir: Arc<DataDir>) -> Arc<Tablet> {
        let tablet_path = data_dir.absolute_tablet_path(&meta, true);
        Arc::new(Tablet {
            tablet_id: meta.tablet_id(),
            schema_hash: meta.schema_hash(),
            full_name: format!("{}.{}", meta.tablet_id(), meta.schema_hash()),
            tablet_path,
            schema: Arc::new(meta.schema().clone()),
            data_dir,
            header: RwLock::new(TabletHeader {
                meta,
                rowsets: Vec::new(),
            }),
            init_succeeded: AtomicBool::new(false),
        })
    }

    /// Materialize the runtime rowset list from the persisted metas.
    pub fn init(&self) -> StorageResult<()> {
        let mut header = self.header.write();
        let mut rs_metas = header.meta.rs_metas.clone();
        rs_metas.sort_by_key(|m| m.version.begin);
        for window in rs_metas.windows(2) {
            if window[0].version.overlaps(&window[1].version) {
                return Err(TracedStorageError::params(format!(
                    "tablet {} has overlapping rowset versions {} and {}",
                    self.full_name, window[0].version, window[1].version
                )));
            }
        }
        header.rowsets = rs_metas
            .into_iter()
            .map(|m| Arc::new(Rowset::load(m, self.schema.clone(), &self.tablet_path)))
            .collect();
        self.init_succeeded.store(true, Ordering::Release);
        Ok(())
    }

    pub fn init_succeeded(&self) -> bool {
        self.init_succeeded.load(Ordering::Acquire)
    }

    pub fn tablet_id(&self) -> TabletId {
        self.tablet_id
    }

    pub fn schema_hash(&self) -> SchemaHash {
        self.schema_hash
    }

    pub fn tablet_info(&self) -> TabletInfo {
        TabletInfo::new(self.tablet_id, self.schema_hash)
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn equal(&self, tablet_id: TabletId, schema_hash: SchemaHash) -> bool {
        self.tablet_id == tablet_id && self.schema_hash == schema_hash
    }

    pub fn tablet_path(&self) -> &Path {
        &self.tablet_path
    }

    pub fn data_dir(&self) -> &Arc<DataDir> {
        &self.data_dir
    }

    pub fn schema(&self) -> Arc<TabletSchema> {
        self.schema.clone()
    }

    /// A tablet is usable only while its data directory is.
    pub fn is_used(&self) -> bool {
        self.data_dir.is_used()
    }

    pub fn creation_time(&self) -> i64 {
        self.header.read().meta.creation_time()
    }

    pub fn set_creation_time(&self, creation_time: i64) {
        self.header.write().meta.set_creation_time(creation_time);
    }

    pub fn partition_id(&self) -> i64 {
        self.header.read().meta.partition_id()
    }

    pub fn tablet_state(&self) -> TabletState {
        self.header.read().meta.tablet_state()
    }

    pub fn set_tablet_state(&self, state: TabletState) {
        self.header.write().set_tablet_state(state);
    }

    pub fn header(&self) -> RwLockReadGuard<'_, TabletHeader> {
        self.header.read()
    }

    pub fn header_mut(&self) -> RwLockWriteGuard<'_, TabletHeader> {
        self.header.write()
    }

    pub fn alter_task(&self) -> Option<AlterTabletTask> {
        self.header.read().alter_task().cloned()
    }

    pub fn set_alter_task(&self, task: AlterTabletTask) {
        self.header.write().set_alter_task(Some(task));
    }

    pub fn set_alter_state(&self, state: AlterState) {
        self.header.write().set_alter_state(state);
    }

    pub fn delete_alter_task(&self) {
        self.header.write().delete_alter_task();
    }

    pub fn set_cumulative_layer_point(&self, point: i64) {
        self.header.write().set_cumulative_layer_point(point);
    }

    pub fn add_rowset(&self, rowset: Arc<Rowset>) -> StorageResult<()> {
        self.header.write().add_rowset(rowset)
    }

    pub fn rowset_with_max_version(&self) -> Option<Arc<Rowset>> {
        let header = self.header.read();
        header
            .rowsets
            .iter()
            .max_by_key(|r| r.end_version())
            .cloned()
    }

    pub fn max_version(&self) -> Version {
        self.header.read().max_version()
    }

    pub fn version_count(&self) -> usize {
        self.header.read().meta.rs_metas.len()
    }

    pub fn num_rows(&self) -> u64 {
        self.header.read().rowsets.iter().map(|r| r.num_rows()).sum()
    }

    /// Total on-disk footprint (data plus index bytes).
    pub fn tablet_footprint(&self) -> u64 {
        self.header
            .read()
            .rowsets
            .iter()
            .map(|r| r.data_size() + r.index_size())
            .sum()
    }

    /// Longest gap-free version prefix starting at version 0.
    pub fn max_continuous_version_from_beginning(&self) -> (Version, VersionHash) {
        let header = self.header.read();
        let mut max_version = Version::none();
        let mut version_hash = 0;
        let mut next_begin = 0;
        for rowset in &header.rowsets {
            if rowset.version().begin != next_begin {
                break;
            }
            max_version = rowset.version();
            version_hash = rowset.version_hash();
            next_begin = rowset.version().end + 1;
        }
        (max_version, version_hash)
    }

    pub fn can_do_compaction(&self) -> bool {
        !self.header.read().rowsets.is_empty()
    }

    /// Number of rowsets below the cumulative layer point, the candidates of
    /// a base compaction.
    pub fn calc_base_compaction_score(&self) -> u32 {
        let header = self.header.read();
        let point = header.meta.cumulative_layer_point();
        header
            .rowsets
            .iter()
            .filter(|r| r.version().end < point)
            .count() as u32
    }

    /// Number of rowsets at or above the cumulative layer point.
    pub fn calc_cumulative_compaction_score(&self) -> u32 {
        let header = self.header.read();
        let point = header.meta.cumulative_layer_point();
        header
            .rowsets
            .iter()
            .filter(|r| r.version().begin >= point)
            .count() as u32
    }

    pub fn next_rowset_id(&self) -> StorageResult<RowsetId> {
        self.data_dir.next_rowset_id()
    }

    pub fn register_tablet_into_dir(&self) {
        self.data_dir.register_tablet(self.tablet_info());
    }

    pub fn deregister_tablet_from_dir(&self) {
        self.data_dir.deregister_tablet(self.tablet_info());
    }

    /// Persist a header the caller already holds. Used to combine several
    /// header mutations with one durable write. The meta lands in the data
    /// dir's meta store, plus a `.hdr` snapshot next to the data while the
    /// tablet directory exists.
    pub fn save_header(&self, header: &TabletHeader) -> StorageResult<()> {
        let blob = header.meta.serialize()?;
        self.data_dir
            .meta_store()
            .save(self.tablet_id, self.schema_hash, &blob)?;
        if self.tablet_path.exists() {
            header.meta.save(&self.tablet_path)?;
        }
        Ok(())
    }

    pub fn save_meta(&self) -> StorageResult<()> {
        let header = self.header.read();
        self.save_header(&header)
    }

    /// Drop incremental rowsets older than the configured expiry and persist
    /// the shrunk meta.
    pub fn delete_expired_inc_rowsets(&self) -> StorageResult<()> {
        let expire_secs = self.data_dir.options().inc_rowset_expired.as_secs() as i64;
        let now = chrono::Utc::now().timestamp();
        let mut header = self.header.write();
        let before = header.meta.inc_rs_metas.len();
        header
            .meta
            .inc_rs_metas
            .retain(|m| now - m.creation_time < expire_secs);
        if header.meta.inc_rs_metas.len() != before {
            info!(
                "delete {} expired inc rowsets. tablet={}",
                before - header.meta.inc_rs_metas.len(),
                self.full_name
            );
            self.save_header(&header)?;
        }
        Ok(())
    }

    /// Record an incremental rowset so it can expire later.
    pub fn add_inc_rowset(&self, rowset: &Rowset) {
        self.header
            .write()
            .meta
            .inc_rs_metas
            .push(rowset.rowset_meta().clone());
    }

    /// Remove the tablet's schema-hash directory recursively.
    pub fn delete_all_files(&self) -> StorageResult<()> {
        match fs::remove_dir_all(&self.tablet_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
