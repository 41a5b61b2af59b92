//! Process-wide tablet registry: create / drop / find / load, per-tablet-id
//! schema-change locks, compaction candidate selection, the trash-sweep loop
//! and the tablet stat cache.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use regex::Regex;
use tracing::{error, info, warn};

use crate::data_dir::{DataDir, DataDirInfo, DATA_PREFIX};
use crate::error::{StorageError, StorageResult, TracedStorageError};
use crate::metrics::StorageMetrics;
use crate::options::StorageOptions;
use crate::rowset::{RowsetWriter, RowsetWriterContext, UnusedRowsets};
use crate::tablet::Tablet;
use crate::tablet_meta::{
    AlterState, CreateTabletRequest, RowsetState, TabletMeta, TabletState,
};
use crate::types::{
    CompactionType, RowsetId, SchemaHash, TabletId, TabletInfo, Version,
};

const TABLET_ID_PREFIX: &str = "tablet_id_";

fn pending_id_of(tablet_id: TabletId) -> String {
    format!("{}{}", TABLET_ID_PREFIX, tablet_id)
}

/// All tablets sharing one tablet id, ordered by ascending creation time,
/// plus the schema-change lock serializing alter jobs on that id.
#[derive(Default)]
struct TableInstances {
    schema_change_locked: AtomicBool,
    table_arr: Vec<Arc<Tablet>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TabletStat {
    pub data_size: u64,
    pub row_num: u64,
}

#[derive(Default)]
struct TabletManagerInner {
    tablet_map: HashMap<TabletId, TableInstances>,
    /// Tablets dropped without `keep_files`, waiting for the trash sweeper.
    shutdown_tablets: Vec<Arc<Tablet>>,
    tablet_stat_cache: HashMap<TabletId, TabletStat>,
    stat_cache_update_time_ms: i64,
}

pub struct TabletManager {
    inner: RwLock<TabletManagerInner>,
    options: Arc<StorageOptions>,
    metrics: Arc<StorageMetrics>,
    unused_rowsets: Arc<UnusedRowsets>,
    available_storage_medium_type_count: AtomicU32,
}

fn get_with_no_lock(
    inner: &TabletManagerInner,
    tablet_id: TabletId,
    schema_hash: SchemaHash,
) -> Option<Arc<Tablet>> {
    inner
        .tablet_map
        .get(&tablet_id)?
        .table_arr
        .iter()
        .find(|t| t.equal(tablet_id, schema_hash))
        .cloned()
}

impl TabletManager {
    pub fn new(
        options: Arc<StorageOptions>,
        metrics: Arc<StorageMetrics>,
        unused_rowsets: Arc<UnusedRowsets>,
    ) -> TabletManager {
        TabletManager {
            inner: RwLock::new(TabletManagerInner::default()),
            options,
            metrics,
            unused_rowsets,
            available_storage_medium_type_count: AtomicU32::new(0),
        }
    }

    /// Create a tablet, trying each candidate data dir in order. Idempotent:
    /// an exact identity match returns success, the same tablet id under a
    /// different schema hash is rejected.
    pub fn create_tablet(
        &self,
        request: &CreateTabletRequest,
        stores: &[Arc<DataDir>],
    ) -> StorageResult<()> {
        let mut inner = self.inner.write();
        info!(
            "begin to process create tablet. tablet_id={}, schema_hash={}",
            request.tablet_id, request.schema_hash
        );
        self.metrics.create_tablet_requests_total.inc();

        if Self::check_tablet_id_exist_unlock(&inner, request.tablet_id) {
            if get_with_no_lock(&inner, request.tablet_id, request.schema_hash).is_some() {
                info!("create tablet success for tablet already exist.");
                return Ok(());
            }
            warn!(
                "tablet with different schema hash already exists. tablet_id={}",
                request.tablet_id
            );
            return Err(StorageError::TabletIdExists(request.tablet_id).into());
        }

        self.internal_create_tablet_unlock(&mut inner, request, None, stores)?;
        info!("finish to process create tablet. tablet_id={}", request.tablet_id);
        Ok(())
    }

    /// Create the target tablet of a schema change or rollup on `ref_tablet`.
    pub fn create_schema_change_tablet(
        &self,
        request: &CreateTabletRequest,
        ref_tablet: &Arc<Tablet>,
        stores: &[Arc<DataDir>],
    ) -> StorageResult<Arc<Tablet>> {
        let mut inner = self.inner.write();
        self.internal_create_tablet_unlock(&mut inner, request, Some(ref_tablet), stores)
    }

    fn internal_create_tablet_unlock(
        &self,
        inner: &mut TabletManagerInner,
        request: &CreateTabletRequest,
        ref_tablet: Option<&Arc<Tablet>>,
        stores: &[Arc<DataDir>],
    ) -> StorageResult<Arc<Tablet>> {
        if get_with_no_lock(inner, request.tablet_id, request.schema_hash).is_some() {
            warn!(
                "failed to create tablet because tablet already exist. tablet_id={}, schema_hash={}",
                request.tablet_id, request.schema_hash
            );
            return Err(
                StorageError::TabletExists(request.tablet_id, request.schema_hash).into(),
            );
        }

        let tablet = match self.create_tablet_meta_and_dir(request, ref_tablet, stores) {
            Ok(tablet) => tablet,
            Err(e) => {
                self.metrics.create_tablet_requests_failed.inc();
                return Err(e);
            }
        };

        let mut is_tablet_added = false;
        let result =
            self.init_and_add_tablet_unlock(inner, request, ref_tablet, &tablet, &mut is_tablet_added);

        // the pending-id marker must go away whether create succeeded or not
        tablet
            .data_dir()
            .remove_pending_ids(&pending_id_of(request.tablet_id));

        match result {
            Ok(()) => Ok(tablet),
            Err(e) => {
                self.metrics.create_tablet_requests_failed.inc();
                if is_tablet_added {
                    if let Err(drop_err) = self.drop_tablet_unlock(
                        inner,
                        request.tablet_id,
                        request.schema_hash,
                        false,
                    ) {
                        warn!(
                            "fail to drop tablet when create tablet failed. err={}",
                            drop_err
                        );
                    }
                } else {
                    if let Err(del_err) = tablet.delete_all_files() {
                        warn!("fail to delete tablet files. err={}", del_err);
                    }
                    if let Err(rm_err) = tablet
                        .data_dir()
                        .meta_store()
                        .remove(request.tablet_id, request.schema_hash)
                    {
                        warn!("fail to remove tablet meta. err={}", rm_err);
                    }
                }
                Err(e)
            }
        }
    }

    fn init_and_add_tablet_unlock(
        &self,
        inner: &mut TabletManagerInner,
        request: &CreateTabletRequest,
        ref_tablet: Option<&Arc<Tablet>>,
        tablet: &Arc<Tablet>,
        is_tablet_added: &mut bool,
    ) -> StorageResult<()> {
        tablet.init().map_err(|e| {
            warn!("tablet init failed. tablet={}", tablet.full_name());
            e
        })?;

        match ref_tablet {
            None => {
                // seeding the initial rowset before registering avoids taking
                // any tablet lock while encoding
                self.create_initial_rowset(tablet, request)?;
            }
            Some(ref_tablet) => {
                // clock may be coarse or stepping backwards; the child must
                // always be younger than its base
                if tablet.creation_time() <= ref_tablet.creation_time() {
                    warn!(
                        "new tablet's creation time is not newer than the ref tablet. new={}, ref={}",
                        tablet.creation_time(),
                        ref_tablet.creation_time()
                    );
                    tablet.set_creation_time(ref_tablet.creation_time() + 1);
                }
            }
        }

        self.add_tablet_unlock(
            inner,
            request.tablet_id,
            request.schema_hash,
            tablet,
            true,
            false,
        )
        .map_err(|e| {
            warn!("fail to add tablet to the registry. err={}", e);
            e
        })?;
        *is_tablet_added = true;

        if get_with_no_lock(inner, request.tablet_id, request.schema_hash).is_none() {
            return Err(
                StorageError::TabletNotFound(request.tablet_id, request.schema_hash).into(),
            );
        }
        Ok(())
    }

    /// Try every candidate dir until a tablet directory materializes.
    fn create_tablet_meta_and_dir(
        &self,
        request: &CreateTabletRequest,
        ref_tablet: Option<&Arc<Tablet>>,
        stores: &[Arc<DataDir>],
    ) -> StorageResult<Arc<Tablet>> {
        let pending_id = pending_id_of(request.tablet_id);
        let mut last_dir: Option<&Arc<DataDir>> = None;
        let mut last_err: Option<TracedStorageError> = None;
        for data_dir in stores {
            if let Some(prev) = last_dir.take() {
                // the previous iteration failed after marking the dir
                prev.remove_pending_ids(&pending_id);
            }
            last_dir = Some(data_dir);

            let tablet_meta = match self.create_tablet_meta(request, data_dir, ref_tablet) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(
                        "fail to create tablet meta. root={}, err={}",
                        data_dir.path().display(),
                        e
                    );
                    last_err = Some(e);
                    continue;
                }
            };

            let schema_hash_dir = data_dir.absolute_tablet_path(&tablet_meta, true);
            if !schema_hash_dir.exists() {
                data_dir.add_pending_ids(&pending_id);
                if let Err(e) = fs::create_dir_all(&schema_hash_dir) {
                    warn!(
                        "create dir fail. path={}, err={}",
                        schema_hash_dir.display(),
                        e
                    );
                    last_err = Some(e.into());
                    continue;
                }
            }

            return Ok(Tablet::new_from_meta(tablet_meta, data_dir.clone()));
        }
        Err(last_err.unwrap_or_else(|| {
            TracedStorageError::params("failed to create tablet on any data dir")
        }))
    }

    /// Build the tablet meta, assigning per-column unique ids. On a schema
    /// change, columns present in the reference tablet keep their unique id;
    /// new columns take fresh ids starting from the reference's
    /// `next_column_unique_id`.
    fn create_tablet_meta(
        &self,
        request: &CreateTabletRequest,
        store: &Arc<DataDir>,
        ref_tablet: Option<&Arc<Tablet>>,
    ) -> StorageResult<TabletMeta> {
        let shard_id = store.get_shard()?;

        let mut col_ordinal_to_unique_id = HashMap::new();
        let next_unique_id = match ref_tablet {
            None => {
                for col_ordinal in 0..request.columns.len() as u32 {
                    col_ordinal_to_unique_id.insert(col_ordinal, col_ordinal);
                }
                request.columns.len() as u32
            }
            Some(ref_tablet) => {
                let ref_schema = ref_tablet.schema();
                let mut next_unique_id = ref_schema.next_column_unique_id;
                for (col_ordinal, column) in request.columns.iter().enumerate() {
                    match ref_schema.columns.iter().find(|c| c.name == column.name) {
                        Some(ref_column) => {
                            col_ordinal_to_unique_id
                                .insert(col_ordinal as u32, ref_column.unique_id);
                        }
                        None => {
                            col_ordinal_to_unique_id.insert(col_ordinal as u32, next_unique_id);
                            next_unique_id += 1;
                        }
                    }
                }
                next_unique_id
            }
        };
        info!("next_unique_id={}", next_unique_id);

        Ok(TabletMeta::create(
            request.table_id,
            request.partition_id,
            request.tablet_id,
            request.schema_hash,
            shard_id,
            &request.columns,
            next_unique_id,
            &col_ordinal_to_unique_id,
        ))
    }

    /// Seed version `(0, request.version)` through the rowset writer.
    fn create_initial_rowset(
        &self,
        tablet: &Arc<Tablet>,
        request: &CreateTabletRequest,
    ) -> StorageResult<()> {
        if request.version < 1 {
            warn!("init version of tablet should at least 1.");
            return Err(TracedStorageError::params(
                "init version of tablet should at least 1",
            ));
        }
        let version = Version::new(0, request.version);

        let rowset_id = tablet.next_rowset_id()?;
        let context = RowsetWriterContext {
            rowset_id,
            tablet_id: tablet.tablet_id(),
            partition_id: tablet.partition_id(),
            tablet_schema_hash: tablet.schema_hash(),
            rowset_path_prefix: tablet.tablet_path().to_path_buf(),
            schema: tablet.schema(),
            rowset_state: RowsetState::Visible,
            version,
            version_hash: request.version_hash,
            txn_id: None,
            load_id: None,
        };
        let mut builder = RowsetWriter::new();
        builder.init(context)?;
        builder.flush().map_err(|e| {
            warn!("fail to finalize writer. tablet={}", tablet.full_name());
            e
        })?;
        let new_rowset = builder.build()?;
        if let Err(e) = tablet.add_rowset(new_rowset.clone()) {
            // hand the orphan to the engine's garbage collector
            self.unused_rowsets.add(new_rowset);
            warn!(
                "fail to create init base version. err={}, version={}",
                e, request.version
            );
            return Err(e);
        }

        tablet.set_cumulative_layer_point(request.version + 1);
        tablet.save_meta().map_err(|e| {
            warn!("fail to save header. tablet={}", tablet.full_name());
            e
        })
    }

    /// Register a tablet in the map, replacing a stale duplicate when the
    /// newcomer is fresher (or `force`).
    pub fn add_tablet(
        &self,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        tablet: &Arc<Tablet>,
        update_meta: bool,
        force: bool,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write();
        self.add_tablet_unlock(&mut inner, tablet_id, schema_hash, tablet, update_meta, force)
    }

    fn add_tablet_unlock(
        &self,
        inner: &mut TabletManagerInner,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        tablet: &Arc<Tablet>,
        update_meta: bool,
        force: bool,
    ) -> StorageResult<()> {
        let existing = get_with_no_lock(inner, tablet_id, schema_hash);
        let Some(table_item) = existing else {
            info!(
                "not find exist tablet just add it to map. tablet_id={}, schema_hash={}",
                tablet_id, schema_hash
            );
            return self
                .add_tablet_to_map_unlock(inner, tablet_id, schema_hash, tablet, update_meta, false, false);
        };

        if !force {
            if table_item.tablet_path() == tablet.tablet_path() {
                warn!(
                    "add the same tablet twice! tablet_id={}, schema_hash={}",
                    tablet_id, schema_hash
                );
                return Err(StorageError::TabletExists(tablet_id, schema_hash).into());
            }
            if Arc::ptr_eq(table_item.data_dir(), tablet.data_dir()) {
                warn!(
                    "add tablet with same data dir twice! tablet_id={}, schema_hash={}",
                    tablet_id, schema_hash
                );
                return Err(StorageError::TabletExists(tablet_id, schema_hash).into());
            }
        }

        let old_rowset = table_item.rowset_with_max_version();
        let new_rowset = tablet.rowset_with_max_version();
        let Some(new_rowset) = new_rowset else {
            // an empty newcomer displacing a tablet with data points at
            // on-disk corruption
            error!(
                "new tablet is empty and old tablet exists. it should not happen. tablet_id={}, schema_hash={}",
                tablet_id, schema_hash
            );
            return Err(StorageError::TabletExists(tablet_id, schema_hash).into());
        };
        let old_time = old_rowset.as_ref().map_or(-1, |r| r.creation_time());
        let new_time = new_rowset.creation_time();
        let old_version = old_rowset.as_ref().map_or(-1, |r| r.end_version());
        let new_version = new_rowset.end_version();

        // A force replace comes from restore: the files in the tablet dir are
        // the freshly landed snapshot, so the displaced tablet must not take
        // them along.
        let keep_files = force;
        let res = if force
            || new_version > old_version
            || (new_version == old_version && new_time > old_time)
        {
            self.add_tablet_to_map_unlock(
                inner, tablet_id, schema_hash, tablet, update_meta, keep_files, true,
            )
        } else {
            Err(StorageError::TabletExists(tablet_id, schema_hash).into())
        };
        warn!(
            "add duplicated tablet. force={}, tablet_id={}, schema_hash={}, old_version={}, new_version={}, old_time={}, new_time={}",
            force, tablet_id, schema_hash, old_version, new_version, old_time, new_time
        );
        res
    }

    #[allow(clippy::too_many_arguments)]
    fn add_tablet_to_map_unlock(
        &self,
        inner: &mut TabletManagerInner,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        tablet: &Arc<Tablet>,
        update_meta: bool,
        keep_files: bool,
        drop_old: bool,
    ) -> StorageResult<()> {
        if update_meta {
            tablet.save_meta().map_err(|e| {
                warn!(
                    "failed to save new tablet's meta to meta store. tablet_id={}, schema_hash={}",
                    tablet_id, schema_hash
                );
                e
            })?;
        }
        if drop_old {
            self.drop_tablet_directly_unlock(inner, tablet_id, schema_hash, keep_files)
                .map_err(|e| {
                    warn!(
                        "failed to drop old tablet when add new tablet. tablet_id={}, schema_hash={}",
                        tablet_id, schema_hash
                    );
                    e
                })?;
        }
        // registration lets the engine find every tablet of a root path, e.g.
        // to evict them when a disk goes bad
        tablet.register_tablet_into_dir();
        let instances = inner.tablet_map.entry(tablet_id).or_default();
        instances.table_arr.push(tablet.clone());
        instances.table_arr.sort_by_key(|t| t.creation_time());
        info!(
            "add tablet to map successfully. tablet_id={}, schema_hash={}",
            tablet_id, schema_hash
        );
        Ok(())
    }

    /// Drop a tablet. Succeeds when the identity is absent. The base of an
    /// unfinished schema change cannot be dropped; dropping either end of a
    /// finished or broken link clears the peer's alter task first.
    pub fn drop_tablet(
        &self,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        keep_files: bool,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write();
        self.drop_tablet_unlock(&mut inner, tablet_id, schema_hash, keep_files)
    }

    fn drop_tablet_unlock(
        &self,
        inner: &mut TabletManagerInner,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        keep_files: bool,
    ) -> StorageResult<()> {
        info!(
            "begin to process drop tablet. tablet_id={}, schema_hash={}",
            tablet_id, schema_hash
        );
        self.metrics.drop_tablet_requests_total.inc();

        let Some(dropped_tablet) = get_with_no_lock(inner, tablet_id, schema_hash) else {
            warn!(
                "tablet to drop does not exist already. tablet_id={}, schema_hash={}",
                tablet_id, schema_hash
            );
            return Ok(());
        };

        let Some(alter_task) = dropped_tablet.alter_task() else {
            return self.drop_tablet_directly_unlock(inner, tablet_id, schema_hash, keep_files);
        };

        let Some(related_tablet) = get_with_no_lock(
            inner,
            alter_task.related_tablet_id,
            alter_task.related_schema_hash,
        ) else {
            warn!(
                "drop tablet directly when related tablet not found. tablet_id={}, schema_hash={}",
                alter_task.related_tablet_id, alter_task.related_schema_hash
            );
            return self.drop_tablet_directly_unlock(inner, tablet_id, schema_hash, keep_files);
        };

        let is_drop_base_tablet =
            dropped_tablet.creation_time() < related_tablet.creation_time();
        if is_drop_base_tablet && alter_task.alter_state != AlterState::Finished {
            warn!(
                "base tablet in schema change cannot be dropped. tablet={}",
                dropped_tablet.full_name()
            );
            return Err(StorageError::PreviousSchemaChangeNotFinished.into());
        }

        // Break the link before dropping, so a restart between the two steps
        // never resurrects a link to a vanished tablet. Restore it if the
        // drop itself fails.
        let mut related_header = related_tablet.header_mut();
        let saved_task = related_header.alter_task().cloned();
        related_header.delete_alter_task();
        if let Err(e) = related_tablet.save_header(&related_header) {
            error!(
                "fail to save tablet header. tablet={}",
                related_tablet.full_name()
            );
            return Err(e);
        }

        match self.drop_tablet_directly_unlock(inner, tablet_id, schema_hash, keep_files) {
            Ok(()) => {
                info!("finish to drop tablet. tablet={}", dropped_tablet.full_name());
                Ok(())
            }
            Err(e) => {
                warn!(
                    "fail to drop tablet which in schema change. tablet={}",
                    dropped_tablet.full_name()
                );
                related_header.set_alter_task(saved_task);
                if let Err(save_err) = related_tablet.save_header(&related_header) {
                    error!(
                        "fail to restore alter task on peer. tablet={}, err={}",
                        related_tablet.full_name(),
                        save_err
                    );
                }
                Err(e)
            }
        }
    }

    fn drop_tablet_directly_unlock(
        &self,
        inner: &mut TabletManagerInner,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        keep_files: bool,
    ) -> StorageResult<()> {
        let Some(dropped_tablet) = get_with_no_lock(inner, tablet_id, schema_hash) else {
            warn!(
                "fail to drop not existed tablet. tablet_id={}, schema_hash={}",
                tablet_id, schema_hash
            );
            return Err(StorageError::TabletNotFound(tablet_id, schema_hash).into());
        };

        let mut removed = Vec::new();
        let mut entry_empty = false;
        if let Some(instances) = inner.tablet_map.get_mut(&tablet_id) {
            instances.table_arr.retain(|t| {
                if t.equal(tablet_id, schema_hash) {
                    removed.push(t.clone());
                    false
                } else {
                    true
                }
            });
            entry_empty = instances.table_arr.is_empty();
        }

        for tablet in removed {
            if !keep_files {
                info!(
                    "set tablet to shutdown state and remove it from memory. tablet_id={}, schema_hash={}, tablet_path={}",
                    tablet_id,
                    schema_hash,
                    tablet.tablet_path().display()
                );
                // Other threads may still hold the tablet and save its meta;
                // persisting the SHUTDOWN state through the tablet keeps a
                // restart from resurrecting it.
                tablet.set_tablet_state(TabletState::Shutdown);
                tablet.save_meta().map_err(|e| {
                    warn!(
                        "fail to drop tablet. tablet_id={}, schema_hash={}",
                        tablet_id, schema_hash
                    );
                    e
                })?;
                inner.shutdown_tablets.push(tablet);
            }
        }

        if entry_empty {
            inner.tablet_map.remove(&tablet_id);
        }

        dropped_tablet.deregister_tablet_from_dir();
        Ok(())
    }

    /// Evict every listed identity from the registry without touching disk,
    /// used when a whole root path went bad.
    pub fn drop_tablets_on_error_root_path(
        &self,
        tablet_infos: &[TabletInfo],
    ) -> StorageResult<()> {
        let mut inner = self.inner.write();
        for tablet_info in tablet_infos {
            let TabletInfo {
                tablet_id,
                schema_hash,
            } = *tablet_info;
            if get_with_no_lock(&inner, tablet_id, schema_hash).is_none() {
                warn!(
                    "dropping tablet not exist. tablet_id={}, schema_hash={}",
                    tablet_id, schema_hash
                );
                continue;
            }
            let mut entry_empty = false;
            if let Some(instances) = inner.tablet_map.get_mut(&tablet_id) {
                instances
                    .table_arr
                    .retain(|t| !t.equal(tablet_id, schema_hash));
                entry_empty = instances.table_arr.is_empty();
            }
            if entry_empty {
                inner.tablet_map.remove(&tablet_id);
            }
        }
        Ok(())
    }

    /// Look a tablet up; with `include_deleted` the shutdown queue is scanned
    /// too. A tablet on an unusable data dir is reported as absent.
    pub fn get_tablet(
        &self,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        include_deleted: bool,
    ) -> Option<Arc<Tablet>> {
        let inner = self.inner.read();
        let mut tablet = get_with_no_lock(&inner, tablet_id, schema_hash);
        if tablet.is_none() && include_deleted {
            tablet = inner
                .shutdown_tablets
                .iter()
                .find(|t| t.equal(tablet_id, schema_hash))
                .cloned();
        }
        match tablet {
            Some(t) if !t.is_used() => {
                warn!("tablet cannot be used. tablet_id={}", tablet_id);
                None
            }
            other => other,
        }
    }

    pub fn check_tablet_id_exist(&self, tablet_id: TabletId) -> bool {
        let inner = self.inner.read();
        Self::check_tablet_id_exist_unlock(&inner, tablet_id)
    }

    fn check_tablet_id_exist_unlock(inner: &TabletManagerInner, tablet_id: TabletId) -> bool {
        inner
            .tablet_map
            .get(&tablet_id)
            .is_some_and(|instances| !instances.table_arr.is_empty())
    }

    /// Rebuild a tablet from a serialized meta blob. A SHUTDOWN meta parks
    /// the tablet on the shutdown queue and reports *already deleted* so the
    /// caller skips it.
    pub fn load_tablet_from_meta(
        &self,
        data_dir: &Arc<DataDir>,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        meta_binary: &[u8],
        update_meta: bool,
        force: bool,
    ) -> StorageResult<()> {
        let mut inner = self.inner.write();
        let tablet_meta = TabletMeta::deserialize(meta_binary).map_err(|e| {
            warn!(
                "parse meta binary failed. tablet_id={}, schema_hash={}",
                tablet_id, schema_hash
            );
            e
        })?;

        let tablet = Tablet::new_from_meta(tablet_meta, data_dir.clone());
        if tablet.tablet_state() == TabletState::Shutdown {
            info!(
                "tablet is to be deleted, skip load it. tablet_id={}, schema_hash={}",
                tablet_id, schema_hash
            );
            inner.shutdown_tablets.push(tablet);
            return Err(StorageError::TabletAlreadyDeleted(tablet_id, schema_hash).into());
        }

        // a tablet with no version history must at least be a schema-change
        // target, otherwise the meta is broken
        if tablet.max_version().begin == -1 && tablet.alter_task().is_none() {
            warn!(
                "tablet not in schema change state without delta is invalid. tablet={}",
                tablet.full_name()
            );
            return Err(StorageError::IndexValidate.into());
        }

        tablet.init().map_err(|e| {
            warn!("tablet init failed. tablet={}", tablet.full_name());
            e
        })?;
        self.add_tablet_unlock(&mut inner, tablet_id, schema_hash, &tablet, update_meta, force)
    }

    /// Rebuild a tablet from its `.hdr` file, rewriting the meta's shard to
    /// the one the path sits in so relocated snapshots load cleanly.
    pub fn load_tablet_from_dir(
        &self,
        data_dir: &Arc<DataDir>,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        schema_hash_path: &Path,
        force: bool,
    ) -> StorageResult<()> {
        let header_path = schema_hash_path.join(format!("{}.hdr", tablet_id));
        let shard = schema_hash_path
            .parent()
            .and_then(Path::parent)
            .and_then(Path::file_name)
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| {
                TracedStorageError::params(format!(
                    "cannot derive shard from path {}",
                    schema_hash_path.display()
                ))
            })?;

        let mut tablet_meta = TabletMeta::create_from_file(&header_path).map_err(|e| {
            warn!("fail to load tablet meta. header_path={}", header_path.display());
            e
        })?;
        tablet_meta.set_shard_id(shard);
        let meta_binary = tablet_meta.serialize()?;
        self.load_tablet_from_meta(data_dir, tablet_id, schema_hash, &meta_binary, true, force)
    }

    /// Non-blocking acquisition of the per-tablet-id schema-change lock.
    pub fn try_schema_change_lock(&self, tablet_id: TabletId) -> bool {
        let inner = self.inner.read();
        match inner.tablet_map.get(&tablet_id) {
            None => {
                warn!("tablet does not exists. tablet_id={}", tablet_id);
                false
            }
            Some(instances) => instances
                .schema_change_locked
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok(),
        }
    }

    pub fn release_schema_change_lock(&self, tablet_id: TabletId) {
        let inner = self.inner.read();
        match inner.tablet_map.get(&tablet_id) {
            None => warn!("tablet does not exists. tablet_id={}", tablet_id),
            Some(instances) => instances.schema_change_locked.store(false, Ordering::Release),
        }
    }

    /// Runs at engine restart with no concurrent mutators: every alter link
    /// that is not FINISHED on both ends is marked FAILED and persisted, so
    /// the upper layer reschedules the job.
    pub fn cancel_unfinished_schema_change(&self) -> StorageResult<()> {
        let inner = self.inner.read();
        let mut canceled_num = 0u64;
        info!("begin to cancel unfinished schema change.");
        for instances in inner.tablet_map.values() {
            for tablet in &instances.table_arr {
                let Some(alter_task) = tablet.alter_task() else {
                    continue;
                };
                let Some(new_tablet) = get_with_no_lock(
                    &inner,
                    alter_task.related_tablet_id,
                    alter_task.related_schema_hash,
                ) else {
                    warn!(
                        "new tablet created by alter tablet does not exist. tablet={}",
                        tablet.full_name()
                    );
                    continue;
                };

                // a schema change that completed on both ends stays untouched
                let new_alter_task = new_tablet.alter_task();
                if alter_task.alter_state == AlterState::Finished
                    && new_alter_task
                        .as_ref()
                        .is_some_and(|t| t.alter_state == AlterState::Finished)
                {
                    continue;
                }

                tablet.set_alter_state(AlterState::Failed);
                tablet.save_meta().map_err(|e| {
                    error!(
                        "fail to save base tablet meta. base_tablet={}",
                        tablet.full_name()
                    );
                    e
                })?;
                new_tablet.set_alter_state(AlterState::Failed);
                new_tablet.save_meta().map_err(|e| {
                    error!(
                        "fail to save new tablet meta. new_tablet={}",
                        new_tablet.full_name()
                    );
                    e
                })?;
                canceled_num += 1;
            }
        }
        info!(
            "finish to cancel unfinished schema change! canceled_num={}",
            canceled_num
        );
        Ok(())
    }

    /// Pick the tablet with the highest compaction score of the requested
    /// type; ties keep the first seen. Schema-change targets still catching
    /// up are skipped.
    pub fn find_best_tablet_to_compaction(
        &self,
        compaction_type: CompactionType,
    ) -> Option<Arc<Tablet>> {
        let inner = self.inner.read();
        let mut highest_score = 0u32;
        let mut best_tablet = None;
        for instances in inner.tablet_map.values() {
            for tablet in &instances.table_arr {
                if let Some(alter_task) = tablet.alter_task() {
                    if alter_task.alter_state != AlterState::Finished
                        && alter_task.alter_state != AlterState::Failed
                    {
                        let related = get_with_no_lock(
                            &inner,
                            alter_task.related_tablet_id,
                            alter_task.related_schema_hash,
                        );
                        if let Some(related) = related {
                            if tablet.creation_time() > related.creation_time() {
                                // a schema-change target mid-conversion
                                continue;
                            }
                        }
                    }
                }
                if !tablet.init_succeeded() || !tablet.can_do_compaction() {
                    continue;
                }

                let score = match compaction_type {
                    CompactionType::Base => tablet.calc_base_compaction_score(),
                    CompactionType::Cumulative => tablet.calc_cumulative_compaction_score(),
                };
                if score > highest_score {
                    highest_score = score;
                    best_tablet = Some(tablet.clone());
                }
            }
        }
        best_tablet
    }

    /// Periodic sweep: expire incremental rowsets on live tablets, then move
    /// unreferenced shutdown tablets into the trash and drop their metas.
    pub fn start_trash_sweep(&self) -> StorageResult<()> {
        {
            let inner = self.inner.read();
            for instances in inner.tablet_map.values() {
                for tablet in &instances.table_arr {
                    if let Err(e) = tablet.delete_expired_inc_rowsets() {
                        warn!(
                            "fail to delete expired inc rowsets. tablet={}, err={}",
                            tablet.full_name(),
                            e
                        );
                    }
                }
            }
        }

        let mut inner = self.inner.write();
        let shutdown_tablets = std::mem::take(&mut inner.shutdown_tablets);
        let mut remaining = Vec::new();
        for tablet in shutdown_tablets {
            // another thread still holds this tablet, deletion must wait
            if Arc::strong_count(&tablet) > 1 {
                remaining.push(tablet);
                continue;
            }

            let fetched = tablet
                .data_dir()
                .meta_store()
                .get(tablet.tablet_id(), tablet.schema_hash())
                .ok()
                .flatten()
                .and_then(|blob| TabletMeta::deserialize(&blob).ok());

            match fetched {
                Some(meta) => {
                    if meta.tablet_state() != TabletState::Shutdown {
                        warn!(
                            "tablet's state changed to normal, skip remove dirs. tablet_id={}, schema_hash={}",
                            meta.tablet_id(),
                            meta.schema_hash()
                        );
                        continue;
                    }
                    if tablet.tablet_path().exists() {
                        // snapshot the meta next to the data before it moves
                        let save_result = tablet.header().meta().save(tablet.tablet_path());
                        if let Err(e) = save_result {
                            warn!(
                                "fail to snapshot meta before trash move. tablet={}, err={}",
                                tablet.full_name(),
                                e
                            );
                            remaining.push(tablet);
                            continue;
                        }
                        info!(
                            "start to move path to trash. tablet_path={}",
                            tablet.tablet_path().display()
                        );
                        if let Err(e) = tablet.data_dir().move_to_trash(
                            tablet.tablet_path(),
                            tablet.tablet_id(),
                            tablet.schema_hash(),
                        ) {
                            warn!(
                                "failed to move dir to trash. dir={}, err={}",
                                tablet.tablet_path().display(),
                                e
                            );
                            remaining.push(tablet);
                            continue;
                        }
                    }
                    if let Err(e) = tablet
                        .data_dir()
                        .meta_store()
                        .remove(tablet.tablet_id(), tablet.schema_hash())
                    {
                        warn!(
                            "fail to remove tablet meta after trash move. tablet={}, err={}",
                            tablet.full_name(),
                            e
                        );
                        remaining.push(tablet);
                        continue;
                    }
                    info!(
                        "successfully move tablet to trash. tablet_id={}, schema_hash={}, tablet_path={}",
                        tablet.tablet_id(),
                        tablet.schema_hash(),
                        tablet.tablet_path().display()
                    );
                }
                None => {
                    if tablet.tablet_path().exists() {
                        warn!(
                            "errors while load meta from store, skip this tablet. tablet_id={}, schema_hash={}",
                            tablet.tablet_id(),
                            tablet.schema_hash()
                        );
                        remaining.push(tablet);
                    } else {
                        info!(
                            "could not find tablet dir, skip move to trash, remove it from gc queue. tablet_id={}, schema_hash={}",
                            tablet.tablet_id(),
                            tablet.schema_hash()
                        );
                    }
                }
            }
        }
        inner.shutdown_tablets = remaining;
        Ok(())
    }

    /// Cached per-tablet-id stats (first instance per id), refreshed when
    /// older than the configured interval.
    pub fn get_tablet_stat(&self) -> HashMap<TabletId, TabletStat> {
        let current_time_ms = Utc::now().timestamp_millis();
        let mut inner = self.inner.write();
        let interval_ms = self.options.tablet_stat_cache_update_interval.as_millis() as i64;
        if current_time_ms - inner.stat_cache_update_time_ms > interval_ms {
            Self::build_tablet_stat_unlock(&mut inner);
        }
        inner.tablet_stat_cache.clone()
    }

    fn build_tablet_stat_unlock(inner: &mut TabletManagerInner) {
        let mut cache = HashMap::new();
        for (&tablet_id, instances) in &inner.tablet_map {
            // only the base tablet's stat is reported
            let Some(tablet) = instances.table_arr.first() else {
                continue;
            };
            cache.insert(
                tablet_id,
                TabletStat {
                    data_size: tablet.tablet_footprint(),
                    row_num: tablet.num_rows(),
                },
            );
        }
        inner.tablet_stat_cache = cache;
        inner.stat_cache_update_time_ms = Utc::now().timestamp_millis();
    }

    /// Aggregate used capacity per root path over all live tablets.
    pub fn update_root_path_info(
        &self,
        path_map: &mut HashMap<String, DataDirInfo>,
        tablet_counter: &mut i64,
    ) {
        let inner = self.inner.read();
        for instances in inner.tablet_map.values() {
            for tablet in &instances.table_arr {
                *tablet_counter += 1;
                let data_size = tablet.tablet_footprint();
                let path = tablet.data_dir().path().to_string_lossy();
                let Some(info) = path_map.get_mut(path.as_ref()) else {
                    continue;
                };
                if info.is_used {
                    info.data_used_capacity += data_size as i64;
                }
            }
        }
    }

    pub fn update_storage_medium_type_count(&self, storage_medium_type_count: u32) {
        self.available_storage_medium_type_count
            .store(storage_medium_type_count, Ordering::Release);
    }

    pub fn available_storage_medium_type_count(&self) -> u32 {
        self.available_storage_medium_type_count
            .load(Ordering::Acquire)
    }

    /// Find the owning data dir by path prefix, then parse
    /// `data/<shard>/<tablet_id>(/<schema_hash>)?`.
    pub fn get_tablet_id_and_schema_hash_from_path(
        stores: &[Arc<DataDir>],
        path: &str,
    ) -> Option<(TabletId, Option<SchemaHash>)> {
        for data_dir in stores {
            let root = data_dir.path().to_string_lossy();
            if !path.contains(root.as_ref()) {
                continue;
            }
            let pattern = format!(
                "{}/{}/\\d+/(\\d+)(?:/(-?\\d+))?",
                regex::escape(root.as_ref()),
                DATA_PREFIX
            );
            let Ok(re) = Regex::new(&pattern) else {
                continue;
            };
            if let Some(caps) = re.captures(path) {
                let tablet_id = caps[1].parse::<TabletId>().ok()?;
                let schema_hash = caps.get(2).and_then(|m| m.as_str().parse::<SchemaHash>().ok());
                return Some((tablet_id, schema_hash));
            }
        }
        None
    }

    /// Parse `data/<shard>/<tablet_id>/<schema_hash>/<rowset_id>_*`.
    pub fn get_rowset_id_from_path(path: &str) -> Option<RowsetId> {
        let re = Regex::new(r"/data/\d+/\d+/-?\d+/(\d+)_").ok()?;
        re.captures(path).and_then(|caps| caps[1].parse().ok())
    }

    /// Wipe the registry. Shutdown path only.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.tablet_map.clear();
        inner.shutdown_tablets.clear();
    }
}
