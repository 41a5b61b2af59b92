//! End-to-end lifecycle scenarios driving the tablet manager against real
//! data directories.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use tabletstore::data_dir::DataDir;
use tabletstore::error::StorageError;
use tabletstore::metrics::StorageMetrics;
use tabletstore::options::StorageOptions;
use tabletstore::rowset::{RowsetWriter, RowsetWriterContext, UnusedRowsets};
use tabletstore::tablet::Tablet;
use tabletstore::tablet_manager::TabletManager;
use tabletstore::tablet_meta::{
    AlterState, AlterTabletTask, ColumnRequest, ColumnType, CreateTabletRequest, RowsetState,
    TabletMeta,
};
use tabletstore::types::{Datum, RowCursor, SchemaHash, TabletId, Version};

fn test_options() -> Arc<StorageOptions> {
    Arc::new(StorageOptions::default_for_test())
}

fn new_manager() -> TabletManager {
    TabletManager::new(
        test_options(),
        Arc::new(StorageMetrics::new()),
        Arc::new(UnusedRowsets::new()),
    )
}

fn open_store(path: &Path) -> Arc<DataDir> {
    Arc::new(DataDir::open(path, -1, test_options()).unwrap())
}

fn int_columns() -> Vec<ColumnRequest> {
    vec![
        ColumnRequest {
            name: "a".to_string(),
            col_type: ColumnType::Int,
            is_key: true,
            is_nullable: false,
        },
        ColumnRequest {
            name: "b".to_string(),
            col_type: ColumnType::Int,
            is_key: false,
            is_nullable: true,
        },
    ]
}

fn create_request(tablet_id: TabletId, schema_hash: SchemaHash) -> CreateTabletRequest {
    CreateTabletRequest {
        table_id: 1,
        partition_id: 2,
        tablet_id,
        schema_hash,
        columns: int_columns(),
        version: 1,
        version_hash: 0,
    }
}

/// Hand-build a tablet with one rowset, outside the manager's create path.
fn build_tablet(
    store: &Arc<DataDir>,
    tablet_id: TabletId,
    schema_hash: SchemaHash,
    version: Version,
    creation_time: i64,
) -> Arc<Tablet> {
    let columns = int_columns();
    let map = HashMap::from([(0, 0), (1, 1)]);
    let shard = store.get_shard().unwrap();
    let mut meta = TabletMeta::create(1, 2, tablet_id, schema_hash, shard, &columns, 2, &map);
    meta.set_creation_time(creation_time);
    let tablet = Tablet::new_from_meta(meta, store.clone());
    fs::create_dir_all(tablet.tablet_path()).unwrap();
    tablet.init().unwrap();

    let rowset_id = store.next_rowset_id().unwrap();
    let mut writer = RowsetWriter::new();
    writer
        .init(RowsetWriterContext {
            rowset_id,
            tablet_id,
            partition_id: 2,
            tablet_schema_hash: schema_hash,
            rowset_path_prefix: tablet.tablet_path().to_path_buf(),
            schema: tablet.schema(),
            rowset_state: RowsetState::Visible,
            version,
            version_hash: version.end as u64,
            txn_id: None,
            load_id: None,
        })
        .unwrap();
    writer
        .add_row(&RowCursor::new(vec![Datum::Int(1), Datum::Int(2)]))
        .unwrap();
    writer.flush().unwrap();
    tablet.add_rowset(writer.build().unwrap()).unwrap();
    tablet
}

#[test]
fn test_create_and_lookup() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = open_store(tempdir.path());
    let manager = new_manager();

    manager
        .create_tablet(&create_request(10, 0xabc), &[store.clone()])
        .unwrap();

    // 0xabc == 2748; the first shard handed out is 0
    let schema_hash_dir = tempdir.path().join("data/0/10/2748");
    assert!(schema_hash_dir.is_dir());
    let names: Vec<String> = fs::read_dir(&schema_hash_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.iter().filter(|n| n.ends_with(".hdr")).count(), 1);
    assert_eq!(names.iter().filter(|n| n.ends_with(".dat")).count(), 1);

    let tablet = manager.get_tablet(10, 0xabc, false).unwrap();
    assert_eq!(tablet.max_version().end, 1);
    assert_eq!(tablet.max_version(), Version::new(0, 1));
}

#[test]
fn test_idempotent_create() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = open_store(tempdir.path());
    let manager = new_manager();
    let request = create_request(10, 0xabc);

    manager.create_tablet(&request, &[store.clone()]).unwrap();
    // identical request succeeds and leaves a single tablet behind
    manager.create_tablet(&request, &[store.clone()]).unwrap();
    assert!(manager.get_tablet(10, 0xabc, false).is_some());

    // same id under another schema hash is rejected
    let err = manager
        .create_tablet(&create_request(10, 0xdef), &[store])
        .unwrap_err();
    assert!(matches!(err.kind(), StorageError::TabletIdExists(10)));
}

#[test]
fn test_schema_change_drop_rules() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = open_store(tempdir.path());
    let manager = new_manager();

    manager
        .create_tablet(&create_request(10, 0xabc), &[store.clone()])
        .unwrap();
    let base = manager.get_tablet(10, 0xabc, false).unwrap();

    let child = manager
        .create_schema_change_tablet(&create_request(10, 0xdef), &base, &[store.clone()])
        .unwrap();
    assert!(child.creation_time() > base.creation_time());

    base.set_alter_task(AlterTabletTask {
        related_tablet_id: 10,
        related_schema_hash: 0xdef,
        alter_state: AlterState::Running,
    });
    base.save_meta().unwrap();
    child.set_alter_task(AlterTabletTask {
        related_tablet_id: 10,
        related_schema_hash: 0xabc,
        alter_state: AlterState::Running,
    });
    child.save_meta().unwrap();

    // the base of a running schema change cannot go away
    let err = manager.drop_tablet(10, 0xabc, false).unwrap_err();
    assert!(matches!(
        err.kind(),
        StorageError::PreviousSchemaChangeNotFinished
    ));
    assert!(manager.get_tablet(10, 0xabc, false).is_some());

    base.set_alter_state(AlterState::Finished);
    base.save_meta().unwrap();
    manager.drop_tablet(10, 0xabc, false).unwrap();

    assert!(manager.get_tablet(10, 0xabc, false).is_none());
    // dropping the base cleared the peer's link
    assert!(child.alter_task().is_none());
    assert!(manager.get_tablet(10, 0xdef, false).is_some());
}

#[test]
fn test_force_replace_keeps_files() {
    let tempdir1 = tempfile::tempdir().unwrap();
    let tempdir2 = tempfile::tempdir().unwrap();
    let store1 = open_store(tempdir1.path());
    let store2 = open_store(tempdir2.path());
    let manager = new_manager();

    manager
        .create_tablet(&create_request(7, 1), &[store1.clone()])
        .unwrap();
    let old_tablet = manager.get_tablet(7, 1, false).unwrap();
    let old_path = old_tablet.tablet_path().to_path_buf();

    // same identity, same version, not any younger: only force may replace
    let new_tablet = build_tablet(&store2, 7, 1, Version::new(0, 1), 1);
    manager
        .add_tablet(7, 1, &new_tablet, true, true)
        .unwrap();

    let current = manager.get_tablet(7, 1, false).unwrap();
    assert!(Arc::ptr_eq(&current, &new_tablet));
    // the displaced tablet's files were not deleted
    assert!(old_path.is_dir());
    assert!(fs::read_dir(&old_path).unwrap().count() > 0);
}

#[test]
fn test_replace_version_rules() {
    let tempdir1 = tempfile::tempdir().unwrap();
    let tempdir2 = tempfile::tempdir().unwrap();
    let tempdir3 = tempfile::tempdir().unwrap();
    let store1 = open_store(tempdir1.path());
    let store2 = open_store(tempdir2.path());
    let store3 = open_store(tempdir3.path());
    let manager = new_manager();

    manager
        .create_tablet(&create_request(7, 1), &[store1])
        .unwrap();

    // a higher end version wins without force
    let fresher = build_tablet(&store3, 7, 1, Version::new(0, 5), 1);
    manager.add_tablet(7, 1, &fresher, true, false).unwrap();
    let current = manager.get_tablet(7, 1, false).unwrap();
    assert_eq!(current.max_version(), Version::new(0, 5));

    // an older end version must not displace the registered tablet
    let stale = build_tablet(&store2, 7, 1, Version::new(0, 1), 1);
    let err = manager.add_tablet(7, 1, &stale, true, false).unwrap_err();
    assert!(matches!(err.kind(), StorageError::TabletExists(7, 1)));
}

#[test]
fn test_trash_sweep_gating() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = open_store(tempdir.path());
    let manager = new_manager();

    manager
        .create_tablet(&create_request(5, 2), &[store.clone()])
        .unwrap();
    let external_holder = manager.get_tablet(5, 2, false).unwrap();
    let tablet_path = external_holder.tablet_path().to_path_buf();

    manager.drop_tablet(5, 2, false).unwrap();
    assert!(manager.get_tablet(5, 2, false).is_none());
    assert!(manager.get_tablet(5, 2, true).is_some());

    // an external reference blocks physical deletion
    manager.start_trash_sweep().unwrap();
    assert!(tablet_path.is_dir());
    assert!(store.meta_store().get(5, 2).unwrap().is_some());
    assert!(manager.get_tablet(5, 2, true).is_some());

    drop(external_holder);
    manager.start_trash_sweep().unwrap();
    assert!(!tablet_path.exists());
    assert!(store.meta_store().get(5, 2).unwrap().is_none());
    assert!(manager.get_tablet(5, 2, true).is_none());

    // the schema-hash dir moved under trash/<label>/5/2
    let trashed = store.find_tablet_in_trash(5);
    assert_eq!(trashed.len(), 1);
    assert!(trashed[0].join("2").is_dir());
    assert!(trashed[0].join("2").join("5.hdr").is_file());
}

#[test]
fn test_health_probe_failure_hides_tablets() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = open_store(tempdir.path());
    let manager = new_manager();

    manager
        .create_tablet(&create_request(20, 7), &[store.clone()])
        .unwrap();
    store.health_check();
    assert!(store.is_used());
    assert!(manager.get_tablet(20, 7, false).is_some());

    // a directory sitting where the probe file goes turns every probe I/O
    // call into an error
    fs::create_dir(tempdir.path().join(".testfile")).unwrap();
    store.health_check();
    assert!(!store.is_used());
    assert!(manager.get_tablet(20, 7, false).is_none());
}

#[test]
fn test_drop_is_idempotent() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = open_store(tempdir.path());
    let manager = new_manager();

    manager
        .create_tablet(&create_request(30, 3), &[store])
        .unwrap();
    manager.drop_tablet(30, 3, false).unwrap();
    manager.drop_tablet(30, 3, false).unwrap();
    assert!(manager.get_tablet(30, 3, false).is_none());
}

#[test]
fn test_load_tablet_from_dir() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = open_store(tempdir.path());
    let manager = new_manager();
    manager
        .create_tablet(&create_request(11, 0xabc), &[store.clone()])
        .unwrap();
    let schema_hash_path = manager
        .get_tablet(11, 0xabc, false)
        .unwrap()
        .tablet_path()
        .to_path_buf();

    // a second registry loads the tablet back from its .hdr file
    let restarted = new_manager();
    restarted
        .load_tablet_from_dir(&store, 11, 0xabc, &schema_hash_path, false)
        .unwrap();
    let tablet = restarted.get_tablet(11, 0xabc, false).unwrap();
    assert_eq!(tablet.max_version(), Version::new(0, 1));
}

#[test]
fn test_load_shutdown_meta_reports_already_deleted() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = open_store(tempdir.path());
    let manager = new_manager();
    manager
        .create_tablet(&create_request(12, 9), &[store.clone()])
        .unwrap();
    manager.drop_tablet(12, 9, false).unwrap();
    let blob = store.meta_store().get(12, 9).unwrap().unwrap();

    let restarted = new_manager();
    let err = restarted
        .load_tablet_from_meta(&store, 12, 9, &blob, false, false)
        .unwrap_err();
    assert!(matches!(
        err.kind(),
        StorageError::TabletAlreadyDeleted(12, 9)
    ));
}

#[test]
fn test_schema_change_lock() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = open_store(tempdir.path());
    let manager = new_manager();
    manager
        .create_tablet(&create_request(40, 4), &[store])
        .unwrap();

    assert!(manager.try_schema_change_lock(40));
    assert!(!manager.try_schema_change_lock(40));
    manager.release_schema_change_lock(40);
    assert!(manager.try_schema_change_lock(40));
    manager.release_schema_change_lock(40);

    // unknown ids log a warning but never lock
    assert!(!manager.try_schema_change_lock(999));
    manager.release_schema_change_lock(999);
}

#[test]
fn test_path_parsing() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = open_store(tempdir.path());
    let stores = vec![store];
    let root = tempdir.path().to_string_lossy().into_owned();

    let path = format!("{}/data/3/42/2748/15_1.dat", root);
    assert_eq!(
        TabletManager::get_tablet_id_and_schema_hash_from_path(&stores, &path),
        Some((42, Some(2748)))
    );
    let path = format!("{}/data/3/42", root);
    assert_eq!(
        TabletManager::get_tablet_id_and_schema_hash_from_path(&stores, &path),
        Some((42, None))
    );
    assert_eq!(
        TabletManager::get_tablet_id_and_schema_hash_from_path(&stores, "/elsewhere/data/3/42"),
        None
    );

    assert_eq!(
        TabletManager::get_rowset_id_from_path("/store/data/3/42/2748/15_1.dat"),
        Some(15)
    );
    assert_eq!(
        TabletManager::get_rowset_id_from_path("/store/data/3/42/2748/header"),
        None
    );
}

#[test]
fn test_compaction_candidate_selection() {
    let tempdir = tempfile::tempdir().unwrap();
    let store = open_store(tempdir.path());
    let manager = new_manager();

    manager
        .create_tablet(&create_request(50, 5), &[store.clone()])
        .unwrap();
    manager
        .create_tablet(&create_request(51, 5), &[store.clone()])
        .unwrap();

    // give tablet 51 a deeper cumulative stack
    let tablet = manager.get_tablet(51, 5, false).unwrap();
    for version in 2..5 {
        let rowset_id = store.next_rowset_id().unwrap();
        let mut writer = RowsetWriter::new();
        writer
            .init(RowsetWriterContext {
                rowset_id,
                tablet_id: 51,
                partition_id: 2,
                tablet_schema_hash: 5,
                rowset_path_prefix: tablet.tablet_path().to_path_buf(),
                schema: tablet.schema(),
                rowset_state: RowsetState::Visible,
                version: Version::new(version, version),
                version_hash: version as u64,
                txn_id: None,
                load_id: None,
            })
            .unwrap();
        writer.flush().unwrap();
        tablet.add_rowset(writer.build().unwrap()).unwrap();
    }

    let best = manager
        .find_best_tablet_to_compaction(tabletstore::types::CompactionType::Cumulative)
        .unwrap();
    assert_eq!(best.tablet_id(), 51);
}
