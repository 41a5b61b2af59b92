//! Serializable description of one tablet: identity, schema, shard, state,
//! version history and the optional alter (schema change / rollup) task.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StorageResult, TracedStorageError};
use crate::types::{
    ColumnStat, LoadId, PartitionId, RowsetId, SchemaHash, TableId, TabletId, Version, VersionHash,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabletState {
    Running,
    Shutdown,
    Tombstoned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlterState {
    Running,
    Finished,
    Failed,
}

/// Link to the peer tablet of an in-flight schema change or rollup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterTabletTask {
    pub related_tablet_id: TabletId,
    pub related_schema_hash: SchemaHash,
    pub alter_state: AlterState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Int,
    BigInt,
    Double,
    Varchar,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub col_type: ColumnType,
    pub is_key: bool,
    pub is_nullable: bool,
    pub unique_id: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletSchema {
    pub columns: Vec<ColumnSchema>,
    pub num_rows_per_row_block: u32,
    /// First unique id that has never been handed to a column of this tablet
    /// or any of its schema-change ancestors.
    pub next_column_unique_id: u32,
}

impl TabletSchema {
    pub fn num_key_columns(&self) -> usize {
        self.columns.iter().filter(|c| c.is_key).count()
    }
}

/// Column description inside a create-tablet request; unique ids are assigned
/// by the manager when the meta is built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnRequest {
    pub name: String,
    pub col_type: ColumnType,
    pub is_key: bool,
    pub is_nullable: bool,
}

#[derive(Clone, Debug)]
pub struct CreateTabletRequest {
    pub table_id: TableId,
    pub partition_id: PartitionId,
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
    pub columns: Vec<ColumnRequest>,
    /// End version of the initial rowset, must be >= 1.
    pub version: i64,
    pub version_hash: VersionHash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowsetState {
    Preparing,
    Committed,
    Visible,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentGroupMeta {
    pub segment_group_id: i32,
    pub num_segments: u32,
    pub index_size: u64,
    pub data_size: u64,
    pub num_rows: u64,
    pub empty: bool,
    pub column_stats: Vec<ColumnStat>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSegmentGroupMeta {
    pub segment_group_id: i32,
    pub num_segments: u32,
    pub load_id: LoadId,
    pub empty: bool,
    pub column_stats: Vec<ColumnStat>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RowsetMeta {
    pub rowset_id: RowsetId,
    pub tablet_id: TabletId,
    pub tablet_schema_hash: SchemaHash,
    pub rowset_state: RowsetState,
    pub version: Version,
    pub version_hash: VersionHash,
    pub txn_id: Option<i64>,
    pub load_id: Option<LoadId>,
    pub creation_time: i64,
    pub num_rows: u64,
    pub data_size: u64,
    pub index_size: u64,
    pub empty: bool,
    pub segment_groups: Vec<SegmentGroupMeta>,
    pub pending_segment_groups: Vec<PendingSegmentGroupMeta>,
}

impl RowsetMeta {
    pub fn is_pending(&self) -> bool {
        matches!(
            self.rowset_state,
            RowsetState::Preparing | RowsetState::Committed
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TabletMeta {
    table_id: TableId,
    partition_id: PartitionId,
    tablet_id: TabletId,
    schema_hash: SchemaHash,
    shard_id: u64,
    creation_time: i64,
    cumulative_layer_point: i64,
    tablet_state: TabletState,
    schema: TabletSchema,
    pub rs_metas: Vec<RowsetMeta>,
    pub inc_rs_metas: Vec<RowsetMeta>,
    alter_task: Option<AlterTabletTask>,
}

impl TabletMeta {
    /// Build a fresh meta for a new tablet. `col_ordinal_to_unique_id` maps
    /// each request column ordinal to its assigned unique id (see the
    /// manager's assignment policy).
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        table_id: TableId,
        partition_id: PartitionId,
        tablet_id: TabletId,
        schema_hash: SchemaHash,
        shard_id: u64,
        columns: &[ColumnRequest],
        next_unique_id: u32,
        col_ordinal_to_unique_id: &HashMap<u32, u32>,
    ) -> TabletMeta {
        let columns = columns
            .iter()
            .enumerate()
            .map(|(ordinal, col)| ColumnSchema {
                name: col.name.clone(),
                col_type: col.col_type,
                is_key: col.is_key,
                is_nullable: col.is_nullable,
                unique_id: col_ordinal_to_unique_id[&(ordinal as u32)],
            })
            .collect();
        TabletMeta {
            table_id,
            partition_id,
            tablet_id,
            schema_hash,
            shard_id,
            creation_time: chrono::Utc::now().timestamp(),
            cumulative_layer_point: -1,
            tablet_state: TabletState::Running,
            schema: TabletSchema {
                columns,
                num_rows_per_row_block: 1024,
                next_column_unique_id: next_unique_id,
            },
            rs_metas: Vec::new(),
            inc_rs_metas: Vec::new(),
            alter_task: None,
        }
    }

    pub fn deserialize(blob: &[u8]) -> StorageResult<TabletMeta> {
        serde_json::from_slice(blob)
            .map_err(|e| TracedStorageError::header_parse(format!("tablet meta: {}", e)))
    }

    pub fn serialize(&self) -> StorageResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Write a `<tablet_id>.hdr` snapshot of this meta into `dir`.
    pub fn save(&self, dir: &Path) -> StorageResult<()> {
        let path = dir.join(format!("{}.hdr", self.tablet_id));
        let blob = self.serialize()?;
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.write_all(&blob)?;
        file.sync_data()?;
        Ok(())
    }

    /// Read a meta back from a `.hdr` file written by [`TabletMeta::save`].
    pub fn create_from_file(path: &Path) -> StorageResult<TabletMeta> {
        let blob = fs::read(path)?;
        TabletMeta::deserialize(&blob)
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    pub fn tablet_id(&self) -> TabletId {
        self.tablet_id
    }

    pub fn schema_hash(&self) -> SchemaHash {
        self.schema_hash
    }

    pub fn shard_id(&self) -> u64 {
        self.shard_id
    }

    /// Rewrites the shard, e.g. when a snapshot is loaded from a relocated
    /// directory.
    pub fn set_shard_id(&mut self, shard_id: u64) {
        self.shard_id = shard_id;
    }

    pub fn creation_time(&self) -> i64 {
        self.creation_time
    }

    pub fn set_creation_time(&mut self, creation_time: i64) {
        self.creation_time = creation_time;
    }

    pub fn cumulative_layer_point(&self) -> i64 {
        self.cumulative_layer_point
    }

    pub fn set_cumulative_layer_point(&mut self, point: i64) {
        self.cumulative_layer_point = point;
    }

    pub fn tablet_state(&self) -> TabletState {
        self.tablet_state
    }

    pub fn set_tablet_state(&mut self, state: TabletState) {
        self.tablet_state = state;
    }

    pub fn schema(&self) -> &TabletSchema {
        &self.schema
    }

    pub fn alter_task(&self) -> Option<&AlterTabletTask> {
        self.alter_task.as_ref()
    }

    pub fn set_alter_task(&mut self, task: Option<AlterTabletTask>) {
        self.alter_task = task;
    }

    /// Version of the rowset with the highest end version, or the sentinel
    /// when no rowset exists.
    pub fn max_version(&self) -> Version {
        self.rs_metas
            .iter()
            .map(|m| m.version)
            .max_by_key(|v| v.end)
            .unwrap_or_else(Version::none)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_column_request_schema() -> Vec<ColumnRequest> {
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

    fn sample_meta() -> TabletMeta {
        let columns = two_column_request_schema();
        let map = HashMap::from([(0, 0), (1, 1)]);
        let mut meta = TabletMeta::create(1, 2, 10, 0xabc, 0, &columns, 2, &map);
        meta.rs_metas.push(RowsetMeta {
            rowset_id: 5,
            tablet_id: 10,
            tablet_schema_hash: 0xabc,
            rowset_state: RowsetState::Visible,
            version: Version::new(0, 1),
            version_hash: 99,
            txn_id: None,
            load_id: None,
            creation_time: 1000,
            num_rows: 0,
            data_size: 0,
            index_size: 0,
            empty: true,
            segment_groups: vec![SegmentGroupMeta::default()],
            pending_segment_groups: Vec::new(),
        });
        meta.set_alter_task(Some(AlterTabletTask {
            related_tablet_id: 10,
            related_schema_hash: 0xdef,
            alter_state: AlterState::Running,
        }));
        meta
    }

    #[test]
    fn test_serialize_round_trip() {
        let meta = sample_meta();
        let blob = meta.serialize().unwrap();
        let parsed = TabletMeta::deserialize(&blob).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_deserialize_garbage() {
        let err = TabletMeta::deserialize(b"{not json").unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::StorageError::HeaderParse(_)
        ));
    }

    #[test]
    fn test_save_and_reload_hdr() {
        let tempdir = tempfile::tempdir().unwrap();
        let meta = sample_meta();
        meta.save(tempdir.path()).unwrap();
        let path = tempdir.path().join("10.hdr");
        assert!(path.is_file());
        let parsed = TabletMeta::create_from_file(&path).unwrap();
        assert_eq!(parsed, meta);
    }

    #[test]
    fn test_max_version() {
        let meta = sample_meta();
        assert_eq!(meta.max_version(), Version::new(0, 1));

        let columns = two_column_request_schema();
        let map = HashMap::from([(0, 0), (1, 1)]);
        let empty = TabletMeta::create(1, 2, 11, 0xabc, 0, &columns, 2, &map);
        assert_eq!(empty.max_version(), Version::none());
    }
}
