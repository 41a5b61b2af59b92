//! The unit of on-disk layout inside a rowset: a collection of row segments
//! plus per-column statistics. Shared between the writer that fills it and
//! the rowset that finally owns it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StorageResult;
use crate::tablet_meta::TabletSchema;
use crate::types::{ColumnStat, RowsetId, TabletId};

#[derive(Clone, Debug, Default)]
pub struct SegmentGroupStats {
    pub num_segments: u32,
    pub num_rows: u64,
    pub data_size: u64,
    pub index_size: u64,
    pub column_stats: Vec<ColumnStat>,
}

pub struct SegmentGroup {
    tablet_id: TabletId,
    rowset_id: RowsetId,
    segment_group_id: i32,
    path_prefix: PathBuf,
    schema: Arc<TabletSchema>,
    stats: Mutex<SegmentGroupStats>,
}

impl SegmentGroup {
    pub fn new(
        tablet_id: TabletId,
        rowset_id: RowsetId,
        segment_group_id: i32,
        schema: Arc<TabletSchema>,
        path_prefix: &Path,
    ) -> SegmentGroup {
        SegmentGroup {
            tablet_id,
            rowset_id,
            segment_group_id,
            path_prefix: path_prefix.to_path_buf(),
            schema,
            stats: Mutex::new(SegmentGroupStats::default()),
        }
    }

    pub fn tablet_id(&self) -> TabletId {
        self.tablet_id
    }

    pub fn rowset_id(&self) -> RowsetId {
        self.rowset_id
    }

    pub fn segment_group_id(&self) -> i32 {
        self.segment_group_id
    }

    pub fn schema(&self) -> &Arc<TabletSchema> {
        &self.schema
    }

    pub fn num_segments(&self) -> u32 {
        self.stats.lock().num_segments
    }

    pub fn num_rows(&self) -> u64 {
        self.stats.lock().num_rows
    }

    pub fn data_size(&self) -> u64 {
        self.stats.lock().data_size
    }

    pub fn index_size(&self) -> u64 {
        self.stats.lock().index_size
    }

    pub fn empty(&self) -> bool {
        self.stats.lock().num_rows == 0
    }

    pub fn column_stats(&self) -> Vec<ColumnStat> {
        self.stats.lock().column_stats.clone()
    }

    pub fn data_file_path(&self) -> PathBuf {
        self.path_prefix
            .join(format!("{}_{}.dat", self.rowset_id, self.segment_group_id))
    }

    pub fn index_file_path(&self) -> PathBuf {
        self.path_prefix
            .join(format!("{}_{}.idx", self.rowset_id, self.segment_group_id))
    }

    pub(crate) fn set_written(&self, stats: SegmentGroupStats) {
        *self.stats.lock() = stats;
    }

    /// Remove the group's files; absent files are fine.
    pub fn delete_files(&self) -> StorageResult<()> {
        for path in [self.data_file_path(), self.index_file_path()] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
