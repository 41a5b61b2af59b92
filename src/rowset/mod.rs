//! Rowsets: immutable artifacts covering a contiguous version range of a
//! tablet's data, composed of one or more segment groups.

mod column_writer;
mod rowset_writer;
mod segment_group;

use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use column_writer::ColumnDataWriter;
use parking_lot::Mutex;
pub use rowset_writer::{RowsetWriter, RowsetWriterContext};
pub use segment_group::{SegmentGroup, SegmentGroupStats};

use crate::error::StorageResult;
use crate::tablet_meta::{RowsetMeta, TabletSchema};
use crate::types::{RowsetId, Version, VersionHash};

pub struct Rowset {
    meta: RowsetMeta,
    schema: Arc<TabletSchema>,
    path_prefix: PathBuf,
    segment_groups: Vec<Arc<SegmentGroup>>,
}

impl Rowset {
    pub(crate) fn new(
        meta: RowsetMeta,
        schema: Arc<TabletSchema>,
        path_prefix: PathBuf,
        segment_groups: Vec<Arc<SegmentGroup>>,
    ) -> Rowset {
        Rowset {
            meta,
            schema,
            path_prefix,
            segment_groups,
        }
    }

    /// Rebuild a rowset handle from its persisted meta, recreating the
    /// segment-group handles with the recorded statistics.
    pub fn load(meta: RowsetMeta, schema: Arc<TabletSchema>, path_prefix: &Path) -> Rowset {
        let segment_groups = meta
            .segment_groups
            .iter()
            .map(|group_meta| {
                let group = SegmentGroup::new(
                    meta.tablet_id,
                    meta.rowset_id,
                    group_meta.segment_group_id,
                    schema.clone(),
                    path_prefix,
                );
                group.set_written(SegmentGroupStats {
                    num_segments: group_meta.num_segments,
                    num_rows: group_meta.num_rows,
                    data_size: group_meta.data_size,
                    index_size: group_meta.index_size,
                    column_stats: group_meta.column_stats.clone(),
                });
                Arc::new(group)
            })
            .collect();
        Rowset {
            meta,
            schema,
            path_prefix: path_prefix.to_path_buf(),
            segment_groups,
        }
    }

    pub fn rowset_meta(&self) -> &RowsetMeta {
        &self.meta
    }

    pub fn schema(&self) -> &Arc<TabletSchema> {
        &self.schema
    }

    pub fn path_prefix(&self) -> &Path {
        &self.path_prefix
    }

    pub fn rowset_id(&self) -> RowsetId {
        self.meta.rowset_id
    }

    pub fn version(&self) -> Version {
        self.meta.version
    }

    pub fn version_hash(&self) -> VersionHash {
        self.meta.version_hash
    }

    pub fn end_version(&self) -> i64 {
        self.meta.version.end
    }

    pub fn creation_time(&self) -> i64 {
        self.meta.creation_time
    }

    pub fn num_rows(&self) -> u64 {
        self.meta.num_rows
    }

    pub fn data_size(&self) -> u64 {
        self.meta.data_size
    }

    pub fn index_size(&self) -> u64 {
        self.meta.index_size
    }

    pub fn empty(&self) -> bool {
        self.meta.empty
    }

    pub fn is_pending(&self) -> bool {
        self.meta.is_pending()
    }

    pub fn segment_groups(&self) -> &[Arc<SegmentGroup>] {
        &self.segment_groups
    }

    /// Remove every segment-group file of this rowset.
    pub fn delete_files(&self) -> StorageResult<()> {
        for segment_group in &self.segment_groups {
            segment_group.delete_files()?;
        }
        Ok(())
    }
}

/// Rowsets that were built but never made it into a tablet. The engine's
/// garbage collector drains this queue and removes their files.
#[derive(Default)]
pub struct UnusedRowsets {
    rowsets: Mutex<Vec<Arc<Rowset>>>,
}

impl UnusedRowsets {
    pub fn new() -> UnusedRowsets {
        UnusedRowsets::default()
    }

    pub fn add(&self, rowset: Arc<Rowset>) {
        self.rowsets.lock().push(rowset);
    }

    pub fn take_all(&self) -> Vec<Arc<Rowset>> {
        std::mem::take(&mut *self.rowsets.lock())
    }
}
