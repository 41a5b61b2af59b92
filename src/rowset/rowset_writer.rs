//! Builder for an initial or incremental rowset.
//!
//! The writer walks `New -> Initialized -> WritingGroup -> FlushedGroup ->
//! (WritingGroup)* -> Built`. `init` opens segment group #1 together with a
//! column-data encoder; `flush` finalizes the open group and starts the next
//! one; `build` assembles the rowset meta from every accumulated group and
//! hands back a shared rowset handle.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::error::{StorageResult, TracedStorageError};
use crate::rowset::column_writer::ColumnDataWriter;
use crate::rowset::segment_group::SegmentGroup;
use crate::rowset::Rowset;
use crate::tablet_meta::{
    PendingSegmentGroupMeta, RowsetMeta, RowsetState, SegmentGroupMeta, TabletSchema,
};
use crate::types::{
    LoadId, PartitionId, RowCursor, RowsetId, SchemaHash, TabletId, Version, VersionHash,
};

#[derive(Clone, Debug)]
pub struct RowsetWriterContext {
    pub rowset_id: RowsetId,
    pub tablet_id: TabletId,
    pub partition_id: PartitionId,
    pub tablet_schema_hash: SchemaHash,
    pub rowset_path_prefix: PathBuf,
    pub schema: Arc<TabletSchema>,
    pub rowset_state: RowsetState,
    /// Carried by visible rowsets.
    pub version: Version,
    pub version_hash: VersionHash,
    /// Carried by pending rowsets (state Preparing or Committed).
    pub txn_id: Option<i64>,
    pub load_id: Option<LoadId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WriterState {
    New,
    Initialized,
    WritingGroup,
    FlushedGroup,
    Built,
}

pub struct RowsetWriter {
    state: WriterState,
    context: Option<RowsetWriterContext>,
    segment_group_id: i32,
    segment_groups: Vec<Arc<SegmentGroup>>,
    column_data_writer: Option<ColumnDataWriter>,
    is_pending: bool,
}

impl RowsetWriter {
    pub fn new() -> RowsetWriter {
        RowsetWriter {
            state: WriterState::New,
            context: None,
            segment_group_id: 0,
            segment_groups: Vec::new(),
            column_data_writer: None,
            is_pending: false,
        }
    }

    pub fn init(&mut self, context: RowsetWriterContext) -> StorageResult<()> {
        if self.state != WriterState::New {
            return Err(TracedStorageError::params("rowset writer already initialized"));
        }
        self.is_pending = matches!(
            context.rowset_state,
            RowsetState::Preparing | RowsetState::Committed
        );
        self.context = Some(context);
        self.open_segment_group();
        self.state = WriterState::Initialized;
        Ok(())
    }

    fn context(&self) -> &RowsetWriterContext {
        // set by init, which every state past New has passed through
        self.context.as_ref().unwrap()
    }

    /// Segment-group ids are assigned in creation order starting at 1.
    fn open_segment_group(&mut self) {
        self.segment_group_id += 1;
        let context = self.context.as_ref().unwrap();
        let segment_group = Arc::new(SegmentGroup::new(
            context.tablet_id,
            context.rowset_id,
            self.segment_group_id,
            context.schema.clone(),
            &context.rowset_path_prefix,
        ));
        self.segment_groups.push(segment_group.clone());
        self.column_data_writer = Some(ColumnDataWriter::new(segment_group));
    }

    /// Write one row through the encoder and advance its key cursor. Encoder
    /// failures propagate unchanged.
    pub fn add_row(&mut self, row: &RowCursor) -> StorageResult<()> {
        let writer = match self.state {
            WriterState::Initialized | WriterState::WritingGroup | WriterState::FlushedGroup => {
                // open_segment_group ran for each of these states
                self.column_data_writer.as_mut().unwrap()
            }
            _ => {
                return Err(TracedStorageError::params(
                    "rowset writer is not open for rows",
                ))
            }
        };
        if let Err(e) = writer.write(row) {
            warn!("add row failed");
            return Err(e);
        }
        writer.next(row);
        self.state = WriterState::WritingGroup;
        Ok(())
    }

    /// Finalize the current encoder and open a fresh segment group for
    /// subsequent rows.
    pub fn flush(&mut self) -> StorageResult<()> {
        let mut writer = match self.state {
            WriterState::Initialized | WriterState::WritingGroup | WriterState::FlushedGroup => {
                self.column_data_writer.take().unwrap()
            }
            _ => return Err(TracedStorageError::params("rowset writer cannot flush")),
        };
        writer.finalize()?;
        self.open_segment_group();
        self.state = WriterState::FlushedGroup;
        Ok(())
    }

    /// Assemble the rowset meta from every accumulated segment group and
    /// return the built rowset. Statistics are emitted in column order.
    pub fn build(&mut self) -> StorageResult<Arc<Rowset>> {
        if matches!(self.state, WriterState::New | WriterState::Built) {
            return Err(TracedStorageError::params("rowset writer cannot build"));
        }
        self.column_data_writer = None;

        let context = self.context().clone();
        let mut meta = RowsetMeta {
            rowset_id: context.rowset_id,
            tablet_id: context.tablet_id,
            tablet_schema_hash: context.tablet_schema_hash,
            rowset_state: context.rowset_state,
            version: if self.is_pending {
                Version::none()
            } else {
                context.version
            },
            version_hash: if self.is_pending {
                0
            } else {
                context.version_hash
            },
            txn_id: if self.is_pending { context.txn_id } else { None },
            load_id: if self.is_pending { context.load_id } else { None },
            creation_time: Utc::now().timestamp(),
            num_rows: 0,
            data_size: 0,
            index_size: 0,
            empty: true,
            segment_groups: Vec::new(),
            pending_segment_groups: Vec::new(),
        };

        for segment_group in &self.segment_groups {
            meta.num_rows += segment_group.num_rows();
            meta.data_size += segment_group.data_size();
            meta.index_size += segment_group.index_size();
            if self.is_pending {
                meta.pending_segment_groups.push(PendingSegmentGroupMeta {
                    segment_group_id: segment_group.segment_group_id(),
                    num_segments: segment_group.num_segments(),
                    load_id: context.load_id.unwrap_or_default(),
                    empty: segment_group.empty(),
                    column_stats: segment_group.column_stats(),
                });
            } else {
                meta.segment_groups.push(SegmentGroupMeta {
                    segment_group_id: segment_group.segment_group_id(),
                    num_segments: segment_group.num_segments(),
                    index_size: segment_group.index_size(),
                    data_size: segment_group.data_size(),
                    num_rows: segment_group.num_rows(),
                    empty: segment_group.empty(),
                    column_stats: segment_group.column_stats(),
                });
            }
        }
        meta.empty = meta.num_rows == 0;

        let rowset = Arc::new(Rowset::new(
            meta,
            context.schema.clone(),
            context.rowset_path_prefix.clone(),
            std::mem::take(&mut self.segment_groups),
        ));
        self.state = WriterState::Built;
        Ok(rowset)
    }
}

impl Default for RowsetWriter {
    fn default() -> RowsetWriter {
        RowsetWriter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tablet_meta::{ColumnSchema, ColumnType};
    use crate::types::Datum;

    fn test_context(dir: &std::path::Path, state: RowsetState) -> RowsetWriterContext {
        RowsetWriterContext {
            rowset_id: 3,
            tablet_id: 10,
            partition_id: 2,
            tablet_schema_hash: 0xabc,
            rowset_path_prefix: dir.to_path_buf(),
            schema: Arc::new(TabletSchema {
                columns: vec![ColumnSchema {
                    name: "a".to_string(),
                    col_type: ColumnType::Int,
                    is_key: true,
                    is_nullable: false,
                    unique_id: 0,
                }],
                num_rows_per_row_block: 1024,
                next_column_unique_id: 1,
            }),
            rowset_state: state,
            version: Version::new(0, 2),
            version_hash: 77,
            txn_id: None,
            load_id: None,
        }
    }

    #[test]
    fn test_visible_rowset_build() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut writer = RowsetWriter::new();
        writer
            .init(test_context(tempdir.path(), RowsetState::Visible))
            .unwrap();
        for v in [1, 2, 3] {
            writer.add_row(&RowCursor::new(vec![Datum::Int(v)])).unwrap();
        }
        writer.flush().unwrap();
        let rowset = writer.build().unwrap();

        assert_eq!(rowset.rowset_id(), 3);
        assert_eq!(rowset.version(), Version::new(0, 2));
        assert_eq!(rowset.version_hash(), 77);
        assert_eq!(rowset.num_rows(), 3);
        assert!(!rowset.is_pending());

        // one finalized group plus the trailing open group
        let meta = rowset.rowset_meta();
        assert_eq!(meta.segment_groups.len(), 2);
        assert_eq!(meta.segment_groups[0].segment_group_id, 1);
        assert_eq!(meta.segment_groups[1].segment_group_id, 2);
        assert!(!meta.segment_groups[0].empty);
        assert!(meta.segment_groups[1].empty);
        assert_eq!(meta.segment_groups[0].column_stats[0].min, "1");
        assert_eq!(meta.segment_groups[0].column_stats[0].max, "3");
    }

    #[test]
    fn test_pending_rowset_build() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut context = test_context(tempdir.path(), RowsetState::Preparing);
        context.txn_id = Some(555);
        context.load_id = Some(LoadId { hi: 1, lo: 2 });
        let mut writer = RowsetWriter::new();
        writer.init(context).unwrap();
        writer.add_row(&RowCursor::new(vec![Datum::Int(9)])).unwrap();
        writer.flush().unwrap();
        let rowset = writer.build().unwrap();

        assert!(rowset.is_pending());
        let meta = rowset.rowset_meta();
        assert_eq!(meta.txn_id, Some(555));
        assert_eq!(meta.load_id, Some(LoadId { hi: 1, lo: 2 }));
        assert!(meta.segment_groups.is_empty());
        assert_eq!(meta.pending_segment_groups.len(), 2);
        assert_eq!(meta.pending_segment_groups[0].load_id, LoadId { hi: 1, lo: 2 });
    }

    #[test]
    fn test_multiple_flushes_assign_monotonic_group_ids() {
        let tempdir = tempfile::tempdir().unwrap();
        let mut writer = RowsetWriter::new();
        writer
            .init(test_context(tempdir.path(), RowsetState::Visible))
            .unwrap();
        writer.add_row(&RowCursor::new(vec![Datum::Int(1)])).unwrap();
        writer.flush().unwrap();
        writer.add_row(&RowCursor::new(vec![Datum::Int(2)])).unwrap();
        writer.flush().unwrap();
        let rowset = writer.build().unwrap();
        let ids: Vec<i32> = rowset
            .rowset_meta()
            .segment_groups
            .iter()
            .map(|g| g.segment_group_id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_state_machine_misuse() {
        let mut writer = RowsetWriter::new();
        assert!(writer.add_row(&RowCursor::new(vec![Datum::Int(1)])).is_err());
        assert!(writer.flush().is_err());
        assert!(writer.build().is_err());

        let tempdir = tempfile::tempdir().unwrap();
        writer
            .init(test_context(tempdir.path(), RowsetState::Visible))
            .unwrap();
        writer.flush().unwrap();
        writer.build().unwrap();
        // built writers reject further use
        assert!(writer.build().is_err());
        assert!(writer.add_row(&RowCursor::new(vec![Datum::Int(1)])).is_err());
    }
}
