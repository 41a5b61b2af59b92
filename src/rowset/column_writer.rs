//! Column-data encoder over one segment group.
//!
//! Rows arrive through [`ColumnDataWriter::write`], the key cursor advances
//! via [`ColumnDataWriter::next`], and [`ColumnDataWriter::finalize`] flushes
//! the encoded columns plus the sparse short-key index to disk and records
//! the group's statistics.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use itertools::Itertools;

use crate::error::{StorageResult, TracedStorageError};
use crate::rowset::segment_group::{SegmentGroup, SegmentGroupStats};
use crate::tablet_meta::{ColumnType, TabletSchema};
use crate::types::{ColumnStat, Datum, RowCursor};

const DATA_FILE_MAGIC: &[u8; 4] = b"TSSG";

#[derive(Default)]
struct ColumnStatAcc {
    min: Option<Datum>,
    max: Option<Datum>,
    has_null: bool,
}

impl ColumnStatAcc {
    fn update(&mut self, datum: &Datum) {
        if datum.is_null() {
            self.has_null = true;
            return;
        }
        match &self.min {
            Some(min) if datum.cmp_same_kind(min).is_ge() => {}
            _ => self.min = Some(datum.clone()),
        }
        match &self.max {
            Some(max) if datum.cmp_same_kind(max).is_le() => {}
            _ => self.max = Some(datum.clone()),
        }
    }

    fn finish(&self) -> ColumnStat {
        ColumnStat {
            min: self
                .min
                .as_ref()
                .map_or_else(|| "NULL".to_string(), |d| d.to_string()),
            max: self
                .max
                .as_ref()
                .map_or_else(|| "NULL".to_string(), |d| d.to_string()),
            null_flag: self.has_null,
        }
    }
}

fn datum_matches(datum: &Datum, col_type: ColumnType, is_nullable: bool) -> bool {
    match datum {
        Datum::Null => is_nullable,
        Datum::Int(_) => col_type == ColumnType::Int,
        Datum::BigInt(_) => col_type == ColumnType::BigInt,
        Datum::Double(_) => col_type == ColumnType::Double,
        Datum::Varchar(_) => col_type == ColumnType::Varchar,
    }
}

fn encode_datum(buf: &mut Vec<u8>, datum: &Datum) {
    match datum {
        Datum::Null => buf.push(0),
        Datum::Int(v) => {
            buf.push(1);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Datum::BigInt(v) => {
            buf.push(2);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Datum::Double(v) => {
            buf.push(3);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Datum::Varchar(v) => {
            buf.push(4);
            buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
            buf.extend_from_slice(v.as_bytes());
        }
    }
}

pub struct ColumnDataWriter {
    segment_group: Arc<SegmentGroup>,
    schema: Arc<TabletSchema>,
    column_bufs: Vec<Vec<u8>>,
    stats: Vec<ColumnStatAcc>,
    short_key_index: Vec<u8>,
    row_count: u64,
}

impl ColumnDataWriter {
    pub fn new(segment_group: Arc<SegmentGroup>) -> ColumnDataWriter {
        let schema = segment_group.schema().clone();
        let num_columns = schema.columns.len();
        ColumnDataWriter {
            segment_group,
            column_bufs: vec![Vec::new(); num_columns],
            stats: (0..num_columns).map(|_| ColumnStatAcc::default()).collect(),
            short_key_index: Vec::new(),
            schema,
            row_count: 0,
        }
    }

    /// Encode one row into the per-column buffers and fold it into the
    /// statistics.
    pub fn write(&mut self, row: &RowCursor) -> StorageResult<()> {
        if row.num_columns() != self.schema.columns.len() {
            return Err(TracedStorageError::params(format!(
                "row has {} columns, schema has {}",
                row.num_columns(),
                self.schema.columns.len()
            )));
        }
        for (idx, col) in self.schema.columns.iter().enumerate() {
            let datum = row.datum(idx);
            if !datum_matches(datum, col.col_type, col.is_nullable) {
                return Err(TracedStorageError::params(format!(
                    "value {:?} does not fit column {}",
                    datum, col.name
                )));
            }
        }
        for (idx, _) in self.schema.columns.iter().enumerate() {
            let datum = row.datum(idx);
            encode_datum(&mut self.column_bufs[idx], datum);
            self.stats[idx].update(datum);
        }
        Ok(())
    }

    /// Advance the key cursor: once per row block, the key columns of the
    /// current row are recorded into the sparse short-key index.
    pub fn next(&mut self, row: &RowCursor) {
        if self.row_count % self.schema.num_rows_per_row_block as u64 == 0 {
            for (idx, col) in self.schema.columns.iter().enumerate() {
                if col.is_key {
                    encode_datum(&mut self.short_key_index, row.datum(idx));
                }
            }
        }
        self.row_count += 1;
    }

    /// Flush the encoded columns and index, then publish sizes and statistics
    /// into the segment group.
    pub fn finalize(&mut self) -> StorageResult<()> {
        let mut data = Vec::new();
        data.extend_from_slice(DATA_FILE_MAGIC);
        data.extend_from_slice(&(self.column_bufs.len() as u32).to_le_bytes());
        for buf in &self.column_bufs {
            data.extend_from_slice(&(buf.len() as u64).to_le_bytes());
            data.extend_from_slice(buf);
        }
        write_file(&self.segment_group.data_file_path(), &data)?;

        let index_size = if self.short_key_index.is_empty() {
            0
        } else {
            write_file(&self.segment_group.index_file_path(), &self.short_key_index)?;
            self.short_key_index.len() as u64
        };

        self.segment_group.set_written(SegmentGroupStats {
            num_segments: 1,
            num_rows: self.row_count,
            data_size: data.len() as u64,
            index_size,
            column_stats: self.stats.iter().map(|s| s.finish()).collect_vec(),
        });
        Ok(())
    }
}

fn write_file(path: &Path, data: &[u8]) -> StorageResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(data)?;
    file.sync_data()?;
    if let Some(parent) = path.parent() {
        File::open(parent)?.sync_data()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tablet_meta::ColumnSchema;

    fn test_schema() -> Arc<TabletSchema> {
        Arc::new(TabletSchema {
            columns: vec![
                ColumnSchema {
                    name: "k".to_string(),
                    col_type: ColumnType::Int,
                    is_key: true,
                    is_nullable: false,
                    unique_id: 0,
                },
                ColumnSchema {
                    name: "v".to_string(),
                    col_type: ColumnType::Varchar,
                    is_key: false,
                    is_nullable: true,
                    unique_id: 1,
                },
            ],
            num_rows_per_row_block: 2,
            next_column_unique_id: 2,
        })
    }

    #[test]
    fn test_write_and_finalize() {
        let tempdir = tempfile::tempdir().unwrap();
        let group = Arc::new(SegmentGroup::new(1, 7, 1, test_schema(), tempdir.path()));
        let mut writer = ColumnDataWriter::new(group.clone());

        for (k, v) in [(3, Some("c")), (1, Some("a")), (2, None)] {
            let row = RowCursor::new(vec![
                Datum::Int(k),
                v.map_or(Datum::Null, |s| Datum::Varchar(s.to_string())),
            ]);
            writer.write(&row).unwrap();
            writer.next(&row);
        }
        writer.finalize().unwrap();

        assert_eq!(group.num_rows(), 3);
        assert_eq!(group.num_segments(), 1);
        assert!(!group.empty());
        assert!(group.data_file_path().is_file());
        assert!(group.index_file_path().is_file());
        assert!(group.data_size() > 0);
        assert!(group.index_size() > 0);

        let stats = group.column_stats();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].min, "1");
        assert_eq!(stats[0].max, "3");
        assert!(!stats[0].null_flag);
        assert_eq!(stats[1].min, "a");
        assert_eq!(stats[1].max, "c");
        assert!(stats[1].null_flag);
    }

    #[test]
    fn test_empty_finalize_writes_data_file() {
        let tempdir = tempfile::tempdir().unwrap();
        let group = Arc::new(SegmentGroup::new(1, 7, 1, test_schema(), tempdir.path()));
        let mut writer = ColumnDataWriter::new(group.clone());
        writer.finalize().unwrap();
        assert!(group.empty());
        assert!(group.data_file_path().is_file());
        assert!(!group.index_file_path().exists());
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let tempdir = tempfile::tempdir().unwrap();
        let group = Arc::new(SegmentGroup::new(1, 7, 1, test_schema(), tempdir.path()));
        let mut writer = ColumnDataWriter::new(group);
        let row = RowCursor::new(vec![Datum::Null, Datum::Null]);
        // key column is not nullable
        assert!(writer.write(&row).is_err());
    }
}
