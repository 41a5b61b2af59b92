//! Small shared types used across the storage core.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

pub type TableId = i64;
pub type PartitionId = i64;
pub type TabletId = i64;
pub type SchemaHash = i32;
pub type RowsetId = u64;
pub type VersionHash = u64;

/// A contiguous version range `[begin, end]` covered by one rowset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub begin: i64,
    pub end: i64,
}

impl Version {
    pub fn new(begin: i64, end: i64) -> Version {
        Version { begin, end }
    }

    /// Sentinel for "no version at all", e.g. a tablet without rowsets.
    pub fn none() -> Version {
        Version { begin: -1, end: 0 }
    }

    pub fn overlaps(&self, other: &Version) -> bool {
        self.begin <= other.end && other.begin <= self.end
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{}]", self.begin, self.end)
    }
}

/// Identity of one physical tablet: a tablet id plus the hash of the schema
/// version it stores. Two tablets with the same id but different schema hashes
/// coexist while a schema change is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabletInfo {
    pub tablet_id: TabletId,
    pub schema_hash: SchemaHash,
}

impl TabletInfo {
    pub fn new(tablet_id: TabletId, schema_hash: SchemaHash) -> TabletInfo {
        TabletInfo {
            tablet_id,
            schema_hash,
        }
    }
}

/// Load identifier of an in-flight transaction (128 bits, hi/lo split).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadId {
    pub hi: i64,
    pub lo: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionType {
    Base,
    Cumulative,
}

/// Per-column min/max/null statistics emitted into segment-group records.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnStat {
    pub min: String,
    pub max: String,
    pub null_flag: bool,
}

/// A single cell value handed to the rowset writer.
#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    Null,
    Int(i32),
    BigInt(i64),
    Double(f64),
    Varchar(String),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    /// Total order between two datums of the same kind. Null sorts first.
    pub fn cmp_same_kind(&self, other: &Datum) -> Ordering {
        match (self, other) {
            (Datum::Null, Datum::Null) => Ordering::Equal,
            (Datum::Null, _) => Ordering::Less,
            (_, Datum::Null) => Ordering::Greater,
            (Datum::Int(a), Datum::Int(b)) => a.cmp(b),
            (Datum::BigInt(a), Datum::BigInt(b)) => a.cmp(b),
            (Datum::Double(a), Datum::Double(b)) => a.total_cmp(b),
            (Datum::Varchar(a), Datum::Varchar(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Int(v) => write!(f, "{}", v),
            Datum::BigInt(v) => write!(f, "{}", v),
            Datum::Double(v) => write!(f, "{}", v),
            Datum::Varchar(v) => write!(f, "{}", v),
        }
    }
}

/// One row of cell values, positionally aligned with the tablet schema.
#[derive(Clone, Debug)]
pub struct RowCursor {
    values: Vec<Datum>,
}

impl RowCursor {
    pub fn new(values: Vec<Datum>) -> RowCursor {
        RowCursor { values }
    }

    pub fn datum(&self, idx: usize) -> &Datum {
        &self.values[idx]
    }

    pub fn num_columns(&self) -> usize {
        self.values.len()
    }
}
