//! Diagnostic rows and field reconciliation.
//!
//! Every backend reports the same logical quantity under its own column name
//! and unit. Each quantity the checks read is declared once below as a
//! synonym table; [`resolve`] walks a table in priority order and returns the
//! first field that is present, together with the unit it was reported in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::connector::Backend;

// ============================================================
// Scalar
// ============================================================

/// A single loosely-typed value reported by a connector.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Whether the value counts as present for field resolution.
    ///
    /// Null, `false`, zero and empty text are treated as absent, so a
    /// backend that reports `0` under its preferred name still lets a later
    /// synonym win.
    pub fn is_present(&self) -> bool {
        match self {
            Scalar::Null => false,
            Scalar::Bool(b) => *b,
            Scalar::Int(v) => *v != 0,
            Scalar::Float(v) => *v != 0.0 && !v.is_nan(),
            Scalar::Text(s) => !s.is_empty(),
        }
    }

    /// Numeric view of the value. Numeric text is parsed; anything else is `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) if v.is_finite() => Some(*v),
            Scalar::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            Scalar::Text(s) => s
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| self.as_f64().map(|v| v as i64)),
            _ => self.as_f64().map(|v| v as i64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("n/a"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<u32> for Scalar {
    fn from(v: u32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Scalar::Null)
    }
}

// ============================================================
// Row
// ============================================================

/// Field name carried by connectors that could not run a diagnostic query.
pub const ERROR_FIELD: &str = "error";

/// One raw diagnostic record, shaped by whichever backend produced it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, Scalar>);

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<Scalar>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Scalar>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Error message if the connector degraded this row to an error marker.
    pub fn error(&self) -> Option<String> {
        self.get(ERROR_FIELD)
            .filter(|v| v.is_present())
            .map(|v| v.to_string())
    }

    /// Copy of the row without any field named in `tables`.
    pub fn without(&self, tables: &[&[Synonym]]) -> Row {
        self.0
            .iter()
            .filter(|(name, _)| {
                !tables
                    .iter()
                    .any(|t| t.iter().any(|s| s.name == name.as_str()))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<K: Into<String>, V: Into<Scalar>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Row(iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect())
    }
}

// ============================================================
// Synonym tables
// ============================================================

/// Unit a field is reported in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    Millis,
    Seconds,
    Megabytes,
    Percent,
    Count,
    Text,
}

impl Unit {
    /// Normalizes a time value to milliseconds. Non-time units pass through.
    pub fn to_millis(self, value: f64) -> f64 {
        match self {
            Unit::Seconds => value * 1000.0,
            _ => value,
        }
    }
}

/// One accepted name for a logical field.
#[derive(Debug)]
pub struct Synonym {
    pub name: &'static str,
    pub unit: Unit,
    /// Backends whose connectors emit this name.
    pub backends: &'static [Backend],
}

const fn syn(name: &'static str, unit: Unit, backends: &'static [Backend]) -> Synonym {
    Synonym {
        name,
        unit,
        backends,
    }
}

use Backend::{Mongo, MySql, Postgres, Snowflake, Sqlite};

pub const SLOW_QUERY_DURATION: &[Synonym] = &[
    syn("mean_ms", Unit::Millis, &[Postgres, Sqlite]),
    syn("mean_sec", Unit::Seconds, &[MySql]),
    syn("millis", Unit::Millis, &[Mongo]),
    syn("exec_sec", Unit::Seconds, &[Snowflake]),
];

pub const QUERY_TEXT: &[Synonym] = &[
    syn("query", Unit::Text, &[Postgres, MySql, Sqlite, Mongo]),
    syn("query_text", Unit::Text, &[Snowflake]),
    syn("DIGEST_TEXT", Unit::Text, &[MySql]),
];

pub const CALL_COUNT: &[Synonym] = &[
    syn("calls", Unit::Count, &[Postgres, MySql, Sqlite]),
    syn("COUNT_STAR", Unit::Count, &[MySql]),
];

pub const ROWS_SCANNED: &[Synonym] = &[syn("rows", Unit::Count, &[Postgres, Sqlite])];

pub const MISSING_INDEX_TABLE: &[Synonym] = &[
    syn("table_name", Unit::Text, &[Postgres, MySql, Sqlite]),
    syn("table", Unit::Text, &[Sqlite]),
    syn("object_name", Unit::Text, &[MySql]),
    syn("collection", Unit::Text, &[Mongo]),
];

pub const SCAN_COUNT: &[Synonym] = &[
    syn("seq_scan", Unit::Count, &[Postgres, Sqlite]),
    syn("full_scans", Unit::Count, &[MySql]),
    syn("partitions_scanned", Unit::Count, &[Snowflake]),
    syn("documents", Unit::Count, &[Mongo]),
];

pub const BLOAT_TABLE: &[Synonym] = &[
    syn("table_name", Unit::Text, &[Postgres, MySql, Sqlite, Snowflake]),
    syn("collection", Unit::Text, &[Mongo]),
];

pub const DEAD_PCT: &[Synonym] = &[syn("dead_pct", Unit::Percent, &[Postgres, Sqlite])];

pub const DEAD_ROWS: &[Synonym] = &[syn("n_dead_tup", Unit::Count, &[Postgres, Sqlite])];

pub const WASTED_MB: &[Synonym] = &[syn("wasted_mb", Unit::Megabytes, &[MySql, Sqlite])];

pub const TABLE_SIZE: &[Synonym] = &[
    syn("size_mb", Unit::Megabytes, &[MySql, Sqlite, Mongo, Snowflake]),
    syn("storage_mb", Unit::Megabytes, &[Mongo]),
    syn("total_mb", Unit::Megabytes, &[Sqlite]),
];

pub const LIVE_ROWS: &[Synonym] = &[
    syn("n_live_tup", Unit::Count, &[Postgres, MySql, Sqlite]),
    syn("documents", Unit::Count, &[Mongo]),
];

pub const LONG_RUNNING_DURATION: &[Synonym] = &[
    syn("duration", Unit::Text, &[Postgres, Sqlite]),
    syn("TIME", Unit::Seconds, &[MySql]),
    syn("secs_running", Unit::Seconds, &[Mongo]),
    syn("exec_sec", Unit::Seconds, &[Snowflake]),
];

pub const LONG_RUNNING_QUERY: &[Synonym] = &[
    syn("query", Unit::Text, &[Postgres, MySql, Sqlite, Mongo]),
    syn("query_text", Unit::Text, &[Snowflake]),
];

pub const INDEX_NAME: &[Synonym] = &[
    syn("index_name", Unit::Text, &[Postgres, Sqlite]),
    syn("indexrelname", Unit::Text, &[Postgres]),
];

pub const INDEX_TABLE: &[Synonym] = &[
    syn("table_name", Unit::Text, &[Postgres, Sqlite]),
    syn("relname", Unit::Text, &[Postgres]),
];

pub const INDEX_SCANS: &[Synonym] = &[syn("idx_scan", Unit::Count, &[Postgres])];

pub const INDEX_SCAN_TIME: &[Synonym] = &[syn("scan_ms", Unit::Millis, &[Sqlite])];

pub const INDEX_COLUMNS: &[Synonym] = &[syn("columns", Unit::Text, &[Sqlite])];

pub const INDEX_SIZE: &[Synonym] = &[syn("index_size", Unit::Text, &[Postgres])];

pub const INDEX_TABLE_ROWS: &[Synonym] = &[syn("table_rows", Unit::Count, &[Sqlite])];

pub const POOL_NAME: &[Synonym] = &[
    syn("warehouse_name", Unit::Text, &[Snowflake]),
    syn("WAREHOUSE_NAME", Unit::Text, &[Snowflake]),
];

pub const POOL_USAGE: &[Synonym] = &[
    syn("total_credits", Unit::Count, &[Snowflake]),
    syn("TOTAL_CREDITS", Unit::Count, &[Snowflake]),
];

// ============================================================
// Resolution
// ============================================================

/// A field found by [`resolve`].
#[derive(Debug)]
pub struct Resolved<'a> {
    pub synonym: &'static Synonym,
    pub value: &'a Scalar,
}

impl Resolved<'_> {
    pub fn name(&self) -> &'static str {
        self.synonym.name
    }

    pub fn unit(&self) -> Unit {
        self.synonym.unit
    }
}

/// Returns the first present field of `table`, in priority order.
pub fn resolve<'a>(row: &'a Row, table: &'static [Synonym]) -> Option<Resolved<'a>> {
    table.iter().find_map(|synonym| {
        row.get(synonym.name)
            .filter(|v| v.is_present())
            .map(|value| Resolved { synonym, value })
    })
}

/// First present field of `table` as a number; unparsable values yield `None`.
pub fn resolve_f64(row: &Row, table: &'static [Synonym]) -> Option<f64> {
    resolve(row, table).and_then(|r| r.value.as_f64())
}

pub fn resolve_i64(row: &Row, table: &'static [Synonym]) -> Option<i64> {
    resolve(row, table).and_then(|r| r.value.as_i64())
}

/// First present field of `table` rendered as text.
pub fn resolve_text(row: &Row, table: &'static [Synonym]) -> Option<String> {
    resolve(row, table).map(|r| r.value.to_string())
}

/// Names from `table` that `backend` emits, in priority order.
pub fn synonyms_for(table: &'static [Synonym], backend: Backend) -> Vec<&'static str> {
    table
        .iter()
        .filter(|s| s.backends.contains(&backend))
        .map(|s| s.name)
        .collect()
}
