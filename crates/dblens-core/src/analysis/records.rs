//! Typed per-domain records.
//!
//! Raw rows are reconciled into these records exactly once. Units are
//! normalized here (durations to milliseconds, sizes to megabytes); checks
//! only ever see the normalized values. Fields no synonym table consumed are
//! kept in `extra`.

use super::fields::{
    self, BLOAT_TABLE, CALL_COUNT, DEAD_PCT, DEAD_ROWS, INDEX_COLUMNS, INDEX_NAME, INDEX_SCANS,
    INDEX_SCAN_TIME, INDEX_SIZE, INDEX_TABLE, INDEX_TABLE_ROWS, LIVE_ROWS, LONG_RUNNING_DURATION,
    LONG_RUNNING_QUERY, MISSING_INDEX_TABLE, POOL_NAME, POOL_USAGE, QUERY_TEXT, ROWS_SCANNED,
    Row, SCAN_COUNT, SLOW_QUERY_DURATION, Scalar, TABLE_SIZE, Unit, WASTED_MB,
};
use crate::fmt::{normalize_for_display, truncate_chars};

/// Table name connectors use for the whole-database summary row.
pub const DATABASE_SENTINEL: &str = "__database__";

/// Displayed query text is cut to this many characters.
pub const QUERY_DISPLAY_CHARS: usize = 80;

fn display_query(s: &str) -> String {
    truncate_chars(&normalize_for_display(s), QUERY_DISPLAY_CHARS)
}

// ============================================================
// Slow queries
// ============================================================

#[derive(Clone, Debug, PartialEq)]
pub struct SlowQueryRecord {
    /// Mean duration normalized to milliseconds.
    pub mean_ms: f64,
    /// Query text cut to [`QUERY_DISPLAY_CHARS`].
    pub query: String,
    /// `None` when the backend does not report call counts.
    pub calls: Option<Scalar>,
    pub rows_scanned: Option<Scalar>,
    pub extra: Row,
}

impl SlowQueryRecord {
    pub fn from_row(row: &Row) -> Option<Self> {
        if row.error().is_some() {
            return None;
        }
        let mean_ms = fields::resolve(row, SLOW_QUERY_DURATION)
            .map(|r| r.unit().to_millis(r.value.as_f64().unwrap_or(0.0)))
            .filter(|ms| ms.is_finite())
            .unwrap_or(0.0);
        let query = fields::resolve_text(row, QUERY_TEXT).unwrap_or_default();
        Some(Self {
            mean_ms,
            query: display_query(&query),
            calls: fields::resolve(row, CALL_COUNT).map(|r| r.value.clone()),
            rows_scanned: ROWS_SCANNED
                .iter()
                .find_map(|s| row.get(s.name).filter(|v| **v != Scalar::Null))
                .cloned(),
            extra: row.without(&[SLOW_QUERY_DURATION, QUERY_TEXT, CALL_COUNT, ROWS_SCANNED]),
        })
    }
}

// ============================================================
// Missing indexes
// ============================================================

#[derive(Clone, Debug, PartialEq)]
pub struct MissingIndexRecord {
    pub table: String,
    pub scans: i64,
    pub extra: Row,
}

impl MissingIndexRecord {
    pub fn from_row(row: &Row) -> Option<Self> {
        if row.error().is_some() {
            return None;
        }
        Some(Self {
            table: fields::resolve_text(row, MISSING_INDEX_TABLE).unwrap_or_default(),
            scans: fields::resolve_i64(row, SCAN_COUNT).unwrap_or(0),
            extra: row.without(&[MISSING_INDEX_TABLE, SCAN_COUNT]),
        })
    }
}

// ============================================================
// Bloat
// ============================================================

/// Space-waste figures, either for the whole database file or for one table.
#[derive(Clone, Debug, PartialEq)]
pub enum BloatRecord {
    Database {
        dead_pct: f64,
        freelist_pages: i64,
        wasted_mb: Option<f64>,
    },
    Table {
        table: String,
        dead_pct: f64,
        dead_rows: i64,
        live_rows: Option<Scalar>,
        wasted_mb: Option<f64>,
        size_mb: f64,
    },
}

impl BloatRecord {
    pub fn from_row(row: &Row) -> Option<Self> {
        if row.error().is_some() {
            return None;
        }
        let table = fields::resolve_text(row, BLOAT_TABLE).unwrap_or_else(|| "unknown".into());
        let dead_pct = fields::resolve_f64(row, DEAD_PCT).unwrap_or(0.0);
        let wasted_mb = fields::resolve_f64(row, WASTED_MB);
        let dead_rows = fields::resolve_i64(row, DEAD_ROWS).unwrap_or(0);

        if table == DATABASE_SENTINEL {
            return Some(BloatRecord::Database {
                dead_pct,
                freelist_pages: dead_rows,
                wasted_mb,
            });
        }

        let size_mb = fields::resolve(row, TABLE_SIZE)
            .and_then(|r| match r.unit() {
                Unit::Megabytes => r.value.as_f64(),
                _ => None,
            })
            .unwrap_or(0.0);
        Some(BloatRecord::Table {
            table,
            dead_pct,
            dead_rows,
            live_rows: LIVE_ROWS
                .iter()
                .find_map(|s| row.get(s.name).filter(|v| **v != Scalar::Null))
                .cloned(),
            wasted_mb,
            size_mb,
        })
    }

    pub fn dead_pct(&self) -> f64 {
        match self {
            BloatRecord::Database { dead_pct, .. } | BloatRecord::Table { dead_pct, .. } => {
                *dead_pct
            }
        }
    }

    /// Display name: the table, or the sentinel for the database summary.
    pub fn name(&self) -> &str {
        match self {
            BloatRecord::Database { .. } => DATABASE_SENTINEL,
            BloatRecord::Table { table, .. } => table,
        }
    }
}

// ============================================================
// Index usage
// ============================================================

#[derive(Clone, Debug, PartialEq)]
pub struct IndexUsageRecord {
    pub index: String,
    pub table: String,
    pub columns: String,
    pub size: String,
    /// Scan count since the last statistics reset (Postgres-style rows).
    pub scans: Option<i64>,
    /// Benchmarked full-scan time (SQLite-style rows).
    pub scan_ms: Option<f64>,
    pub table_rows: i64,
}

impl IndexUsageRecord {
    pub fn from_row(row: &Row) -> Option<Self> {
        if row.error().is_some() {
            return None;
        }
        // Scan counts of zero are the point of this record, so presence here
        // means "not null" rather than the truthiness `resolve` applies.
        let scans = INDEX_SCANS
            .iter()
            .find_map(|s| row.get(s.name))
            .and_then(Scalar::as_i64);
        let scan_ms = INDEX_SCAN_TIME
            .iter()
            .find_map(|s| row.get(s.name))
            .and_then(Scalar::as_f64);
        Some(Self {
            index: fields::resolve_text(row, INDEX_NAME).unwrap_or_default(),
            table: fields::resolve_text(row, INDEX_TABLE).unwrap_or_default(),
            columns: fields::resolve_text(row, INDEX_COLUMNS).unwrap_or_default(),
            size: fields::resolve_text(row, INDEX_SIZE).unwrap_or_default(),
            scans,
            scan_ms,
            table_rows: fields::resolve_i64(row, INDEX_TABLE_ROWS).unwrap_or(0),
        })
    }
}

// ============================================================
// Long-running operations
// ============================================================

#[derive(Clone, Debug, PartialEq)]
pub struct LongRunningRecord {
    /// Duration as the backend displays it, suffixed with `s` for bare seconds.
    pub duration: String,
    pub query: String,
}

impl LongRunningRecord {
    pub fn from_row(row: &Row) -> Option<Self> {
        if row.error().is_some() {
            return None;
        }
        let duration = match fields::resolve(row, LONG_RUNNING_DURATION) {
            Some(r) if r.unit() == Unit::Seconds && r.value.as_f64().is_some() => {
                format!("{}s", r.value)
            }
            Some(r) => r.value.to_string(),
            None => String::new(),
        };
        let query = fields::resolve_text(row, LONG_RUNNING_QUERY).unwrap_or_default();
        Some(Self {
            duration,
            query: display_query(&query),
        })
    }
}

// ============================================================
// Resource pools
// ============================================================

#[derive(Clone, Debug, PartialEq)]
pub struct PoolUsageRecord {
    pub name: String,
    pub usage: f64,
}

impl PoolUsageRecord {
    pub fn from_row(row: &Row) -> Option<Self> {
        if row.error().is_some() {
            return None;
        }
        Some(Self {
            name: fields::resolve_text(row, POOL_NAME).unwrap_or_default(),
            usage: fields::resolve_f64(row, POOL_USAGE).unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_scaled_duration_is_normalized() {
        let mysql = Row::new().with("mean_sec", 0.15).with("DIGEST_TEXT", "SELECT ?");
        let pg = Row::new().with("mean_ms", 150.0).with("query", "SELECT 1");
        let a = SlowQueryRecord::from_row(&mysql).unwrap();
        let b = SlowQueryRecord::from_row(&pg).unwrap();
        assert!((a.mean_ms - 150.0).abs() < 1e-9);
        assert!((a.mean_ms - b.mean_ms).abs() < 1e-9);
        assert_eq!(a.query, "SELECT ?");
    }

    #[test]
    fn millis_field_is_not_rescaled() {
        let mongo = Row::new().with("millis", 250).with("query", "{find: 'x'}");
        assert_eq!(SlowQueryRecord::from_row(&mongo).unwrap().mean_ms, 250.0);
    }

    #[test]
    fn overflowing_duration_is_treated_as_unparsable() {
        let row = Row::new().with("mean_sec", 1e306).with("query", "SELECT 1");
        assert_eq!(SlowQueryRecord::from_row(&row).unwrap().mean_ms, 0.0);
    }

    #[test]
    fn query_text_is_truncated_to_80_chars() {
        let long = "x".repeat(200);
        let row = Row::new().with("mean_ms", 5.0).with("query", long.as_str());
        assert_eq!(SlowQueryRecord::from_row(&row).unwrap().query.len(), 80);
    }

    #[test]
    fn missing_call_count_is_none_not_zero() {
        let row = Row::new().with("exec_sec", 1.0);
        let rec = SlowQueryRecord::from_row(&row).unwrap();
        assert_eq!(rec.calls, None);
        let row = Row::new().with("mean_sec", 1.0).with("COUNT_STAR", 12);
        assert_eq!(SlowQueryRecord::from_row(&row).unwrap().calls, Some(Scalar::Int(12)));
    }

    #[test]
    fn extra_fields_are_preserved() {
        let row = Row::new()
            .with("mean_ms", 5.0)
            .with("stddev_ms", 1.0)
            .with("pct_total", 12.5);
        let rec = SlowQueryRecord::from_row(&row).unwrap();
        assert_eq!(rec.extra.len(), 2);
    }

    #[test]
    fn missing_index_table_priority() {
        let row = Row::new()
            .with("object_name", "orders")
            .with("collection", "ignored")
            .with("full_scans", 5000);
        let rec = MissingIndexRecord::from_row(&row).unwrap();
        assert_eq!(rec.table, "orders");
        assert_eq!(rec.scans, 5000);
    }

    #[test]
    fn missing_scan_count_defaults_to_zero() {
        let row = Row::new().with("collection", "events").with("note", "only _id");
        let rec = MissingIndexRecord::from_row(&row).unwrap();
        assert_eq!(rec.table, "events");
        assert_eq!(rec.scans, 0);
    }

    #[test]
    fn collection_document_count_stands_in_for_scans() {
        let row = Row::new().with("collection", "events").with("documents", 12000);
        assert_eq!(MissingIndexRecord::from_row(&row).unwrap().scans, 12000);
    }

    #[test]
    fn sentinel_row_becomes_database_variant() {
        let row = Row::new()
            .with("table_name", DATABASE_SENTINEL)
            .with("dead_pct", 25.0)
            .with("n_dead_tup", 300)
            .with("total_mb", 40.0);
        match BloatRecord::from_row(&row).unwrap() {
            BloatRecord::Database {
                dead_pct,
                freelist_pages,
                ..
            } => {
                assert_eq!(dead_pct, 25.0);
                assert_eq!(freelist_pages, 300);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn table_bloat_resolves_size_synonyms() {
        let row = Row::new()
            .with("collection", "events")
            .with("storage_mb", 12.5)
            .with("documents", 4000);
        match BloatRecord::from_row(&row).unwrap() {
            BloatRecord::Table {
                table,
                size_mb,
                live_rows,
                ..
            } => {
                assert_eq!(table, "events");
                assert_eq!(size_mb, 12.5);
                assert_eq!(live_rows, Some(Scalar::Int(4000)));
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn information_schema_table_row_resolves() {
        let row = Row::new()
            .with("table_name", "orders")
            .with("size_mb", 1500.25)
            .with("wasted_mb", 64.0)
            .with("n_live_tup", 2_000_000)
            .with("data_mb", 1200.0);
        match BloatRecord::from_row(&row).unwrap() {
            BloatRecord::Table {
                size_mb,
                wasted_mb,
                live_rows,
                dead_pct,
                ..
            } => {
                assert_eq!(size_mb, 1500.25);
                assert_eq!(wasted_mb, Some(64.0));
                assert_eq!(live_rows, Some(Scalar::Int(2_000_000)));
                assert_eq!(dead_pct, 0.0);
            }
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn zero_index_scans_are_kept() {
        let row = Row::new()
            .with("indexrelname", "orders_idx")
            .with("relname", "orders")
            .with("idx_scan", 0);
        let rec = IndexUsageRecord::from_row(&row).unwrap();
        assert_eq!(rec.scans, Some(0));
        assert_eq!(rec.index, "orders_idx");
        assert_eq!(rec.table, "orders");
        assert_eq!(rec.scan_ms, None);
    }

    #[test]
    fn long_running_seconds_get_a_suffix() {
        let mysql = Row::new().with("TIME", 42).with("query", "UPDATE t SET x = 1");
        assert_eq!(LongRunningRecord::from_row(&mysql).unwrap().duration, "42s");
        let pg = Row::new().with("duration", "00:00:12.5").with("query", "VACUUM");
        assert_eq!(LongRunningRecord::from_row(&pg).unwrap().duration, "00:00:12.5");
    }

    #[test]
    fn error_rows_are_rejected() {
        let row = Row::new().with("error", "not authorized");
        assert!(SlowQueryRecord::from_row(&row).is_none());
        assert!(LongRunningRecord::from_row(&row).is_none());
        assert!(BloatRecord::from_row(&row).is_none());
    }
}
