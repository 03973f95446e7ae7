//! SQLite connector.
//!
//! SQLite keeps no query log or usage counters, so most diagnostics are
//! derived: candidate slow statements are timed against large tables, index
//! usage is measured with forced `INDEXED BY` scans, and space figures come
//! from pragmas and the `dbstat` virtual table. The file is opened read-only.

use rusqlite::{Connection, OpenFlags};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::{
    Backend, CacheScope, Capabilities, Connector, ConnectorError, FetchOptions, ResourceUsage,
};
use crate::analysis::fields::{Row, Scalar};
use crate::analysis::records::DATABASE_SENTINEL;
use crate::fmt::thousands;

/// Tables smaller than this are not worth probing for slow scans.
const SLOW_PROBE_MIN_ROWS: i64 = 5_000;
/// Probes faster than this are noise.
const SLOW_PROBE_FLOOR_MS: f64 = 1.0;
/// Unindexed tables smaller than this are not reported.
const MISSING_INDEX_MIN_ROWS: i64 = 1_000;
/// Tables must occupy more than this to get a size row.
const TABLE_SIZE_MIN_MB: f64 = 0.5;
const EXPENSIVE_PROBE_MIN_ROWS: i64 = 10_000;
/// Fixed floor for expensive-pattern probes. The configured long-running
/// threshold is meant for server sessions and would hide every probe here.
const EXPENSIVE_PROBE_FLOOR_MS: f64 = 5.0;
const EXPENSIVE_PROBE_MAX_ROWS: usize = 10;

const SLOW_PROBES: &[(&str, &str)] = &[
    ("SELECT COUNT(*) FROM {t} WHERE rowid > 0", "Full COUNT scan"),
    ("SELECT * FROM {t} ORDER BY rowid DESC LIMIT 100", "Full ORDER BY scan"),
];

const EXPENSIVE_PROBES: &[(&str, &str)] = &[
    (
        "SELECT * FROM {t} WHERE typeof(rowid) != 'integer'",
        "Type-cast full scan",
    ),
    (
        "SELECT a.rowid FROM {t} a, {t} b WHERE a.rowid != b.rowid LIMIT 1000",
        "Cartesian join scan",
    ),
];

pub struct SqliteConnector {
    conn: Option<Connection>,
    path: PathBuf,
    target: String,
    options: FetchOptions,
}

impl SqliteConnector {
    pub fn open(path: &Path, options: FetchOptions) -> Result<Self, ConnectorError> {
        if !path.exists() {
            return Err(ConnectorError::NotFound(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;
        // Opening is lazy; reading the schema rejects files that are not databases.
        conn.pragma_query_value(None, "schema_version", |row| row.get::<_, i64>(0))
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;
        info!(path = %path.display(), "opened SQLite database");

        Ok(Self {
            conn: Some(conn),
            path: path.to_path_buf(),
            target: path.display().to_string(),
            options,
        })
    }

    /// Runs one diagnostic. Failures are logged and yield the default value.
    fn probe<T: Default>(
        &self,
        diagnostic: &str,
        f: impl FnOnce(&Connection, &Path) -> rusqlite::Result<T>,
    ) -> T {
        let Some(conn) = self.conn.as_ref() else {
            return T::default();
        };
        match f(conn, &self.path) {
            Ok(v) => v,
            Err(e) => {
                warn!(diagnostic, error = %e, "probe failed");
                T::default()
            }
        }
    }
}

impl Connector for SqliteConnector {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { index_usage: true }
    }

    fn slow_queries(&mut self) -> Vec<Row> {
        let limit = self.options.slow_query_limit;
        self.probe("slow_queries", |conn, _| slow_queries(conn, limit))
    }

    fn missing_indexes(&mut self) -> Vec<Row> {
        self.probe("missing_indexes", |conn, _| missing_indexes(conn))
    }

    fn table_bloat(&mut self) -> Vec<Row> {
        self.probe("table_bloat", table_bloat)
    }

    fn resource_usage(&mut self) -> ResourceUsage {
        self.probe("resource_usage", resource_usage)
    }

    fn index_usage(&mut self) -> Vec<Row> {
        self.probe("index_usage", |conn, _| index_usage(conn))
    }

    fn long_running(&mut self) -> Vec<Row> {
        self.probe("long_running", |conn, _| expensive_patterns(conn))
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Err((_, e)) = conn.close()
        {
            warn!(error = %e, "error closing database");
        }
    }
}

// ============================================================
// Probes
// ============================================================

fn slow_queries(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<Row>> {
    let indexed = indexed_tables(conn)?;
    let mut results = Vec::new();

    for table in table_names(conn)? {
        let Some(count) = readable_row_count(conn, &table) else {
            continue;
        };
        if count < SLOW_PROBE_MIN_ROWS {
            continue;
        }
        for (template, label) in SLOW_PROBES {
            let sql = template.replace("{t}", &quote_ident(&table));
            let Some(elapsed) = time_query(conn, &sql) else {
                continue;
            };
            let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
            if elapsed_ms < SLOW_PROBE_FLOOR_MS {
                continue;
            }
            results.push(
                Row::new()
                    .with("query", format!("{label} on {table}"))
                    .with("mean_ms", round_to(elapsed_ms, 2))
                    .with("calls", 1)
                    .with("rows", count)
                    .with("table", table.as_str())
                    .with("indexed", indexed.contains(&table)),
            );
        }
        if results.len() >= limit {
            break;
        }
    }

    results.sort_by(|a, b| mean_ms(b).total_cmp(&mean_ms(a)));
    results.truncate(limit);
    Ok(results)
}

fn missing_indexes(conn: &Connection) -> rusqlite::Result<Vec<Row>> {
    let indexed = indexed_tables(conn)?;
    let mut issues = Vec::new();

    for table in table_names(conn)? {
        if indexed.contains(&table) {
            continue;
        }
        let Some(count) = readable_row_count(conn, &table) else {
            continue;
        };
        if count < MISSING_INDEX_MIN_ROWS {
            continue;
        }
        issues.push(
            Row::new()
                .with("table_name", table.as_str())
                .with("seq_scan", count)
                .with(
                    "scan_detail",
                    format!("SCAN {table} (~{} rows, no non-PK index)", thousands(count)),
                ),
        );
    }
    Ok(issues)
}

fn table_bloat(conn: &Connection, path: &Path) -> rusqlite::Result<Vec<Row>> {
    let page_size = pragma_i64(conn, "page_size")?;
    let page_count = pragma_i64(conn, "page_count")?;
    let freelist = pragma_i64(conn, "freelist_count")?;
    let file_size = file_size(path);

    let mut rows = vec![
        Row::new()
            .with("table_name", DATABASE_SENTINEL)
            .with(
                "dead_pct",
                round_to(freelist as f64 * 100.0 / page_count.max(1) as f64, 2),
            )
            .with("n_dead_tup", freelist)
            .with("n_live_tup", page_count - freelist)
            .with("wasted_mb", round_to(bytes_to_mb(freelist * page_size), 3))
            .with("total_mb", round_to(bytes_to_mb(file_size), 3)),
    ];

    for table in table_names(conn)? {
        let pages = conn.query_row(
            "SELECT COUNT(*) FROM dbstat WHERE name = ?1",
            [&table],
            |row| row.get::<_, i64>(0),
        );
        // dbstat is a compile-time option; without it there are no size rows.
        let pages = match pages {
            Ok(p) => p,
            Err(e) => {
                debug!(table = %table, error = %e, "dbstat unavailable");
                continue;
            }
        };
        let size_mb = round_to(bytes_to_mb(pages * page_size), 3);
        if size_mb <= TABLE_SIZE_MIN_MB {
            continue;
        }
        let Some(count) = readable_row_count(conn, &table) else {
            continue;
        };
        rows.push(
            Row::new()
                .with("table_name", table.as_str())
                .with("dead_pct", 0.0)
                .with("n_dead_tup", 0)
                .with("n_live_tup", count)
                .with("size_mb", size_mb),
        );
    }
    Ok(rows)
}

fn resource_usage(conn: &Connection, path: &Path) -> rusqlite::Result<ResourceUsage> {
    let page_size = pragma_i64(conn, "page_size")?;
    let cache_size = pragma_i64(conn, "cache_size")?;
    let freelist = pragma_i64(conn, "freelist_count")?;
    let journal: String = conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;
    let file_size = file_size(path);

    // Negative cache_size is in KiB, positive is in pages.
    let cache_kb = if cache_size < 0 {
        cache_size.abs()
    } else {
        cache_size * page_size / 1024
    };
    let db_kb = file_size as f64 / 1024.0;
    let coverage_pct = round_to((cache_kb as f64 / db_kb.max(1.0) * 100.0).min(100.0), 1);

    Ok(ResourceUsage {
        cache_hit_pct: Some(coverage_pct),
        cache_scope: CacheScope::FileCoverage,
        journal_mode: Some(journal),
        freelist_pages: Some(freelist),
        blocked_queries: Some(0),
        extra: Row::new()
            .with("file_size_mb", round_to(bytes_to_mb(file_size), 3))
            .with("page_size_bytes", page_size)
            .with("cache_size_kb", cache_kb),
        ..ResourceUsage::default()
    })
}

fn index_usage(conn: &Connection) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(
        "SELECT name, tbl_name FROM sqlite_master \
         WHERE type = 'index' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let indexes = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut results = Vec::with_capacity(indexes.len());
    for (index, table) in indexes {
        let columns = index_columns(conn, &index).unwrap_or_default();
        let Some(count) = readable_row_count(conn, &table) else {
            continue;
        };
        let sql = format!(
            "SELECT COUNT(*) FROM {} INDEXED BY {}",
            quote_ident(&table),
            quote_ident(&index)
        );
        let scan_ms = time_query(conn, &sql)
            .map(|d| Scalar::Float(round_to(d.as_secs_f64() * 1000.0, 2)))
            .unwrap_or(Scalar::Null);

        results.push(
            Row::new()
                .with("index_name", index.as_str())
                .with("table_name", table.as_str())
                .with("columns", columns.join(", "))
                .with("table_rows", count)
                .with("scan_ms", scan_ms),
        );
    }
    Ok(results)
}

/// Times known-expensive statement shapes against the largest tables.
fn expensive_patterns(conn: &Connection) -> rusqlite::Result<Vec<Row>> {
    let mut results: Vec<(f64, Row)> = Vec::new();

    for table in table_names(conn)? {
        let Some(count) = readable_row_count(conn, &table) else {
            continue;
        };
        if count < EXPENSIVE_PROBE_MIN_ROWS {
            continue;
        }
        for (template, label) in EXPENSIVE_PROBES {
            let sql = template.replace("{t}", &quote_ident(&table));
            let Some(elapsed) = time_query(conn, &sql) else {
                continue;
            };
            let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
            if elapsed_ms < EXPENSIVE_PROBE_FLOOR_MS {
                continue;
            }
            let row = Row::new()
                .with("query", format!("{label} on {table}"))
                .with("duration", format!("{elapsed_ms:.0} ms"))
                .with("elapsed_ms", elapsed_ms)
                .with("rows_scanned", count);
            results.push((elapsed_ms, row));
        }
    }

    results.sort_by(|a, b| b.0.total_cmp(&a.0));
    Ok(results
        .into_iter()
        .take(EXPENSIVE_PROBE_MAX_ROWS)
        .map(|(_, row)| row)
        .collect())
}

// ============================================================
// Helpers
// ============================================================

fn table_names(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    stmt.query_map([], |row| row.get::<_, String>(0))?
        .collect()
}

/// Tables with at least one user-created index.
fn indexed_tables(conn: &Connection) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT tbl_name FROM sqlite_master \
         WHERE type = 'index' AND name NOT LIKE 'sqlite_%'",
    )?;
    stmt.query_map([], |row| row.get::<_, String>(0))?
        .collect()
}

fn index_columns(conn: &Connection, index: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    let names = stmt
        .query_map([index], |row| row.get::<_, Option<String>>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    // Expression columns have no name.
    Ok(names.into_iter().flatten().collect())
}

fn row_count(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
        [],
        |row| row.get(0),
    )
}

/// Row count, or `None` for a table that cannot be read (e.g. a virtual
/// table whose module is not loaded). Such tables are skipped, not fatal.
fn readable_row_count(conn: &Connection, table: &str) -> Option<i64> {
    match row_count(conn, table) {
        Ok(n) => Some(n),
        Err(e) => {
            warn!(table, error = %e, "table unreadable, skipped");
            None
        }
    }
}

fn pragma_i64(conn: &Connection, name: &str) -> rusqlite::Result<i64> {
    conn.pragma_query_value(None, name, |row| row.get(0))
}

/// Runs `sql` to completion. `None` if it fails at any point.
fn time_query(conn: &Connection, sql: &str) -> Option<Duration> {
    let start = Instant::now();
    let mut stmt = conn.prepare(sql).ok()?;
    let mut rows = stmt.query([]).ok()?;
    loop {
        match rows.next() {
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                debug!(sql, error = %e, "probe statement failed");
                return None;
            }
        }
    }
    Some(start.elapsed())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn file_size(path: &Path) -> i64 {
    fs::metadata(path)
        .map(|m| i64::try_from(m.len()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

fn bytes_to_mb(bytes: i64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

fn round_to(v: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (v * factor).round() / factor
}

fn mean_ms(row: &Row) -> f64 {
    row.get("mean_ms").and_then(Scalar::as_f64).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::records::BloatRecord;
    use crate::analysis::{Analyzer, Category, Severity};
    use std::io::Write;

    /// `events` (1,500 rows, no index), `users` (2,000 rows, indexed on
    /// email) and `small` (10 rows).
    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let mut conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE events (id INTEGER PRIMARY KEY, kind TEXT);
             CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT);
             CREATE INDEX idx_users_email ON users (email);
             CREATE TABLE small (id INTEGER PRIMARY KEY);",
        )
        .unwrap();
        let tx = conn.transaction().unwrap();
        {
            let mut stmt = tx.prepare("INSERT INTO events (kind) VALUES (?1)").unwrap();
            for i in 0..1500 {
                stmt.execute([format!("kind-{}", i % 7)]).unwrap();
            }
            let mut stmt = tx.prepare("INSERT INTO users (email) VALUES (?1)").unwrap();
            for i in 0..2000 {
                stmt.execute([format!("user{i}@example.com")]).unwrap();
            }
            let mut stmt = tx.prepare("INSERT INTO small DEFAULT VALUES").unwrap();
            for _ in 0..10 {
                stmt.execute([]).unwrap();
            }
        }
        tx.commit().unwrap();
        conn.close().unwrap();
        (dir, path)
    }

    /// Adds `ghost`, a virtual table whose module is not available, so
    /// every read of it fails.
    fn add_unreadable_table(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "PRAGMA writable_schema = ON;
             INSERT INTO sqlite_master (type, name, tbl_name, rootpage, sql)
             VALUES ('table', 'ghost', 'ghost', 0, 'CREATE VIRTUAL TABLE ghost USING nosuchmodule()');
             PRAGMA writable_schema = OFF;",
        )
        .unwrap();
        conn.close().unwrap();
    }

    #[test]
    fn unreadable_table_is_skipped_not_fatal() {
        let (_dir, path) = fixture();
        add_unreadable_table(&path);
        let mut conn = SqliteConnector::open(&path, FetchOptions::default()).unwrap();
        assert!(row_count(conn.conn.as_ref().unwrap(), "ghost").is_err());

        let missing = conn.missing_indexes();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].get("table_name"), Some(&Scalar::from("events")));

        let bloat = conn.table_bloat();
        assert!(matches!(
            BloatRecord::from_row(&bloat[0]),
            Some(BloatRecord::Database { .. })
        ));
        assert_eq!(conn.index_usage().len(), 1);
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = SqliteConnector::open(Path::new("/nonexistent/app.db"), FetchOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::NotFound(_)));
    }

    #[test]
    fn non_database_file_fails_to_open() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[b'x'; 4096]).unwrap();
        let err = SqliteConnector::open(file.path(), FetchOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, ConnectorError::Connection(_)));
    }

    #[test]
    fn unindexed_large_tables_are_reported() {
        let (_dir, path) = fixture();
        let mut conn = SqliteConnector::open(&path, FetchOptions::default()).unwrap();
        let rows = conn.missing_indexes();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("table_name"), Some(&Scalar::from("events")));
        assert_eq!(rows[0].get("seq_scan"), Some(&Scalar::Int(1500)));
        assert_eq!(
            rows[0].get("scan_detail"),
            Some(&Scalar::from("SCAN events (~1,500 rows, no non-PK index)"))
        );
    }

    #[test]
    fn bloat_starts_with_database_summary() {
        let (_dir, path) = fixture();
        let mut conn = SqliteConnector::open(&path, FetchOptions::default()).unwrap();
        let rows = conn.table_bloat();
        assert!(!rows.is_empty());
        match BloatRecord::from_row(&rows[0]) {
            Some(BloatRecord::Database { freelist_pages, .. }) => assert_eq!(freelist_pages, 0),
            other => panic!("expected database summary, got {other:?}"),
        }
    }

    #[test]
    fn resource_usage_reports_cache_coverage() {
        let (_dir, path) = fixture();
        let mut conn = SqliteConnector::open(&path, FetchOptions::default()).unwrap();
        let usage = conn.resource_usage();
        assert_eq!(usage.cache_scope, CacheScope::FileCoverage);
        assert_eq!(usage.journal_mode.as_deref(), Some("delete"));
        assert_eq!(usage.blocked_queries, Some(0));
        assert_eq!(usage.freelist_pages, Some(0));
        let pct = usage.cache_hit_pct.unwrap();
        assert!((0.0..=100.0).contains(&pct));
        assert!(usage.extra.contains("page_size_bytes"));
    }

    #[test]
    fn index_usage_lists_user_indexes() {
        let (_dir, path) = fixture();
        let mut conn = SqliteConnector::open(&path, FetchOptions::default()).unwrap();
        let rows = conn.index_usage();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.get("index_name"), Some(&Scalar::from("idx_users_email")));
        assert_eq!(row.get("table_name"), Some(&Scalar::from("users")));
        assert_eq!(row.get("columns"), Some(&Scalar::from("email")));
        assert_eq!(row.get("table_rows"), Some(&Scalar::Int(2000)));
        assert!(matches!(row.get("scan_ms"), Some(Scalar::Float(_))));
    }

    #[test]
    fn small_tables_are_not_probed() {
        let (_dir, path) = fixture();
        let mut conn = SqliteConnector::open(&path, FetchOptions::default()).unwrap();
        assert!(conn.slow_queries().is_empty());
        assert!(conn.long_running().is_empty());
    }

    #[test]
    fn full_analysis_flags_unindexed_table() {
        let (_dir, path) = fixture();
        let mut conn = SqliteConnector::open(&path, FetchOptions::default()).unwrap();
        let findings = Analyzer::new(&mut conn).run();
        conn.close();

        let missing: Vec<_> = findings
            .iter()
            .filter(|f| f.category == Category::MissingIndex)
            .collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].severity, Severity::Warning);
        assert_eq!(missing[0].title, "Missing index on `events`");
        assert!(
            findings
                .iter()
                .any(|f| f.category == Category::IndexUsage && f.severity == Severity::Info)
        );
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(99.96, 1), 100.0);
    }
}
