//! MySQL / MariaDB connector.
//!
//! Reads `performance_schema` for statement digests and per-table read
//! counts, `information_schema` for table sizes and the process list, and
//! `SHOW GLOBAL STATUS` for the InnoDB buffer pool. Statement digests need
//! `performance_schema = ON`; without it those diagnostics return no rows.

use mysql::prelude::Queryable;
use mysql::{Conn, OptsBuilder, Params, Row as MyRow, Value};
use tracing::{debug, info, warn};

use super::{Backend, CacheScope, Connector, ConnectorError, FetchOptions, ResourceUsage};
use crate::analysis::fields::{Row, Scalar};

const SLOW_QUERIES: &str = "\
SELECT DIGEST_TEXT AS query,
       COUNT_STAR AS calls,
       ROUND(SUM_TIMER_WAIT / 1e12, 4) AS total_sec,
       ROUND(AVG_TIMER_WAIT / 1e12, 4) AS mean_sec,
       SUM_ROWS_EXAMINED AS rows_examined,
       SUM_ROWS_SENT AS rows_sent
FROM performance_schema.events_statements_summary_by_digest
WHERE DIGEST_TEXT IS NOT NULL
ORDER BY AVG_TIMER_WAIT DESC
LIMIT ?";

const MISSING_INDEXES: &str = "\
SELECT object_schema AS schema_name,
       object_name AS table_name,
       count_read AS full_scans
FROM performance_schema.table_io_waits_summary_by_table
WHERE count_read > 1000
  AND object_schema NOT IN ('mysql', 'performance_schema', 'sys')
ORDER BY count_read DESC
LIMIT 20";

/// `size_mb` is data plus indexes; `wasted_mb` is the allocated but free
/// space InnoDB reports in `data_free`.
const TABLE_SIZES: &str = "\
SELECT table_schema,
       table_name,
       ROUND((data_length + index_length) / 1024 / 1024, 2) AS size_mb,
       ROUND(data_length / 1024 / 1024, 2) AS data_mb,
       ROUND(index_length / 1024 / 1024, 2) AS index_mb,
       ROUND(data_free / 1024 / 1024, 2) AS wasted_mb,
       table_rows AS n_live_tup
FROM information_schema.tables
WHERE table_schema NOT IN ('information_schema', 'mysql', 'performance_schema', 'sys')
  AND table_type = 'BASE TABLE'
ORDER BY data_length + index_length DESC
LIMIT 20";

const GLOBAL_STATUS: &str = "\
SHOW GLOBAL STATUS WHERE Variable_name IN (
    'Threads_connected', 'Threads_running', 'Slow_queries', 'Questions',
    'Innodb_buffer_pool_read_requests', 'Innodb_buffer_pool_reads')";

const VARIABLES: &str = "\
SHOW VARIABLES WHERE Variable_name IN (
    'max_connections', 'innodb_buffer_pool_size', 'query_cache_size')";

const BLOCKED: &str = "\
SELECT COUNT(*) AS blocked_queries
FROM information_schema.PROCESSLIST
WHERE STATE LIKE 'Waiting for%lock%'";

const LONG_RUNNING: &str = "\
SELECT ID, USER, HOST, DB, COMMAND, TIME, STATE, LEFT(INFO, 120) AS query
FROM information_schema.PROCESSLIST
WHERE COMMAND NOT IN ('Sleep', 'Daemon', 'Binlog Dump')
  AND TIME >= ?
ORDER BY TIME DESC";

/// Connection settings for [`MySqlConnector::connect`].
#[derive(Clone, Debug)]
pub struct MySqlParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl Default for MySqlParams {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: None,
            database: None,
        }
    }
}

impl MySqlParams {
    /// `host:port/database`, without credentials.
    pub fn target(&self) -> String {
        format!(
            "{}:{}/{}",
            self.host,
            self.port,
            self.database.as_deref().unwrap_or("")
        )
    }
}

pub struct MySqlConnector {
    conn: Option<Conn>,
    target: String,
    options: FetchOptions,
}

impl MySqlConnector {
    pub fn connect(params: &MySqlParams, options: FetchOptions) -> Result<Self, ConnectorError> {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(params.host.as_str()))
            .tcp_port(params.port)
            .user(Some(params.user.as_str()))
            .pass(params.password.as_deref())
            .db_name(params.database.as_deref());
        let conn = Conn::new(opts).map_err(|e| ConnectorError::Connection(e.to_string()))?;

        let target = params.target();
        info!(db = %target, server_version = ?conn.server_version(), "connected to MySQL");
        Ok(Self {
            conn: Some(conn),
            target,
            options,
        })
    }

    /// Runs one diagnostic statement. Failures are logged and yield no rows.
    fn query_rows(&mut self, diagnostic: &str, sql: &str, params: Params) -> Vec<Row> {
        let Some(conn) = self.conn.as_mut() else {
            return Vec::new();
        };
        let result = if matches!(params, Params::Empty) {
            conn.query::<MyRow, _>(sql)
        } else {
            conn.exec::<MyRow, _, _>(sql, params)
        };
        match result {
            Ok(rows) => {
                debug!(diagnostic, rows = rows.len(), "query finished");
                rows.iter().map(convert_row).collect()
            }
            Err(e) => {
                warn!(diagnostic, error = %e, "query failed");
                Vec::new()
            }
        }
    }

    /// `SHOW ... WHERE Variable_name IN (...)` as a name to value row.
    fn name_value_rows(&mut self, diagnostic: &str, sql: &str) -> Row {
        self.query_rows(diagnostic, sql, Params::Empty)
            .into_iter()
            .filter_map(|row| {
                let name = row.get("Variable_name")?.as_str()?.to_ascii_lowercase();
                Some((name, row.get("Value").cloned().unwrap_or(Scalar::Null)))
            })
            .collect()
    }
}

impl Connector for MySqlConnector {
    fn backend(&self) -> Backend {
        Backend::MySql
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn slow_queries(&mut self) -> Vec<Row> {
        let limit = u64::try_from(self.options.slow_query_limit).unwrap_or(u64::MAX);
        self.query_rows("slow_queries", SLOW_QUERIES, Params::from((limit,)))
    }

    fn missing_indexes(&mut self) -> Vec<Row> {
        self.query_rows("missing_indexes", MISSING_INDEXES, Params::Empty)
    }

    fn table_bloat(&mut self) -> Vec<Row> {
        self.query_rows("table_bloat", TABLE_SIZES, Params::Empty)
    }

    fn resource_usage(&mut self) -> ResourceUsage {
        let status = self.name_value_rows("global_status", GLOBAL_STATUS);
        let variables = self.name_value_rows("variables", VARIABLES);
        let blocked_queries = self
            .query_rows("locks", BLOCKED, Params::Empty)
            .into_iter()
            .next()
            .and_then(|r| r.get("blocked_queries").and_then(Scalar::as_i64));

        let mut extra = Row::new();
        for (name, value) in status.iter().chain(variables.iter()) {
            extra.insert(name, value.clone());
        }
        ResourceUsage {
            cache_hit_pct: buffer_pool_hit_pct(&status),
            cache_scope: CacheScope::BufferPool,
            blocked_queries,
            extra,
            ..ResourceUsage::default()
        }
    }

    fn long_running(&mut self) -> Vec<Row> {
        let threshold = self.options.long_running_threshold.as_secs();
        self.query_rows("long_running", LONG_RUNNING, Params::from((threshold,)))
    }

    fn close(&mut self) {
        // Dropping the connection sends COM_QUIT.
        self.conn.take();
    }
}

/// Share of InnoDB page reads served from the buffer pool.
fn buffer_pool_hit_pct(status: &Row) -> Option<f64> {
    let requests = status
        .get("innodb_buffer_pool_read_requests")
        .and_then(Scalar::as_f64)?;
    let disk_reads = status
        .get("innodb_buffer_pool_reads")
        .and_then(Scalar::as_f64)?;
    if requests <= 0.0 {
        return None;
    }
    let pct = (1.0 - disk_reads / requests) * 100.0;
    Some((pct.clamp(0.0, 100.0) * 100.0).round() / 100.0)
}

fn convert_row(row: &MyRow) -> Row {
    row.columns_ref()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let value = row.as_ref(idx).map_or(Scalar::Null, convert_value);
            (col.name_str().into_owned(), value)
        })
        .collect()
}

/// DECIMAL and text columns arrive as bytes; numeric text becomes a number.
fn convert_value(value: &Value) -> Scalar {
    match value {
        Value::NULL => Scalar::Null,
        Value::Int(v) => Scalar::Int(*v),
        Value::UInt(v) => i64::try_from(*v).map_or(Scalar::Float(*v as f64), Scalar::Int),
        Value::Float(v) => Scalar::Float(f64::from(*v)),
        Value::Double(v) => Scalar::Float(*v),
        Value::Bytes(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            if let Ok(v) = text.parse::<i64>() {
                Scalar::Int(v)
            } else if let Ok(v) = text.parse::<f64>()
                && v.is_finite()
            {
                Scalar::Float(v)
            } else {
                Scalar::Text(text.into_owned())
            }
        }
        Value::Date(y, mo, d, h, mi, s, _) => Scalar::Text(format!(
            "{y:04}-{mo:02}-{d:02} {h:02}:{mi:02}:{s:02}"
        )),
        Value::Time(neg, days, h, mi, s, _) => {
            let sign = if *neg { "-" } else { "" };
            let hours = u32::from(*h) + days * 24;
            Scalar::Text(format!("{sign}{hours:02}:{mi:02}:{s:02}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(pairs: &[(&str, &str)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), convert_value(&Value::from(*v))))
            .collect()
    }

    #[test]
    fn decimal_bytes_become_numbers() {
        assert_eq!(convert_value(&Value::from("0.1500")), Scalar::Float(0.15));
        assert_eq!(convert_value(&Value::from("42")), Scalar::Int(42));
        assert_eq!(
            convert_value(&Value::from("SELECT * FROM `t` WHERE `id` = ?")),
            Scalar::from("SELECT * FROM `t` WHERE `id` = ?")
        );
        assert_eq!(convert_value(&Value::from("inf")), Scalar::from("inf"));
        assert_eq!(convert_value(&Value::NULL), Scalar::Null);
    }

    #[test]
    fn integers_keep_their_type() {
        assert_eq!(convert_value(&Value::Int(-3)), Scalar::Int(-3));
        assert_eq!(convert_value(&Value::UInt(7)), Scalar::Int(7));
        assert_eq!(
            convert_value(&Value::UInt(u64::MAX)),
            Scalar::Float(u64::MAX as f64)
        );
        assert_eq!(convert_value(&Value::Double(1.5)), Scalar::Float(1.5));
    }

    #[test]
    fn temporal_values_are_text() {
        assert_eq!(
            convert_value(&Value::Date(2024, 3, 9, 14, 5, 0, 0)),
            Scalar::from("2024-03-09 14:05:00")
        );
        assert_eq!(
            convert_value(&Value::Time(false, 1, 2, 3, 4, 0)),
            Scalar::from("26:03:04")
        );
    }

    #[test]
    fn buffer_pool_hit_rate_from_status() {
        let row = status(&[
            ("Innodb_buffer_pool_read_requests", "10000"),
            ("Innodb_buffer_pool_reads", "250"),
        ]);
        assert_eq!(buffer_pool_hit_pct(&row), Some(97.5));
    }

    #[test]
    fn buffer_pool_hit_rate_needs_requests() {
        let idle = status(&[
            ("Innodb_buffer_pool_read_requests", "0"),
            ("Innodb_buffer_pool_reads", "0"),
        ]);
        assert_eq!(buffer_pool_hit_pct(&idle), None);
        assert_eq!(buffer_pool_hit_pct(&Row::new()), None);
    }

    #[test]
    fn target_has_no_credentials() {
        let params = MySqlParams {
            host: "db.internal".to_string(),
            user: "app".to_string(),
            password: Some("s3cret".to_string()),
            database: Some("shop".to_string()),
            ..MySqlParams::default()
        };
        assert_eq!(params.target(), "db.internal:3306/shop");
        assert!(!params.target().contains("s3cret"));
    }

    #[test]
    fn long_running_skips_idle_sessions() {
        assert!(LONG_RUNNING.contains("'Sleep'"));
        assert!(LONG_RUNNING.contains("TIME >= ?"));
        assert!(SLOW_QUERIES.trim_end().ends_with("LIMIT ?"));
    }
}
