//! PostgreSQL connector.
//!
//! Reads the standard statistics views:
//! - `pg_stat_statements` — slow statements (requires the extension)
//! - `pg_stat_user_tables` — sequential scans, dead tuples, table sizes
//! - `pg_statio_user_tables` — buffer cache hit rate
//! - `pg_stat_activity` — lock waits, connections, long-running statements
//! - `pg_stat_user_indexes` — index scan counts
//!
//! A query that fails (missing extension, insufficient privileges) is logged
//! and yields no rows; the remaining diagnostics still run.

mod queries;

use postgres::types::{ToSql, Type};
use postgres::{Client, NoTls, Row as PgRow};
use tracing::{debug, info, warn};

use super::{Backend, Capabilities, Connector, ConnectorError, FetchOptions, ResourceUsage};
use crate::analysis::fields::{Row, Scalar};
use queries::{
    build_blocked_query, build_cache_hit_query, build_connections_query,
    build_database_size_query, build_index_usage_query, build_long_running_query,
    build_missing_indexes_query, build_slow_queries_query, build_table_bloat_query,
};

pub struct PostgresConnector {
    client: Option<Client>,
    target: String,
    options: FetchOptions,
    /// `server_version_num`, e.g. 160002. `None` if it could not be read.
    server_version_num: Option<i32>,
}

impl PostgresConnector {
    /// Connects with an explicit DSN (`postgresql://…` URL or `key=value` string).
    pub fn connect(dsn: &str, options: FetchOptions) -> Result<Self, ConnectorError> {
        Self::open(dsn, redact_dsn(dsn), options)
    }

    /// Connects using the standard libpq environment variables:
    /// - PGHOST (default: localhost)
    /// - PGPORT (default: 5432)
    /// - PGUSER (default: $USER)
    /// - PGPASSWORD (default: empty)
    /// - PGDATABASE (default: same as PGUSER)
    pub fn from_env(options: FetchOptions) -> Result<Self, ConnectorError> {
        let (connection_string, target) = connection_string_from(|k| std::env::var(k).ok())?;
        Self::open(&connection_string, target, options)
    }

    fn open(
        connection_string: &str,
        target: String,
        options: FetchOptions,
    ) -> Result<Self, ConnectorError> {
        let mut client = Client::connect(connection_string, NoTls)
            .map_err(|e| ConnectorError::Connection(format_postgres_error(&e)))?;

        let server_version_num = client
            .query_one("SHOW server_version_num", &[])
            .ok()
            .and_then(|row| row.try_get::<_, String>(0).ok())
            .and_then(|v| v.parse::<i32>().ok());
        info!(db = %target, server_version_num, "connected to PostgreSQL");

        Ok(Self {
            client: Some(client),
            target,
            options,
            server_version_num,
        })
    }

    /// Runs one diagnostic query. Failures are logged and yield no rows.
    fn query_rows(
        &mut self,
        diagnostic: &str,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Vec<Row> {
        let Some(client) = self.client.as_mut() else {
            return Vec::new();
        };
        match client.query(sql, params) {
            Ok(rows) => {
                debug!(diagnostic, rows = rows.len(), "query finished");
                rows.iter().map(convert_row).collect()
            }
            Err(e) => {
                warn!(diagnostic, error = %format_postgres_error(&e), "query failed");
                Vec::new()
            }
        }
    }

    fn query_first(&mut self, diagnostic: &str, sql: &str) -> Option<Row> {
        self.query_rows(diagnostic, sql, &[]).into_iter().next()
    }
}

impl Connector for PostgresConnector {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { index_usage: true }
    }

    fn slow_queries(&mut self) -> Vec<Row> {
        let sql = build_slow_queries_query(self.server_version_num);
        let limit = i64::try_from(self.options.slow_query_limit).unwrap_or(i64::MAX);
        self.query_rows("slow_queries", &sql, &[&limit])
    }

    fn missing_indexes(&mut self) -> Vec<Row> {
        self.query_rows("missing_indexes", build_missing_indexes_query(), &[])
    }

    fn table_bloat(&mut self) -> Vec<Row> {
        self.query_rows("table_bloat", build_table_bloat_query(), &[])
    }

    fn resource_usage(&mut self) -> ResourceUsage {
        let mut usage = ResourceUsage::default();

        usage.cache_hit_pct = self
            .query_first("cache_hit", build_cache_hit_query())
            .and_then(|r| r.get("cache_hit_pct").and_then(Scalar::as_f64));
        usage.blocked_queries = self
            .query_first("locks", build_blocked_query())
            .and_then(|r| r.get("blocked_queries").and_then(Scalar::as_i64));

        for row in self.query_rows("connections", build_connections_query(), &[]) {
            if let Some(state) = row.get("state").and_then(Scalar::as_str)
                && let Some(count) = row.get("cnt")
            {
                usage
                    .extra
                    .insert(&format!("connections_{}", state.replace(' ', "_")), count.clone());
            }
        }
        if let Some(size) = self
            .query_first("db_size", build_database_size_query())
            .and_then(|r| r.get("db_size").cloned())
        {
            usage.extra.insert("db_size", size);
        }

        usage
    }

    fn index_usage(&mut self) -> Vec<Row> {
        self.query_rows("index_usage", build_index_usage_query(), &[])
    }

    fn long_running(&mut self) -> Vec<Row> {
        let threshold = self.options.long_running_threshold.as_secs_f64();
        self.query_rows("long_running", build_long_running_query(), &[&threshold])
    }

    fn close(&mut self) {
        if let Some(client) = self.client.take()
            && let Err(e) = client.close()
        {
            warn!(error = %format_postgres_error(&e), "error closing connection");
        }
    }
}

/// Builds a `key=value` connection string and a credential-free target label
/// from libpq-style variables.
fn connection_string_from(
    var: impl Fn(&str) -> Option<String>,
) -> Result<(String, String), ConnectorError> {
    let user = var("PGUSER")
        .or_else(|| var("USER"))
        .ok_or_else(|| ConnectorError::EnvNotSet("PGUSER or USER".to_string()))?;

    let host = var("PGHOST").unwrap_or_else(|| "localhost".to_string());
    let port = var("PGPORT").unwrap_or_else(|| "5432".to_string());
    let password = var("PGPASSWORD").unwrap_or_default();
    let database = var("PGDATABASE").unwrap_or_else(|| user.clone());

    let connection_string = if password.is_empty() {
        format!("host={host} port={port} user={user} dbname={database}")
    } else {
        format!("host={host} port={port} user={user} password={password} dbname={database}")
    };
    Ok((connection_string, format!("{host}:{port}/{database}")))
}

/// Strips credentials from a DSN for display.
fn redact_dsn(dsn: &str) -> String {
    let dsn = dsn.trim();
    if let Some(rest) = dsn
        .strip_prefix("postgresql://")
        .or_else(|| dsn.strip_prefix("postgres://"))
    {
        let rest = rest.rsplit_once('@').map_or(rest, |(_, host)| host);
        return rest.split('?').next().unwrap_or(rest).to_string();
    }
    dsn.split_whitespace()
        .filter(|kv| !kv.starts_with("password="))
        .collect::<Vec<_>>()
        .join(" ")
}

fn convert_row(row: &PgRow) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| (col.name().to_string(), convert_value(row, idx, col.type_())))
        .collect()
}

fn convert_value(row: &PgRow, idx: usize, ty: &Type) -> Scalar {
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx).ok().flatten().map(Scalar::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(|v| Scalar::Int(v.into()))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(|v| Scalar::Int(v.into()))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx).ok().flatten().map(Scalar::Int)
    } else if *ty == Type::OID {
        row.try_get::<_, Option<u32>>(idx)
            .ok()
            .flatten()
            .map(|v| Scalar::Int(v.into()))
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(|v| Scalar::Float(v.into()))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx).ok().flatten().map(Scalar::Float)
    } else {
        row.try_get::<_, Option<String>>(idx).ok().flatten().map(Scalar::Text)
    };
    value.unwrap_or(Scalar::Null)
}

/// Formats a PostgreSQL error into a concise message.
fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .map(str::trim)
                .unwrap_or(&msg)
                .to_string()
        } else {
            msg
        }
    }
}
