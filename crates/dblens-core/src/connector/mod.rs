//! Backend connectors.
//!
//! A connector issues the backend-specific diagnostic queries and hands the
//! raw rows to the analyzer. Fetch methods never fail: a diagnostic the
//! backend cannot answer degrades to no rows (or a row carrying an `error`
//! marker) and is logged. Only construction can fail.
//!
//! Implementations:
//! - `postgres` — live PostgreSQL via the `postgres` client (feature `postgres`)
//! - `mysql` — live MySQL / MariaDB via the `mysql` client (feature `mysql`)
//! - `mongo` — live MongoDB via the `mongodb` sync client (feature `mongodb`)
//! - `sqlite` — SQLite database files via `rusqlite` (feature `sqlite`)
//! - `snapshot` — replay of a captured JSON snapshot from any backend,
//!   including Snowflake, which has no live connector

#[cfg(feature = "mongodb")]
pub mod mongo;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod snapshot;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::analysis::fields::Row;

// ============================================================
// Backend
// ============================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "sqlite")]
    Sqlite,
    #[serde(rename = "mongodb", alias = "mongo")]
    Mongo,
    #[serde(rename = "snowflake")]
    Snowflake,
}

impl Backend {
    /// Label used in reports.
    pub const fn as_str(self) -> &'static str {
        match self {
            Backend::Postgres => "postgresql",
            Backend::MySql => "mysql",
            Backend::Sqlite => "sqlite",
            Backend::Mongo => "mongodb",
            Backend::Snowflake => "snowflake",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// Capabilities and options
// ============================================================

/// Optional diagnostic a connector may or may not provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    IndexUsage,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub index_usage: bool,
}

impl Capabilities {
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::IndexUsage => self.index_usage,
        }
    }
}

/// Bounds applied by connectors while fetching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchOptions {
    /// Maximum slow-query rows to fetch.
    pub slow_query_limit: usize,
    /// Operations shorter than this are not reported as long-running.
    pub long_running_threshold: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            slow_query_limit: 20,
            long_running_threshold: Duration::from_secs(5),
        }
    }
}

// ============================================================
// Resource usage bag
// ============================================================

/// What a cache-hit percentage measures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    /// Share of page reads served from the buffer pool.
    #[default]
    BufferPool,
    /// Share of the database file the configured cache can hold.
    FileCoverage,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryUsage {
    #[serde(deserialize_with = "lenient::f64_or_zero")]
    pub resident_mb: f64,
    #[serde(deserialize_with = "lenient::f64_or_zero")]
    pub virtual_mb: f64,
}

/// Backend health metrics. Every field is optional.
///
/// Deserialization never fails on a single field: numbers given as text or
/// with the wrong numeric type are converted, and values of an unusable
/// shape are dropped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceUsage {
    #[serde(deserialize_with = "lenient::opt_f64")]
    pub cache_hit_pct: Option<f64>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub cache_scope: CacheScope,
    #[serde(deserialize_with = "lenient::opt_text")]
    pub journal_mode: Option<String>,
    #[serde(deserialize_with = "lenient::opt_i64")]
    pub freelist_pages: Option<i64>,
    #[serde(deserialize_with = "lenient::opt_i64")]
    pub blocked_queries: Option<i64>,
    #[serde(deserialize_with = "lenient::or_default")]
    pub memory: Option<MemoryUsage>,
    /// Per-pool usage rows (e.g. warehouse credit consumption).
    #[serde(deserialize_with = "lenient::or_default")]
    pub pools: Vec<Row>,
    /// Backend-specific figures no check reads.
    #[serde(deserialize_with = "lenient::or_default")]
    pub extra: Row,
}

/// Field deserializers that go through [`Scalar`] instead of failing.
mod lenient {
    use serde::de::IgnoredAny;
    use serde::{Deserialize, Deserializer};

    use crate::analysis::fields::Scalar;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OrIgnored<T> {
        Value(T),
        Other(IgnoredAny),
    }

    /// `T` when the value has its shape, `T::default()` otherwise.
    pub fn or_default<'de, D, T>(d: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(match OrIgnored::<T>::deserialize(d)? {
            OrIgnored::Value(v) => v,
            OrIgnored::Other(_) => T::default(),
        })
    }

    fn scalar<'de, D: Deserializer<'de>>(d: D) -> Result<Scalar, D::Error> {
        or_default::<D, Scalar>(d)
    }

    pub fn opt_f64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        Ok(scalar(d)?.as_f64())
    }

    pub fn opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        Ok(scalar(d)?.as_i64())
    }

    pub fn f64_or_zero<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(scalar(d)?.as_f64().unwrap_or(0.0))
    }

    pub fn opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match scalar(d)? {
            Scalar::Null => None,
            Scalar::Text(s) => Some(s),
            other => Some(other.to_string()),
        })
    }
}

// ============================================================
// Errors
// ============================================================

/// Failure to set up a connector. Fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("{0} not set")]
    EnvNotSet(String),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("database file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

// ============================================================
// Connector contract
// ============================================================

pub trait Connector {
    fn backend(&self) -> Backend;

    /// Human-readable target (host/database or file path), free of credentials.
    fn target(&self) -> &str;

    /// Declared once; the analyzer reads it at construction.
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Top slow operations, already limited and ordered by the connector.
    fn slow_queries(&mut self) -> Vec<Row>;

    /// Tables or collections that look under-indexed.
    fn missing_indexes(&mut self) -> Vec<Row>;

    /// Per-table and optionally whole-database space-waste figures.
    fn table_bloat(&mut self) -> Vec<Row>;

    fn resource_usage(&mut self) -> ResourceUsage;

    /// Per-index usage or timing rows. Only called when
    /// [`Capabilities::index_usage`] is declared.
    fn index_usage(&mut self) -> Vec<Row> {
        Vec::new()
    }

    /// Operations already filtered by the long-running threshold.
    fn long_running(&mut self) -> Vec<Row>;

    /// Releases the connection. Called once, after analysis.
    fn close(&mut self) {}
}
