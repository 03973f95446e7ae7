//! MongoDB connector.
//!
//! Slow operations come from the `system.profile` collection, which only
//! has entries while profiling is enabled on the database. Collection sizes
//! come from `collStats`, memory from `serverStatus`, and in-flight
//! operations from `currentOp` on the admin database.
//!
//! Profiler and `currentOp` failures (profiling off, missing privileges) are
//! reported as rows carrying an `error` marker so the reason shows up in the
//! logs of the analysis run.

use mongodb::bson::{Bson, Document, doc};
use mongodb::options::FindOptions;
use mongodb::sync::{Client, Database};
use tracing::{debug, info, warn};

use super::{Backend, Connector, ConnectorError, FetchOptions, MemoryUsage, ResourceUsage};
use crate::analysis::fields::{ERROR_FIELD, Row, Scalar};
use crate::fmt::truncate_chars;

/// Collections with more documents than this and only the `_id` index are
/// reported as missing an index.
const MISSING_INDEX_MIN_DOCS: i64 = 1_000;
const QUERY_TEXT_MAX_CHARS: usize = 120;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

pub struct MongoConnector {
    client: Option<Client>,
    db: Database,
    target: String,
    options: FetchOptions,
}

impl MongoConnector {
    /// Connects to `uri` and selects `database`. The server is pinged so an
    /// unreachable cluster fails here rather than on the first diagnostic.
    pub fn connect(uri: &str, database: &str, options: FetchOptions) -> Result<Self, ConnectorError> {
        let client =
            Client::with_uri_str(uri).map_err(|e| ConnectorError::Connection(e.to_string()))?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;

        let target = format!("{}/{database}", redact_uri(uri));
        info!(db = %target, "connected to MongoDB");
        Ok(Self {
            db: client.database(database),
            client: Some(client),
            target,
            options,
        })
    }

    /// Runs a database command. Failures are logged and yield `None`.
    fn command(&self, diagnostic: &str, command: Document) -> Option<Document> {
        match self.db.run_command(command, None) {
            Ok(reply) => Some(reply),
            Err(e) => {
                warn!(diagnostic, error = %e, "command failed");
                None
            }
        }
    }

    fn collection_names(&self) -> Vec<String> {
        match self.db.list_collection_names(None) {
            Ok(mut names) => {
                names.retain(|n| !n.starts_with("system."));
                names.sort();
                names
            }
            Err(e) => {
                warn!(error = %e, "listing collections failed");
                Vec::new()
            }
        }
    }

    /// `collStats` for every collection. Collections that fail are skipped.
    fn collection_stats(&self) -> Vec<(String, Document)> {
        self.collection_names()
            .into_iter()
            .filter_map(|name| {
                let stats = self.command("coll_stats", doc! { "collStats": name.as_str() })?;
                Some((name, stats))
            })
            .collect()
    }

    fn profiled_operations(&self) -> mongodb::error::Result<Vec<Row>> {
        let limit = i64::try_from(self.options.slow_query_limit).unwrap_or(i64::MAX);
        let find_options = FindOptions::builder()
            .sort(doc! { "millis": -1 })
            .limit(limit)
            .build();
        let cursor = self
            .db
            .collection::<Document>("system.profile")
            .find(doc! { "op": { "$ne": "getmore" } }, find_options)?;

        let mut rows = Vec::new();
        for entry in cursor {
            rows.push(profile_row(&entry?));
        }
        Ok(rows)
    }

    fn current_operations(&self) -> mongodb::error::Result<Vec<Row>> {
        let Some(client) = self.client.as_ref() else {
            return Ok(Vec::new());
        };
        let threshold = i64::try_from(self.options.long_running_threshold.as_secs())
            .unwrap_or(i64::MAX);
        let reply = client.database("admin").run_command(
            doc! {
                "currentOp": 1,
                "active": true,
                "secs_running": { "$gte": threshold },
            },
            None,
        )?;
        Ok(reply
            .get_array("inprog")
            .map(|ops| {
                ops.iter()
                    .filter_map(Bson::as_document)
                    .map(current_op_row)
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl Connector for MongoConnector {
    fn backend(&self) -> Backend {
        Backend::Mongo
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn slow_queries(&mut self) -> Vec<Row> {
        match self.profiled_operations() {
            Ok(rows) => {
                debug!(diagnostic = "slow_queries", rows = rows.len(), "query finished");
                rows
            }
            Err(e) => vec![error_row(&e)],
        }
    }

    fn missing_indexes(&mut self) -> Vec<Row> {
        let mut issues = Vec::new();
        for (name, stats) in self.collection_stats() {
            let documents = number(stats.get("count")).map_or(0, |v| v as i64);
            if documents <= MISSING_INDEX_MIN_DOCS {
                continue;
            }
            let indexes = match self.db.collection::<Document>(&name).list_index_names() {
                Ok(indexes) => indexes,
                Err(e) => {
                    warn!(collection = %name, error = %e, "listing indexes failed");
                    continue;
                }
            };
            if indexes.len() <= 1 {
                issues.push(
                    Row::new()
                        .with("collection", name.as_str())
                        .with("documents", documents)
                        .with("indexes", indexes.join(", "))
                        .with("note", "Large collection with only _id index"),
                );
            }
        }
        issues
    }

    fn table_bloat(&mut self) -> Vec<Row> {
        let mut rows: Vec<(f64, Row)> = self
            .collection_stats()
            .into_iter()
            .map(|(name, stats)| {
                let storage_mb = megabytes(stats.get("storageSize"));
                let row = Row::new()
                    .with("collection", name.as_str())
                    .with("documents", number(stats.get("count")).map_or(0, |v| v as i64))
                    .with("size_mb", megabytes(stats.get("size")))
                    .with("storage_mb", storage_mb)
                    .with("index_size_mb", megabytes(stats.get("totalIndexSize")))
                    .with("avg_obj_bytes", number(stats.get("avgObjSize")).unwrap_or(0.0));
                (storage_mb, row)
            })
            .collect();
        rows.sort_by(|a, b| b.0.total_cmp(&a.0));
        rows.into_iter().map(|(_, row)| row).collect()
    }

    fn resource_usage(&mut self) -> ResourceUsage {
        self.command("server_status", doc! { "serverStatus": 1 })
            .map(|status| server_status_usage(&status))
            .unwrap_or_default()
    }

    fn long_running(&mut self) -> Vec<Row> {
        match self.current_operations() {
            Ok(rows) => rows,
            Err(e) => vec![error_row(&e)],
        }
    }

    fn close(&mut self) {
        if let Some(client) = self.client.take() {
            client.shutdown();
        }
    }
}

fn error_row(e: &mongodb::error::Error) -> Row {
    Row::new().with(ERROR_FIELD, e.to_string())
}

fn profile_row(entry: &Document) -> Row {
    let query = entry.get("command").or_else(|| entry.get("query"));
    Row::new()
        .with("ns", entry.get_str("ns").unwrap_or_default())
        .with("op", entry.get_str("op").unwrap_or_default())
        .with("millis", number(entry.get("millis")).unwrap_or(0.0))
        .with("query", query.map(bson_text).unwrap_or_default())
        .with("docsExamined", convert_bson(entry.get("docsExamined")))
        .with("keysExamined", convert_bson(entry.get("keysExamined")))
        .with("nreturned", convert_bson(entry.get("nreturned")))
}

fn current_op_row(op: &Document) -> Row {
    Row::new()
        .with("opid", convert_bson(op.get("opid")))
        .with("op", op.get_str("op").unwrap_or_default())
        .with("ns", op.get_str("ns").unwrap_or_default())
        .with("secs_running", number(op.get("secs_running")).map_or(0, |v| v as i64))
        .with("query", op.get("command").map(bson_text).unwrap_or_default())
}

fn server_status_usage(status: &Document) -> ResourceUsage {
    let mut usage = ResourceUsage::default();

    if let Ok(mem) = status.get_document("mem") {
        usage.memory = Some(MemoryUsage {
            resident_mb: number(mem.get("resident")).unwrap_or(0.0),
            virtual_mb: number(mem.get("virtual")).unwrap_or(0.0),
        });
    }
    for section in ["connections", "opcounters"] {
        if let Ok(counters) = status.get_document(section) {
            for (key, value) in counters {
                let value = convert_bson(Some(value));
                if value.as_f64().is_some() {
                    usage.extra.insert(&format!("{section}_{key}"), value);
                }
            }
        }
    }
    if let Some(uptime) = number(status.get("uptime")) {
        usage.extra.insert("uptime_sec", uptime);
    }
    usage
}

/// Numeric BSON value of any width.
fn number(value: Option<&Bson>) -> Option<f64> {
    match value? {
        Bson::Double(v) => Some(*v),
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        _ => None,
    }
}

fn megabytes(value: Option<&Bson>) -> f64 {
    let mb = number(value).unwrap_or(0.0) / BYTES_PER_MB;
    (mb * 1000.0).round() / 1000.0
}

fn convert_bson(value: Option<&Bson>) -> Scalar {
    match value {
        None | Some(Bson::Null) | Some(Bson::Undefined) => Scalar::Null,
        Some(Bson::Boolean(v)) => Scalar::Bool(*v),
        Some(Bson::Int32(v)) => Scalar::Int(i64::from(*v)),
        Some(Bson::Int64(v)) => Scalar::Int(*v),
        Some(Bson::Double(v)) => Scalar::Float(*v),
        Some(Bson::String(v)) => Scalar::Text(v.clone()),
        Some(other) => Scalar::Text(bson_text(other)),
    }
}

/// Single-line, bounded rendering of a command document.
fn bson_text(value: &Bson) -> String {
    let text = match value {
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    };
    truncate_chars(&text, QUERY_TEXT_MAX_CHARS)
}

/// Host list of a connection string, without scheme, credentials or options.
fn redact_uri(uri: &str) -> String {
    let uri = uri.trim();
    let rest = uri
        .strip_prefix("mongodb+srv://")
        .or_else(|| uri.strip_prefix("mongodb://"))
        .unwrap_or(uri);
    let rest = rest.split(['/', '?']).next().unwrap_or(rest);
    rest.rsplit_once('@').map_or(rest, |(_, hosts)| hosts).to_string()
}
