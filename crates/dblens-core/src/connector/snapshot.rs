//! Captured diagnostic rows, replayable as a connector.
//!
//! A snapshot holds everything one run fetched from a backend. It can be
//! written from any live connector and replayed later, which is also how
//! backends without a live connector (MySQL, MongoDB, Snowflake) are analyzed.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

use super::{Backend, Capabilities, Connector, ConnectorError, FetchOptions, ResourceUsage};
use crate::analysis::fields::Row;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub backend: Backend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub slow_queries: Vec<Row>,
    #[serde(default)]
    pub missing_indexes: Vec<Row>,
    #[serde(default)]
    pub table_bloat: Vec<Row>,
    #[serde(default)]
    pub resource_usage: ResourceUsage,
    /// `None` means the source connector does not provide index usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_usage: Option<Vec<Row>>,
    #[serde(default)]
    pub long_running: Vec<Row>,
}

impl Snapshot {
    pub fn empty(backend: Backend) -> Self {
        Self {
            backend,
            target: None,
            slow_queries: Vec::new(),
            missing_indexes: Vec::new(),
            table_bloat: Vec::new(),
            resource_usage: ResourceUsage::default(),
            index_usage: None,
            long_running: Vec::new(),
        }
    }

    /// Fetches every domain from `connector` once.
    pub fn capture(connector: &mut dyn Connector) -> Self {
        let index_usage = connector
            .capabilities()
            .index_usage
            .then(|| connector.index_usage());
        Self {
            backend: connector.backend(),
            target: Some(connector.target().to_string()),
            slow_queries: connector.slow_queries(),
            missing_indexes: connector.missing_indexes(),
            table_bloat: connector.table_bloat(),
            resource_usage: connector.resource_usage(),
            index_usage,
            long_running: connector.long_running(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ConnectorError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConnectorError> {
        if !path.exists() {
            return Err(ConnectorError::NotFound(path.to_path_buf()));
        }
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConnectorError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        info!(path = %path.display(), "snapshot saved");
        Ok(())
    }
}

/// Serves a [`Snapshot`] through the connector contract.
pub struct SnapshotConnector {
    snapshot: Snapshot,
    target: String,
    options: FetchOptions,
}

impl SnapshotConnector {
    pub fn new(snapshot: Snapshot, target: impl Into<String>) -> Self {
        Self {
            snapshot,
            target: target.into(),
            options: FetchOptions::default(),
        }
    }

    /// Loads a snapshot file. The recorded target wins over the file path.
    pub fn open(path: &Path, options: FetchOptions) -> Result<Self, ConnectorError> {
        let snapshot = Snapshot::load(path)?;
        let target = snapshot
            .target
            .clone()
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            snapshot,
            target,
            options,
        })
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }
}

impl Connector for SnapshotConnector {
    fn backend(&self) -> Backend {
        self.snapshot.backend
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            index_usage: self.snapshot.index_usage.is_some(),
        }
    }

    fn slow_queries(&mut self) -> Vec<Row> {
        let limit = self.options.slow_query_limit;
        self.snapshot.slow_queries.iter().take(limit).cloned().collect()
    }

    fn missing_indexes(&mut self) -> Vec<Row> {
        self.snapshot.missing_indexes.clone()
    }

    fn table_bloat(&mut self) -> Vec<Row> {
        self.snapshot.table_bloat.clone()
    }

    fn resource_usage(&mut self) -> ResourceUsage {
        self.snapshot.resource_usage.clone()
    }

    fn index_usage(&mut self) -> Vec<Row> {
        self.snapshot.index_usage.clone().unwrap_or_default()
    }

    // Long-running rows were filtered when they were captured.
    fn long_running(&mut self) -> Vec<Row> {
        self.snapshot.long_running.clone()
    }
}
