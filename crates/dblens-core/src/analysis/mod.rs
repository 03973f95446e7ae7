pub mod checks;
pub mod fields;
pub mod records;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::connector::Connector;
use fields::{Row, Scalar};

// ============================================================
// Core types
// ============================================================

/// Diagnostic domain a finding belongs to. One per check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SlowQuery,
    MissingIndex,
    Bloat,
    Resource,
    IndexUsage,
    LongRunning,
}

impl Category {
    pub const fn as_str(self) -> &'static str {
        match self {
            Category::SlowQuery => "slow_query",
            Category::MissingIndex => "missing_index",
            Category::Bloat => "bloat",
            Category::Resource => "resource",
            Category::IndexUsage => "index_usage",
            Category::LongRunning => "long_running",
        }
    }

    /// Heading used by the text renderer.
    pub const fn label(self) -> &'static str {
        match self {
            Category::SlowQuery => "Slow Queries",
            Category::MissingIndex => "Missing Indexes",
            Category::Bloat => "Storage / Bloat",
            Category::Resource => "Resource Usage",
            Category::IndexUsage => "Index Usage",
            Category::LongRunning => "Long-Running Queries",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health rank. `Critical > Warning > Info > Ok`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Ok,
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// All severities, worst first.
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::Warning,
        Severity::Info,
        Severity::Ok,
    ];

    /// Sort key: 0 for the worst severity, 3 for the best.
    pub const fn rank(self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::Warning => 1,
            Severity::Info => 2,
            Severity::Ok => 3,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "CRITICAL",
            Severity::Warning => "WARNING",
            Severity::Info => "INFO",
            Severity::Ok => "OK",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized diagnostic conclusion.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Finding {
    pub category: Category,
    pub severity: Severity,
    pub title: String,
    pub detail: String,
    pub recommendation: String,
    /// Machine-readable facts backing the finding.
    pub metric: Row,
}

impl Finding {
    pub fn new(category: Category, severity: Severity, title: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            title: title.into(),
            detail: String::new(),
            recommendation: String::new(),
            metric: Row::new(),
        }
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    pub fn metric(mut self, name: &str, value: impl Into<Scalar>) -> Self {
        self.metric.insert(name, value);
        self
    }
}

// ============================================================
// Severity classifier
// ============================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    HigherIsWorse,
    LowerIsWorse,
}

/// Warn/critical pair for one metric.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub warn: f64,
    pub critical: f64,
    pub direction: Direction,
}

impl Thresholds {
    pub const fn higher_is_worse(warn: f64, critical: f64) -> Self {
        Self {
            warn,
            critical,
            direction: Direction::HigherIsWorse,
        }
    }

    pub const fn lower_is_worse(warn: f64, critical: f64) -> Self {
        Self {
            warn,
            critical,
            direction: Direction::LowerIsWorse,
        }
    }

    /// Never returns `Info`; informational findings are emitted by checks directly.
    pub fn classify(&self, value: f64) -> Severity {
        match self.direction {
            Direction::HigherIsWorse => {
                if value >= self.critical {
                    Severity::Critical
                } else if value >= self.warn {
                    Severity::Warning
                } else {
                    Severity::Ok
                }
            }
            Direction::LowerIsWorse => {
                if value <= self.critical {
                    Severity::Critical
                } else if value <= self.warn {
                    Severity::Warning
                } else {
                    Severity::Ok
                }
            }
        }
    }
}

pub fn classify(value: f64, warn: f64, critical: f64, higher_is_worse: bool) -> Severity {
    let thresholds = if higher_is_worse {
        Thresholds::higher_is_worse(warn, critical)
    } else {
        Thresholds::lower_is_worse(warn, critical)
    };
    thresholds.classify(value)
}

// ============================================================
// Analyzer — orchestrator
// ============================================================

/// Runs every check against one connector and ranks the result.
pub struct Analyzer<'c> {
    connector: &'c mut dyn Connector,
    checks: Vec<Box<dyn checks::Check>>,
}

impl<'c> Analyzer<'c> {
    /// Capabilities are read once here; checks the connector cannot serve
    /// are dropped from the run.
    pub fn new(connector: &'c mut dyn Connector) -> Self {
        let capabilities = connector.capabilities();
        let checks = checks::all_checks()
            .into_iter()
            .filter(|c| match c.requires() {
                Some(cap) => {
                    let supported = capabilities.supports(cap);
                    if !supported {
                        debug!(check = c.id(), "skipped: capability not declared");
                    }
                    supported
                }
                None => true,
            })
            .collect();
        Self { connector, checks }
    }

    /// Ids of the checks this analyzer will run, in order.
    pub fn check_ids(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.id()).collect()
    }

    pub fn run(&mut self) -> Vec<Finding> {
        let mut findings = Vec::new();
        for check in &self.checks {
            let found = check.run(&mut *self.connector);
            debug!(
                check = check.id(),
                category = check.category().as_str(),
                findings = found.len(),
                "check finished"
            );
            debug_assert!(found.iter().all(|f| f.category == check.category()));
            findings.extend(found);
        }
        sort_findings(&mut findings);
        findings
    }
}

/// Stable sort by severity rank; equal severities keep emission order.
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by_key(|f| f.severity.rank());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::snapshot::{Snapshot, SnapshotConnector};
    use crate::connector::{Backend, ResourceUsage};

    fn connector(snapshot: Snapshot) -> SnapshotConnector {
        SnapshotConnector::new(snapshot, "test")
    }

    #[test]
    fn severity_rank_is_total() {
        let ranks: Vec<u8> = Severity::ALL.iter().map(|s| s.rank()).collect();
        assert_eq!(ranks, [0, 1, 2, 3]);
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
        assert!(Severity::Info > Severity::Ok);
    }

    #[test]
    fn severity_serializes_as_label() {
        assert_eq!(serde_json::to_string(&Severity::Ok).unwrap(), "\"OK\"");
        assert_eq!(
            serde_json::to_string(&Severity::Critical).unwrap(),
            "\"CRITICAL\""
        );
        assert_eq!(
            serde_json::to_string(&Category::MissingIndex).unwrap(),
            "\"missing_index\""
        );
    }

    #[test]
    fn classify_higher_is_worse() {
        assert_eq!(classify(99.9, 100.0, 500.0, true), Severity::Ok);
        assert_eq!(classify(100.0, 100.0, 500.0, true), Severity::Warning);
        assert_eq!(classify(500.0, 100.0, 500.0, true), Severity::Critical);
    }

    #[test]
    fn classify_lower_is_worse() {
        assert_eq!(classify(95.0, 80.0, 50.0, false), Severity::Ok);
        assert_eq!(classify(80.0, 80.0, 50.0, false), Severity::Warning);
        assert_eq!(classify(50.0, 80.0, 50.0, false), Severity::Critical);
    }

    #[test]
    fn classify_is_monotonic() {
        let mut prev = Severity::Ok;
        for v in 0..1000 {
            let s = classify(v as f64, 100.0, 500.0, true);
            assert!(s >= prev, "severity dropped at {v}");
            prev = s;
        }
        let mut prev = Severity::Ok;
        for v in (0..=100).rev() {
            let s = classify(v as f64, 80.0, 50.0, false);
            assert!(s >= prev, "severity dropped at {v}");
            prev = s;
        }
    }

    #[test]
    fn classify_never_returns_info() {
        for v in [-1.0, 0.0, 5.0, 20.0, 1e9, f64::NAN] {
            assert_ne!(classify(v, 5.0, 20.0, true), Severity::Info);
            assert_ne!(classify(v, 80.0, 50.0, false), Severity::Info);
        }
    }

    #[test]
    fn empty_input_yields_no_findings() {
        let mut conn = connector(Snapshot::empty(Backend::Postgres));
        let findings = Analyzer::new(&mut conn).run();
        assert!(findings.is_empty());
    }

    #[test]
    fn index_usage_check_is_skipped_without_capability() {
        let mut snap = Snapshot::empty(Backend::MySql);
        snap.index_usage = None;
        let mut conn = connector(snap);
        let analyzer = Analyzer::new(&mut conn);
        assert!(!analyzer.check_ids().contains(&"index_usage"));
        assert_eq!(analyzer.check_ids().len(), 5);
    }

    #[test]
    fn checks_run_in_fixed_order() {
        let mut snap = Snapshot::empty(Backend::Postgres);
        snap.index_usage = Some(Vec::new());
        let mut conn = connector(snap);
        let analyzer = Analyzer::new(&mut conn);
        assert_eq!(
            analyzer.check_ids(),
            [
                "slow_queries",
                "missing_indexes",
                "bloat",
                "resources",
                "index_usage",
                "long_running"
            ]
        );
    }

    #[test]
    fn findings_sorted_by_severity_then_emission_order() {
        let mut snap = Snapshot::empty(Backend::Postgres);
        snap.slow_queries = vec![
            Row::new().with("mean_ms", 150.0).with("query", "q1"),
            Row::new().with("mean_ms", 900.0).with("query", "q2"),
            Row::new().with("mean_ms", 120.0).with("query", "q3"),
        ];
        snap.missing_indexes = vec![Row::new().with("table_name", "orders").with("seq_scan", 80)];
        snap.table_bloat = vec![
            Row::new().with("table_name", "events").with("size_mb", 12.0),
            Row::new().with("table_name", "orders").with("dead_pct", 30.0),
        ];
        snap.resource_usage = ResourceUsage {
            blocked_queries: Some(2),
            ..ResourceUsage::default()
        };
        snap.long_running = vec![Row::new().with("duration", "00:01:00").with("query", "x")];
        let mut conn = connector(snap);
        let findings = Analyzer::new(&mut conn).run();

        let order: Vec<(Severity, Category)> =
            findings.iter().map(|f| (f.severity, f.category)).collect();
        assert_eq!(
            order,
            [
                (Severity::Critical, Category::SlowQuery),
                (Severity::Critical, Category::Bloat),
                (Severity::Warning, Category::SlowQuery),
                (Severity::Warning, Category::SlowQuery),
                (Severity::Warning, Category::MissingIndex),
                (Severity::Warning, Category::Resource),
                (Severity::Warning, Category::LongRunning),
                (Severity::Info, Category::Bloat),
            ]
        );
        // q1 was emitted before q3 and must stay ahead of it.
        assert!(findings[2].detail.contains("q1"));
        assert!(findings[3].detail.contains("q3"));
    }

    #[test]
    fn sorting_is_deterministic_across_runs() {
        let build = || {
            let mut snap = Snapshot::empty(Backend::Sqlite);
            snap.missing_indexes = (0..5)
                .map(|i| Row::new().with("table_name", format!("t{i}")))
                .collect();
            snap.long_running = vec![Row::new().with("duration", "7 ms")];
            connector(snap)
        };
        let mut a = build();
        let mut b = build();
        assert_eq!(Analyzer::new(&mut a).run(), Analyzer::new(&mut b).run());
    }
}
