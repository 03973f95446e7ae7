use super::{Check, index_usage_records};
use crate::analysis::fields::Row;
use crate::analysis::{Category, Finding, Severity};
use crate::connector::{Capability, Connector};
use crate::fmt::thousands;

pub struct IndexUsageCheck;

impl Check for IndexUsageCheck {
    fn id(&self) -> &'static str {
        "index_usage"
    }

    fn category(&self) -> Category {
        Category::IndexUsage
    }

    fn requires(&self) -> Option<Capability> {
        Some(Capability::IndexUsage)
    }

    fn run(&self, connector: &mut dyn Connector) -> Vec<Finding> {
        evaluate(&connector.index_usage())
    }
}

/// Unused indexes (zero scans) warn; benchmarked scan timings are reported
/// as info with no threshold.
pub fn evaluate(rows: &[Row]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for r in index_usage_records(rows) {
        let (index, table) = (r.index.as_str(), r.table.as_str());

        if r.scans == Some(0) {
            findings.push(
                Finding::new(
                    Category::IndexUsage,
                    Severity::Warning,
                    format!("Unused index `{index}` on `{table}`"),
                )
                .detail(format!("0 scans since last stats reset  |  size: {}", r.size))
                .recommendation(
                    "If this index has never been used, consider dropping it. \
                     Unused indexes waste space and slow down writes. \
                     Reset statistics and monitor for a week before dropping.",
                )
                .metric("index", index)
                .metric("table", table)
                .metric("scans", 0),
            );
        }

        if let Some(scan_ms) = r.scan_ms {
            findings.push(
                Finding::new(
                    Category::IndexUsage,
                    Severity::Info,
                    format!("Index `{index}` on `{table}` ({})", r.columns),
                )
                .detail(format!(
                    "Full index scan: {scan_ms} ms  |  table rows: {}",
                    thousands(r.table_rows)
                ))
                .recommendation(
                    "Verify this index is actually used by your queries with \
                     EXPLAIN QUERY PLAN. Drop it if never referenced to speed up writes.",
                )
                .metric("index", index)
                .metric("table", table)
                .metric("scan_ms", scan_ms),
            );
        }
    }
    findings
}
