use super::{Check, missing_index_records};
use crate::analysis::fields::Row;
use crate::analysis::{Category, Finding, Severity};
use crate::connector::Connector;
use crate::fmt::thousands;

const MAX_ROWS: usize = 10;

pub struct MissingIndexCheck;

impl Check for MissingIndexCheck {
    fn id(&self) -> &'static str {
        "missing_indexes"
    }

    fn category(&self) -> Category {
        Category::MissingIndex
    }

    fn run(&self, connector: &mut dyn Connector) -> Vec<Finding> {
        evaluate(&connector.missing_indexes())
    }
}

/// Every candidate row is a warning: connectors only return tables that
/// already look under-indexed.
pub fn evaluate(rows: &[Row]) -> Vec<Finding> {
    let rows = &rows[..rows.len().min(MAX_ROWS)];
    missing_index_records(rows)
        .into_iter()
        .map(|r| {
            let table = r.table;
            Finding::new(
                Category::MissingIndex,
                Severity::Warning,
                format!("Missing index on `{table}`"),
            )
            .detail(format!("{} rows scanned without an index", thousands(r.scans)))
            .recommendation(format!(
                "Run EXPLAIN on frequent queries against `{table}`. \
                 Add a composite index on columns used in WHERE / JOIN / ORDER BY."
            ))
            .metric("table", table.as_str())
            .metric("scans", r.scans)
        })
        .collect()
}
