pub mod bloat;
pub mod index_usage;
pub mod long_running;
pub mod missing_indexes;
pub mod resources;
pub mod slow_queries;

use super::records::{
    BloatRecord, IndexUsageRecord, LongRunningRecord, MissingIndexRecord, SlowQueryRecord,
};
use super::{Category, Finding};
use crate::analysis::fields::Row;
use crate::connector::{Capability, Connector};
use tracing::warn;

/// One diagnostic domain: fetches its rows from the connector and turns them
/// into findings. The conversion itself is a pure function of the rows.
pub trait Check {
    fn id(&self) -> &'static str;
    fn category(&self) -> Category;

    /// Capability the connector must declare for this check to run.
    fn requires(&self) -> Option<Capability> {
        None
    }

    fn run(&self, connector: &mut dyn Connector) -> Vec<Finding>;
}

/// All checks, in the order the analyzer runs them.
pub fn all_checks() -> Vec<Box<dyn Check>> {
    vec![
        Box::new(slow_queries::SlowQueryCheck),
        Box::new(missing_indexes::MissingIndexCheck),
        Box::new(bloat::BloatCheck),
        Box::new(resources::ResourceCheck),
        Box::new(index_usage::IndexUsageCheck),
        Box::new(long_running::LongRunningCheck),
    ]
}

/// Parses raw rows into records, logging rows a connector degraded to an
/// error marker.
pub(crate) fn parse_rows<T>(
    check: &'static str,
    rows: &[Row],
    parse: impl Fn(&Row) -> Option<T>,
) -> Vec<T> {
    rows.iter()
        .filter_map(|row| {
            if let Some(err) = row.error() {
                warn!(check, error = %err, "connector reported a failed diagnostic");
                return None;
            }
            parse(row)
        })
        .collect()
}

pub(crate) fn slow_query_records(rows: &[Row]) -> Vec<SlowQueryRecord> {
    parse_rows("slow_queries", rows, SlowQueryRecord::from_row)
}

pub(crate) fn missing_index_records(rows: &[Row]) -> Vec<MissingIndexRecord> {
    parse_rows("missing_indexes", rows, MissingIndexRecord::from_row)
}

pub(crate) fn bloat_records(rows: &[Row]) -> Vec<BloatRecord> {
    parse_rows("bloat", rows, BloatRecord::from_row)
}

pub(crate) fn index_usage_records(rows: &[Row]) -> Vec<IndexUsageRecord> {
    parse_rows("index_usage", rows, IndexUsageRecord::from_row)
}

pub(crate) fn long_running_records(rows: &[Row]) -> Vec<LongRunningRecord> {
    parse_rows("long_running", rows, LongRunningRecord::from_row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_check_owns_one_category() {
        let categories: Vec<Category> = all_checks().iter().map(|c| c.category()).collect();
        assert_eq!(
            categories,
            [
                Category::SlowQuery,
                Category::MissingIndex,
                Category::Bloat,
                Category::Resource,
                Category::IndexUsage,
                Category::LongRunning,
            ]
        );
    }
}
