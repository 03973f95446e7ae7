use super::{Check, slow_query_records};
use crate::analysis::fields::{Row, Scalar};
use crate::analysis::{Category, Finding, Thresholds};
use crate::connector::Connector;
use crate::fmt::format_count;

/// Rows beyond this many are ignored; connectors already order by duration.
const MAX_ROWS: usize = 10;

/// Durations under this are noise and never reported.
const NOISE_FLOOR_MS: f64 = 1.0;

pub const THRESHOLDS: Thresholds = Thresholds::higher_is_worse(100.0, 500.0);

/// Shown in place of a call count the backend does not report.
pub const NOT_AVAILABLE: &str = "n/a";

const RECOMMENDATION: &str = "Review the query plan (EXPLAIN / EXPLAIN QUERY PLAN). \
     Add an index on the filter/join columns. \
     Consider caching frequent read-only results.";

pub struct SlowQueryCheck;

impl Check for SlowQueryCheck {
    fn id(&self) -> &'static str {
        "slow_queries"
    }

    fn category(&self) -> Category {
        Category::SlowQuery
    }

    fn run(&self, connector: &mut dyn Connector) -> Vec<Finding> {
        evaluate(&connector.slow_queries())
    }
}

pub fn evaluate(rows: &[Row]) -> Vec<Finding> {
    let rows = &rows[..rows.len().min(MAX_ROWS)];
    slow_query_records(rows)
        .into_iter()
        .filter(|r| r.mean_ms >= NOISE_FLOOR_MS)
        .map(|r| {
            let mean = r.mean_ms;
            let rows_scanned = r
                .rows_scanned
                .as_ref()
                .map(format_count)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string());
            let calls = r
                .calls
                .unwrap_or_else(|| Scalar::from(NOT_AVAILABLE));
            Finding::new(
                Category::SlowQuery,
                THRESHOLDS.classify(mean),
                format!("Slow query ({mean:.1} ms avg)"),
            )
            .detail(format!("Query: {:?}  |  rows scanned: {rows_scanned}", r.query))
            .recommendation(RECOMMENDATION)
            .metric("mean_ms", mean)
            .metric("calls", calls)
        })
        .collect()
}
