use super::{Check, bloat_records};
use crate::analysis::fields::Row;
use crate::analysis::records::BloatRecord;
use crate::analysis::{Category, Finding, Severity, Thresholds};
use crate::connector::Connector;
use crate::fmt::{format_count, thousands};

pub const THRESHOLDS: Thresholds = Thresholds::higher_is_worse(5.0, 20.0);

/// Tables above this size get an informational growth finding.
const LARGE_TABLE_MB: f64 = 5.0;

const VACUUM_RECOMMENDATION: &str = "Run VACUUM to reclaim wasted space. \
     For SQLite, run: sqlite3 mydb.db 'VACUUM;'. \
     For Postgres: VACUUM ANALYZE <table>. \
     Check that autovacuum is enabled.";

const GROWTH_RECOMMENDATION: &str = "Consider archiving old data, adding TTL policies, \
     or partitioning the table by date/range to keep it manageable.";

pub struct BloatCheck;

impl Check for BloatCheck {
    fn id(&self) -> &'static str {
        "bloat"
    }

    fn category(&self) -> Category {
        Category::Bloat
    }

    fn run(&self, connector: &mut dyn Connector) -> Vec<Finding> {
        evaluate(&connector.table_bloat())
    }
}

/// Dead-space and table-size findings are independent: one row can yield
/// both, either, or neither.
pub fn evaluate(rows: &[Row]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for record in bloat_records(rows) {
        if let Some(f) = dead_space(&record) {
            findings.push(f);
        }
        if let Some(f) = large_table(&record) {
            findings.push(f);
        }
    }
    findings
}

fn dead_space(record: &BloatRecord) -> Option<Finding> {
    let dead_pct = record.dead_pct();
    if dead_pct <= 0.0 {
        return None;
    }
    let (wasted_units, label, wasted_mb) = match record {
        BloatRecord::Database {
            freelist_pages,
            wasted_mb,
            ..
        } => (*freelist_pages, "freelist pages", *wasted_mb),
        BloatRecord::Table {
            dead_rows,
            wasted_mb,
            ..
        } => (*dead_rows, "dead rows", *wasted_mb),
    };
    let name = record.name();
    let wasted = wasted_mb
        .map(|mb| format!("  |  wasted: {mb} MB"))
        .unwrap_or_default();
    Some(
        Finding::new(
            Category::Bloat,
            THRESHOLDS.classify(dead_pct),
            format!("Storage bloat: {dead_pct:.1}% wasted ({name}, {label})"),
        )
        .detail(format!("{} {label}{wasted}", thousands(wasted_units)))
        .recommendation(VACUUM_RECOMMENDATION)
        .metric("table", name)
        .metric("dead_pct", dead_pct),
    )
}

fn large_table(record: &BloatRecord) -> Option<Finding> {
    let BloatRecord::Table {
        table,
        size_mb,
        live_rows,
        ..
    } = record
    else {
        return None;
    };
    if *size_mb <= LARGE_TABLE_MB {
        return None;
    }
    let rows = live_rows
        .as_ref()
        .map(format_count)
        .unwrap_or_else(|| "n/a".to_string());
    Some(
        Finding::new(
            Category::Bloat,
            Severity::Info,
            format!("Large table `{table}` ({size_mb:.1} MB)"),
        )
        .detail(format!("Rows: {rows}"))
        .recommendation(GROWTH_RECOMMENDATION)
        .metric("table", table.as_str())
        .metric("size_mb", *size_mb),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::records::DATABASE_SENTINEL;

    #[test]
    fn database_row_reports_freelist_pages() {
        let findings = evaluate(&[Row::new()
            .with("table_name", DATABASE_SENTINEL)
            .with("dead_pct", 25.0)
            .with("n_dead_tup", 1500)
            .with("wasted_mb", 5.859)
            .with("total_mb", 80.0)]);
        assert_eq!(findings.len(), 1, "database row never yields a size finding");
        let f = &findings[0];
        assert_eq!(f.severity, Severity::Critical);
        assert!(f.title.contains("freelist pages"));
        assert!(f.detail.starts_with("1,500 freelist pages"));
        assert!(f.detail.contains("wasted: 5.859 MB"));
    }

    #[test]
    fn table_row_reports_dead_rows() {
        let f = &evaluate(&[Row::new()
            .with("table_name", "orders")
            .with("dead_pct", 25.0)
            .with("n_dead_tup", 4000)])[0];
        assert_eq!(f.severity, Severity::Critical);
        assert!(f.title.contains("dead rows"));
        assert!(!f.title.contains("freelist"));
        assert_eq!(f.detail, "4,000 dead rows");
    }

    #[test]
    fn dead_pct_thresholds() {
        let sev = |pct: f64| {
            evaluate(&[Row::new().with("table_name", "t").with("dead_pct", pct)])[0].severity
        };
        assert_eq!(sev(1.0), Severity::Ok);
        assert_eq!(sev(5.0), Severity::Warning);
        assert_eq!(sev(19.9), Severity::Warning);
        assert_eq!(sev(20.0), Severity::Critical);
    }

    #[test]
    fn zero_dead_pct_is_silent() {
        assert!(evaluate(&[Row::new().with("table_name", "t").with("dead_pct", 0)]).is_empty());
    }

    #[test]
    fn large_table_is_info_independent_of_bloat() {
        let findings = evaluate(&[Row::new()
            .with("table_name", "orders")
            .with("dead_pct", 8.0)
            .with("n_live_tup", 120000)
            .with("size_mb", 64.0)]);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[1].severity, Severity::Info);
        assert_eq!(findings[1].title, "Large table `orders` (64.0 MB)");
        assert_eq!(findings[1].detail, "Rows: 120,000");
    }

    #[test]
    fn small_tables_are_not_reported() {
        let rows = [
            Row::new().with("collection", "a").with("storage_mb", 5.0),
            Row::new().with("collection", "b").with("size_mb", 0.5),
        ];
        assert!(evaluate(&rows).is_empty());
    }

    #[test]
    fn missing_table_name_falls_back_to_unknown() {
        let f = &evaluate(&[Row::new().with("total_mb", 9.0)])[0];
        assert_eq!(f.title, "Large table `unknown` (9.0 MB)");
        assert_eq!(f.detail, "Rows: n/a");
    }
}
