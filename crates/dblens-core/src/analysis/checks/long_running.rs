use super::{Check, long_running_records};
use crate::analysis::fields::Row;
use crate::analysis::{Category, Finding, Severity};
use crate::connector::Connector;

pub struct LongRunningCheck;

impl Check for LongRunningCheck {
    fn id(&self) -> &'static str {
        "long_running"
    }

    fn category(&self) -> Category {
        Category::LongRunning
    }

    fn run(&self, connector: &mut dyn Connector) -> Vec<Finding> {
        evaluate(&connector.long_running())
    }
}

/// Connectors apply the duration floor when fetching, so every row is a warning.
pub fn evaluate(rows: &[Row]) -> Vec<Finding> {
    long_running_records(rows)
        .into_iter()
        .map(|r| {
            Finding::new(
                Category::LongRunning,
                Severity::Warning,
                format!("Slow/expensive query pattern detected ({})", r.duration),
            )
            .detail(format!("Query: {:?}", r.query))
            .recommendation(
                "Add indexes on filter columns to avoid full scans. \
                 Rewrite JOINs to use indexed columns. \
                 Use LIMIT clauses to prevent runaway result sets.",
            )
            .metric("duration", r.duration)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fields::Scalar;

    #[test]
    fn every_row_is_a_warning() {
        let findings = evaluate(&[
            Row::new().with("duration", "00:02:13.4").with("query", "SELECT pg_sleep(200)"),
            Row::new().with("TIME", 31).with("query", "ALTER TABLE t ADD c int"),
            Row::new().with("secs_running", 12).with("query", "{aggregate: 'x'}"),
            Row::new().with("exec_sec", 45.5).with("query_text", "SELECT * FROM big"),
        ]);
        assert_eq!(findings.len(), 4);
        assert!(findings.iter().all(|f| f.severity == Severity::Warning));
        assert_eq!(
            findings[0].title,
            "Slow/expensive query pattern detected (00:02:13.4)"
        );
        assert_eq!(findings[1].metric.get("duration"), Some(&Scalar::from("31s")));
        assert_eq!(findings[3].metric.get("duration"), Some(&Scalar::from("45.5s")));
        assert!(findings[3].detail.contains("SELECT * FROM big"));
    }

    #[test]
    fn row_without_fields_still_warns() {
        let findings = evaluate(&[Row::new().with("pid", 4242)]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].detail, "Query: \"\"");
    }

    #[test]
    fn error_rows_are_not_findings() {
        let findings = evaluate(&[Row::new().with("error", "currentOp not permitted")]);
        assert!(findings.is_empty());
    }

    #[test]
    fn query_text_is_truncated() {
        let q = "SELECT ".to_string() + &"col, ".repeat(40);
        let f = &evaluate(&[Row::new().with("duration", "1 min").with("query", q.as_str())])[0];
        assert_eq!(f.detail.chars().count(), "Query: \"\"".len() + 80);
    }
}
