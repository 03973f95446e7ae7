use super::{Check, parse_rows};
use crate::analysis::records::PoolUsageRecord;
use crate::analysis::{Category, Finding, Severity, Thresholds};
use crate::connector::{CacheScope, Connector, ResourceUsage};
use crate::fmt::thousands;

/// Cache hit percentage; low is bad.
pub const CACHE_THRESHOLDS: Thresholds = Thresholds::lower_is_worse(80.0, 50.0);

/// Journal mode that syncs the whole file on every write.
const SLOW_JOURNAL_MODE: &str = "delete";

const FREELIST_PAGES_INFO: i64 = 100;

/// Blocked operations above this are critical; any at all is a warning.
const BLOCKED_CRITICAL: i64 = 5;

/// Only the heaviest pools are examined.
const MAX_POOLS: usize = 3;

/// Pool usage (e.g. warehouse credits over 7 days) above this is a warning.
const POOL_USAGE_WARN: f64 = 100.0;

pub struct ResourceCheck;

impl Check for ResourceCheck {
    fn id(&self) -> &'static str {
        "resources"
    }

    fn category(&self) -> Category {
        Category::Resource
    }

    fn run(&self, connector: &mut dyn Connector) -> Vec<Finding> {
        evaluate(&connector.resource_usage())
    }
}

/// Each sub-metric is optional and yields at most one finding, except pools
/// which yield one per heavy pool.
pub fn evaluate(usage: &ResourceUsage) -> Vec<Finding> {
    let mut findings = Vec::new();
    findings.extend(cache_hit(usage));
    findings.extend(journal_mode(usage));
    findings.extend(freelist(usage));
    findings.extend(blocked(usage));
    findings.extend(memory(usage));
    findings.extend(pools(usage));
    findings
}

fn cache_hit(usage: &ResourceUsage) -> Option<Finding> {
    let pct = usage.cache_hit_pct?;
    let severity = CACHE_THRESHOLDS.classify(pct);
    // Cache health is only reported when degraded.
    if severity == Severity::Ok {
        return None;
    }
    let detail = match usage.cache_scope {
        CacheScope::FileCoverage => {
            format!("Cache covers only {pct:.1}% of DB file (cache too small)")
        }
        CacheScope::BufferPool => format!("Buffer cache hit rate {pct:.1}%"),
    };
    Some(
        Finding::new(
            Category::Resource,
            severity,
            format!("Low cache coverage: {pct:.1}%"),
        )
        .detail(detail)
        .recommendation(
            "Increase PRAGMA cache_size in SQLite (e.g. PRAGMA cache_size=-64000 for 64MB). \
             For Postgres: increase shared_buffers. For MySQL: innodb_buffer_pool_size.",
        )
        .metric("cache_hit_pct", pct),
    )
}

fn journal_mode(usage: &ResourceUsage) -> Option<Finding> {
    let mode = usage.journal_mode.as_deref()?;
    if !mode.eq_ignore_ascii_case(SLOW_JOURNAL_MODE) {
        return None;
    }
    Some(
        Finding::new(
            Category::Resource,
            Severity::Warning,
            "SQLite using slow DELETE journal mode",
        )
        .detail("journal_mode=delete causes full-file sync on every write")
        .recommendation(
            "Switch to WAL mode for much better write performance: PRAGMA journal_mode=WAL;",
        )
        .metric("journal_mode", SLOW_JOURNAL_MODE),
    )
}

fn freelist(usage: &ResourceUsage) -> Option<Finding> {
    let pages = usage.freelist_pages.filter(|&p| p > FREELIST_PAGES_INFO)?;
    Some(
        Finding::new(
            Category::Resource,
            Severity::Info,
            format!("SQLite has {} unused freelist pages", thousands(pages)),
        )
        .detail("Pages freed by DELETE but not yet returned to OS")
        .recommendation("Run: sqlite3 yourdb.db 'VACUUM;' to compact the file.")
        .metric("freelist_pages", pages),
    )
}

fn blocked(usage: &ResourceUsage) -> Option<Finding> {
    let n = usage.blocked_queries.filter(|&n| n > 0)?;
    let severity = if n > BLOCKED_CRITICAL {
        Severity::Critical
    } else {
        Severity::Warning
    };
    Some(
        Finding::new(
            Category::Resource,
            severity,
            format!("{n} queries blocked by locks"),
        )
        .detail("Queries are waiting for row/table locks")
        .recommendation(
            "Find the blocking session (pg_blocking_pids() on Postgres, \
             sys.innodb_lock_waits on MySQL). Use shorter transactions and row-level locking.",
        )
        .metric("blocked", n),
    )
}

fn memory(usage: &ResourceUsage) -> Option<Finding> {
    let mem = usage.memory.as_ref().filter(|m| m.resident_mb > 0.0)?;
    Some(
        Finding::new(
            Category::Resource,
            Severity::Info,
            format!(
                "Memory: {} MB resident / {} MB virtual",
                mem.resident_mb, mem.virtual_mb
            ),
        )
        .recommendation("Ensure the storage engine cache (e.g. WiredTiger) is ~50% of available RAM.")
        .metric("resident", mem.resident_mb)
        .metric("virtual", mem.virtual_mb),
    )
}

fn pools(usage: &ResourceUsage) -> Vec<Finding> {
    let mut pools = parse_rows("resources", &usage.pools, PoolUsageRecord::from_row);
    pools.sort_by(|a, b| b.usage.total_cmp(&a.usage));
    pools
        .into_iter()
        .take(MAX_POOLS)
        .filter(|p| p.usage > POOL_USAGE_WARN)
        .map(|p| {
            let (name, credits) = (p.name, p.usage);
            Finding::new(
                Category::Resource,
                Severity::Warning,
                format!("High credit usage: {name} ({credits:.0} credits / 7d)"),
            )
            .recommendation(
                "Review auto-suspend settings, downsize the warehouse, \
                 and investigate heavy repeated queries.",
            )
            .metric("warehouse", name.as_str())
            .metric("credits_7d", credits)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::fields::{Row, Scalar};
    use crate::connector::MemoryUsage;

    fn with_cache(pct: f64) -> ResourceUsage {
        ResourceUsage {
            cache_hit_pct: Some(pct),
            ..ResourceUsage::default()
        }
    }

    fn with_blocked(n: i64) -> ResourceUsage {
        ResourceUsage {
            blocked_queries: Some(n),
            ..ResourceUsage::default()
        }
    }

    #[test]
    fn empty_bag_is_silent() {
        assert!(evaluate(&ResourceUsage::default()).is_empty());
    }

    #[test]
    fn healthy_cache_is_suppressed() {
        assert!(evaluate(&with_cache(95.0)).is_empty());
    }

    #[test]
    fn degraded_cache_is_reported() {
        let f = evaluate(&with_cache(60.0));
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].severity, Severity::Warning);
        assert_eq!(f[0].detail, "Buffer cache hit rate 60.0%");
        assert_eq!(evaluate(&with_cache(10.0))[0].severity, Severity::Critical);
    }

    #[test]
    fn file_coverage_wording() {
        let usage = ResourceUsage {
            cache_scope: CacheScope::FileCoverage,
            ..with_cache(12.0)
        };
        let f = &evaluate(&usage)[0];
        assert!(f.detail.starts_with("Cache covers only 12.0%"));
    }

    #[test]
    fn blocked_operations_rule() {
        assert_eq!(evaluate(&with_blocked(3))[0].severity, Severity::Warning);
        assert_eq!(evaluate(&with_blocked(5))[0].severity, Severity::Warning);
        assert_eq!(evaluate(&with_blocked(6))[0].severity, Severity::Critical);
        assert!(evaluate(&with_blocked(0)).is_empty());
    }

    #[test]
    fn delete_journal_mode_always_warns() {
        let usage = ResourceUsage {
            journal_mode: Some("DELETE".into()),
            ..ResourceUsage::default()
        };
        let f = evaluate(&usage);
        assert_eq!(f.len(), 1);
        assert_eq!(f[0].severity, Severity::Warning);

        let wal = ResourceUsage {
            journal_mode: Some("wal".into()),
            ..ResourceUsage::default()
        };
        assert!(evaluate(&wal).is_empty());
    }

    #[test]
    fn freelist_pages_over_100_are_info() {
        let usage = |pages| ResourceUsage {
            freelist_pages: Some(pages),
            ..ResourceUsage::default()
        };
        assert!(evaluate(&usage(100)).is_empty());
        let f = &evaluate(&usage(2048))[0];
        assert_eq!(f.severity, Severity::Info);
        assert_eq!(f.title, "SQLite has 2,048 unused freelist pages");
    }

    #[test]
    fn resident_memory_is_info() {
        let usage = ResourceUsage {
            memory: Some(MemoryUsage {
                resident_mb: 512.0,
                virtual_mb: 2048.0,
            }),
            ..ResourceUsage::default()
        };
        let f = &evaluate(&usage)[0];
        assert_eq!(f.severity, Severity::Info);
        assert_eq!(f.metric.get("resident"), Some(&Scalar::Float(512.0)));

        let idle = ResourceUsage {
            memory: Some(MemoryUsage::default()),
            ..ResourceUsage::default()
        };
        assert!(evaluate(&idle).is_empty());
    }

    #[test]
    fn only_top_three_pools_over_100_warn() {
        let pool = |name: &str, credits: f64| {
            Row::new()
                .with("warehouse_name", name)
                .with("total_credits", credits)
        };
        let usage = ResourceUsage {
            pools: vec![
                pool("small", 20.0),
                pool("etl", 450.0),
                Row::new()
                    .with("WAREHOUSE_NAME", "bi")
                    .with("TOTAL_CREDITS", 130.0),
                pool("adhoc", 101.0),
                pool("huge_but_fourth", 100.5),
            ],
            ..ResourceUsage::default()
        };
        let f = evaluate(&usage);
        let names: Vec<_> = f
            .iter()
            .map(|f| f.metric.get("warehouse").cloned().unwrap())
            .collect();
        assert_eq!(
            names,
            [Scalar::from("etl"), Scalar::from("bi"), Scalar::from("adhoc")]
        );
        assert!(f.iter().all(|f| f.severity == Severity::Warning));
    }

    #[test]
    fn emission_order_is_fixed() {
        let usage = ResourceUsage {
            cache_hit_pct: Some(40.0),
            journal_mode: Some("delete".into()),
            freelist_pages: Some(500),
            blocked_queries: Some(1),
            ..ResourceUsage::default()
        };
        let titles: Vec<_> = evaluate(&usage).into_iter().map(|f| f.title).collect();
        assert_eq!(titles.len(), 4);
        assert!(titles[0].starts_with("Low cache coverage"));
        assert!(titles[1].contains("journal mode"));
        assert!(titles[2].contains("freelist"));
        assert!(titles[3].contains("blocked"));
    }
}
