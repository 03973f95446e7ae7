//! SQL builders for the PostgreSQL diagnostic views.
//!
//! Numeric results are cast to `double precision` / `bigint` so every column
//! maps onto a plain scalar without extra client-side type support.

/// Slow statements from pg_stat_statements, slowest mean first. `$1` is the row limit.
///
/// PostgreSQL 13 renamed the timing columns (`mean_time` → `mean_exec_time`).
pub(super) fn build_slow_queries_query(server_version_num: Option<i32>) -> String {
    let (total, mean, stddev) = if server_version_num.unwrap_or(0) >= 130000 {
        ("total_exec_time", "mean_exec_time", "stddev_exec_time")
    } else {
        ("total_time", "mean_time", "stddev_time")
    };

    format!(
        r#"
            SELECT
                query,
                calls::bigint AS calls,
                round({total}::numeric, 2)::double precision AS total_ms,
                round({mean}::numeric, 2)::double precision AS mean_ms,
                round({stddev}::numeric, 2)::double precision AS stddev_ms,
                round(({mean} * calls)::numeric
                    / NULLIF(SUM({total}) OVER (), 0)::numeric * 100, 2)::double precision AS pct_total,
                rows::bigint AS rows
            FROM pg_stat_statements
            ORDER BY {mean} DESC
            LIMIT $1
        "#
    )
}

/// Tables read mostly by sequential scans.
pub(super) fn build_missing_indexes_query() -> &'static str {
    r#"
        SELECT
            schemaname || '.' || relname AS table_name,
            seq_scan::bigint AS seq_scan,
            seq_tup_read::bigint AS seq_tup_read,
            idx_scan::bigint AS idx_scan,
            round(seq_tup_read::numeric / NULLIF(seq_scan, 0), 0)::double precision
                AS avg_rows_per_seq_scan
        FROM pg_stat_user_tables
        WHERE seq_scan > 50
          AND (idx_scan IS NULL OR seq_scan > idx_scan * 3)
        ORDER BY seq_tup_read DESC
        LIMIT 20
    "#
}

/// Dead-tuple ratio and on-disk size per table.
pub(super) fn build_table_bloat_query() -> &'static str {
    r#"
        SELECT
            schemaname || '.' || relname AS table_name,
            n_dead_tup::bigint AS n_dead_tup,
            n_live_tup::bigint AS n_live_tup,
            CASE WHEN n_live_tup > 0
                 THEN round(n_dead_tup * 100.0 / n_live_tup, 2)::double precision
                 ELSE 0 END AS dead_pct,
            round(pg_total_relation_size(relid) / 1024.0 / 1024.0, 3)::double precision AS size_mb,
            COALESCE(last_vacuum::text, '') AS last_vacuum,
            COALESCE(last_autovacuum::text, '') AS last_autovacuum,
            COALESCE(last_analyze::text, '') AS last_analyze
        FROM pg_stat_user_tables
        WHERE n_dead_tup > 1000
           OR pg_total_relation_size(relid) > 5 * 1024 * 1024
        ORDER BY dead_pct DESC
        LIMIT 20
    "#
}

/// Heap buffer cache hit percentage across user tables.
pub(super) fn build_cache_hit_query() -> &'static str {
    r#"
        SELECT
            round(sum(heap_blks_hit) * 100.0
                / NULLIF(sum(heap_blks_hit) + sum(heap_blks_read), 0), 2)::double precision
                AS cache_hit_pct
        FROM pg_statio_user_tables
    "#
}

/// Sessions currently waiting on a lock.
pub(super) fn build_blocked_query() -> &'static str {
    r#"
        SELECT count(*)::bigint AS blocked_queries
        FROM pg_stat_activity
        WHERE wait_event_type = 'Lock'
    "#
}

pub(super) fn build_connections_query() -> &'static str {
    r#"
        SELECT COALESCE(state, 'unknown') AS state, count(*)::bigint AS cnt
        FROM pg_stat_activity
        GROUP BY state
    "#
}

pub(super) fn build_database_size_query() -> &'static str {
    r#"
        SELECT pg_size_pretty(pg_database_size(current_database())) AS db_size
    "#
}

/// Index scan counts, least used first.
pub(super) fn build_index_usage_query() -> &'static str {
    r#"
        SELECT
            schemaname || '.' || relname AS table_name,
            indexrelname AS index_name,
            idx_scan::bigint AS idx_scan,
            pg_size_pretty(pg_relation_size(indexrelid)) AS index_size
        FROM pg_stat_user_indexes
        ORDER BY idx_scan ASC
        LIMIT 20
    "#
}

/// Active statements running longer than `$1` seconds.
pub(super) fn build_long_running_query() -> &'static str {
    r#"
        SELECT
            pid,
            (now() - query_start)::text AS duration,
            EXTRACT(EPOCH FROM now() - query_start)::double precision AS elapsed_sec,
            COALESCE(state, '') AS state,
            left(query, 120) AS query
        FROM pg_stat_activity
        WHERE state != 'idle'
          AND query_start IS NOT NULL
          AND pid != pg_backend_pid()
          AND now() - query_start > make_interval(secs => $1)
        ORDER BY now() - query_start DESC
    "#
}
