//! 性能类诊断：慢查询、连接、索引、I/O、系统健康与负载洞察

use super::{check, col, field, hit_ratio_below, num, Check, DiagnosticQuery, Field, Layout, Render, Section};

// ---------------------------------------------------------------------------
// slow_query
// ---------------------------------------------------------------------------

pub static SLOW_QUERY: &[DiagnosticQuery] = &[
    DiagnosticQuery {
        name: "active_slow_queries",
        sql: "SELECT datname, pid, usename, application_name, client_addr, state,
                     now() - query_start AS duration, query
              FROM pg_stat_activity
              WHERE backend_type = 'client backend' AND state = 'active'
                AND query_start < now() - interval '5 minutes'
              ORDER BY duration DESC",
        section: Section {
            header: "ACTIVE SLOW QUERIES (> 5 minutes)",
            layout: Layout::Items {
                label: "Active Query",
                fields: &[
                    col("PID", "pid"),
                    col("Database", "datname"),
                    col("Username", "usename"),
                    col("Application", "application_name"),
                    col("Client Address", "client_addr"),
                    col("State", "state"),
                    col("Duration", "duration"),
                    col("Query", "query"),
                ],
                checks: &[],
            },
            empty: "No active slow queries found.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "top_queries_by_avg_time",
        sql: "SELECT query, total_exec_time AS total_time, calls, mean_exec_time AS avg_time
              FROM pg_stat_statements
              ORDER BY avg_time DESC
              LIMIT 10",
        section: Section {
            header: "TOP 10 QUERIES BY AVERAGE EXECUTION TIME",
            layout: Layout::Items {
                label: "Query",
                fields: STATEMENT_TIMING,
                checks: &[],
            },
            empty: "No query statistics found.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "top_queries_by_calls",
        sql: "SELECT query, calls, total_exec_time AS total_time, mean_exec_time AS avg_time
              FROM pg_stat_statements
              ORDER BY calls DESC
              LIMIT 10",
        section: Section {
            header: "TOP 10 QUERIES BY CALLS",
            layout: Layout::Items {
                label: "Query",
                fields: STATEMENT_TIMING,
                checks: &[],
            },
            empty: "No query statistics found.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "slow_queries_detailed",
        sql: "SELECT COALESCE(r.rolname, 'unknown') AS username,
                     COALESCE(d.datname, 'unknown') AS database,
                     s.query,
                     s.calls,
                     s.total_exec_time / 1000 AS total_time_sec,
                     s.min_exec_time / 1000 AS min_time_sec,
                     s.max_exec_time / 1000 AS max_time_sec,
                     s.mean_exec_time / 1000 AS avg_time_sec,
                     s.stddev_exec_time / 1000 AS stddev_time_sec,
                     s.rows,
                     s.shared_blks_hit,
                     s.shared_blks_read,
                     CASE WHEN s.shared_blks_hit + s.shared_blks_read > 0
                          THEN ROUND(s.shared_blks_hit::numeric / (s.shared_blks_hit + s.shared_blks_read) * 100, 2)
                          ELSE 0
                     END AS cache_hit_ratio_pct
              FROM pg_stat_statements s
              LEFT JOIN pg_roles r ON r.oid = s.userid
              LEFT JOIN pg_database d ON d.oid = s.dbid
              WHERE s.mean_exec_time >= 1000
              ORDER BY s.total_exec_time DESC
              LIMIT 10",
        section: Section {
            header: "TOP 10 SLOW QUERIES (mean >= 1 sec)",
            layout: Layout::Items {
                label: "Query",
                fields: &[
                    col("Username", "username"),
                    col("Database", "database"),
                    col("Calls", "calls"),
                    field("Total Time", Render::Fixed("total_time_sec", " sec")),
                    field("Avg Time", Render::Fixed("avg_time_sec", " sec")),
                    field("Min Time", Render::Fixed("min_time_sec", " sec")),
                    field("Max Time", Render::Fixed("max_time_sec", " sec")),
                    field("Stddev Time", Render::Fixed("stddev_time_sec", " sec")),
                    col("Rows", "rows"),
                    field("Cache Hit Ratio", Render::Suffixed("cache_hit_ratio_pct", "%")),
                    col("Query", "query"),
                ],
                checks: &[],
            },
            empty: "No slow queries found.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "high_io_queries",
        sql: "SELECT COALESCE(r.rolname, 'unknown') AS username,
                     COALESCE(d.datname, 'unknown') AS database,
                     s.query,
                     s.shared_blks_hit,
                     s.shared_blks_read,
                     s.shared_blks_dirtied,
                     s.shared_blks_written,
                     s.local_blks_hit,
                     s.local_blks_read,
                     s.temp_blks_read,
                     s.temp_blks_written
              FROM pg_stat_statements s
              LEFT JOIN pg_roles r ON r.oid = s.userid
              LEFT JOIN pg_database d ON d.oid = s.dbid
              ORDER BY s.shared_blks_read + s.shared_blks_written DESC
              LIMIT 5",
        section: Section {
            header: "TOP 5 HIGH I/O QUERIES",
            layout: Layout::Items {
                label: "Query",
                fields: &[
                    col("Username", "username"),
                    col("Database", "database"),
                    col("Shared Blocks Hit", "shared_blks_hit"),
                    col("Shared Blocks Read", "shared_blks_read"),
                    col("Shared Blocks Dirtied", "shared_blks_dirtied"),
                    col("Shared Blocks Written", "shared_blks_written"),
                    col("Temp Blocks Read", "temp_blks_read"),
                    col("Temp Blocks Written", "temp_blks_written"),
                    col("Query", "query"),
                ],
                checks: &[],
            },
            empty: "No high I/O queries found.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "high_temp_queries",
        sql: "SELECT COALESCE(r.rolname, 'unknown') AS username,
                     COALESCE(d.datname, 'unknown') AS database,
                     s.query,
                     s.temp_blks_read,
                     s.temp_blks_written
              FROM pg_stat_statements s
              LEFT JOIN pg_roles r ON r.oid = s.userid
              LEFT JOIN pg_database d ON d.oid = s.dbid
              ORDER BY s.temp_blks_written + s.temp_blks_read DESC
              LIMIT 5",
        section: Section {
            header: "TOP 5 HIGH TEMP USAGE QUERIES",
            layout: Layout::Items {
                label: "Query",
                fields: &[
                    col("Username", "username"),
                    col("Database", "database"),
                    col("Temp Blocks Read", "temp_blks_read"),
                    col("Temp Blocks Written", "temp_blks_written"),
                    col("Query", "query"),
                ],
                checks: &[],
            },
            empty: "No high temp usage queries found.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "blocking_queries",
        sql: "SELECT blocked.pid AS blocked_pid,
                     blocked.usename AS blocked_user,
                     blocking.pid AS blocking_pid,
                     blocking.usename AS blocking_user,
                     blocked.query AS blocked_query,
                     blocking.query AS blocking_query
              FROM pg_stat_activity blocked
              JOIN pg_stat_activity blocking ON blocking.pid = ANY(pg_blocking_pids(blocked.pid))
              WHERE blocked.pid <> blocking.pid
              LIMIT 3",
        section: Section {
            header: "BLOCKING QUERIES",
            layout: Layout::Items {
                label: "Blocking Situation",
                fields: &[
                    col("Blocked PID", "blocked_pid"),
                    col("Blocked User", "blocked_user"),
                    col("Blocked Query", "blocked_query"),
                    col("Blocking PID", "blocking_pid"),
                    col("Blocking User", "blocking_user"),
                    col("Blocking Query", "blocking_query"),
                ],
                checks: &[],
            },
            empty: "No blocking queries found.",
            recommendation: None,
        },
    },
];

const STATEMENT_TIMING: &[Field] = &[
    col("Calls", "calls"),
    field("Total Time", Render::Fixed("total_time", " ms")),
    field("Avg Time", Render::Fixed("avg_time", " ms")),
    col("Query", "query"),
];

// ---------------------------------------------------------------------------
// connection_management_issues
// ---------------------------------------------------------------------------

pub static CONNECTION_MANAGEMENT: &[DiagnosticQuery] = &[
    DiagnosticQuery {
        name: "current_connections",
        sql: "SELECT datname AS database,
                     usename AS username,
                     application_name,
                     client_addr,
                     backend_start,
                     state,
                     wait_event_type,
                     wait_event,
                     query
              FROM pg_stat_activity
              WHERE state IS NOT NULL
              ORDER BY backend_start DESC",
        section: Section {
            header: "CURRENT CONNECTIONS",
            layout: Layout::Items {
                label: "Connection",
                fields: &[
                    col("Database", "database"),
                    col("Username", "username"),
                    col("Application", "application_name"),
                    col("Client Address", "client_addr"),
                    col("State", "state"),
                    col("Wait Event Type", "wait_event_type"),
                    col("Wait Event", "wait_event"),
                    col("Current Query", "query"),
                ],
                checks: &[],
            },
            empty: "No current connections found.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "connection_stats",
        sql: "SELECT datname AS database,
                     numbackends AS current_connections,
                     xact_commit AS commits,
                     xact_rollback AS rollbacks,
                     blks_read,
                     blks_hit,
                     tup_returned,
                     tup_fetched,
                     tup_inserted,
                     tup_updated,
                     tup_deleted
              FROM pg_stat_database
              WHERE datname IS NOT NULL",
        section: Section {
            header: "DATABASE CONNECTION STATISTICS",
            layout: Layout::Keyed {
                label: "Database",
                column: "database",
                fields: &[
                    col("Current Connections", "current_connections"),
                    col("Commits", "commits"),
                    col("Rollbacks", "rollbacks"),
                    col("Blocks Read", "blks_read"),
                    col("Blocks Hit", "blks_hit"),
                    col("Tuples Returned", "tup_returned"),
                    col("Tuples Fetched", "tup_fetched"),
                    col("Tuples Inserted", "tup_inserted"),
                    col("Tuples Updated", "tup_updated"),
                    col("Tuples Deleted", "tup_deleted"),
                ],
                checks: &[],
            },
            empty: "No connection statistics available.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "idle_connections",
        sql: "SELECT datname AS database,
                     usename AS username,
                     application_name,
                     client_addr,
                     backend_start,
                     state,
                     state_change,
                     query
              FROM pg_stat_activity
              WHERE state = 'idle'
              ORDER BY backend_start DESC",
        section: Section {
            header: "IDLE CONNECTIONS",
            layout: Layout::Items {
                label: "Idle Connection",
                fields: &[
                    col("Database", "database"),
                    col("Username", "username"),
                    col("Application", "application_name"),
                    col("Client Address", "client_addr"),
                    col("Backend Start", "backend_start"),
                    col("State Change", "state_change"),
                    col("Last Query", "query"),
                ],
                checks: &[],
            },
            empty: "No idle connections found.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "locked_queries",
        sql: "SELECT DISTINCT ON (sa.pid)
                     sa.pid,
                     sa.usename AS username,
                     sa.datname AS database,
                     locks.mode,
                     CASE locks.locktype
                         WHEN 'relation' THEN rel.relname::text
                         WHEN 'virtualxid' THEN 'virtual transaction'
                         WHEN 'transactionid' THEN 'transaction'
                         WHEN 'tuple' THEN 'tuple'
                         ELSE locks.locktype
                     END AS lock_type,
                     sa.application_name,
                     sa.state,
                     sa.query,
                     age(now(), sa.query_start) AS query_duration
              FROM pg_stat_activity sa
              JOIN pg_locks locks ON sa.pid = locks.pid
              LEFT JOIN pg_class rel ON rel.oid = locks.relation
              WHERE NOT locks.granted
              ORDER BY sa.pid, sa.query_start",
        section: Section {
            header: "LOCKED QUERIES",
            layout: Layout::Items {
                label: "Locked Query",
                fields: &[
                    col("PID", "pid"),
                    col("Username", "username"),
                    col("Database", "database"),
                    col("Lock Type", "lock_type"),
                    col("Lock Mode", "mode"),
                    col("Application", "application_name"),
                    col("State", "state"),
                    col("Query Duration", "query_duration"),
                    col("Query", "query"),
                ],
                checks: &[],
            },
            empty: "No locked queries found.",
            recommendation: None,
        },
    },
];

// ---------------------------------------------------------------------------
// index_analysis
// ---------------------------------------------------------------------------

pub static INDEX_ANALYSIS: &[DiagnosticQuery] = &[
    DiagnosticQuery {
        name: "unused_indexes",
        sql: "SELECT s.schemaname,
                     s.relname AS table_name,
                     s.indexrelname AS index_name,
                     s.idx_scan,
                     pg_size_pretty(pg_relation_size(s.indexrelid)) AS index_size,
                     pg_relation_size(s.indexrelid) AS index_size_bytes
              FROM pg_stat_user_indexes s
              JOIN pg_index i ON s.indexrelid = i.indexrelid
              WHERE s.idx_scan = 0 AND NOT i.indisprimary
              ORDER BY pg_relation_size(s.indexrelid) DESC",
        section: Section {
            header: "UNUSED INDEXES",
            layout: Layout::Items {
                label: "Unused Index",
                fields: &[
                    col("Schema", "schemaname"),
                    col("Table", "table_name"),
                    col("Index", "index_name"),
                    col("Scan Count", "idx_scan"),
                    col("Index Size", "index_size"),
                ],
                checks: &[],
            },
            empty: "No unused indexes found.",
            recommendation: Some(
                "Consider removing these unused indexes to reduce maintenance overhead and storage space.",
            ),
        },
    },
    DiagnosticQuery {
        name: "missing_indexes",
        sql: "SELECT schemaname,
                     relname AS table_name,
                     seq_scan,
                     seq_tup_read,
                     idx_scan,
                     idx_tup_fetch,
                     pg_size_pretty(pg_relation_size(relid)) AS table_size,
                     ROUND((seq_scan::float / (seq_scan + COALESCE(idx_scan, 0) + 1)::float)::numeric, 2) AS seq_scan_ratio
              FROM pg_stat_user_tables
              WHERE seq_scan > 0
              ORDER BY seq_tup_read DESC",
        section: Section {
            header: "POTENTIAL MISSING INDEXES (High Sequential Scans)",
            layout: Layout::Items {
                label: "Table",
                fields: &[
                    col("Schema", "schemaname"),
                    col("Table", "table_name"),
                    col("Sequential Scans", "seq_scan"),
                    col("Sequential Tuples Read", "seq_tup_read"),
                    col("Index Scans", "idx_scan"),
                    col("Index Tuples Fetched", "idx_tup_fetch"),
                    col("Table Size", "table_size"),
                    col("Sequential Scan Ratio", "seq_scan_ratio"),
                ],
                checks: &[],
            },
            empty: "No tables with significant sequential scans found.",
            recommendation: Some(
                "Tables with high sequential scan ratios might benefit from additional indexes.",
            ),
        },
    },
    DiagnosticQuery {
        name: "index_efficiency",
        sql: "SELECT s.relname AS table_name,
                     i.indexrelname AS index_name,
                     i.idx_scan AS times_used,
                     pg_size_pretty(pg_relation_size(i.indexrelid)) AS index_size,
                     ROUND((i.idx_scan::float / NULLIF(pg_relation_size(i.indexrelid), 0)::float)::numeric, 6) AS scans_per_byte
              FROM pg_stat_user_tables s
              JOIN pg_stat_user_indexes i ON s.relid = i.relid
              WHERE i.idx_scan > 0
              ORDER BY i.idx_scan::float / NULLIF(pg_relation_size(i.indexrelid), 0)::float ASC
              LIMIT 20",
        section: Section {
            header: "INDEX USAGE EFFICIENCY",
            layout: Layout::Items {
                label: "Index",
                fields: &[
                    col("Table", "table_name"),
                    col("Index", "index_name"),
                    col("Times Used", "times_used"),
                    col("Index Size", "index_size"),
                    col("Scans per Byte", "scans_per_byte"),
                ],
                checks: &[],
            },
            empty: "No index usage statistics found.",
            recommendation: Some(
                "Indexes with very low scans per byte might be candidates for removal or restructuring.",
            ),
        },
    },
];

// ---------------------------------------------------------------------------
// io_analysis
// ---------------------------------------------------------------------------

const LOW_BUFFER_HIT: &[Check] = &[check(
    "Low buffer hit ratio. Consider increasing shared_buffers.",
    |r| hit_ratio_below(r, &["heap_blks_hit"], &["heap_blks_read"], 90.0),
)];

const LOW_TABLE_HIT: &[Check] = &[check("Low buffer hit ratio for this table.", |r| {
    hit_ratio_below(
        r,
        &["heap_blks_hit", "idx_blks_hit"],
        &["heap_blks_read", "idx_blks_read"],
        90.0,
    )
})];

pub static IO_ANALYSIS: &[DiagnosticQuery] = &[
    DiagnosticQuery {
        name: "buffer_usage",
        sql: "SELECT relname AS table_name,
                     heap_blks_read,
                     heap_blks_hit,
                     CASE WHEN heap_blks_read + heap_blks_hit > 0
                          THEN (heap_blks_hit::float / (heap_blks_read + heap_blks_hit) * 100)::numeric(10,2)
                          ELSE 0
                     END AS hit_percentage
              FROM pg_statio_user_tables
              ORDER BY heap_blks_read DESC",
        section: Section {
            header: "BUFFER USAGE BY TABLE",
            layout: Layout::Items {
                label: "Table",
                fields: &[
                    col("Table Name", "table_name"),
                    col("Blocks Read from Disk", "heap_blks_read"),
                    col("Blocks Hit in Buffer", "heap_blks_hit"),
                    field(
                        "Buffer Hit Percentage",
                        Render::HitRatio {
                            hits: &["heap_blks_hit"],
                            reads: &["heap_blks_read"],
                        },
                    ),
                ],
                checks: LOW_BUFFER_HIT,
            },
            empty: "No buffer usage statistics available.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "checkpoint_activity",
        sql: "SELECT checkpoints_timed,
                     checkpoints_req,
                     checkpoint_write_time,
                     checkpoint_sync_time,
                     buffers_checkpoint,
                     buffers_clean,
                     buffers_backend,
                     buffers_backend_fsync,
                     buffers_alloc,
                     stats_reset
              FROM pg_stat_bgwriter",
        section: Section {
            header: "CHECKPOINT ACTIVITY",
            layout: Layout::Single {
                fields: &[
                    col("Scheduled Checkpoints", "checkpoints_timed"),
                    col("Requested Checkpoints", "checkpoints_req"),
                    field("Checkpoint Write Time", Render::Suffixed("checkpoint_write_time", " ms")),
                    field("Checkpoint Sync Time", Render::Suffixed("checkpoint_sync_time", " ms")),
                    col("Buffers Written During Checkpoints", "buffers_checkpoint"),
                    col("Buffers Written by Background Writer", "buffers_clean"),
                    col("Buffers Written by Backend Processes", "buffers_backend"),
                    col("Backend fsync Calls", "buffers_backend_fsync"),
                    col("Buffers Allocated", "buffers_alloc"),
                    col("Statistics Reset Time", "stats_reset"),
                ],
                checks: &[check(
                    "High number of requested checkpoints. Consider increasing checkpoint_timeout or max_wal_size.",
                    |r| num(r, "checkpoints_req") > num(r, "checkpoints_timed"),
                )],
            },
            empty: "No checkpoint activity information available.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "io_statistics",
        sql: "SELECT s.relname AS table_name,
                     pg_size_pretty(pg_relation_size(s.relid)) AS table_size,
                     io.heap_blks_read,
                     io.heap_blks_hit,
                     io.idx_blks_read,
                     io.idx_blks_hit,
                     io.toast_blks_read,
                     io.toast_blks_hit,
                     io.tidx_blks_read,
                     io.tidx_blks_hit
              FROM pg_statio_user_tables io
              JOIN pg_stat_user_tables s ON io.relid = s.relid
              ORDER BY COALESCE(io.heap_blks_read, 0) + COALESCE(io.idx_blks_read, 0)
                     + COALESCE(io.toast_blks_read, 0) + COALESCE(io.tidx_blks_read, 0) DESC
              LIMIT 20",
        section: Section {
            header: "DETAILED I/O STATISTICS (TOP 20 TABLES)",
            layout: Layout::Items {
                label: "Table",
                fields: &[
                    col("Table Name", "table_name"),
                    col("Table Size", "table_size"),
                    col("Heap Blocks Read", "heap_blks_read"),
                    col("Heap Blocks Hit", "heap_blks_hit"),
                    col("Index Blocks Read", "idx_blks_read"),
                    col("Index Blocks Hit", "idx_blks_hit"),
                    col("Toast Blocks Read", "toast_blks_read"),
                    col("Toast Blocks Hit", "toast_blks_hit"),
                    col("Toast Index Blocks Read", "tidx_blks_read"),
                    col("Toast Index Blocks Hit", "tidx_blks_hit"),
                    field(
                        "Overall Buffer Hit Ratio",
                        Render::HitRatio {
                            hits: &["heap_blks_hit", "idx_blks_hit"],
                            reads: &["heap_blks_read", "idx_blks_read"],
                        },
                    ),
                ],
                checks: LOW_TABLE_HIT,
            },
            empty: "No I/O statistics available.",
            recommendation: None,
        },
    },
];

// ---------------------------------------------------------------------------
// system_health
// ---------------------------------------------------------------------------

pub static SYSTEM_HEALTH: &[DiagnosticQuery] = &[
    DiagnosticQuery {
        name: "database_statistics",
        sql: "SELECT datname,
                     numbackends,
                     xact_commit,
                     xact_rollback,
                     blks_read,
                     blks_hit,
                     tup_returned,
                     tup_fetched,
                     tup_inserted,
                     tup_updated,
                     tup_deleted,
                     conflicts,
                     temp_files,
                     temp_bytes,
                     deadlocks,
                     blk_read_time,
                     blk_write_time,
                     stats_reset
              FROM pg_stat_database
              WHERE datname = current_database()",
        section: Section {
            header: "DATABASE STATISTICS",
            layout: Layout::Keyed {
                label: "Database",
                column: "datname",
                fields: &[
                    col("Active Connections", "numbackends"),
                    col("Transactions Committed", "xact_commit"),
                    col("Transactions Rolled Back", "xact_rollback"),
                    col("Blocks Read", "blks_read"),
                    col("Blocks Hit (Cache)", "blks_hit"),
                    field(
                        "Cache Hit Ratio",
                        Render::HitRatio {
                            hits: &["blks_hit"],
                            reads: &["blks_read"],
                        },
                    ),
                    col("Tuples Returned", "tup_returned"),
                    col("Tuples Fetched", "tup_fetched"),
                    col("Tuples Inserted", "tup_inserted"),
                    col("Tuples Updated", "tup_updated"),
                    col("Tuples Deleted", "tup_deleted"),
                    col("Conflicts", "conflicts"),
                    col("Temporary Files Created", "temp_files"),
                    field("Temporary Bytes Written", Render::Bytes("temp_bytes")),
                    col("Deadlocks", "deadlocks"),
                    field("Block Read Time", Render::Suffixed("blk_read_time", " ms")),
                    field("Block Write Time", Render::Suffixed("blk_write_time", " ms")),
                    col("Statistics Reset", "stats_reset"),
                ],
                checks: &[
                    check("Low cache hit ratio. Consider increasing shared_buffers.", |r| {
                        hit_ratio_below(r, &["blks_hit"], &["blks_read"], 90.0)
                    }),
                    check("Deadlocks detected!", |r| num(r, "deadlocks") > 0.0),
                    check("Conflicts detected!", |r| num(r, "conflicts") > 0.0),
                    check("High number of temporary files created!", |r| {
                        num(r, "temp_files") > 1000.0
                    }),
                ],
            },
            empty: "No database statistics available.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "lock_contention",
        sql: "SELECT locktype,
                     COALESCE(relation::regclass::text, 'NULL') AS relation,
                     mode,
                     transactionid AS tid,
                     virtualtransaction AS vtid,
                     pid,
                     granted
              FROM pg_locks
              ORDER BY 2",
        section: Section {
            header: "LOCK CONTENTION",
            layout: Layout::Grouped {
                group_label: "Relation",
                column: "relation",
                label: "Lock",
                fields: &[
                    col("Type", "locktype"),
                    col("Mode", "mode"),
                    col("Transaction ID", "tid"),
                    col("Virtual Transaction ID", "vtid"),
                    col("PID", "pid"),
                    col("Granted", "granted"),
                ],
                checks: &[check("Lock waiting to be granted!", |r| {
                    r.get("granted").as_bool() == Some(false)
                })],
            },
            empty: "No lock contention found.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "long_running_transactions",
        sql: "SELECT pid,
                     usename,
                     datname,
                     age(now(), xact_start) AS xact_age,
                     EXTRACT(EPOCH FROM (now() - xact_start)) AS xact_age_seconds,
                     state,
                     query
              FROM pg_stat_activity
              WHERE state <> 'idle'
                AND xact_start < now() - interval '5 minutes'
              ORDER BY xact_start",
        section: Section {
            header: "LONG-RUNNING TRANSACTIONS (> 5 minutes)",
            layout: Layout::Items {
                label: "Transaction",
                fields: &[
                    col("PID", "pid"),
                    col("Username", "usename"),
                    col("Database", "datname"),
                    col("Age", "xact_age"),
                    col("State", "state"),
                    col("Query", "query"),
                ],
                checks: &[check("Transaction running for an extended period!", |r| {
                    num(r, "xact_age_seconds") >= 3600.0
                })],
            },
            empty: "No long-running transactions found.",
            recommendation: None,
        },
    },
];

// ---------------------------------------------------------------------------
// performance_insights_analysis
// ---------------------------------------------------------------------------

pub static PERFORMANCE_INSIGHTS: &[DiagnosticQuery] = &[
    DiagnosticQuery {
        name: "top_queries_by_time",
        sql: "SELECT query,
                     calls,
                     total_exec_time / 1000 AS total_time_sec,
                     mean_exec_time / 1000 AS avg_time_sec,
                     ROUND((total_exec_time / SUM(total_exec_time) OVER () * 100)::numeric, 2) AS pct_of_total_time,
                     rows,
                     shared_blks_hit,
                     shared_blks_read
              FROM pg_stat_statements
              WHERE total_exec_time > 0
              ORDER BY total_exec_time DESC
              LIMIT 10",
        section: Section {
            header: "TOP 10 QUERIES BY SHARE OF TOTAL EXECUTION TIME",
            layout: Layout::Items {
                label: "Query",
                fields: &[
                    col("Calls", "calls"),
                    field("Total Time", Render::Fixed("total_time_sec", " sec")),
                    field("Avg Time", Render::Fixed("avg_time_sec", " sec")),
                    field("Share of Total Time", Render::Suffixed("pct_of_total_time", "%")),
                    col("Rows", "rows"),
                    field(
                        "Cache Hit Ratio",
                        Render::HitRatio {
                            hits: &["shared_blks_hit"],
                            reads: &["shared_blks_read"],
                        },
                    ),
                    field("Query", Render::Truncated("query", 500)),
                ],
                checks: &[check(
                    "Query consumes more than half of total execution time!",
                    |r| num(r, "pct_of_total_time") > 50.0,
                )],
            },
            empty: "No query statistics found.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "wait_events",
        sql: "SELECT wait_event_type,
                     wait_event,
                     COUNT(*) AS sessions,
                     ROUND(COUNT(*) * 100.0 / SUM(COUNT(*)) OVER (), 2) AS percentage
              FROM pg_stat_activity
              WHERE wait_event_type IS NOT NULL
              GROUP BY wait_event_type, wait_event
              ORDER BY sessions DESC
              LIMIT 10",
        section: Section {
            header: "WAIT EVENTS",
            layout: Layout::Items {
                label: "Wait Event",
                fields: &[
                    col("Type", "wait_event_type"),
                    col("Event", "wait_event"),
                    field("Sessions", Render::WithPercent("sessions", "percentage")),
                ],
                checks: &[check("Sessions waiting on locks!", |r| {
                    r.get("wait_event_type").to_string() == "Lock"
                })],
            },
            empty: "No sessions are waiting.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "database_load",
        sql: "SELECT COUNT(*) AS total_connections,
                     COUNT(*) FILTER (WHERE state = 'active') AS active_connections,
                     COUNT(*) FILTER (WHERE state = 'idle') AS idle_connections,
                     COUNT(*) FILTER (WHERE state = 'idle in transaction') AS idle_in_transaction,
                     AVG(EXTRACT(EPOCH FROM (now() - query_start))) AS avg_query_duration_sec
              FROM pg_stat_activity
              WHERE backend_type = 'client backend'",
        section: Section {
            header: "DATABASE LOAD",
            layout: Layout::Single {
                fields: &[
                    col("Total Connections", "total_connections"),
                    col("Active Connections", "active_connections"),
                    col("Idle Connections", "idle_connections"),
                    col("Idle in Transaction", "idle_in_transaction"),
                    field("Avg Query Duration", Render::Fixed("avg_query_duration_sec", " sec")),
                ],
                checks: &[check(
                    "Sessions idle in transaction hold locks and block vacuum.",
                    |r| num(r, "idle_in_transaction") > 0.0,
                )],
            },
            empty: "No load information available.",
            recommendation: None,
        },
    },
];
