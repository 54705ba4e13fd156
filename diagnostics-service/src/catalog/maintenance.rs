//! 维护类诊断：autovacuum、XID 回卷、膨胀、复制、长事务

use super::{check, col, field, num, Check, DiagnosticQuery, Field, Layout, Render, Section};

const INACTIVE_SLOT: &[Check] = &[check("Inactive replication slot detected!", |r| {
    r.get("active").as_bool() == Some(false)
})];

const HIGH_DEAD_TUPLES: &[Check] = &[check(
    "High dead tuple percentage. Consider running VACUUM.",
    |r| num(r, "dead_tuple_percentage") > 20.0,
)];

const DEAD_TUPLE_FIELDS: &[Field] = &[
    col("Schema", "schemaname"),
    col("Table", "table_name"),
    col("Live Tuples", "live_tuples"),
    col("Dead Tuples", "dead_tuples"),
    field("Dead Tuple Percentage", Render::Suffixed("dead_tuple_percentage", "%")),
    field("Last Vacuum", Render::OrNever("last_vacuum")),
    field("Last Autovacuum", Render::OrNever("last_autovacuum")),
];

const CURRENT_VACUUM_PROGRESS: DiagnosticQuery = DiagnosticQuery {
    name: "current_vacuum_progress",
    sql: "SELECT CURRENT_TIMESTAMP AS snapshot_time,
                 p.pid,
                 now() - a.xact_start AS duration,
                 COALESCE(a.wait_event_type || '.' || a.wait_event, 'CPU') AS wait_event,
                 CASE WHEN a.query ~ '^autovacuum.*to prevent wraparound' THEN 'wraparound'
                      WHEN a.query ~* '^vacuum' THEN 'user'
                      ELSE 'regular'
                 END AS mode,
                 p.datname AS database,
                 p.relid::regclass::text AS table_name,
                 p.phase,
                 a.query,
                 pg_size_pretty(p.heap_blks_total * current_setting('block_size')::bigint) AS table_size,
                 pg_size_pretty(pg_total_relation_size(p.relid)) AS total_size,
                 pg_size_pretty(p.heap_blks_scanned * current_setting('block_size')::bigint) AS scanned,
                 pg_size_pretty(p.heap_blks_vacuumed * current_setting('block_size')::bigint) AS vacuumed,
                 ROUND(100.0 * p.heap_blks_scanned / NULLIF(p.heap_blks_total, 0), 1) AS scanned_pct,
                 ROUND(100.0 * p.heap_blks_vacuumed / NULLIF(p.heap_blks_total, 0), 1) AS vacuumed_pct,
                 p.index_vacuum_count,
                 s.n_dead_tup AS total_num_dead_tuples
          FROM pg_stat_progress_vacuum p
          JOIN pg_stat_activity a USING (pid)
          JOIN pg_stat_all_tables s ON s.relid = p.relid
          ORDER BY now() - a.xact_start DESC",
    section: Section {
        header: "CURRENT VACUUM PROGRESS",
        layout: Layout::Items {
            label: "Vacuum Operation",
            fields: &[
                col("PID", "pid"),
                col("Database", "database"),
                col("Table", "table_name"),
                col("Mode", "mode"),
                col("Phase", "phase"),
                col("Duration", "duration"),
                col("Table Size", "table_size"),
                col("Total Size", "total_size"),
                field("Scanned", Render::WithPercent("scanned", "scanned_pct")),
                field("Vacuumed", Render::WithPercent("vacuumed", "vacuumed_pct")),
                col("Index Vacuum Count", "index_vacuum_count"),
                col("Dead Tuples", "total_num_dead_tuples"),
                col("Wait Event", "wait_event"),
            ],
            checks: &[],
        },
        empty: "No active vacuum operations found.",
        recommendation: None,
    },
};

const OLDEST_XID_ALL_DATABASES: DiagnosticQuery = DiagnosticQuery {
    name: "oldest_xid_all_databases",
    sql: "SELECT max(age(datfrozenxid)) AS oldest_xid FROM pg_database",
    section: Section {
        header: "OLDEST XID ACROSS ALL DATABASES",
        layout: Layout::Single {
            fields: &[col("Oldest XID", "oldest_xid")],
            checks: &[],
        },
        empty: "No XID information available.",
        recommendation: None,
    },
};

const OLDEST_XID_BY_DATABASE: DiagnosticQuery = DiagnosticQuery {
    name: "oldest_xid_by_database",
    sql: "SELECT datname, age(datfrozenxid) AS xid_age
          FROM pg_database
          ORDER BY xid_age DESC
          LIMIT 5",
    section: Section {
        header: "XID AGE BY DATABASE",
        layout: Layout::Listing {
            keys: &["datname"],
            value: "xid_age",
        },
        empty: "No database XID information available.",
        recommendation: None,
    },
};

const PERCENT_TOWARDS_WRAPAROUND: DiagnosticQuery = DiagnosticQuery {
    name: "percent_towards_wraparound",
    sql: "WITH max_age AS (
              SELECT 2^31 - 1000000 AS max_old_xid, setting AS autovacuum_freeze_max_age
              FROM pg_catalog.pg_settings
              WHERE name = 'autovacuum_freeze_max_age'
          ),
          per_database_stats AS (
              SELECT datname,
                     m.max_old_xid::int,
                     m.autovacuum_freeze_max_age::int,
                     age(d.datfrozenxid) AS oldest_current_xid
              FROM pg_catalog.pg_database d
              JOIN max_age m ON (true)
              WHERE d.datallowconn
          )
          SELECT max(oldest_current_xid) AS oldest_current_xid,
                 max(ROUND(100 * (oldest_current_xid / max_old_xid::float))) AS percent_towards_wraparound,
                 max(ROUND(100 * (oldest_current_xid / autovacuum_freeze_max_age::float))) AS percent_towards_emergency_autovac
          FROM per_database_stats",
    section: Section {
        header: "TRANSACTION WRAPAROUND STATUS",
        layout: Layout::Single {
            fields: &[
                col("Current Oldest XID", "oldest_current_xid"),
                field(
                    "Percent Towards Wraparound",
                    Render::Suffixed("percent_towards_wraparound", "%"),
                ),
                field(
                    "Percent Towards Emergency Autovacuum",
                    Render::Suffixed("percent_towards_emergency_autovac", "%"),
                ),
            ],
            checks: &[check(
                "Database is approaching transaction wraparound limit!",
                |r| num(r, "percent_towards_wraparound") > 75.0,
            )],
        },
        empty: "No wraparound status information available.",
        recommendation: None,
    },
};

const TABLES_WITH_OLDEST_RELFROZENXID: DiagnosticQuery = DiagnosticQuery {
    name: "tables_with_oldest_relfrozenxid",
    sql: "SELECT n.nspname AS schema_name, c.relname AS table_name, age(c.relfrozenxid) AS xid_age
          FROM pg_class c
          JOIN pg_namespace n ON n.oid = c.relnamespace
          WHERE c.relkind = 'r' AND c.relfrozenxid <> 0
          ORDER BY xid_age DESC
          LIMIT 10",
    section: Section {
        header: "TABLES WITH OLDEST RELFROZENXID",
        layout: Layout::Listing {
            keys: &["schema_name", "table_name"],
            value: "xid_age",
        },
        empty: "No table XID information available.",
        recommendation: None,
    },
};

/// Non-idle client transactions open for more than an hour.
const LONG_TRANSACTIONS_SQL: &str = "SELECT pid, datname, usename, application_name, client_addr,
                 backend_start, xact_start, query_start, state_change,
                 wait_event_type, wait_event, state, backend_xid, backend_xmin, query,
                 EXTRACT(EPOCH FROM (now() - xact_start)) / 3600 AS xact_age_hours,
                 EXTRACT(EPOCH FROM (now() - query_start)) / 3600 AS query_age_hours
          FROM pg_stat_activity
          WHERE backend_type = 'client backend'
            AND state <> 'idle'
            AND xact_start IS NOT NULL
            AND EXTRACT(EPOCH FROM (now() - xact_start)) > 3600
          ORDER BY xact_start";

const LONG_TRANSACTION_FIELDS: &[Field] = &[
    col("PID", "pid"),
    col("Database", "datname"),
    col("User", "usename"),
    col("Application", "application_name"),
    field("Transaction Age", Render::Fixed("xact_age_hours", " hours")),
    field("Query Age", Render::Fixed("query_age_hours", " hours")),
    col("State", "state"),
    field("Wait Event", Render::Joined(&["wait_event_type", "wait_event"], ".")),
    col("Backend XMIN", "backend_xmin"),
    field("Query", Render::Truncated("query", 100)),
];

// ---------------------------------------------------------------------------
// autovacuum_analysis
// ---------------------------------------------------------------------------

pub static AUTOVACUUM_ANALYSIS: &[DiagnosticQuery] = &[
    CURRENT_VACUUM_PROGRESS,
    DiagnosticQuery {
        name: "tables_eligible_for_vacuum",
        sql: "SELECT schemaname,
                     relname AS table_name,
                     n_live_tup AS live_tuples,
                     n_dead_tup AS dead_tuples,
                     CASE WHEN n_live_tup > 0
                          THEN ROUND(100.0 * n_dead_tup / n_live_tup, 2)
                          ELSE 0
                     END AS dead_tuple_percentage,
                     last_vacuum,
                     last_autovacuum,
                     vacuum_count,
                     autovacuum_count,
                     pg_size_pretty(pg_total_relation_size(relid)) AS table_size,
                     ROUND((EXTRACT(EPOCH FROM (now() - COALESCE(last_vacuum, last_autovacuum))) / 86400)::numeric, 1) AS days_since_last_vacuum
              FROM pg_stat_user_tables
              WHERE n_dead_tup > 1000
                 OR (n_live_tup > 0 AND n_dead_tup::float / n_live_tup > 0.1)
                 OR COALESCE(last_vacuum, last_autovacuum) < now() - interval '7 days'
              ORDER BY dead_tuple_percentage DESC, n_dead_tup DESC
              LIMIT 20",
        section: Section {
            header: "TABLES ELIGIBLE FOR VACUUM",
            layout: Layout::Items {
                label: "Table",
                fields: &[
                    col("Schema", "schemaname"),
                    col("Table", "table_name"),
                    col("Table Size", "table_size"),
                    col("Live Tuples", "live_tuples"),
                    col("Dead Tuples", "dead_tuples"),
                    field("Dead Tuple Percentage", Render::Suffixed("dead_tuple_percentage", "%")),
                    field("Last Vacuum", Render::OrNever("last_vacuum")),
                    field("Last Autovacuum", Render::OrNever("last_autovacuum")),
                    col("Vacuum Count", "vacuum_count"),
                    col("Autovacuum Count", "autovacuum_count"),
                    field("Days Since Last Vacuum", Render::OrNever("days_since_last_vacuum")),
                ],
                checks: HIGH_DEAD_TUPLES,
            },
            empty: "No tables eligible for vacuum found.",
            recommendation: Some("Consider running VACUUM on tables with high dead tuple percentages."),
        },
    },
    DiagnosticQuery {
        name: "tables_high_dead_tuple_ratio",
        sql: "SELECT schemaname,
                     relname AS table_name,
                     n_live_tup AS live_tuples,
                     n_dead_tup AS dead_tuples,
                     ROUND(100.0 * n_dead_tup / GREATEST(n_live_tup, 1), 2) AS dead_tuple_percentage,
                     last_vacuum,
                     last_autovacuum
              FROM pg_stat_user_tables
              WHERE n_live_tup > 0 AND n_dead_tup::float / n_live_tup > 0.2
              ORDER BY dead_tuple_percentage DESC",
        section: Section {
            header: "TABLES WITH HIGH DEAD TUPLE RATIO (> 20%)",
            layout: Layout::Items {
                label: "Table",
                fields: DEAD_TUPLE_FIELDS,
                checks: HIGH_DEAD_TUPLES,
            },
            empty: "No tables with a high dead tuple ratio found.",
            recommendation: None,
        },
    },
    OLDEST_XID_ALL_DATABASES,
    OLDEST_XID_BY_DATABASE,
    PERCENT_TOWARDS_WRAPAROUND,
    TABLES_WITH_OLDEST_RELFROZENXID,
    DiagnosticQuery {
        name: "vacuum_blockers",
        sql: LONG_TRANSACTIONS_SQL,
        section: Section {
            header: "LONG-RUNNING TRANSACTIONS BLOCKING VACUUM (> 1 hour)",
            layout: Layout::Items {
                label: "Transaction",
                fields: LONG_TRANSACTION_FIELDS,
                checks: &[],
            },
            empty: "No vacuum-blocking transactions found.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "inactive_replication_slots",
        sql: "SELECT slot_name, plugin, slot_type, database, active,
                     xmin, catalog_xmin, restart_lsn, confirmed_flush_lsn,
                     CASE WHEN xmin IS NOT NULL THEN age(xmin) END AS xmin_age,
                     CASE WHEN catalog_xmin IS NOT NULL THEN age(catalog_xmin) END AS catalog_xmin_age
              FROM pg_replication_slots
              WHERE NOT active OR xmin IS NOT NULL OR catalog_xmin IS NOT NULL
              ORDER BY GREATEST(COALESCE(age(xmin), 0), COALESCE(age(catalog_xmin), 0)) DESC",
        section: Section {
            header: "REPLICATION SLOTS HOLDING BACK VACUUM",
            layout: Layout::Items {
                label: "Slot",
                fields: &[
                    col("Slot Name", "slot_name"),
                    col("Plugin", "plugin"),
                    col("Slot Type", "slot_type"),
                    col("Database", "database"),
                    col("Active", "active"),
                    col("XMIN Age", "xmin_age"),
                    col("Catalog XMIN Age", "catalog_xmin_age"),
                    col("Restart LSN", "restart_lsn"),
                ],
                checks: INACTIVE_SLOT,
            },
            empty: "No replication slots holding back vacuum found.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "prepared_transactions",
        sql: "SELECT gid, prepared, owner, database,
                     ROUND((EXTRACT(EPOCH FROM (now() - prepared)) / 60)::numeric, 1) AS prepared_minutes_ago
              FROM pg_prepared_xacts
              WHERE prepared < now() - interval '15 minutes'
              ORDER BY prepared",
        section: Section {
            header: "PREPARED TRANSACTIONS (> 15 minutes)",
            layout: Layout::Items {
                label: "Prepared Transaction",
                fields: &[
                    col("GID", "gid"),
                    col("Owner", "owner"),
                    col("Database", "database"),
                    col("Prepared At", "prepared"),
                    field("Age", Render::Suffixed("prepared_minutes_ago", " minutes")),
                ],
                checks: &[],
            },
            empty: "No long-lived prepared transactions found.",
            recommendation: None,
        },
    },
];

// ---------------------------------------------------------------------------
// replication_analysis
// ---------------------------------------------------------------------------

pub static REPLICATION_ANALYSIS: &[DiagnosticQuery] = &[
    DiagnosticQuery {
        name: "aurora_replica_status",
        sql: "SELECT server_id,
                     EXTRACT(EPOCH FROM (now() - last_update_timestamp)) AS lag_seconds,
                     durable_lsn,
                     highest_lsn_rcvd,
                     current_read_lsn,
                     last_update_timestamp
              FROM aurora_replica_status()",
        section: Section {
            header: "AURORA REPLICA STATUS",
            layout: Layout::Items {
                label: "Replica",
                fields: &[
                    col("Server ID", "server_id"),
                    field("Replication Lag", Render::Fixed("lag_seconds", " seconds")),
                    col("Durable LSN", "durable_lsn"),
                    col("Highest Received LSN", "highest_lsn_rcvd"),
                    col("Current Read LSN", "current_read_lsn"),
                    col("Last Update", "last_update_timestamp"),
                ],
                checks: &[check("High replication lag detected!", |r| {
                    num(r, "lag_seconds") > 30.0
                })],
            },
            empty: "No Aurora replica status information available.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "replication_slots",
        sql: "SELECT slot_name,
                     slot_type,
                     active,
                     confirmed_flush_lsn,
                     pg_size_pretty(pg_wal_lsn_diff(pg_current_wal_lsn(), confirmed_flush_lsn)) AS lag_size
              FROM pg_replication_slots",
        section: Section {
            header: "REPLICATION SLOTS",
            layout: Layout::Items {
                label: "Slot",
                fields: &[
                    col("Slot Name", "slot_name"),
                    col("Slot Type", "slot_type"),
                    col("Active", "active"),
                    col("Confirmed Flush LSN", "confirmed_flush_lsn"),
                    col("Lag Size", "lag_size"),
                ],
                checks: INACTIVE_SLOT,
            },
            empty: "No replication slots found.",
            recommendation: None,
        },
    },
    DiagnosticQuery {
        name: "replication_connections",
        sql: "SELECT pid,
                     usesysid,
                     usename,
                     application_name,
                     client_addr,
                     client_hostname,
                     client_port,
                     backend_start,
                     state,
                     sent_lsn,
                     write_lsn,
                     flush_lsn,
                     replay_lsn,
                     pg_wal_lsn_diff(sent_lsn, replay_lsn) AS lag_bytes
              FROM pg_stat_replication",
        section: Section {
            header: "REPLICATION CONNECTIONS",
            layout: Layout::Items {
                label: "Connection",
                fields: &[
                    col("PID", "pid"),
                    col("Username", "usename"),
                    col("Application", "application_name"),
                    col("Client Address", "client_addr"),
                    col("Client Hostname", "client_hostname"),
                    col("Client Port", "client_port"),
                    col("Backend Start", "backend_start"),
                    col("State", "state"),
                    col("Sent LSN", "sent_lsn"),
                    col("Write LSN", "write_lsn"),
                    col("Flush LSN", "flush_lsn"),
                    col("Replay LSN", "replay_lsn"),
                    field("Lag Size", Render::Bytes("lag_bytes")),
                ],
                checks: &[check("Large replication lag detected!", |r| {
                    num(r, "lag_bytes") > 100_000_000.0
                })],
            },
            empty: "No replication connections found.",
            recommendation: None,
        },
    },
];

// ---------------------------------------------------------------------------
// Single-purpose actions
// ---------------------------------------------------------------------------

pub static VACUUM_PROGRESS: &[DiagnosticQuery] = &[CURRENT_VACUUM_PROGRESS];

pub static XID_ANALYSIS: &[DiagnosticQuery] = &[
    OLDEST_XID_ALL_DATABASES,
    PERCENT_TOWARDS_WRAPAROUND,
    OLDEST_XID_BY_DATABASE,
    TABLES_WITH_OLDEST_RELFROZENXID,
];

pub static BLOAT_ANALYSIS: &[DiagnosticQuery] = &[DiagnosticQuery {
    name: "table_bloat",
    sql: "WITH constants AS (
              SELECT current_setting('block_size')::numeric AS bs
          ),
          column_widths AS (
              SELECT schemaname,
                     tablename,
                     SUM(CASE WHEN avg_width = -1 THEN 10 ELSE avg_width END) AS row_width
              FROM pg_stats
              WHERE schemaname NOT IN ('information_schema', 'pg_catalog')
              GROUP BY schemaname, tablename
          ),
          table_bloat AS (
              SELECT nn.nspname AS schemaname,
                     cc.relname AS tablename,
                     cc.relpages,
                     k.bs,
                     cc.relpages - CEIL(cc.reltuples * (w.row_width + 23) / k.bs) AS bloat_pages,
                     CASE WHEN cc.relpages > 0
                          THEN ROUND(100 * (cc.relpages - CEIL(cc.reltuples * (w.row_width + 23) / k.bs))::numeric / cc.relpages, 2)
                          ELSE 0
                     END AS bloat_percentage
              FROM pg_class cc
              JOIN pg_namespace nn ON cc.relnamespace = nn.oid
              JOIN column_widths w ON w.schemaname = nn.nspname AND w.tablename = cc.relname
              CROSS JOIN constants k
              WHERE cc.relkind = 'r'
                AND nn.nspname NOT IN ('information_schema', 'pg_catalog')
                AND cc.reltuples > 0
          )
          SELECT schemaname,
                 tablename,
                 pg_size_pretty(relpages::bigint * bs::bigint) AS table_size,
                 bloat_pages,
                 pg_size_pretty((bloat_pages * bs)::bigint) AS bloat_size,
                 bloat_percentage
          FROM table_bloat
          WHERE bloat_percentage > 10
          ORDER BY bloat_percentage DESC, bloat_pages DESC
          LIMIT 20",
    section: Section {
        header: "TABLE BLOAT ANALYSIS",
        layout: Layout::Items {
            label: "Bloated Table",
            fields: &[
                col("Schema", "schemaname"),
                col("Table", "tablename"),
                col("Table Size", "table_size"),
                col("Bloat Size", "bloat_size"),
                field("Bloat Percentage", Render::Suffixed("bloat_percentage", "%")),
                col("Bloat Pages", "bloat_pages"),
            ],
            checks: &[],
        },
        empty: "No significant table bloat found.",
        recommendation: Some("Consider VACUUM FULL or pg_repack on heavily bloated tables during a maintenance window."),
    },
}];

pub static LONG_RUNNING_TRANSACTIONS: &[DiagnosticQuery] = &[DiagnosticQuery {
    name: "long_running_transactions",
    sql: LONG_TRANSACTIONS_SQL,
    section: Section {
        header: "LONG-RUNNING TRANSACTIONS (> 1 hour)",
        layout: Layout::Items {
            label: "Long-Running Transaction",
            fields: LONG_TRANSACTION_FIELDS,
            checks: &[],
        },
        empty: "No long-running transactions found.",
        recommendation: None,
    },
}];
