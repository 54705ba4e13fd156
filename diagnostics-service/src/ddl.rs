//! 数据库对象 DDL 提取（extract_ddl）
//!
//! 按对象类型查询系统目录，重建对象的 DDL，并附带描述与结构说明。
//! 名称按 `ILIKE` 匹配（支持 `%` / `_` 通配符），模式名精确匹配。

use std::collections::HashSet;
use std::time::Duration;

use common::errors::AppResult;
use common::models::{DdlTarget, DiagnosticAction, ObjectType, QueryResult};

use crate::catalog;
use crate::report::ReportWriter;
use crate::session::DiagnosticSession;

const TABLE_DDL: &str = r"SELECT n.nspname || '.' || c.relname AS object_name,
       'TABLE' AS object_type,
       format(E'CREATE TABLE %I.%I (\n%s\n);', n.nspname, c.relname,
              string_agg('    ' || quote_ident(a.attname) || ' '
                         || format_type(a.atttypid, a.atttypmod)
                         || CASE WHEN a.attnotnull THEN ' NOT NULL' ELSE '' END
                         || COALESCE(' DEFAULT ' || pg_get_expr(ad.adbin, ad.adrelid), ''),
                         E',\n' ORDER BY a.attnum)) AS definition,
       obj_description(c.oid, 'pg_class') AS description
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
LEFT JOIN pg_catalog.pg_attrdef ad ON ad.adrelid = c.oid AND ad.adnum = a.attnum
WHERE c.relkind IN ('r', 'p')
  AND n.nspname NOT IN ('pg_catalog', 'information_schema')
  AND {filter}
GROUP BY n.nspname, c.relname, c.oid
ORDER BY 1";

const VIEW_DDL: &str = r"SELECT n.nspname || '.' || c.relname AS object_name,
       'VIEW' AS object_type,
       format(E'CREATE OR REPLACE VIEW %I.%I AS\n%s', n.nspname, c.relname,
              pg_get_viewdef(c.oid, true)) AS definition,
       obj_description(c.oid, 'pg_class') AS description
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind IN ('v', 'm')
  AND n.nspname NOT IN ('pg_catalog', 'information_schema')
  AND {filter}
ORDER BY 1";

const FUNCTION_DDL: &str = r"SELECT n.nspname || '.' || p.proname AS object_name,
       'FUNCTION' AS object_type,
       pg_get_functiondef(p.oid) AS definition,
       obj_description(p.oid, 'pg_proc') AS description,
       p.prorettype::regtype::text AS return_type,
       CASE p.provolatile WHEN 'i' THEN 'IMMUTABLE' WHEN 's' THEN 'STABLE' ELSE 'VOLATILE' END AS volatility,
       CASE p.proparallel WHEN 's' THEN 'SAFE' WHEN 'r' THEN 'RESTRICTED' ELSE 'UNSAFE' END AS parallel
FROM pg_catalog.pg_proc p
JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
WHERE p.prokind = 'f'
  AND n.nspname NOT IN ('pg_catalog', 'information_schema')
  AND {filter}
ORDER BY 1";

const PROCEDURE_DDL: &str = r"SELECT n.nspname || '.' || p.proname AS object_name,
       'PROCEDURE' AS object_type,
       pg_get_functiondef(p.oid) AS definition,
       obj_description(p.oid, 'pg_proc') AS description
FROM pg_catalog.pg_proc p
JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
WHERE p.prokind = 'p'
  AND n.nspname NOT IN ('pg_catalog', 'information_schema')
  AND {filter}
ORDER BY 1";

const TRIGGER_DDL: &str = r"SELECT n.nspname || '.' || t.tgname AS object_name,
       'TRIGGER' AS object_type,
       pg_get_triggerdef(t.oid, true) AS definition,
       obj_description(t.oid, 'pg_trigger') AS description
FROM pg_catalog.pg_trigger t
JOIN pg_catalog.pg_class c ON c.oid = t.tgrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE NOT t.tgisinternal
  AND n.nspname NOT IN ('pg_catalog', 'information_schema')
  AND {filter}
ORDER BY 1";

const SEQUENCE_DDL: &str = r"SELECT n.nspname || '.' || c.relname AS object_name,
       'SEQUENCE' AS object_type,
       format(E'CREATE SEQUENCE %I.%I\n    INCREMENT %s\n    MINVALUE %s\n    MAXVALUE %s\n    START %s\n    CACHE %s%s;',
              n.nspname, c.relname, s.seqincrement, s.seqmin, s.seqmax, s.seqstart, s.seqcache,
              CASE WHEN s.seqcycle THEN E'\n    CYCLE' ELSE '' END) AS definition,
       obj_description(c.oid, 'pg_class') AS description
FROM pg_catalog.pg_sequence s
JOIN pg_catalog.pg_class c ON c.oid = s.seqrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname NOT IN ('pg_catalog', 'information_schema')
  AND {filter}
ORDER BY 1";

const INDEX_DDL: &str = r"SELECT n.nspname || '.' || c.relname AS object_name,
       'INDEX' AS object_type,
       pg_get_indexdef(i.indexrelid) AS definition,
       obj_description(i.indexrelid, 'pg_class') AS description
FROM pg_catalog.pg_index i
JOIN pg_catalog.pg_class c ON c.oid = i.indexrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname NOT IN ('pg_catalog', 'information_schema')
  AND {filter}
ORDER BY 1";

/// Template and the columns the name/schema filter applies to.
fn template(object_type: ObjectType) -> (&'static str, &'static str, &'static str) {
    match object_type {
        ObjectType::Table => (TABLE_DDL, "c.relname", "n.nspname"),
        ObjectType::View => (VIEW_DDL, "c.relname", "n.nspname"),
        ObjectType::Function => (FUNCTION_DDL, "p.proname", "n.nspname"),
        ObjectType::Procedure => (PROCEDURE_DDL, "p.proname", "n.nspname"),
        ObjectType::Trigger => (TRIGGER_DDL, "t.tgname", "n.nspname"),
        ObjectType::Sequence => (SEQUENCE_DDL, "c.relname", "n.nspname"),
        ObjectType::Index => (INDEX_DDL, "c.relname", "n.nspname"),
    }
}

/// PostgreSQL `quote_literal`: doubles quotes, and switches to an `E''`
/// string with doubled backslashes when the value contains one.
pub fn quote_literal(value: &str) -> String {
    let quoted = value.replace('\'', "''");
    if quoted.contains('\\') {
        format!("E'{}'", quoted.replace('\\', "\\\\"))
    } else {
        format!("'{}'", quoted)
    }
}

/// The catalog lookup for `target` with its name and schema inlined.
pub fn lookup_sql(target: &DdlTarget) -> String {
    let (sql, name_column, schema_column) = template(target.object_type);
    let filter = format!(
        "{} ILIKE {} AND {} = {}",
        name_column,
        quote_literal(&target.name),
        schema_column,
        quote_literal(&target.schema)
    );
    sql.replacen("{filter}", &filter, 1)
}

pub struct DdlReport {
    target: DdlTarget,
    result: QueryResult,
}

/// Looks `target` up inside a read-only transaction.
pub async fn run(
    session: &mut dyn DiagnosticSession,
    target: &DdlTarget,
    statement_timeout: Duration,
) -> AppResult<DdlReport> {
    session.execute("BEGIN READ ONLY").await?;
    session
        .execute(&format!(
            "SET LOCAL statement_timeout = '{}ms'",
            statement_timeout.as_millis()
        ))
        .await?;
    let result = session.execute_single(&lookup_sql(target)).await?;
    session.execute("COMMIT").await?;

    tracing::debug!(
        object_type = %target.object_type,
        schema = %target.schema,
        name = %target.name,
        matches = result.row_count,
        "DDL lookup completed"
    );

    Ok(DdlReport {
        target: target.clone(),
        result,
    })
}

impl DdlReport {
    pub fn render(&self) -> String {
        let mut w = ReportWriter::new(catalog::title(DiagnosticAction::ExtractDdl));
        w.line(&format!("Object Type: {}", self.target.object_type));
        w.line(&format!("Schema: {}", self.target.schema));
        w.line(&format!("Name Pattern: {}", self.target.name));

        if self.result.is_empty() {
            w.blank();
            w.line("No matching objects found");
            return w.finish();
        }
        w.line(&format!("Objects Found: {}", self.result.row_count));
        w.blank();

        for (idx, record) in self.result.records().enumerate() {
            w.section(&format!("OBJECT #{}: {}", idx + 1, record.get("object_name")));
            w.field("Type", &record.get("object_type").to_string());
            let description = record.get("description");
            if description.is_null() {
                w.field("Description", "None");
            } else {
                w.field("Description", &description.to_string());
            }
            if self.target.object_type == ObjectType::Function {
                w.field("Return Type", &record.get("return_type").to_string());
                w.field("Volatility", &record.get("volatility").to_string());
                w.field("Parallel", &record.get("parallel").to_string());
            }

            let definition = record.get("definition");
            if definition.is_null() {
                w.heading("Definition: not available");
                continue;
            }
            let definition = definition.to_string();
            w.heading("Definition:");
            w.line(&definition);
            w.heading("Explanation:");
            w.line(&explain(self.target.object_type, &definition));
        }

        w.finish()
    }
}

fn explain(object_type: ObjectType, definition: &str) -> String {
    match object_type {
        ObjectType::Table => explain_table(definition),
        ObjectType::View => explain_view(definition),
        ObjectType::Function | ObjectType::Procedure => explain_routine(object_type, definition),
        ObjectType::Trigger => explain_trigger(definition),
        ObjectType::Sequence | ObjectType::Index => format!("DDL for {}", object_type),
    }
}

/// Upper-cased words of `text`, for keyword checks that ignore substrings.
fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_uppercase)
        .collect()
}

fn explain_table(definition: &str) -> String {
    let mut lines = vec!["This table contains the following structure:".to_string()];
    for line in definition.lines() {
        let column = line.trim();
        if column.is_empty() || column.starts_with("CREATE TABLE") || column == ");" {
            continue;
        }
        let column = column.trim_end_matches(',');
        let (name, rest) = column.split_once(char::is_whitespace).unwrap_or((column, ""));
        lines.push(format!("- {}: {}", name, rest.trim()));
    }
    lines.join("\n")
}

fn explain_view(definition: &str) -> String {
    let words = keywords(definition);
    let flat = definition.to_uppercase().split_whitespace().collect::<Vec<_>>().join(" ");
    let mut lines = vec!["This view performs a SELECT with the following characteristics:".to_string()];
    let features = [
        (words.contains("JOIN"), "Joins multiple tables"),
        (words.contains("WHERE"), "Applies filtering conditions"),
        (flat.contains("GROUP BY"), "Aggregates data"),
        (words.contains("HAVING"), "Applies post-aggregation filters"),
        (flat.contains("ORDER BY"), "Sorts the results"),
        (words.contains("UNION"), "Combines multiple result sets"),
        (words.contains("WITH"), "Uses Common Table Expressions (CTEs)"),
    ];
    lines.extend(
        features
            .iter()
            .filter(|(present, _)| *present)
            .map(|(_, text)| format!("- {}", text)),
    );
    lines.join("\n")
}

/// Text between the first `(` and its matching `)`, split on top-level commas.
fn parameters(definition: &str) -> Vec<String> {
    let Some(open) = definition.find('(') else {
        return Vec::new();
    };
    let mut depth = 0usize;
    let mut current = String::new();
    let mut params = Vec::new();
    for c in definition[open + 1..].chars() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => break,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                params.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    params.push(current.trim().to_string());
    params.retain(|p| !p.is_empty());
    params
}

fn explain_routine(object_type: ObjectType, definition: &str) -> String {
    let mut lines = vec![format!("This is a {} that:", object_type)];

    let params = parameters(definition);
    if !params.is_empty() {
        lines.push(String::new());
        lines.push("Parameters:".to_string());
        lines.extend(params.iter().map(|p| format!("- {}", p)));
    }

    if let Some(returns) = definition
        .split_whitespace()
        .skip_while(|w| *w != "RETURNS")
        .nth(1)
    {
        lines.push(String::new());
        lines.push(format!("Returns: {}", returns));
    }

    let words = keywords(definition);
    if words.contains("BEGIN") {
        lines.push(String::new());
        lines.push("Logic overview:".to_string());
        let logic = [
            ("IF", "Contains conditional logic"),
            ("LOOP", "Contains loops"),
            ("WHILE", "Contains loops"),
            ("INSERT", "Performs data insertion"),
            ("UPDATE", "Performs data updates"),
            ("DELETE", "Performs data deletion"),
            ("SELECT", "Retrieves data"),
            ("EXCEPTION", "Includes error handling"),
        ];
        let mut seen = HashSet::new();
        for (keyword, text) in logic {
            if words.contains(keyword) && seen.insert(text) {
                lines.push(format!("- {}", text));
            }
        }
    }

    lines.join("\n")
}

fn explain_trigger(definition: &str) -> String {
    let words = keywords(definition);
    let flat = definition.to_uppercase().split_whitespace().collect::<Vec<_>>().join(" ");
    let mut lines = vec!["This trigger:".to_string()];

    if words.contains("BEFORE") {
        lines.push("- Executes BEFORE the event".to_string());
    } else if flat.contains("INSTEAD OF") {
        lines.push("- Executes INSTEAD OF the event".to_string());
    } else if words.contains("AFTER") {
        lines.push("- Executes AFTER the event".to_string());
    }
    for event in ["INSERT", "UPDATE", "DELETE", "TRUNCATE"] {
        if words.contains(event) {
            lines.push(format!("- Fires on {}", event));
        }
    }
    if flat.contains("FOR EACH ROW") {
        lines.push("- Executes for each affected row".to_string());
    } else if flat.contains("FOR EACH STATEMENT") {
        lines.push("- Executes once per statement".to_string());
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{rows, ScriptedSession, SessionLog};
    use common::models::ScalarValue;
    use common::utils::SqlValidator;

    fn target(object_type: ObjectType) -> DdlTarget {
        DdlTarget {
            object_type,
            name: "orders".to_string(),
            schema: "public".to_string(),
        }
    }

    fn text(s: &str) -> ScalarValue {
        ScalarValue::Text(s.to_string())
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("orders"), "'orders'");
        assert_eq!(quote_literal("o'brien"), "'o''brien'");
        assert_eq!(quote_literal(r"a\b"), r"E'a\\b'");
        assert_eq!(quote_literal(r"x'; --\"), r"E'x''; --\\'");
    }

    #[test]
    fn test_lookup_sql_is_read_only_for_every_type() {
        for object_type in ObjectType::ALL {
            let mut hostile = target(object_type);
            hostile.name = r"x\'; DROP TABLE users; --".to_string();
            let sql = lookup_sql(&hostile);
            assert!(!sql.contains("{filter}"));
            let statements = SqlValidator::validate_read_only(&sql, 1).unwrap();
            assert_eq!(statements.len(), 1, "{}", object_type);
        }
        assert!(lookup_sql(&target(ObjectType::Index))
            .contains("c.relname ILIKE 'orders' AND n.nspname = 'public'"));
    }

    #[tokio::test]
    async fn test_run_and_render_table() {
        let log = SessionLog::default();
        let mut session = ScriptedSession::new(log.clone(), |sql| {
            if sql.contains("pg_attribute") {
                Ok(rows(
                    &[
                        ("object_name", "TEXT"),
                        ("object_type", "TEXT"),
                        ("definition", "TEXT"),
                        ("description", "TEXT"),
                    ],
                    vec![vec![
                        text("public.orders"),
                        text("TABLE"),
                        text("CREATE TABLE public.orders (\n    id bigint NOT NULL,\n    total numeric(10,2) DEFAULT 0\n);"),
                        ScalarValue::Null,
                    ]],
                ))
            } else {
                Ok(QueryResult::empty())
            }
        });

        let report = run(&mut session, &target(ObjectType::Table), Duration::from_secs(30))
            .await
            .unwrap();

        let executed = log.executed();
        assert_eq!(executed[0], "BEGIN READ ONLY");
        assert_eq!(executed[1], "SET LOCAL statement_timeout = '30000ms'");
        assert_eq!(executed[3], "COMMIT");

        assert_eq!(
            report.render(),
            "Database Object DDL Report\n\n\
             Object Type: table\nSchema: public\nName Pattern: orders\nObjects Found: 1\n\n\
             === OBJECT #1: public.orders ===\n\
             • Type: TABLE\n\
             • Description: None\n\
             \nDefinition:\n\
             CREATE TABLE public.orders (\n    id bigint NOT NULL,\n    total numeric(10,2) DEFAULT 0\n);\n\
             \nExplanation:\n\
             This table contains the following structure:\n\
             - id: bigint NOT NULL\n\
             - total: numeric(10,2) DEFAULT 0\n"
        );
    }

    #[test]
    fn test_no_match() {
        let report = DdlReport {
            target: target(ObjectType::View),
            result: QueryResult::empty(),
        };
        assert!(report
            .render()
            .ends_with("Name Pattern: orders\n\nNo matching objects found\n"));
    }

    #[test]
    fn test_function_details() {
        let definition = "CREATE OR REPLACE FUNCTION public.order_total(p_id bigint, p_scale numeric(10,2))\n RETURNS numeric\n LANGUAGE plpgsql\nAS $function$\nBEGIN\n  IF p_id IS NULL THEN RETURN 0; END IF;\n  RETURN (SELECT sum(total) FROM orders WHERE id = p_id);\nEND;\n$function$\n";
        let report = DdlReport {
            target: target(ObjectType::Function),
            result: rows(
                &[
                    ("object_name", "TEXT"),
                    ("object_type", "TEXT"),
                    ("definition", "TEXT"),
                    ("description", "TEXT"),
                    ("return_type", "TEXT"),
                    ("volatility", "TEXT"),
                    ("parallel", "TEXT"),
                ],
                vec![vec![
                    text("public.order_total"),
                    text("FUNCTION"),
                    text(definition),
                    text("Sum of an order"),
                    text("numeric"),
                    text("STABLE"),
                    text("SAFE"),
                ]],
            ),
        };
        let rendered = report.render();
        assert!(rendered.contains(
            "• Description: Sum of an order\n• Return Type: numeric\n• Volatility: STABLE\n• Parallel: SAFE\n"
        ));
        assert!(rendered.contains(
            "This is a function that:\n\nParameters:\n- p_id bigint\n- p_scale numeric(10,2)\n\nReturns: numeric\n\nLogic overview:\n- Contains conditional logic\n- Retrieves data\n"
        ));
    }

    #[test]
    fn test_view_and_trigger_explanations() {
        let view = explain_view(
            " SELECT o.id, sum(i.qty) AS qty\n   FROM orders o\n     JOIN items i ON i.order_id = o.id\n  GROUP BY o.id\n  ORDER BY o.id;",
        );
        assert_eq!(
            view,
            "This view performs a SELECT with the following characteristics:\n\
             - Joins multiple tables\n- Aggregates data\n- Sorts the results"
        );

        let trigger = explain_trigger(
            "CREATE TRIGGER orders_audit AFTER INSERT OR UPDATE ON public.orders FOR EACH ROW EXECUTE FUNCTION audit()",
        );
        assert_eq!(
            trigger,
            "This trigger:\n- Executes AFTER the event\n- Fires on INSERT\n- Fires on UPDATE\n- Executes for each affected row"
        );

        assert_eq!(
            explain(ObjectType::Index, "CREATE INDEX orders_pkey ON public.orders (id)"),
            "DDL for index"
        );
    }
}
