//! Static complexity scoring for caller-supplied statements.
//!
//! Only the code part of a statement is scored; keywords inside literals and
//! comments do not count.

use super::sql_validator::code_tokens;

const AGGREGATES: [&str; 5] = ["count", "sum", "avg", "max", "min"];

/// Weighted counts of the constructs that make a statement expensive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryComplexity {
    pub score: usize,
    pub joins: usize,
    pub subqueries: usize,
    pub aggregations: usize,
    pub window_functions: bool,
    pub where_conditions: usize,
    pub warnings: Vec<String>,
}

impl QueryComplexity {
    /// Scores one statement: 2 per join, 3 per subquery, 1 per aggregate
    /// call, 3 for window functions and 1 per `AND`/`OR` after `WHERE`.
    pub fn analyze(sql: &str) -> Self {
        let tokens = code_tokens(sql);
        let followed_by = |idx: usize, next: &str| tokens.get(idx + 1).is_some_and(|t| t == next);

        let joins = tokens.iter().filter(|t| *t == "join").count();
        let subqueries = tokens
            .iter()
            .enumerate()
            .filter(|(idx, t)| *t == "(" && followed_by(*idx, "select"))
            .count();
        let aggregations = tokens
            .iter()
            .enumerate()
            .filter(|(idx, t)| AGGREGATES.contains(&t.as_str()) && followed_by(*idx, "("))
            .count();
        let window_functions = tokens.iter().enumerate().any(|(idx, t)| {
            (t == "over" && followed_by(idx, "(")) || (t == "partition" && followed_by(idx, "by"))
        });
        let where_conditions = tokens
            .iter()
            .position(|t| t == "where")
            .map(|start| {
                tokens[start..]
                    .iter()
                    .filter(|t| *t == "and" || *t == "or")
                    .count()
            })
            .unwrap_or(0);

        let mut warnings = Vec::new();
        if joins > 3 {
            warnings.push(format!("Query contains {} joins - consider simplifying", joins));
        }
        if subqueries > 2 {
            warnings.push(format!(
                "Query contains {} subqueries - consider restructuring",
                subqueries
            ));
        }
        if window_functions {
            warnings.push("Query uses window functions - monitor performance".to_string());
        }
        if where_conditions > 5 {
            warnings.push(format!(
                "Complex WHERE clause with {} conditions",
                where_conditions
            ));
        }

        let score = joins * 2
            + subqueries * 3
            + aggregations
            + if window_functions { 3 } else { 0 }
            + where_conditions;

        Self {
            score,
            joins,
            subqueries,
            aggregations,
            window_functions,
            where_conditions,
            warnings,
        }
    }
}
