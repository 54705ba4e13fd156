//! SQL statement validator.
//!
//! Restricts caller-supplied SQL to read-only statements. The scanner is
//! quote- and comment-aware: keywords inside string literals, quoted
//! identifiers, dollar-quoted bodies and comments are ignored.

use crate::errors::AppError;

/// Validates SQL statements for security.
pub struct SqlValidator;

/// Leading keywords a statement may start with.
const ALLOWED_LEADING: [&str; 4] = ["select", "with", "show", "values"];

/// Keywords rejected anywhere in the code part of a statement.
const FORBIDDEN_KEYWORDS: [&str; 13] = [
    "insert", "update", "delete", "drop", "truncate", "alter", "create", "grant", "revoke",
    "execute", "copy", "merge", "call",
];

#[derive(Clone, PartialEq)]
enum Scan {
    Code,
    SingleQuote,
    EscapeQuote,
    DoubleQuote,
    LineComment,
    BlockComment(usize),
    DollarQuote(Vec<char>),
}

/// Characters that may continue an identifier, `$` included.
fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Whether the code char before `i` continues an identifier.
fn follows_identifier(chars: &[char], code: &[bool], i: usize) -> bool {
    i > 0 && code[i - 1] && is_identifier_char(chars[i - 1])
}

/// Marks every char of `chars` as code (`true`) or quoted/comment (`false`).
fn classify(chars: &[char]) -> Vec<bool> {
    let mut code = vec![false; chars.len()];
    let mut state = Scan::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match &state {
            Scan::Code => match (c, next) {
                ('-', Some('-')) => {
                    state = Scan::LineComment;
                    i += 2;
                    continue;
                }
                ('/', Some('*')) => {
                    state = Scan::BlockComment(1);
                    i += 2;
                    continue;
                }
                // E'...' string: the E stands alone, not at the end of an identifier.
                ('\'', _)
                    if i > 0
                        && matches!(chars[i - 1], 'e' | 'E')
                        && code[i - 1]
                        && !follows_identifier(chars, &code, i - 1) =>
                {
                    state = Scan::EscapeQuote
                }
                ('\'', _) => state = Scan::SingleQuote,
                ('"', _) => state = Scan::DoubleQuote,
                // `x$a$` is one identifier, not the start of a dollar quote.
                ('$', _) if follows_identifier(chars, &code, i) => code[i] = true,
                ('$', _) => match dollar_tag(chars, i) {
                    Some(tag) => {
                        i += tag.len();
                        state = Scan::DollarQuote(tag);
                        continue;
                    }
                    None => code[i] = true,
                },
                _ => code[i] = true,
            },
            Scan::SingleQuote | Scan::DoubleQuote => {
                let quote = if state == Scan::SingleQuote { '\'' } else { '"' };
                if c == quote {
                    // Doubled quote is an escaped quote.
                    if next == Some(quote) {
                        i += 2;
                        continue;
                    }
                    state = Scan::Code;
                }
            }
            Scan::EscapeQuote => match (c, next) {
                ('\\', _) | ('\'', Some('\'')) => {
                    i += 2;
                    continue;
                }
                ('\'', _) => state = Scan::Code,
                _ => {}
            },
            Scan::LineComment => {
                if c == '\n' {
                    state = Scan::Code;
                }
            }
            Scan::BlockComment(depth) => {
                let depth = *depth;
                match (c, next) {
                    ('/', Some('*')) => {
                        state = Scan::BlockComment(depth + 1);
                        i += 2;
                        continue;
                    }
                    ('*', Some('/')) => {
                        state = if depth == 1 {
                            Scan::Code
                        } else {
                            Scan::BlockComment(depth - 1)
                        };
                        i += 2;
                        continue;
                    }
                    _ => {}
                }
            }
            Scan::DollarQuote(tag) => {
                if chars[i..].starts_with(tag) {
                    i += tag.len();
                    state = Scan::Code;
                    continue;
                }
            }
        }
        i += 1;
    }
    code
}

/// Returns the `$tag$` opener starting at `start`, if any.
fn dollar_tag(chars: &[char], start: usize) -> Option<Vec<char>> {
    let mut end = start + 1;
    while let Some(c) = chars.get(end) {
        match c {
            '$' => return Some(chars[start..=end].to_vec()),
            c if c.is_alphanumeric() || *c == '_' => {
                // Positional parameters such as `$1` are not tags.
                if end == start + 1 && c.is_ascii_digit() {
                    return None;
                }
                end += 1;
            }
            _ => return None,
        }
    }
    None
}

/// Lowercase words from the code part of `sql`.
fn code_words(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let code = classify(&chars);
    let masked: String = chars
        .iter()
        .zip(&code)
        .map(|(c, is_code)| if *is_code { *c } else { ' ' })
        .collect();
    masked
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

/// Lowercase tokens from the code part of `sql`: words plus single
/// punctuation characters.
pub(crate) fn code_tokens(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let code = classify(&chars);
    let mut tokens = Vec::new();
    let mut word = String::new();

    for (c, is_code) in chars.iter().zip(&code) {
        if *is_code && (c.is_alphanumeric() || *c == '_') {
            word.extend(c.to_lowercase());
            continue;
        }
        if !word.is_empty() {
            tokens.push(std::mem::take(&mut word));
        }
        if *is_code && !c.is_whitespace() {
            tokens.push(c.to_string());
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

impl SqlValidator {
    /// Splits `sql` on statement-terminating semicolons.
    ///
    /// Statements are trimmed, lose their trailing `;`, and comment-only
    /// fragments are dropped.
    pub fn split_statements(sql: &str) -> Vec<String> {
        let chars: Vec<char> = sql.chars().collect();
        let code = classify(&chars);
        let mut statements = Vec::new();
        let mut current = String::new();

        for (c, is_code) in chars.iter().zip(&code) {
            if *c == ';' && *is_code {
                statements.push(std::mem::take(&mut current));
            } else {
                current.push(*c);
            }
        }
        statements.push(current);

        statements
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !code_words(s).is_empty())
            .collect()
    }

    /// Validates that `sql` only contains read-only statements.
    ///
    /// # Errors
    /// Returns `AppError::UnsafeSql` for empty input, more than
    /// `max_statements` statements, a disallowed leading keyword, or a
    /// forbidden keyword outside quotes and comments.
    pub fn validate_read_only(sql: &str, max_statements: usize) -> Result<Vec<String>, AppError> {
        let statements = Self::split_statements(sql);
        if statements.is_empty() {
            return Err(AppError::UnsafeSql(
                "query must contain at least one statement".into(),
            ));
        }
        if statements.len() > max_statements {
            return Err(AppError::UnsafeSql(format!(
                "too many statements ({}), maximum allowed is {}",
                statements.len(),
                max_statements
            )));
        }

        for (idx, statement) in statements.iter().enumerate() {
            Self::validate_statement(statement)
                .map_err(|reason| AppError::UnsafeSql(format!("statement {}: {}", idx + 1, reason)))?;
        }
        Ok(statements)
    }

    fn validate_statement(statement: &str) -> Result<(), String> {
        let words = code_words(statement);
        let first = words.first().map(String::as_str).unwrap_or_default();
        if !ALLOWED_LEADING.contains(&first) {
            return Err(format!("prohibited operation '{}'", first));
        }
        if let Some(keyword) = words
            .iter()
            .find(|w| FORBIDDEN_KEYWORDS.contains(&w.as_str()))
        {
            return Err(format!("prohibited keyword '{}'", keyword));
        }
        Ok(())
    }

    /// Checks if the statement is a query that returns rows (SELECT / WITH / VALUES).
    pub fn is_select(sql: &str) -> bool {
        matches!(
            code_words(sql).first().map(String::as_str),
            Some("select" | "with" | "values")
        )
    }

    /// Caps row-returning statements at `limit` rows.
    ///
    /// The statement becomes a derived table so a `LIMIT` inside it (or in a
    /// subquery) cannot replace the outer cap.
    pub fn with_row_limit(sql: &str, limit: usize) -> String {
        if Self::is_select(sql) {
            // Own lines so a trailing line comment cannot swallow the wrapper.
            format!("SELECT * FROM (\n{}\n) AS q LIMIT {}", sql, limit)
        } else {
            sql.to_string()
        }
    }

    /// Replaces positional parameters `$1`..`$max` in code positions with
    /// `NULL`. Returns the rewritten statement and whether any were found.
    ///
    /// # Errors
    /// Returns `AppError::Validation` for a parameter above `$max`.
    pub fn replace_parameters(sql: &str, max: usize) -> Result<(String, bool), AppError> {
        let chars: Vec<char> = sql.chars().collect();
        let code = classify(&chars);
        let mut out = String::with_capacity(sql.len());
        let mut found = false;
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            let is_parameter = c == '$'
                && code[i]
                && !follows_identifier(&chars, &code, i)
                && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit());
            if !is_parameter {
                out.push(c);
                i += 1;
                continue;
            }

            let digits: String = chars[i + 1..]
                .iter()
                .take_while(|d| d.is_ascii_digit())
                .collect();
            let index: usize = digits.parse().unwrap_or(usize::MAX);
            if index == 0 || index > max {
                return Err(AppError::Validation(format!(
                    "Positional parameter ${} is not supported, use $1 to ${}",
                    digits, max
                )));
            }
            out.push_str("NULL");
            found = true;
            i += 1 + digits.len();
        }
        Ok((out, found))
    }

    /// Removes any leading `EXPLAIN [ANALYZE] [(options)]` prefix.
    pub fn strip_explain(sql: &str) -> String {
        let mut rest = sql.trim_start();
        loop {
            let Some(after) = strip_keyword(rest, "explain") else {
                break;
            };
            rest = after.trim_start();
            if rest.starts_with('(') {
                match rest.find(')') {
                    Some(close) => rest = rest[close + 1..].trim_start(),
                    None => break,
                }
            }
            for option in ["analyze", "analyse", "verbose"] {
                if let Some(after) = strip_keyword(rest, option) {
                    rest = after.trim_start();
                }
            }
        }
        rest.trim().trim_end_matches(';').trim_end().to_string()
    }
}

/// Strips a leading case-insensitive keyword followed by a word boundary.
fn strip_keyword<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let head = sql.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &sql[keyword.len()..];
    match rest.chars().next() {
        None => Some(rest),
        Some(c) if c.is_whitespace() || c == '(' => Some(rest),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_is_allowed() {
        let statements = SqlValidator::validate_read_only("SELECT * FROM users;", 5).unwrap();
        assert_eq!(statements, vec!["SELECT * FROM users".to_string()]);
    }

    #[test]
    fn test_drop_is_forbidden() {
        assert!(SqlValidator::validate_read_only("DROP TABLE users", 5).is_err());
        let err = SqlValidator::validate_read_only("WITH x AS (DELETE FROM t RETURNING *) SELECT * FROM x", 5)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Query validation failed: statement 1: prohibited keyword 'delete'"
        );
    }

    #[test]
    fn test_keywords_in_quotes_and_comments_are_ignored() {
        let sql = "SELECT 'drop table x; --' AS a, \"update\" FROM t -- delete\n/* truncate; */ WHERE b = $$insert$$";
        let statements = SqlValidator::validate_read_only(sql, 5).unwrap();
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn test_split_statements() {
        let statements = SqlValidator::split_statements("select 1; select ';'; -- trailing\n");
        assert_eq!(statements, vec!["select 1".to_string(), "select ';'".to_string()]);
    }

    #[test]
    fn test_too_many_statements() {
        let err = SqlValidator::validate_read_only("select 1; select 2; select 3", 2).unwrap_err();
        assert!(err.to_string().contains("too many statements (3)"));
    }

    #[test]
    fn test_empty_query() {
        assert!(SqlValidator::validate_read_only(" ; -- nothing", 5).is_err());
    }

    #[test]
    fn test_is_select_and_limit() {
        assert!(SqlValidator::is_select("SELECT * FROM users"));
        assert!(!SqlValidator::is_select("SHOW work_mem"));
        assert_eq!(
            SqlValidator::with_row_limit("select * from t -- all", 21),
            "SELECT * FROM (\nselect * from t -- all\n) AS q LIMIT 21"
        );
        assert_eq!(SqlValidator::with_row_limit("show work_mem", 21), "show work_mem");
    }

    #[test]
    fn test_inner_limit_keeps_outer_cap() {
        let sql = "SELECT * FROM big WHERE id IN (SELECT id FROM t LIMIT 5)";
        assert_eq!(
            SqlValidator::with_row_limit(sql, 21),
            format!("SELECT * FROM (\n{}\n) AS q LIMIT 21", sql)
        );
        assert!(SqlValidator::with_row_limit("select * from t limit 500", 21).ends_with("LIMIT 21"));
    }

    #[test]
    fn test_dollar_in_identifier_does_not_open_a_quote() {
        let sql = "SELECT 1 AS x$a$; COMMIT; DELETE FROM users; SELECT 1 AS y$a$";
        assert_eq!(SqlValidator::split_statements(sql).len(), 4);
        assert!(SqlValidator::validate_read_only(sql, 1).is_err());
        let err = SqlValidator::validate_read_only(sql, 5).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Query validation failed: statement 2: prohibited operation 'commit'"
        );
        // A real dollar quote still masks its body.
        assert!(SqlValidator::validate_read_only("SELECT $a$; DELETE$a$", 1).is_ok());
    }

    #[test]
    fn test_escape_string_backslash() {
        let sql = "SELECT E'\\''; COMMIT; DELETE FROM users; SELECT ''";
        assert_eq!(SqlValidator::split_statements(sql).len(), 4);
        assert!(SqlValidator::validate_read_only(sql, 1).is_err());
        // Without the E prefix a backslash is an ordinary character.
        assert_eq!(SqlValidator::split_statements("SELECT '\\'; SELECT 2").len(), 2);
        // An identifier ending in e is not a prefix.
        assert_eq!(SqlValidator::split_statements("SELECT name'\\'; SELECT 2").len(), 2);
        assert!(SqlValidator::validate_read_only("select e'it\\'s; drop'", 1).is_ok());
    }

    #[test]
    fn test_replace_parameters() {
        let (sql, found) =
            SqlValidator::replace_parameters("select * from t where a = $1 and b = $12", 20).unwrap();
        assert_eq!(sql, "select * from t where a = NULL and b = NULL");
        assert!(found);

        let (sql, found) =
            SqlValidator::replace_parameters("select '$1', $$ $2 $$, x$1 from t", 20).unwrap();
        assert_eq!(sql, "select '$1', $$ $2 $$, x$1 from t");
        assert!(!found);

        let err = SqlValidator::replace_parameters("select $21", 20).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "Positional parameter $21 is not supported, use $1 to $20");
    }

    #[test]
    fn test_strip_explain() {
        assert_eq!(SqlValidator::strip_explain("EXPLAIN ANALYZE SELECT 1;"), "SELECT 1");
        assert_eq!(
            SqlValidator::strip_explain("explain (analyze, buffers) select * from t"),
            "select * from t"
        );
        assert_eq!(SqlValidator::strip_explain("select explained from t"), "select explained from t");
    }
}
