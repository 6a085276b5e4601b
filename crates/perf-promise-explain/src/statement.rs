//! Leading-keyword statement classification.
//!
//! Only the first keyword matters here: selects get an execution plan probe,
//! everything else is counted without one.

use serde::Serialize;

/// Kind of a recorded statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Explain,
    Other,
}

impl StatementKind {
    /// Detect the statement kind from SQL text.
    ///
    /// `WITH ...` is resolved to the DML keyword that follows the last
    /// top-level CTE body.
    pub fn from_sql(sql: &str) -> Self {
        let trimmed = skip_noise(sql);
        if starts_with_keyword(trimmed, "SELECT") {
            StatementKind::Select
        } else if starts_with_keyword(trimmed, "INSERT") {
            StatementKind::Insert
        } else if starts_with_keyword(trimmed, "UPDATE") {
            StatementKind::Update
        } else if starts_with_keyword(trimmed, "DELETE") {
            StatementKind::Delete
        } else if starts_with_keyword(trimmed, "EXPLAIN") {
            StatementKind::Explain
        } else if starts_with_keyword(trimmed, "WITH") {
            Self::after_cte(trimmed)
        } else {
            StatementKind::Other
        }
    }

    /// Whether the statement reads rows and therefore has a plan worth probing.
    pub fn is_select(self) -> bool {
        matches!(self, StatementKind::Select)
    }

    fn after_cte(sql: &str) -> Self {
        main_statement(sql).map_or(StatementKind::Other, Self::from_sql)
    }
}

/// The statement that follows the CTE list of a `WITH` clause.
///
/// Each entry is `name [(columns)] AS [[NOT] MATERIALIZED] (body)`; entries
/// are separated by commas. `None` when the list is malformed.
fn main_statement(sql: &str) -> Option<&str> {
    let mut rest = strip_keyword(sql, "WITH")?;
    rest = strip_keyword(rest, "RECURSIVE").unwrap_or(rest);
    loop {
        rest = skip_identifier(rest)?.trim_start();
        if rest.starts_with('(') {
            rest = skip_parenthesized(rest)?;
        }
        rest = strip_keyword(rest, "AS")?;
        rest = strip_keyword(rest, "NOT").unwrap_or(rest);
        rest = strip_keyword(rest, "MATERIALIZED").unwrap_or(rest);
        rest = skip_parenthesized(rest.trim_start())?.trim_start();
        match rest.strip_prefix(',') {
            Some(next) => rest = next,
            None => return Some(rest),
        }
    }
}

fn strip_keyword<'a>(s: &'a str, keyword: &str) -> Option<&'a str> {
    let s = s.trim_start();
    starts_with_keyword(s, keyword).then(|| &s[keyword.len()..])
}

/// Skip a bare or double-quoted identifier.
fn skip_identifier(s: &str) -> Option<&str> {
    let s = s.trim_start();
    if s.starts_with('"') {
        return skip_quoted(s, b'"');
    }
    let end = s
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(s.len());
    (end > 0).then(|| &s[end..])
}

/// Skip a quoted run starting at `s[0]`, honouring doubled quotes.
fn skip_quoted(s: &str, quote: u8) -> Option<&str> {
    let bytes = s.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(&s[i + 1..]);
        }
        i += 1;
    }
    None
}

/// Skip a balanced `( ... )` group starting at `s[0]`. Parentheses inside
/// string literals and quoted identifiers do not count.
fn skip_parenthesized(s: &str) -> Option<&str> {
    if !s.starts_with('(') {
        return None;
    }
    let mut depth = 0usize;
    let mut rest = s;
    while let Some(c) = rest.chars().next() {
        match c {
            '\'' | '"' => {
                rest = skip_quoted(rest, c as u8)?;
                continue;
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&rest[1..]);
                }
            }
            _ => {}
        }
        rest = &rest[c.len_utf8()..];
    }
    None
}

/// Skip whitespace, `--` and `/* */` comments, and opening parentheses.
fn skip_noise(sql: &str) -> &str {
    let mut s = sql;
    loop {
        let before = s;
        s = s.trim_start();
        if let Some(rest) = s.strip_prefix("--") {
            match rest.find('\n') {
                Some(pos) => s = &rest[pos + 1..],
                None => return "",
            }
            continue;
        }
        if let Some(rest) = s.strip_prefix("/*") {
            match rest.find("*/") {
                Some(pos) => s = &rest[pos + 2..],
                None => return "",
            }
            continue;
        }
        if let Some(rest) = s.strip_prefix('(') {
            s = rest;
            continue;
        }
        if s == before {
            return s;
        }
    }
}

fn starts_with_keyword(s: &str, keyword: &str) -> bool {
    let Some(prefix) = s.get(..keyword.len()) else {
        return false;
    };
    prefix.eq_ignore_ascii_case(keyword)
        && !s[keyword.len()..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_leading_keywords() {
        assert_eq!(
            StatementKind::from_sql("SELECT * FROM users"),
            StatementKind::Select
        );
        assert_eq!(
            StatementKind::from_sql("  select id FROM users"),
            StatementKind::Select
        );
        assert_eq!(
            StatementKind::from_sql("/* tag */ -- note\n(SELECT 1)"),
            StatementKind::Select
        );
        assert_eq!(
            StatementKind::from_sql("INSERT INTO users (name) VALUES (?)"),
            StatementKind::Insert
        );
        assert_eq!(
            StatementKind::from_sql("UPDATE users SET name = ?"),
            StatementKind::Update
        );
        assert_eq!(
            StatementKind::from_sql("DELETE FROM users WHERE id = ?"),
            StatementKind::Delete
        );
        assert_eq!(
            StatementKind::from_sql("EXPLAIN QUERY PLAN SELECT 1"),
            StatementKind::Explain
        );
        assert_eq!(
            StatementKind::from_sql("PRAGMA table_info(users)"),
            StatementKind::Other
        );
    }

    #[test]
    fn keyword_must_end_at_a_word_boundary() {
        assert_eq!(
            StatementKind::from_sql("SELECTED_ROWS"),
            StatementKind::Other
        );
    }

    #[test]
    fn cte_resolves_to_trailing_dml() {
        assert_eq!(
            StatementKind::from_sql("WITH a AS (SELECT 1) SELECT * FROM a"),
            StatementKind::Select
        );
        assert_eq!(
            StatementKind::from_sql(
                "WITH gone AS (SELECT id FROM users WHERE name = ')') DELETE FROM users"
            ),
            StatementKind::Delete
        );
    }

    #[test]
    fn cte_kind_ignores_parentheses_in_the_main_statement() {
        assert_eq!(
            StatementKind::from_sql(
                "WITH src AS (SELECT id FROM users) INSERT INTO audit (user_id) VALUES (1)"
            ),
            StatementKind::Insert
        );
        assert_eq!(
            StatementKind::from_sql(
                "WITH a AS (SELECT 1), b (x) AS MATERIALIZED (SELECT 2) \
                 UPDATE t SET v = coalesce(v, 0) WHERE id IN (SELECT x FROM b)"
            ),
            StatementKind::Update
        );
        assert_eq!(
            StatementKind::from_sql(
                "with recursive \"tree\" as (select 1 union all select 2) select count(*) from tree"
            ),
            StatementKind::Select
        );
    }

    #[test]
    fn malformed_cte_list_is_other() {
        assert_eq!(
            StatementKind::from_sql("WITH a AS (SELECT 1"),
            StatementKind::Other
        );
        assert_eq!(StatementKind::from_sql("WITH a SELECT 1"), StatementKind::Other);
    }
}
