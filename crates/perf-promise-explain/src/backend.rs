//! Database backends and their plan classifiers.
//!
//! Each backend explains a select its own way and reports full table scans in
//! its own vocabulary. The classifiers map those payloads onto [`PlanInfo`].

use crate::plan::PlanInfo;
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

/// Database backend a statement was executed against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Backend {
    /// MySQL / MariaDB: tabular `EXPLAIN` with a `type` column.
    MySql,
    /// SQLite: `EXPLAIN QUERY PLAN` with a textual `detail` column.
    Sqlite,
    /// PostgreSQL: `EXPLAIN (FORMAT JSON)` plan tree.
    Postgres,
    /// An adapter this crate does not recognize.
    Unknown(String),
}

impl Backend {
    /// Resolve a driver/adapter name (`Mysql2`, `SQLite`, `PostgreSQL`, ...).
    pub fn from_adapter_name(name: &str) -> Self {
        let lower = name.trim().to_ascii_lowercase();
        if lower.starts_with("mysql") || lower.starts_with("mariadb") {
            Backend::MySql
        } else if lower.starts_with("sqlite") {
            Backend::Sqlite
        } else if lower.starts_with("postgres") || lower == "postgis" || lower == "pg" {
            Backend::Postgres
        } else {
            Backend::Unknown(name.to_string())
        }
    }

    /// The statement used to probe the plan of `sql` on this backend.
    pub fn explain_statement(&self, sql: &str) -> String {
        match self {
            Backend::MySql => format!("EXPLAIN {sql}"),
            Backend::Postgres => format!("EXPLAIN (FORMAT JSON) {sql}"),
            Backend::Sqlite | Backend::Unknown(_) => format!("EXPLAIN QUERY PLAN {sql}"),
        }
    }

    /// Classify an explain payload.
    ///
    /// `raw` is the probe result as JSON: an array of row objects for the
    /// tabular backends, the `FORMAT JSON` document for Postgres. Unknown
    /// backends degrade to the SQLite textual heuristic with a warning.
    pub fn classify(&self, raw: Value) -> PlanInfo {
        let table = match self {
            Backend::MySql => mysql_full_scan(&raw),
            Backend::Sqlite => sqlite_full_scan(&raw),
            Backend::Postgres => postgres_full_scan(&raw),
            Backend::Unknown(name) => {
                tracing::warn!(
                    target: "perf_promise.explain",
                    adapter = %name,
                    "Unknown database adapter {name}, falling back to EXPLAIN QUERY PLAN heuristics"
                );
                sqlite_full_scan(&raw)
            }
        };
        match table {
            Some(table) => PlanInfo::full_scan(table, Some(raw)),
            None => PlanInfo::indexed(Some(raw)),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::MySql => f.write_str("mysql"),
            Backend::Sqlite => f.write_str("sqlite"),
            Backend::Postgres => f.write_str("postgres"),
            Backend::Unknown(name) => write!(f, "unknown({name})"),
        }
    }
}

fn rows(raw: &Value) -> &[Value] {
    match raw {
        Value::Array(rows) => rows,
        other => std::slice::from_ref(other),
    }
}

fn mysql_full_scan(raw: &Value) -> Option<String> {
    rows(raw).iter().find_map(|row| {
        let access = row
            .get("type")
            .or_else(|| row.get("access_type"))
            .and_then(Value::as_str)?;
        if !access.eq_ignore_ascii_case("ALL") {
            return None;
        }
        row.get("table")
            .and_then(Value::as_str)
            .map(|t| t.to_string())
    })
}

fn sqlite_scan_re() -> &'static regex::Regex {
    static SCAN_RE: OnceLock<regex::Regex> = OnceLock::new();
    SCAN_RE.get_or_init(|| {
        regex::Regex::new(
            r#"^SCAN (?:TABLE )?"?([A-Za-z_][A-Za-z0-9_$]*)"?(?: AS \w+)?(?P<index> USING (?:COVERING )?INDEX\b.*)?(?: \(~\d+ rows\))?$"#,
        )
        .expect("invalid built-in scan regex")
    })
}

/// Full scan when a `detail` reads `SCAN TABLE users` (or `SCAN users` on
/// SQLite >= 3.36). Index scans are not full table scans, and neither are
/// `SCAN CONSTANT ROW` or scans of subqueries.
fn sqlite_full_scan(raw: &Value) -> Option<String> {
    rows(raw).iter().find_map(|row| {
        let detail = row.get("detail").and_then(Value::as_str)?;
        let caps = sqlite_scan_re().captures(detail.trim())?;
        if caps.name("index").is_some() {
            return None;
        }
        caps.get(1).map(|m| m.as_str().to_string())
    })
}

fn postgres_full_scan(raw: &Value) -> Option<String> {
    fn walk(node: &Value) -> Option<String> {
        if node.get("Node Type").and_then(Value::as_str) == Some("Seq Scan") {
            if let Some(table) = node.get("Relation Name").and_then(Value::as_str) {
                return Some(table.to_string());
            }
        }
        node.get("Plans")
            .and_then(Value::as_array)
            .and_then(|children| children.iter().find_map(walk))
    }

    rows(raw).iter().find_map(|doc| doc.get("Plan").map_or_else(|| walk(doc), walk))
}
