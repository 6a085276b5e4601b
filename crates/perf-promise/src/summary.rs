//! Grouping of recorded statements and the text built from it.

use crate::recorder::RecordedQuery;
use crate::trace::{Frame, TraceCleaner};
use heck::ToUpperCamelCase;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Identical statements of a trace, in order of first appearance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryGroup<'a> {
    /// First occurrence; its trace stands for the whole group.
    pub query: &'a RecordedQuery,
    pub count: usize,
}

/// Group statements by SQL text and plan shape.
pub fn summarize<'a, I>(trace: I) -> Vec<QueryGroup<'a>>
where
    I: IntoIterator<Item = &'a RecordedQuery>,
{
    let mut groups: Vec<QueryGroup<'a>> = Vec::new();
    let mut index: HashMap<(&'a str, bool, Option<&'a str>), usize> = HashMap::new();
    for query in trace {
        let (full_scan, table) = query.plan.shape();
        let key = (query.sql.as_str(), full_scan, table);
        match index.get(&key) {
            Some(&slot) => groups[slot].count += 1,
            None => {
                index.insert(key, groups.len());
                groups.push(QueryGroup { query, count: 1 });
            }
        }
    }
    groups
}

fn foreign_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\bWHERE\b.*\b(\w+_id)"?\s*=\s*(?:\?|\$\d+)"#)
            .expect("invalid built-in foreign key regex")
    })
}

/// Turn `article_id` into `Article`.
fn humanize(field: &str) -> String {
    let lower = field.to_ascii_lowercase();
    let stem = lower.strip_suffix("_id").unwrap_or(&lower);
    stem.to_upper_camel_case()
}

/// Suggest the budget expression the trace actually needed.
///
/// Repeated statements filtering on a `*_id` column read as one query per
/// parent row (`Article.N.queries`); the rest are tallied as constants.
pub fn guess_order(trace: &[RecordedQuery]) -> String {
    let mut parts = Vec::new();
    let mut singles = 0usize;
    for group in summarize(trace) {
        if group.count == 1 {
            singles += 1;
            continue;
        }
        match foreign_key_re().captures(&group.query.sql) {
            Some(caps) => parts.push(format!("{}.N.queries", humanize(&caps[1]))),
            None => parts.push("n(???)".to_string()),
        }
    }
    match singles {
        0 => {}
        1 => parts.push("1.query".to_string()),
        k => parts.push(format!("{k}.queries")),
    }
    parts.join(" + ")
}

/// Source files read while annotating one backtrace.
#[derive(Default)]
struct SourceCache {
    files: HashMap<PathBuf, Option<Vec<String>>>,
}

impl SourceCache {
    fn line(&mut self, path: PathBuf, line: u32) -> Option<&str> {
        let lines = self.files.entry(path).or_insert_with_key(|path| {
            std::fs::read_to_string(path)
                .ok()
                .map(|source| source.lines().map(str::to_string).collect())
        });
        let index = usize::try_from(line).ok()?.checked_sub(1)?;
        lines.as_ref()?.get(index).map(|code| code.trim())
    }

    fn annotate(&mut self, cleaner: &TraceCleaner, frame: &str) -> String {
        if !cleaner.is_app_frame(frame) {
            return frame.to_string();
        }
        let Some(parsed) = Frame::parse(frame) else {
            return frame.to_string();
        };
        match self.line(cleaner.resolve(&parsed.path), parsed.line) {
            Some(code) if !code.is_empty() => format!("    |_{code} ({frame})"),
            _ => frame.to_string(),
        }
    }
}

/// Render `"<count> x <sql>"` per group, each followed by its call-site
/// frames. Application frames are annotated with their source line when the
/// file can be read.
pub fn build_backtrace<'a, I>(trace: I, cleaner: &TraceCleaner) -> Vec<String>
where
    I: IntoIterator<Item = &'a RecordedQuery>,
{
    let mut sources = SourceCache::default();
    let mut lines = Vec::new();
    for group in summarize(trace) {
        lines.push(format!("{} x {}", group.count, group.query.sql));
        for frame in &group.query.trace {
            lines.push(sources.annotate(cleaner, frame));
        }
    }
    lines
}
