//! Promise declarations.

use crate::expr::LazyExpr;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Table metadata for a model type.
///
/// Implement this for the structs a handler loads so promises can name them
/// instead of spelling out table names.
pub trait Model {
    /// The database table name.
    fn table_name() -> &'static str;
}

/// A physical table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableRef(String);

impl TableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The table backing model `M`.
    pub fn of<M: Model>() -> Self {
        Self(M::table_name().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TableRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for TableRef {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// A performance budget declared for one handler.
///
/// Every key is optional; a promise with no keys always passes.
///
/// # Example
///
/// ```ignore
/// use perf_promise::{Promise, n, queries};
/// use std::time::Duration;
///
/// let promise = Promise::new()
///     .makes(queries(1) + n::<Comment>())
///     .takes(Duration::from_millis(250))
///     .full_table_scans([TableRef::of::<Tag>()]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Promise {
    /// Maximum number of statements.
    pub makes: Option<LazyExpr>,
    /// Maximum elapsed time for the whole request.
    pub takes: Option<Duration>,
    /// Tables that may be read with a full scan.
    pub full_table_scans: Option<BTreeSet<TableRef>>,
    /// Skip validation entirely.
    pub skip: bool,
}

impl Promise {
    /// Create an empty promise.
    pub fn new() -> Self {
        Self::default()
    }

    /// Promise at most this many statements.
    pub fn makes(mut self, makes: impl Into<LazyExpr>) -> Self {
        self.makes = Some(makes.into());
        self
    }

    /// Promise the request completes within `takes`.
    pub fn takes(mut self, takes: Duration) -> Self {
        self.takes = Some(takes);
        self
    }

    /// Allow full table scans on exactly these tables (an empty set forbids all).
    pub fn full_table_scans<I, T>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TableRef>,
    {
        self.full_table_scans = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    /// Allow a full table scan on model `M`.
    pub fn allow_full_table_scan<M: Model>(mut self) -> Self {
        self.full_table_scans
            .get_or_insert_with(BTreeSet::new)
            .insert(TableRef::of::<M>());
        self
    }

    /// Never validate this handler.
    pub fn skip(mut self) -> Self {
        self.skip = true;
        self
    }

    /// The promise applied to handlers that declared none.
    pub fn speedy(max_queries: i64, max_duration: Option<Duration>) -> Self {
        let promise = Self::new().makes(max_queries);
        match max_duration {
            Some(takes) => promise.takes(takes),
            None => promise,
        }
    }

    /// Whether the promise declares anything to check.
    pub fn is_empty(&self) -> bool {
        self.makes.is_none() && self.takes.is_none() && self.full_table_scans.is_none()
    }
}
