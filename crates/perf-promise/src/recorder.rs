//! Request-scoped statement recording.
//!
//! One [`QueryRecorder`] belongs to one in-flight request. Statements are
//! appended as the driver reports them and handed over in one piece by
//! [`QueryRecorder::flush`] when the request ends.

use crate::config::PromiseConfig;
use crate::trace::TraceCleaner;
use perf_promise_explain::{ExplainClient, PlanInfo, StatementKind};
use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A statement execution reported by the database driver.
#[derive(Debug, Clone)]
pub struct StatementEvent {
    /// SQL text as executed.
    pub sql: String,
    /// Execution time.
    pub duration: Duration,
    /// Driver tag for the statement (e.g. `SCHEMA` for introspection).
    pub name: Option<String>,
    /// Call-site frames, when the integration already has them.
    pub trace: Option<Vec<String>>,
}

impl StatementEvent {
    pub fn new(sql: impl Into<String>, duration: Duration) -> Self {
        Self {
            sql: sql.into(),
            duration,
            name: None,
            trace: None,
        }
    }

    /// Tag the statement.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach call-site frames (`path:line[ in symbol]`).
    pub fn with_trace<I, S>(mut self, frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trace = Some(frames.into_iter().map(Into::into).collect());
        self
    }
}

/// One captured statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedQuery {
    pub sql: String,
    pub duration: Duration,
    pub kind: StatementKind,
    pub plan: PlanInfo,
    /// Cleaned application frames, innermost first.
    pub trace: Vec<String>,
}

/// Buffer of the statements issued by one request.
#[derive(Debug)]
pub struct QueryRecorder {
    buffer: Mutex<Vec<RecordedQuery>>,
    enabled: bool,
    ignored_names: Vec<String>,
    cleaner: TraceCleaner,
    capture_backtrace: bool,
}

impl QueryRecorder {
    /// Create a recorder configured by `config`.
    ///
    /// The recorder is disabled (every `record` is a no-op) unless the config
    /// is active in the current environment.
    pub fn new(config: &PromiseConfig) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            enabled: config.is_active(),
            ignored_names: config.ignored_statement_names.clone(),
            cleaner: config.trace_cleaner(),
            capture_backtrace: config.capture_backtrace,
        }
    }

    /// A recorder that never records.
    pub fn disabled() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            enabled: false,
            ignored_names: Vec::new(),
            cleaner: TraceCleaner::new(".", Vec::new()),
            capture_backtrace: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of statements recorded since the last flush.
    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `event` is noise: introspection, or the enforcer's own probes.
    pub fn should_discard(&self, event: &StatementEvent) -> bool {
        if let Some(name) = &event.name {
            if self
                .ignored_names
                .iter()
                .any(|ignored| name.contains(ignored.as_str()))
            {
                return true;
            }
        }
        StatementKind::from_sql(&event.sql) == StatementKind::Explain
    }

    /// Record a statement.
    ///
    /// Selects are explained on `probe` and classified; a failing probe only
    /// costs the plan, never the statement.
    pub async fn record(&self, probe: &dyn ExplainClient, event: StatementEvent) {
        if !self.enabled || self.should_discard(&event) {
            return;
        }
        let trace = match event.trace {
            Some(frames) => self.cleaner.clean_raw(frames),
            None => self.capture_trace(),
        };
        self.record_with_trace(probe, event.sql, event.duration, trace)
            .await;
    }

    /// Run `statement`, time it, and record it as `sql`.
    ///
    /// ```ignore
    /// let rows = recorder
    ///     .instrument(&client, sql, client.query(sql, &[]))
    ///     .await?;
    /// ```
    pub async fn instrument<F, T>(&self, probe: &dyn ExplainClient, sql: &str, statement: F) -> T
    where
        F: Future<Output = T>,
    {
        if !self.enabled {
            return statement.await;
        }
        let trace = self.capture_trace();
        let start = Instant::now();
        let output = statement.await;
        let duration = start.elapsed();

        let event = StatementEvent::new(sql, duration);
        if !self.should_discard(&event) {
            self.record_with_trace(probe, event.sql, duration, trace)
                .await;
        }
        output
    }

    /// Take everything recorded so far, leaving the buffer empty.
    pub fn flush(&self) -> Vec<RecordedQuery> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *buffer)
    }

    fn capture_trace(&self) -> Vec<String> {
        if self.capture_backtrace {
            self.cleaner.capture()
        } else {
            Vec::new()
        }
    }

    async fn record_with_trace(
        &self,
        probe: &dyn ExplainClient,
        sql: String,
        duration: Duration,
        trace: Vec<String>,
    ) {
        let kind = StatementKind::from_sql(&sql);
        let plan = if kind.is_select() {
            match probe.plan(&sql).await {
                Ok(plan) => plan,
                Err(err) => {
                    tracing::warn!(
                        target: "perf_promise.recorder",
                        backend = %probe.backend(),
                        sql = %sql,
                        error = %err,
                        "plan probe failed, recording statement without a plan"
                    );
                    PlanInfo::none()
                }
            }
        } else {
            PlanInfo::none()
        };

        let query = RecordedQuery {
            sql,
            duration,
            kind,
            plan,
            trace,
        };
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(query);
    }
}
