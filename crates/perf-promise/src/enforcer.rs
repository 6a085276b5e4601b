//! Request lifecycle.
//!
//! ```ignore
//! let enforcer = Enforcer::new(config, registry).with_sink(ConsoleSink::new());
//!
//! let scope = enforcer.start_request();
//! scope.on_statement_executed(&client, StatementEvent::new(sql, took)).await;
//! let verdict = enforcer.finish(scope, "articles#index", &client).await?;
//! ```

use crate::config::PromiseConfig;
use crate::error::PromiseResult;
use crate::promise::Promise;
use crate::recorder::{QueryRecorder, StatementEvent};
use crate::registry::PromiseRegistry;
use crate::report::{ReportSink, TracingSink};
use crate::validate::{Validator, Verdict};
use perf_promise_explain::{ExplainClient, RowCounter};
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// State of one in-flight request.
#[derive(Debug)]
pub struct RequestScope {
    recorder: Arc<QueryRecorder>,
    started: Instant,
}

impl RequestScope {
    /// The request's recorder; clone the `Arc` to hand it to the data layer.
    pub fn recorder(&self) -> &Arc<QueryRecorder> {
        &self.recorder
    }

    /// Time since the request started.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Feed one executed statement to the recorder.
    pub async fn on_statement_executed(&self, probe: &dyn ExplainClient, event: StatementEvent) {
        self.recorder.record(probe, event).await;
    }
}

/// Validates every request against its handler's promise.
pub struct Enforcer {
    config: PromiseConfig,
    registry: Arc<PromiseRegistry>,
    validator: Validator,
    sink: Arc<dyn ReportSink>,
}

impl Enforcer {
    /// Create an enforcer reporting through [`TracingSink`].
    pub fn new(config: PromiseConfig, registry: impl Into<Arc<PromiseRegistry>>) -> Self {
        let validator = Validator::from_config(&config);
        Self {
            config,
            registry: registry.into(),
            validator,
            sink: Arc::new(TracingSink),
        }
    }

    /// Replace the report sink.
    pub fn with_sink<S: ReportSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn config(&self) -> &PromiseConfig {
        &self.config
    }

    pub fn registry(&self) -> &PromiseRegistry {
        &self.registry
    }

    /// Whether requests are recorded and validated at all.
    pub fn is_active(&self) -> bool {
        self.config.is_active()
    }

    /// Begin a request with a fresh recorder.
    pub fn start_request(&self) -> RequestScope {
        RequestScope {
            recorder: Arc::new(QueryRecorder::new(&self.config)),
            started: Instant::now(),
        }
    }

    /// Begin a request on a reused recorder, discarding anything left in it.
    pub fn start_request_with(&self, recorder: Arc<QueryRecorder>) -> RequestScope {
        let leftover = recorder.flush();
        if !leftover.is_empty() {
            tracing::debug!(
                target: "perf_promise.enforcer",
                discarded = leftover.len(),
                "discarded statements left over from a previous request"
            );
        }
        RequestScope {
            recorder,
            started: Instant::now(),
        }
    }

    /// The promise `handler_id` is held to.
    ///
    /// Falls back to the speedy promise when the handler registered none and
    /// untagged handlers are treated as speedy.
    pub fn promise_for(&self, handler_id: &str) -> Option<Cow<'_, Promise>> {
        if let Some(promise) = self.registry.get(handler_id) {
            return Some(Cow::Borrowed(promise));
        }
        if self.config.untagged_handlers_are_speedy {
            tracing::info!(
                target: "perf_promise.enforcer",
                handler_id,
                "No promises made. Assuming Speedy"
            );
            return Some(Cow::Owned(self.config.speedy_promise()));
        }
        None
    }

    /// End a request: flush, validate, report.
    ///
    /// Returns `Ok(None)` when the enforcer is inactive or the handler has no
    /// promise. With `raise_on_broken`, a failing verdict becomes
    /// [`PromiseError::BrokenPromise`](crate::PromiseError::BrokenPromise)
    /// after it has been reported.
    pub async fn finish(
        &self,
        scope: RequestScope,
        handler_id: &str,
        counter: &dyn RowCounter,
    ) -> PromiseResult<Option<Verdict>> {
        let elapsed = scope.elapsed();
        let trace = scope.recorder.flush();
        if !self.is_active() {
            return Ok(None);
        }
        let Some(promise) = self.promise_for(handler_id) else {
            tracing::debug!(
                target: "perf_promise.enforcer",
                handler_id,
                queries = trace.len(),
                "no promise registered"
            );
            return Ok(None);
        };

        let verdict = self
            .validator
            .validate(handler_id, &trace, elapsed, &promise, counter)
            .await;
        if verdict.skipped {
            return Ok(Some(verdict));
        }

        self.sink.report(&verdict);
        if self.config.raise_on_broken {
            if let Some(broken) = verdict.broken_promise() {
                return Err(broken.into());
            }
        }
        Ok(Some(verdict))
    }

    /// Run `handler` as one request of `handler_id`.
    ///
    /// The handler receives the request's recorder. Its output is returned
    /// unless the promise is broken and `raise_on_broken` is set.
    pub async fn around<F, Fut, T>(
        &self,
        handler_id: &str,
        counter: &dyn RowCounter,
        handler: F,
    ) -> PromiseResult<T>
    where
        F: FnOnce(Arc<QueryRecorder>) -> Fut,
        Fut: Future<Output = T>,
    {
        let scope = self.start_request();
        let output = handler(scope.recorder.clone()).await;
        self.finish(scope, handler_id, counter).await?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PromiseError;
    use crate::report::MemorySink;
    use crate::validate::CheckKind;
    use perf_promise_explain::{Backend, ExplainResult};
    use serde_json::{Value, json};

    struct FakeDb;

    #[async_trait::async_trait]
    impl ExplainClient for FakeDb {
        fn backend(&self) -> Backend {
            Backend::MySql
        }

        async fn explain(&self, sql: &str) -> ExplainResult<Value> {
            let access = if sql.contains("WHERE") { "ref" } else { "ALL" };
            Ok(json!([{"table": "articles", "type": access}]))
        }
    }

    #[async_trait::async_trait]
    impl RowCounter for FakeDb {
        async fn count(&self, _table: &str) -> ExplainResult<i64> {
            Ok(0)
        }
    }

    fn config() -> PromiseConfig {
        PromiseConfig::new()
            .enable()
            .environment("test")
            .capture_backtrace(false)
    }

    fn registry() -> PromiseRegistry {
        PromiseRegistry::builder()
            .register("articles#index", Promise::new().makes(1))
            .register("articles#show", Promise::new().makes(0).skip())
            .build()
            .unwrap()
    }

    async fn select(scope: &RequestScope, sql: &str) {
        scope
            .on_statement_executed(&FakeDb, StatementEvent::new(sql, Duration::from_millis(1)))
            .await;
    }

    #[tokio::test]
    async fn kept_promise_is_reported_as_pass() {
        let sink = Arc::new(MemorySink::new());
        let enforcer = Enforcer::new(config(), registry()).with_sink(sink.clone());

        let scope = enforcer.start_request();
        select(&scope, "SELECT * FROM articles").await;
        let verdict = enforcer
            .finish(scope, "articles#index", &FakeDb)
            .await
            .unwrap()
            .unwrap();

        assert!(verdict.passed);
        assert_eq!(sink.verdicts().len(), 1);
        assert!(sink.lines()[1].starts_with("Passed promise on articles#index"));
    }

    #[tokio::test]
    async fn broken_promise_is_logged_only_by_default() {
        let sink = Arc::new(MemorySink::new());
        let enforcer = Enforcer::new(config(), registry()).with_sink(sink.clone());

        let scope = enforcer.start_request();
        select(&scope, "SELECT * FROM articles").await;
        select(&scope, "SELECT * FROM articles WHERE id = ?").await;
        let verdict = enforcer
            .finish(scope, "articles#index", &FakeDb)
            .await
            .unwrap()
            .unwrap();

        assert!(!verdict.passed);
        assert!(sink.lines()[1].starts_with("Broken promise on articles#index [makes]"));
    }

    #[tokio::test]
    async fn broken_promise_raises_when_configured() {
        let sink = Arc::new(MemorySink::new());
        let enforcer =
            Enforcer::new(config().raise_on_broken(true), registry()).with_sink(sink.clone());

        let scope = enforcer.start_request();
        select(&scope, "SELECT * FROM articles").await;
        select(&scope, "SELECT * FROM articles WHERE id = ?").await;
        let err = enforcer
            .finish(scope, "articles#index", &FakeDb)
            .await
            .unwrap_err();

        let broken = err.as_broken_promise().unwrap();
        assert_eq!(broken.handler_id, "articles#index");
        assert!(broken.message.contains("made 2"));
        // reported before raising
        assert_eq!(sink.verdicts().len(), 1);
    }

    #[tokio::test]
    async fn skipped_promise_is_not_reported() {
        let sink = Arc::new(MemorySink::new());
        let enforcer =
            Enforcer::new(config().raise_on_broken(true), registry()).with_sink(sink.clone());

        let scope = enforcer.start_request();
        select(&scope, "SELECT * FROM articles").await;
        let verdict = enforcer
            .finish(scope, "articles#show", &FakeDb)
            .await
            .unwrap()
            .unwrap();
        assert!(verdict.passed);
        assert!(verdict.skipped);
        assert!(sink.verdicts().is_empty());
    }

    #[tokio::test]
    async fn untagged_handlers_use_speedy_promise_when_configured() {
        let scope_queries = ["SELECT * FROM articles", "SELECT * FROM articles WHERE id = ?"];

        let enforcer = Enforcer::new(config(), registry()).with_sink(MemorySink::new());
        let scope = enforcer.start_request();
        for sql in scope_queries {
            select(&scope, sql).await;
        }
        assert!(enforcer.finish(scope, "home#index", &FakeDb).await.unwrap().is_none());

        let enforcer = Enforcer::new(config().untagged_handlers_are_speedy(true), registry())
            .with_sink(MemorySink::new());
        let scope = enforcer.start_request();
        for sql in scope_queries {
            select(&scope, sql).await;
        }
        let verdict = enforcer
            .finish(scope, "home#index", &FakeDb)
            .await
            .unwrap()
            .unwrap();
        assert!(!verdict.passed);
        assert_eq!(
            verdict.result(CheckKind::Makes).unwrap().message,
            "promised 1, made 2 (possibly 2.queries)"
        );
    }

    #[tokio::test]
    async fn inactive_enforcer_does_nothing() {
        let sink = Arc::new(MemorySink::new());
        let enforcer = Enforcer::new(config().environment("production"), registry())
            .with_sink(sink.clone());
        assert!(!enforcer.is_active());

        let scope = enforcer.start_request();
        select(&scope, "SELECT * FROM articles").await;
        select(&scope, "SELECT * FROM articles").await;
        assert!(scope.recorder().is_empty());
        assert!(enforcer.finish(scope, "articles#index", &FakeDb).await.unwrap().is_none());
        assert!(sink.verdicts().is_empty());
    }

    #[tokio::test]
    async fn reused_recorder_is_flushed_on_start() {
        let enforcer = Enforcer::new(config(), registry()).with_sink(MemorySink::new());
        let recorder = Arc::new(QueryRecorder::new(enforcer.config()));
        recorder
            .record(&FakeDb, StatementEvent::new("SELECT stale", Duration::ZERO))
            .await;

        let scope = enforcer.start_request_with(recorder);
        assert!(scope.recorder().is_empty());
    }

    #[tokio::test]
    async fn around_wraps_a_handler() {
        let enforcer = Enforcer::new(config().raise_on_broken(true), registry())
            .with_sink(MemorySink::new());

        let title = enforcer
            .around("articles#index", &FakeDb, |recorder| async move {
                recorder
                    .record(&FakeDb, StatementEvent::new("SELECT * FROM articles", Duration::ZERO))
                    .await;
                "Hello"
            })
            .await
            .unwrap();
        assert_eq!(title, "Hello");

        let err = enforcer
            .around("articles#index", &FakeDb, |recorder| async move {
                for sql in ["SELECT a", "SELECT b"] {
                    recorder
                        .record(&FakeDb, StatementEvent::new(sql, Duration::ZERO))
                        .await;
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PromiseError::BrokenPromise(_)));
    }
}
