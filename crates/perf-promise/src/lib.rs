//! # perf-promise
//!
//! Per-request performance budgets for database-backed handlers.
//!
//! Each handler declares a [`Promise`]: how many statements it may issue,
//! how long it may take, and which tables it may read with a full scan.
//! Every statement of a request is recorded (selects are explained and
//! classified), and when the request ends the trace is checked against the
//! promise. Broken promises are reported, and optionally raised as errors.
//!
//! ## Features
//!
//! - **Lazy budgets**: `queries(1) + n::<Comment>()` is resolved against live
//!   row counts only when validation runs, and never outside the allowed
//!   environments
//! - **Backend-aware plan classification**: MySQL, SQLite and Postgres plans
//!   via [`perf_promise_explain`]
//! - **Readable failures**: repeated statements are grouped and an N+1
//!   guess such as `Article.N.queries + 2.queries` is attached
//! - **Request scoped**: one recorder per in-flight request, no global state
//!
//! ## Example
//!
//! ```ignore
//! use perf_promise::{ConsoleSink, Enforcer, Promise, PromiseConfig, PromiseRegistry, n, queries};
//! use std::time::Duration;
//!
//! let config = PromiseConfig::new().enable().validate_all().raise_on_broken(true);
//! let registry = PromiseRegistry::builder()
//!     .register("articles#show", Promise::new().makes(queries(1) + n::<Comment>()))
//!     .register("articles#index", Promise::new().takes(Duration::from_millis(200)))
//!     .build()?;
//! let enforcer = Enforcer::new(config, registry).with_sink(ConsoleSink::new());
//!
//! let page = enforcer
//!     .around("articles#show", &client, |recorder| async move {
//!         recorder.instrument(&client, SHOW_SQL, client.query(SHOW_SQL, &[&id])).await
//!     })
//!     .await?;
//! ```

pub mod config;
pub mod enforcer;
pub mod error;
pub mod expr;
pub mod promise;
pub mod recorder;
pub mod registry;
pub mod report;
pub mod summary;
pub mod trace;
pub mod validate;

pub use config::{PromiseConfig, current_environment};
pub use enforcer::{Enforcer, RequestScope};
pub use error::{BrokenPromise, EvaluationError, PromiseError, PromiseResult};
pub use expr::{BinaryOp, Evaluator, LazyExpr, n, queries, query};
pub use promise::{Model, Promise, TableRef};
pub use recorder::{QueryRecorder, RecordedQuery, StatementEvent};
pub use registry::{PromiseRegistry, PromiseRegistryBuilder, handler_id};
pub use report::{CompositeSink, ConsoleSink, MemorySink, ReportSink, TracingSink, render_lines};
pub use summary::{QueryGroup, build_backtrace, guess_order, summarize};
pub use trace::{Frame, TraceCleaner};
pub use validate::{CheckKind, ValidationResult, Validator, Verdict};

pub use perf_promise_explain;
pub use perf_promise_explain::{Backend, ExplainClient, ExplainError, PlanInfo, RowCounter};
