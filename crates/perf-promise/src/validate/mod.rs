//! Promise validation.
//!
//! A [`Validator`] runs the configured checks against one request's recorded
//! statements and produces a [`Verdict`].

mod checks;


use crate::config::PromiseConfig;
use crate::error::BrokenPromise;
use crate::expr::Evaluator;
use crate::promise::Promise;
use crate::recorder::RecordedQuery;
use crate::trace::TraceCleaner;
use perf_promise_explain::RowCounter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A validation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Statement count against `makes`.
    Makes,
    /// Elapsed time against `takes`.
    Takes,
    /// Full table scans against `full_table_scans`.
    FullTableScans,
}

impl CheckKind {
    /// Every check, in execution order.
    pub const ALL: [CheckKind; 3] = [
        CheckKind::Makes,
        CheckKind::Takes,
        CheckKind::FullTableScans,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CheckKind::Makes => "makes",
            CheckKind::Takes => "takes",
            CheckKind::FullTableScans => "full_table_scans",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub check: CheckKind,
    pub passed: bool,
    pub message: String,
    /// Rendered statement groups, empty on success.
    pub backtrace: Vec<String>,
}

impl ValidationResult {
    pub fn pass(check: CheckKind, message: impl Into<String>) -> Self {
        Self {
            check,
            passed: true,
            message: message.into(),
            backtrace: Vec::new(),
        }
    }

    pub fn fail(check: CheckKind, message: impl Into<String>, backtrace: Vec<String>) -> Self {
        Self {
            check,
            passed: false,
            message: message.into(),
            backtrace,
        }
    }
}

/// Outcome of validating one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub handler_id: String,
    /// True when every executed check passed.
    pub passed: bool,
    /// The promise was marked `skip`; no check ran.
    pub skipped: bool,
    /// One entry per executed check, in execution order.
    pub results: Vec<ValidationResult>,
    pub query_count: usize,
    pub elapsed: Duration,
}

impl Verdict {
    /// Failed checks, in execution order.
    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|result| !result.passed)
    }

    /// The result of `check`, if it ran.
    pub fn result(&self, check: CheckKind) -> Option<&ValidationResult> {
        self.results.iter().find(|result| result.check == check)
    }

    /// Every failure folded into one error: messages joined by `; `,
    /// backtraces concatenated. `None` when the verdict passed.
    pub fn broken_promise(&self) -> Option<BrokenPromise> {
        let failures: Vec<_> = self.failures().collect();
        if failures.is_empty() {
            return None;
        }
        let message = failures
            .iter()
            .map(|failure| failure.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let backtrace = failures
            .iter()
            .flat_map(|failure| failure.backtrace.iter().cloned())
            .collect();
        Some(BrokenPromise {
            handler_id: self.handler_id.clone(),
            message,
            backtrace,
        })
    }
}

/// Runs the configured checks.
#[derive(Debug, Clone)]
pub struct Validator {
    checks: Vec<CheckKind>,
    cleaner: TraceCleaner,
    evaluation_enabled: bool,
}

impl Validator {
    /// Checks are deduplicated and always run in [`CheckKind::ALL`] order.
    pub fn new(
        checks: impl IntoIterator<Item = CheckKind>,
        cleaner: TraceCleaner,
        evaluation_enabled: bool,
    ) -> Self {
        let mut checks: Vec<_> = checks.into_iter().collect();
        checks.sort();
        checks.dedup();
        Self {
            checks,
            cleaner,
            evaluation_enabled,
        }
    }

    pub fn from_config(config: &PromiseConfig) -> Self {
        Self::new(
            config.validations.iter().copied(),
            config.trace_cleaner(),
            config.evaluation_enabled(),
        )
    }

    pub fn checks(&self) -> &[CheckKind] {
        &self.checks
    }

    /// Validate one request.
    ///
    /// Checks whose key is absent from `promise` are not run. A `skip`
    /// promise passes without running anything.
    pub async fn validate(
        &self,
        handler_id: &str,
        trace: &[RecordedQuery],
        elapsed: Duration,
        promise: &Promise,
        counter: &dyn RowCounter,
    ) -> Verdict {
        let mut verdict = Verdict {
            handler_id: handler_id.to_string(),
            passed: true,
            skipped: promise.skip,
            results: Vec::new(),
            query_count: trace.len(),
            elapsed,
        };
        if promise.skip {
            return verdict;
        }

        let evaluator = Evaluator::new(counter, self.evaluation_enabled);
        for &check in &self.checks {
            let result = match check {
                CheckKind::Makes => match &promise.makes {
                    Some(makes) => {
                        Some(checks::makes(makes, trace, &evaluator, &self.cleaner).await)
                    }
                    None => None,
                },
                CheckKind::Takes => promise.takes.map(|takes| checks::takes(takes, elapsed)),
                CheckKind::FullTableScans => promise
                    .full_table_scans
                    .as_ref()
                    .map(|allowed| checks::full_table_scans(allowed, trace, &self.cleaner)),
            };
            if let Some(result) = result {
                tracing::debug!(
                    target: "perf_promise.enforcer",
                    handler_id,
                    check = %result.check,
                    passed = result.passed,
                    "{}",
                    result.message
                );
                verdict.passed &= result.passed;
                verdict.results.push(result);
            }
        }
        verdict
    }
}
