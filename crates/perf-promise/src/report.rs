//! Where verdicts go.
//!
//! [`render_lines`] turns a verdict into text; sinks decide how to emit it.

use crate::validate::Verdict;
use colored::Colorize;
use std::sync::{Arc, Mutex, PoisonError};

const RULE_WIDTH: usize = 80;

/// Role of a rendered line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Rule,
    Failure,
    Detail,
    Pass,
}

/// One line of a rendered report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLine {
    pub tone: Tone,
    pub text: String,
}

impl ReportLine {
    fn new(tone: Tone, text: impl Into<String>) -> Self {
        Self {
            tone,
            text: text.into(),
        }
    }
}

/// Render a verdict.
///
/// Failures print one headline per broken check followed by its backtrace;
/// a pass prints a single summary line. Both are framed by dashed rules.
pub fn render_lines(verdict: &Verdict) -> Vec<ReportLine> {
    let rule = || ReportLine::new(Tone::Rule, "-".repeat(RULE_WIDTH));
    let mut lines = vec![rule()];
    if verdict.passed {
        let details: Vec<_> = verdict.results.iter().map(|r| r.message.as_str()).collect();
        let text = if details.is_empty() {
            format!("Passed promise on {}", verdict.handler_id)
        } else {
            format!("Passed promise on {}: {}", verdict.handler_id, details.join("; "))
        };
        lines.push(ReportLine::new(Tone::Pass, text));
    } else {
        for failure in verdict.failures() {
            lines.push(ReportLine::new(
                Tone::Failure,
                format!(
                    "Broken promise on {} [{}]: {}",
                    verdict.handler_id, failure.check, failure.message
                ),
            ));
            lines.extend(
                failure
                    .backtrace
                    .iter()
                    .map(|line| ReportLine::new(Tone::Detail, line.as_str())),
            );
        }
    }
    lines.push(rule());
    lines
}

/// Receives every non-skipped verdict.
pub trait ReportSink: Send + Sync {
    fn report(&self, verdict: &Verdict);
}

/// Emits each rendered line as a `tracing` event on `perf_promise.report`.
///
/// Failure and backtrace lines are warnings, pass lines are info.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    /// Level a rendered line is emitted at. Rules are layout only.
    pub fn level(tone: Tone) -> Option<tracing::Level> {
        match tone {
            Tone::Rule => None,
            Tone::Failure | Tone::Detail => Some(tracing::Level::WARN),
            Tone::Pass => Some(tracing::Level::INFO),
        }
    }
}

impl ReportSink for TracingSink {
    fn report(&self, verdict: &Verdict) {
        for line in render_lines(verdict) {
            match Self::level(line.tone) {
                Some(tracing::Level::WARN) => tracing::warn!(
                    target: "perf_promise.report",
                    handler_id = %verdict.handler_id,
                    "{}",
                    line.text
                ),
                Some(_) => tracing::info!(
                    target: "perf_promise.report",
                    handler_id = %verdict.handler_id,
                    queries = verdict.query_count,
                    "{}",
                    line.text
                ),
                None => {}
            }
        }
    }
}

/// Prints colored reports to stderr.
#[derive(Debug, Clone, Default)]
pub struct ConsoleSink {
    quiet_on_pass: bool,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only print failures.
    pub fn quiet_on_pass(mut self) -> Self {
        self.quiet_on_pass = true;
        self
    }
}

impl ReportSink for ConsoleSink {
    fn report(&self, verdict: &Verdict) {
        if verdict.passed && self.quiet_on_pass {
            return;
        }
        for line in render_lines(verdict) {
            let styled = match line.tone {
                Tone::Rule => line.text.normal(),
                Tone::Failure => line.text.red().bold(),
                Tone::Detail => line.text.cyan(),
                Tone::Pass => line.text.green(),
            };
            eprintln!("{styled}");
        }
    }
}

/// Keeps rendered reports in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
    verdicts: Mutex<Vec<Verdict>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line reported so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Every verdict reported so far.
    pub fn verdicts(&self) -> Vec<Verdict> {
        self.verdicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.verdicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl ReportSink for MemorySink {
    fn report(&self, verdict: &Verdict) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(render_lines(verdict).into_iter().map(|line| line.text));
        self.verdicts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(verdict.clone());
    }
}

impl<S: ReportSink + ?Sized> ReportSink for Arc<S> {
    fn report(&self, verdict: &Verdict) {
        (**self).report(verdict);
    }
}

/// Forwards every verdict to several sinks.
#[derive(Default)]
pub struct CompositeSink {
    sinks: Vec<Box<dyn ReportSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn add<S: ReportSink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl ReportSink for CompositeSink {
    fn report(&self, verdict: &Verdict) {
        for sink in &self.sinks {
            sink.report(verdict);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::{CheckKind, ValidationResult};
    use std::time::Duration;

    fn verdict(results: Vec<ValidationResult>) -> Verdict {
        Verdict {
            handler_id: "articles#index".to_string(),
            passed: results.iter().all(|r| r.passed),
            skipped: false,
            results,
            query_count: 2,
            elapsed: Duration::from_millis(3),
        }
    }

    #[test]
    fn renders_failure_with_backtrace() {
        let verdict = verdict(vec![ValidationResult::fail(
            CheckKind::Makes,
            "promised 1, made 2 (possibly 2.queries)",
            vec!["1 x SELECT a".to_string(), "1 x SELECT b".to_string()],
        )]);
        let lines = render_lines(&verdict);
        let text: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        let rule = "-".repeat(80);
        assert_eq!(
            text,
            vec![
                rule.as_str(),
                "Broken promise on articles#index [makes]: promised 1, made 2 (possibly 2.queries)",
                "1 x SELECT a",
                "1 x SELECT b",
                rule.as_str(),
            ]
        );
        assert_eq!(lines[1].tone, Tone::Failure);
        assert_eq!(lines[2].tone, Tone::Detail);
    }

    #[test]
    fn renders_pass_summary() {
        let verdict = verdict(vec![ValidationResult::pass(CheckKind::Makes, "promised 2, made 2")]);
        let lines = render_lines(&verdict);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1].tone, Tone::Pass);
        assert_eq!(lines[1].text, "Passed promise on articles#index: promised 2, made 2");
    }

    #[test]
    fn tracing_levels_follow_line_tone() {
        let verdict = verdict(vec![ValidationResult::fail(
            CheckKind::Makes,
            "promised 1, made 2",
            vec!["2 x SELECT a".to_string()],
        )]);
        let levels: Vec<_> = render_lines(&verdict)
            .iter()
            .filter_map(|line| TracingSink::level(line.tone))
            .collect();
        assert_eq!(levels, vec![tracing::Level::WARN, tracing::Level::WARN]);

        assert_eq!(TracingSink::level(Tone::Pass), Some(tracing::Level::INFO));
        assert_eq!(TracingSink::level(Tone::Rule), None);
        TracingSink.report(&verdict);
    }

    #[test]
    fn composite_forwards_to_every_sink() {
        let first = Arc::new(MemorySink::new());
        let second = Arc::new(MemorySink::new());
        let composite = CompositeSink::new().add(first.clone()).add(second.clone());

        composite.report(&verdict(Vec::new()));
        assert_eq!(first.verdicts().len(), 1);
        assert_eq!(second.lines(), first.lines());

        first.clear();
        assert!(first.lines().is_empty());
        assert!(first.verdicts().is_empty());
    }
}
