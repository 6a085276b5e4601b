use super::{CheckKind, ValidationResult};
use crate::expr::{Evaluator, LazyExpr};
use crate::promise::TableRef;
use crate::recorder::RecordedQuery;
use crate::summary::{build_backtrace, guess_order};
use crate::trace::TraceCleaner;
use std::collections::BTreeSet;
use std::time::Duration;

fn describe_budget(makes: &LazyExpr, limit: i64) -> String {
    if makes.is_dynamic() {
        format!("{limit} ({makes})")
    } else {
        limit.to_string()
    }
}

pub(super) async fn makes(
    makes: &LazyExpr,
    trace: &[RecordedQuery],
    evaluator: &Evaluator<'_>,
    cleaner: &TraceCleaner,
) -> ValidationResult {
    let limit = match makes.evaluate(evaluator).await {
        Ok(limit) => limit,
        Err(err) => {
            return ValidationResult::fail(
                CheckKind::Makes,
                format!("could not evaluate promised {makes}: {err}"),
                Vec::new(),
            );
        }
    };

    let made = trace.len();
    let budget = describe_budget(makes, limit);
    let within = i64::try_from(made).is_ok_and(|made| made <= limit);
    if within {
        ValidationResult::pass(CheckKind::Makes, format!("promised {budget}, made {made}"))
    } else {
        ValidationResult::fail(
            CheckKind::Makes,
            format!(
                "promised {budget}, made {made} (possibly {})",
                guess_order(trace)
            ),
            build_backtrace(trace, cleaner),
        )
    }
}

pub(super) fn takes(takes: Duration, elapsed: Duration) -> ValidationResult {
    let message = format!("promised {takes:?}, took {elapsed:?}");
    if elapsed <= takes {
        ValidationResult::pass(CheckKind::Takes, message)
    } else {
        ValidationResult::fail(CheckKind::Takes, message, Vec::new())
    }
}

fn list<'a>(tables: impl IntoIterator<Item = &'a str>) -> String {
    format!("[{}]", tables.into_iter().collect::<Vec<_>>().join(", "))
}

pub(super) fn full_table_scans(
    allowed: &BTreeSet<TableRef>,
    trace: &[RecordedQuery],
    cleaner: &TraceCleaner,
) -> ValidationResult {
    let made: BTreeSet<&str> = trace
        .iter()
        .filter_map(|query| query.plan.scanned_table())
        .collect();
    let unexpected: BTreeSet<&str> = made
        .iter()
        .copied()
        .filter(|table| !allowed.contains(&TableRef::new(*table)))
        .collect();

    let promised = list(allowed.iter().map(TableRef::as_str));
    if unexpected.is_empty() {
        return ValidationResult::pass(
            CheckKind::FullTableScans,
            format!("promised table scans on {promised}, made {}", list(made)),
        );
    }

    let offending = trace.iter().filter(|query| {
        query
            .plan
            .scanned_table()
            .is_some_and(|table| unexpected.contains(table))
    });
    ValidationResult::fail(
        CheckKind::FullTableScans,
        format!(
            "promised table scans on {promised}, made {} (unexpected {})",
            list(made.iter().copied()),
            list(unexpected.iter().copied())
        ),
        build_backtrace(offending, cleaner),
    )
}
