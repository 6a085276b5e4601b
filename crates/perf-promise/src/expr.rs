//! Lazily evaluated budget expressions.
//!
//! A promise such as "one query, plus one per comment" cannot be a constant:
//! the comment count is only known while the request runs. [`LazyExpr`] keeps
//! the arithmetic as a tree and resolves row counts at validation time.
//!
//! # Example
//!
//! ```ignore
//! use perf_promise::{n, queries};
//!
//! let budget = queries(1) + n::<Comment>();
//! assert_eq!(budget.to_string(), "1 + N(comments)");
//!
//! let limit = budget.evaluate(&Evaluator::new(&client, true)).await?;
//! ```

use crate::error::EvaluationError;
use crate::promise::{Model, TableRef};
use futures_core::future::BoxFuture;
use perf_promise_explain::RowCounter;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

/// Arithmetic operator of a [`LazyExpr::Binary`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinaryOp::Add | BinaryOp::Sub => 1,
            BinaryOp::Mul | BinaryOp::Div => 2,
        }
    }
}

/// A deferred integer value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LazyExpr {
    /// A literal.
    Constant(i64),
    /// The live row count of a table.
    CountOf(TableRef),
    /// `lhs op rhs`.
    Binary {
        op: BinaryOp,
        lhs: Box<LazyExpr>,
        rhs: Box<LazyExpr>,
    },
}

/// Evaluation context: where row counts come from, and whether to count at all.
pub struct Evaluator<'a> {
    counter: &'a dyn RowCounter,
    enabled: bool,
}

impl<'a> Evaluator<'a> {
    /// `enabled` is false outside the allowed environments; every expression
    /// then evaluates to zero without touching the database.
    pub fn new(counter: &'a dyn RowCounter, enabled: bool) -> Self {
        Self { counter, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl LazyExpr {
    pub fn constant(value: i64) -> Self {
        LazyExpr::Constant(value)
    }

    pub fn count_of(table: impl Into<TableRef>) -> Self {
        LazyExpr::CountOf(table.into())
    }

    pub fn count_of_model<M: Model>() -> Self {
        LazyExpr::CountOf(TableRef::of::<M>())
    }

    fn binary(op: BinaryOp, lhs: LazyExpr, rhs: LazyExpr) -> Self {
        LazyExpr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Whether evaluating this expression issues any count query.
    pub fn is_dynamic(&self) -> bool {
        match self {
            LazyExpr::Constant(_) => false,
            LazyExpr::CountOf(_) => true,
            LazyExpr::Binary { lhs, rhs, .. } => lhs.is_dynamic() || rhs.is_dynamic(),
        }
    }

    /// Resolve the expression.
    ///
    /// Each `CountOf` node issues exactly one count query. Division truncates
    /// toward zero; a zero divisor or an out-of-range result is an error.
    pub async fn evaluate(&self, evaluator: &Evaluator<'_>) -> Result<i64, EvaluationError> {
        if !evaluator.enabled {
            return Ok(0);
        }
        self.resolve(evaluator).await
    }

    fn resolve<'a>(
        &'a self,
        evaluator: &'a Evaluator<'a>,
    ) -> BoxFuture<'a, Result<i64, EvaluationError>> {
        Box::pin(async move {
            match self {
                LazyExpr::Constant(value) => Ok(*value),
                LazyExpr::CountOf(table) => evaluator
                    .counter
                    .count(table.as_str())
                    .await
                    .map_err(|source| EvaluationError::Count {
                        table: table.to_string(),
                        source,
                    }),
                LazyExpr::Binary { op, lhs, rhs } => {
                    let left = lhs.resolve(evaluator).await?;
                    let right = rhs.resolve(evaluator).await?;
                    let value = match op {
                        BinaryOp::Add => left.checked_add(right),
                        BinaryOp::Sub => left.checked_sub(right),
                        BinaryOp::Mul => left.checked_mul(right),
                        BinaryOp::Div => {
                            if right == 0 {
                                return Err(EvaluationError::DivisionByZero(self.to_string()));
                            }
                            left.checked_div(right)
                        }
                    };
                    value.ok_or_else(|| EvaluationError::Overflow(self.to_string()))
                }
            }
        })
    }

    fn fmt_operand(
        &self,
        f: &mut fmt::Formatter<'_>,
        parent: BinaryOp,
        right: bool,
    ) -> fmt::Result {
        let needs_parens = match self {
            LazyExpr::Binary { op, .. } => {
                op.precedence() < parent.precedence()
                    || (right && op.precedence() == parent.precedence())
            }
            _ => false,
        };
        if needs_parens {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

impl fmt::Display for LazyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LazyExpr::Constant(value) => write!(f, "{value}"),
            LazyExpr::CountOf(table) => write!(f, "N({table})"),
            LazyExpr::Binary { op, lhs, rhs } => {
                lhs.fmt_operand(f, *op, false)?;
                write!(f, " {} ", op.symbol())?;
                rhs.fmt_operand(f, *op, true)
            }
        }
    }
}

/// `n` statements, as a budget term.
pub fn queries(n: i64) -> LazyExpr {
    LazyExpr::Constant(n)
}

/// Alias of [`queries`] that reads better for `1`.
pub fn query(n: i64) -> LazyExpr {
    queries(n)
}

/// One statement per row of model `M`'s table.
pub fn n<M: Model>() -> LazyExpr {
    LazyExpr::count_of_model::<M>()
}

impl From<i64> for LazyExpr {
    fn from(value: i64) -> Self {
        LazyExpr::Constant(value)
    }
}

impl From<i32> for LazyExpr {
    fn from(value: i32) -> Self {
        LazyExpr::Constant(i64::from(value))
    }
}

impl From<u32> for LazyExpr {
    fn from(value: u32) -> Self {
        LazyExpr::Constant(i64::from(value))
    }
}

impl From<&LazyExpr> for LazyExpr {
    fn from(value: &LazyExpr) -> Self {
        value.clone()
    }
}

macro_rules! impl_binary_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<LazyExpr>> $trait<R> for LazyExpr {
            type Output = LazyExpr;

            fn $method(self, rhs: R) -> LazyExpr {
                LazyExpr::binary($op, self, rhs.into())
            }
        }

        impl<R: Into<LazyExpr>> $trait<R> for &LazyExpr {
            type Output = LazyExpr;

            fn $method(self, rhs: R) -> LazyExpr {
                LazyExpr::binary($op, self.clone(), rhs.into())
            }
        }

        impl $trait<LazyExpr> for i64 {
            type Output = LazyExpr;

            fn $method(self, rhs: LazyExpr) -> LazyExpr {
                LazyExpr::binary($op, LazyExpr::Constant(self), rhs)
            }
        }

        impl $trait<LazyExpr> for i32 {
            type Output = LazyExpr;

            fn $method(self, rhs: LazyExpr) -> LazyExpr {
                LazyExpr::binary($op, LazyExpr::from(self), rhs)
            }
        }
    };
}

impl_binary_op!(Add, add, BinaryOp::Add);
impl_binary_op!(Sub, sub, BinaryOp::Sub);
impl_binary_op!(Mul, mul, BinaryOp::Mul);
impl_binary_op!(Div, div, BinaryOp::Div);
