//! Counting expressions: parse arbitrary message text into a definite integer.
//!
//! Evaluation runs in `f64` so that `(6/4)*2` keeps its fractional
//! intermediate and truncates toward zero exactly once, at the root.

pub mod ast;
pub mod parser;

pub use ast::{BinOp, Expr};
pub use parser::parse;

/// Why a piece of text has no numeric value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("malformed expression at offset {at}: {reason}")]
    Malformed { at: usize, reason: String },

    #[error("division by zero")]
    DivisionByZero,

    /// Factorial of an operand that truncates to zero or below.
    #[error("factorial undefined for its operand")]
    FactorialUndefined,

    #[error("result is not a finite 64-bit integer")]
    OutOfRange,
}

impl EvalError {
    /// Short label for logs and audit records.
    pub fn label(&self) -> &'static str {
        match self {
            EvalError::Malformed { .. } => "malformed",
            EvalError::DivisionByZero => "division_by_zero",
            EvalError::FactorialUndefined => "factorial_undefined",
            EvalError::OutOfRange => "out_of_range",
        }
    }
}

/// Evaluate `text` to an integer, truncating toward zero at the root only.
pub fn evaluate(text: &str) -> Result<i64, EvalError> {
    let expr = parse(text.trim())?;
    truncate_root(expr.eval()?)
}

// 2^63 is exactly representable; anything at or above it overflows i64.
const I64_UPPER_BOUND: f64 = 9_223_372_036_854_775_808.0;

fn truncate_root(value: f64) -> Result<i64, EvalError> {
    if !value.is_finite() {
        return Err(EvalError::OutOfRange);
    }
    let truncated = value.trunc();
    if truncated >= I64_UPPER_BOUND || truncated < -I64_UPPER_BOUND {
        return Err(EvalError::OutOfRange);
    }
    Ok(truncated as i64)
}
