//! Expression tree and its bottom-up evaluation.

use super::EvalError;

/// Largest factorial operand whose result is still finite in `f64`.
const MAX_FINITE_FACTORIAL: f64 = 170.0;

/// Binary operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinOp {
    /// Source symbol, used for display.
    pub fn symbol(self) -> char {
        match self {
            BinOp::Add => '+',
            BinOp::Sub => '-',
            BinOp::Mul => '*',
            BinOp::Div => '/',
            BinOp::Pow => '^',
        }
    }
}

/// Parsed counting expression.
///
/// Built once per `evaluate` call and dropped with it.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Plain base-10 integer.
    Literal(u64),
    /// Integer written in an explicit radix (`0x..`, `0b..`, or `digits_radix`).
    Based { value: u64, radix: u32 },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Postfix `!`.
    Factorial(Box<Expr>),
    /// Bracketed sub-expression.
    Group(Box<Expr>),
}

impl Expr {
    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Evaluate without truncation.
    ///
    /// Intermediate values stay fractional; only the caller at the root
    /// truncates. Factorial is the one node that truncates its own operand.
    pub fn eval(&self) -> Result<f64, EvalError> {
        match self {
            Expr::Literal(n) | Expr::Based { value: n, .. } => Ok(*n as f64),
            Expr::Group(inner) => inner.eval(),
            Expr::Binary { op, lhs, rhs } => {
                let a = lhs.eval()?;
                let b = rhs.eval()?;
                match op {
                    BinOp::Add => Ok(a + b),
                    BinOp::Sub => Ok(a - b),
                    BinOp::Mul => Ok(a * b),
                    BinOp::Div => {
                        if b == 0.0 {
                            Err(EvalError::DivisionByZero)
                        } else {
                            Ok(a / b)
                        }
                    }
                    BinOp::Pow => Ok(a.powf(b)),
                }
            }
            Expr::Factorial(operand) => factorial(operand.eval()?),
        }
    }
}

/// Factorial of `n` truncated toward zero.
///
/// A truncated operand of zero or below is undefined, so `0!` fails.
fn factorial(n: f64) -> Result<f64, EvalError> {
    let n = n.trunc();
    if n.is_nan() || n <= 0.0 {
        return Err(EvalError::FactorialUndefined);
    }
    if n > MAX_FINITE_FACTORIAL {
        return Ok(f64::INFINITY);
    }
    // n <= 170 here, so the cast is exact
    Ok((1..=n as u32).fold(1.0, |acc, i| acc * f64::from(i)))
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Literal(n) => write!(f, "{n}"),
            Expr::Based { value, radix: 16 } => write!(f, "0x{value:x}"),
            Expr::Based { value, radix: 2 } => write!(f, "0b{value:b}"),
            Expr::Based { value, radix } => write!(f, "{value}[base {radix}]"),
            Expr::Binary { op, lhs, rhs } => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Expr::Factorial(inner) => write!(f, "{inner}!"),
            Expr::Group(inner) => write!(f, "({inner})"),
        }
    }
}
