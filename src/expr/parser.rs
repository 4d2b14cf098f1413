//! Tokenizer and recursive-descent parser for counting expressions.
//!
//! Precedence, tightest first: postfix `!`, right-associative `^`,
//! left-associative `*` `/`, left-associative `+` `-`.

use super::EvalError;
use super::ast::{BinOp, Expr};

/// Inputs longer than this are rejected before tokenizing.
pub const MAX_INPUT_LEN: usize = 4096;

/// Maximum bracket / exponent nesting.
const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(Expr),
    Op(BinOp),
    Bang,
    LParen,
    RParen,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    at: usize,
}

fn malformed(at: usize, reason: impl Into<String>) -> EvalError {
    EvalError::Malformed {
        at,
        reason: reason.into(),
    }
}

/// Parse `input` into an expression tree.
pub fn parse(input: &str) -> Result<Expr, EvalError> {
    if input.len() > MAX_INPUT_LEN {
        return Err(malformed(MAX_INPUT_LEN, "input too long"));
    }
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(malformed(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        end: input.len(),
    };
    let expr = parser.expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some(t) => Err(malformed(t.at, "unexpected trailing input")),
    }
}

fn tokenize(input: &str) -> Result<Vec<Spanned>, EvalError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(at, c)) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '+' => Token::Op(BinOp::Add),
            '-' | '−' => Token::Op(BinOp::Sub),
            '*' | '×' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '*'))) {
                    chars.next();
                    tokens.push(Spanned {
                        token: Token::Op(BinOp::Pow),
                        at,
                    });
                } else {
                    tokens.push(Spanned {
                        token: Token::Op(BinOp::Mul),
                        at,
                    });
                }
                continue;
            }
            '/' | '÷' => Token::Op(BinOp::Div),
            '^' => Token::Op(BinOp::Pow),
            '!' => Token::Bang,
            '(' => Token::LParen,
            ')' => Token::RParen,
            c if c.is_ascii_alphanumeric() => {
                let mut word = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if !c.is_ascii_alphanumeric() {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                let radix = if matches!(chars.peek(), Some(&(_, '_'))) {
                    chars.next();
                    let mut digits = String::new();
                    while let Some(&(_, c)) = chars.peek() {
                        if !c.is_ascii_digit() {
                            break;
                        }
                        digits.push(c);
                        chars.next();
                    }
                    Some(parse_radix(&digits, at)?)
                } else {
                    None
                };
                tokens.push(Spanned {
                    token: Token::Number(number(&word, radix, at)?),
                    at,
                });
                continue;
            }
            other => return Err(malformed(at, format!("unexpected character '{other}'"))),
        };
        chars.next();
        tokens.push(Spanned { token, at });
    }

    Ok(tokens)
}

fn parse_radix(digits: &str, at: usize) -> Result<u32, EvalError> {
    match digits.parse::<u32>() {
        Ok(r) if (2..=36).contains(&r) => Ok(r),
        _ => Err(malformed(at, format!("invalid radix '{digits}'"))),
    }
}

/// Build a literal node from an alphanumeric run and an optional explicit radix.
fn number(word: &str, radix: Option<u32>, at: usize) -> Result<Expr, EvalError> {
    let parse = |digits: &str, radix: u32| {
        if digits.is_empty() {
            return Err(malformed(at, "missing digits"));
        }
        u64::from_str_radix(digits, radix)
            .map_err(|e| malformed(at, format!("invalid base-{radix} literal '{digits}': {e}")))
    };

    if let Some(radix) = radix {
        return Ok(Expr::Based {
            value: parse(word, radix)?,
            radix,
        });
    }

    let lower = word.to_ascii_lowercase();
    if let Some(hex) = lower.strip_prefix("0x") {
        Ok(Expr::Based {
            value: parse(hex, 16)?,
            radix: 16,
        })
    } else if let Some(bin) = lower.strip_prefix("0b") {
        Ok(Expr::Based {
            value: parse(bin, 2)?,
            radix: 2,
        })
    } else if word.bytes().all(|b| b.is_ascii_digit()) {
        Ok(Expr::Literal(parse(word, 10)?))
    } else {
        Err(malformed(at, format!("'{word}' is not a number")))
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<BinOp> {
        match self.peek() {
            Some(Spanned {
                token: Token::Op(op),
                ..
            }) => Some(*op),
            _ => None,
        }
    }

    fn here(&self) -> usize {
        self.peek().map_or(self.end, |t| t.at)
    }

    fn descend(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(malformed(self.here(), "expression nested too deeply"));
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.term()?;
        while let Some(op @ (BinOp::Add | BinOp::Sub)) = self.peek_op() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.power()?;
        while let Some(op @ (BinOp::Mul | BinOp::Div)) = self.peek_op() {
            self.pos += 1;
            let rhs = self.power()?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn power(&mut self) -> Result<Expr, EvalError> {
        let base = self.postfix()?;
        if self.peek_op() != Some(BinOp::Pow) {
            return Ok(base);
        }
        self.pos += 1;
        self.descend()?;
        let exponent = self.power()?;
        self.depth -= 1;
        Ok(Expr::binary(BinOp::Pow, base, exponent))
    }

    fn postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.primary()?;
        while matches!(self.peek(), Some(Spanned { token: Token::Bang, .. })) {
            self.pos += 1;
            expr = Expr::Factorial(Box::new(expr));
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let at = self.here();
        let Some(Spanned { token, .. }) = self.tokens.get(self.pos).cloned() else {
            return Err(malformed(at, "unexpected end of input"));
        };
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(n),
            Token::LParen => {
                self.descend()?;
                let inner = self.expr()?;
                self.depth -= 1;
                match self.peek() {
                    Some(Spanned {
                        token: Token::RParen,
                        ..
                    }) => {
                        self.pos += 1;
                        Ok(Expr::Group(Box::new(inner)))
                    }
                    _ => Err(malformed(self.here(), "unclosed bracket")),
                }
            }
            Token::RParen => Err(malformed(at, "unmatched ')'")),
            Token::Op(op) => Err(malformed(at, format!("unexpected operator '{}'", op.symbol()))),
            Token::Bang => Err(malformed(at, "unexpected '!'")),
        }
    }
}
