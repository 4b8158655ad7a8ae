//! `#if` / `#elif` integer expressions.
//!
//! Operands are fully macro-expanded before evaluation; `defined` has
//! already been replaced by `0`/`1`. Remaining identifiers evaluate to 0.

use super::lexer::{Token, TokenKind};

/// Evaluates `tokens` to a signed 64-bit value with C precedence.
pub(crate) fn evaluate(tokens: &[Token]) -> Result<i64, String> {
    let solid: Vec<&Token> = tokens.iter().filter(|t| !t.is_space()).collect();
    if solid.is_empty() {
        return Err("#if with no expression".to_string());
    }
    let mut parser = Parser { tokens: solid, pos: 0 };
    let value = parser.conditional()?;
    match parser.peek() {
        None => Ok(value),
        Some(t) => Err(format!("unexpected '{}' in #if expression", t.text)),
    }
}

struct Parser<'a> {
    tokens: Vec<&'a Token>,
    pos: usize,
}

/// Binary operators from loosest to tightest binding.
const LEVELS: [&[&str]; 10] = [
    &["||"],
    &["&&"],
    &["|"],
    &["^"],
    &["&"],
    &["==", "!="],
    &["<", "<=", ">", ">="],
    &["<<", ">>"],
    &["+", "-"],
    &["*", "/", "%"],
];

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).copied()
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn conditional(&mut self) -> Result<i64, String> {
        let condition = self.binary(0)?;
        if !self.eat("?") {
            return Ok(condition);
        }
        let then = self.conditional()?;
        if !self.eat(":") {
            return Err("expected ':' in #if expression".to_string());
        }
        let otherwise = self.conditional()?;
        Ok(if condition != 0 { then } else { otherwise })
    }

    fn binary(&mut self, level: usize) -> Result<i64, String> {
        if level == LEVELS.len() {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1)?;
        while let Some(op) = self
            .peek()
            .filter(|t| t.kind == TokenKind::Punct)
            .and_then(|t| LEVELS[level].iter().find(|op| **op == t.text))
        {
            self.pos += 1;
            let rhs = self.binary(level + 1)?;
            lhs = apply(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64, String> {
        if self.eat("!") {
            return Ok((self.unary()? == 0) as i64);
        }
        if self.eat("~") {
            return Ok(!self.unary()?);
        }
        if self.eat("-") {
            return Ok(self.unary()?.wrapping_neg());
        }
        if self.eat("+") {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<i64, String> {
        let Some(token) = self.peek() else {
            return Err("unexpected end of #if expression".to_string());
        };
        self.pos += 1;
        match token.kind {
            TokenKind::Punct if token.text == "(" => {
                let value = self.conditional()?;
                if !self.eat(")") {
                    return Err("missing ')' in #if expression".to_string());
                }
                Ok(value)
            }
            TokenKind::Number => parse_number(&token.text),
            TokenKind::Literal if token.text.starts_with('\'') => parse_char(&token.text),
            TokenKind::Ident => Ok(0),
            _ => Err(format!("unexpected '{}' in #if expression", token.text)),
        }
    }
}

fn apply(op: &str, lhs: i64, rhs: i64) -> Result<i64, String> {
    Ok(match op {
        "||" => (lhs != 0 || rhs != 0) as i64,
        "&&" => (lhs != 0 && rhs != 0) as i64,
        "|" => lhs | rhs,
        "^" => lhs ^ rhs,
        "&" => lhs & rhs,
        "==" => (lhs == rhs) as i64,
        "!=" => (lhs != rhs) as i64,
        "<" => (lhs < rhs) as i64,
        "<=" => (lhs <= rhs) as i64,
        ">" => (lhs > rhs) as i64,
        ">=" => (lhs >= rhs) as i64,
        "<<" => lhs.wrapping_shl(rhs as u32),
        ">>" => lhs.wrapping_shr(rhs as u32),
        "+" => lhs.wrapping_add(rhs),
        "-" => lhs.wrapping_sub(rhs),
        "*" => lhs.wrapping_mul(rhs),
        "/" | "%" if rhs == 0 => return Err("division by zero in #if".to_string()),
        "/" => lhs.wrapping_div(rhs),
        "%" => lhs.wrapping_rem(rhs),
        _ => return Err(format!("unknown operator '{op}' in #if expression")),
    })
}

fn parse_number(text: &str) -> Result<i64, String> {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse::<u64>()
    };
    parsed
        .map(|v| v as i64)
        .map_err(|_| format!("invalid integer '{text}' in #if expression"))
}

fn parse_char(text: &str) -> Result<i64, String> {
    let inner = text.trim_start_matches('\'').trim_end_matches('\'');
    let value = match inner.as_bytes() {
        [c] => *c,
        [b'\\', b'n'] => b'\n',
        [b'\\', b't'] => b'\t',
        [b'\\', b'0'] => 0,
        [b'\\', c] => *c,
        _ => return Err(format!("invalid character constant {text} in #if expression")),
    };
    Ok(value as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::lexer::tokenize;

    fn eval(text: &str) -> Result<i64, String> {
        evaluate(&tokenize(text))
    }

    #[test]
    fn precedence_matches_c() {
        assert_eq!(eval("1 + 2 * 3"), Ok(7));
        assert_eq!(eval("(1 + 2) * 3"), Ok(9));
        assert_eq!(eval("1 << 2 + 1"), Ok(8));
        assert_eq!(eval("1 || 0 && 0"), Ok(1));
        assert_eq!(eval("2 > 1 == 1"), Ok(1));
        assert_eq!(eval("-3 % 2"), Ok(-1));
        assert_eq!(eval("!0 + ~0"), Ok(0));
    }

    #[test]
    fn literals_and_identifiers() {
        assert_eq!(eval("0x10 + 010 + 2u"), Ok(26));
        assert_eq!(eval("'A'"), Ok(65));
        assert_eq!(eval("UNDEFINED_NAME"), Ok(0));
        assert_eq!(eval("1 ? 2 : 3"), Ok(2));
        assert_eq!(eval("0 ? 2 : 0 ? 3 : 4"), Ok(4));
    }

    #[test]
    fn malformed_expressions_are_errors() {
        assert!(eval("").unwrap_err().contains("no expression"));
        assert!(eval("(1 + 2").unwrap_err().contains("missing ')'"));
        assert!(eval("4 / 0").unwrap_err().contains("division by zero"));
        assert!(eval("1 2").unwrap_err().contains("unexpected '2'"));
    }
}
