//! Boolean expression evaluation for iteration and wait conditions.
//!
//! Expressions are evaluated after `${variable}` references have been
//! resolved, so they only ever contain literals:
//!
//! ```text
//! expr    := and ("or" and)*
//! and     := compare ("and" compare)*
//! compare := operand (op operand)?
//! operand := "(" expr ")" | integer | "true" | "false" | 'quoted' | word
//! op      := "=" | "==" | "!=" | "lt" | "lt=" | "gt" | "gt=" | "<" | "<=" | ">" | ">="
//! ```
//!
//! Ordering operators require integer operands. Equality compares integers
//! numerically and everything else textually.
//!
//! # Example
//!
//! ```
//! use cadence::expression::evaluate;
//!
//! assert!(evaluate("3 gt= 2 and (1 = 2 or true)").unwrap());
//! assert!(!evaluate("4 lt 4").unwrap());
//! ```

use std::fmt;

use crate::error::{ActionError, ActionResult};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Int(i64),
    Word(String),
    Quoted(String),
    Op(CompareOp),
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Value {
    fn as_bool(&self, expression: &str) -> ActionResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            other => Err(ActionError::Evaluation(format!(
                "'{}' is not a boolean in expression '{}'",
                other, expression
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Evaluates a boolean expression.
///
/// # Errors
///
/// Returns [`ActionError::Evaluation`] when the expression is incomplete,
/// contains an unknown operator, or does not produce a boolean.
pub fn evaluate(expression: &str) -> ActionResult<bool> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        expression,
    };
    let value = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    let result = value.as_bool(expression)?;
    tracing::debug!("Boolean expression {} evaluates to {}", expression, result);
    Ok(result)
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '!')
}

fn tokenize(expression: &str) -> ActionResult<Vec<Token>> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::Open);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::Close);
            i += 1;
        } else if c == '\'' {
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|&ch| ch == '\'')
                .map(|offset| start + offset)
                .ok_or_else(|| {
                    ActionError::Evaluation(format!(
                        "Unterminated quote in expression '{}'",
                        expression
                    ))
                })?;
            tokens.push(Token::Quoted(chars[start..end].iter().collect()));
            i = end + 1;
        } else if is_operator_char(c) {
            let start = i;
            while i < chars.len() && is_operator_char(chars[i]) {
                i += 1;
            }
            let op: String = chars[start..i].iter().collect();
            tokens.push(Token::Op(parse_operator(&op, expression)?));
        } else if c.is_ascii_digit()
            || (c == '-'
                && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())
                && !matches!(tokens.last(), Some(Token::Int(_) | Token::Word(_) | Token::Close)))
        {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let digits: String = chars[start..i].iter().collect();
            let value = digits.parse::<i64>().map_err(|e| {
                ActionError::Evaluation(format!("Invalid number '{}': {}", digits, e))
            })?;
            tokens.push(Token::Int(value));
        } else {
            let start = i;
            while i < chars.len()
                && !chars[i].is_whitespace()
                && !matches!(chars[i], '(' | ')')
                && !is_operator_char(chars[i])
            {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            // `lt=` / `gt=` are written without a separator
            let word_is_ordering = word == "lt" || word == "gt";
            if word_is_ordering && chars.get(i) == Some(&'=') {
                i += 1;
                let op = format!("{}=", word);
                tokens.push(Token::Op(parse_operator(&op, expression)?));
                continue;
            }
            tokens.push(match word.as_str() {
                "and" => Token::And,
                "or" => Token::Or,
                "lt" => Token::Op(CompareOp::Lt),
                "gt" => Token::Op(CompareOp::Gt),
                _ => Token::Word(word),
            });
        }
    }

    Ok(tokens)
}

fn parse_operator(op: &str, expression: &str) -> ActionResult<CompareOp> {
    match op {
        "=" | "==" => Ok(CompareOp::Eq),
        "!=" => Ok(CompareOp::Ne),
        "<" => Ok(CompareOp::Lt),
        "<=" | "lt=" => Ok(CompareOp::Le),
        ">" => Ok(CompareOp::Gt),
        ">=" | "gt=" => Ok(CompareOp::Ge),
        _ => Err(ActionError::Evaluation(format!(
            "Unknown operator '{}' in expression '{}'",
            op, expression
        ))),
    }
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    expression: &'a str,
}

impl Parser<'_> {
    fn error(&self, reason: &str) -> ActionError {
        ActionError::Evaluation(format!(
            "Unable to parse boolean expression '{}': {}",
            self.expression, reason
        ))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> ActionResult<Value> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            let result = left.as_bool(self.expression)? || right.as_bool(self.expression)?;
            left = Value::Bool(result);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ActionResult<Value> {
        let mut left = self.parse_compare()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_compare()?;
            let result = left.as_bool(self.expression)? && right.as_bool(self.expression)?;
            left = Value::Bool(result);
        }
        Ok(left)
    }

    fn parse_compare(&mut self) -> ActionResult<Value> {
        let left = self.parse_operand()?;
        let op = match self.peek() {
            Some(Token::Op(op)) => *op,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_operand()?;
        self.compare(op, &left, &right).map(Value::Bool)
    }

    fn parse_operand(&mut self) -> ActionResult<Value> {
        match self.next() {
            Some(Token::Open) => {
                let value = self.parse_or()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => Err(self.error("missing closing parenthesis")),
                }
            }
            Some(Token::Int(i)) => Ok(Value::Int(i)),
            Some(Token::Word(w)) => Ok(match w.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::Text(w),
            }),
            Some(Token::Quoted(s)) => Ok(Value::Text(s)),
            Some(_) => Err(self.error("expected an operand")),
            None => Err(self.error("expression is incomplete")),
        }
    }

    fn compare(&self, op: CompareOp, left: &Value, right: &Value) -> ActionResult<bool> {
        match (op, left, right) {
            (op, Value::Int(a), Value::Int(b)) => Ok(match op {
                CompareOp::Eq => a == b,
                CompareOp::Ne => a != b,
                CompareOp::Lt => a < b,
                CompareOp::Le => a <= b,
                CompareOp::Gt => a > b,
                CompareOp::Ge => a >= b,
            }),
            (CompareOp::Eq, a, b) => Ok(a.to_string() == b.to_string()),
            (CompareOp::Ne, a, b) => Ok(a.to_string() != b.to_string()),
            (_, a, b) => Err(self.error(&format!(
                "ordering comparison needs integers, got '{}' and '{}'",
                a, b
            ))),
        }
    }
}
