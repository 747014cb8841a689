//! Sandboxed condition expressions.
//!
//! Condition nodes evaluate a small boolean DSL over `input`, `state.X`,
//! and `params.X`:
//!
//! ```text
//! input contains 'urgent'
//! state.count >= 3 and params.tier == 'premium'
//! not (len(input) > 100) or state.active
//! ```
//!
//! The string is tokenized, parsed to an AST, and walked by an interpreter
//! that can only see the three context roots and a whitelist of coercions
//! (`len`, `str`, `int`, `float`, `bool`). There is no host access of any
//! kind; unknown names and operators are parse errors.

use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
  #[error("unexpected character '{0}' in expression")]
  UnexpectedChar(char),

  #[error("unterminated string literal")]
  UnterminatedString,

  #[error("unexpected end of expression")]
  UnexpectedEnd,

  #[error("unexpected token: {0}")]
  UnexpectedToken(String),

  #[error("unknown name '{0}'")]
  UnknownName(String),

  #[error("cannot compare {0} with {1}")]
  Incomparable(&'static str, &'static str),

  #[error("len() expects a string, array, or object")]
  BadLenArgument,

  #[error("cannot convert value to {0}")]
  BadConversion(&'static str),
}

/// Evaluate an expression against the context roots; the result is the
/// truthiness of the final value.
pub fn evaluate_expression(
  expression: &str,
  input: &Value,
  state: &Map<String, Value>,
  params: &Map<String, Value>,
) -> Result<bool, EvalError> {
  let tokens = tokenize(expression)?;
  let mut parser = Parser { tokens, pos: 0 };
  let ast = parser.parse_expr()?;
  parser.expect_end()?;
  let scope = Scope { input, state, params };
  Ok(truthy(&eval(&ast, &scope)?))
}

// ---------------------------------------------------------------------------
// Tokens

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Ident(String),
  Str(String),
  Number(f64),
  Dot,
  LParen,
  RParen,
  Gt,
  Lt,
  Ge,
  Le,
  Eq,
  Ne,
}

fn tokenize(source: &str) -> Result<Vec<Token>, EvalError> {
  let mut tokens = Vec::new();
  let mut chars = source.chars().peekable();

  while let Some(&ch) = chars.peek() {
    match ch {
      ' ' | '\t' | '\n' | '\r' => {
        chars.next();
      }
      '(' => {
        chars.next();
        tokens.push(Token::LParen);
      }
      ')' => {
        chars.next();
        tokens.push(Token::RParen);
      }
      '.' => {
        chars.next();
        tokens.push(Token::Dot);
      }
      '>' => {
        chars.next();
        if chars.peek() == Some(&'=') {
          chars.next();
          tokens.push(Token::Ge);
        } else {
          tokens.push(Token::Gt);
        }
      }
      '<' => {
        chars.next();
        if chars.peek() == Some(&'=') {
          chars.next();
          tokens.push(Token::Le);
        } else {
          tokens.push(Token::Lt);
        }
      }
      '=' => {
        chars.next();
        if chars.peek() == Some(&'=') {
          chars.next();
          tokens.push(Token::Eq);
        } else {
          return Err(EvalError::UnexpectedChar('='));
        }
      }
      '!' => {
        chars.next();
        if chars.peek() == Some(&'=') {
          chars.next();
          tokens.push(Token::Ne);
        } else {
          return Err(EvalError::UnexpectedChar('!'));
        }
      }
      '\'' | '"' => {
        let quote = ch;
        chars.next();
        let mut literal = String::new();
        loop {
          match chars.next() {
            Some(c) if c == quote => break,
            Some(c) => literal.push(c),
            None => return Err(EvalError::UnterminatedString),
          }
        }
        tokens.push(Token::Str(literal));
      }
      c if c.is_ascii_digit() => {
        let mut literal = String::new();
        while let Some(&c) = chars.peek() {
          if c.is_ascii_digit() || c == '.' {
            literal.push(c);
            chars.next();
          } else {
            break;
          }
        }
        let number = literal.parse::<f64>().map_err(|_| EvalError::UnexpectedChar(c))?;
        tokens.push(Token::Number(number));
      }
      c if c.is_ascii_alphabetic() || c == '_' => {
        let mut literal = String::new();
        while let Some(&c) = chars.peek() {
          if c.is_ascii_alphanumeric() || c == '_' {
            literal.push(c);
            chars.next();
          } else {
            break;
          }
        }
        tokens.push(Token::Ident(literal));
      }
      other => return Err(EvalError::UnexpectedChar(other)),
    }
  }

  Ok(tokens)
}

// ---------------------------------------------------------------------------
// AST

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
  Gt,
  Lt,
  Ge,
  Le,
  Eq,
  Ne,
  Contains,
  StartsWith,
  EndsWith,
  In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Coercion {
  Len,
  Str,
  Int,
  Float,
  Bool,
}

#[derive(Debug, Clone)]
enum Expr {
  Literal(Value),
  Path(Vec<String>),
  Call(Coercion, Box<Expr>),
  Not(Box<Expr>),
  And(Box<Expr>, Box<Expr>),
  Or(Box<Expr>, Box<Expr>),
  Compare(Box<Expr>, CompareOp, Box<Expr>),
}

struct Parser {
  tokens: Vec<Token>,
  pos: usize,
}

impl Parser {
  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn next(&mut self) -> Result<Token, EvalError> {
    let token = self.tokens.get(self.pos).cloned().ok_or(EvalError::UnexpectedEnd)?;
    self.pos += 1;
    Ok(token)
  }

  fn peek_keyword(&self, word: &str) -> bool {
    matches!(self.peek(), Some(Token::Ident(w)) if w == word)
  }

  fn expect_end(&self) -> Result<(), EvalError> {
    match self.peek() {
      None => Ok(()),
      Some(token) => Err(EvalError::UnexpectedToken(format!("{token:?}"))),
    }
  }

  fn parse_expr(&mut self) -> Result<Expr, EvalError> {
    let mut left = self.parse_and()?;
    while self.peek_keyword("or") {
      self.pos += 1;
      let right = self.parse_and()?;
      left = Expr::Or(Box::new(left), Box::new(right));
    }
    Ok(left)
  }

  fn parse_and(&mut self) -> Result<Expr, EvalError> {
    let mut left = self.parse_not()?;
    while self.peek_keyword("and") {
      self.pos += 1;
      let right = self.parse_not()?;
      left = Expr::And(Box::new(left), Box::new(right));
    }
    Ok(left)
  }

  fn parse_not(&mut self) -> Result<Expr, EvalError> {
    if self.peek_keyword("not") {
      self.pos += 1;
      let inner = self.parse_not()?;
      return Ok(Expr::Not(Box::new(inner)));
    }
    self.parse_comparison()
  }

  fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
    let left = self.parse_operand()?;

    let op = match self.peek() {
      Some(Token::Gt) => Some(CompareOp::Gt),
      Some(Token::Lt) => Some(CompareOp::Lt),
      Some(Token::Ge) => Some(CompareOp::Ge),
      Some(Token::Le) => Some(CompareOp::Le),
      Some(Token::Eq) => Some(CompareOp::Eq),
      Some(Token::Ne) => Some(CompareOp::Ne),
      Some(Token::Ident(word)) => match word.as_str() {
        "contains" => Some(CompareOp::Contains),
        "startswith" => Some(CompareOp::StartsWith),
        "endswith" => Some(CompareOp::EndsWith),
        "in" => Some(CompareOp::In),
        _ => None,
      },
      _ => None,
    };

    match op {
      Some(op) => {
        self.pos += 1;
        let right = self.parse_operand()?;
        Ok(Expr::Compare(Box::new(left), op, Box::new(right)))
      }
      None => Ok(left),
    }
  }

  fn parse_operand(&mut self) -> Result<Expr, EvalError> {
    match self.next()? {
      Token::LParen => {
        let inner = self.parse_expr()?;
        match self.next()? {
          Token::RParen => Ok(inner),
          other => Err(EvalError::UnexpectedToken(format!("{other:?}"))),
        }
      }
      Token::Str(literal) => Ok(Expr::Literal(Value::String(literal))),
      Token::Number(number) => Ok(Expr::Literal(number_value(number))),
      Token::Ident(word) => match word.as_str() {
        "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
        "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
        "null" | "None" => Ok(Expr::Literal(Value::Null)),
        "len" | "str" | "int" | "float" | "bool" if self.peek() == Some(&Token::LParen) => {
          let coercion = match word.as_str() {
            "len" => Coercion::Len,
            "str" => Coercion::Str,
            "int" => Coercion::Int,
            "float" => Coercion::Float,
            _ => Coercion::Bool,
          };
          self.pos += 1; // consume '('
          let inner = self.parse_expr()?;
          match self.next()? {
            Token::RParen => Ok(Expr::Call(coercion, Box::new(inner))),
            other => Err(EvalError::UnexpectedToken(format!("{other:?}"))),
          }
        }
        _ => {
          let mut segments = vec![word];
          while self.peek() == Some(&Token::Dot) {
            self.pos += 1;
            match self.next()? {
              Token::Ident(segment) => segments.push(segment),
              other => return Err(EvalError::UnexpectedToken(format!("{other:?}"))),
            }
          }
          Ok(Expr::Path(segments))
        }
      },
      other => Err(EvalError::UnexpectedToken(format!("{other:?}"))),
    }
  }
}

fn number_value(number: f64) -> Value {
  if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
    Value::Number(Number::from(number as i64))
  } else {
    Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
  }
}

// ---------------------------------------------------------------------------
// Interpreter

struct Scope<'a> {
  input: &'a Value,
  state: &'a Map<String, Value>,
  params: &'a Map<String, Value>,
}

fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value, EvalError> {
  match expr {
    Expr::Literal(value) => Ok(value.clone()),
    Expr::Path(segments) => resolve_path(segments, scope),
    Expr::Call(coercion, inner) => apply_coercion(*coercion, &eval(inner, scope)?),
    Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, scope)?))),
    Expr::And(left, right) => {
      // Short-circuit like the boolean operators users expect.
      if !truthy(&eval(left, scope)?) {
        return Ok(Value::Bool(false));
      }
      Ok(Value::Bool(truthy(&eval(right, scope)?)))
    }
    Expr::Or(left, right) => {
      if truthy(&eval(left, scope)?) {
        return Ok(Value::Bool(true));
      }
      Ok(Value::Bool(truthy(&eval(right, scope)?)))
    }
    Expr::Compare(left, op, right) => {
      let left = eval(left, scope)?;
      let right = eval(right, scope)?;
      compare(&left, *op, &right).map(Value::Bool)
    }
  }
}

fn resolve_path(segments: &[String], scope: &Scope<'_>) -> Result<Value, EvalError> {
  let root = segments.first().map(String::as_str).ok_or(EvalError::UnexpectedEnd)?;
  let mut current = match root {
    "input" => scope.input.clone(),
    "state" => Value::Object(scope.state.clone()),
    "params" => Value::Object(scope.params.clone()),
    other => return Err(EvalError::UnknownName(other.to_string())),
  };

  for segment in &segments[1..] {
    // Missing path segments evaluate to null rather than erroring, so
    // `state.flag == true` is simply false on a fresh state.
    current = match current {
      Value::Object(map) => map.get(segment.as_str()).cloned().unwrap_or(Value::Null),
      _ => Value::Null,
    };
  }
  Ok(current)
}

fn apply_coercion(coercion: Coercion, value: &Value) -> Result<Value, EvalError> {
  match coercion {
    Coercion::Len => {
      let len = match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => return Err(EvalError::BadLenArgument),
      };
      Ok(Value::Number(Number::from(len as i64)))
    }
    Coercion::Str => Ok(Value::String(stringify(value))),
    Coercion::Int => match value {
      Value::Number(n) => {
        let int = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64));
        int.map(|i| Value::Number(Number::from(i))).ok_or(EvalError::BadConversion("int"))
      }
      Value::String(s) => s
        .trim()
        .parse::<i64>()
        .map(|i| Value::Number(Number::from(i)))
        .map_err(|_| EvalError::BadConversion("int")),
      Value::Bool(b) => Ok(Value::Number(Number::from(*b as i64))),
      _ => Err(EvalError::BadConversion("int")),
    },
    Coercion::Float => match value {
      Value::Number(n) => Ok(n
        .as_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)),
      Value::String(s) => s
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or(EvalError::BadConversion("float")),
      _ => Err(EvalError::BadConversion("float")),
    },
    Coercion::Bool => Ok(Value::Bool(truthy(value))),
  }
}

fn truthy(value: &Value) -> bool {
  match value {
    Value::Null => false,
    Value::Bool(b) => *b,
    Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    Value::String(s) => !s.is_empty(),
    Value::Array(items) => !items.is_empty(),
    Value::Object(map) => !map.is_empty(),
  }
}

fn stringify(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    other => other.to_string(),
  }
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

fn compare(left: &Value, op: CompareOp, right: &Value) -> Result<bool, EvalError> {
  match op {
    CompareOp::Eq => Ok(values_equal(left, right)),
    CompareOp::Ne => Ok(!values_equal(left, right)),
    CompareOp::Gt | CompareOp::Lt | CompareOp::Ge | CompareOp::Le => {
      let ordering = order(left, right)?;
      Ok(match op {
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::Ge => ordering.is_ge(),
        _ => ordering.is_le(),
      })
    }
    CompareOp::Contains => Ok(contains(left, right)),
    CompareOp::StartsWith => Ok(stringify(left).starts_with(&stringify(right))),
    CompareOp::EndsWith => Ok(stringify(left).ends_with(&stringify(right))),
    CompareOp::In => Ok(contains(right, left)),
  }
}

fn values_equal(left: &Value, right: &Value) -> bool {
  match (left.as_f64(), right.as_f64()) {
    // Cross-representation numeric equality (2 == 2.0).
    (Some(a), Some(b)) => a == b,
    _ => left == right,
  }
}

fn order(left: &Value, right: &Value) -> Result<std::cmp::Ordering, EvalError> {
  match (left, right) {
    (Value::Number(a), Value::Number(b)) => {
      let (a, b) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
      a.partial_cmp(&b).ok_or(EvalError::Incomparable("number", "number"))
    }
    (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
    (a, b) => Err(EvalError::Incomparable(type_name(a), type_name(b))),
  }
}

/// Membership: element of an array, substring of a string, key of an
/// object; anything else falls back to substring of the stringified value.
fn contains(haystack: &Value, needle: &Value) -> bool {
  match haystack {
    Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
    Value::String(s) => s.contains(&stringify(needle)),
    Value::Object(map) => map.contains_key(&stringify(needle)),
    other => stringify(other).contains(&stringify(needle)),
  }
}
