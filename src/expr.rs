//! Closed-grammar expression evaluator for `set` actions and `az-bind:*`
//! attributes.
//!
//! Identifiers resolve only against the fields of the current scope. There
//! are no calls, member accesses or assignments, so an expression can read
//! state but never change it.

use super::*;

use crate::scalar::{format_float, number_value};

const MAX_NESTING: usize = 128;

/// Evaluates `expr` against `state`, swallowing failures.
pub fn evaluate(expr: &str, state: &ScopeState) -> Option<Value> {
    try_evaluate(expr, state).ok().flatten()
}

/// Evaluates `expr` against `state`.
///
/// `Ok(None)` is an `undefined` result. Syntax errors, unknown identifiers,
/// non-scalar fields and non-finite numbers are errors.
pub fn try_evaluate(expr: &str, state: &ScopeState) -> Result<Option<Value>> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        source: expr,
    };
    let ast = parser.parse_expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(Error::ExpressionParse(format!(
            "unexpected trailing input in {expr:?}"
        )));
    }
    let result = eval_node(&ast, state)?;
    result.into_json(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

const PUNCTUATORS: [&str; 23] = [
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%", "?",
    ":", "(", ")", "{", "}", "=",
];

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    'outer: while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if b.is_ascii_digit() || (b == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit)) {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                i += 1;
                if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
                    i += 1;
                }
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let literal = &src[start..i];
            let value = literal.parse::<f64>().map_err(|_| {
                Error::ExpressionParse(format!("invalid number literal {literal:?}"))
            })?;
            tokens.push(Token::Number(value));
            continue;
        }

        if b == b'\'' || b == b'"' {
            let (value, next) = read_string(src, i)?;
            tokens.push(Token::Str(value));
            i = next;
            continue;
        }

        if b.is_ascii_alphabetic() || b == b'_' || b == b'$' {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(src[start..i].to_string()));
            continue;
        }

        for punct in PUNCTUATORS {
            if bytes[i..].starts_with(punct.as_bytes()) {
                tokens.push(Token::Punct(punct));
                i += punct.len();
                continue 'outer;
            }
        }

        return Err(Error::ExpressionParse(format!(
            "unexpected character {:?} in {src:?}",
            src[i..].chars().next().unwrap_or_default()
        )));
    }

    Ok(tokens)
}

fn read_string(src: &str, open: usize) -> Result<(String, usize)> {
    let quote = src.as_bytes()[open] as char;
    let mut out = String::new();
    let mut chars = src[open + 1..].char_indices();
    while let Some((offset, ch)) = chars.next() {
        match ch {
            '\\' => {
                let Some((_, escaped)) = chars.next() else {
                    break;
                };
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            }
            ch if ch == quote => return Ok((out, open + 1 + offset + 1)),
            ch => out.push(ch),
        }
    }
    Err(Error::ExpressionParse(format!(
        "unterminated string literal in {src:?}"
    )))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Or,
    And,
    LooseEq,
    LooseNe,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Scalar),
    Field(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Some(Token::Punct(p)) if *p == punct)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(name)) if name == keyword)
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.peek_punct(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{punct}'")))
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::ExpressionParse(format!("{message} in {:?}", self.source))
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        let result = stacker::maybe_grow(32 * 1024, 1024 * 1024, || f(self));
        self.depth -= 1;
        result
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        self.nested(|p| p.parse_conditional())
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let test = self.parse_binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.parse_expression()?;
        self.expect_punct(":")?;
        let alternate = self.parse_expression()?;
        Ok(Expr::Conditional(
            Box::new(test),
            Box::new(consequent),
            Box::new(alternate),
        ))
    }

    // `if c { a } else { b }` and `else if` chains.
    fn parse_if_block(&mut self) -> Result<Expr> {
        let test = self.parse_expression()?;
        let consequent = self.parse_braced()?;
        if !self.peek_keyword("else") {
            return Err(self.error("expected 'else'"));
        }
        self.pos += 1;
        let alternate = if self.peek_keyword("if") {
            self.pos += 1;
            self.nested(|p| p.parse_if_block())?
        } else {
            self.parse_braced()?
        };
        Ok(Expr::Conditional(
            Box::new(test),
            Box::new(consequent),
            Box::new(alternate),
        ))
    }

    fn parse_braced(&mut self) -> Result<Expr> {
        self.expect_punct("{")?;
        let inner = self.parse_expression()?;
        self.expect_punct("}")?;
        Ok(inner)
    }

    fn parse_binary(&mut self, min_level: usize) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let Some((op, level)) = self.peek_binary_op() else {
                break;
            };
            if level < min_level {
                break;
            }
            self.pos += 1;
            let right = self.nested(|p| p.parse_binary(level + 1))?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn peek_binary_op(&self) -> Option<(BinaryOp, usize)> {
        let Some(Token::Punct(punct)) = self.peek() else {
            return None;
        };
        let entry = match *punct {
            "||" => (BinaryOp::Or, 0),
            "&&" => (BinaryOp::And, 1),
            "==" => (BinaryOp::LooseEq, 2),
            "!=" => (BinaryOp::LooseNe, 2),
            "===" => (BinaryOp::StrictEq, 2),
            "!==" => (BinaryOp::StrictNe, 2),
            "<" => (BinaryOp::Lt, 3),
            "<=" => (BinaryOp::Le, 3),
            ">" => (BinaryOp::Gt, 3),
            ">=" => (BinaryOp::Ge, 3),
            "+" => (BinaryOp::Add, 4),
            "-" => (BinaryOp::Sub, 4),
            "*" => (BinaryOp::Mul, 5),
            "/" => (BinaryOp::Div, 5),
            "%" => (BinaryOp::Rem, 5),
            _ => return None,
        };
        Some(entry)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = if self.eat_punct("!") {
            UnaryOp::Not
        } else if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("+") {
            UnaryOp::Plus
        } else {
            return self.parse_primary();
        };
        let operand = self.nested(|p| p.parse_unary())?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("unexpected end of expression"));
        };
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(Expr::Literal(Scalar::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Scalar::Str(s))),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Scalar::Bool(true))),
                "false" => Ok(Expr::Literal(Scalar::Bool(false))),
                "null" => Ok(Expr::Literal(Scalar::Null)),
                "undefined" => Ok(Expr::Literal(Scalar::Undefined)),
                "if" => self.nested(|p| p.parse_if_block()),
                "else" => Err(self.error("unexpected 'else'")),
                _ => Ok(Expr::Field(name)),
            },
            Token::Punct("(") => {
                let inner = self.parse_expression()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Token::Punct(punct) => Err(self.error(&format!("unexpected '{punct}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

impl Scalar {
    fn from_field(name: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => Ok(Self::Number(n.as_f64().unwrap_or(f64::NAN))),
            Value::String(s) => Ok(Self::Str(s.clone())),
            Value::Array(_) | Value::Object(_) => Err(Error::ExpressionEval(format!(
                "field '{name}' does not hold a scalar"
            ))),
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
        }
    }

    fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::Str(s) => crate::scalar::to_number(Some(&Value::String(s.clone()))),
        }
    }

    fn to_display(&self) -> String {
        match self {
            Self::Undefined => "undefined".to_string(),
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_float(*n),
            Self::Str(s) => s.clone(),
        }
    }

    fn into_json(self, source: &str) -> Result<Option<Value>> {
        match self {
            Self::Undefined => Ok(None),
            Self::Null => Ok(Some(Value::Null)),
            Self::Bool(b) => Ok(Some(Value::Bool(b))),
            Self::Str(s) => Ok(Some(Value::String(s))),
            Self::Number(n) => number_value(n).map(Some).ok_or_else(|| {
                Error::ExpressionEval(format!(
                    "{source:?} produced non-finite number {}",
                    format_float(n)
                ))
            }),
        }
    }
}

fn eval_node(expr: &Expr, state: &ScopeState) -> Result<Scalar> {
    stacker::maybe_grow(32 * 1024, 1024 * 1024, || eval_inner(expr, state))
}

fn eval_inner(expr: &Expr, state: &ScopeState) -> Result<Scalar> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Field(name) => match state.get(name) {
            Some(value) => Scalar::from_field(name, value),
            None => Err(Error::ExpressionEval(format!("unknown identifier '{name}'"))),
        },
        Expr::Unary(op, operand) => {
            let value = eval_node(operand, state)?;
            Ok(match op {
                UnaryOp::Not => Scalar::Bool(!value.truthy()),
                UnaryOp::Neg => Scalar::Number(-value.to_number()),
                UnaryOp::Plus => Scalar::Number(value.to_number()),
            })
        }
        Expr::Conditional(test, consequent, alternate) => {
            if eval_node(test, state)?.truthy() {
                eval_node(consequent, state)
            } else {
                eval_node(alternate, state)
            }
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            let left = eval_node(left, state)?;
            if left.truthy() {
                Ok(left)
            } else {
                eval_node(right, state)
            }
        }
        Expr::Binary(BinaryOp::And, left, right) => {
            let left = eval_node(left, state)?;
            if left.truthy() {
                eval_node(right, state)
            } else {
                Ok(left)
            }
        }
        Expr::Binary(op, left, right) => {
            let left = eval_node(left, state)?;
            let right = eval_node(right, state)?;
            Ok(apply_binary(*op, left, right))
        }
    }
}

fn apply_binary(op: BinaryOp, left: Scalar, right: Scalar) -> Scalar {
    match op {
        BinaryOp::Add => match (&left, &right) {
            (Scalar::Str(_), _) | (_, Scalar::Str(_)) => {
                Scalar::Str(format!("{}{}", left.to_display(), right.to_display()))
            }
            _ => Scalar::Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => Scalar::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Scalar::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Scalar::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Scalar::Number(left.to_number() % right.to_number()),
        BinaryOp::LooseEq => Scalar::Bool(loose_eq(&left, &right)),
        BinaryOp::LooseNe => Scalar::Bool(!loose_eq(&left, &right)),
        BinaryOp::StrictEq => Scalar::Bool(strict_eq(&left, &right)),
        BinaryOp::StrictNe => Scalar::Bool(!strict_eq(&left, &right)),
        BinaryOp::Lt => Scalar::Bool(compare(&left, &right, |o| o.is_lt())),
        BinaryOp::Le => Scalar::Bool(compare(&left, &right, |o| o.is_le())),
        BinaryOp::Gt => Scalar::Bool(compare(&left, &right, |o| o.is_gt())),
        BinaryOp::Ge => Scalar::Bool(compare(&left, &right, |o| o.is_ge())),
        BinaryOp::Or | BinaryOp::And => Scalar::Undefined,
    }
}

fn strict_eq(left: &Scalar, right: &Scalar) -> bool {
    match (left, right) {
        (Scalar::Number(a), Scalar::Number(b)) => a == b,
        _ => left == right,
    }
}

fn loose_eq(left: &Scalar, right: &Scalar) -> bool {
    match (left, right) {
        (Scalar::Undefined | Scalar::Null, Scalar::Undefined | Scalar::Null) => true,
        (Scalar::Undefined | Scalar::Null, _) | (_, Scalar::Undefined | Scalar::Null) => false,
        (Scalar::Str(a), Scalar::Str(b)) => a == b,
        _ => left.to_number() == right.to_number(),
    }
}

fn compare(left: &Scalar, right: &Scalar, accept: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    if let (Scalar::Str(a), Scalar::Str(b)) = (left, right) {
        return accept(a.cmp(b));
    }
    left.to_number()
        .partial_cmp(&right.to_number())
        .is_some_and(accept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(value: Value) -> ScopeState {
        match value {
            Value::Object(map) => ScopeState::from(map),
            _ => ScopeState::default(),
        }
    }

    #[test]
    fn arithmetic_and_precedence() -> Result<()> {
        let s = state(json!({"count": 4, "step": 1.5}));
        assert_eq!(try_evaluate("count + 1", &s)?, Some(json!(5)));
        assert_eq!(try_evaluate("count + step * 2", &s)?, Some(json!(7)));
        assert_eq!(try_evaluate("(count + step) * 2", &s)?, Some(json!(11)));
        assert_eq!(try_evaluate("count / 8", &s)?, Some(json!(0.5)));
        assert_eq!(try_evaluate("-count % 3", &s)?, Some(json!(-1)));
        Ok(())
    }

    #[test]
    fn string_concatenation_follows_plus_rules() -> Result<()> {
        let s = state(json!({"name": "Ada", "n": 2}));
        assert_eq!(try_evaluate("'hi ' + name", &s)?, Some(json!("hi Ada")));
        assert_eq!(try_evaluate("n + \"px\"", &s)?, Some(json!("2px")));
        assert_eq!(try_evaluate("1 + 2 + 'x'", &s)?, Some(json!("3x")));
        Ok(())
    }

    #[test]
    fn logical_and_conditional_forms() -> Result<()> {
        let s = state(json!({"liked": true, "count": 0}));
        assert_eq!(try_evaluate("!liked", &s)?, Some(json!(false)));
        assert_eq!(try_evaluate("count || 'none'", &s)?, Some(json!("none")));
        assert_eq!(try_evaluate("liked && count", &s)?, Some(json!(0)));
        assert_eq!(
            try_evaluate("liked ? 'Unlike' : 'Like'", &s)?,
            Some(json!("Unlike"))
        );
        assert_eq!(
            try_evaluate("if liked { 'Unlike' } else { 'Like' }", &s)?,
            Some(json!("Unlike"))
        );
        assert_eq!(
            try_evaluate("if count > 1 { 'many' } else if count == 1 { 'one' } else { 'none' }", &s)?,
            Some(json!("none"))
        );
        Ok(())
    }

    #[test]
    fn equality_distinguishes_loose_and_strict() -> Result<()> {
        let s = state(json!({"n": 5, "text": "5"}));
        assert_eq!(try_evaluate("n == text", &s)?, Some(json!(true)));
        assert_eq!(try_evaluate("n === text", &s)?, Some(json!(false)));
        assert_eq!(try_evaluate("null == undefined", &s)?, Some(json!(true)));
        assert_eq!(try_evaluate("'b' > 'a'", &s)?, Some(json!(true)));
        Ok(())
    }

    #[test]
    fn undefined_result_is_none() -> Result<()> {
        assert_eq!(try_evaluate("undefined", &ScopeState::default())?, None);
        Ok(())
    }

    #[test]
    fn failures_are_errors_not_panics() {
        let s = state(json!({"count": 1, "list": [1, 2]}));
        for (src, parse) in [
            ("count +", true),
            ("(count", true),
            ("count count", true),
            ("'open", true),
            ("count = 2", true),
            ("if count { 1 }", true),
            ("alert(1)", true),
            ("missing + 1", false),
            ("list", false),
            ("count / 0", false),
        ] {
            let result = try_evaluate(src, &s);
            if parse {
                assert!(
                    matches!(result, Err(Error::ExpressionParse(_))),
                    "{src:?} -> {result:?}"
                );
            } else {
                assert!(
                    matches!(result, Err(Error::ExpressionEval(_))),
                    "{src:?} -> {result:?}"
                );
            }
            assert_eq!(evaluate(src, &s), None);
        }
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let src = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(matches!(
            try_evaluate(&src, &ScopeState::default()),
            Err(Error::ExpressionParse(_))
        ));
    }
}
