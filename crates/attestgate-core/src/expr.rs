//! Expression evaluator (C7).
//!
//! A hand-rolled mini-interpreter (documented in DESIGN.md) rather than a CEL
//! library dependency, so the "no such attribute" failure mode required by
//! `allowIfNoClaim` is a first-class, structurally matched enum variant
//! rather than routed through a third-party crate's own error taxonomy.
//!
//! Supports the operator set layout rules actually need: field access over a
//! recursively-typed JSON value, equality, membership (`in`), string
//! `startsWith`/`endsWith`/`contains`, `.size()`, and the boolean connectives
//! `&&`, `||`, `!`. Sandboxed by construction (no host calls, no I/O) and
//! bounded by a configurable evaluated-node budget to block pathological
//! expressions.

use serde_json::Value as Json;

use crate::error::EvalError;
use crate::layout::Constraint;

/// Resource limits applied while compiling/evaluating a single rule.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationLimits {
    pub max_expr_steps: u64,
    pub max_param_passes: u32,
}

impl Default for EvaluationLimits {
    fn default() -> Self {
        EvaluationLimits {
            max_expr_steps: 10_000,
            max_param_passes: 64,
        }
    }
}

/// The environment a rule is evaluated against: the bound variables
/// `type`, `subject`, `predicateType`, `predicate`, plus, for well-known
/// predicate schemas, the predicate's own top-level fields spliced in by
/// name.
pub struct EvalEnv {
    root: Json,
}

impl EvalEnv {
    pub fn new(type_: &str, subject: Json, predicate_type: &str, predicate: Json) -> Self {
        let mut root = serde_json::Map::new();
        root.insert("type".to_string(), Json::String(type_.to_string()));
        root.insert("subject".to_string(), subject);
        root.insert(
            "predicateType".to_string(),
            Json::String(predicate_type.to_string()),
        );
        root.insert("predicate".to_string(), predicate.clone());
        if let Json::Object(fields) = &predicate {
            for (k, v) in fields {
                root.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        EvalEnv {
            root: Json::Object(root),
        }
    }
}

/// The outcome of evaluating one [`Constraint`] against an [`EvalEnv`].
pub struct ConstraintOutcome {
    pub passed: bool,
    pub warned: bool,
    pub message: Option<String>,
}

/// Evaluate `constraint.rule_text` against `env`, applying the
/// `allowIfNoClaim`/`warn`/`debug` contract.
pub fn evaluate_constraint(
    constraint: &Constraint,
    env: &EvalEnv,
    limits: &EvaluationLimits,
) -> Result<ConstraintOutcome, EvalError> {
    let expr = parse(&constraint.rule_text).map_err(|reason| EvalError::RuleSyntaxError {
        rule: constraint.rule_text.clone(),
        reason,
    })?;

    let mut steps = 0u64;
    let result = eval(&expr, &env.root, limits, &mut steps);

    match result {
        Ok(Json::Bool(true)) => Ok(ConstraintOutcome {
            passed: true,
            warned: false,
            message: None,
        }),
        Ok(Json::Bool(false)) => {
            if constraint.warn {
                Ok(ConstraintOutcome {
                    passed: true,
                    warned: true,
                    message: Some(non_empty(&constraint.debug)),
                })
            } else {
                Err(EvalError::RuleFailed {
                    rule: constraint.rule_text.clone(),
                    debug: non_empty_opt(&constraint.debug),
                })
            }
        }
        Ok(_) => Err(EvalError::RuleTypeError {
            rule: constraint.rule_text.clone(),
        }),
        Err(EvalError::NoSuchAttribute { path, .. }) if constraint.allow_if_no_claim => {
            Ok(ConstraintOutcome {
                passed: true,
                warned: false,
                message: Some(format!("allowed missing attribute '{path}'")),
            })
        }
        Err(e) => Err(rewrite_rule(e, &constraint.rule_text)),
    }
}

fn non_empty(s: &str) -> String {
    s.to_string()
}

fn non_empty_opt(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn rewrite_rule(e: EvalError, rule: &str) -> EvalError {
    match e {
        EvalError::NoSuchAttribute { path, .. } => EvalError::NoSuchAttribute {
            rule: rule.to_string(),
            path,
        },
        EvalError::RuleTypeError { .. } => EvalError::RuleTypeError {
            rule: rule.to_string(),
        },
        other => other,
    }
}

// ---------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expr {
    Lit(Json),
    Ident(String),
    Field(Box<Expr>, String),
    Not(Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    MethodCall(Box<Expr>, String, Vec<Expr>),
    ListLit(Vec<Expr>),
}

// ---------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(f64),
    True,
    False,
    Null,
    In,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
    End,
}

fn lex(input: &str) -> Result<Vec<Tok>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    let mut toks = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '.' => {
                toks.push(Tok::Dot);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                toks.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                toks.push(Tok::RBracket);
                i += 1;
            }
            '=' if chars.get(i + 1) == Some(&'=') => {
                toks.push(Tok::EqEq);
                i += 2;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                toks.push(Tok::NotEq);
                i += 2;
            }
            '!' => {
                toks.push(Tok::Bang);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                toks.push(Tok::AndAnd);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                toks.push(Tok::OrOr);
                i += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        Some(&q) if q == quote => {
                            i += 1;
                            break;
                        }
                        Some(&'\\') => {
                            i += 1;
                            match chars.get(i) {
                                Some(&esc) => {
                                    s.push(match esc {
                                        'n' => '\n',
                                        't' => '\t',
                                        other => other,
                                    });
                                    i += 1;
                                }
                                None => return Err("unterminated escape in string".to_string()),
                            }
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                toks.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| format!("invalid number literal '{text}'"))?;
                toks.push(Tok::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                toks.push(match text.as_str() {
                    "true" => Tok::True,
                    "false" => Tok::False,
                    "null" => Tok::Null,
                    "in" => Tok::In,
                    _ => Tok::Ident(text),
                });
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    toks.push(Tok::End);
    Ok(toks)
}

// ---------------------------------------------------------------------
// Recursive-descent parser
// precedence (lowest to highest): || , && , == != , in , unary ! , postfix . / ()
// ---------------------------------------------------------------------

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos]
    }

    fn advance(&mut self) -> Tok {
        let t = self.toks[self.pos].clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, t: &Tok) -> Result<(), String> {
        if self.peek() == t {
            self.advance();
            Ok(())
        } else {
            Err(format!("expected {t:?}, found {:?}", self.peek()))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while *self.peek() == Tok::OrOr {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_eq()?;
        while *self.peek() == Tok::AndAnd {
            self.advance();
            let rhs = self.parse_eq()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_eq(&mut self) -> Result<Expr, String> {
        let lhs = self.parse_in()?;
        match self.peek() {
            Tok::EqEq => {
                self.advance();
                let rhs = self.parse_in()?;
                Ok(Expr::Eq(Box::new(lhs), Box::new(rhs)))
            }
            Tok::NotEq => {
                self.advance();
                let rhs = self.parse_in()?;
                Ok(Expr::Ne(Box::new(lhs), Box::new(rhs)))
            }
            _ => Ok(lhs),
        }
    }

    fn parse_in(&mut self) -> Result<Expr, String> {
        let lhs = self.parse_unary()?;
        if *self.peek() == Tok::In {
            self.advance();
            let rhs = self.parse_unary()?;
            Ok(Expr::In(Box::new(lhs), Box::new(rhs)))
        } else {
            Ok(lhs)
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if *self.peek() == Tok::Bang {
            self.advance();
            let inner = self.parse_unary()?;
            Ok(Expr::Not(Box::new(inner)))
        } else {
            self.parse_postfix()
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            if *self.peek() == Tok::Dot {
                self.advance();
                let name = match self.advance() {
                    Tok::Ident(n) => n,
                    other => return Err(format!("expected field/method name, found {other:?}")),
                };
                if *self.peek() == Tok::LParen {
                    self.advance();
                    let mut args = Vec::new();
                    if *self.peek() != Tok::RParen {
                        args.push(self.parse_or()?);
                        while *self.peek() == Tok::Comma {
                            self.advance();
                            args.push(self.parse_or()?);
                        }
                    }
                    self.expect(&Tok::RParen)?;
                    expr = Expr::MethodCall(Box::new(expr), name, args);
                } else {
                    expr = Expr::Field(Box::new(expr), name);
                }
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Tok::Ident(name) => Ok(Expr::Ident(name)),
            Tok::Str(s) => Ok(Expr::Lit(Json::String(s))),
            Tok::Num(n) => Ok(Expr::Lit(
                serde_json::Number::from_f64(n)
                    .map(Json::Number)
                    .unwrap_or(Json::Null),
            )),
            Tok::True => Ok(Expr::Lit(Json::Bool(true))),
            Tok::False => Ok(Expr::Lit(Json::Bool(false))),
            Tok::Null => Ok(Expr::Lit(Json::Null)),
            Tok::LParen => {
                let inner = self.parse_or()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Tok::LBracket => {
                let mut items = Vec::new();
                if *self.peek() != Tok::RBracket {
                    items.push(self.parse_or()?);
                    while *self.peek() == Tok::Comma {
                        self.advance();
                        items.push(self.parse_or()?);
                    }
                }
                self.expect(&Tok::RBracket)?;
                Ok(Expr::ListLit(items))
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }
}

fn parse(rule_text: &str) -> Result<Expr, String> {
    let toks = lex(rule_text)?;
    let mut parser = Parser { toks, pos: 0 };
    let expr = parser.parse_or()?;
    if *parser.peek() != Tok::End {
        return Err(format!("unexpected trailing token {:?}", parser.peek()));
    }
    Ok(expr)
}

// ---------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------

fn eval(
    expr: &Expr,
    root: &Json,
    limits: &EvaluationLimits,
    steps: &mut u64,
) -> Result<Json, EvalError> {
    *steps += 1;
    if *steps > limits.max_expr_steps {
        return Err(EvalError::StepBudgetExceeded {
            limit: limits.max_expr_steps,
        });
    }

    match expr {
        Expr::Lit(v) => Ok(v.clone()),
        Expr::Ident(name) => match root.as_object().and_then(|m| m.get(name)) {
            Some(v) => Ok(v.clone()),
            None => Err(EvalError::NoSuchAttribute {
                rule: String::new(),
                path: name.clone(),
            }),
        },
        Expr::Field(base, name) => {
            let base_val = eval(base, root, limits, steps)?;
            match base_val.as_object().and_then(|m| m.get(name)) {
                Some(v) => Ok(v.clone()),
                None => Err(EvalError::NoSuchAttribute {
                    rule: String::new(),
                    path: describe(base).map_or_else(|| name.clone(), |b| format!("{b}.{name}")),
                }),
            }
        }
        Expr::Not(inner) => {
            let v = eval(inner, root, limits, steps)?;
            match v {
                Json::Bool(b) => Ok(Json::Bool(!b)),
                _ => Err(EvalError::RuleTypeError { rule: String::new() }),
            }
        }
        Expr::Eq(a, b) => {
            let va = eval(a, root, limits, steps)?;
            let vb = eval(b, root, limits, steps)?;
            Ok(Json::Bool(json_eq(&va, &vb)))
        }
        Expr::Ne(a, b) => {
            let va = eval(a, root, limits, steps)?;
            let vb = eval(b, root, limits, steps)?;
            Ok(Json::Bool(!json_eq(&va, &vb)))
        }
        Expr::And(a, b) => {
            let va = as_bool(&eval(a, root, limits, steps)?)?;
            if !va {
                return Ok(Json::Bool(false));
            }
            let vb = as_bool(&eval(b, root, limits, steps)?)?;
            Ok(Json::Bool(vb))
        }
        Expr::Or(a, b) => {
            let va = as_bool(&eval(a, root, limits, steps)?)?;
            if va {
                return Ok(Json::Bool(true));
            }
            let vb = as_bool(&eval(b, root, limits, steps)?)?;
            Ok(Json::Bool(vb))
        }
        Expr::In(needle, haystack) => {
            let v = eval(needle, root, limits, steps)?;
            let h = eval(haystack, root, limits, steps)?;
            match h {
                Json::Array(items) => Ok(Json::Bool(items.iter().any(|item| json_eq(item, &v)))),
                Json::Object(map) => {
                    if let Json::String(key) = &v {
                        Ok(Json::Bool(map.contains_key(key)))
                    } else {
                        Ok(Json::Bool(false))
                    }
                }
                Json::String(s) => {
                    if let Json::String(needle_s) = &v {
                        Ok(Json::Bool(s.contains(needle_s.as_str())))
                    } else {
                        Ok(Json::Bool(false))
                    }
                }
                _ => Ok(Json::Bool(false)),
            }
        }
        Expr::ListLit(items) => {
            let values: Result<Vec<Json>, EvalError> =
                items.iter().map(|e| eval(e, root, limits, steps)).collect();
            Ok(Json::Array(values?))
        }
        Expr::MethodCall(base, name, args) => {
            let base_val = eval(base, root, limits, steps)?;
            let arg_vals: Result<Vec<Json>, EvalError> = args
                .iter()
                .map(|a| eval(a, root, limits, steps))
                .collect();
            let arg_vals = arg_vals?;
            call_method(&base_val, name, &arg_vals)
        }
    }
}

/// Numeric-aware equality: JSON numbers compare by value (as `f64`)
/// regardless of whether they were constructed as an integer or a float
/// literal, so `subject.size() == 1` compares equal to the integer literal
/// `1` even though the two may use different internal `Number`
/// representations.
fn json_eq(a: &Json, b: &Json) -> bool {
    match (a, b) {
        (Json::Number(x), Json::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn as_bool(v: &Json) -> Result<bool, EvalError> {
    match v {
        Json::Bool(b) => Ok(*b),
        _ => Err(EvalError::RuleTypeError { rule: String::new() }),
    }
}

fn call_method(base: &Json, name: &str, args: &[Json]) -> Result<Json, EvalError> {
    match name {
        "startsWith" => {
            let (s, arg) = string_args(base, args)?;
            Ok(Json::Bool(s.starts_with(&arg)))
        }
        "endsWith" => {
            let (s, arg) = string_args(base, args)?;
            Ok(Json::Bool(s.ends_with(&arg)))
        }
        "contains" => {
            let (s, arg) = string_args(base, args)?;
            Ok(Json::Bool(s.contains(&arg)))
        }
        "size" => match base {
            Json::Array(items) => Ok(Json::Number(items.len().into())),
            Json::String(s) => Ok(Json::Number(s.chars().count().into())),
            Json::Object(map) => Ok(Json::Number(map.len().into())),
            _ => Err(EvalError::RuleTypeError { rule: String::new() }),
        },
        other => Err(EvalError::RuleSyntaxError {
            rule: String::new(),
            reason: format!("unknown method '{other}'"),
        }),
    }
}

fn string_args(base: &Json, args: &[Json]) -> Result<(String, String), EvalError> {
    let s = match base {
        Json::String(s) => s.clone(),
        _ => return Err(EvalError::RuleTypeError { rule: String::new() }),
    };
    let arg = match args.first() {
        Some(Json::String(a)) => a.clone(),
        _ => {
            return Err(EvalError::RuleSyntaxError {
                rule: String::new(),
                reason: "expected a single string argument".to_string(),
            })
        }
    };
    Ok((s, arg))
}

fn describe(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident(n) => Some(n.clone()),
        Expr::Field(base, n) => describe(base).map(|b| format!("{b}.{n}")),
        _ => None,
    }
}
