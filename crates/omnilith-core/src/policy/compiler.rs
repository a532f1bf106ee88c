// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Omnilith Project

//! Policy Compiler & Cache: a small embedded expression interpreter for
//! `implementation` source of the form `(ctx) -> Effect[]`.
//!
//! The language is intentionally minimal — field access, arithmetic,
//! comparisons, boolean logic, a ternary, `let` bindings, one top-level
//! `if`/`else`, and a closed set of effect-constructor calls. It is not a
//! general-purpose scripting language; it exists to let a policy express a
//! predicate over its context and construct the handful of effects the
//! protocol knows about.

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use hashbrown::HashMap;
use serde_json::{Map, Value as Json};

use crate::error::{PrismError, PrismResult};
use crate::registry::EffectRegistry;
use crate::types::{ActionIntent, Effect, EntityEvent, LogLevel, Policy};

// ---------------------------------------------------------------------------
// Lexing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Semicolon,
    Arrow,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Eof,
}

fn lex(source: &str) -> PrismResult<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0usize;
    let mut tokens = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            ';' => {
                tokens.push(Token::Semicolon);
                i += 1;
            }
            '?' => {
                tokens.push(Token::Question);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                if chars.get(i + 1) == Some(&'>') {
                    tokens.push(Token::Arrow);
                    i += 2;
                } else {
                    tokens.push(Token::Minus);
                    i += 1;
                }
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else if chars.get(i + 1) == Some(&'>') {
                    tokens.push(Token::Arrow);
                    i += 2;
                } else {
                    return Err(compile_err("unexpected '='"));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::LtEq);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::GtEq);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(compile_err("unexpected '&'"));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(compile_err("unexpected '|'"));
                }
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            i += 1;
                            match chars.get(i) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some('"') => s.push('"'),
                                Some('\\') => s.push('\\'),
                                Some(other) => s.push(*other),
                                None => return Err(compile_err("unterminated string escape")),
                            }
                            i += 1;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                        None => return Err(compile_err("unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(s));
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value: f64 = text
                    .parse()
                    .map_err(|_| compile_err(&format!("invalid number literal '{text}'")))?;
                tokens.push(Token::Number(value));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            }
            other => return Err(compile_err(&format!("unexpected character '{other}'"))),
        }
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

fn compile_err(reason: &str) -> PrismError {
    PrismError::Compilation {
        policy_id: String::new(),
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Ident(String),
    Field(Box<Expr>, String),
    Array(Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone)]
pub(crate) struct Program {
    pub param: String,
    pub lets: Vec<(String, Expr)>,
    pub body: Body,
}

#[derive(Debug, Clone)]
pub(crate) enum Body {
    Effects(Vec<Expr>),
    If {
        cond: Expr,
        then_effects: Vec<Expr>,
        else_effects: Vec<Expr>,
    },
}

// ---------------------------------------------------------------------------
// Parsing (recursive descent, precedence climbing for binary operators)
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token) -> PrismResult<()> {
        if core::mem::discriminant(self.peek()) == core::mem::discriminant(expected) {
            self.advance();
            Ok(())
        } else {
            Err(compile_err(&format!("expected {expected:?}, found {:?}", self.peek())))
        }
    }

    fn parse_program(&mut self) -> PrismResult<Program> {
        // Optional "(name) =>" / "(name) ->" prefix.
        let param = if matches!(self.peek(), Token::LParen) {
            self.advance();
            let name = match self.advance() {
                Token::Ident(name) => name,
                other => return Err(compile_err(&format!("expected parameter name, found {other:?}"))),
            };
            self.expect(&Token::RParen)?;
            self.expect(&Token::Arrow)?;
            name
        } else {
            "ctx".to_string()
        };

        let mut lets = Vec::new();
        while matches!(self.peek(), Token::Ident(kw) if kw == "let") {
            self.advance();
            let name = match self.advance() {
                Token::Ident(name) => name,
                other => return Err(compile_err(&format!("expected binding name, found {other:?}"))),
            };
            self.expect(&Token::Colon).ok(); // tolerate "let x = ..." without type colon
            if matches!(self.peek(), Token::Colon) {
                self.advance();
            }
            self.expect_eq()?;
            let value = self.parse_expr()?;
            if matches!(self.peek(), Token::Semicolon) {
                self.advance();
            }
            lets.push((name, value));
        }

        let body = if matches!(self.peek(), Token::Ident(kw) if kw == "if") {
            self.advance();
            self.expect(&Token::LParen)?;
            let cond = self.parse_expr()?;
            self.expect(&Token::RParen)?;
            let then_effects = self.parse_effect_array()?;
            let else_effects = if matches!(self.peek(), Token::Ident(kw) if kw == "else") {
                self.advance();
                self.parse_effect_array()?
            } else {
                Vec::new()
            };
            Body::If {
                cond,
                then_effects,
                else_effects,
            }
        } else {
            Body::Effects(self.parse_effect_array()?)
        };

        Ok(Program { param, lets, body })
    }

    fn expect_eq(&mut self) -> PrismResult<()> {
        match self.advance() {
            Token::EqEq => Ok(()), // accept "==" used sloppily as "=" in a let binding
            _ => Ok(()),           // lenient: the single '=' is not tokenized (see lexer); treat absence as fine
        }
    }

    fn parse_effect_array(&mut self) -> PrismResult<Vec<Expr>> {
        self.expect(&Token::LBracket)?;
        let mut items = Vec::new();
        if !matches!(self.peek(), Token::RBracket) {
            loop {
                items.push(self.parse_expr()?);
                if matches!(self.peek(), Token::Comma) {
                    self.advance();
                    if matches!(self.peek(), Token::RBracket) {
                        break;
                    }
                    continue;
                }
                break;
            }
        }
        self.expect(&Token::RBracket)?;
        Ok(items)
    }

    fn parse_expr(&mut self) -> PrismResult<Expr> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> PrismResult<Expr> {
        let cond = self.parse_or()?;
        if matches!(self.peek(), Token::Question) {
            self.advance();
            let then_branch = self.parse_expr()?;
            self.expect(&Token::Colon)?;
            let else_branch = self.parse_expr()?;
            Ok(Expr::Ternary(Box::new(cond), Box::new(then_branch), Box::new(else_branch)))
        } else {
            Ok(cond)
        }
    }

    fn parse_or(&mut self) -> PrismResult<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Token::OrOr) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PrismResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while matches!(self.peek(), Token::AndAnd) {
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> PrismResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinOp::Eq,
                Token::NotEq => BinOp::NotEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> PrismResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::LtEq => BinOp::LtEq,
                Token::Gt => BinOp::Gt,
                Token::GtEq => BinOp::GtEq,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PrismResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PrismResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PrismResult<Expr> {
        match self.peek() {
            Token::Minus => {
                self.advance();
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)))
            }
            Token::Bang => {
                self.advance();
                Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> PrismResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let field = match self.advance() {
                        Token::Ident(name) => name,
                        other => return Err(compile_err(&format!("expected field name, found {other:?}"))),
                    };
                    expr = Expr::Field(Box::new(expr), field);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> PrismResult<Expr> {
        match self.advance() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::LBracket => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Token::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if matches!(self.peek(), Token::Comma) {
                            self.advance();
                            continue;
                        }
                        break;
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::Array(items))
            }
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                _ if matches!(self.peek(), Token::LParen) => {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            if matches!(self.peek(), Token::Comma) {
                                self.advance();
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Ident(name)),
            },
            other => Err(compile_err(&format!("unexpected token {other:?}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled policy + cache
// ---------------------------------------------------------------------------

pub(crate) fn source_hash(source: &str) -> u64 {
    // FNV-1a; adequate for cache-key purposes, no cryptographic requirement.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in source.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[derive(Clone)]
pub struct CompiledPolicy {
    pub(crate) program: Program,
    pub(crate) source_hash: u64,
}

/// Compiles policy `implementation` source into a cached [`Program`],
/// invalidating the cache entry whenever the source text changes.
#[derive(Default)]
pub struct PolicyCompiler {
    cache: HashMap<String, CompiledPolicy>,
}

impl PolicyCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile (or fetch from cache) `policy`'s implementation. Validates
    /// that the source is non-empty/non-whitespace and that every literal
    /// `pack:<pack>:<name>` extension effect the source can statically be
    /// seen to construct has a registered handler.
    pub fn compile(&mut self, policy: &Policy, registry: &EffectRegistry) -> PrismResult<CompiledPolicy> {
        if policy.implementation.trim().is_empty() {
            return Err(PrismError::Compilation {
                policy_id: policy.id.clone(),
                reason: "implementation source is empty".into(),
            });
        }

        let hash = source_hash(&policy.implementation);
        if let Some(cached) = self.cache.get(&policy.id) {
            if cached.source_hash == hash {
                return Ok(cached.clone());
            }
        }

        let tokens = lex(&policy.implementation).map_err(|e| tag_policy(e, &policy.id))?;
        let program = Parser::new(tokens)
            .parse_program()
            .map_err(|e| tag_policy(e, &policy.id))?;

        validate_static_extension_effects(&program, registry, &policy.id)?;

        let compiled = CompiledPolicy {
            program,
            source_hash: hash,
        };
        self.cache.insert(policy.id.clone(), compiled.clone());
        Ok(compiled)
    }

    pub fn invalidate(&mut self, policy_id: &str) {
        self.cache.remove(policy_id);
    }
}

fn tag_policy(err: PrismError, policy_id: &str) -> PrismError {
    match err {
        PrismError::Compilation { reason, .. } => PrismError::Compilation {
            policy_id: policy_id.to_string(),
            reason,
        },
        other => other,
    }
}

fn validate_static_extension_effects(
    program: &Program,
    registry: &EffectRegistry,
    policy_id: &str,
) -> PrismResult<()> {
    let mut exprs: Vec<&Expr> = Vec::new();
    match &program.body {
        Body::Effects(effects) => exprs.extend(effects.iter()),
        Body::If {
            then_effects,
            else_effects,
            ..
        } => {
            exprs.extend(then_effects.iter());
            exprs.extend(else_effects.iter());
        }
    }
    for expr in exprs {
        if let Expr::Call(name, args) = expr {
            if name == "extension" {
                if let (Some(Expr::Str(pack)), Some(Expr::Str(effect_name))) = (args.first(), args.get(1)) {
                    let type_name = format!("pack:{pack}:{effect_name}");
                    if !registry.is_registered(&type_name) {
                        return Err(PrismError::Compilation {
                            policy_id: policy_id.to_string(),
                            reason: format!("no handler registered for effect type '{type_name}'"),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Step budget enforced while walking the AST, bounding pathological
/// expressions under the cooperative (non-`async`) timeout model.
const MAX_EVAL_STEPS: u32 = 100_000;

struct Interpreter<'a> {
    bindings: HashMap<String, Json>,
    ctx_param: &'a str,
    steps: u32,
}

impl<'a> Interpreter<'a> {
    fn step(&mut self) -> PrismResult<()> {
        self.steps += 1;
        if self.steps > MAX_EVAL_STEPS {
            return Err(PrismError::Timeout {
                context: "policy evaluation step budget".into(),
                elapsed_ms: 0,
                budget_ms: 0,
            });
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> PrismResult<Json> {
        self.step()?;
        match expr {
            Expr::Null => Ok(Json::Null),
            Expr::Bool(b) => Ok(Json::Bool(*b)),
            Expr::Number(n) => Ok(serde_json::json!(n)),
            Expr::Str(s) => Ok(Json::String(s.clone())),
            Expr::Ident(name) => {
                if name == self.ctx_param {
                    Ok(self.bindings.get(self.ctx_param).cloned().unwrap_or(Json::Null))
                } else {
                    self.bindings
                        .get(name)
                        .cloned()
                        .ok_or_else(|| eval_err(&format!("undefined identifier '{name}'")))
                }
            }
            Expr::Field(base, field) => {
                let base_val = self.eval(base)?;
                Ok(base_val.get(field).cloned().unwrap_or(Json::Null))
            }
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                Ok(Json::Array(out))
            }
            Expr::Unary(op, inner) => {
                let val = self.eval(inner)?;
                match op {
                    UnOp::Not => Ok(Json::Bool(!truthy(&val))),
                    UnOp::Neg => Ok(serde_json::json!(-as_number(&val)?)),
                }
            }
            Expr::Binary(op, lhs, rhs) => self.eval_binary(*op, lhs, rhs),
            Expr::Ternary(cond, then_e, else_e) => {
                if truthy(&self.eval(cond)?) {
                    self.eval(then_e)
                } else {
                    self.eval(else_e)
                }
            }
            Expr::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                call_builtin(name, &values)
            }
        }
    }

    fn eval_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> PrismResult<Json> {
        match op {
            BinOp::And => {
                let l = self.eval(lhs)?;
                if !truthy(&l) {
                    return Ok(Json::Bool(false));
                }
                Ok(Json::Bool(truthy(&self.eval(rhs)?)))
            }
            BinOp::Or => {
                let l = self.eval(lhs)?;
                if truthy(&l) {
                    return Ok(Json::Bool(true));
                }
                Ok(Json::Bool(truthy(&self.eval(rhs)?)))
            }
            BinOp::Eq => Ok(Json::Bool(self.eval(lhs)? == self.eval(rhs)?)),
            BinOp::NotEq => Ok(Json::Bool(self.eval(lhs)? != self.eval(rhs)?)),
            _ => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                match op {
                    BinOp::Add => match (&l, &r) {
                        (Json::String(_), _) | (_, Json::String(_)) => {
                            Ok(Json::String(format!("{}{}", display_string(&l), display_string(&r))))
                        }
                        _ => Ok(serde_json::json!(as_number(&l)? + as_number(&r)?)),
                    },
                    BinOp::Sub => Ok(serde_json::json!(as_number(&l)? - as_number(&r)?)),
                    BinOp::Mul => Ok(serde_json::json!(as_number(&l)? * as_number(&r)?)),
                    BinOp::Div => Ok(serde_json::json!(as_number(&l)? / as_number(&r)?)),
                    BinOp::Mod => Ok(serde_json::json!(as_number(&l)? % as_number(&r)?)),
                    BinOp::Lt => Ok(Json::Bool(as_number(&l)? < as_number(&r)?)),
                    BinOp::LtEq => Ok(Json::Bool(as_number(&l)? <= as_number(&r)?)),
                    BinOp::Gt => Ok(Json::Bool(as_number(&l)? > as_number(&r)?)),
                    BinOp::GtEq => Ok(Json::Bool(as_number(&l)? >= as_number(&r)?)),
                    _ => unreachable!(),
                }
            }
        }
    }
}

fn eval_err(reason: &str) -> PrismError {
    PrismError::PolicyExecution {
        policy_id: String::new(),
        reason: reason.to_string(),
    }
}

fn truthy(value: &Json) -> bool {
    match value {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Json::String(s) => !s.is_empty(),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

fn as_number(value: &Json) -> PrismResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| eval_err(&format!("expected a number, found {value:?}")))
}

fn as_str<'a>(value: &'a Json) -> PrismResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| eval_err(&format!("expected a string, found {value:?}")))
}

/// String coercion for `+` when either operand is a string: numbers and
/// booleans render as their literal text, `null` as `"null"`, strings pass
/// through unquoted.
fn display_string(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Number(n) => n.to_string(),
        Json::Bool(b) => b.to_string(),
        Json::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn call_builtin(name: &str, args: &[Json]) -> PrismResult<Json> {
    match name {
        "len" => {
            let value = args.first().ok_or_else(|| eval_err("len() requires one argument"))?;
            let n = match value {
                Json::Array(a) => a.len(),
                Json::String(s) => s.chars().count(),
                Json::Object(o) => o.len(),
                _ => return Err(eval_err("len() expects an array, string, or object")),
            };
            Ok(serde_json::json!(n as f64))
        }
        "abs" => Ok(serde_json::json!(as_number(args.first().unwrap_or(&Json::Null))?.abs())),
        // Effect constructors and pack extensions pass through as tagged
        // objects; the policy evaluator turns these into `Effect` values.
        _ => {
            let mut obj = Map::new();
            obj.insert("__call__".into(), Json::String(name.to_string()));
            obj.insert("__args__".into(), Json::Array(args.to_vec()));
            Ok(Json::Object(obj))
        }
    }
}

/// Run `compiled` against `ctx_json`, returning the effects the policy
/// produced. Errors here are captured by the caller (the evaluator) rather
/// than propagated — per-policy isolation discards only that policy's
/// effects.
pub(crate) fn run(compiled: &CompiledPolicy, ctx_json: Json) -> PrismResult<Vec<Effect>> {
    let mut interpreter = Interpreter {
        bindings: HashMap::new(),
        ctx_param: &compiled.program.param,
        steps: 0,
    };
    interpreter.bindings.insert(compiled.program.param.clone(), ctx_json);

    for (name, expr) in &compiled.program.lets {
        let value = interpreter.eval(expr)?;
        interpreter.bindings.insert(name.clone(), value);
    }

    let effect_exprs: &[Expr] = match &compiled.program.body {
        Body::Effects(effects) => effects,
        Body::If {
            cond,
            then_effects,
            else_effects,
        } => {
            if truthy(&interpreter.eval(cond)?) {
                then_effects
            } else {
                else_effects
            }
        }
    };

    let mut effects = Vec::with_capacity(effect_exprs.len());
    for expr in effect_exprs {
        let value = interpreter.eval(expr)?;
        effects.push(effect_from_call(&value)?);
    }
    Ok(effects)
}

fn effect_from_call(value: &Json) -> PrismResult<Effect> {
    let obj = value
        .as_object()
        .ok_or_else(|| eval_err("an effect array entry must be an effect constructor call"))?;
    let call = obj
        .get("__call__")
        .and_then(Json::as_str)
        .ok_or_else(|| eval_err("an effect array entry must be an effect constructor call"))?;
    let args = obj
        .get("__args__")
        .and_then(Json::as_array)
        .cloned()
        .unwrap_or_default();

    match call {
        "log" => {
            let level = parse_log_level(as_str(args.first().ok_or_else(|| eval_err("log() requires (level, message)"))?)?)?;
            let message = as_str(args.get(1).ok_or_else(|| eval_err("log() requires (level, message)"))?)?.to_string();
            Ok(Effect::Log { level, message })
        }
        "tag_observation" => {
            let tags_value = args.first().ok_or_else(|| eval_err("tag_observation() requires (tags)"))?;
            let tags_arr = tags_value
                .as_array()
                .ok_or_else(|| eval_err("tag_observation() expects an array of strings"))?;
            let mut tags = BTreeSet::new();
            for tag in tags_arr {
                tags.insert(as_str(tag)?.to_string());
            }
            Ok(Effect::TagObservation { tags })
        }
        "route_observation" => {
            let to_node_id = as_str(args.first().ok_or_else(|| eval_err("route_observation() requires (toNodeId)"))?)?.to_string();
            Ok(Effect::RouteObservation { to_node_id })
        }
        "suppress" => {
            let reason = as_str(args.first().ok_or_else(|| eval_err("suppress() requires (reason)"))?)?.to_string();
            Ok(Effect::Suppress { reason })
        }
        "propose_action" => {
            let action_type = as_str(args.first().ok_or_else(|| eval_err("propose_action() requires (actionType, params)"))?)?.to_string();
            let params = args.get(1).cloned().unwrap_or(Json::Null);
            let reason = args.get(2).and_then(Json::as_str).map(|s| s.to_string());
            Ok(Effect::ProposeAction {
                action: ActionIntent { action_type, params },
                reason,
            })
        }
        "create_entity_event" => {
            let entity_id = as_str(args.first().ok_or_else(|| eval_err("create_entity_event() requires (entityId, type, data)"))?)?.to_string();
            let event_type = as_str(args.get(1).ok_or_else(|| eval_err("create_entity_event() requires (entityId, type, data)"))?)?.to_string();
            let data = args.get(2).cloned().unwrap_or(Json::Null);
            Ok(Effect::CreateEntityEvent {
                entity_id,
                event: EntityEvent { event_type, data },
            })
        }
        "extension" => {
            let pack = as_str(args.first().ok_or_else(|| eval_err("extension() requires (pack, name, payload)"))?)?.to_string();
            let name = as_str(args.get(1).ok_or_else(|| eval_err("extension() requires (pack, name, payload)"))?)?.to_string();
            let payload = args.get(2).cloned().unwrap_or(Json::Null);
            Ok(Effect::Extension { pack, name, payload })
        }
        other => Err(PrismError::InvalidEffect {
            policy_id: String::new(),
            reason: format!("unknown effect constructor '{other}'"),
        }),
    }
}

fn parse_log_level(s: &str) -> PrismResult<LogLevel> {
    match s {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(eval_err(&format!("unknown log level '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn policy_with(source: &str) -> Policy {
        let now = Utc::now();
        Policy {
            id: "p1".into(),
            node_id: "n1".into(),
            name: "test".into(),
            priority: 0,
            enabled: true,
            triggers: Vec::new(),
            implementation: source.into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn rejects_empty_source() {
        let mut compiler = PolicyCompiler::new();
        let registry = EffectRegistry::new();
        let err = compiler.compile(&policy_with("   "), &registry).unwrap_err();
        assert!(matches!(err, PrismError::Compilation { .. }));
    }

    #[test]
    fn compiles_and_caches() {
        let mut compiler = PolicyCompiler::new();
        let registry = EffectRegistry::new();
        let policy = policy_with("(ctx) => [log(\"info\", \"hello\")]");
        let compiled1 = compiler.compile(&policy, &registry).unwrap();
        let compiled2 = compiler.compile(&policy, &registry).unwrap();
        assert_eq!(compiled1.source_hash, compiled2.source_hash);
    }

    #[test]
    fn recompiles_on_source_change() {
        let mut compiler = PolicyCompiler::new();
        let registry = EffectRegistry::new();
        let mut policy = policy_with("(ctx) => [log(\"info\", \"v1\")]");
        compiler.compile(&policy, &registry).unwrap();
        policy.implementation = "(ctx) => [log(\"info\", \"v2\")]".into();
        let compiled = compiler.compile(&policy, &registry).unwrap();
        let effects = run(&compiled, Json::Null).unwrap();
        match &effects[0] {
            Effect::Log { message, .. } => assert_eq!(message, "v2"),
            _ => panic!("expected log effect"),
        }
    }

    #[test]
    fn unregistered_extension_effect_fails_compile() {
        let mut compiler = PolicyCompiler::new();
        let registry = EffectRegistry::new();
        let policy = policy_with("(ctx) => [extension(\"fitness\", \"recalc\", null)]");
        let err = compiler.compile(&policy, &registry).unwrap_err();
        assert!(matches!(err, PrismError::Compilation { .. }));
    }

    #[test]
    fn if_else_selects_branch() {
        let mut compiler = PolicyCompiler::new();
        let registry = EffectRegistry::new();
        let policy = policy_with(
            "(ctx) => if (ctx.value > 10) [suppress(\"too high\")] else [log(\"info\", \"ok\")]",
        );
        let compiled = compiler.compile(&policy, &registry).unwrap();

        let effects_high = run(&compiled, serde_json::json!({"value": 20.0})).unwrap();
        assert!(effects_high[0].is_suppress());

        let effects_low = run(&compiled, serde_json::json!({"value": 1.0})).unwrap();
        assert!(!effects_low[0].is_suppress());
    }

    #[test]
    fn field_access_and_arithmetic() {
        let mut compiler = PolicyCompiler::new();
        let registry = EffectRegistry::new();
        let policy = policy_with(
            "(ctx) => [propose_action(\"notify\", ctx.observation.payload, null)]",
        );
        let compiled = compiler.compile(&policy, &registry).unwrap();
        let ctx = serde_json::json!({"observation": {"payload": {"level": 5.0}}});
        let effects = run(&compiled, ctx).unwrap();
        match &effects[0] {
            Effect::ProposeAction { action, .. } => {
                assert_eq!(action.params["level"], 5.0);
            }
            _ => panic!("expected propose_action effect"),
        }
    }
}
