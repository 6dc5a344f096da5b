//! A small interpreted language for index-definition `make_key_value`
//! and `make_key` function bodies (spec.md §6), grounded on the shape
//! of the compiled index classes in
//! `examples/original_source/tests/index_files/*.py`: a handful of
//! `let`/`if`/`return` statements over document fields, arithmetic and
//! comparison operators, and calls to a fixed helper catalogue
//! (`md5`, `infix`, `prefix`, `suffix`, `fix_r`, `tostr`).
//!
//! This is an interpreter, not a code generator: [parse] builds an
//! [Program] AST once at index-load time, and [Program::eval] walks it
//! per document. The code-generator that turns a friendlier DSL into
//! these function bodies is the external collaborator spec.md §1
//! excludes; this module only has to run the bodies it's given.

use std::collections::BTreeMap;

use crate::{document::Document, value::Value, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum Val {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Val {
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Null => false,
            Val::Bool(b) => *b,
            Val::Int(n) => *n != 0,
            Val::Float(n) => *n != 0.0,
            Val::Str(s) => !s.is_empty(),
            Val::Bytes(b) => !b.is_empty(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Val::Null => Vec::new(),
            Val::Bool(b) => vec![*b as u8],
            Val::Int(n) => n.to_be_bytes().to_vec(),
            Val::Float(n) => n.to_be_bytes().to_vec(),
            Val::Str(s) => s.as_bytes().to_vec(),
            Val::Bytes(b) => b.clone(),
        }
    }

    pub fn to_text(&self) -> String {
        match self {
            Val::Null => String::new(),
            Val::Bool(b) => b.to_string(),
            Val::Int(n) => n.to_string(),
            Val::Float(n) => n.to_string(),
            Val::Str(s) => s.clone(),
            Val::Bytes(b) => b.iter().map(|x| format!("{:02x}", x)).collect(),
        }
    }

    pub(crate) fn from_value(v: &Value) -> Val {
        match v {
            Value::Null => Val::Null,
            Value::Bool(b) => Val::Bool(*b),
            Value::Int(n) => Val::Int(*n),
            Value::Float(n) => Val::Float(*n),
            Value::Str(s) => Val::Str(s.clone()),
            Value::Bytes(b) => Val::Bytes(b.clone()),
            Value::List(_) | Value::Map(_) => Val::Null,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Clone, Debug)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Field(String),
    Var(String),
    Not(Box<Expr>),
    Bin(Box<Expr>, BinOp, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Clone, Debug)]
pub enum Stmt {
    Let(String, Expr),
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    Return(Option<Expr>),
}

#[derive(Clone, Debug)]
pub struct FnDef {
    pub param: String,
    pub body: Vec<Stmt>,
}

#[derive(Clone, Debug)]
pub struct Program {
    pub make_key_value: FnDef,
    pub make_key: FnDef,
}

enum Flow {
    Next,
    Return(Val),
}

impl Program {
    /// Run `make_key_value(doc)`, returning the projected value, or
    /// `None` if the function returned `null`. Left as a [Val] rather
    /// than bytes so [crate::registry::def::KeyFormat::encode] can
    /// dispatch on its numeric/textual shape.
    pub fn eval_make_key_value(&self, doc: &Document) -> Result<Option<Val>> {
        let mut env = Env::new(doc);
        match exec_block(&self.make_key_value.body, &mut env)? {
            Flow::Return(Val::Null) => Ok(None),
            Flow::Return(v) => Ok(Some(v)),
            Flow::Next => Ok(None),
        }
    }

    /// Run `make_key(key)` over an arbitrary caller-supplied lookup key
    /// (used by callers building a query key the same way the index
    /// would have projected it).
    pub fn eval_make_key(&self, key: &Val) -> Result<Val> {
        let mut env = Env::empty();
        env.locals.insert(self.make_key.param.clone(), key.clone());
        match exec_block(&self.make_key.body, &mut env)? {
            Flow::Return(v) => Ok(v),
            Flow::Next => Ok(Val::Null),
        }
    }
}

struct Env<'a> {
    doc: Option<&'a Document>,
    locals: BTreeMap<String, Val>,
}

impl<'a> Env<'a> {
    fn new(doc: &'a Document) -> Env<'a> {
        Env {
            doc: Some(doc),
            locals: BTreeMap::new(),
        }
    }

    fn empty() -> Env<'static> {
        Env {
            doc: None,
            locals: BTreeMap::new(),
        }
    }
}

fn exec_block(stmts: &[Stmt], env: &mut Env) -> Result<Flow> {
    for stmt in stmts {
        match stmt {
            Stmt::Let(name, expr) => {
                let v = eval_expr(expr, env)?;
                env.locals.insert(name.clone(), v);
            }
            Stmt::If(cond, then_b, else_b) => {
                let c = eval_expr(cond, env)?;
                let flow = if c.is_truthy() {
                    exec_block(then_b, env)?
                } else {
                    exec_block(else_b, env)?
                };
                if let Flow::Return(_) = flow {
                    return Ok(flow);
                }
            }
            Stmt::Return(None) => return Ok(Flow::Return(Val::Null)),
            Stmt::Return(Some(expr)) => return Ok(Flow::Return(eval_expr(expr, env)?)),
        }
    }
    Ok(Flow::Next)
}

fn eval_expr(expr: &Expr, env: &Env) -> Result<Val> {
    match expr {
        Expr::Null => Ok(Val::Null),
        Expr::Bool(b) => Ok(Val::Bool(*b)),
        Expr::Int(n) => Ok(Val::Int(*n)),
        Expr::Float(n) => Ok(Val::Float(*n)),
        Expr::Str(s) => Ok(Val::Str(s.clone())),
        Expr::Field(name) => match env.doc {
            Some(doc) => Ok(doc.get(name).map(Val::from_value).unwrap_or(Val::Null)),
            None => err_at!(ValueException, msg: "doc.{} referenced outside make_key_value", name),
        },
        Expr::Var(name) => match env.locals.get(name) {
            Some(v) => Ok(v.clone()),
            None => err_at!(ValueException, msg: "undefined variable {:?}", name),
        },
        Expr::Not(inner) => Ok(Val::Bool(!eval_expr(inner, env)?.is_truthy())),
        Expr::Bin(lhs, op, rhs) => eval_bin(*op, eval_expr(lhs, env)?, eval_expr(rhs, env)?),
        Expr::Call(name, args) => {
            let vals = args.iter().map(|a| eval_expr(a, env)).collect::<Result<Vec<_>>>()?;
            call_fn(name, &vals)
        }
    }
}

fn eval_bin(op: BinOp, l: Val, r: Val) -> Result<Val> {
    use BinOp::*;
    match op {
        And => Ok(Val::Bool(l.is_truthy() && r.is_truthy())),
        Or => Ok(Val::Bool(l.is_truthy() || r.is_truthy())),
        Eq => Ok(Val::Bool(values_eq(&l, &r))),
        Ne => Ok(Val::Bool(!values_eq(&l, &r))),
        Add | Sub | Mul | Div | Lt | Le | Gt | Ge => match (as_f64(&l), as_f64(&r)) {
            (Some(a), Some(b)) => Ok(match op {
                Add => numeric(&l, &r, a + b),
                Sub => numeric(&l, &r, a - b),
                Mul => numeric(&l, &r, a * b),
                Div if b == 0.0 => err_at!(ValueException, msg: "division by zero"),
                Div => numeric(&l, &r, a / b),
                Lt => Val::Bool(a < b),
                Le => Val::Bool(a <= b),
                Gt => Val::Bool(a > b),
                Ge => Val::Bool(a >= b),
                Eq | Ne | And | Or => unreachable!(),
            }),
            _ => match op {
                Add if matches!(l, Val::Str(_)) || matches!(r, Val::Str(_)) => {
                    Ok(Val::Str(format!("{}{}", l.to_text(), r.to_text())))
                }
                _ => err_at!(ValueException, msg: "non-numeric operands to {:?}", op),
            },
        },
    }
}

fn numeric(l: &Val, r: &Val, f: f64) -> Val {
    match (l, r) {
        (Val::Float(_), _) | (_, Val::Float(_)) => Val::Float(f),
        _ => Val::Int(f as i64),
    }
}

fn as_f64(v: &Val) -> Option<f64> {
    match v {
        Val::Int(n) => Some(*n as f64),
        Val::Float(n) => Some(*n),
        _ => None,
    }
}

fn values_eq(l: &Val, r: &Val) -> bool {
    match (l, r) {
        (Val::Null, Val::Null) => true,
        (Val::Bool(a), Val::Bool(b)) => a == b,
        (Val::Str(a), Val::Str(b)) => a == b,
        (Val::Bytes(a), Val::Bytes(b)) => a == b,
        _ => match (as_f64(l), as_f64(r)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn call_fn(name: &str, args: &[Val]) -> Result<Val> {
    match name {
        "md5" => {
            let arg = args
                .first()
                .ok_or_else(|| crate::Error::FunctionException(format!("{}:{} md5 wants 1 arg", file!(), line!())))?;
            let digest = md5::compute(arg.to_bytes());
            Ok(Val::Str(format!("{:x}", digest)))
        }
        "tostr" => {
            let arg = args.first().ok_or_else(|| {
                crate::Error::FunctionException(format!("{}:{} tostr wants 1 arg", file!(), line!()))
            })?;
            Ok(Val::Str(arg.to_text()))
        }
        "infix" => match (args.get(0), args.get(1), args.get(2)) {
            (Some(s), Some(Val::Int(a)), Some(Val::Int(b))) => {
                let text = s.to_text();
                let (a, b) = (*a as usize, *b as usize);
                let end = b.min(text.len());
                let start = a.min(end);
                Ok(Val::Str(text[start..end].to_string()))
            }
            _ => err_at!(FunctionException, msg: "infix(str, start, end) arity/type mismatch"),
        },
        "prefix" => match (args.get(0), args.get(1)) {
            (Some(s), Some(Val::Int(n))) => {
                let text = s.to_text();
                let n = (*n as usize).min(text.len());
                Ok(Val::Str(text[..n].to_string()))
            }
            _ => err_at!(FunctionException, msg: "prefix(str, n) arity/type mismatch"),
        },
        "suffix" => match (args.get(0), args.get(1)) {
            (Some(s), Some(Val::Int(n))) => {
                let text = s.to_text();
                let n = (*n as usize).min(text.len());
                Ok(Val::Str(text[text.len() - n..].to_string()))
            }
            _ => err_at!(FunctionException, msg: "suffix(str, n) arity/type mismatch"),
        },
        "fix_r" => match (args.get(0), args.get(1)) {
            (Some(s), Some(Val::Int(width))) => {
                let mut bytes = s.to_bytes();
                let width = *width as usize;
                if bytes.len() > width {
                    let start = bytes.len() - width;
                    Ok(Val::Bytes(bytes.split_off(start)))
                } else {
                    let mut padded = vec![0u8; width - bytes.len()];
                    padded.extend_from_slice(&bytes);
                    Ok(Val::Bytes(padded))
                }
            }
            _ => err_at!(FunctionException, msg: "fix_r(str, width) arity/type mismatch"),
        },
        other => err_at!(FunctionException, msg: "unknown function {:?}", other),
    }
}

// ---------------------------------------------------------------------
// parser
// ---------------------------------------------------------------------

pub fn parse(source: &str) -> Result<Program> {
    let mut fns = std::collections::HashMap::new();
    let mut p = Parser::new(source)?;
    while !p.at_eof() {
        let (name, def) = p.parse_fn()?;
        fns.insert(name, def);
    }
    let make_key_value = fns
        .remove("make_key_value")
        .ok_or_else(|| crate::Error::ValueException("missing fn make_key_value".into()))?;
    let make_key = fns
        .remove("make_key")
        .ok_or_else(|| crate::Error::ValueException("missing fn make_key".into()))?;
    Ok(Program { make_key_value, make_key })
}

#[derive(Clone, Debug, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Sym(&'static str),
    Eof,
}

struct Parser {
    toks: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn new(src: &str) -> Result<Parser> {
        Ok(Parser { toks: lex(src)?, pos: 0 })
    }

    fn at_eof(&self) -> bool {
        matches!(self.toks.get(self.pos), None | Some(Tok::Eof))
    }

    fn peek(&self) -> Tok {
        self.toks.get(self.pos).cloned().unwrap_or(Tok::Eof)
    }

    fn bump(&mut self) -> Tok {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn expect_sym(&mut self, s: &'static str) -> Result<()> {
        match self.bump() {
            Tok::Sym(x) if x == s => Ok(()),
            other => err_at!(ValueException, msg: "expected {:?}, got {:?}", s, other),
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.bump() {
            Tok::Ident(s) => Ok(s),
            other => err_at!(ValueException, msg: "expected identifier, got {:?}", other),
        }
    }

    fn parse_fn(&mut self) -> Result<(String, FnDef)> {
        match self.bump() {
            Tok::Ident(kw) if kw == "fn" => {}
            other => err_at!(ValueException, msg: "expected 'fn', got {:?}", other),
        }
        let name = self.expect_ident()?;
        self.expect_sym("(")?;
        let param = self.expect_ident()?;
        self.expect_sym(")")?;
        self.expect_sym("{")?;
        let body = self.parse_block()?;
        self.expect_sym("}")?;
        Ok((name, FnDef { param, body }))
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        let mut out = Vec::new();
        loop {
            match self.peek() {
                Tok::Sym("}") | Tok::Eof => break,
                _ => out.push(self.parse_stmt()?),
            }
        }
        Ok(out)
    }

    fn parse_stmt(&mut self) -> Result<Stmt> {
        match self.peek() {
            Tok::Ident(kw) if kw == "let" => {
                self.bump();
                let name = self.expect_ident()?;
                self.expect_sym("=")?;
                let expr = self.parse_expr()?;
                Ok(Stmt::Let(name, expr))
            }
            Tok::Ident(kw) if kw == "if" => {
                self.bump();
                let cond = self.parse_expr()?;
                self.expect_sym("{")?;
                let then_b = self.parse_block()?;
                self.expect_sym("}")?;
                let else_b = if matches!(self.peek(), Tok::Ident(ref k) if k == "else") {
                    self.bump();
                    self.expect_sym("{")?;
                    let b = self.parse_block()?;
                    self.expect_sym("}")?;
                    b
                } else {
                    Vec::new()
                };
                Ok(Stmt::If(cond, then_b, else_b))
            }
            Tok::Ident(kw) if kw == "return" => {
                self.bump();
                if matches!(self.peek(), Tok::Ident(ref k) if k == "null") {
                    self.bump();
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.parse_expr()?)))
                }
            }
            other => err_at!(ValueException, msg: "unexpected statement start {:?}", other),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_and()?;
        while matches!(self.peek(), Tok::Sym("||")) {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Bin(Box::new(lhs), BinOp::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_cmp()?;
        while matches!(self.peek(), Tok::Sym("&&")) {
            self.bump();
            let rhs = self.parse_cmp()?;
            lhs = Expr::Bin(Box::new(lhs), BinOp::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr> {
        let lhs = self.parse_add()?;
        let op = match self.peek() {
            Tok::Sym("==") => Some(BinOp::Eq),
            Tok::Sym("!=") => Some(BinOp::Ne),
            Tok::Sym("<=") => Some(BinOp::Le),
            Tok::Sym(">=") => Some(BinOp::Ge),
            Tok::Sym("<") => Some(BinOp::Lt),
            Tok::Sym(">") => Some(BinOp::Gt),
            _ => None,
        };
        match op {
            Some(op) => {
                self.bump();
                let rhs = self.parse_add()?;
                Ok(Expr::Bin(Box::new(lhs), op, Box::new(rhs)))
            }
            None => Ok(lhs),
        }
    }

    fn parse_add(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Tok::Sym("+") => BinOp::Add,
                Tok::Sym("-") => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_mul()?;
            lhs = Expr::Bin(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_mul(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Tok::Sym("*") => BinOp::Mul,
                Tok::Sym("/") => BinOp::Div,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::Bin(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if matches!(self.peek(), Tok::Sym("!")) {
            self.bump();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.bump() {
            Tok::Int(n) => Ok(Expr::Int(n)),
            Tok::Float(n) => Ok(Expr::Float(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Sym("(") => {
                let e = self.parse_expr()?;
                self.expect_sym(")")?;
                Ok(e)
            }
            Tok::Ident(name) => match name.as_str() {
                "null" => Ok(Expr::Null),
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "doc" => {
                    self.expect_sym(".")?;
                    let field = self.expect_ident()?;
                    Ok(Expr::Field(field))
                }
                _ if matches!(self.peek(), Tok::Sym("(")) => {
                    self.bump();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), Tok::Sym(")")) {
                        args.push(self.parse_expr()?);
                        while matches!(self.peek(), Tok::Sym(",")) {
                            self.bump();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect_sym(")")?;
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Var(name)),
            },
            other => err_at!(ValueException, msg: "unexpected token {:?}", other),
        }
    }
}

fn lex(src: &str) -> Result<Vec<Tok>> {
    let bytes = src.as_bytes();
    let mut i = 0;
    let mut toks = Vec::new();
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '#' {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            let mut is_float = false;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                if bytes[i] == b'.' {
                    is_float = true;
                }
                i += 1;
            }
            let text = &src[start..i];
            if is_float {
                let v = err_at!(ValueException, text.parse::<f64>())?;
                toks.push(Tok::Float(v));
            } else {
                let v = err_at!(ValueException, text.parse::<i64>())?;
                toks.push(Tok::Int(v));
            }
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && ((bytes[i] as char).is_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            toks.push(Tok::Ident(src[start..i].to_string()));
            continue;
        }
        if c == '"' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i] != b'"' {
                i += 1;
            }
            if i >= bytes.len() {
                err_at!(ValueException, msg: "unterminated string literal")
            }
            toks.push(Tok::Str(src[start..i].to_string()));
            i += 1;
            continue;
        }
        let two = if i + 1 < bytes.len() { &src[i..i + 2] } else { "" };
        let sym: &'static str = match two {
            "==" => "==",
            "!=" => "!=",
            "<=" => "<=",
            ">=" => ">=",
            "&&" => "&&",
            "||" => "||",
            _ => match c {
                '(' => "(",
                ')' => ")",
                '{' => "{",
                '}' => "}",
                '.' => ".",
                ',' => ",",
                '=' => "=",
                '<' => "<",
                '>' => ">",
                '+' => "+",
                '-' => "-",
                '*' => "*",
                '/' => "/",
                '!' => "!",
                _ => err_at!(ValueException, msg: "unexpected character {:?}", c),
            },
        };
        i += sym.len();
        toks.push(Tok::Sym(sym));
    }
    toks.push(Tok::Eof);
    Ok(toks)
}

#[cfg(test)]
#[path = "lang_test.rs"]
mod lang_test;
