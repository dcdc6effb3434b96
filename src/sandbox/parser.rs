//! SF-011: Structural parse of a definition script.
//!
//! Top-level code, helper classes and every method other than the two
//! hooks are skipped token-wise by balancing `end`s and brackets; they are
//! never turned into a tree. The hooks of the single `SushiApp` subclass
//! are parsed into [`Stmt`] lists for the interpreter.

use super::lexer::{tokenize_at, StrPart, Tok, Token};
use super::{Budget, SandboxError};
use std::collections::HashSet;

/// Maximum nesting of expressions and statements.
pub const MAX_DEPTH: usize = 64;

/// Hooks that are executed, in order.
pub const HOOKS: [&str; 2] = ["initialize", "set_default_parameters"];

/// The application class found in a script.
#[derive(Debug, Clone, PartialEq)]
pub struct AppClass {
    pub class_name: String,
    pub line: usize,
    pub initialize: Option<Vec<Stmt>>,
    pub set_default_parameters: Option<Vec<Stmt>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Super,
    Assign { target: Target, value: Expr },
    /// `@list << value`
    Append { target: Target, value: Expr },
    If { cond: Expr, then: Vec<Stmt>, otherwise: Vec<Stmt> },
    Return,
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    IVar(String),
    Local(String),
    /// `@params[args] = value`; one argument writes a value, two write metadata
    Param(Vec<Expr>),
}

/// Segment of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum Seg {
    Lit(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Cmp,
    Match,
    NoMatch,
    BitOr,
    BitXor,
    BitAnd,
    Shl,
    Shr,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Cmp => "<=>",
            Self::Match => "=~",
            Self::NoMatch => "!~",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
            Self::Shl => "<<",
            Self::Shr => ">>",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Vec<Seg>),
    Array(Vec<Expr>),
    Hash(Vec<(Expr, Expr)>),
    IVar(String),
    Local(String),
    Const(String),
    Call { name: String, args: Vec<Expr> },
    Method { recv: Box<Expr>, name: String, args: Vec<Expr>, safe: bool },
    Index { recv: Box<Expr>, args: Vec<Expr> },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Ternary { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    /// Parsed but never evaluable (regex, backticks, globals, `self`)
    Opaque(&'static str),
}

enum Infix {
    And,
    Or,
    Bin(BinOp),
}

fn infix(tok: &Tok) -> Option<(Infix, u8, bool)> {
    let Tok::Punct(p) = tok else {
        return None;
    };
    let (op, prec) = match *p {
        "||" => return Some((Infix::Or, 1, false)),
        "&&" => return Some((Infix::And, 2, false)),
        "==" | "===" => (BinOp::Eq, 3),
        "!=" => (BinOp::Ne, 3),
        "<=>" => (BinOp::Cmp, 3),
        "=~" => (BinOp::Match, 3),
        "!~" => (BinOp::NoMatch, 3),
        "<" => (BinOp::Lt, 4),
        ">" => (BinOp::Gt, 4),
        "<=" => (BinOp::Le, 4),
        ">=" => (BinOp::Ge, 4),
        "|" => (BinOp::BitOr, 5),
        "^" => (BinOp::BitXor, 5),
        "&" => (BinOp::BitAnd, 6),
        "<<" => (BinOp::Shl, 7),
        ">>" => (BinOp::Shr, 7),
        "+" => (BinOp::Add, 8),
        "-" => (BinOp::Sub, 8),
        "*" => (BinOp::Mul, 9),
        "/" => (BinOp::Div, 9),
        "%" => (BinOp::Mod, 9),
        "**" => return Some((Infix::Bin(BinOp::Pow), 10, true)),
        _ => return None,
    };
    Some((Infix::Bin(op), prec, false))
}

/// Keywords that cannot start a command-call argument.
const NON_ARG_WORDS: &[&str] = &[
    "if", "unless", "while", "until", "and", "or", "then", "do", "end", "else", "elsif", "rescue",
    "ensure", "when", "in",
];

/// Keywords rejected where an expression or statement is expected.
const UNSUPPORTED: &[&str] = &[
    "while", "until", "for", "case", "begin", "def", "class", "module", "yield", "rescue", "ensure",
    "redo", "retry", "break", "next", "alias", "undef", "when", "do", "then", "in", "lambda", "proc",
];

fn syntax(line: usize, message: impl Into<String>) -> SandboxError {
    SandboxError::Syntax {
        line,
        message: message.into(),
    }
}

fn describe(tok: &Tok) -> String {
    match tok {
        Tok::Ident(s) | Tok::Const(s) => format!("`{}`", s),
        Tok::IVar(s) => format!("`@{}`", s),
        Tok::CVar(s) => format!("`@@{}`", s),
        Tok::GVar(s) => format!("`${}`", s),
        Tok::Symbol(s) => format!("`:{}`", s),
        Tok::Label(s) => format!("`{}:`", s),
        Tok::Str(_) => "string literal".to_string(),
        Tok::Words(_) => "word list".to_string(),
        Tok::Int(n) => format!("`{}`", n),
        Tok::Float(x) => format!("`{}`", x),
        Tok::Regex => "regular expression".to_string(),
        Tok::Command => "shell command".to_string(),
        Tok::Punct(p) => format!("`{}`", p),
        Tok::Newline => "end of line".to_string(),
        Tok::Eof => "end of file".to_string(),
    }
}

/// Locate the application class and parse its hooks.
pub fn parse_program(tokens: Vec<Token>, budget: &Budget) -> Result<AppClass, SandboxError> {
    let mut parser = Parser::new(tokens, budget);
    let mut found = None;
    parser.parse_scope(&mut found, true)?;
    found.ok_or_else(|| syntax(1, "no class inheriting from SushiApp found"))
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    budget: &'a Budget,
    depth: usize,
    locals: HashSet<String>,
    eof: Token,
}

impl<'a> Parser<'a> {
    fn new(tokens: Vec<Token>, budget: &'a Budget) -> Self {
        let last_line = tokens.last().map_or(1, |t| t.line);
        Self {
            tokens,
            pos: 0,
            budget,
            depth: 0,
            locals: HashSet::new(),
            eof: Token {
                tok: Tok::Eof,
                line: last_line,
                spaced: false,
            },
        }
    }

    fn token(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    fn peek(&self) -> &Tok {
        &self.token().tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        self.tokens.get(self.pos + offset).map_or(&self.eof.tok, |t| &t.tok)
    }

    fn prev(&self) -> Option<&Tok> {
        self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)).map(|t| &t.tok)
    }

    fn line(&self) -> usize {
        self.token().line
    }

    fn advance(&mut self) -> Token {
        let token = self.token().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Tok::Punct(q) if *q == p)
    }

    fn is_kw(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Ident(w) if w == kw)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, kw: &str) -> bool {
        if self.is_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), SandboxError> {
        if self.eat_punct(p) {
            return Ok(());
        }
        Err(self.unexpected(&format!("expected `{}`", p)))
    }

    fn expect_kw(&mut self, kw: &str) -> Result<(), SandboxError> {
        if self.eat_kw(kw) {
            return Ok(());
        }
        Err(self.unexpected(&format!("expected `{}`", kw)))
    }

    fn unexpected(&self, context: &str) -> SandboxError {
        syntax(self.line(), format!("{}, found {}", context, describe(self.peek())))
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Tok::Newline) {
            self.advance();
        }
    }

    fn skip_terms(&mut self) {
        while matches!(self.peek(), Tok::Newline | Tok::Punct(";")) {
            self.advance();
        }
    }

    fn enter(&mut self) -> Result<(), SandboxError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(syntax(self.line(), format!("nesting deeper than {} levels", MAX_DEPTH)));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    // ---- structure ----

    fn parse_scope(&mut self, found: &mut Option<AppClass>, top: bool) -> Result<(), SandboxError> {
        loop {
            self.budget.check()?;
            self.skip_terms();
            match self.peek() {
                Tok::Eof if top => return Ok(()),
                Tok::Eof => return Err(syntax(self.line(), "missing `end` before end of file")),
                Tok::Ident(w) if w == "end" && !top => {
                    self.advance();
                    return Ok(());
                }
                Tok::Ident(w) if w == "module" => {
                    self.advance();
                    self.read_const_path();
                    self.parse_scope(found, false)?;
                }
                Tok::Ident(w) if w == "class" => {
                    self.advance();
                    self.parse_class(found)?;
                }
                Tok::Ident(w) if w == "def" => {
                    self.advance();
                    self.skip(1)?;
                }
                _ => self.skip(0)?,
            }
        }
    }

    fn read_const_path(&mut self) -> String {
        let mut path = String::new();
        loop {
            match self.peek().clone() {
                Tok::Const(c) => {
                    self.advance();
                    path.push_str(&c);
                }
                Tok::Punct("::") => {
                    self.advance();
                    path.push_str("::");
                }
                _ => return path,
            }
        }
    }

    fn parse_class(&mut self, found: &mut Option<AppClass>) -> Result<(), SandboxError> {
        let line = self.line();
        if self.is_punct("<<") {
            return self.skip(1);
        }
        let name = self.read_const_path();
        if name.is_empty() {
            return Err(self.unexpected("expected a class name"));
        }
        let superclass = if self.eat_punct("<") {
            self.read_const_path()
        } else {
            String::new()
        };

        if !superclass.ends_with("SushiApp") {
            return self.parse_scope(found, false);
        }
        let class_name = name.rsplit("::").next().unwrap_or(&name).to_string();
        if let Some(existing) = found {
            return Err(syntax(
                line,
                format!(
                    "more than one SushiApp class ({} and {})",
                    existing.class_name, class_name
                ),
            ));
        }
        let class = self.parse_app_body(class_name, line)?;
        *found = Some(class);
        Ok(())
    }

    fn parse_app_body(&mut self, class_name: String, line: usize) -> Result<AppClass, SandboxError> {
        let mut class = AppClass {
            class_name,
            line,
            initialize: None,
            set_default_parameters: None,
        };
        loop {
            self.budget.check()?;
            self.skip_terms();
            match self.peek().clone() {
                Tok::Eof => return Err(syntax(self.line(), format!("class {} is missing `end`", class.class_name))),
                Tok::Ident(w) if w == "end" => {
                    self.advance();
                    return Ok(class);
                }
                Tok::Ident(w) if w == "def" => {
                    self.advance();
                    let hook = match self.peek() {
                        Tok::Ident(m) if HOOKS.contains(&m.as_str()) => Some(m.clone()),
                        _ => None,
                    };
                    let is_plain = !matches!(self.peek_at(1), Tok::Punct("." | "="));
                    match hook {
                        Some(hook) if is_plain => {
                            self.advance();
                            let body = self.parse_hook()?;
                            if hook == "initialize" {
                                class.initialize = Some(body);
                            } else {
                                class.set_default_parameters = Some(body);
                            }
                        }
                        _ => self.skip(1)?,
                    }
                }
                Tok::Ident(w) if w == "class" || w == "module" => {
                    self.advance();
                    self.skip(1)?;
                }
                _ => self.skip(0)?,
            }
        }
    }

    fn parse_hook(&mut self) -> Result<Vec<Stmt>, SandboxError> {
        if self.eat_punct("(") {
            self.expect_punct(")")?;
        }
        self.locals.clear();
        let body = self.parse_statements(&["end"])?;
        self.expect_kw("end")?;
        Ok(body)
    }

    /// Consume tokens without interpreting them.
    ///
    /// With `depth == 0` one statement is skipped, stopping before a closer
    /// that belongs to the enclosing scope. With `depth > 0` an opener has
    /// already been consumed and skipping stops after its matching `end`.
    fn skip(&mut self, mut depth: usize) -> Result<(), SandboxError> {
        let statement = depth == 0;
        let start = self.pos;
        let mut loop_header = false;
        loop {
            self.budget.check()?;
            let line = self.line();
            let after_dot = matches!(self.prev(), Some(Tok::Punct("." | "&." | "::")));
            let leading = statement_leading(self.prev());
            match self.peek().clone() {
                Tok::Eof => {
                    if statement && depth == 0 {
                        return Ok(());
                    }
                    return Err(syntax(line, "missing `end` before end of file"));
                }
                Tok::Newline | Tok::Punct(";") => {
                    loop_header = false;
                    if statement && depth == 0 {
                        self.advance();
                        return Ok(());
                    }
                }
                Tok::Punct("(" | "[" | "{") => depth += 1,
                Tok::Punct(")" | "]" | "}") => {
                    if depth == 0 {
                        if statement && self.pos > start {
                            return Ok(());
                        }
                        return Err(syntax(line, "unbalanced closing bracket"));
                    }
                    depth -= 1;
                }
                Tok::Ident(w) if !after_dot => match w.as_str() {
                    "end" => {
                        if depth == 0 {
                            if self.pos > start {
                                return Ok(());
                            }
                            return Err(syntax(line, "unexpected `end`"));
                        }
                        depth -= 1;
                        if !statement && depth == 0 {
                            self.advance();
                            return Ok(());
                        }
                    }
                    "def" | "class" | "module" | "case" | "begin" => depth += 1,
                    "if" | "unless" if leading => depth += 1,
                    "while" | "until" | "for" if leading => {
                        depth += 1;
                        loop_header = true;
                    }
                    "do" if loop_header => loop_header = false,
                    "do" => depth += 1,
                    _ => {}
                },
                _ => {}
            }
            self.advance();
        }
    }

    // ---- statements ----

    fn parse_statements(&mut self, terminators: &[&str]) -> Result<Vec<Stmt>, SandboxError> {
        let mut stmts = Vec::new();
        loop {
            self.budget.check()?;
            self.skip_terms();
            match self.peek() {
                Tok::Ident(w) if terminators.contains(&w.as_str()) => return Ok(stmts),
                Tok::Eof => return Err(syntax(self.line(), "missing `end` before end of file")),
                _ => {}
            }
            stmts.push(self.parse_statement()?);
            match self.peek() {
                Tok::Newline | Tok::Punct(";") | Tok::Eof => {}
                Tok::Ident(w) if matches!(w.as_str(), "end" | "else" | "elsif") => {}
                _ => return Err(self.unexpected("expected end of statement")),
            }
        }
    }

    fn parse_statement(&mut self) -> Result<Stmt, SandboxError> {
        self.enter()?;
        let line = self.line();
        let kind = match self.peek().clone() {
            Tok::Ident(w) if w == "super" => {
                self.advance();
                if self.is_punct("(") && !self.token().spaced {
                    self.advance();
                    self.expect_punct(")")?;
                }
                StmtKind::Super
            }
            Tok::Ident(w) if w == "return" => {
                self.advance();
                if self.starts_value() {
                    self.parse_expr_stmt()?;
                }
                StmtKind::Return
            }
            Tok::Ident(w) if w == "if" || w == "unless" => {
                self.advance();
                self.parse_conditional(w == "unless")?
            }
            Tok::Ident(w) if UNSUPPORTED.contains(&w.as_str()) => {
                return Err(syntax(line, format!("`{}` is not supported in application hooks", w)));
            }
            _ => self.parse_simple()?,
        };

        let mut stmt = Stmt { kind, line };
        loop {
            match self.peek().clone() {
                Tok::Ident(w) if w == "if" || w == "unless" => {
                    self.advance();
                    let mut cond = self.parse_expr_stmt()?;
                    if w == "unless" {
                        cond = Expr::Not(Box::new(cond));
                    }
                    stmt = Stmt {
                        kind: StmtKind::If {
                            cond,
                            then: vec![stmt],
                            otherwise: Vec::new(),
                        },
                        line,
                    };
                }
                Tok::Ident(w) if matches!(w.as_str(), "while" | "until" | "rescue") => {
                    return Err(syntax(self.line(), format!("`{}` modifier is not supported", w)));
                }
                _ => break,
            }
        }
        self.leave();
        Ok(stmt)
    }

    /// Body of `if`/`unless` after the keyword; consumes the closing `end`.
    fn parse_conditional(&mut self, negate: bool) -> Result<StmtKind, SandboxError> {
        let mut cond = self.parse_expr_stmt()?;
        if negate {
            cond = Expr::Not(Box::new(cond));
        }
        self.eat_kw("then");
        let then = self.parse_statements(&["elsif", "else", "end"])?;

        if self.is_kw("elsif") {
            if negate {
                return Err(syntax(self.line(), "`elsif` is not allowed in `unless`"));
            }
            let line = self.line();
            self.advance();
            self.enter()?;
            let nested = self.parse_conditional(false)?;
            self.leave();
            return Ok(StmtKind::If {
                cond,
                then,
                otherwise: vec![Stmt { kind: nested, line }],
            });
        }

        let otherwise = if self.eat_kw("else") {
            self.parse_statements(&["end"])?
        } else {
            Vec::new()
        };
        self.expect_kw("end")?;
        Ok(StmtKind::If { cond, then, otherwise })
    }

    fn parse_simple(&mut self) -> Result<StmtKind, SandboxError> {
        let line = self.line();
        let expr = self.parse_expr_stmt()?;

        let op = match self.peek() {
            Tok::Punct(p @ ("=" | "||=" | "&&=" | "+=" | "-=" | "*=" | "/=" | "<<=")) => *p,
            _ => {
                if let Expr::Binary {
                    op: BinOp::Shl,
                    lhs,
                    rhs,
                } = &expr
                {
                    if let Some(target) = append_target(lhs) {
                        return Ok(StmtKind::Append {
                            target,
                            value: (**rhs).clone(),
                        });
                    }
                }
                return Ok(StmtKind::Expr(expr));
            }
        };

        let target = to_target(expr, line)?;
        self.advance();
        self.skip_newlines();
        let rhs = self.parse_expr_stmt()?;
        if let Target::Local(name) = &target {
            self.locals.insert(name.clone());
        }

        let value = if op == "=" {
            rhs
        } else {
            let current = Box::new(read_target(&target, line)?);
            let rhs = Box::new(rhs);
            match op {
                "||=" => Expr::Or(current, rhs),
                "&&=" => Expr::And(current, rhs),
                _ => {
                    let bin = match op {
                        "+=" => BinOp::Add,
                        "-=" => BinOp::Sub,
                        "*=" => BinOp::Mul,
                        "/=" => BinOp::Div,
                        _ => BinOp::Shl,
                    };
                    Expr::Binary {
                        op: bin,
                        lhs: current,
                        rhs,
                    }
                }
            }
        };
        Ok(StmtKind::Assign { target, value })
    }

    // ---- expressions ----

    /// Expression including the low-precedence `not`, `and`, `or`.
    fn parse_expr_stmt(&mut self) -> Result<Expr, SandboxError> {
        let mut lhs = self.parse_not()?;
        loop {
            if self.eat_kw("and") {
                self.skip_newlines();
                let rhs = self.parse_not()?;
                lhs = Expr::And(Box::new(lhs), Box::new(rhs));
            } else if self.eat_kw("or") {
                self.skip_newlines();
                let rhs = self.parse_not()?;
                lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
            } else {
                return Ok(lhs);
            }
        }
    }

    fn parse_not(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_kw("not") {
            self.enter()?;
            let inner = self.parse_not()?;
            self.leave();
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_expr()
    }

    fn parse_expr(&mut self) -> Result<Expr, SandboxError> {
        self.enter()?;
        let cond = self.parse_binary(0)?;
        let expr = if self.eat_punct("?") {
            self.skip_newlines();
            let then = self.parse_expr()?;
            self.skip_newlines();
            self.expect_punct(":")?;
            self.skip_newlines();
            let otherwise = self.parse_expr()?;
            Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            }
        } else {
            cond
        };
        self.leave();
        Ok(expr)
    }

    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, SandboxError> {
        let mut lhs = self.parse_unary()?;
        while let Some((op, prec, right_assoc)) = infix(self.peek()) {
            if prec < min_prec {
                break;
            }
            self.advance();
            self.skip_newlines();
            let next_min = if right_assoc { prec } else { prec + 1 };
            let rhs = self.parse_binary(next_min)?;
            lhs = match op {
                Infix::And => Expr::And(Box::new(lhs), Box::new(rhs)),
                Infix::Or => Expr::Or(Box::new(lhs), Box::new(rhs)),
                Infix::Bin(op) => Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, SandboxError> {
        self.enter()?;
        let expr = match self.peek() {
            Tok::Punct("!") => {
                self.advance();
                Expr::Not(Box::new(self.parse_unary()?))
            }
            Tok::Punct("-") => {
                self.advance();
                let literal = !self.token().spaced;
                match self.peek().clone() {
                    Tok::Int(n) if literal => {
                        self.advance();
                        self.parse_postfix(Expr::Int(-n))?
                    }
                    Tok::Float(x) if literal => {
                        self.advance();
                        self.parse_postfix(Expr::Float(-x))?
                    }
                    _ => Expr::Neg(Box::new(self.parse_unary()?)),
                }
            }
            Tok::Punct("+") => {
                self.advance();
                self.parse_unary()?
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)?
            }
        };
        self.leave();
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, SandboxError> {
        let token = self.advance();
        let line = token.line;
        let expr = match token.tok {
            Tok::Int(n) => Expr::Int(n),
            Tok::Float(x) => Expr::Float(x),
            Tok::Str(parts) => self.string_expr(parts)?,
            Tok::Words(words) => Expr::Array(
                words
                    .into_iter()
                    .map(|w| Expr::Str(vec![Seg::Lit(w)]))
                    .collect(),
            ),
            Tok::Symbol(s) => Expr::Str(vec![Seg::Lit(s)]),
            Tok::Regex => Expr::Opaque("regular expression"),
            Tok::Command => Expr::Opaque("shell command"),
            Tok::IVar(name) => Expr::IVar(name),
            Tok::CVar(_) => Expr::Opaque("class variable"),
            Tok::GVar(_) => Expr::Opaque("global variable"),
            Tok::Const(first) => {
                let mut path = first;
                while self.is_punct("::") && matches!(self.peek_at(1), Tok::Const(_)) {
                    self.advance();
                    if let Tok::Const(c) = self.advance().tok {
                        path.push_str("::");
                        path.push_str(&c);
                    }
                }
                if self.is_punct("(") && !self.token().spaced {
                    let args = self.parse_call_args()?;
                    Expr::Call { name: path, args }
                } else {
                    Expr::Const(path)
                }
            }
            Tok::Punct("::") => match self.advance().tok {
                Tok::Const(c) => Expr::Const(c),
                other => return Err(syntax(line, format!("unexpected {} after `::`", describe(&other)))),
            },
            Tok::Punct("[") => Expr::Array(self.parse_list("]")?),
            Tok::Punct("{") => self.parse_hash()?,
            Tok::Punct("(") => {
                self.skip_newlines();
                let inner = self.parse_expr_stmt()?;
                self.skip_newlines();
                self.expect_punct(")")?;
                inner
            }
            Tok::Punct("->") => return Err(syntax(line, "lambdas are not supported")),
            Tok::Ident(word) => match word.as_str() {
                "nil" => Expr::Nil,
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "self" => Expr::Opaque("self"),
                "__FILE__" | "__dir__" | "__method__" => Expr::Opaque("source introspection"),
                w if UNSUPPORTED.contains(&w) || NON_ARG_WORDS.contains(&w) || w == "return" || w == "super" => {
                    return Err(syntax(line, format!("unexpected keyword `{}`", w)));
                }
                _ if self.locals.contains(&word) && !(self.is_punct("(") && !self.token().spaced) => {
                    Expr::Local(word)
                }
                _ => {
                    let args = self.parse_call_args()?;
                    self.reject_block()?;
                    Expr::Call { name: word, args }
                }
            },
            other => return Err(syntax(line, format!("unexpected {}", describe(&other)))),
        };
        Ok(expr)
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, SandboxError> {
        loop {
            self.budget.check()?;
            match self.peek() {
                Tok::Punct(p @ ("." | "&.")) => {
                    let safe = *p == "&.";
                    self.advance();
                    self.skip_newlines();
                    let name = match self.advance().tok {
                        Tok::Ident(n) | Tok::Const(n) => n,
                        other => {
                            return Err(syntax(self.line(), format!("expected a method name, found {}", describe(&other))));
                        }
                    };
                    let args = self.parse_call_args()?;
                    self.reject_block()?;
                    expr = Expr::Method {
                        recv: Box::new(expr),
                        name,
                        args,
                        safe,
                    };
                }
                Tok::Punct("[") if !self.token().spaced || !matches!(expr, Expr::Call { .. }) => {
                    self.advance();
                    let args = self.parse_list("]")?;
                    expr = Expr::Index {
                        recv: Box::new(expr),
                        args,
                    };
                }
                Tok::Punct("::") => {
                    self.advance();
                    let name = match self.advance().tok {
                        Tok::Ident(n) | Tok::Const(n) => n,
                        other => {
                            return Err(syntax(self.line(), format!("expected a name after `::`, found {}", describe(&other))));
                        }
                    };
                    let args = self.parse_call_args()?;
                    expr = Expr::Method {
                        recv: Box::new(expr),
                        name,
                        args,
                        safe: false,
                    };
                }
                Tok::Newline if self.continues_on_next_line() => self.skip_newlines(),
                _ => return Ok(expr),
            }
        }
    }

    /// A leading `.` on the next non-blank line continues a call chain.
    fn continues_on_next_line(&self) -> bool {
        let mut i = self.pos;
        while matches!(self.tokens.get(i).map(|t| &t.tok), Some(Tok::Newline)) {
            i += 1;
        }
        matches!(self.tokens.get(i).map(|t| &t.tok), Some(Tok::Punct("." | "&.")))
    }

    fn reject_block(&self) -> Result<(), SandboxError> {
        if self.is_punct("{") || self.is_kw("do") {
            return Err(syntax(self.line(), "blocks are not supported"));
        }
        Ok(())
    }

    /// Whether the current token can begin an argument of a paren-less call.
    fn starts_command_arg(&self) -> bool {
        let token = self.token();
        if !token.spaced {
            return false;
        }
        match &token.tok {
            Tok::Int(_)
            | Tok::Float(_)
            | Tok::Str(_)
            | Tok::Words(_)
            | Tok::Symbol(_)
            | Tok::IVar(_)
            | Tok::CVar(_)
            | Tok::GVar(_)
            | Tok::Const(_)
            | Tok::Label(_)
            | Tok::Regex
            | Tok::Command => true,
            Tok::Ident(w) => !NON_ARG_WORDS.contains(&w.as_str()),
            Tok::Punct("[" | "(" | "->" | "::") => true,
            Tok::Punct("-" | "!") => self.tokens.get(self.pos + 1).is_some_and(|t| !t.spaced),
            _ => false,
        }
    }

    /// Whether a value follows on this line (`return x` vs bare `return`).
    fn starts_value(&self) -> bool {
        match self.peek() {
            Tok::Newline | Tok::Eof | Tok::Punct(";") => false,
            Tok::Ident(w) => !NON_ARG_WORDS.contains(&w.as_str()),
            _ => true,
        }
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, SandboxError> {
        if self.is_punct("(") && !self.token().spaced {
            self.advance();
            return self.parse_list(")");
        }
        if !self.starts_command_arg() {
            return Ok(Vec::new());
        }
        let mut args = Vec::new();
        let mut pairs = Vec::new();
        loop {
            self.parse_arg(&mut args, &mut pairs)?;
            if self.eat_punct(",") {
                self.skip_newlines();
                continue;
            }
            break;
        }
        if !pairs.is_empty() {
            args.push(Expr::Hash(pairs));
        }
        Ok(args)
    }

    /// Comma separated items up to `close`; `key => v` and `key: v` items
    /// are gathered into one trailing hash.
    fn parse_list(&mut self, close: &str) -> Result<Vec<Expr>, SandboxError> {
        let mut items = Vec::new();
        let mut pairs = Vec::new();
        loop {
            self.budget.check()?;
            self.skip_newlines();
            if self.eat_punct(close) {
                break;
            }
            self.parse_arg(&mut items, &mut pairs)?;
            self.skip_newlines();
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct(close)?;
            break;
        }
        if !pairs.is_empty() {
            items.push(Expr::Hash(pairs));
        }
        Ok(items)
    }

    fn parse_arg(&mut self, items: &mut Vec<Expr>, pairs: &mut Vec<(Expr, Expr)>) -> Result<(), SandboxError> {
        if self.is_punct("*") || self.is_punct("**") || self.is_punct("&") {
            return Err(syntax(self.line(), "splat arguments are not supported"));
        }
        if let Tok::Label(key) = self.peek().clone() {
            self.advance();
            self.skip_newlines();
            let value = self.parse_expr()?;
            pairs.push((Expr::Str(vec![Seg::Lit(key)]), value));
            return Ok(());
        }
        let item = self.parse_expr()?;
        if self.eat_punct("=>") {
            self.skip_newlines();
            let value = self.parse_expr()?;
            pairs.push((item, value));
        } else {
            items.push(item);
        }
        Ok(())
    }

    fn parse_hash(&mut self) -> Result<Expr, SandboxError> {
        let mut pairs = Vec::new();
        loop {
            self.budget.check()?;
            self.skip_newlines();
            if self.eat_punct("}") {
                break;
            }
            let key = if let Tok::Label(key) = self.peek().clone() {
                self.advance();
                Expr::Str(vec![Seg::Lit(key)])
            } else {
                let key = self.parse_expr()?;
                self.expect_punct("=>")?;
                key
            };
            self.skip_newlines();
            let value = self.parse_expr()?;
            pairs.push((key, value));
            self.skip_newlines();
            if self.eat_punct(",") {
                continue;
            }
            self.expect_punct("}")?;
            break;
        }
        Ok(Expr::Hash(pairs))
    }

    fn string_expr(&mut self, parts: Vec<StrPart>) -> Result<Expr, SandboxError> {
        let mut segs = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                StrPart::Lit(s) => segs.push(Seg::Lit(s)),
                StrPart::Interp { src, line } => {
                    if src.trim().is_empty() {
                        continue;
                    }
                    let tokens = tokenize_at(&src, line, self.budget)?;
                    let mut inner = Parser::new(tokens, self.budget);
                    inner.depth = self.depth;
                    inner.locals = self.locals.clone();
                    inner.skip_newlines();
                    let expr = inner.parse_expr_stmt()?;
                    inner.skip_terms();
                    if !matches!(inner.peek(), Tok::Eof) {
                        return Err(inner.unexpected("expected end of interpolation"));
                    }
                    segs.push(Seg::Expr(expr));
                }
            }
        }
        Ok(Expr::Str(segs))
    }
}

/// Whether a block keyword at this position opens a block rather than
/// acting as a statement modifier.
fn statement_leading(prev: Option<&Tok>) -> bool {
    match prev {
        None | Some(Tok::Newline) => true,
        Some(Tok::Punct(p)) => !matches!(*p, ")" | "]" | "}"),
        Some(Tok::Ident(w)) => matches!(w.as_str(), "then" | "else" | "do" | "begin" | "and" | "or" | "not"),
        Some(Tok::Label(_)) => true,
        Some(_) => false,
    }
}

fn to_target(expr: Expr, line: usize) -> Result<Target, SandboxError> {
    match expr {
        Expr::IVar(name) => Ok(Target::IVar(name)),
        Expr::Local(name) => Ok(Target::Local(name)),
        Expr::Call { name, args } if args.is_empty() && is_local_name(&name) => Ok(Target::Local(name)),
        Expr::Index { recv, args } if *recv == Expr::IVar("params".to_string()) => Ok(Target::Param(args)),
        _ => Err(syntax(line, "unsupported assignment target")),
    }
}

fn append_target(expr: &Expr) -> Option<Target> {
    match expr {
        Expr::IVar(name) => Some(Target::IVar(name.clone())),
        Expr::Local(name) => Some(Target::Local(name.clone())),
        _ => None,
    }
}

fn read_target(target: &Target, line: usize) -> Result<Expr, SandboxError> {
    match target {
        Target::IVar(name) => Ok(Expr::IVar(name.clone())),
        Target::Local(name) => Ok(Expr::Local(name.clone())),
        Target::Param(args) if args.len() == 1 => Ok(Expr::Index {
            recv: Box::new(Expr::IVar("params".to_string())),
            args: args.clone(),
        }),
        Target::Param(_) => Err(syntax(line, "compound assignment to parameter metadata is not supported")),
    }
}

fn is_local_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_lowercase() || c == '_') && !name.ends_with(['?', '!'])
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;
    use std::time::Duration;

    fn parse(src: &str) -> Result<AppClass, SandboxError> {
        let budget = Budget::new(Duration::from_secs(5));
        let tokens = tokenize(src, &budget)?;
        parse_program(tokens, &budget)
    }

    fn hook(body: &str) -> Vec<Stmt> {
        let src = format!("class XApp < SushiFabric::SushiApp\n  def initialize\n{}\n  end\nend\n", body);
        parse(&src).unwrap().initialize.unwrap()
    }

    fn lit(s: &str) -> Expr {
        Expr::Str(vec![Seg::Lit(s.to_string())])
    }

    #[test]
    fn test_sf011_finds_app_class_and_hooks() {
        let src = r#"
#!/usr/bin/env ruby
require 'sushi_fabric'
include GlobalVariables

class FastqcApp < SushiFabric::SushiApp
  def initialize
    super
    @name = 'Fastqc'
  end
  def set_default_parameters
    @params['paired'] = dataset_has_column?('Read2')
  end
  def commands
    run_RApp("EzAppFastqc")
  end
end

if __FILE__ == $0
  usecase = FastqcApp.new
  usecase.run
end
"#;
        let class = parse(src).unwrap();
        assert_eq!(class.class_name, "FastqcApp");
        assert_eq!(class.line, 6);
        assert_eq!(class.initialize.as_ref().map(Vec::len), Some(2));
        assert_eq!(class.set_default_parameters.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_sf011_skips_other_methods_with_blocks() {
        let src = r#"
class XApp < SushiApp
  def next_dataset
    @dataset.each do |row|
      if row['Read2'] then puts row end
      while false do end
    end
    {'Name' => @dataset['Name']}.map { |k, v| v unless v.nil? }
  end
  def initialize
    @name = 'X'
  end
end
"#;
        let class = parse(src).unwrap();
        assert_eq!(class.initialize.unwrap().len(), 1);
    }

    #[test]
    fn test_sf011_module_wrapped_class() {
        let src = "module Apps\n  class YApp < SushiFabric::SushiApp\n    def initialize\n    end\n  end\nend\n";
        assert_eq!(parse(src).unwrap().class_name, "YApp");
    }

    #[test]
    fn test_sf011_missing_hook_is_fine() {
        let class = parse("class ZApp < SushiApp\nend\n").unwrap();
        assert!(class.initialize.is_none());
        assert!(class.set_default_parameters.is_none());
    }

    #[test]
    fn test_sf011_no_app_class() {
        let err = parse("class Helper\n  def initialize\n  end\nend\n").unwrap_err();
        assert!(err.to_string().contains("no class inheriting from SushiApp"));
    }

    #[test]
    fn test_sf011_two_app_classes() {
        let err = parse("class AApp < SushiApp\nend\nclass BApp < SushiApp\nend\n").unwrap_err();
        assert!(err.to_string().contains("more than one SushiApp class"));
    }

    #[test]
    fn test_sf011_param_writes() {
        let body = hook("@params['ram'] = 15\n@params['ram', 'description'] = 'GB'");
        assert_eq!(
            body[0].kind,
            StmtKind::Assign {
                target: Target::Param(vec![lit("ram")]),
                value: Expr::Int(15),
            }
        );
        assert_eq!(
            body[1].kind,
            StmtKind::Assign {
                target: Target::Param(vec![lit("ram"), lit("description")]),
                value: lit("GB"),
            }
        );
        assert_eq!(body[1].line, 4);
    }

    #[test]
    fn test_sf011_append_and_modifier() {
        let body = hook("@required_columns << 'Read2' if @params['paired']");
        let StmtKind::If { then, otherwise, .. } = &body[0].kind else {
            panic!("expected if, got {:?}", body[0].kind);
        };
        assert!(otherwise.is_empty());
        assert!(matches!(then[0].kind, StmtKind::Append { target: Target::IVar(ref n), .. } if n == "required_columns"));
    }

    #[test]
    fn test_sf011_if_elsif_else() {
        let body = hook("if a\n  @x = 1\nelsif b\n  @x = 2\nelse\n  @x = 3\nend");
        let StmtKind::If { otherwise, .. } = &body[0].kind else {
            panic!("expected if");
        };
        let StmtKind::If { otherwise: inner, .. } = &otherwise[0].kind else {
            panic!("expected nested if");
        };
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn test_sf011_locals_and_compound_assignment() {
        let body = hook("n = 2\nn += 1\n@params['cores'] = n");
        assert!(matches!(body[0].kind, StmtKind::Assign { target: Target::Local(_), .. }));
        assert!(matches!(
            body[1].kind,
            StmtKind::Assign {
                value: Expr::Binary { op: BinOp::Add, .. },
                ..
            }
        ));
        assert!(matches!(
            body[2].kind,
            StmtKind::Assign {
                value: Expr::Local(_),
                ..
            }
        ));
    }

    #[test]
    fn test_sf011_command_call_and_hash_args() {
        let body = hook("@params['refBuild'] = ref_selector\nputs 'hi', 'there'\nx = extract_columns(colnames: ['Name'], 'a' => 1)");
        assert!(matches!(
            &body[0].kind,
            StmtKind::Assign { value: Expr::Call { name, args }, .. } if name == "ref_selector" && args.is_empty()
        ));
        assert!(matches!(&body[1].kind, StmtKind::Expr(Expr::Call { args, .. }) if args.len() == 2));
        let StmtKind::Assign {
            value: Expr::Call { args, .. },
            ..
        } = &body[2].kind
        else {
            panic!("expected call");
        };
        assert!(matches!(&args[0], Expr::Hash(pairs) if pairs.len() == 2));
    }

    #[test]
    fn test_sf011_multiline_array_and_hash() {
        let body = hook("@modules = [\n  'QC/FastQC',\n  'Dev/R',\n]\n@params['h'] = {\n  'a' => 1,\n  b: 2\n}");
        assert!(matches!(&body[0].kind, StmtKind::Assign { value: Expr::Array(items), .. } if items.len() == 2));
        assert!(matches!(&body[1].kind, StmtKind::Assign { value: Expr::Hash(pairs), .. } if pairs.len() == 2));
    }

    #[test]
    fn test_sf011_interpolation() {
        let body = hook("v = 'x'\n@name = \"App #{v.upcase}\"");
        let StmtKind::Assign { value: Expr::Str(segs), .. } = &body[1].kind else {
            panic!("expected string");
        };
        assert_eq!(segs[0], Seg::Lit("App ".to_string()));
        assert!(matches!(&segs[1], Seg::Expr(Expr::Method { name, .. }) if name == "upcase"));
    }

    #[test]
    fn test_sf011_blocks_rejected_in_hooks() {
        let src = "class XApp < SushiApp\n  def initialize\n    @modules.each { |m| puts m }\n  end\nend\n";
        assert!(parse(src).unwrap_err().to_string().contains("blocks"));
    }

    #[test]
    fn test_sf011_loops_rejected_in_hooks() {
        let src = "class XApp < SushiApp\n  def initialize\n    while true\n    end\n  end\nend\n";
        assert!(parse(src).is_err());
    }

    #[test]
    fn test_sf011_depth_limit() {
        let deep = format!("@x = {}1{}", "[".repeat(100), "]".repeat(100));
        let src = format!("class XApp < SushiApp\n  def initialize\n{}\n  end\nend\n", deep);
        let err = parse(&src).unwrap_err();
        assert!(err.to_string().contains("nesting deeper"));
    }

    #[test]
    fn test_sf011_unbalanced_class_reports_missing_end() {
        assert!(parse("class XApp < SushiApp\n  def initialize\n    @name = 'x'\n").is_err());
    }
}
