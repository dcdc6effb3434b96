//! SF-012: Hook interpreter.
//!
//! Runs the parsed `initialize` and `set_default_parameters` bodies against
//! one descriptor. Known instance variables map onto descriptor fields;
//! `@params` writes go to the descriptor's parameter store. Helper calls
//! resolve to side-effect-free stubs and a short list of value methods.
//! Everything else fails with a runtime error.

use super::parser::{AppClass, BinOp, Expr, Seg, Stmt, StmtKind, Target};
use super::{Budget, SandboxError};
use crate::core::types::ApplicationDescriptor;
use crate::core::value::Value;
use indexmap::IndexMap;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Value of the `SUSHI` constant definitions may reference.
pub const SUSHI: &str = "Supercalifragilisticexpialidocious!!";

/// Largest string an evaluation may build.
pub const MAX_STRING_BYTES: usize = 1 << 20;

/// Most values (elements, entries and the containers themselves) one value
/// may hold.
pub const MAX_VALUE_NODES: usize = 100_000;

/// Deepest nesting of lists and hashes.
pub const MAX_VALUE_DEPTH: usize = 32;

/// Approximate bytes one evaluation may allocate for values, counted as
/// they are created and never given back.
pub const MAX_EVAL_BYTES: usize = 64 << 20;

/// Upper bound on element comparisons for list difference.
const MAX_DIFF_STEPS: usize = 1 << 20;

/// Instance variables backed by descriptor string fields.
const TEXT_SLOTS: [&str; 3] = ["name", "analysis_category", "description"];

/// Instance variables backed by descriptor string-list fields.
const LIST_SLOTS: [&str; 5] = [
    "required_columns",
    "required_params",
    "modules",
    "inherit_tags",
    "inherit_columns",
];

fn runtime(line: usize, message: impl Into<String>) -> SandboxError {
    SandboxError::Runtime {
        line,
        message: message.into(),
    }
}

enum Flow {
    Next,
    Return,
}

/// Size of a value: node count, string bytes and nesting depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Footprint {
    nodes: usize,
    bytes: usize,
    depth: usize,
}

impl Footprint {
    fn of(value: &Value) -> Self {
        match value {
            Value::Str(s) => Self {
                nodes: 1,
                bytes: s.len(),
                depth: 1,
            },
            Value::List(items) => items.iter().fold(Self::container(), |acc, v| acc.child(Self::of(v))),
            Value::Map(map) => map.iter().fold(Self::container(), |acc, (k, v)| {
                let mut entry = acc.child(Self::of(v));
                entry.bytes = entry.bytes.saturating_add(k.len());
                entry
            }),
            _ => Self {
                nodes: 1,
                bytes: 0,
                depth: 1,
            },
        }
    }

    fn container() -> Self {
        Self {
            nodes: 1,
            bytes: 0,
            depth: 1,
        }
    }

    /// Add `child` one level below `self`.
    fn child(self, child: Self) -> Self {
        Self {
            nodes: self.nodes.saturating_add(child.nodes),
            bytes: self.bytes.saturating_add(child.bytes),
            depth: self.depth.max(child.depth.saturating_add(1)),
        }
    }

    /// Both values side by side, as in list concatenation.
    fn merge(self, other: Self) -> Self {
        Self {
            nodes: self.nodes.saturating_add(other.nodes),
            bytes: self.bytes.saturating_add(other.bytes),
            depth: self.depth.max(other.depth),
        }
    }

    fn heap_bytes(self) -> usize {
        self.nodes
            .saturating_mul(std::mem::size_of::<Value>())
            .saturating_add(self.bytes)
    }
}

/// Executes hooks against a single descriptor.
pub struct Interpreter<'a> {
    app: &'a mut ApplicationDescriptor,
    budget: &'a Budget,
    ivars: IndexMap<String, Value>,
    locals: HashMap<String, Value>,
    allocated: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(app: &'a mut ApplicationDescriptor, budget: &'a Budget) -> Self {
        Self {
            app,
            budget,
            ivars: IndexMap::new(),
            locals: HashMap::new(),
            allocated: 0,
        }
    }

    /// Run `initialize`, then `set_default_parameters`.
    pub fn run(&mut self, class: &AppClass) -> Result<(), SandboxError> {
        for body in [&class.initialize, &class.set_default_parameters].into_iter().flatten() {
            self.run_hook(body)?;
        }
        Ok(())
    }

    pub fn run_hook(&mut self, body: &[Stmt]) -> Result<(), SandboxError> {
        self.locals.clear();
        self.exec_block(body)?;
        Ok(())
    }

    /// Reject a value whose shape exceeds the per-value limits.
    fn check_shape(&self, size: Footprint, line: usize) -> Result<(), SandboxError> {
        if size.nodes > MAX_VALUE_NODES {
            return Err(runtime(line, format!("value holds more than {} elements", MAX_VALUE_NODES)));
        }
        if size.depth > MAX_VALUE_DEPTH {
            return Err(runtime(line, format!("value nested deeper than {} levels", MAX_VALUE_DEPTH)));
        }
        Ok(())
    }

    fn charge_bytes(&mut self, bytes: usize, line: usize) -> Result<(), SandboxError> {
        self.allocated = self.allocated.saturating_add(bytes);
        if self.allocated > MAX_EVAL_BYTES {
            return Err(runtime(line, format!("evaluation allocated more than {} bytes", MAX_EVAL_BYTES)));
        }
        Ok(())
    }

    /// Account for a value about to be built or copied.
    fn charge(&mut self, size: Footprint, line: usize) -> Result<(), SandboxError> {
        self.check_shape(size, line)?;
        self.charge_bytes(size.heap_bytes(), line)
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<Flow, SandboxError> {
        for stmt in body {
            if let Flow::Return = self.exec(stmt)? {
                return Ok(Flow::Return);
            }
        }
        Ok(Flow::Next)
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, SandboxError> {
        self.budget.check()?;
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Super => {}
            StmtKind::Assign { target, value } => {
                let value = self.eval(value, line)?;
                self.assign(target, value, line)?;
            }
            StmtKind::Append { target, value } => {
                let value = self.eval(value, line)?;
                self.append(target, value, line)?;
            }
            StmtKind::If { cond, then, otherwise } => {
                let branch = if self.eval(cond, line)?.truthy() { then } else { otherwise };
                return self.exec_block(branch);
            }
            StmtKind::Return => return Ok(Flow::Return),
            StmtKind::Expr(expr) => {
                self.eval(expr, line)?;
            }
        }
        Ok(Flow::Next)
    }

    // ---- instance variables ----

    fn read_ivar(&self, name: &str) -> Value {
        match name {
            "name" => Value::Str(self.app.name.clone()),
            "analysis_category" => Value::Str(self.app.analysis_category.clone()),
            "description" => Value::Str(self.app.description.clone()),
            "params" => Value::Map(
                self.app
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            ),
            _ => match self.list_slot(name) {
                Some(list) => Value::List(list.iter().map(|s| Value::Str(s.clone())).collect()),
                None => self.ivars.get(name).cloned().unwrap_or_default(),
            },
        }
    }

    fn list_slot(&self, name: &str) -> Option<&Vec<String>> {
        match name {
            "required_columns" => Some(&self.app.required_columns),
            "required_params" => Some(&self.app.required_params),
            "modules" => Some(&self.app.modules),
            "inherit_tags" => Some(&self.app.inherit_tags),
            "inherit_columns" => Some(&self.app.inherit_columns),
            _ => None,
        }
    }

    fn list_slot_mut(&mut self, name: &str) -> Option<&mut Vec<String>> {
        match name {
            "required_columns" => Some(&mut self.app.required_columns),
            "required_params" => Some(&mut self.app.required_params),
            "modules" => Some(&mut self.app.modules),
            "inherit_tags" => Some(&mut self.app.inherit_tags),
            "inherit_columns" => Some(&mut self.app.inherit_columns),
            _ => None,
        }
    }

    fn assign(&mut self, target: &Target, value: Value, line: usize) -> Result<(), SandboxError> {
        match target {
            Target::Local(name) => {
                self.locals.insert(name.clone(), value);
            }
            Target::Param(args) => self.write_param(args, value, line)?,
            Target::IVar(name) if name == "params" => {
                return Err(runtime(line, "@params cannot be reassigned"));
            }
            Target::IVar(name) if TEXT_SLOTS.contains(&name.as_str()) => {
                let text = match value {
                    Value::Str(s) => s,
                    Value::Nil => String::new(),
                    other => {
                        return Err(runtime(
                            line,
                            format!("@{} must be a string, got {}", name, other.type_name()),
                        ))
                    }
                };
                match name.as_str() {
                    "name" => self.app.name = text,
                    "analysis_category" => self.app.analysis_category = text,
                    _ => self.app.description = text,
                }
            }
            Target::IVar(name) if LIST_SLOTS.contains(&name.as_str()) => {
                let Value::List(items) = value else {
                    return Err(runtime(
                        line,
                        format!("@{} must be an array, got {}", name, value.type_name()),
                    ));
                };
                let strings = items
                    .iter()
                    .map(|item| scalar_text(item, name, line))
                    .collect::<Result<Vec<_>, _>>()?;
                if let Some(slot) = self.list_slot_mut(name) {
                    *slot = strings;
                }
            }
            Target::IVar(name) => {
                self.ivars.insert(name.clone(), value);
            }
        }
        Ok(())
    }

    fn write_param(&mut self, args: &[Expr], value: Value, line: usize) -> Result<(), SandboxError> {
        match args {
            [key] => {
                let key = self.param_key(key, line)?;
                self.app.params.set_value(key, value);
            }
            [key, meta] => {
                let key = self.param_key(key, line)?;
                let meta = self.param_key(meta, line)?;
                self.app.params.set_metadata(key, meta, value.to_display());
            }
            _ => {
                return Err(runtime(
                    line,
                    format!("wrong number of arguments (given {}, expected 2..3)", args.len() + 1),
                ))
            }
        }
        Ok(())
    }

    fn param_key(&mut self, expr: &Expr, line: usize) -> Result<String, SandboxError> {
        match self.eval(expr, line)? {
            Value::Str(s) => Ok(s),
            other => Err(runtime(
                line,
                format!("parameter keys must be strings, got {}", other.type_name()),
            )),
        }
    }

    fn append(&mut self, target: &Target, value: Value, line: usize) -> Result<(), SandboxError> {
        match target {
            Target::IVar(name) if LIST_SLOTS.contains(&name.as_str()) => {
                let text = scalar_text(&value, name, line)?;
                let len = self.list_slot(name).map_or(0, Vec::len);
                self.check_shape(
                    Footprint {
                        nodes: len.saturating_add(2),
                        bytes: 0,
                        depth: 2,
                    },
                    line,
                )?;
                self.charge_bytes(std::mem::size_of::<String>().saturating_add(text.len()), line)?;
                if let Some(slot) = self.list_slot_mut(name) {
                    slot.push(text);
                }
                Ok(())
            }
            Target::IVar(name) => {
                let size = list_append_size(self.ivars.get(name), &value, line)?;
                self.check_shape(size, line)?;
                self.charge_bytes(std::mem::size_of::<Value>(), line)?;
                if let Some(Value::List(items)) = self.ivars.get_mut(name) {
                    items.push(value);
                }
                Ok(())
            }
            Target::Local(name) => {
                let size = list_append_size(self.locals.get(name), &value, line)?;
                self.check_shape(size, line)?;
                self.charge_bytes(std::mem::size_of::<Value>(), line)?;
                if let Some(Value::List(items)) = self.locals.get_mut(name) {
                    items.push(value);
                }
                Ok(())
            }
            Target::Param(_) => Err(runtime(line, "cannot append to a parameter")),
        }
    }

    // ---- expressions ----

    fn eval(&mut self, expr: &Expr, line: usize) -> Result<Value, SandboxError> {
        self.budget.check()?;
        match expr {
            Expr::Nil => Ok(Value::Nil),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Int(n) => Ok(Value::Int(*n)),
            Expr::Float(x) => Ok(Value::Float(*x)),
            Expr::Str(segs) => {
                let mut out = String::new();
                for seg in segs {
                    match seg {
                        Seg::Lit(s) => out.push_str(s),
                        Seg::Expr(e) => out.push_str(&self.eval(e, line)?.to_display()),
                    }
                    check_len(out.len(), line)?;
                }
                self.charge_bytes(out.len(), line)?;
                Ok(Value::Str(out))
            }
            Expr::Array(items) => {
                let mut size = Footprint::container();
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    let value = self.eval(item, line)?;
                    size = size.child(Footprint::of(&value));
                    self.check_shape(size, line)?;
                    values.push(value);
                }
                self.charge_bytes(std::mem::size_of::<Value>().saturating_mul(values.len() + 1), line)?;
                Ok(Value::List(values))
            }
            Expr::Hash(pairs) => {
                let mut map = IndexMap::new();
                let mut size = Footprint::container();
                for (k, v) in pairs {
                    let key = self.eval(k, line)?;
                    if !key.is_scalar() {
                        return Err(runtime(line, format!("hash keys must be scalars, got {}", key.type_name())));
                    }
                    let value = self.eval(v, line)?;
                    let key = key.to_display();
                    size = size.child(Footprint::of(&value));
                    size.bytes = size.bytes.saturating_add(key.len());
                    self.check_shape(size, line)?;
                    self.charge_bytes(std::mem::size_of::<Value>().saturating_add(key.len()), line)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            Expr::IVar(name) => {
                let value = self.read_ivar(name);
                self.charge(Footprint::of(&value), line)?;
                Ok(value)
            }
            Expr::Local(name) => {
                let size = self
                    .locals
                    .get(name)
                    .map(Footprint::of)
                    .ok_or_else(|| runtime(line, format!("undefined local variable `{}`", name)))?;
                self.charge(size, line)?;
                Ok(self.locals.get(name).cloned().unwrap_or_default())
            }
            Expr::Const(path) => match path.as_str() {
                "SUSHI" | "GlobalVariables::SUSHI" => Ok(Value::Str(SUSHI.to_string())),
                other => Err(runtime(line, format!("constant `{}` is not available", other))),
            },
            Expr::Call { name, args } => {
                let args = self.eval_args(args, line)?;
                let value = call_helper(name, args, line)?;
                self.charge(Footprint::of(&value), line)?;
                Ok(value)
            }
            Expr::Method { recv, name, args, safe } => {
                let recv = self.eval(recv, line)?;
                if *safe && recv == Value::Nil {
                    return Ok(Value::Nil);
                }
                let args = self.eval_args(args, line)?;
                let value = call_method(recv, name, args, line)?;
                self.charge(Footprint::of(&value), line)?;
                Ok(value)
            }
            Expr::Index { recv, args } => {
                let recv = self.eval(recv, line)?;
                let args = self.eval_args(args, line)?;
                let value = index(recv, &args, line)?;
                self.charge(Footprint::of(&value), line)?;
                Ok(value)
            }
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner, line)?.truthy())),
            Expr::Neg(inner) => match self.eval(inner, line)? {
                Value::Int(n) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| runtime(line, "integer overflow")),
                Value::Float(x) => Ok(Value::Float(-x)),
                other => Err(runtime(line, format!("undefined method `-@` for {}", other.type_name()))),
            },
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, line)?;
                let rhs = self.eval(rhs, line)?;
                if let (BinOp::Add, Value::List(_), Value::List(_)) = (op, &lhs, &rhs) {
                    self.charge(Footprint::of(&lhs).merge(Footprint::of(&rhs)), line)?;
                }
                let value = binary(*op, lhs, rhs, line)?;
                if let Value::Str(s) = &value {
                    self.charge_bytes(s.len(), line)?;
                }
                Ok(value)
            }
            Expr::And(lhs, rhs) => {
                let lhs = self.eval(lhs, line)?;
                if lhs.truthy() {
                    self.eval(rhs, line)
                } else {
                    Ok(lhs)
                }
            }
            Expr::Or(lhs, rhs) => {
                let lhs = self.eval(lhs, line)?;
                if lhs.truthy() {
                    Ok(lhs)
                } else {
                    self.eval(rhs, line)
                }
            }
            Expr::Ternary { cond, then, otherwise } => {
                if self.eval(cond, line)?.truthy() {
                    self.eval(then, line)
                } else {
                    self.eval(otherwise, line)
                }
            }
            Expr::Opaque(what) => Err(runtime(line, format!("{} is not allowed in application definitions", what))),
        }
    }

    fn eval_args(&mut self, args: &[Expr], line: usize) -> Result<Vec<Value>, SandboxError> {
        args.iter().map(|a| self.eval(a, line)).collect()
    }
}

fn scalar_text(value: &Value, slot: &str, line: usize) -> Result<String, SandboxError> {
    match value {
        Value::Nil | Value::List(_) | Value::Map(_) => Err(runtime(
            line,
            format!("@{} entries must be strings, got {}", slot, value.type_name()),
        )),
        other => Ok(other.to_display()),
    }
}

fn undefined_append(type_name: &str, line: usize) -> SandboxError {
    runtime(line, format!("undefined method `<<` for {}", type_name))
}

/// Size of `current` after pushing `value`, or an error if it is not a list.
fn list_append_size(current: Option<&Value>, value: &Value, line: usize) -> Result<Footprint, SandboxError> {
    match current {
        Some(list @ Value::List(_)) => Ok(Footprint::of(list).child(Footprint::of(value))),
        other => Err(undefined_append(other.map_or("nil", Value::type_name), line)),
    }
}

fn check_nodes(count: usize, line: usize) -> Result<(), SandboxError> {
    if count > MAX_VALUE_NODES {
        return Err(runtime(line, format!("value holds more than {} elements", MAX_VALUE_NODES)));
    }
    Ok(())
}

fn check_len(len: usize, line: usize) -> Result<(), SandboxError> {
    if len > MAX_STRING_BYTES {
        return Err(runtime(line, format!("string longer than {} bytes", MAX_STRING_BYTES)));
    }
    Ok(())
}

fn arity(name: &str, args: &[Value], min: usize, max: usize, line: usize) -> Result<(), SandboxError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{}..{}", min, max)
        };
        return Err(runtime(
            line,
            format!("wrong number of arguments for `{}` (given {}, expected {})", name, args.len(), expected),
        ));
    }
    Ok(())
}

/// Receiver-less helpers available to definitions. None of them touch the
/// host; dataset-dependent helpers answer as if no dataset were loaded.
fn call_helper(name: &str, args: Vec<Value>, line: usize) -> Result<Value, SandboxError> {
    match name {
        "c" => Ok(Value::List(args)),
        "ref_selector" | "extract_columns" | "get_columns_with_tag" => Ok(Value::Map(IndexMap::new())),
        "dataset_has_column?" => {
            arity(name, &args, 1, 1, line)?;
            Ok(Value::Bool(false))
        }
        "run_RApp" | "run_PyApp" => Ok(Value::Str(String::new())),
        "puts" | "p" | "print" | "warn" => Ok(Value::Nil),
        other => Err(runtime(line, format!("call to `{}` is not allowed", other))),
    }
}

fn call_method(recv: Value, name: &str, args: Vec<Value>, line: usize) -> Result<Value, SandboxError> {
    let type_name = recv.type_name();
    let undefined = || runtime(line, format!("undefined method `{}` for {}", name, type_name));
    match name {
        "to_s" => {
            arity(name, &args, 0, 0, line)?;
            let text = recv.to_display();
            check_len(text.len(), line)?;
            Ok(Value::Str(text))
        }
        "nil?" => {
            arity(name, &args, 0, 0, line)?;
            Ok(Value::Bool(recv == Value::Nil))
        }
        "to_i" => {
            arity(name, &args, 0, 0, line)?;
            match recv {
                Value::Int(n) => Ok(Value::Int(n)),
                Value::Float(x) if x.is_finite() && x.abs() < 9.2e18 => Ok(Value::Int(x.trunc() as i64)),
                Value::Float(_) => Err(runtime(line, "float out of integer range")),
                Value::Str(s) => Ok(Value::Int(leading_int(&s))),
                Value::Nil => Ok(Value::Int(0)),
                _ => Err(undefined()),
            }
        }
        "to_f" => {
            arity(name, &args, 0, 0, line)?;
            match recv {
                Value::Int(n) => Ok(Value::Float(n as f64)),
                Value::Float(x) => Ok(Value::Float(x)),
                Value::Str(s) => Ok(Value::Float(leading_float(&s))),
                Value::Nil => Ok(Value::Float(0.0)),
                _ => Err(undefined()),
            }
        }
        "size" | "length" => {
            arity(name, &args, 0, 0, line)?;
            let len = match &recv {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.len(),
                Value::Map(map) => map.len(),
                _ => return Err(undefined()),
            };
            Ok(Value::Int(len as i64))
        }
        "empty?" => {
            arity(name, &args, 0, 0, line)?;
            match &recv {
                Value::Str(s) => Ok(Value::Bool(s.is_empty())),
                Value::List(items) => Ok(Value::Bool(items.is_empty())),
                Value::Map(map) => Ok(Value::Bool(map.is_empty())),
                _ => Err(undefined()),
            }
        }
        "first" | "last" => {
            arity(name, &args, 0, 0, line)?;
            let Value::List(items) = recv else {
                return Err(undefined());
            };
            let item = if name == "first" { items.first() } else { items.last() };
            Ok(item.cloned().unwrap_or_default())
        }
        "join" => {
            arity(name, &args, 0, 1, line)?;
            let Value::List(items) = recv else {
                return Err(undefined());
            };
            let sep = match args.first() {
                None | Some(Value::Nil) => String::new(),
                Some(Value::Str(s)) => s.clone(),
                Some(other) => {
                    return Err(runtime(line, format!("join separator must be a string, got {}", other.type_name())))
                }
            };
            let joined = items.iter().map(Value::to_display).collect::<Vec<_>>().join(&sep);
            check_len(joined.len(), line)?;
            Ok(Value::Str(joined))
        }
        "include?" => {
            arity(name, &args, 1, 1, line)?;
            let needle = &args[0];
            match &recv {
                Value::List(items) => Ok(Value::Bool(items.iter().any(|v| values_equal(v, needle)))),
                Value::Str(s) => match needle {
                    Value::Str(sub) => Ok(Value::Bool(s.contains(sub.as_str()))),
                    other => Err(runtime(line, format!("no implicit conversion of {} into string", other.type_name()))),
                },
                Value::Map(map) => Ok(Value::Bool(map.contains_key(&needle.to_display()))),
                _ => Err(undefined()),
            }
        }
        "keys" => {
            arity(name, &args, 0, 0, line)?;
            let Value::Map(map) = recv else {
                return Err(undefined());
            };
            Ok(Value::List(map.keys().map(|k| Value::Str(k.clone())).collect()))
        }
        "strip" | "upcase" | "downcase" => {
            arity(name, &args, 0, 0, line)?;
            let Value::Str(s) = recv else {
                return Err(undefined());
            };
            let out = match name {
                "strip" => s.trim().to_string(),
                "upcase" => s.to_uppercase(),
                _ => s.to_lowercase(),
            };
            Ok(Value::Str(out))
        }
        "split" => {
            arity(name, &args, 0, 1, line)?;
            let Value::Str(s) = recv else {
                return Err(undefined());
            };
            let count = match args.first() {
                Some(Value::Str(sep)) if sep.is_empty() => s.chars().count(),
                Some(Value::Str(sep)) if sep != " " => s.matches(sep.as_str()).count() + 1,
                _ => s.split_whitespace().count(),
            };
            check_nodes(count.saturating_add(1), line)?;
            let parts: Vec<Value> = match args.first() {
                None | Some(Value::Nil) => s.split_whitespace().map(Value::from).collect(),
                Some(Value::Str(sep)) if sep == " " => s.split_whitespace().map(Value::from).collect(),
                Some(Value::Str(sep)) if sep.is_empty() => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                Some(Value::Str(sep)) => {
                    let mut parts: Vec<Value> = s.split(sep.as_str()).map(Value::from).collect();
                    while parts.last() == Some(&Value::Str(String::new())) {
                        parts.pop();
                    }
                    parts
                }
                Some(other) => {
                    return Err(runtime(line, format!("split separator must be a string, got {}", other.type_name())))
                }
            };
            Ok(Value::List(parts))
        }
        _ => Err(undefined()),
    }
}

fn index(recv: Value, args: &[Value], line: usize) -> Result<Value, SandboxError> {
    let [key] = args else {
        return Err(runtime(
            line,
            format!("wrong number of arguments (given {}, expected 1)", args.len()),
        ));
    };
    match (&recv, key) {
        (Value::List(items), Value::Int(i)) => Ok(list_get(items, *i).cloned().unwrap_or_default()),
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(list_get(&chars, *i).map(|c| Value::Str(c.to_string())).unwrap_or_default())
        }
        (Value::Map(map), key) if key.is_scalar() => Ok(map.get(&key.to_display()).cloned().unwrap_or_default()),
        (Value::Nil, _) => Err(runtime(line, "undefined method `[]` for nil")),
        (recv, key) => Err(runtime(
            line,
            format!("cannot index {} with {}", recv.type_name(), key.type_name()),
        )),
    }
}

/// Ruby-style index: negative counts from the end.
fn list_get<T>(items: &[T], i: i64) -> Option<&T> {
    let idx = if i < 0 {
        items.len().checked_sub(usize::try_from(i.unsigned_abs()).ok()?)?
    } else {
        usize::try_from(i).ok()?
    };
    items.get(idx)
}

fn leading_int(s: &str) -> i64 {
    let t = s.trim_start();
    let (sign, digits) = match t.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, t.strip_prefix('+').unwrap_or(t)),
    };
    let mut n: i64 = 0;
    for c in digits.chars() {
        if c == '_' {
            continue;
        }
        let Some(d) = c.to_digit(10) else {
            break;
        };
        n = match n.checked_mul(10).and_then(|n| n.checked_add(i64::from(d))) {
            Some(n) => n,
            None => return if sign < 0 { i64::MIN } else { i64::MAX },
        };
    }
    sign * n
}

fn leading_float(s: &str) -> f64 {
    let t = s.trim_start();
    let end = t
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || ((*c == '-' || *c == '+') && *i == 0) || *c == 'e' || *c == 'E')
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    // back off until the prefix parses (`1.5e` -> `1.5`)
    let mut prefix = &t[..end];
    while !prefix.is_empty() {
        if let Ok(x) = prefix.parse::<f64>() {
            return x;
        }
        prefix = &prefix[..prefix.len() - 1];
    }
    0.0
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

/// Equality with Ruby's numeric coercion (`1 == 1.0`).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => as_f64(a) == as_f64(b),
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => as_f64(a)?.partial_cmp(&as_f64(b)?),
    }
}

fn binary(op: BinOp, lhs: Value, rhs: Value, line: usize) -> Result<Value, SandboxError> {
    let overflow = || runtime(line, "integer overflow");
    let mismatch = |lhs: &Value, rhs: &Value| {
        runtime(
            line,
            format!("`{}` is not defined for {} and {}", op.symbol(), lhs.type_name(), rhs.type_name()),
        )
    };

    match op {
        BinOp::Eq => return Ok(Value::Bool(values_equal(&lhs, &rhs))),
        BinOp::Ne => return Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let ord = compare(&lhs, &rhs).ok_or_else(|| {
                runtime(
                    line,
                    format!("comparison of {} with {} failed", lhs.type_name(), rhs.type_name()),
                )
            })?;
            let result = match op {
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Gt => ord == Ordering::Greater,
                BinOp::Le => ord != Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            return Ok(Value::Bool(result));
        }
        BinOp::Cmp => {
            return Ok(compare(&lhs, &rhs).map_or(Value::Nil, |o| Value::Int(o as i64)));
        }
        _ => {}
    }

    match (op, &lhs, &rhs) {
        (BinOp::Add, Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Sub, Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Mul, Value::Int(a), Value::Int(b)) => a.checked_mul(*b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Div | BinOp::Mod, Value::Int(_), Value::Int(0)) => Err(runtime(line, "divided by 0")),
        (BinOp::Div, Value::Int(a), Value::Int(b)) => floor_div(*a, *b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Mod, Value::Int(a), Value::Int(b)) => floor_mod(*a, *b).map(Value::Int).ok_or_else(overflow),
        (BinOp::Pow, Value::Int(a), Value::Int(b)) => {
            if *b < 0 {
                return Ok(Value::Float((*a as f64).powf(*b as f64)));
            }
            let exp = u32::try_from(*b).map_err(|_| overflow())?;
            a.checked_pow(exp).map(Value::Int).ok_or_else(overflow)
        }
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            check_len(a.len() + b.len(), line)?;
            Ok(Value::Str(format!("{}{}", a, b)))
        }
        (BinOp::Mul, Value::Str(s), Value::Int(n)) => {
            let n = usize::try_from(*n).map_err(|_| runtime(line, "negative argument"))?;
            check_len(s.len().saturating_mul(n), line)?;
            Ok(Value::Str(s.repeat(n)))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::List(out))
        }
        (BinOp::Sub, Value::List(a), Value::List(b)) if a.len().saturating_mul(b.len()) > MAX_DIFF_STEPS => Err(
            runtime(line, format!("list difference needs more than {} comparisons", MAX_DIFF_STEPS)),
        ),
        (BinOp::Sub, Value::List(a), Value::List(b)) => Ok(Value::List(
            a.iter().filter(|v| !b.iter().any(|r| values_equal(v, r))).cloned().collect(),
        )),
        (BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow, _, _) => {
            let (Some(a), Some(b)) = (as_f64(&lhs), as_f64(&rhs)) else {
                return Err(mismatch(&lhs, &rhs));
            };
            let x = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Mod => a - b * (a / b).floor(),
                _ => a.powf(b),
            };
            Ok(Value::Float(x))
        }
        _ => Err(runtime(
            line,
            format!("operator `{}` is not supported", op.symbol()),
        )),
    }
}

/// Integer division rounding toward negative infinity.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// Modulo whose sign follows the divisor.
fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{lexer, parser};
    use super::*;
    use std::time::Duration;

    fn run(body: &str) -> Result<ApplicationDescriptor, SandboxError> {
        let src = format!(
            "class TestApp < SushiFabric::SushiApp\n  def initialize\n    super\n{}\n  end\nend\n",
            body
        );
        let budget = Budget::new(Duration::from_secs(5));
        let tokens = lexer::tokenize(&src, &budget)?;
        let class = parser::parse_program(tokens, &budget)?;
        let mut app = ApplicationDescriptor::new();
        Interpreter::new(&mut app, &budget).run(&class)?;
        Ok(app)
    }

    fn param(app: &ApplicationDescriptor, key: &str) -> Value {
        app.params.get(key).cloned().unwrap_or_default()
    }

    #[test]
    fn test_sf012_slots_and_params() {
        let app = run(
            "@name = 'Fastqc'\n@analysis_category = 'QC'\n@required_columns = ['Name', 'Read1']\n\
             @params['cores'] = [8, 1, 2, 4, 8]\n@params['ram'] = 15\n@params['ram', 'description'] = 'GB'",
        )
        .unwrap();
        assert_eq!(app.name, "Fastqc");
        assert_eq!(app.analysis_category, "QC");
        assert_eq!(app.required_columns, vec!["Name", "Read1"]);
        assert_eq!(param(&app, "cores"), Value::from(vec![8i64, 1, 2, 4, 8]));
        assert_eq!(param(&app, "ram"), Value::Int(15));
        assert_eq!(app.params.metadata("ram", "description"), Some("GB"));
    }

    #[test]
    fn test_sf012_metadata_does_not_touch_value() {
        let app = run("@params['x', 'hr'] = true").unwrap();
        assert_eq!(app.params.get("x"), None);
        assert_eq!(app.params.metadata("x", "hr"), Some("true"));
    }

    #[test]
    fn test_sf012_param_arity_error() {
        let err = run("@params['a', 'b', 'c'] = 1").unwrap_err();
        assert!(err.to_string().contains("wrong number of arguments (given 4, expected 2..3)"));
    }

    #[test]
    fn test_sf012_hooks_run_in_order() {
        let src = "class TApp < SushiApp\n  def set_default_parameters\n    @params['paired'] = dataset_has_column?('Read2')\n    @name = @name + '2'\n  end\n  def initialize\n    @name = 'T'\n    @params['paired'] = true\n  end\nend\n";
        let budget = Budget::new(Duration::from_secs(5));
        let class = parser::parse_program(lexer::tokenize(src, &budget).unwrap(), &budget).unwrap();
        let mut app = ApplicationDescriptor::new();
        Interpreter::new(&mut app, &budget).run(&class).unwrap();
        assert_eq!(app.name, "T2");
        assert_eq!(param(&app, "paired"), Value::Bool(false));
    }

    #[test]
    fn test_sf012_stub_helpers() {
        let app = run(
            "@params['refBuild'] = ref_selector\n@params['cols'] = extract_columns(colnames: ['Name'])\n\
             @params['v'] = c('a', 'b')\n@params['cmd'] = run_RApp('EzAppFastqc')\n@params['s'] = SUSHI\n\
             @params['g'] = GlobalVariables::SUSHI\nputs 'ignored'",
        )
        .unwrap();
        assert_eq!(param(&app, "refBuild"), Value::Map(IndexMap::new()));
        assert_eq!(param(&app, "cols"), Value::Map(IndexMap::new()));
        assert_eq!(param(&app, "v"), Value::List(vec![Value::from("a"), Value::from("b")]));
        assert_eq!(param(&app, "cmd"), Value::from(""));
        assert_eq!(param(&app, "s"), Value::from(SUSHI));
        assert_eq!(param(&app, "g"), Value::from(SUSHI));
    }

    #[test]
    fn test_sf012_conditionals_and_append() {
        let app = run(
            "@required_columns = ['Name']\nif dataset_has_column?('Read2')\n  @required_columns << 'Read2'\nelse\n  \
             @required_columns << 'Read1'\nend\n@modules << 'Dev/R' unless @modules.include?('Dev/R')",
        )
        .unwrap();
        assert_eq!(app.required_columns, vec!["Name", "Read1"]);
        assert_eq!(app.modules, vec!["Dev/R"]);
    }

    #[test]
    fn test_sf012_return_stops_hook() {
        let app = run("@name = 'A'\nreturn\n@name = 'B'").unwrap();
        assert_eq!(app.name, "A");
    }

    #[test]
    fn test_sf012_value_methods_and_operators() {
        let app = run(
            "x = ['b', 'a']\n@params['j'] = x.join(',')\n@params['n'] = '42abc'.to_i + 7 / 2 - -7 % 3\n\
             @params['s'] = ' Hi '.strip.downcase\n@params['l'] = \"#{x.size} items\"\n@params['f'] = x.first\n\
             @params['t'] = 3 > 2 ? 'yes' : 'no'\n@params['k'] = {'a' => 1}.keys",
        )
        .unwrap();
        assert_eq!(param(&app, "j"), Value::from("b,a"));
        // 42 + 3 - 2
        assert_eq!(param(&app, "n"), Value::Int(43));
        assert_eq!(param(&app, "s"), Value::from("hi"));
        assert_eq!(param(&app, "l"), Value::from("2 items"));
        assert_eq!(param(&app, "f"), Value::from("b"));
        assert_eq!(param(&app, "t"), Value::from("yes"));
        assert_eq!(param(&app, "k"), Value::from(vec!["a"]));
    }

    #[test]
    fn test_sf012_reads_params_back() {
        let app = run("@params['a'] = 2\n@params['b'] = @params['a'] * 3\n@params['c'] ||= 'x'\n@params['a'] ||= 9").unwrap();
        assert_eq!(param(&app, "b"), Value::Int(6));
        assert_eq!(param(&app, "c"), Value::from("x"));
        assert_eq!(param(&app, "a"), Value::Int(2));
    }

    #[test]
    fn test_sf012_rejects_host_access() {
        for body in [
            "@params['x'] = `id`",
            "@params['x'] = system('id')",
            "@params['x'] = File.read('/etc/passwd')",
            "@params['x'] = ENV['HOME']",
            "@params['x'] = eval('1')",
            "@params['x'] = $stdin",
            "@params['x'] = Dir.pwd",
            "@params['x'] = exit",
        ] {
            assert!(run(body).is_err(), "accepted {:?}", body);
        }
    }

    #[test]
    fn test_sf012_untaken_branch_is_not_run() {
        let app = run("if dataset_has_column?('Species')\n  @params['x'] = File.read('/etc/passwd')\nend\n@name = 'ok'").unwrap();
        assert_eq!(app.name, "ok");
        assert!(app.params.is_empty());
    }

    #[test]
    fn test_sf012_params_cannot_be_replaced() {
        assert!(run("@params = {}").is_err());
    }

    #[test]
    fn test_sf012_slot_type_errors() {
        assert!(run("@name = 3").is_err());
        assert!(run("@modules = 'QC/FastQC'").is_err());
    }

    #[test]
    fn test_sf012_extra_ivars_are_kept_local() {
        let app = run("@employee = true\n@params['e'] = @employee\n@params['u'] = @unknown").unwrap();
        assert_eq!(param(&app, "e"), Value::Bool(true));
        assert_eq!(param(&app, "u"), Value::Nil);
    }

    #[test]
    fn test_sf012_arithmetic_limits() {
        assert!(run("@params['x'] = 9223372036854775807 + 1").is_err());
        assert!(run("@params['x'] = 1 / 0").is_err());
        assert!(run("@params['x'] = 'a' * 2000000").is_err());
    }

    #[test]
    fn test_sf012_float_display_in_metadata() {
        let app = run("@params['x', 'step'] = 2.0").unwrap();
        assert_eq!(app.params.metadata("x", "step"), Some("2.0"));
    }

    #[test]
    fn test_sf012_floor_semantics() {
        assert_eq!(floor_div(-7, 2), Some(-4));
        assert_eq!(floor_mod(-7, 3), Some(2));
        assert_eq!(floor_mod(7, -3), Some(-2));
        assert_eq!(floor_div(i64::MIN, -1), None);
    }

    fn doubled(times: usize) -> String {
        let mut body = String::from("x = [1]\n");
        for _ in 0..times {
            body.push_str("x = x + x\n");
        }
        body
    }

    fn runtime_message(result: Result<ApplicationDescriptor, SandboxError>) -> String {
        match result {
            Err(SandboxError::Runtime { message, .. }) => message,
            other => panic!("expected a runtime error, got {:?}", other),
        }
    }

    #[test]
    fn test_sf012_list_doubling_is_capped() {
        let message = runtime_message(run(&doubled(22)));
        assert!(message.contains("more than 100000 elements"), "{}", message);
    }

    #[test]
    fn test_sf012_list_below_cap_is_fine() {
        let app = run(&format!("{}@params['n'] = x.size", doubled(16))).unwrap();
        assert_eq!(param(&app, "n"), Value::Int(65_536));
    }

    #[test]
    fn test_sf012_nested_literal_is_capped() {
        let mut body = String::from("x = [1]\n");
        for _ in 0..40 {
            body.push_str("x = [x]\n");
        }
        let message = runtime_message(run(&body));
        assert!(message.contains("nested deeper than"), "{}", message);

        let mut body = String::from("x = [1]\n");
        for _ in 0..24 {
            body.push_str("x = [x, x]\n");
        }
        let message = runtime_message(run(&body));
        assert!(message.contains("more than 100000 elements"), "{}", message);
    }

    #[test]
    fn test_sf012_repeated_copies_hit_allocation_cap() {
        let mut body = doubled(16);
        for i in 0..200 {
            body.push_str(&format!("y{} = x\n", i));
        }
        let message = runtime_message(run(&body));
        assert!(message.contains("allocated more than"), "{}", message);
    }

    #[test]
    fn test_sf012_append_is_capped() {
        let body = format!("{}x << x", doubled(16));
        let message = runtime_message(run(&body));
        assert!(message.contains("more than 100000 elements"), "{}", message);
    }

    #[test]
    fn test_sf012_list_difference_is_bounded() {
        let message = runtime_message(run(&format!("{}y = x - x", doubled(11))));
        assert!(message.contains("comparisons"), "{}", message);
        let app = run("@params['d'] = [1, 2, 3] - [2]").unwrap();
        assert_eq!(param(&app, "d"), Value::List(vec![Value::Int(1), Value::Int(3)]));
    }

    #[test]
    fn test_sf012_split_is_capped() {
        let message = runtime_message(run("s = 'a,' * 200000\nparts = s.split(',')"));
        assert!(message.contains("more than 100000 elements"), "{}", message);
        let app = run("@params['p'] = 'a,b,,'.split(',')").unwrap();
        assert_eq!(param(&app, "p"), Value::List(vec![Value::from("a"), Value::from("b")]));
    }
}
