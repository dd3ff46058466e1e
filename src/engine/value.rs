//! Runtime values
//!
//! Containers share their storage through `Rc<RefCell<..>>` the way script
//! references alias. A `RefCell` borrow is never held across a call back
//! into the interpreter: callers clone items out first.

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::engine::builtins::Builtin;
use crate::engine::scope::Scope;
use crate::error::{ExceptionKind, Result, SandboxError, ScriptException};
use crate::parser::ast::FunctionDef;
use crate::security::policy::QualifiedName;

/// Containers nested deeper than this print as `[...]` and compare unequal.
const MAX_DEPTH: usize = 64;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<DictValue>>),
    Set(Rc<RefCell<DictValue>>),
    Range(RangeValue),
    Function(Rc<Closure>),
    Builtin(Builtin),
    ExceptionClass(ExceptionKind),
    Exception(Rc<ScriptException>),
    Native(NativeFunction),
    BoundMethod(Rc<BoundMethod>),
    Module(&'static str),
    Iterator(Rc<RefCell<IterValue>>),
    Object(Rc<dyn NativeObject>),
    /// Type objects without a callable constructor, e.g. `type(None)`
    Type(&'static str),
}

/// A user function together with the scopes it closes over.
pub struct Closure {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    pub env: Vec<Scope>,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({})", self.def.name)
    }
}

/// A function exported by a native module, e.g. `math.sqrt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFunction {
    pub module: &'static str,
    pub name: &'static str,
}

impl NativeFunction {
    pub fn qualified(&self) -> QualifiedName {
        let mut segments: Vec<&str> = self.module.split('.').collect();
        segments.push(self.name);
        QualifiedName::from_segments(&segments)
            .unwrap_or_else(|| QualifiedName::new(self.module, vec![self.name.to_string()]))
    }
}

#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub receiver: Value,
    pub name: Rc<str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn len(&self) -> usize {
        let span = if self.step > 0 {
            (self.stop as i128 - self.start as i128 + self.step as i128 - 1) / self.step as i128
        } else {
            (self.start as i128 - self.stop as i128 - self.step as i128 - 1) / (-(self.step as i128))
        };
        span.max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        Some(self.start + self.step * index as i64)
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (value - self.start) % self.step == 0
    }
}

/// Iterator produced by `iter()`, `map()`, `zip()` and generator expressions.
/// Items are computed eagerly; iteration only advances the cursor.
#[derive(Debug, Clone, Default)]
pub struct IterValue {
    pub items: Vec<Value>,
    pub pos: usize,
}

impl IterValue {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items, pos: 0 }
    }

    pub fn next_item(&mut self) -> Option<Value> {
        let item = self.items.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    pub fn drain_rest(&mut self) -> Vec<Value> {
        let rest = self.items.get(self.pos..).map(<[Value]>::to_vec).unwrap_or_default();
        self.pos = self.items.len();
        rest
    }
}

/// Host-implemented objects handed to scripts by native modules
/// (figures, compiled patterns, datetimes, ...).
pub trait NativeObject: fmt::Debug {
    fn type_name(&self) -> &'static str;

    fn repr(&self) -> String;

    fn str(&self) -> String {
        self.repr()
    }

    /// Plain (non-method) attribute lookup.
    fn get_attr(&self, _name: &str) -> Option<Value> {
        None
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(
        &self,
        interp: &mut crate::engine::Interpreter,
        name: &str,
        args: crate::engine::args::Args,
    ) -> Result<Value>;

    fn equals(&self, _other: &dyn NativeObject) -> Option<bool> {
        None
    }

    fn compare(&self, _other: &dyn NativeObject) -> Option<Ordering> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

// ============================================================================
// Ordered hash table backing dict and set
// ============================================================================

/// Normalised hash key: `1`, `1.0` and `True` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Static(&'static str),
    Ptr(usize),
}

/// Insertion-ordered table. Removed slots become tombstones and are compacted
/// once they dominate.
#[derive(Debug, Clone, Default)]
pub struct DictValue {
    index: HashMap<HashKey, usize>,
    entries: Vec<Option<(Value, Value)>>,
    live: usize,
    /// Created by `collections.Counter`
    pub counter: bool,
}

impl DictValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty dict that behaves as a `collections.Counter`.
    pub fn counter() -> Self {
        Self {
            counter: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>> {
        let hk = key.hash_key()?;
        Ok(self
            .index
            .get(&hk)
            .and_then(|&i| self.entries[i].as_ref())
            .map(|(_, v)| v.clone()))
    }

    pub fn contains(&self, key: &Value) -> Result<bool> {
        Ok(self.index.contains_key(&key.hash_key()?))
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<()> {
        let hk = key.hash_key()?;
        match self.index.get(&hk) {
            Some(&i) => {
                if let Some(entry) = self.entries[i].as_mut() {
                    entry.1 = value;
                }
            }
            None => {
                self.index.insert(hk, self.entries.len());
                self.entries.push(Some((key, value)));
                self.live += 1;
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &Value) -> Result<Option<Value>> {
        let hk = key.hash_key()?;
        let Some(i) = self.index.remove(&hk) else {
            return Ok(None);
        };
        let removed = self.entries[i].take().map(|(_, v)| v);
        self.live -= 1;
        if self.entries.len() > 32 && self.live * 2 < self.entries.len() {
            self.compact();
        }
        Ok(removed)
    }

    /// Remove and return the most recently inserted entry.
    pub fn pop_last(&mut self) -> Option<(Value, Value)> {
        while let Some(slot) = self.entries.pop() {
            if let Some((k, v)) = slot {
                if let Ok(hk) = k.hash_key() {
                    self.index.remove(&hk);
                }
                self.live -= 1;
                return Some((k, v));
            }
        }
        None
    }

    /// Remove and return the oldest entry.
    pub fn pop_first(&mut self) -> Option<(Value, Value)> {
        let key = self.keys().into_iter().next()?;
        let value = self.remove(&key).ok().flatten()?;
        Some((key, value))
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
        self.live = 0;
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.iter().flatten().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().flatten().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries.iter().flatten().cloned().collect()
    }

    fn compact(&mut self) {
        let items = self.items();
        self.clear();
        for (k, v) in items {
            if let Ok(hk) = k.hash_key() {
                self.index.insert(hk, self.entries.len());
                self.entries.push(Some((k, v)));
                self.live += 1;
            }
        }
    }

    pub fn from_items(items: Vec<(Value, Value)>) -> Result<Self> {
        let mut dict = Self::new();
        for (k, v) in items {
            dict.insert(k, v)?;
        }
        Ok(dict)
    }

    pub fn from_keys(keys: Vec<Value>) -> Result<Self> {
        let mut set = Self::new();
        for k in keys {
            set.insert(k, Value::None)?;
        }
        Ok(set)
    }
}

// ============================================================================
// Value helpers
// ============================================================================

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(items))
    }

    pub fn dict(dict: DictValue) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(set: DictValue) -> Self {
        Value::Set(Rc::new(RefCell::new(set)))
    }

    pub fn from_char(c: char) -> Self {
        let mut buf = [0u8; 4];
        Value::from(&*c.encode_utf8(&mut buf))
    }

    pub fn iterator(items: Vec<Value>) -> Self {
        Value::Iterator(Rc::new(RefCell::new(IterValue::new(items))))
    }

    pub fn exception(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Value::Exception(Rc::new(ScriptException::new(kind, message)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(d) => {
                if d.borrow().counter {
                    "Counter"
                } else {
                    "dict"
                }
            }
            Value::Set(_) => "set",
            Value::Range(_) => "range",
            Value::Function(_) => "function",
            Value::Builtin(b) if b.is_type() => "type",
            Value::Builtin(_) | Value::Native(_) => "builtin_function_or_method",
            Value::ExceptionClass(_) | Value::Type(_) => "type",
            Value::Exception(e) => e.kind.name(),
            Value::BoundMethod(_) => "method",
            Value::Module(_) => "module",
            Value::Iterator(_) => "iterator",
            Value::Object(o) => o.type_name(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) | Value::Set(d) => !d.borrow().is_empty(),
            Value::Range(r) => !r.is_empty(),
            _ => true,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_)
                | Value::Builtin(_)
                | Value::ExceptionClass(_)
                | Value::Native(_)
                | Value::BoundMethod(_)
        )
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn hash_key(&self) -> Result<HashKey> {
        match self {
            Value::None => Ok(HashKey::None),
            Value::Bool(b) => Ok(HashKey::Int(*b as i64)),
            Value::Int(i) => Ok(HashKey::Int(*i)),
            Value::Float(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 {
                    Ok(HashKey::Int(*f as i64))
                } else {
                    Ok(HashKey::Float(f.to_bits()))
                }
            }
            Value::Str(s) => Ok(HashKey::Str(s.clone())),
            Value::Tuple(items) => {
                let keys = items.iter().map(Value::hash_key).collect::<Result<Vec<_>>>()?;
                Ok(HashKey::Tuple(keys))
            }
            Value::Builtin(b) => Ok(HashKey::Static(b.name())),
            Value::ExceptionClass(k) => Ok(HashKey::Static(k.name())),
            Value::Type(name) | Value::Module(name) => Ok(HashKey::Static(name)),
            Value::Function(f) => Ok(HashKey::Ptr(Rc::as_ptr(f) as *const u8 as usize)),
            Value::Range(r) => Ok(HashKey::Tuple(vec![
                HashKey::Static("range"),
                HashKey::Int(r.start),
                HashKey::Int(r.stop),
                HashKey::Int(r.step),
            ])),
            Value::Object(o) => Ok(HashKey::Ptr(Rc::as_ptr(o) as *const u8 as usize)),
            _ => Err(SandboxError::type_error(format!(
                "unhashable type: '{}'",
                self.type_name()
            ))),
        }
    }

    /// Identity comparison for `is`.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) | (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::ExceptionClass(a), Value::ExceptionClass(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => Rc::ptr_eq(a, b),
            (Value::Module(a), Value::Module(b)) | (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn repr(&self) -> String {
        let mut out = String::new();
        write_repr(self, &mut out, 0);
        out
    }

    /// `str()` conversion.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(e) => e.message.clone(),
            Value::Object(o) => o.str(),
            _ => self.repr(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other)
    }
}

// ============================================================================
// Equality and ordering
// ============================================================================

pub fn values_equal(a: &Value, b: &Value) -> bool {
    equal_at(a, b, 0)
}

fn equal_at(a: &Value, b: &Value, depth: usize) -> bool {
    if depth > MAX_DEPTH {
        return false;
    }
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Float(_), _) | (_, Value::Float(_)) => match (a.as_float(), b.as_float()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => a.as_int() == b.as_int(),
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| equal_at(p, q, depth + 1))
        }
        (Value::Tuple(x), Value::Tuple(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| equal_at(p, q, depth + 1))
        }
        (Value::Dict(x), Value::Dict(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.items().iter().all(|(k, v)| match y.get(k) {
                    Ok(Some(other)) => equal_at(v, &other, depth + 1),
                    _ => false,
                })
        }
        (Value::Set(x), Value::Set(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.keys().iter().all(|k| y.contains(k).unwrap_or(false))
        }
        (Value::Range(x), Value::Range(y)) => x == y,
        (Value::Object(x), Value::Object(y)) => {
            x.equals(y.as_ref()).unwrap_or_else(|| Rc::ptr_eq(x, y))
        }
        (Value::Native(x), Value::Native(y)) => x == y,
        _ => a.is_same(b),
    }
}

pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering> {
    compare_at(a, b, 0)
}

fn compare_at(a: &Value, b: &Value, depth: usize) -> Result<Ordering> {
    if depth > MAX_DEPTH {
        return Err(SandboxError::runtime(
            ExceptionKind::RecursionError,
            "maximum recursion depth exceeded in comparison",
        ));
    }
    match (a, b) {
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            Ok(a.as_int().cmp(&b.as_int()))
        }
        (
            Value::Int(_) | Value::Bool(_) | Value::Float(_),
            Value::Int(_) | Value::Bool(_) | Value::Float(_),
        ) => {
            let (x, y) = (a.as_float().unwrap_or(0.0), b.as_float().unwrap_or(0.0));
            Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
        }
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            compare_sequences(&x, &y, depth)
        }
        (Value::Tuple(x), Value::Tuple(y)) => compare_sequences(x, y, depth),
        (Value::Object(x), Value::Object(y)) => x.compare(y.as_ref()).ok_or_else(|| unorderable(a, b)),
        _ => Err(unorderable(a, b)),
    }
}

fn compare_sequences(x: &[Value], y: &[Value], depth: usize) -> Result<Ordering> {
    for (p, q) in x.iter().zip(y.iter()) {
        if !equal_at(p, q, depth + 1) {
            return compare_at(p, q, depth + 1);
        }
    }
    Ok(x.len().cmp(&y.len()))
}

fn unorderable(a: &Value, b: &Value) -> SandboxError {
    SandboxError::type_error(format!(
        "'<' not supported between instances of '{}' and '{}'",
        a.type_name(),
        b.type_name()
    ))
}

// ============================================================================
// repr
// ============================================================================

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let abs = f.abs();
    if !(1e-4..1e16).contains(&abs) {
        let formatted = format!("{:e}", f);
        let (mantissa, exponent) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let exp: i32 = exponent.parse().unwrap_or(0);
        let sign = if exp < 0 { '-' } else { '+' };
        return format!("{}e{}{:02}", mantissa, sign, exp.abs());
    }
    let formatted = format!("{}", f);
    if formatted.contains('.') {
        formatted
    } else {
        format!("{}.0", formatted)
    }
}

pub fn repr_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

fn write_repr(value: &Value, out: &mut String, depth: usize) {
    if depth > MAX_DEPTH {
        out.push_str("...");
        return;
    }
    match value {
        Value::None => out.push_str("None"),
        Value::Bool(true) => out.push_str("True"),
        Value::Bool(false) => out.push_str("False"),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => out.push_str(&format_float(*f)),
        Value::Str(s) => out.push_str(&repr_str(s)),
        Value::List(items) => {
            let Ok(items) = items.try_borrow() else {
                out.push_str("[...]");
                return;
            };
            write_seq(&items, "[", "]", out, depth);
        }
        Value::Tuple(items) => {
            if items.len() == 1 {
                out.push('(');
                write_repr(&items[0], out, depth + 1);
                out.push_str(",)");
            } else {
                write_seq(items, "(", ")", out, depth);
            }
        }
        Value::Dict(dict) => {
            let Ok(dict) = dict.try_borrow() else {
                out.push_str("{...}");
                return;
            };
            if dict.counter {
                out.push_str("Counter(");
            }
            out.push('{');
            for (i, (k, v)) in dict.items().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(k, out, depth + 1);
                out.push_str(": ");
                write_repr(v, out, depth + 1);
            }
            out.push('}');
            if dict.counter {
                out.push(')');
            }
        }
        Value::Set(set) => {
            let Ok(set) = set.try_borrow() else {
                out.push_str("{...}");
                return;
            };
            if set.is_empty() {
                out.push_str("set()");
            } else {
                write_seq(&set.keys(), "{", "}", out, depth);
            }
        }
        Value::Range(r) => {
            if r.step == 1 {
                out.push_str(&format!("range({}, {})", r.start, r.stop));
            } else {
                out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
            }
        }
        Value::Function(f) => out.push_str(&format!("<function {}>", f.def.name)),
        Value::Builtin(b) if b.is_type() => out.push_str(&format!("<class '{}'>", b.name())),
        Value::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name())),
        Value::ExceptionClass(k) => out.push_str(&format!("<class '{}'>", k.name())),
        Value::Type(name) => out.push_str(&format!("<class '{}'>", name)),
        Value::Exception(e) => {
            out.push_str(e.kind.name());
            out.push('(');
            if !e.message.is_empty() {
                out.push_str(&repr_str(&e.message));
            }
            out.push(')');
        }
        Value::Native(n) => out.push_str(&format!("<built-in function {}>", n.name)),
        Value::BoundMethod(m) => out.push_str(&format!(
            "<built-in method {} of {} object>",
            m.name,
            m.receiver.type_name()
        )),
        Value::Module(name) => out.push_str(&format!("<module '{}'>", name)),
        Value::Iterator(_) => out.push_str("<iterator object>"),
        Value::Object(o) => out.push_str(&o.repr()),
    }
}

fn write_seq(items: &[Value], open: &str, close: &str, out: &mut String, depth: usize) {
    out.push_str(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_repr(item, out, depth + 1);
    }
    out.push_str(close);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_dict_starts_empty() {
        let counter = DictValue::counter();
        assert!(counter.counter);
        assert!(counter.is_empty());
        assert!(!DictValue::new().counter);
    }

    #[test]
    fn test_float_repr() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(-3.0), "-3.0");
        assert_eq!(format_float(f64::INFINITY), "inf");
        assert_eq!(format_float(f64::NAN), "nan");
    }

    #[test]
    fn test_str_repr_quotes() {
        assert_eq!(repr_str("abc"), "'abc'");
        assert_eq!(repr_str("it's"), "\"it's\"");
        assert_eq!(repr_str("a\nb"), "'a\\nb'");
    }

    #[test]
    fn test_container_repr() {
        let value = Value::list(vec![
            Value::Int(1),
            Value::from("x"),
            Value::tuple(vec![Value::None]),
            Value::Bool(true),
        ]);
        assert_eq!(value.repr(), "[1, 'x', (None,), True]");
        assert_eq!(Value::set(DictValue::new()).repr(), "set()");
    }

    #[test]
    fn test_numeric_key_normalisation() {
        let mut dict = DictValue::new();
        dict.insert(Value::Int(1), Value::from("int")).unwrap();
        dict.insert(Value::Float(1.0), Value::from("float")).unwrap();
        dict.insert(Value::Bool(true), Value::from("bool")).unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(&Value::Int(1)).unwrap(), Some(Value::from("bool")));
    }

    #[test]
    fn test_dict_preserves_insertion_order_after_removal() {
        let mut dict = DictValue::new();
        for i in 0..5 {
            dict.insert(Value::Int(i), Value::Int(i * 10)).unwrap();
        }
        dict.remove(&Value::Int(2)).unwrap();
        dict.insert(Value::Int(2), Value::Int(99)).unwrap();
        let keys: Vec<i64> = dict.keys().iter().filter_map(Value::as_int).collect();
        assert_eq!(keys, vec![0, 1, 3, 4, 2]);
    }

    #[test]
    fn test_unhashable_list() {
        let mut dict = DictValue::new();
        let err = dict.insert(Value::list(vec![]), Value::None).unwrap_err();
        assert_eq!(err.to_string(), "TypeError: unhashable type: 'list'");
    }

    #[test]
    fn test_cross_type_equality() {
        assert!(values_equal(&Value::Int(2), &Value::Float(2.0)));
        assert!(values_equal(&Value::Bool(true), &Value::Int(1)));
        assert!(!values_equal(&Value::from("1"), &Value::Int(1)));
    }

    #[test]
    fn test_self_referential_list_repr_terminates() {
        let list = Value::list(vec![]);
        if let Value::List(inner) = &list {
            inner.borrow_mut().push(list.clone());
        }
        assert!(list.repr().contains("..."));
    }

    #[test]
    fn test_sequence_ordering() {
        let a = Value::tuple(vec![Value::Int(1), Value::from("b")]);
        let b = Value::tuple(vec![Value::Int(1), Value::from("c")]);
        assert_eq!(compare_values(&a, &b).unwrap(), Ordering::Less);
        assert!(compare_values(&Value::Int(1), &Value::from("a")).is_err());
    }

    #[test]
    fn test_range_len() {
        assert_eq!(RangeValue { start: 0, stop: 10, step: 3 }.len(), 4);
        assert_eq!(RangeValue { start: 10, stop: 0, step: -2 }.len(), 5);
        assert_eq!(RangeValue { start: 5, stop: 0, step: 1 }.len(), 0);
        assert!(RangeValue { start: 10, stop: 0, step: -2 }.contains(4));
    }
}
