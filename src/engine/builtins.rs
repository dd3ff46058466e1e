//! Builtin functions
//!
//! Only the functions listed in the policy registry are ever reachable; the
//! enum is the closed set the interpreter knows how to run.

use std::cmp::Ordering;

use crate::engine::args::Args;
use crate::engine::interpreter::Interpreter;
use crate::engine::modules;
use crate::engine::ops;
use crate::engine::value::{compare_values, DictValue, RangeValue, Value};
use crate::error::{ExceptionKind, Result, SandboxError};
use crate::parser::ast::BinOp;
use crate::security::guard::is_restricted_attribute;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Isinstance,
    Range,
    Float,
    Int,
    Bool,
    Str,
    Set,
    List,
    Dict,
    Tuple,
    Round,
    Ceil,
    Floor,
    Log,
    Exp,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Degrees,
    Radians,
    Pow,
    Sqrt,
    Len,
    Sum,
    Max,
    Min,
    Abs,
    Enumerate,
    Zip,
    Reversed,
    Sorted,
    All,
    Any,
    Map,
    Filter,
    Ord,
    Chr,
    Next,
    Iter,
    Divmod,
    Callable,
    Getattr,
    Hasattr,
    Issubclass,
    Type,
    SendImageToClient,
}

const NAMES: &[(Builtin, &str)] = &[
    (Builtin::Print, "print"),
    (Builtin::Isinstance, "isinstance"),
    (Builtin::Range, "range"),
    (Builtin::Float, "float"),
    (Builtin::Int, "int"),
    (Builtin::Bool, "bool"),
    (Builtin::Str, "str"),
    (Builtin::Set, "set"),
    (Builtin::List, "list"),
    (Builtin::Dict, "dict"),
    (Builtin::Tuple, "tuple"),
    (Builtin::Round, "round"),
    (Builtin::Ceil, "ceil"),
    (Builtin::Floor, "floor"),
    (Builtin::Log, "log"),
    (Builtin::Exp, "exp"),
    (Builtin::Sin, "sin"),
    (Builtin::Cos, "cos"),
    (Builtin::Tan, "tan"),
    (Builtin::Asin, "asin"),
    (Builtin::Acos, "acos"),
    (Builtin::Atan, "atan"),
    (Builtin::Atan2, "atan2"),
    (Builtin::Degrees, "degrees"),
    (Builtin::Radians, "radians"),
    (Builtin::Pow, "pow"),
    (Builtin::Sqrt, "sqrt"),
    (Builtin::Len, "len"),
    (Builtin::Sum, "sum"),
    (Builtin::Max, "max"),
    (Builtin::Min, "min"),
    (Builtin::Abs, "abs"),
    (Builtin::Enumerate, "enumerate"),
    (Builtin::Zip, "zip"),
    (Builtin::Reversed, "reversed"),
    (Builtin::Sorted, "sorted"),
    (Builtin::All, "all"),
    (Builtin::Any, "any"),
    (Builtin::Map, "map"),
    (Builtin::Filter, "filter"),
    (Builtin::Ord, "ord"),
    (Builtin::Chr, "chr"),
    (Builtin::Next, "next"),
    (Builtin::Iter, "iter"),
    (Builtin::Divmod, "divmod"),
    (Builtin::Callable, "callable"),
    (Builtin::Getattr, "getattr"),
    (Builtin::Hasattr, "hasattr"),
    (Builtin::Issubclass, "issubclass"),
    (Builtin::Type, "type"),
    (Builtin::SendImageToClient, "send_image_to_client"),
];

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        NAMES.iter().find(|(_, n)| *n == name).map(|(b, _)| *b)
    }

    pub fn name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(b, _)| *b == self)
            .map(|(_, n)| *n)
            .unwrap_or("<builtin>")
    }

    /// Builtins that are also types (usable with `isinstance`).
    pub fn is_type(self) -> bool {
        matches!(
            self,
            Builtin::Float
                | Builtin::Int
                | Builtin::Bool
                | Builtin::Str
                | Builtin::Set
                | Builtin::List
                | Builtin::Dict
                | Builtin::Tuple
                | Builtin::Range
        )
    }
}

pub fn call(interp: &mut Interpreter<'_>, builtin: Builtin, mut args: Args) -> Result<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Print => {
            let sep = text_keyword(&mut args, "sep", " ")?;
            let end = text_keyword(&mut args, "end", "\n")?;
            args.take_keyword("flush");
            args.check(name, 0, usize::MAX)?;
            let mut line = String::new();
            for (i, value) in args.positional.iter().enumerate() {
                if i > 0 {
                    line.push_str(&sep);
                }
                line.push_str(&value.to_str());
            }
            line.push_str(&end);
            interp.state.output.write(&line);
            Ok(Value::None)
        }
        Builtin::Isinstance => {
            args.check(name, 2, 2)?;
            Ok(Value::Bool(isinstance(&args.positional[0], &args.positional[1])?))
        }
        Builtin::Issubclass => {
            args.check(name, 2, 2)?;
            Ok(Value::Bool(issubclass(&args.positional[0], &args.positional[1])?))
        }
        Builtin::Range => {
            args.check(name, 1, 3)?;
            let ints = (0..args.len())
                .map(|i| args.int(i, name))
                .collect::<Result<Vec<_>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => (0, 0, 1),
            };
            if step == 0 {
                return Err(SandboxError::value_error("range() arg 3 must not be zero"));
            }
            Ok(Value::Range(RangeValue { start, stop, step }))
        }
        Builtin::Float => {
            args.check(name, 0, 1)?;
            match args.get(0) {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Float),
                Some(v) => v.as_float().map(Value::Float).ok_or_else(|| {
                    SandboxError::type_error(format!(
                        "float() argument must be a string or a real number, not '{}'",
                        v.type_name()
                    ))
                }),
            }
        }
        Builtin::Int => {
            let base = args.take_keyword("base");
            args.check(name, 0, 2)?;
            let base = match base.or_else(|| args.get(1).cloned()) {
                Some(b) => Some(b.as_int().ok_or_else(|| {
                    SandboxError::type_error("int() base must be an integer")
                })?),
                None => None,
            };
            match (args.get(0), base) {
                (None, _) => Ok(Value::Int(0)),
                (Some(Value::Str(s)), base) => parse_int(s, base.unwrap_or(10)).map(Value::Int),
                (Some(_), Some(_)) => Err(SandboxError::type_error(
                    "int() can't convert non-string with explicit base",
                )),
                (Some(Value::Float(f)), None) => float_to_int(*f).map(Value::Int),
                (Some(v), None) => v.as_int().map(Value::Int).ok_or_else(|| {
                    SandboxError::type_error(format!(
                        "int() argument must be a string or a real number, not '{}'",
                        v.type_name()
                    ))
                }),
            }
        }
        Builtin::Bool => {
            args.check(name, 0, 1)?;
            Ok(Value::Bool(args.get(0).is_some_and(Value::truthy)))
        }
        Builtin::Str => {
            args.check(name, 0, 1)?;
            Ok(Value::from(args.get(0).map(Value::to_str).unwrap_or_default()))
        }
        Builtin::List => {
            args.check(name, 0, 1)?;
            let items = match args.get(0) {
                Some(v) => interp.iterate(v)?,
                None => Vec::new(),
            };
            Ok(Value::list(items))
        }
        Builtin::Tuple => {
            args.check(name, 0, 1)?;
            match args.get(0) {
                Some(Value::Tuple(t)) => Ok(Value::Tuple(t.clone())),
                Some(v) => Ok(Value::tuple(interp.iterate(v)?)),
                None => Ok(Value::tuple(Vec::new())),
            }
        }
        Builtin::Set => {
            args.check(name, 0, 1)?;
            let items = match args.get(0) {
                Some(v) => interp.iterate(v)?,
                None => Vec::new(),
            };
            Ok(Value::set(DictValue::from_keys(items)?))
        }
        Builtin::Dict => {
            let keywords = std::mem::take(&mut args.keywords);
            args.check(name, 0, 1)?;
            let mut dict = match args.get(0) {
                Some(v) => dict_from(interp, v)?,
                None => DictValue::new(),
            };
            for (k, v) in keywords {
                dict.insert(Value::from(k), v)?;
            }
            Ok(Value::dict(dict))
        }
        Builtin::Round => {
            let ndigits = args.take(1, "ndigits");
            args.check(name, 1, 2)?;
            round(&args.positional[0], ndigits.filter(|v| !matches!(v, Value::None)))
        }
        Builtin::Ceil
        | Builtin::Floor
        | Builtin::Log
        | Builtin::Exp
        | Builtin::Sin
        | Builtin::Cos
        | Builtin::Tan
        | Builtin::Asin
        | Builtin::Acos
        | Builtin::Atan
        | Builtin::Atan2
        | Builtin::Degrees
        | Builtin::Radians
        | Builtin::Sqrt => modules::math::call(interp, name, args),
        Builtin::Pow => {
            args.check(name, 2, 3)?;
            match args.get(2) {
                None | Some(Value::None) => {
                    let max_len = interp.state.limits().max_sequence_length;
                    ops::binary(BinOp::Pow, &args.positional[0], &args.positional[1], max_len)
                }
                Some(_) => {
                    let (b, e, m) = (args.int(0, name)?, args.int(1, name)?, args.int(2, name)?);
                    mod_pow(b, e, m).map(Value::Int)
                }
            }
        }
        Builtin::Len => {
            args.check(name, 1, 1)?;
            len(&args.positional[0]).map(|n| Value::Int(n as i64))
        }
        Builtin::Sum => {
            let start = args.take(1, "start").unwrap_or(Value::Int(0));
            args.check(name, 1, 2)?;
            if let Value::Str(_) = start {
                return Err(SandboxError::type_error(
                    "sum() can't sum strings [use ''.join(seq) instead]",
                ));
            }
            let max_len = interp.state.limits().max_sequence_length;
            let mut total = start;
            for item in interp.iterate(&args.positional[0])? {
                total = ops::binary(BinOp::Add, &total, &item, max_len)?;
            }
            Ok(total)
        }
        Builtin::Max | Builtin::Min => extremum(interp, builtin, args),
        Builtin::Abs => {
            args.check(name, 1, 1)?;
            match &args.positional[0] {
                Value::Float(f) => Ok(Value::Float(f.abs())),
                v @ (Value::Int(_) | Value::Bool(_)) => v
                    .as_int()
                    .and_then(i64::checked_abs)
                    .map(Value::Int)
                    .ok_or_else(|| SandboxError::runtime(ExceptionKind::OverflowError, "integer overflow")),
                v => Err(SandboxError::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    v.type_name()
                ))),
            }
        }
        Builtin::Enumerate => {
            let start = args.take(1, "start").unwrap_or(Value::Int(0));
            args.check(name, 1, 2)?;
            let start = start
                .as_int()
                .ok_or_else(|| SandboxError::type_error("enumerate() start must be an integer"))?;
            let items = interp.iterate(&args.positional[0])?;
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                let index = start.checked_add(i as i64).ok_or_else(|| {
                    SandboxError::runtime(ExceptionKind::OverflowError, "integer overflow")
                })?;
                out.push(Value::tuple(vec![Value::Int(index), item]));
            }
            Ok(Value::iterator(out))
        }
        Builtin::Zip => {
            args.take_keyword("strict");
            args.check(name, 0, usize::MAX)?;
            let columns = args
                .positional
                .iter()
                .map(|v| interp.iterate(v))
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::iterator(zip_columns(columns)))
        }
        Builtin::Reversed => {
            args.check(name, 1, 1)?;
            let value = &args.positional[0];
            match value {
                Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Range(_) | Value::Dict(_) => {
                    let mut items = interp.iterate(value)?;
                    items.reverse();
                    Ok(Value::iterator(items))
                }
                other => Err(SandboxError::type_error(format!(
                    "'{}' object is not reversible",
                    other.type_name()
                ))),
            }
        }
        Builtin::Sorted => {
            let key = args.take_keyword("key").filter(|k| !matches!(k, Value::None));
            let reverse = args.take_keyword("reverse").is_some_and(|r| r.truthy());
            args.check(name, 1, 1)?;
            let items = interp.iterate(&args.positional[0])?;
            Ok(Value::list(interp.sort_values(items, key, reverse)?))
        }
        Builtin::All => {
            args.check(name, 1, 1)?;
            Ok(Value::Bool(interp.iterate(&args.positional[0])?.iter().all(Value::truthy)))
        }
        Builtin::Any => {
            args.check(name, 1, 1)?;
            Ok(Value::Bool(interp.iterate(&args.positional[0])?.iter().any(Value::truthy)))
        }
        Builtin::Map => {
            args.check(name, 2, usize::MAX)?;
            let func = args.positional[0].clone();
            let columns = args.positional[1..]
                .iter()
                .map(|v| interp.iterate(v))
                .collect::<Result<Vec<_>>>()?;
            let mut out = Vec::new();
            for row in zip_rows(columns) {
                out.push(interp.call_value(&func, Args::new(row))?);
            }
            Ok(Value::iterator(out))
        }
        Builtin::Filter => {
            args.check(name, 2, 2)?;
            let func = args.positional[0].clone();
            let mut out = Vec::new();
            for item in interp.iterate(&args.positional[1])? {
                let keep = match func {
                    Value::None => item.truthy(),
                    _ => interp.call_value(&func, Args::new(vec![item.clone()]))?.truthy(),
                };
                if keep {
                    out.push(item);
                }
            }
            Ok(Value::iterator(out))
        }
        Builtin::Ord => {
            args.check(name, 1, 1)?;
            let s = args.str(0, name)?;
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(Value::Int(c as i64)),
                _ => Err(SandboxError::type_error(format!(
                    "ord() expected a character, but string of length {} found",
                    s.chars().count()
                ))),
            }
        }
        Builtin::Chr => {
            args.check(name, 1, 1)?;
            let i = args.int(0, name)?;
            u32::try_from(i)
                .ok()
                .and_then(char::from_u32)
                .map(|c| Value::from(c.to_string()))
                .ok_or_else(|| SandboxError::value_error("chr() arg not in range(0x110000)"))
        }
        Builtin::Next => {
            args.check(name, 1, 2)?;
            match &args.positional[0] {
                Value::Iterator(it) => {
                    let item = it.borrow_mut().next_item();
                    match (item, args.get(1)) {
                        (Some(item), _) => Ok(item),
                        (None, Some(default)) => Ok(default.clone()),
                        (None, None) => Err(SandboxError::runtime(ExceptionKind::StopIteration, "")),
                    }
                }
                other => Err(SandboxError::type_error(format!(
                    "'{}' object is not an iterator",
                    other.type_name()
                ))),
            }
        }
        Builtin::Iter => {
            args.check(name, 1, 1)?;
            match &args.positional[0] {
                it @ Value::Iterator(_) => Ok(it.clone()),
                other => Ok(Value::iterator(interp.iterate(other)?)),
            }
        }
        Builtin::Divmod => {
            args.check(name, 2, 2)?;
            let (a, b) = (&args.positional[0], &args.positional[1]);
            let max_len = interp.state.limits().max_sequence_length;
            let q = ops::binary(BinOp::FloorDiv, a, b, max_len)?;
            let r = ops::binary(BinOp::Mod, a, b, max_len)?;
            Ok(Value::tuple(vec![q, r]))
        }
        Builtin::Callable => {
            args.check(name, 1, 1)?;
            Ok(Value::Bool(args.positional[0].is_callable()))
        }
        Builtin::Getattr | Builtin::Hasattr => {
            let max = if builtin == Builtin::Getattr { 3 } else { 2 };
            args.check(name, 2, max)?;
            let attr = match &args.positional[1] {
                Value::Str(s) => s.clone(),
                _ => return Err(SandboxError::type_error("attribute name must be string")),
            };
            if is_restricted_attribute(&attr) {
                return Err(SandboxError::policy(format!("attribute '{}' is not permitted", attr)));
            }
            let result = interp.get_attribute(&args.positional[0], &attr);
            match (builtin, result) {
                (Builtin::Hasattr, Ok(_)) => Ok(Value::Bool(true)),
                (_, Ok(value)) => Ok(value),
                (Builtin::Hasattr, Err(SandboxError::Runtime(e))) if e.kind == ExceptionKind::AttributeError => {
                    Ok(Value::Bool(false))
                }
                (_, Err(SandboxError::Runtime(e))) if e.kind == ExceptionKind::AttributeError && args.len() == 3 => {
                    Ok(args.positional[2].clone())
                }
                (_, Err(err)) => Err(err),
            }
        }
        Builtin::Type => {
            args.check(name, 1, 1)?;
            Ok(type_of(&args.positional[0]))
        }
        Builtin::SendImageToClient => modules::pyplot::send_image_to_client(interp, args),
    }
}

fn text_keyword(args: &mut Args, name: &str, default: &str) -> Result<String> {
    match args.take_keyword(name) {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(SandboxError::type_error(format!(
            "{} must be None or a string, not {}",
            name,
            other.type_name()
        ))),
    }
}

pub fn type_of(value: &Value) -> Value {
    match value {
        Value::Int(_) => Value::Builtin(Builtin::Int),
        Value::Float(_) => Value::Builtin(Builtin::Float),
        Value::Bool(_) => Value::Builtin(Builtin::Bool),
        Value::Str(_) => Value::Builtin(Builtin::Str),
        Value::List(_) => Value::Builtin(Builtin::List),
        Value::Tuple(_) => Value::Builtin(Builtin::Tuple),
        Value::Set(_) => Value::Builtin(Builtin::Set),
        Value::Range(_) => Value::Builtin(Builtin::Range),
        Value::Dict(d) if !d.borrow().counter => Value::Builtin(Builtin::Dict),
        Value::Exception(e) => Value::ExceptionClass(e.kind),
        other => Value::Type(other.type_name()),
    }
}

pub fn isinstance(value: &Value, class: &Value) -> Result<bool> {
    match class {
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if isinstance(value, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Builtin(b) if b.is_type() => Ok(match b {
            Builtin::Int => matches!(value, Value::Int(_) | Value::Bool(_)),
            Builtin::Float => matches!(value, Value::Float(_)),
            Builtin::Bool => matches!(value, Value::Bool(_)),
            Builtin::Str => matches!(value, Value::Str(_)),
            Builtin::List => matches!(value, Value::List(_)),
            Builtin::Tuple => matches!(value, Value::Tuple(_)),
            Builtin::Set => matches!(value, Value::Set(_)),
            Builtin::Dict => matches!(value, Value::Dict(_)),
            Builtin::Range => matches!(value, Value::Range(_)),
            _ => false,
        }),
        Value::ExceptionClass(kind) => Ok(match value {
            Value::Exception(e) => e.kind.is_subclass_of(*kind),
            _ => false,
        }),
        Value::Type(name) => Ok(value.type_name() == *name),
        _ => Err(SandboxError::type_error(
            "isinstance() arg 2 must be a type, a tuple of types, or a union",
        )),
    }
}

fn issubclass(class: &Value, classinfo: &Value) -> Result<bool> {
    if let Value::Tuple(infos) = classinfo {
        for info in infos.iter() {
            if issubclass(class, info)? {
                return Ok(true);
            }
        }
        return Ok(false);
    }
    match (class, classinfo) {
        (Value::ExceptionClass(a), Value::ExceptionClass(b)) => Ok(a.is_subclass_of(*b)),
        (Value::Builtin(a), Value::Builtin(b)) if a.is_type() && b.is_type() => {
            Ok(a == b || (*a == Builtin::Bool && *b == Builtin::Int))
        }
        (Value::ExceptionClass(_) | Value::Type(_), Value::Builtin(b)) if b.is_type() => Ok(false),
        (Value::Builtin(a), Value::ExceptionClass(_)) if a.is_type() => Ok(false),
        (Value::Type(a), Value::Type(b)) => Ok(a == b),
        _ => Err(SandboxError::type_error("issubclass() arg 1 must be a class")),
    }
}

pub fn len(value: &Value) -> Result<usize> {
    match value {
        Value::Str(s) => Ok(s.chars().count()),
        Value::List(l) => Ok(l.borrow().len()),
        Value::Tuple(t) => Ok(t.len()),
        Value::Dict(d) | Value::Set(d) => Ok(d.borrow().len()),
        Value::Range(r) => Ok(r.len()),
        other => Err(SandboxError::type_error(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

pub fn dict_from(interp: &mut Interpreter<'_>, source: &Value) -> Result<DictValue> {
    if let Value::Dict(d) = source {
        let mut copy = d.borrow().clone();
        copy.counter = false;
        return Ok(copy);
    }
    let mut dict = DictValue::new();
    for (i, item) in interp.iterate(source)?.into_iter().enumerate() {
        let pair = interp.iterate(&item)?;
        if pair.len() != 2 {
            return Err(SandboxError::value_error(format!(
                "dictionary update sequence element #{} has length {}; 2 is required",
                i,
                pair.len()
            )));
        }
        let mut pair = pair.into_iter();
        if let (Some(k), Some(v)) = (pair.next(), pair.next()) {
            dict.insert(k, v)?;
        }
    }
    Ok(dict)
}

fn zip_columns(columns: Vec<Vec<Value>>) -> Vec<Value> {
    zip_rows(columns).into_iter().map(Value::tuple).collect()
}

fn zip_rows(columns: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let shortest = columns.iter().map(Vec::len).min().unwrap_or(0);
    (0..shortest)
        .map(|i| columns.iter().map(|col| col[i].clone()).collect())
        .collect()
}

fn extremum(interp: &mut Interpreter<'_>, builtin: Builtin, mut args: Args) -> Result<Value> {
    let name = builtin.name();
    let key = args.take_keyword("key").filter(|k| !matches!(k, Value::None));
    let default = args.take_keyword("default");
    args.check(name, 1, usize::MAX)?;
    let items = if args.len() == 1 {
        interp.iterate(&args.positional[0])?
    } else {
        args.positional
    };
    let want = if builtin == Builtin::Max {
        Ordering::Greater
    } else {
        Ordering::Less
    };

    let mut best: Option<(Value, Value)> = None;
    for item in items {
        let k = match &key {
            Some(f) => interp.call_value(f, Args::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        best = match best {
            None => Some((k, item)),
            Some((best_key, best_item)) => {
                if compare_values(&k, &best_key)? == want {
                    Some((k, item))
                } else {
                    Some((best_key, best_item))
                }
            }
        };
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(SandboxError::value_error(format!(
            "{}() arg is an empty sequence",
            name
        ))),
    }
}

fn round(value: &Value, ndigits: Option<Value>) -> Result<Value> {
    let digits = match &ndigits {
        Some(d) => Some(d.as_int().ok_or_else(|| {
            SandboxError::type_error("'float' object cannot be interpreted as an integer")
        })?),
        None => None,
    };
    match value {
        Value::Int(_) | Value::Bool(_) => {
            let i = value.as_int().unwrap_or(0);
            match digits {
                Some(d) if d < 0 => {
                    let factor = 10f64.powi((-d).min(18) as i32);
                    Ok(Value::Int((round_half_even(i as f64 / factor) * factor) as i64))
                }
                _ => Ok(Value::Int(i)),
            }
        }
        Value::Float(f) => match digits {
            None => float_to_int(round_half_even(*f)).map(Value::Int),
            Some(d) => {
                let d = d.clamp(-308, 308) as i32;
                let factor = 10f64.powi(d);
                let scaled = f * factor;
                if !scaled.is_finite() {
                    return Ok(Value::Float(*f));
                }
                Ok(Value::Float(round_half_even(scaled) / factor))
            }
        },
        other => Err(SandboxError::type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        ))),
    }
}

fn round_half_even(x: f64) -> f64 {
    let rounded = x.round();
    if (x - x.trunc()).abs() == 0.5 {
        2.0 * (x / 2.0).round()
    } else {
        rounded
    }
}

pub fn float_to_int(f: f64) -> Result<i64> {
    if f.is_nan() {
        return Err(SandboxError::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() || f >= 9.223_372_036_854_775_808e18 || f < -9.223_372_036_854_775_808e18 {
        return Err(SandboxError::runtime(
            ExceptionKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    Ok(f.trunc() as i64)
}

pub fn parse_float(s: &str) -> Result<f64> {
    let t = s.trim().replace('_', "");
    let lower = t.to_ascii_lowercase();
    let value = match lower.trim_start_matches(['+', '-']) {
        "inf" | "infinity" => Some(f64::INFINITY),
        "nan" => Some(f64::NAN),
        _ => None,
    };
    if let Some(v) = value {
        return Ok(if lower.starts_with('-') { -v } else { v });
    }
    t.parse::<f64>()
        .ok()
        .filter(|_| !t.is_empty() && !lower.contains("inf") && !lower.contains("nan"))
        .ok_or_else(|| {
            SandboxError::value_error(format!("could not convert string to float: {}", Value::from(s).repr()))
        })
}

pub fn parse_int(s: &str, base: i64) -> Result<i64> {
    let invalid = || {
        SandboxError::value_error(format!(
            "invalid literal for int() with base {}: {}",
            base,
            Value::from(s).repr()
        ))
    };
    if base != 0 && !(2..=36).contains(&base) {
        return Err(SandboxError::value_error("int() base must be >= 2 and <= 36, or 0"));
    }
    let t = s.trim();
    let (negative, digits) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let lower = digits.to_ascii_lowercase();
    let (radix, body) = match (base, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &lower[2..]),
        (0 | 8, Some("0o")) => (8, &lower[2..]),
        (0 | 2, Some("0b")) => (2, &lower[2..]),
        (0, _) => (10, lower.as_str()),
        (b, _) => (b as u32, lower.as_str()),
    };
    if body.is_empty() || body.starts_with('_') || body.ends_with('_') || body.contains("__") {
        return Err(invalid());
    }
    let cleaned = body.replace('_', "");
    let magnitude = i128::from_str_radix(&cleaned, radix).map_err(|_| invalid())?;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).map_err(|_| {
        SandboxError::runtime(ExceptionKind::OverflowError, "int too large to convert")
    })
}

fn mod_pow(base: i64, exp: i64, modulus: i64) -> Result<i64> {
    if modulus == 0 {
        return Err(SandboxError::value_error("pow() 3rd argument cannot be 0"));
    }
    if exp < 0 {
        return Err(SandboxError::value_error(
            "pow() 2nd argument cannot be negative when 3rd argument specified",
        ));
    }
    let m = modulus as i128;
    let mut result: i128 = 1;
    let mut b = (base as i128).rem_euclid(m);
    let mut e = exp;
    while e > 0 {
        if e & 1 == 1 {
            result = (result * b).rem_euclid(m);
        }
        b = (b * b).rem_euclid(m);
        e >>= 1;
    }
    if modulus < 0 && result != 0 {
        result += m;
    }
    Ok(result as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        for (builtin, name) in NAMES {
            assert_eq!(Builtin::from_name(name), Some(*builtin));
            assert_eq!(builtin.name(), *name);
        }
        assert_eq!(Builtin::from_name("eval"), None);
    }

    #[test]
    fn test_parse_int_bases() {
        assert_eq!(parse_int(" 42 ", 10).unwrap(), 42);
        assert_eq!(parse_int("-ff", 16).unwrap(), -255);
        assert_eq!(parse_int("0b101", 0).unwrap(), 5);
        assert_eq!(parse_int("1_000", 10).unwrap(), 1000);
        let err = parse_int("abc", 10).unwrap_err();
        assert_eq!(
            err.to_string(),
            "ValueError: invalid literal for int() with base 10: 'abc'"
        );
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float(" 2.5 ").unwrap(), 2.5);
        assert!(parse_float("-inf").unwrap().is_infinite());
        assert!(parse_float("nan").unwrap().is_nan());
        assert!(parse_float("abc").is_err());
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round(&Value::Float(2.5), None).unwrap(), Value::Int(2));
        assert_eq!(round(&Value::Float(3.5), None).unwrap(), Value::Int(4));
        assert_eq!(
            round(&Value::Float(3.14159), Some(Value::Int(2))).unwrap(),
            Value::Float(3.14)
        );
        assert_eq!(round(&Value::Int(1234), Some(Value::Int(-2))).unwrap(), Value::Int(1200));
    }

    #[test]
    fn test_isinstance_bool_is_int() {
        assert!(isinstance(&Value::Bool(true), &Value::Builtin(Builtin::Int)).unwrap());
        assert!(!isinstance(&Value::Int(1), &Value::Builtin(Builtin::Bool)).unwrap());
        let classes = Value::tuple(vec![Value::Builtin(Builtin::Str), Value::Builtin(Builtin::Float)]);
        assert!(isinstance(&Value::Float(1.0), &classes).unwrap());
    }

    #[test]
    fn test_mod_pow() {
        assert_eq!(mod_pow(3, 200, 13).unwrap(), 9);
        assert!(mod_pow(2, 3, 0).is_err());
    }

    #[test]
    fn test_float_to_int_limits() {
        assert_eq!(float_to_int(-3.9).unwrap(), -3);
        assert!(float_to_int(f64::NAN).is_err());
        assert!(float_to_int(1e300).is_err());
    }
}
