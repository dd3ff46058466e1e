//! Methods of the builtin types (str, list, dict, set, tuple, int, float).
//!
//! Container methods clone what they need out of the `RefCell` before
//! calling back into the interpreter.

use std::rc::Rc;

use crate::engine::args::Args;
use crate::engine::builtins::dict_from;
use crate::engine::format::str_format;
use crate::engine::interpreter::Interpreter;
use crate::engine::value::{values_equal, DictValue, Value};
use crate::error::{ExceptionKind, Result, SandboxError};

const STR_METHODS: &[&str] = &[
    "capitalize", "casefold", "center", "count", "endswith", "find", "format", "index",
    "isalnum", "isalpha", "isdecimal", "isdigit", "islower", "isnumeric", "isspace",
    "istitle", "isupper", "join", "ljust", "lower", "lstrip", "partition", "removeprefix",
    "removesuffix", "replace", "rfind", "rindex", "rjust", "rpartition", "rsplit", "rstrip",
    "split", "splitlines", "startswith", "strip", "swapcase", "title", "upper", "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "appendleft", "clear", "copy", "count", "extend", "extendleft", "index",
    "insert", "pop", "popleft", "remove", "reverse", "rotate", "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "popitem", "setdefault", "update",
    "values",
];

const COUNTER_METHODS: &[&str] = &["elements", "most_common", "total"];

const SET_METHODS: &[&str] = &[
    "add", "clear", "copy", "difference", "difference_update", "discard", "intersection",
    "intersection_update", "isdisjoint", "issubset", "issuperset", "pop", "remove",
    "symmetric_difference", "union", "update",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];

pub fn has_method(value: &Value, name: &str) -> bool {
    match value {
        Value::Str(_) => STR_METHODS.contains(&name),
        Value::List(_) => LIST_METHODS.contains(&name),
        Value::Dict(d) => {
            DICT_METHODS.contains(&name) || (d.borrow().counter && COUNTER_METHODS.contains(&name))
        }
        Value::Set(_) => SET_METHODS.contains(&name),
        Value::Tuple(_) => TUPLE_METHODS.contains(&name),
        Value::Int(_) | Value::Bool(_) => name == "bit_length",
        Value::Float(_) => name == "is_integer",
        Value::Object(o) => o.has_method(name),
        _ => false,
    }
}

pub fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &Value,
    name: &str,
    args: Args,
) -> Result<Value> {
    match receiver {
        Value::Str(s) => str_method(interp, s, name, args),
        Value::List(_) => list_method(interp, receiver, name, args),
        Value::Dict(_) => dict_method(interp, receiver, name, args),
        Value::Set(_) => set_method(interp, receiver, name, args),
        Value::Tuple(items) => sequence_query(items, "tuple", name, args),
        Value::Int(_) | Value::Bool(_) if name == "bit_length" => {
            args.check(name, 0, 0)?;
            let i = receiver.as_int().unwrap_or(0);
            Ok(Value::Int(64 - i.unsigned_abs().leading_zeros() as i64))
        }
        Value::Float(f) if name == "is_integer" => {
            args.check(name, 0, 0)?;
            Ok(Value::Bool(f.is_finite() && f.fract() == 0.0))
        }
        Value::Object(o) => o.clone().call_method(interp, name, args),
        other => Err(no_attribute(other, name)),
    }
}

pub fn no_attribute(value: &Value, name: &str) -> SandboxError {
    SandboxError::runtime(
        ExceptionKind::AttributeError,
        format!("'{}' object has no attribute '{}'", value.type_name(), name),
    )
}

// ============================================================================
// str
// ============================================================================

fn char_index(s: &str, byte: usize) -> i64 {
    s[..byte].chars().count() as i64
}

fn optional_str(args: &Args, index: usize, func: &str) -> Result<Option<Rc<str>>> {
    match args.get(index) {
        None | Some(Value::None) => Ok(None),
        Some(_) => args.str(index, func).map(Some),
    }
}

/// Strings or a tuple of strings, for `startswith`/`endswith`.
fn affixes(value: &Value, func: &str) -> Result<Vec<Rc<str>>> {
    match value {
        Value::Str(s) => Ok(vec![s.clone()]),
        Value::Tuple(items) => items
            .iter()
            .map(|v| match v {
                Value::Str(s) => Ok(s.clone()),
                other => Err(SandboxError::type_error(format!(
                    "tuple for {} must only contain str, not {}",
                    func,
                    other.type_name()
                ))),
            })
            .collect(),
        other => Err(SandboxError::type_error(format!(
            "{} first arg must be str or a tuple of str, not {}",
            func,
            other.type_name()
        ))),
    }
}

fn str_method(interp: &mut Interpreter<'_>, s: &Rc<str>, name: &str, mut args: Args) -> Result<Value> {
    let max_len = interp.state.limits().max_sequence_length;
    let predicate = |f: fn(char) -> bool| Value::Bool(!s.is_empty() && s.chars().all(f));
    match name {
        "upper" | "lower" | "casefold" | "swapcase" | "title" | "capitalize" => {
            args.check(name, 0, 0)?;
            let out = match name {
                "upper" => s.to_uppercase(),
                "lower" | "casefold" => s.to_lowercase(),
                "swapcase" => s
                    .chars()
                    .flat_map(|c| {
                        if c.is_uppercase() {
                            c.to_lowercase().collect::<Vec<_>>()
                        } else {
                            c.to_uppercase().collect::<Vec<_>>()
                        }
                    })
                    .collect(),
                "title" => title_case(s),
                _ => {
                    let mut chars = s.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                        None => String::new(),
                    }
                }
            };
            Ok(Value::from(out))
        }
        "strip" | "lstrip" | "rstrip" => {
            args.check(name, 0, 1)?;
            let chars = optional_str(&args, 0, name)?;
            let matches = |c: char| match &chars {
                Some(set) => set.contains(c),
                None => c.is_whitespace(),
            };
            let out = match name {
                "strip" => s.trim_matches(matches),
                "lstrip" => s.trim_start_matches(matches),
                _ => s.trim_end_matches(matches),
            };
            Ok(Value::from(out))
        }
        "split" | "rsplit" => {
            let sep = args.take(0, "sep");
            let maxsplit = args.take(1, "maxsplit");
            args.positional.truncate(0);
            args.check(name, 0, 0)?;
            let maxsplit = match maxsplit {
                Some(v) => v.as_int().ok_or_else(|| SandboxError::type_error("maxsplit must be an integer"))?,
                None => -1,
            };
            let parts = match sep {
                None | Some(Value::None) => split_whitespace(s, maxsplit, name == "rsplit"),
                Some(Value::Str(sep)) => {
                    if sep.is_empty() {
                        return Err(SandboxError::value_error("empty separator"));
                    }
                    split_on(s, &sep, maxsplit, name == "rsplit")
                }
                Some(other) => {
                    return Err(SandboxError::type_error(format!(
                        "must be str or None, not {}",
                        other.type_name()
                    )))
                }
            };
            interp.state.check_sequence_len(parts.len())?;
            Ok(Value::list(parts.into_iter().map(Value::from).collect()))
        }
        "splitlines" => {
            let keepends = args.take(0, "keepends").is_some_and(|v| v.truthy());
            args.positional.truncate(0);
            args.check(name, 0, 0)?;
            Ok(Value::list(split_lines(s, keepends).into_iter().map(Value::from).collect()))
        }
        "join" => {
            args.check(name, 1, 1)?;
            let items = interp.iterate(&args.positional[0])?;
            let mut out = String::new();
            let sep_len = s.chars().count();
            let mut total = 0usize;
            for (i, item) in items.iter().enumerate() {
                let Value::Str(piece) = item else {
                    return Err(SandboxError::type_error(format!(
                        "sequence item {}: expected str instance, {} found",
                        i,
                        item.type_name()
                    )));
                };
                if i > 0 {
                    out.push_str(s);
                    total += sep_len;
                }
                total += piece.chars().count();
                if total > max_len {
                    interp.state.check_sequence_len(total)?;
                }
                out.push_str(piece);
            }
            Ok(Value::from(out))
        }
        "replace" => {
            args.check(name, 2, 3)?;
            let old = args.str(0, name)?;
            let new = args.str(1, name)?;
            let count = match args.get(2) {
                Some(v) => v.as_int().unwrap_or(-1),
                None => -1,
            };
            let occurrences = if old.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(old.as_ref() as &str).count()
            };
            let replaced = if count < 0 { occurrences } else { occurrences.min(count as usize) };
            let new_len = s.chars().count() + replaced * new.chars().count();
            interp.state.check_sequence_len(new_len)?;
            let out = if count < 0 {
                s.replace(old.as_ref() as &str, &new)
            } else {
                s.replacen(old.as_ref() as &str, &new, count as usize)
            };
            Ok(Value::from(out))
        }
        "find" | "rfind" | "index" | "rindex" => {
            args.check(name, 1, 3)?;
            let needle = args.str(0, name)?;
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(&args, chars.len())?;
            let window: String = chars[start..end].iter().collect();
            let found = if name.starts_with('r') {
                window.rfind(needle.as_ref() as &str)
            } else {
                window.find(needle.as_ref() as &str)
            };
            match found {
                Some(byte) => Ok(Value::Int(start as i64 + char_index(&window, byte))),
                None if name.ends_with("find") => Ok(Value::Int(-1)),
                None => Err(SandboxError::value_error("substring not found")),
            }
        }
        "count" => {
            args.check(name, 1, 3)?;
            let needle = args.str(0, name)?;
            let chars: Vec<char> = s.chars().collect();
            let (start, end) = slice_bounds(&args, chars.len())?;
            let window: String = chars[start..end].iter().collect();
            let n = if needle.is_empty() {
                end - start + 1
            } else {
                window.matches(needle.as_ref() as &str).count()
            };
            Ok(Value::Int(n as i64))
        }
        "startswith" | "endswith" => {
            args.check(name, 1, 1)?;
            let options = affixes(&args.positional[0], name)?;
            let hit = options.iter().any(|a| {
                if name == "startswith" {
                    s.starts_with(a.as_ref() as &str)
                } else {
                    s.ends_with(a.as_ref() as &str)
                }
            });
            Ok(Value::Bool(hit))
        }
        "removeprefix" | "removesuffix" => {
            args.check(name, 1, 1)?;
            let affix = args.str(0, name)?;
            let out = if name == "removeprefix" {
                s.strip_prefix(affix.as_ref() as &str)
            } else {
                s.strip_suffix(affix.as_ref() as &str)
            };
            Ok(Value::from(out.unwrap_or(s)))
        }
        "partition" | "rpartition" => {
            args.check(name, 1, 1)?;
            let sep = args.str(0, name)?;
            if sep.is_empty() {
                return Err(SandboxError::value_error("empty separator"));
            }
            let found = if name == "partition" {
                s.find(sep.as_ref() as &str)
            } else {
                s.rfind(sep.as_ref() as &str)
            };
            let parts = match found {
                Some(i) => [&s[..i], &sep[..], &s[i + sep.len()..]],
                None if name == "partition" => [&s[..], "", ""],
                None => ["", "", &s[..]],
            };
            Ok(Value::tuple(parts.iter().map(|p| Value::from(*p)).collect()))
        }
        "ljust" | "rjust" | "center" => {
            args.check(name, 1, 2)?;
            let width = args.int(0, name)?.max(0) as usize;
            interp.state.check_sequence_len(width)?;
            let fill = match args.get(1) {
                Some(Value::Str(f)) if f.chars().count() == 1 => f.chars().next().unwrap_or(' '),
                Some(_) => {
                    return Err(SandboxError::type_error(
                        "The fill character must be exactly one character long",
                    ))
                }
                None => ' ',
            };
            let len = s.chars().count();
            if width <= len {
                return Ok(Value::Str(s.clone()));
            }
            let margin = width - len;
            let (left, right) = match name {
                "ljust" => (0, margin),
                "rjust" => (margin, 0),
                _ => {
                    let left = margin / 2 + (margin & width & 1);
                    (left, margin - left)
                }
            };
            let pad = |n: usize| std::iter::repeat(fill).take(n).collect::<String>();
            Ok(Value::from(format!("{}{}{}", pad(left), s, pad(right))))
        }
        "zfill" => {
            args.check(name, 1, 1)?;
            let width = args.int(0, name)?.max(0) as usize;
            interp.state.check_sequence_len(width)?;
            let len = s.chars().count();
            if width <= len {
                return Ok(Value::Str(s.clone()));
            }
            let (sign, digits) = match s.chars().next() {
                Some(c @ ('+' | '-')) => (c.to_string(), &s[1..]),
                _ => (String::new(), &s[..]),
            };
            Ok(Value::from(format!("{}{}{}", sign, "0".repeat(width - len), digits)))
        }
        "format" => Ok(Value::from(str_format(s, &args.positional, &args.keywords)?)),
        "isdigit" | "isdecimal" | "isnumeric" => {
            args.check(name, 0, 0)?;
            Ok(predicate(|c| c.is_numeric()))
        }
        "isalpha" => {
            args.check(name, 0, 0)?;
            Ok(predicate(char::is_alphabetic))
        }
        "isalnum" => {
            args.check(name, 0, 0)?;
            Ok(predicate(char::is_alphanumeric))
        }
        "isspace" => {
            args.check(name, 0, 0)?;
            Ok(predicate(char::is_whitespace))
        }
        "isupper" | "islower" => {
            args.check(name, 0, 0)?;
            let cased: Vec<char> = s.chars().filter(|c| c.is_alphabetic()).collect();
            let ok = !cased.is_empty()
                && cased.iter().all(|c| {
                    if name == "isupper" {
                        !c.is_lowercase()
                    } else {
                        !c.is_uppercase()
                    }
                });
            Ok(Value::Bool(ok))
        }
        "istitle" => {
            args.check(name, 0, 0)?;
            Ok(Value::Bool(s.chars().any(char::is_alphabetic) && title_case(s) == **s))
        }
        _ => Err(no_attribute(&Value::Str(s.clone()), name)),
    }
}

fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut previous_cased = false;
    for c in s.chars() {
        if previous_cased {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_cased = c.is_alphabetic();
    }
    out
}

fn slice_bounds(args: &Args, len: usize) -> Result<(usize, usize)> {
    let clamp = |v: Option<&Value>, default: usize| -> Result<usize> {
        match v {
            None | Some(Value::None) => Ok(default),
            Some(v) => {
                let i = v
                    .as_int()
                    .ok_or_else(|| SandboxError::type_error("slice indices must be integers or None"))?;
                let i = if i < 0 {
                    i.checked_add(len as i64).unwrap_or(0)
                } else {
                    i
                };
                Ok(i.clamp(0, len as i64) as usize)
            }
        }
    };
    let start = clamp(args.get(1), 0)?;
    let end = clamp(args.get(2), len)?;
    Ok((start, end.max(start)))
}

fn split_whitespace(s: &str, maxsplit: i64, from_right: bool) -> Vec<String> {
    if maxsplit < 0 {
        return s.split_whitespace().map(str::to_string).collect();
    }
    let mut parts = Vec::new();
    if from_right {
        let mut rest = s.trim_end();
        while !rest.is_empty() && (parts.len() as i64) < maxsplit {
            match rest.rfind(char::is_whitespace) {
                Some(i) => {
                    let ws = rest[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                    parts.push(rest[i + ws..].to_string());
                    rest = rest[..i].trim_end();
                }
                None => break,
            }
        }
        if !rest.is_empty() {
            parts.push(rest.to_string());
        }
        parts.reverse();
    } else {
        let mut rest = s.trim_start();
        while !rest.is_empty() && (parts.len() as i64) < maxsplit {
            match rest.find(char::is_whitespace) {
                Some(i) => {
                    parts.push(rest[..i].to_string());
                    rest = rest[i..].trim_start();
                }
                None => break,
            }
        }
        if !rest.is_empty() {
            parts.push(rest.to_string());
        }
    }
    parts
}

fn split_on(s: &str, sep: &str, maxsplit: i64, from_right: bool) -> Vec<String> {
    if maxsplit < 0 {
        return s.split(sep).map(str::to_string).collect();
    }
    let n = maxsplit as usize + 1;
    if from_right {
        let mut parts: Vec<String> = s.rsplitn(n, sep).map(str::to_string).collect();
        parts.reverse();
        parts
    } else {
        s.splitn(n, sep).map(str::to_string).collect()
    }
}

fn split_lines(s: &str, keepends: bool) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\n' || c == '\r' {
            let mut ending = c.to_string();
            if c == '\r' && chars.peek() == Some(&'\n') {
                chars.next();
                ending.push('\n');
            }
            if keepends {
                current.push_str(&ending);
            }
            lines.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

// ============================================================================
// list / tuple
// ============================================================================

fn sequence_query(items: &[Value], type_name: &str, name: &str, args: Args) -> Result<Value> {
    match name {
        "count" => {
            args.check(name, 1, 1)?;
            let n = items.iter().filter(|v| values_equal(v, &args.positional[0])).count();
            Ok(Value::Int(n as i64))
        }
        "index" => {
            args.check(name, 1, 3)?;
            let (start, end) = slice_bounds(&args, items.len())?;
            items[start..end]
                .iter()
                .position(|v| values_equal(v, &args.positional[0]))
                .map(|i| Value::Int((start + i) as i64))
                .ok_or_else(|| {
                    SandboxError::value_error(format!(
                        "{}.index(x): x not in {}",
                        type_name, type_name
                    ))
                })
        }
        _ => Err(SandboxError::runtime(
            ExceptionKind::AttributeError,
            format!("'{}' object has no attribute '{}'", type_name, name),
        )),
    }
}

fn list_method(interp: &mut Interpreter<'_>, receiver: &Value, name: &str, mut args: Args) -> Result<Value> {
    let Value::List(list) = receiver else {
        return Err(no_attribute(receiver, name));
    };
    match name {
        "append" | "appendleft" => {
            args.check(name, 1, 1)?;
            interp.state.check_sequence_len(list.borrow().len() + 1)?;
            let item = args.positional.remove(0);
            if name == "append" {
                list.borrow_mut().push(item);
            } else {
                list.borrow_mut().insert(0, item);
            }
            Ok(Value::None)
        }
        "extend" | "extendleft" => {
            args.check(name, 1, 1)?;
            let items = interp.iterate(&args.positional[0])?;
            interp.state.check_sequence_len(list.borrow().len() + items.len())?;
            let mut list = list.borrow_mut();
            if name == "extend" {
                list.extend(items);
            } else {
                for item in items {
                    list.insert(0, item);
                }
            }
            Ok(Value::None)
        }
        "insert" => {
            args.check(name, 2, 2)?;
            let index = args.int(0, name)?;
            interp.state.check_sequence_len(list.borrow().len() + 1)?;
            let mut list = list.borrow_mut();
            let len = list.len() as i64;
            let index = if index < 0 { (index + len).max(0) } else { index.min(len) };
            list.insert(index as usize, args.positional.remove(1));
            Ok(Value::None)
        }
        "pop" | "popleft" => {
            args.check(name, 0, if name == "pop" { 1 } else { 0 })?;
            let mut list = list.borrow_mut();
            if list.is_empty() {
                let message = if name == "pop" { "pop from empty list" } else { "pop from an empty deque" };
                return Err(SandboxError::runtime(ExceptionKind::IndexError, message));
            }
            let len = list.len() as i64;
            let index = match (name, args.get(0)) {
                ("popleft", _) => 0,
                (_, Some(v)) => v.as_int().ok_or_else(|| SandboxError::type_error("list indices must be integers"))?,
                (_, None) => -1,
            };
            let index = if index < 0 { index + len } else { index };
            if index < 0 || index >= len {
                return Err(SandboxError::runtime(ExceptionKind::IndexError, "pop index out of range"));
            }
            Ok(list.remove(index as usize))
        }
        "remove" => {
            args.check(name, 1, 1)?;
            let mut list = list.borrow_mut();
            let pos = list
                .iter()
                .position(|v| values_equal(v, &args.positional[0]))
                .ok_or_else(|| SandboxError::value_error("list.remove(x): x not in list"))?;
            list.remove(pos);
            Ok(Value::None)
        }
        "clear" => {
            args.check(name, 0, 0)?;
            list.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            args.check(name, 0, 0)?;
            Ok(Value::list(list.borrow().clone()))
        }
        "reverse" => {
            args.check(name, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        "rotate" => {
            args.check(name, 0, 1)?;
            let n = match args.get(0) {
                Some(_) => args.int(0, name)?,
                None => 1,
            };
            let mut list = list.borrow_mut();
            let len = list.len() as i64;
            if len > 0 {
                let k = n.rem_euclid(len) as usize;
                list.rotate_right(k);
            }
            Ok(Value::None)
        }
        "sort" => {
            let key = args.take_keyword("key").filter(|k| !matches!(k, Value::None));
            let reverse = args.take_keyword("reverse").is_some_and(|r| r.truthy());
            args.check(name, 0, 0)?;
            let items = list.borrow().clone();
            let sorted = interp.sort_values(items, key, reverse)?;
            *list.borrow_mut() = sorted;
            Ok(Value::None)
        }
        "count" | "index" => {
            let items = list.borrow().clone();
            sequence_query(&items, "list", name, args)
        }
        _ => Err(no_attribute(receiver, name)),
    }
}

// ============================================================================
// dict
// ============================================================================

fn dict_method(interp: &mut Interpreter<'_>, receiver: &Value, name: &str, mut args: Args) -> Result<Value> {
    let Value::Dict(dict) = receiver else {
        return Err(no_attribute(receiver, name));
    };
    let is_counter = dict.borrow().counter;
    match name {
        "keys" | "values" | "items" => {
            args.check(name, 0, 0)?;
            let dict = dict.borrow();
            let items = match name {
                "keys" => dict.keys(),
                "values" => dict.values(),
                _ => dict
                    .items()
                    .into_iter()
                    .map(|(k, v)| Value::tuple(vec![k, v]))
                    .collect(),
            };
            Ok(Value::list(items))
        }
        "get" => {
            args.check(name, 1, 2)?;
            let found = dict.borrow().get(&args.positional[0])?;
            Ok(found.or_else(|| args.get(1).cloned()).unwrap_or(Value::None))
        }
        "setdefault" => {
            args.check(name, 1, 2)?;
            let key = args.positional[0].clone();
            if let Some(existing) = dict.borrow().get(&key)? {
                return Ok(existing);
            }
            let default = args.get(1).cloned().unwrap_or(Value::None);
            dict.borrow_mut().insert(key, default.clone())?;
            Ok(default)
        }
        "pop" => {
            args.check(name, 1, 2)?;
            let removed = dict.borrow_mut().remove(&args.positional[0])?;
            match (removed, args.get(1)) {
                (Some(v), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(SandboxError::runtime(
                    ExceptionKind::KeyError,
                    args.positional[0].repr(),
                )),
            }
        }
        "popitem" => {
            args.check(name, 0, 0)?;
            let item = dict.borrow_mut().pop_last();
            item.map(|(k, v)| Value::tuple(vec![k, v])).ok_or_else(|| {
                SandboxError::runtime(ExceptionKind::KeyError, "'popitem(): dictionary is empty'")
            })
        }
        "clear" => {
            args.check(name, 0, 0)?;
            dict.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            args.check(name, 0, 0)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        "update" => {
            let keywords = std::mem::take(&mut args.keywords);
            args.check(name, 0, 1)?;
            if is_counter {
                let counts = match args.get(0) {
                    Some(Value::Dict(other)) => other.borrow().items(),
                    Some(iterable) => interp
                        .iterate(iterable)?
                        .into_iter()
                        .map(|k| (k, Value::Int(1)))
                        .collect(),
                    None => Vec::new(),
                };
                let mut dict = dict.borrow_mut();
                for (k, n) in counts {
                    let current = dict.get(&k)?.and_then(|v| v.as_int()).unwrap_or(0);
                    let add = n.as_int().unwrap_or(0);
                    dict.insert(k, Value::Int(current.saturating_add(add)))?;
                }
            } else {
                let incoming = match args.get(0) {
                    Some(source) => dict_from(interp, source)?.items(),
                    None => Vec::new(),
                };
                let mut dict = dict.borrow_mut();
                for (k, v) in incoming {
                    dict.insert(k, v)?;
                }
            }
            let mut dict = dict.borrow_mut();
            for (k, v) in keywords {
                let key = Value::from(k);
                let value = match (is_counter, v.as_int()) {
                    (true, Some(add)) => {
                        let current = dict.get(&key)?.and_then(|c| c.as_int()).unwrap_or(0);
                        Value::Int(current.saturating_add(add))
                    }
                    _ => v,
                };
                dict.insert(key, value)?;
            }
            interp.state.check_sequence_len(dict.len())?;
            Ok(Value::None)
        }
        "most_common" if is_counter => {
            args.check(name, 0, 1)?;
            let mut items = dict.borrow().items();
            items.sort_by(|(_, a), (_, b)| {
                b.as_int().unwrap_or(0).cmp(&a.as_int().unwrap_or(0))
            });
            if let Some(n) = args.get(0).and_then(Value::as_int) {
                items.truncate(n.max(0) as usize);
            }
            Ok(Value::list(
                items.into_iter().map(|(k, v)| Value::tuple(vec![k, v])).collect(),
            ))
        }
        "elements" if is_counter => {
            args.check(name, 0, 0)?;
            let mut out = Vec::new();
            for (k, v) in dict.borrow().items() {
                let n = v.as_int().unwrap_or(0).max(0) as usize;
                interp.state.check_sequence_len(out.len() + n)?;
                out.extend(std::iter::repeat(k).take(n));
            }
            Ok(Value::iterator(out))
        }
        "total" if is_counter => {
            args.check(name, 0, 0)?;
            let total = dict
                .borrow()
                .values()
                .iter()
                .filter_map(Value::as_int)
                .fold(0i64, i64::saturating_add);
            Ok(Value::Int(total))
        }
        _ => Err(no_attribute(receiver, name)),
    }
}

// ============================================================================
// set
// ============================================================================

fn set_method(interp: &mut Interpreter<'_>, receiver: &Value, name: &str, args: Args) -> Result<Value> {
    let Value::Set(set) = receiver else {
        return Err(no_attribute(receiver, name));
    };
    match name {
        "add" => {
            args.check(name, 1, 1)?;
            interp.state.check_sequence_len(set.borrow().len() + 1)?;
            set.borrow_mut().insert(args.positional[0].clone(), Value::None)?;
            Ok(Value::None)
        }
        "discard" | "remove" => {
            args.check(name, 1, 1)?;
            let removed = set.borrow_mut().remove(&args.positional[0])?;
            if removed.is_none() && name == "remove" {
                return Err(SandboxError::runtime(
                    ExceptionKind::KeyError,
                    args.positional[0].repr(),
                ));
            }
            Ok(Value::None)
        }
        "pop" => {
            args.check(name, 0, 0)?;
            let item = set.borrow_mut().pop_first();
            item.map(|(k, _)| k).ok_or_else(|| {
                SandboxError::runtime(ExceptionKind::KeyError, "'pop from an empty set'")
            })
        }
        "clear" => {
            args.check(name, 0, 0)?;
            set.borrow_mut().clear();
            Ok(Value::None)
        }
        "copy" => {
            args.check(name, 0, 0)?;
            Ok(Value::set(set.borrow().clone()))
        }
        "union" | "update" => {
            let mut out = set.borrow().clone();
            for other in &args.positional {
                for item in interp.iterate(other)? {
                    out.insert(item, Value::None)?;
                }
            }
            interp.state.check_sequence_len(out.len())?;
            if name == "update" {
                *set.borrow_mut() = out;
                Ok(Value::None)
            } else {
                Ok(Value::set(out))
            }
        }
        "intersection" | "intersection_update" | "difference" | "difference_update" => {
            let mut keys = set.borrow().keys();
            for other in &args.positional {
                let other = DictValue::from_keys(interp.iterate(other)?)?;
                let mut kept = Vec::with_capacity(keys.len());
                for k in keys {
                    let present = other.contains(&k)?;
                    if present == name.starts_with("intersection") {
                        kept.push(k);
                    }
                }
                keys = kept;
            }
            let out = DictValue::from_keys(keys)?;
            if name.ends_with("_update") {
                *set.borrow_mut() = out;
                Ok(Value::None)
            } else {
                Ok(Value::set(out))
            }
        }
        "symmetric_difference" => {
            args.check(name, 1, 1)?;
            let other = DictValue::from_keys(interp.iterate(&args.positional[0])?)?;
            let mine = set.borrow().clone();
            let mut keys = Vec::new();
            for k in mine.keys() {
                if !other.contains(&k)? {
                    keys.push(k);
                }
            }
            for k in other.keys() {
                if !mine.contains(&k)? {
                    keys.push(k);
                }
            }
            Ok(Value::set(DictValue::from_keys(keys)?))
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            args.check(name, 1, 1)?;
            let other = DictValue::from_keys(interp.iterate(&args.positional[0])?)?;
            let mine = set.borrow().clone();
            let result = match name {
                "issubset" => all_in(&mine, &other)?,
                "issuperset" => all_in(&other, &mine)?,
                _ => {
                    let mut disjoint = true;
                    for k in mine.keys() {
                        if other.contains(&k)? {
                            disjoint = false;
                            break;
                        }
                    }
                    disjoint
                }
            };
            Ok(Value::Bool(result))
        }
        _ => Err(no_attribute(receiver, name)),
    }
}

fn all_in(inner: &DictValue, outer: &DictValue) -> Result<bool> {
    for k in inner.keys() {
        if !outer.contains(&k)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_whitespace_maxsplit() {
        assert_eq!(split_whitespace("  a b  c ", -1, false), vec!["a", "b", "c"]);
        assert_eq!(split_whitespace("a b c", 1, false), vec!["a", "b c"]);
        assert_eq!(split_whitespace("a b c", 1, true), vec!["a b", "c"]);
    }

    #[test]
    fn test_split_on_separator() {
        assert_eq!(split_on("a,b,,c", ",", -1, false), vec!["a", "b", "", "c"]);
        assert_eq!(split_on("a,b,c", ",", 1, true), vec!["a,b", "c"]);
    }

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("a\nb\r\nc", false), vec!["a", "b", "c"]);
        assert_eq!(split_lines("a\n", true), vec!["a\n"]);
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("hello wORLD it's"), "Hello World It'S");
    }

    #[test]
    fn test_method_tables() {
        assert!(has_method(&Value::from("x"), "split"));
        assert!(has_method(&Value::list(vec![]), "sort"));
        assert!(!has_method(&Value::list(vec![]), "most_common"));
        assert!(!has_method(&Value::Int(1), "real"));
    }
}
