//! `re`, backed by the `regex` crate
//!
//! Offsets handed to scripts are character offsets. Replacement templates
//! use the script syntax (`\1`, `\g<name>`) and are translated before
//! expansion.

use std::any::Any;
use std::rc::Rc;

use regex::{Captures, Regex, RegexBuilder};

use crate::engine::args::Args;
use crate::engine::interpreter::Interpreter;
use crate::engine::value::{repr_str, DictValue, NativeObject, Value};
use crate::error::{ExceptionKind, Result, SandboxError};

pub const EXPORTS: &[&str] = &[
    "compile", "match", "search", "fullmatch", "findall", "finditer", "sub", "split", "escape",
    "IGNORECASE", "I", "MULTILINE", "M", "DOTALL", "S", "VERBOSE", "X",
];

const IGNORECASE: i64 = 2;
const MULTILINE: i64 = 8;
const DOTALL: i64 = 16;
const VERBOSE: i64 = 64;

/// Compiled patterns are large; scripts building them in a loop are capped.
const SIZE_LIMIT: usize = 1 << 20;

pub fn constant(name: &str) -> Option<Value> {
    let flag = match name {
        "IGNORECASE" | "I" => IGNORECASE,
        "MULTILINE" | "M" => MULTILINE,
        "DOTALL" | "S" => DOTALL,
        "VERBOSE" | "X" => VERBOSE,
        _ => return None,
    };
    Some(Value::Int(flag))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Search,
    Start,
    Full,
}

fn build(pattern: &str, flags: i64, anchor: Anchor) -> Result<Regex> {
    let source = match anchor {
        Anchor::Search => pattern.to_string(),
        Anchor::Start => format!(r"\A(?:{})", pattern),
        Anchor::Full => format!(r"\A(?:{})\z", pattern),
    };
    RegexBuilder::new(&source)
        .case_insensitive(flags & IGNORECASE != 0)
        .multi_line(flags & MULTILINE != 0)
        .dot_matches_new_line(flags & DOTALL != 0)
        .ignore_whitespace(flags & VERBOSE != 0)
        .size_limit(SIZE_LIMIT)
        .build()
        .map_err(|err| {
            let detail = err.to_string();
            let summary = detail.lines().last().unwrap_or("invalid pattern").trim();
            SandboxError::runtime(
                ExceptionKind::ValueError,
                format!("invalid regular expression: {}", summary),
            )
        })
}

fn char_offset(text: &str, byte: usize) -> i64 {
    text[..byte].chars().count() as i64
}

// ============================================================================
// Pattern objects
// ============================================================================

#[derive(Debug)]
pub struct PatternObject {
    pattern: Rc<str>,
    flags: i64,
    regex: Regex,
}

impl PatternObject {
    pub fn compile(pattern: Rc<str>, flags: i64) -> Result<Self> {
        let regex = build(&pattern, flags, Anchor::Search)?;
        Ok(Self {
            pattern,
            flags,
            regex,
        })
    }

    fn anchored(&self, anchor: Anchor) -> Result<Regex> {
        match anchor {
            Anchor::Search => Ok(self.regex.clone()),
            other => build(&self.pattern, self.flags, other),
        }
    }

    fn find(&self, text: &Rc<str>, anchor: Anchor) -> Result<Value> {
        let regex = self.anchored(anchor)?;
        Ok(match regex.captures(text) {
            Some(caps) => Value::Object(Rc::new(MatchObject::new(&regex, &caps, text.clone()))),
            None => Value::None,
        })
    }

    fn findall(&self, interp: &mut Interpreter<'_>, text: &str) -> Result<Value> {
        let groups = self.regex.captures_len() - 1;
        let mut out = Vec::new();
        for caps in self.regex.captures_iter(text) {
            let group = |i: usize| Value::from(caps.get(i).map_or("", |m| m.as_str()));
            out.push(match groups {
                0 => group(0),
                1 => group(1),
                n => Value::tuple((1..=n).map(group).collect()),
            });
            if out.len() > interp.state.limits().max_sequence_length {
                interp.state.check_sequence_len(out.len())?;
            }
        }
        Ok(Value::list(out))
    }

    fn finditer(&self, interp: &mut Interpreter<'_>, text: &Rc<str>) -> Result<Value> {
        let mut out = Vec::new();
        for caps in self.regex.captures_iter(text) {
            out.push(Value::Object(Rc::new(MatchObject::new(
                &self.regex,
                &caps,
                text.clone(),
            ))));
            if out.len() > interp.state.limits().max_sequence_length {
                interp.state.check_sequence_len(out.len())?;
            }
        }
        Ok(Value::iterator(out))
    }

    fn sub(&self, interp: &mut Interpreter<'_>, repl: &Value, text: &Rc<str>, count: usize) -> Result<Value> {
        let template = match repl {
            Value::Str(s) => Some(translate_template(s)),
            other if other.is_callable() => None,
            other => {
                return Err(SandboxError::type_error(format!(
                    "expected str or callable replacement, not {}",
                    other.type_name()
                )))
            }
        };
        let max_len = interp.state.limits().max_sequence_length;
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for (n, caps) in self.regex.captures_iter(text).enumerate() {
            if count > 0 && n >= count {
                break;
            }
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&text[last..whole.start()]);
            match &template {
                Some(template) => caps.expand(template, &mut out),
                None => {
                    let matched = Value::Object(Rc::new(MatchObject::new(
                        &self.regex,
                        &caps,
                        text.clone(),
                    )));
                    match interp.call_value(repl, Args::new(vec![matched]))? {
                        Value::Str(s) => out.push_str(&s),
                        other => {
                            return Err(SandboxError::type_error(format!(
                                "expected str instance, {} found",
                                other.type_name()
                            )))
                        }
                    }
                }
            }
            last = whole.end();
            if out.len() > max_len {
                interp.state.check_sequence_len(out.chars().count())?;
            }
        }
        out.push_str(&text[last..]);
        Ok(Value::from(out))
    }

    fn split(&self, text: &str, maxsplit: usize) -> Value {
        let mut out = Vec::new();
        let mut last = 0;
        for (n, caps) in self.regex.captures_iter(text).enumerate() {
            if maxsplit > 0 && n >= maxsplit {
                break;
            }
            let Some(whole) = caps.get(0) else { continue };
            out.push(Value::from(&text[last..whole.start()]));
            for group in caps.iter().skip(1) {
                out.push(group.map_or(Value::None, |m| Value::from(m.as_str())));
            }
            last = whole.end();
        }
        out.push(Value::from(&text[last..]));
        Value::list(out)
    }
}

/// `\1` and `\g<name>` to `${1}` and `${name}`; literal `$` is escaped.
fn translate_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        group.push(d);
                        chars.next();
                        if group.len() == 2 {
                            break;
                        }
                    }
                    out.push_str(&format!("${{{}}}", group));
                }
                Some('g') => {
                    chars.next();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        let name: String = chars.by_ref().take_while(|&c| c != '>').collect();
                        out.push_str(&format!("${{{}}}", name));
                    } else {
                        out.push_str("\\g");
                    }
                }
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('t') => {
                    chars.next();
                    out.push('\t');
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            c => out.push(c),
        }
    }
    out
}

impl NativeObject for PatternObject {
    fn type_name(&self) -> &'static str {
        "re.Pattern"
    }

    fn repr(&self) -> String {
        format!("re.compile({})", repr_str(&self.pattern))
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "pattern" => Some(Value::Str(self.pattern.clone())),
            "flags" => Some(Value::Int(self.flags)),
            "groups" => Some(Value::Int(self.regex.captures_len() as i64 - 1)),
            _ => None,
        }
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(
            name,
            "match" | "search" | "fullmatch" | "findall" | "finditer" | "sub" | "split"
        )
    }

    fn call_method(&self, interp: &mut Interpreter, name: &str, args: Args) -> Result<Value> {
        pattern_call(interp, self, name, args)
    }

    fn equals(&self, other: &dyn NativeObject) -> Option<bool> {
        let other = other.as_any().downcast_ref::<PatternObject>()?;
        Some(self.pattern == other.pattern && self.flags == other.flags)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Operations shared by `re.<op>(pattern, ...)` and `pattern.<op>(...)`.
/// `args` excludes the pattern.
fn pattern_call(interp: &mut Interpreter<'_>, pattern: &PatternObject, name: &str, mut args: Args) -> Result<Value> {
    match name {
        "match" | "search" | "fullmatch" => {
            args.check(name, 1, 1)?;
            let text = args.str(0, name)?;
            let anchor = match name {
                "match" => Anchor::Start,
                "fullmatch" => Anchor::Full,
                _ => Anchor::Search,
            };
            pattern.find(&text, anchor)
        }
        "findall" => {
            args.check(name, 1, 1)?;
            let text = args.str(0, name)?;
            pattern.findall(interp, &text)
        }
        "finditer" => {
            args.check(name, 1, 1)?;
            let text = args.str(0, name)?;
            pattern.finditer(interp, &text)
        }
        "sub" => {
            let count = args.take(2, "count");
            args.positional.truncate(2);
            args.check(name, 2, 2)?;
            let count = count.and_then(|v| v.as_int()).unwrap_or(0).max(0) as usize;
            let text = args.str(1, name)?;
            pattern.sub(interp, &args.positional[0], &text, count)
        }
        "split" => {
            let maxsplit = args.take(1, "maxsplit");
            args.positional.truncate(1);
            args.check(name, 1, 1)?;
            let maxsplit = maxsplit.and_then(|v| v.as_int()).unwrap_or(0).max(0) as usize;
            let text = args.str(0, name)?;
            Ok(pattern.split(&text, maxsplit))
        }
        _ => Err(SandboxError::runtime(
            ExceptionKind::AttributeError,
            format!("'re.Pattern' object has no attribute '{}'", name),
        )),
    }
}

// ============================================================================
// Match objects
// ============================================================================

#[derive(Debug)]
pub struct MatchObject {
    text: Rc<str>,
    /// Byte spans of every group; `None` for groups that did not take part.
    spans: Vec<Option<(usize, usize)>>,
    names: Vec<(String, usize)>,
}

impl MatchObject {
    fn new(regex: &Regex, caps: &Captures<'_>, text: Rc<str>) -> Self {
        let spans = caps.iter().map(|m| m.map(|m| (m.start(), m.end()))).collect();
        let names = regex
            .capture_names()
            .enumerate()
            .filter_map(|(i, name)| name.map(|n| (n.to_string(), i)))
            .collect();
        Self { text, spans, names }
    }

    fn group_index(&self, key: &Value) -> Result<usize> {
        let index = match key {
            Value::Str(name) => self
                .names
                .iter()
                .find(|(n, _)| n.as_str() == &**name)
                .map(|(_, i)| *i),
            other => other
                .as_int()
                .filter(|i| *i >= 0 && (*i as usize) < self.spans.len())
                .map(|i| i as usize),
        };
        index.ok_or_else(|| SandboxError::runtime(ExceptionKind::IndexError, "no such group"))
    }

    fn group(&self, index: usize) -> Value {
        match self.spans.get(index).copied().flatten() {
            Some((start, end)) => Value::from(&self.text[start..end]),
            None => Value::None,
        }
    }

    fn span(&self, index: usize) -> (i64, i64) {
        match self.spans.get(index).copied().flatten() {
            Some((start, end)) => (char_offset(&self.text, start), char_offset(&self.text, end)),
            None => (-1, -1),
        }
    }
}

impl NativeObject for MatchObject {
    fn type_name(&self) -> &'static str {
        "re.Match"
    }

    fn repr(&self) -> String {
        let (start, end) = self.span(0);
        let matched = self.group(0).to_str();
        format!(
            "<re.Match object; span=({}, {}), match={}>",
            start,
            end,
            repr_str(&matched)
        )
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "string" => Some(Value::Str(self.text.clone())),
            "lastindex" => Some(
                self.spans
                    .iter()
                    .rposition(Option::is_some)
                    .filter(|i| *i > 0)
                    .map_or(Value::None, |i| Value::Int(i as i64)),
            ),
            _ => None,
        }
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(
            name,
            "group" | "groups" | "groupdict" | "start" | "end" | "span"
        )
    }

    fn call_method(&self, _interp: &mut Interpreter, name: &str, mut args: Args) -> Result<Value> {
        match name {
            "group" => {
                args.check(name, 0, usize::MAX)?;
                match args.positional.as_slice() {
                    [] => Ok(self.group(0)),
                    [key] => Ok(self.group(self.group_index(key)?)),
                    keys => {
                        let mut groups = Vec::with_capacity(keys.len());
                        for key in keys {
                            groups.push(self.group(self.group_index(key)?));
                        }
                        Ok(Value::tuple(groups))
                    }
                }
            }
            "groups" => {
                let default = args.take(0, "default").unwrap_or(Value::None);
                args.positional.truncate(0);
                args.check(name, 0, 0)?;
                Ok(Value::tuple(
                    (1..self.spans.len())
                        .map(|i| match self.group(i) {
                            Value::None => default.clone(),
                            v => v,
                        })
                        .collect(),
                ))
            }
            "groupdict" => {
                args.check(name, 0, 0)?;
                let mut dict = DictValue::new();
                for (group_name, i) in &self.names {
                    dict.insert(Value::from(group_name.as_str()), self.group(*i))?;
                }
                Ok(Value::dict(dict))
            }
            "start" | "end" | "span" => {
                args.check(name, 0, 1)?;
                let index = match args.get(0) {
                    Some(key) => self.group_index(key)?,
                    None => 0,
                };
                let (start, end) = self.span(index);
                Ok(match name {
                    "start" => Value::Int(start),
                    "end" => Value::Int(end),
                    _ => Value::tuple(vec![Value::Int(start), Value::Int(end)]),
                })
            }
            _ => Err(SandboxError::runtime(
                ExceptionKind::AttributeError,
                format!("'re.Match' object has no attribute '{}'", name),
            )),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Module functions
// ============================================================================

fn pattern_argument(value: &Value, flags: i64) -> Result<Rc<PatternObject>> {
    match value {
        Value::Str(source) => Ok(Rc::new(PatternObject::compile(source.clone(), flags)?)),
        Value::Object(object) => match object.as_any().downcast_ref::<PatternObject>() {
            Some(pattern) => Ok(Rc::new(PatternObject::compile(
                pattern.pattern.clone(),
                pattern.flags | flags,
            )?)),
            None => Err(SandboxError::type_error("first argument must be string or compiled pattern")),
        },
        _ => Err(SandboxError::type_error("first argument must be string or compiled pattern")),
    }
}

pub fn call(interp: &mut Interpreter<'_>, name: &str, mut args: Args) -> Result<Value> {
    match name {
        "escape" => {
            args.check(name, 1, 1)?;
            Ok(Value::from(regex::escape(&args.str(0, name)?)))
        }
        "compile" => {
            let flags = args.take(1, "flags");
            args.positional.truncate(1);
            args.check(name, 1, 1)?;
            let flags = flags.and_then(|v| v.as_int()).unwrap_or(0);
            let pattern = pattern_argument(&args.positional[0], flags)?;
            Ok(Value::Object(pattern))
        }
        "match" | "search" | "fullmatch" | "findall" | "finditer" | "sub" | "split" => {
            let flag_position = match name {
                "sub" => 4,
                "split" => 3,
                _ => 2,
            };
            let flags = args
                .take(flag_position, "flags")
                .and_then(|v| v.as_int())
                .unwrap_or(0);
            args.positional.truncate(flag_position);
            if args.positional.is_empty() {
                return Err(SandboxError::type_error(format!(
                    "{}() missing required argument 'pattern'",
                    name
                )));
            }
            let pattern = pattern_argument(&args.positional.remove(0), flags)?;
            pattern_call(interp, &pattern, name, args)
        }
        _ => Err(SandboxError::runtime(
            ExceptionKind::AttributeError,
            format!("module 're' has no attribute '{}'", name),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(r"\1-\2", "${1}-${2}")]
    #[case(r"\g<word>!", "${word}!")]
    #[case("cost: $5", "cost: $$5")]
    #[case(r"a\nb", "a\nb")]
    fn test_translate_template(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(translate_template(input), expected);
    }

    #[test]
    fn test_anchors() {
        let pattern = PatternObject::compile(Rc::from(r"\d+"), 0).unwrap();
        let text: Rc<str> = Rc::from("ab12");
        assert!(matches!(pattern.find(&text, Anchor::Start).unwrap(), Value::None));
        assert!(matches!(pattern.find(&text, Anchor::Search).unwrap(), Value::Object(_)));
        let digits: Rc<str> = Rc::from("123");
        assert!(matches!(pattern.find(&digits, Anchor::Full).unwrap(), Value::Object(_)));
    }

    #[test]
    fn test_match_spans_are_char_offsets() {
        let regex = Regex::new("b+").unwrap();
        let text: Rc<str> = Rc::from("ééabbc");
        let caps = regex.captures(&text).unwrap();
        let matched = MatchObject::new(&regex, &caps, text.clone());
        assert_eq!(matched.span(0), (3, 5));
        assert_eq!(matched.group(0), Value::from("bb"));
    }

    #[test]
    fn test_split_keeps_groups() {
        let pattern = PatternObject::compile(Rc::from(r"(,)"), 0).unwrap();
        let parts = pattern.split("a,b", 0);
        assert_eq!(parts.repr(), "['a', ',', 'b']");
    }

    #[test]
    fn test_flags_and_errors() {
        let pattern = PatternObject::compile(Rc::from("abc"), IGNORECASE).unwrap();
        let text: Rc<str> = Rc::from("ABC");
        assert!(matches!(pattern.find(&text, Anchor::Full).unwrap(), Value::Object(_)));
        let err = PatternObject::compile(Rc::from("(unclosed"), 0).unwrap_err();
        assert!(err.to_string().starts_with("ValueError: invalid regular expression"));
    }
}
