//! String formatting: format specs (`f"{x:>8.2f}"`, `format()`),
//! `str.format` templates and `%` interpolation.

use crate::engine::value::{format_float, Value};
use crate::error::{ExceptionKind, Result, SandboxError};

#[derive(Debug, Clone, PartialEq)]
struct FormatSpec {
    fill: char,
    align: Option<char>,
    sign: char,
    alternate: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    ty: Option<char>,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            width: 0,
            grouping: None,
            precision: None,
            ty: None,
        }
    }
}

fn invalid_spec(spec: &str) -> SandboxError {
    SandboxError::value_error(format!("Invalid format specifier '{}'", spec))
}

fn parse_spec(spec: &str) -> Result<FormatSpec> {
    let chars: Vec<char> = spec.chars().collect();
    let mut parsed = FormatSpec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

    if chars.len() >= 2 && is_align(chars[1]) {
        parsed.fill = chars[0];
        parsed.align = Some(chars[1]);
        i = 2;
    } else if !chars.is_empty() && is_align(chars[0]) {
        parsed.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            parsed.sign = c;
            i += 1;
        }
    }
    if chars.get(i) == Some(&'#') {
        parsed.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        if parsed.align.is_none() {
            parsed.fill = '0';
            parsed.align = Some('=');
        }
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
    }
    if i > start {
        let digits: String = chars[start..i].iter().collect();
        parsed.width = digits.parse().map_err(|_| invalid_spec(spec))?;
    }
    if let Some(&c) = chars.get(i) {
        if c == ',' || c == '_' {
            parsed.grouping = Some(c);
            i += 1;
        }
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i == start {
            return Err(SandboxError::value_error("Format specifier missing precision"));
        }
        let digits: String = chars[start..i].iter().collect();
        parsed.precision = Some(digits.parse().map_err(|_| invalid_spec(spec))?);
    }
    if let Some(&c) = chars.get(i) {
        parsed.ty = Some(c);
        i += 1;
    }
    if i != chars.len() {
        return Err(invalid_spec(spec));
    }
    if parsed.width > 10_000 || parsed.precision.is_some_and(|p| p > 1_000) {
        return Err(SandboxError::value_error("Too many decimal digits in format string"));
    }
    Ok(parsed)
}

/// Apply a format spec to a value, as `format(value, spec)` does.
pub fn format_value(value: &Value, spec: &str) -> Result<String> {
    if spec.is_empty() {
        return Ok(value.to_str());
    }
    let parsed = parse_spec(spec)?;
    match value {
        Value::Bool(_) if parsed.ty.is_none() => Ok(pad(&value.to_str(), &parsed, '<')),
        Value::Int(_) | Value::Bool(_) => format_int(value.as_int().unwrap_or(0), &parsed),
        Value::Float(f) => format_float_spec(*f, &parsed),
        Value::Str(s) => {
            if !matches!(parsed.ty, None | Some('s')) {
                return Err(unknown_code(parsed.ty, "str"));
            }
            let text: String = match parsed.precision {
                Some(p) => s.chars().take(p).collect(),
                None => s.to_string(),
            };
            Ok(pad(&text, &parsed, '<'))
        }
        other => {
            if parsed.ty.is_some() || parsed.precision.is_some() || parsed.sign != '-' {
                return Err(SandboxError::type_error(format!(
                    "unsupported format string passed to {}.__format__",
                    other.type_name()
                )));
            }
            Ok(pad(&other.to_str(), &parsed, '<'))
        }
    }
}

fn unknown_code(ty: Option<char>, type_name: &str) -> SandboxError {
    SandboxError::value_error(format!(
        "Unknown format code '{}' for object of type '{}'",
        ty.unwrap_or(' '),
        type_name
    ))
}

fn format_int(i: i64, spec: &FormatSpec) -> Result<String> {
    let magnitude = i.unsigned_abs();
    let (digits, prefix) = match spec.ty {
        None | Some('d') | Some('n') => (group(&magnitude.to_string(), spec.grouping, 3), ""),
        Some('b') => (group(&format!("{:b}", magnitude), spec.grouping.map(|_| '_'), 4), "0b"),
        Some('o') => (group(&format!("{:o}", magnitude), spec.grouping.map(|_| '_'), 4), "0o"),
        Some('x') => (group(&format!("{:x}", magnitude), spec.grouping.map(|_| '_'), 4), "0x"),
        Some('X') => (group(&format!("{:X}", magnitude), spec.grouping.map(|_| '_'), 4), "0X"),
        Some('c') => {
            let c = u32::try_from(i)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| SandboxError::runtime(ExceptionKind::OverflowError, "%c arg not in range(0x110000)"))?;
            return Ok(pad(&c.to_string(), spec, '<'));
        }
        Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => return format_float_spec(i as f64, spec),
        Some(_) => return Err(unknown_code(spec.ty, "int")),
    };
    let prefix = if spec.alternate { prefix } else { "" };
    Ok(assemble(i < 0, prefix, &digits, spec))
}

fn format_float_spec(f: f64, spec: &FormatSpec) -> Result<String> {
    let negative = f.is_sign_negative() && !f.is_nan();
    let x = f.abs();
    let upper = matches!(spec.ty, Some('E' | 'F' | 'G'));
    let body = if !x.is_finite() {
        let s = if x.is_nan() { "nan" } else { "inf" };
        if upper {
            s.to_uppercase()
        } else {
            s.to_string()
        }
    } else {
        match spec.ty {
            Some('f' | 'F') => fixed(x, spec.precision.unwrap_or(6), spec.grouping),
            Some('e' | 'E') => exponent(x, spec.precision.unwrap_or(6), upper),
            Some('g' | 'G') => general(x, spec.precision.unwrap_or(6), spec.alternate, upper),
            Some('%') => format!("{}%", fixed(x * 100.0, spec.precision.unwrap_or(6), spec.grouping)),
            None => match spec.precision {
                Some(p) => {
                    let s = general(x, p, spec.alternate, false);
                    if s.contains(['.', 'e']) {
                        s
                    } else {
                        format!("{}.0", s)
                    }
                }
                None => {
                    let s = format_float(x);
                    match spec.grouping {
                        Some(sep) if !s.contains('e') => {
                            let (int, frac) = s.split_once('.').unwrap_or((s.as_str(), ""));
                            format!("{}.{}", group(int, Some(sep), 3), frac)
                        }
                        _ => s,
                    }
                }
            },
            Some(_) => return Err(unknown_code(spec.ty, "float")),
        }
    };
    Ok(assemble(negative, "", &body, spec))
}

fn fixed(x: f64, precision: usize, grouping: Option<char>) -> String {
    let s = format!("{:.*}", precision, x);
    match grouping {
        Some(sep) => {
            let (int, frac) = match s.split_once('.') {
                Some((int, frac)) => (int.to_string(), Some(frac.to_string())),
                None => (s.clone(), None),
            };
            let grouped = group(&int, Some(sep), 3);
            match frac {
                Some(frac) => format!("{}.{}", grouped, frac),
                None => grouped,
            }
        }
        None => s,
    }
}

fn exponent(x: f64, precision: usize, upper: bool) -> String {
    let s = format!("{:.*e}", precision, x);
    let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let e = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}{}{}{:02}", mantissa, e, sign, exp.abs())
}

fn general(x: f64, precision: usize, alternate: bool, upper: bool) -> String {
    let p = precision.max(1);
    let probe = format!("{:.*e}", p - 1, x);
    let exp: i32 = probe
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let mut s = if -4 <= exp && exp < p as i32 {
        format!("{:.*}", (p as i32 - 1 - exp).max(0) as usize, x)
    } else {
        exponent(x, p - 1, upper)
    };
    if !alternate {
        s = strip_trailing_zeros(&s);
    }
    s
}

fn strip_trailing_zeros(s: &str) -> String {
    let (mantissa, exp) = match s.find(['e', 'E']) {
        Some(i) => (&s[..i], &s[i..]),
        None => (s, ""),
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    format!("{}{}", mantissa, exp)
}

fn group(digits: &str, sep: Option<char>, every: usize) -> String {
    let Some(sep) = sep else {
        return digits.to_string();
    };
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / every);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % every == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

fn assemble(negative: bool, prefix: &str, body: &str, spec: &FormatSpec) -> String {
    let sign = if negative {
        "-"
    } else {
        match spec.sign {
            '+' => "+",
            ' ' => " ",
            _ => "",
        }
    };
    if spec.align == Some('=') {
        let used = sign.len() + prefix.len() + body.chars().count();
        let fill: String = std::iter::repeat(spec.fill)
            .take(spec.width.saturating_sub(used))
            .collect();
        return format!("{}{}{}{}", sign, prefix, fill, body);
    }
    pad(&format!("{}{}{}", sign, prefix, body), spec, '>')
}

fn pad(text: &str, spec: &FormatSpec, default_align: char) -> String {
    let len = text.chars().count();
    if spec.width <= len {
        return text.to_string();
    }
    let total = spec.width - len;
    let fill = |n: usize| std::iter::repeat(spec.fill).take(n).collect::<String>();
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{}{}", text, fill(total)),
        '^' => format!("{}{}{}", fill(total / 2), text, fill(total - total / 2)),
        _ => format!("{}{}", fill(total), text),
    }
}

// ============================================================================
// str.format
// ============================================================================

/// Expand a `str.format` template.
pub fn str_format(template: &str, positional: &[Value], keywords: &[(String, Value)]) -> Result<String> {
    expand(template, positional, keywords, &mut 0)
}

fn expand(
    template: &str,
    positional: &[Value],
    keywords: &[(String, Value)],
    auto_index: &mut usize,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => {
                return Err(SandboxError::value_error(
                    "Single '}' encountered in format string",
                ))
            }
            '{' => {
                let mut field = String::new();
                let mut depth = 1;
                for c in chars.by_ref() {
                    match c {
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    field.push(c);
                }
                if depth != 0 {
                    return Err(SandboxError::value_error(
                        "Single '{' encountered in format string",
                    ));
                }
                out.push_str(&replace_field(&field, positional, keywords, auto_index)?);
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn replace_field(
    field: &str,
    positional: &[Value],
    keywords: &[(String, Value)],
    auto_index: &mut usize,
) -> Result<String> {
    let (head, spec) = match field.find(':') {
        Some(i) => (&field[..i], &field[i + 1..]),
        None => (field, ""),
    };
    let (name, conversion) = match head.find('!') {
        Some(i) => (&head[..i], head[i + 1..].chars().next()),
        None => (head, None),
    };

    let base_len = name.find(['[', '.']).unwrap_or(name.len());
    let (base, accessors) = name.split_at(base_len);
    let mut value = if base.is_empty() {
        let index = *auto_index;
        *auto_index += 1;
        positional_arg(positional, index)?
    } else if let Ok(index) = base.parse::<usize>() {
        positional_arg(positional, index)?
    } else {
        keywords
            .iter()
            .find(|(k, _)| k == base)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                SandboxError::runtime(ExceptionKind::KeyError, format!("'{}'", base))
            })?
    };
    value = apply_accessors(value, accessors)?;

    let converted = match conversion {
        Some('r') | Some('a') => Value::from(value.repr()),
        Some('s') => Value::from(value.to_str()),
        Some(c) => {
            return Err(SandboxError::value_error(format!(
                "Unknown conversion specifier {}",
                c
            )))
        }
        None => value,
    };
    let spec = if spec.contains('{') {
        expand(spec, positional, keywords, auto_index)?
    } else {
        spec.to_string()
    };
    format_value(&converted, &spec)
}

fn positional_arg(positional: &[Value], index: usize) -> Result<Value> {
    positional.get(index).cloned().ok_or_else(|| {
        SandboxError::runtime(
            ExceptionKind::IndexError,
            format!(
                "Replacement index {} out of range for positional args tuple",
                index
            ),
        )
    })
}

/// `[key]` lookups inside a replacement field. Attribute access is not
/// supported in templates.
fn apply_accessors(mut value: Value, mut accessors: &str) -> Result<Value> {
    while !accessors.is_empty() {
        let Some(rest) = accessors.strip_prefix('[') else {
            return Err(SandboxError::value_error(
                "attribute access in format fields is not supported",
            ));
        };
        let end = rest
            .find(']')
            .ok_or_else(|| SandboxError::value_error("Missing ']' in format string"))?;
        let key = &rest[..end];
        accessors = &rest[end + 1..];
        value = match &value {
            Value::List(_) | Value::Tuple(_) => {
                let index: usize = key
                    .parse()
                    .map_err(|_| SandboxError::type_error("list indices must be integers"))?;
                let items = match &value {
                    Value::List(l) => l.borrow().clone(),
                    Value::Tuple(t) => t.to_vec(),
                    _ => Vec::new(),
                };
                items.get(index).cloned().ok_or_else(|| {
                    SandboxError::runtime(ExceptionKind::IndexError, "list index out of range")
                })?
            }
            Value::Dict(d) => {
                let lookup = match key.parse::<i64>() {
                    Ok(i) => Value::Int(i),
                    Err(_) => Value::from(key),
                };
                d.borrow().get(&lookup)?.ok_or_else(|| {
                    SandboxError::runtime(ExceptionKind::KeyError, lookup.repr())
                })?
            }
            other => {
                return Err(SandboxError::type_error(format!(
                    "'{}' object is not subscriptable",
                    other.type_name()
                )))
            }
        };
    }
    Ok(value)
}

// ============================================================================
// % interpolation
// ============================================================================

pub fn percent_format(template: &str, values: &Value) -> Result<String> {
    let mapping = match values {
        Value::Dict(d) if template.contains("%(") => Some(d.borrow().clone()),
        _ => None,
    };
    let args: Vec<Value> = match values {
        Value::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    let mut next_arg = 0usize;
    let mut take_arg = || -> Result<Value> {
        let value = args.get(next_arg).cloned().ok_or_else(|| {
            SandboxError::type_error("not enough arguments for format string")
        })?;
        next_arg += 1;
        Ok(value)
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut keyed: Option<Value> = None;
        if chars.peek() == Some(&'(') {
            chars.next();
            let key: String = chars.by_ref().take_while(|&c| c != ')').collect();
            let dict = mapping
                .as_ref()
                .ok_or_else(|| SandboxError::type_error("format requires a mapping"))?;
            keyed = Some(dict.get(&Value::from(key.as_str()))?.ok_or_else(|| {
                SandboxError::runtime(ExceptionKind::KeyError, format!("'{}'", key))
            })?);
        }

        let mut spec = FormatSpec {
            align: Some('>'),
            ..FormatSpec::default()
        };
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.align = Some('<'),
                '+' => spec.sign = '+',
                ' ' if spec.sign != '+' => spec.sign = ' ',
                ' ' => {}
                '#' => spec.alternate = true,
                '0' => {
                    if spec.align != Some('<') {
                        spec.fill = '0';
                        spec.align = Some('=');
                    }
                }
                _ => break,
            }
            chars.next();
        }
        let mut width = String::new();
        while let Some(&d) = chars.peek() {
            if d == '*' {
                chars.next();
                width = take_arg()?.as_int().unwrap_or(0).max(0).to_string();
                break;
            }
            if !d.is_ascii_digit() {
                break;
            }
            width.push(d);
            chars.next();
        }
        spec.width = width.parse().unwrap_or(0).min(10_000);
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut precision = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                precision.push(d);
                chars.next();
            }
            spec.precision = Some(precision.parse().unwrap_or(0).min(1_000));
        }
        let ty = chars
            .next()
            .ok_or_else(|| SandboxError::value_error("incomplete format"))?;
        let value = match keyed {
            Some(value) => value,
            None => take_arg()?,
        };

        let piece = match ty {
            's' | 'r' | 'a' => {
                let text = if ty == 's' { value.to_str() } else { value.repr() };
                let text: String = match spec.precision {
                    Some(p) => text.chars().take(p).collect(),
                    None => text,
                };
                if spec.align == Some('=') {
                    spec.fill = ' ';
                    spec.align = Some('>');
                }
                pad(&text, &spec, '>')
            }
            'd' | 'i' | 'u' => {
                let n = match &value {
                    Value::Float(f) if f.is_finite() => f.trunc() as i64,
                    other => other.as_int().ok_or_else(|| number_required(ty, other))?,
                };
                spec.precision = None;
                format_int(n, &spec)?
            }
            'x' | 'X' | 'o' | 'c' => {
                let n = value.as_int().ok_or_else(|| number_required(ty, &value))?;
                spec.ty = Some(ty);
                format_int(n, &spec)?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let f = value.as_float().ok_or_else(|| number_required(ty, &value))?;
                spec.ty = Some(ty);
                format_float_spec(f, &spec)?
            }
            other => {
                return Err(SandboxError::value_error(format!(
                    "unsupported format character '{}'",
                    other
                )))
            }
        };
        out.push_str(&piece);
    }

    if mapping.is_none() && next_arg < args.len() {
        return Err(SandboxError::type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

fn number_required(ty: char, value: &Value) -> SandboxError {
    SandboxError::type_error(format!(
        "%{} format: a real number is required, not {}",
        ty,
        value.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(Value::Float(3.14159), ".2f", "3.14")]
    #[case(Value::Int(42), ">5", "   42")]
    #[case(Value::Int(42), "05d", "00042")]
    #[case(Value::Int(-42), "05d", "-0042")]
    #[case(Value::Int(1234567), ",", "1,234,567")]
    #[case(Value::Int(255), "#x", "0xff")]
    #[case(Value::Int(5), "b", "101")]
    #[case(Value::Float(0.25), ".1%", "25.0%")]
    #[case(Value::Float(12345.678), "e", "1.234568e+04")]
    #[case(Value::Float(0.0001234), "g", "0.0001234")]
    #[case(Value::Float(1234567.0), "g", "1.23457e+06")]
    #[case(Value::Float(1.0), ".3", "1.0")]
    #[case(Value::Float(2.5), "+", "+2.5")]
    #[case(Value::Int(7), "^5", "  7  ")]
    #[case(Value::Int(7), "*<4", "7***")]
    fn test_format_spec(#[case] value: Value, #[case] spec: &str, #[case] expected: &str) {
        assert_eq!(format_value(&value, spec).unwrap(), expected);
    }

    #[test]
    fn test_str_precision_and_width() {
        assert_eq!(format_value(&Value::from("abcdef"), "<8.3").unwrap(), "abc     ");
    }

    #[test]
    fn test_bad_spec() {
        assert!(format_value(&Value::Int(1), "zz").is_err());
        assert!(format_value(&Value::from("a"), "d").is_err());
    }

    #[test]
    fn test_str_format_fields() {
        let positional = vec![Value::from("a"), Value::Int(2)];
        let keywords = vec![("name".to_string(), Value::from("x"))];
        assert_eq!(
            str_format("{} {} {name}", &positional, &keywords).unwrap(),
            "a 2 x"
        );
        assert_eq!(
            str_format("{1}-{0}-{0!r}", &positional, &[]).unwrap(),
            "2-a-'a'"
        );
        assert_eq!(str_format("{{}}", &[], &[]).unwrap(), "{}");
        assert_eq!(
            str_format("{:>{}}", &[Value::Int(1), Value::Int(3)], &[]).unwrap(),
            "  1"
        );
    }

    #[test]
    fn test_str_format_errors() {
        let err = str_format("{} {}", &[Value::Int(1)], &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "IndexError: Replacement index 1 out of range for positional args tuple"
        );
        assert!(str_format("{missing}", &[], &[]).is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Value::tuple(vec![Value::from("x"), Value::Int(3), Value::Float(1.5)]);
        assert_eq!(
            percent_format("%s=%d (%.2f)", &args).unwrap(),
            "x=3 (1.50)"
        );
        assert_eq!(percent_format("%5.1f%%", &Value::Float(9.87)).unwrap(), "  9.9%");
        assert_eq!(percent_format("%-4d|", &Value::Int(7)).unwrap(), "7   |");
        assert_eq!(percent_format("%03d", &Value::Int(7)).unwrap(), "007");
    }

    #[test]
    fn test_percent_mapping() {
        let mut dict = crate::engine::value::DictValue::new();
        dict.insert(Value::from("n"), Value::Int(4)).unwrap();
        assert_eq!(
            percent_format("%(n)s items", &Value::dict(dict)).unwrap(),
            "4 items"
        );
    }

    #[test]
    fn test_percent_argument_count() {
        let err = percent_format("%s", &Value::tuple(vec![Value::Int(1), Value::Int(2)])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: not all arguments converted during string formatting"
        );
        assert!(percent_format("%s %s", &Value::Int(1)).is_err());
    }
}
