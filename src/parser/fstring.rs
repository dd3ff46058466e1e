//! String literal decoding
//!
//! Escape processing for quoted literals and the splitting of f-strings into
//! literal text and replacement fields. Field expressions are returned as
//! source text; the grammar module parses them.

use crate::error::{Result, SandboxError};

/// A piece of an f-string before its field expressions are parsed
#[derive(Debug, Clone, PartialEq)]
pub enum RawPart {
    Literal(String),
    Field {
        source: String,
        conversion: Option<char>,
        spec: Vec<RawPart>,
    },
}

/// Resolve backslash escapes in the body of a non-raw literal.
pub fn unescape(body: &str, line: usize) -> Result<String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(esc) = chars.next() else {
            out.push('\\');
            break;
        };
        match esc {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'v' => out.push('\u{0b}'),
            '0'..='7' => {
                let mut value = esc.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or('\u{fffd}'));
            }
            'x' => out.push(hex_escape(&mut chars, 2, line)?),
            'u' => out.push(hex_escape(&mut chars, 4, line)?),
            'U' => out.push(hex_escape(&mut chars, 8, line)?),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }

    Ok(out)
}

fn hex_escape(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    width: usize,
    line: usize,
) -> Result<char> {
    let mut value = 0u32;
    for _ in 0..width {
        let digit = chars
            .next()
            .and_then(|c| c.to_digit(16))
            .ok_or_else(|| SandboxError::syntax("truncated \\xXX escape", Some(line)))?;
        value = value * 16 + digit;
    }
    char::from_u32(value)
        .ok_or_else(|| SandboxError::syntax("invalid unicode escape", Some(line)))
}

/// Split an f-string body into literal text and replacement fields.
pub fn split_fstring(body: &str, raw: bool, line: usize) -> Result<Vec<RawPart>> {
    let chars: Vec<char> = body.chars().collect();
    let mut pos = 0;
    split_until(&chars, &mut pos, raw, line, false)
}

fn split_until(
    chars: &[char],
    pos: &mut usize,
    raw: bool,
    line: usize,
    in_spec: bool,
) -> Result<Vec<RawPart>> {
    let mut parts = Vec::new();
    let mut literal = String::new();

    while *pos < chars.len() {
        let c = chars[*pos];
        match c {
            '{' if chars.get(*pos + 1) == Some(&'{') && !in_spec => {
                literal.push('{');
                *pos += 2;
            }
            '}' if chars.get(*pos + 1) == Some(&'}') && !in_spec => {
                literal.push('}');
                *pos += 2;
            }
            '{' => {
                flush_literal(&mut parts, &mut literal, raw, line)?;
                *pos += 1;
                parts.push(parse_field(chars, pos, raw, line)?);
            }
            '}' if in_spec => break,
            '}' => {
                return Err(SandboxError::syntax(
                    "f-string: single '}' is not allowed",
                    Some(line),
                ))
            }
            _ => {
                literal.push(c);
                *pos += 1;
            }
        }
    }

    flush_literal(&mut parts, &mut literal, raw, line)?;
    Ok(parts)
}

fn flush_literal(parts: &mut Vec<RawPart>, literal: &mut String, raw: bool, line: usize) -> Result<()> {
    if literal.is_empty() {
        return Ok(());
    }
    let text = std::mem::take(literal);
    let text = if raw { text } else { unescape(&text, line)? };
    parts.push(RawPart::Literal(text));
    Ok(())
}

/// Parse `expr[!c][:spec]}` with `pos` just after the opening brace.
fn parse_field(chars: &[char], pos: &mut usize, raw: bool, line: usize) -> Result<RawPart> {
    let mut source = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    loop {
        let Some(&c) = chars.get(*pos) else {
            return Err(SandboxError::syntax("f-string: expecting '}'", Some(line)));
        };
        if let Some(q) = quote {
            source.push(c);
            *pos += 1;
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth > 0 => depth -= 1,
            '}' | ':' if depth == 0 => break,
            '!' if depth == 0 && chars.get(*pos + 1) != Some(&'=') => break,
            _ => {}
        }
        source.push(c);
        *pos += 1;
    }

    if source.trim().is_empty() {
        return Err(SandboxError::syntax(
            "f-string: empty expression not allowed",
            Some(line),
        ));
    }

    let mut conversion = None;
    if chars.get(*pos) == Some(&'!') {
        let conv = chars.get(*pos + 1).copied();
        match conv {
            Some(c @ ('r' | 's' | 'a')) => conversion = Some(c),
            _ => {
                return Err(SandboxError::syntax(
                    "f-string: invalid conversion character",
                    Some(line),
                ))
            }
        }
        *pos += 2;
    }

    let mut spec = Vec::new();
    if chars.get(*pos) == Some(&':') {
        *pos += 1;
        spec = split_until(chars, pos, raw, line, true)?;
    }

    if chars.get(*pos) != Some(&'}') {
        return Err(SandboxError::syntax("f-string: expecting '}'", Some(line)));
    }
    *pos += 1;

    Ok(RawPart::Field {
        source: source.replace('\n', " "),
        conversion,
        spec,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(source: &str) -> RawPart {
        RawPart::Field {
            source: source.to_string(),
            conversion: None,
            spec: vec![],
        }
    }

    #[test]
    fn test_unescape_common() {
        assert_eq!(unescape(r"a\nb\t\\", 1).unwrap(), "a\nb\t\\");
        assert_eq!(unescape(r"\x41é", 1).unwrap(), "Aé");
        assert_eq!(unescape(r"\d", 1).unwrap(), "\\d");
        assert_eq!(unescape(r"\101", 1).unwrap(), "A");
    }

    #[test]
    fn test_truncated_hex_escape() {
        assert!(unescape(r"\x4", 1).is_err());
    }

    #[test]
    fn test_split_plain_fields() {
        let parts = split_fstring("x={x}, y={y + 1}", false, 1).unwrap();
        assert_eq!(
            parts,
            vec![
                RawPart::Literal("x=".to_string()),
                field("x"),
                RawPart::Literal(", y=".to_string()),
                field("y + 1"),
            ]
        );
    }

    #[test]
    fn test_split_doubled_braces() {
        let parts = split_fstring("{{literal}}", false, 1).unwrap();
        assert_eq!(parts, vec![RawPart::Literal("{literal}".to_string())]);
    }

    #[test]
    fn test_split_conversion_and_spec() {
        let parts = split_fstring("{name!r:>{width}}", false, 1).unwrap();
        assert_eq!(
            parts,
            vec![RawPart::Field {
                source: "name".to_string(),
                conversion: Some('r'),
                spec: vec![RawPart::Literal(">".to_string()), field("width")],
            }]
        );
    }

    #[test]
    fn test_field_with_nested_brackets_and_strings() {
        let parts = split_fstring("{d['a:b']}{f(x)[0]!s}", false, 1).unwrap();
        assert_eq!(
            parts,
            vec![
                field("d['a:b']"),
                RawPart::Field {
                    source: "f(x)[0]".to_string(),
                    conversion: Some('s'),
                    spec: vec![],
                },
            ]
        );
    }

    #[test]
    fn test_not_equal_inside_field() {
        let parts = split_fstring("{a != b}", false, 1).unwrap();
        assert_eq!(parts, vec![field("a != b")]);
    }

    #[test]
    fn test_single_closing_brace_rejected() {
        assert!(split_fstring("oops}", false, 1).is_err());
        assert!(split_fstring("{x", false, 1).is_err());
        assert!(split_fstring("{}", false, 1).is_err());
    }
}
