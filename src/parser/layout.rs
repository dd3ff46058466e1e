//! Layout pass
//!
//! Turns indentation-structured source into the flat token stream the pest
//! grammar expects. Indentation changes become [`INDENT`]/[`DEDENT`] marker
//! characters, comments are dropped, and newlines inside brackets or after a
//! backslash continuation are folded into spaces. Every folded newline is
//! re-emitted after the logical line ends, so line N of the output is always
//! line N of the input and pest positions map straight back to the script.
//!
//! The pass also bounds how deeply one logical line can nest. Brackets,
//! runs of prefix operators and operator chains all become recursion in the
//! grammar and the tree walker, so they are capped here, before pest runs.

use crate::error::{Result, SandboxError};

pub const INDENT: char = '\u{02}';
pub const DEDENT: char = '\u{03}';

const TAB_WIDTH: usize = 8;

/// Operators allowed in one comma-separated segment, per unit of nesting
/// depth. The guard enforces the exact tree depth after parsing.
const OPERATORS_PER_DEPTH: usize = 4;

/// Keywords that join or wrap expressions.
const KEYWORD_OPERATORS: &[&str] = &["and", "or", "if", "else", "lambda", "for", "in", "is"];

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Run the layout pass over `source`.
///
/// `max_nesting_depth` bounds bracket nesting, indentation and runs of prefix
/// operators; deeper input is rejected as a policy violation before the
/// grammar ever sees it.
pub fn layout(source: &str, max_nesting_depth: usize) -> Result<String> {
    let normalized = source.replace("\r\n", "\n").replace('\r', "\n");
    Layout::new(&normalized, max_nesting_depth).run()
}

struct Layout<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    out: String,
    indents: Vec<usize>,
    depth: usize,
    max_depth: usize,
    line: usize,
    folded_newlines: usize,
    /// Identifier or number being scanned
    word: String,
    /// Operator count of the open segment at each bracket level
    segments: Vec<usize>,
    operators: usize,
    prefix_run: usize,
    after_number: bool,
}

impl<'a> Layout<'a> {
    fn new(source: &'a str, max_depth: usize) -> Self {
        Self {
            chars: source.chars().peekable(),
            out: String::with_capacity(source.len() + 16),
            indents: vec![0],
            depth: 0,
            max_depth,
            line: 1,
            folded_newlines: 0,
            word: String::new(),
            segments: vec![0],
            operators: 0,
            prefix_run: 0,
            after_number: false,
        }
    }

    fn run(mut self) -> Result<String> {
        while self.chars.peek().is_some() {
            self.physical_line_start()?;
        }

        if self.depth > 0 {
            return Err(SandboxError::syntax(
                "unexpected EOF while parsing",
                Some(self.line),
            ));
        }
        self.end_logical_line();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.out.push(DEDENT);
        }
        Ok(self.out)
    }

    /// Handle the start of a line outside any bracket: measure indentation,
    /// skip blank lines, then scan the logical line.
    fn physical_line_start(&mut self) -> Result<()> {
        let mut width = 0;
        while let Some(&c) = self.chars.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                '\u{0c}' => width = 0,
                _ => break,
            }
            self.chars.next();
        }

        match self.chars.peek() {
            None => return Ok(()),
            Some('\n') => {
                self.chars.next();
                self.out.push('\n');
                self.line += 1;
                return Ok(());
            }
            Some('#') => {
                self.skip_comment();
                return Ok(());
            }
            _ => {}
        }

        self.apply_indent(width)?;
        self.scan_logical_line()
    }

    fn apply_indent(&mut self, width: usize) -> Result<()> {
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            if self.indents.len() > self.max_depth {
                return Err(SandboxError::policy(format!(
                    "nesting depth exceeds maximum of {}",
                    self.max_depth
                )));
            }
            self.indents.push(width);
            self.out.push(INDENT);
        } else if width < current {
            while self.indents.last().is_some_and(|&top| top > width) {
                self.indents.pop();
                self.out.push(DEDENT);
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(SandboxError::syntax(
                    "unindent does not match any outer indentation level",
                    Some(self.line),
                ));
            }
        }
        Ok(())
    }

    fn scan_logical_line(&mut self) -> Result<()> {
        while let Some(c) = self.chars.next() {
            if is_identifier_char(c) {
                self.word.push(c);
                self.out.push(c);
                continue;
            }
            self.finish_word()?;
            match c {
                '\n' => {
                    self.line += 1;
                    if self.depth > 0 {
                        self.out.push(' ');
                        self.folded_newlines += 1;
                    } else {
                        self.out.push('\n');
                        self.flush_folded();
                        self.reset_nesting();
                        return Ok(());
                    }
                }
                '#' => self.skip_comment_inline(),
                '\\' if self.chars.peek() == Some(&'\n') => {
                    self.chars.next();
                    self.line += 1;
                    self.out.push(' ');
                    self.folded_newlines += 1;
                }
                '"' | '\'' => {
                    self.copy_string(c)?;
                    self.prefix_run = 0;
                }
                '(' | '[' | '{' => {
                    self.operator_token()?;
                    self.depth += 1;
                    if self.depth > self.max_depth {
                        return Err(self.too_deep());
                    }
                    self.segments.push(0);
                    self.out.push(c);
                }
                ')' | ']' | '}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.segments.len() > 1 {
                        let closed = self.segments.pop().unwrap_or(0);
                        self.operators -= closed;
                    }
                    self.prefix_run = 0;
                    self.out.push(c);
                }
                ',' | ';' => {
                    if let Some(open) = self.segments.last_mut() {
                        self.operators -= *open;
                        *open = 0;
                    }
                    self.prefix_run = 0;
                    self.out.push(c);
                }
                '.' => {
                    self.attribute_dot()?;
                    self.out.push(c);
                }
                '-' | '+' | '~' => {
                    self.out.push(c);
                    if c == '-' && self.chars.peek() == Some(&'>') {
                        self.chars.next();
                        self.out.push('>');
                    }
                    self.operator_token()?;
                    self.prefix_operator()?;
                }
                '*' | '/' | '%' | '@' | '&' | '|' | '^' | '<' | '>' | '=' | '!' => {
                    self.out.push(c);
                    while let Some(&next) = self.chars.peek() {
                        let continues = next == '='
                            || (next == c && matches!(c, '*' | '/' | '<' | '>'));
                        if !continues {
                            break;
                        }
                        self.chars.next();
                        self.out.push(next);
                        if next == '=' {
                            break;
                        }
                    }
                    self.operator_token()?;
                    self.prefix_run = 0;
                }
                INDENT | DEDENT => {
                    return Err(SandboxError::syntax(
                        format!("invalid non-printable character U+{:04X}", c as u32),
                        Some(self.line),
                    ));
                }
                _ => self.out.push(c),
            }
        }
        self.finish_word()
    }

    fn too_deep(&self) -> SandboxError {
        SandboxError::policy(format!(
            "nesting depth exceeds maximum of {}",
            self.max_depth
        ))
    }

    /// Classify the identifier, keyword or number that just ended.
    fn finish_word(&mut self) -> Result<()> {
        if self.word.is_empty() {
            return Ok(());
        }
        let word = std::mem::take(&mut self.word);
        self.after_number = word.starts_with(|c: char| c.is_ascii_digit());
        if word == "not" {
            self.operator_token()?;
            self.prefix_operator()?;
        } else if KEYWORD_OPERATORS.contains(&word.as_str()) {
            self.operator_token()?;
            self.prefix_run = 0;
        } else {
            self.prefix_run = 0;
        }
        Ok(())
    }

    /// A `.` directly after a number is a decimal point, not an operator.
    fn attribute_dot(&mut self) -> Result<()> {
        if std::mem::take(&mut self.after_number) {
            return Ok(());
        }
        self.operator_token()
    }

    fn operator_token(&mut self) -> Result<()> {
        if let Some(open) = self.segments.last_mut() {
            *open += 1;
        }
        self.operators += 1;
        if self.depth + self.operators > self.max_depth * OPERATORS_PER_DEPTH {
            return Err(self.too_deep());
        }
        Ok(())
    }

    fn prefix_operator(&mut self) -> Result<()> {
        self.prefix_run += 1;
        if self.prefix_run > self.max_depth {
            return Err(self.too_deep());
        }
        Ok(())
    }

    fn reset_nesting(&mut self) {
        self.segments.clear();
        self.segments.push(0);
        self.operators = 0;
        self.prefix_run = 0;
    }

    /// Comment occupying a whole line.
    fn skip_comment(&mut self) {
        for c in self.chars.by_ref() {
            if c == '\n' {
                self.out.push('\n');
                self.line += 1;
                break;
            }
        }
    }

    /// Comment after code; the terminating newline stays in the stream.
    fn skip_comment_inline(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            self.chars.next();
        }
    }

    fn copy_string(&mut self, quote: char) -> Result<()> {
        let start_line = self.line;
        self.out.push(quote);

        let triple = {
            let mut ahead = self.chars.clone();
            ahead.next() == Some(quote) && ahead.next() == Some(quote)
        };
        if triple {
            self.chars.next();
            self.chars.next();
            self.out.push(quote);
            self.out.push(quote);
        }

        let mut closing_run = 0;
        while let Some(c) = self.chars.next() {
            self.out.push(c);
            match c {
                '\\' => {
                    closing_run = 0;
                    if let Some(escaped) = self.chars.next() {
                        if escaped == '\n' {
                            self.line += 1;
                        }
                        self.out.push(escaped);
                    }
                }
                '\n' => {
                    if !triple {
                        break;
                    }
                    closing_run = 0;
                    self.line += 1;
                }
                c if c == quote => {
                    if !triple {
                        return Ok(());
                    }
                    closing_run += 1;
                    if closing_run == 3 {
                        return Ok(());
                    }
                }
                _ => closing_run = 0,
            }
        }

        Err(SandboxError::syntax(
            "unterminated string literal",
            Some(start_line),
        ))
    }

    fn flush_folded(&mut self) {
        for _ in 0..self.folded_newlines {
            self.out.push('\n');
        }
        self.folded_newlines = 0;
    }

    fn end_logical_line(&mut self) {
        if !self.out.is_empty() && !self.out.ends_with('\n') {
            self.out.push('\n');
        }
        self.flush_folded();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> String {
        layout(source, 100).unwrap()
    }

    #[test]
    fn test_flat_source_passes_through() {
        assert_eq!(run("x = 1\nprint(x)\n"), "x = 1\nprint(x)\n");
    }

    #[test]
    fn test_missing_final_newline_is_added() {
        assert_eq!(run("print(1)"), "print(1)\n");
    }

    #[test]
    fn test_indent_and_dedent_markers() {
        let out = run("if x:\n    y = 1\nz = 2\n");
        assert_eq!(out, "if x:\n\u{2}y = 1\n\u{3}z = 2\n");
    }

    #[test]
    fn test_trailing_dedents_at_eof() {
        let out = run("while a:\n  if b:\n    c\n");
        assert_eq!(out, "while a:\n\u{2}if b:\n\u{2}c\n\u{3}\u{3}");
    }

    #[test]
    fn test_comments_removed() {
        let out = run("# header\nx = 1  # trailing\n");
        assert_eq!(out, "\nx = 1  \n");
    }

    #[test]
    fn test_bracket_newlines_keep_line_count() {
        let source = "x = [1,\n     2]\ny = 3\n";
        let out = run(source);
        assert_eq!(out.matches('\n').count(), source.matches('\n').count());
        assert!(out.starts_with("x = [1,      2]\n\n"));
    }

    #[test]
    fn test_hash_inside_string_is_not_a_comment() {
        assert_eq!(run("s = '#not'\n"), "s = '#not'\n");
    }

    #[test]
    fn test_triple_quoted_string_spans_lines() {
        let out = run("s = \"\"\"a\n  b\"\"\"\nx = 1\n");
        assert_eq!(out, "s = \"\"\"a\n  b\"\"\"\nx = 1\n");
    }

    #[test]
    fn test_backslash_continuation() {
        let out = run("x = 1 + \\\n    2\n");
        assert_eq!(out, "x = 1 +      2\n\n");
    }

    #[test]
    fn test_unterminated_string() {
        let err = layout("x = 'abc\n", 100).unwrap_err();
        assert_eq!(
            err,
            SandboxError::syntax("unterminated string literal", Some(1))
        );
    }

    #[test]
    fn test_bad_dedent() {
        let err = layout("if a:\n    b\n  c\n", 100).unwrap_err();
        assert!(matches!(err, SandboxError::Syntax { line: Some(3), .. }));
    }

    #[test]
    fn test_bracket_depth_cap() {
        let source = format!("x = {}1{}\n", "[".repeat(20), "]".repeat(20));
        assert!(layout(&source, 20).is_ok());
        let err = layout(&source, 19).unwrap_err();
        assert!(matches!(err, SandboxError::Policy(_)));
    }

    #[test]
    fn test_indentation_depth_cap() {
        let source = "if a:\n if b:\n  if c:\n   d\n";
        assert!(layout(source, 3).is_ok());
        assert!(matches!(layout(source, 2), Err(SandboxError::Policy(_))));
    }

    #[test]
    fn test_prefix_operator_run_cap() {
        let source = format!("x = {}1\n", "-".repeat(10));
        assert!(layout(&source, 10).is_ok());
        let err = layout(&source, 9).unwrap_err();
        assert_eq!(
            err,
            SandboxError::policy("nesting depth exceeds maximum of 9")
        );
        let source = format!("x = {}True\n", "not ".repeat(10));
        assert!(matches!(layout(&source, 9), Err(SandboxError::Policy(_))));
    }

    #[test]
    fn test_huge_prefix_run_fails_closed() {
        let source = format!("x = {}1\n", "-".repeat(300_000));
        assert!(matches!(layout(&source, 100), Err(SandboxError::Policy(_))));
    }

    #[test]
    fn test_operator_chain_cap() {
        let chain = vec!["1"; 500].join(" + ");
        let err = layout(&format!("x = {}\n", chain), 100).unwrap_err();
        assert!(matches!(err, SandboxError::Policy(_)));

        let attributes = format!("x{}\n", ".a".repeat(500));
        assert!(matches!(layout(&attributes, 100), Err(SandboxError::Policy(_))));
    }

    #[test]
    fn test_commas_and_lines_reset_operator_count() {
        let items = vec!["-1 + 2 * 3"; 200].join(", ");
        assert!(layout(&format!("x = [{}]\n", items), 10).is_ok());

        let lines = "y = a + b - c * d\n".repeat(200);
        assert!(layout(&lines, 10).is_ok());
    }

    #[test]
    fn test_decimal_points_are_not_operators() {
        let floats = vec!["1.5"; 300].join(" ");
        assert!(layout(&format!("x = ({})\n", floats), 10).is_ok());
    }

    #[test]
    fn test_unclosed_bracket() {
        let err = layout("print(1\n", 100).unwrap_err();
        assert!(matches!(err, SandboxError::Syntax { .. }));
    }
}
