//! Call arguments

use std::rc::Rc;

use crate::engine::value::Value;
use crate::error::{Result, SandboxError};

/// Evaluated arguments of a call: positional values followed by keywords in
/// source order.
#[derive(Debug, Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    /// Remove and return a keyword argument.
    pub fn take_keyword(&mut self, name: &str) -> Option<Value> {
        let pos = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(pos).1)
    }

    /// Positional argument `index`, or the keyword `name` when absent.
    pub fn take(&mut self, index: usize, name: &str) -> Option<Value> {
        let keyword = self.take_keyword(name);
        self.positional.get(index).cloned().or(keyword)
    }

    /// Check the positional count and that every keyword has been consumed.
    pub fn check(&self, func: &str, min: usize, max: usize) -> Result<()> {
        if let Some((name, _)) = self.keywords.first() {
            return Err(SandboxError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                func, name
            )));
        }
        let n = self.positional.len();
        if n < min || n > max {
            let expected = if min == max {
                format!("exactly {}", min)
            } else if n < min {
                format!("at least {}", min)
            } else {
                format!("at most {}", max)
            };
            let plural = if min == max && min == 1 { "" } else { "s" };
            return Err(SandboxError::type_error(format!(
                "{}() takes {} argument{} ({} given)",
                func, expected, plural, n
            )));
        }
        Ok(())
    }

    pub fn int(&self, index: usize, func: &str) -> Result<i64> {
        let value = self.required(index, func)?;
        value.as_int().ok_or_else(|| {
            SandboxError::type_error(format!(
                "{}() argument must be an integer, not '{}'",
                func,
                value.type_name()
            ))
        })
    }

    pub fn float(&self, index: usize, func: &str) -> Result<f64> {
        let value = self.required(index, func)?;
        value.as_float().ok_or_else(|| {
            SandboxError::type_error(format!(
                "{}() argument must be a number, not '{}'",
                func,
                value.type_name()
            ))
        })
    }

    pub fn str(&self, index: usize, func: &str) -> Result<Rc<str>> {
        match self.required(index, func)? {
            Value::Str(s) => Ok(s.clone()),
            other => Err(SandboxError::type_error(format!(
                "{}() argument must be str, not '{}'",
                func,
                other.type_name()
            ))),
        }
    }

    pub fn required(&self, index: usize, func: &str) -> Result<&Value> {
        self.positional.get(index).ok_or_else(|| {
            SandboxError::type_error(format!("{}() missing required argument {}", func, index + 1))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_prefers_positional() {
        let mut args = Args {
            positional: vec![Value::Int(1)],
            keywords: vec![("start".to_string(), Value::Int(5))],
        };
        assert_eq!(args.take(0, "start"), Some(Value::Int(1)));
        assert!(args.keywords.is_empty());
    }

    #[test]
    fn test_check_reports_leftover_keyword() {
        let args = Args {
            positional: vec![],
            keywords: vec![("bogus".to_string(), Value::None)],
        };
        let err = args.check("len", 0, 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: len() got an unexpected keyword argument 'bogus'"
        );
    }

    #[test]
    fn test_check_arity_message() {
        let err = Args::new(vec![]).check("len", 1, 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: len() takes exactly 1 argument (0 given)"
        );
    }
}
