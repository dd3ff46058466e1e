//! Operators
//!
//! Integer arithmetic is checked: anything that does not fit in 64 bits
//! raises `OverflowError` instead of wrapping.

use crate::engine::format::percent_format;
use crate::engine::value::{compare_values, values_equal, DictValue, Value};
use crate::error::{ExceptionKind, Result, SandboxError};
use crate::parser::ast::{BinOp, CmpOp, UnaryOp};

pub fn binary(op: BinOp, left: &Value, right: &Value, max_len: usize) -> Result<Value> {
    use Value::*;

    match (left, right) {
        (Int(_) | Bool(_), Int(_) | Bool(_)) => {
            let (a, b) = (left.as_int().unwrap_or(0), right.as_int().unwrap_or(0));
            int_binary(op, a, b)
        }
        (Int(_) | Bool(_) | Float(_), Int(_) | Bool(_) | Float(_)) => {
            let (a, b) = (left.as_float().unwrap_or(0.0), right.as_float().unwrap_or(0.0));
            float_binary(op, a, b).map(Float)
        }
        (Str(a), Str(b)) if op == BinOp::Add => {
            check_len(a.chars().count() + b.chars().count(), max_len)?;
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::from(s))
        }
        (Str(s), _) if op == BinOp::Mod => percent_format(s, right).map(Value::from),
        (Str(s), Int(_) | Bool(_)) | (Int(_) | Bool(_), Str(s)) if op == BinOp::Mul => {
            let n = repeat_count(left, right);
            check_len(s.chars().count().saturating_mul(n), max_len)?;
            Ok(Value::from(s.repeat(n)))
        }
        (Str(_), _) if op == BinOp::Add => Err(SandboxError::type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            right.type_name()
        ))),
        (List(a), List(b)) if op == BinOp::Add => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            check_len(items.len(), max_len)?;
            Ok(Value::list(items))
        }
        (Tuple(a), Tuple(b)) if op == BinOp::Add => {
            check_len(a.len() + b.len(), max_len)?;
            let mut items = a.to_vec();
            items.extend(b.iter().cloned());
            Ok(Value::tuple(items))
        }
        (List(l), Int(_) | Bool(_)) | (Int(_) | Bool(_), List(l)) if op == BinOp::Mul => {
            let n = repeat_count(left, right);
            let items = l.borrow();
            check_len(items.len().saturating_mul(n), max_len)?;
            Ok(Value::list(repeat_items(&items, n)))
        }
        (Tuple(t), Int(_) | Bool(_)) | (Int(_) | Bool(_), Tuple(t)) if op == BinOp::Mul => {
            let n = repeat_count(left, right);
            check_len(t.len().saturating_mul(n), max_len)?;
            Ok(Value::tuple(repeat_items(t, n)))
        }
        (Set(a), Set(b)) => set_binary(op, &a.borrow(), &b.borrow(), left, right),
        (Dict(a), Dict(b)) if op == BinOp::BitOr => {
            let mut merged = a.borrow().clone();
            merged.counter = false;
            for (k, v) in b.borrow().items() {
                merged.insert(k, v)?;
            }
            Ok(Value::dict(merged))
        }
        _ => Err(unsupported(op, left, right)),
    }
}

fn repeat_count(left: &Value, right: &Value) -> usize {
    let n = left.as_int().or_else(|| right.as_int()).unwrap_or(0);
    n.max(0) as usize
}

fn repeat_items(items: &[Value], n: usize) -> Vec<Value> {
    if items.is_empty() || n == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(items.len() * n);
    for _ in 0..n {
        out.extend(items.iter().cloned());
    }
    out
}

fn check_len(len: usize, max_len: usize) -> Result<()> {
    if len > max_len {
        return Err(SandboxError::runtime(
            ExceptionKind::MemoryError,
            format!("sequence of length {} exceeds the maximum of {}", len, max_len),
        ));
    }
    Ok(())
}

fn unsupported(op: BinOp, left: &Value, right: &Value) -> SandboxError {
    SandboxError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

fn overflow() -> SandboxError {
    SandboxError::runtime(ExceptionKind::OverflowError, "integer overflow")
}

fn int_binary(op: BinOp, a: i64, b: i64) -> Result<Value> {
    let zero_div = || {
        SandboxError::runtime(
            ExceptionKind::ZeroDivisionError,
            "integer division or modulo by zero",
        )
    };
    let result = match op {
        BinOp::Add => a.checked_add(b).ok_or_else(overflow)?,
        BinOp::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        BinOp::Mul => a.checked_mul(b).ok_or_else(overflow)?,
        BinOp::Div => {
            if b == 0 {
                return Err(SandboxError::runtime(
                    ExceptionKind::ZeroDivisionError,
                    "division by zero",
                ));
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(zero_div());
            }
            floor_div(a, b)?
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(zero_div());
            }
            floor_mod(a, b)
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(SandboxError::runtime(
                        ExceptionKind::ZeroDivisionError,
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exp).ok_or_else(overflow)?
        }
        BinOp::LShift => {
            if b < 0 {
                return Err(SandboxError::value_error("negative shift count"));
            }
            if a == 0 {
                0
            } else if b >= 63 {
                return Err(overflow());
            } else {
                let shifted = a << b;
                if shifted >> b != a {
                    return Err(overflow());
                }
                shifted
            }
        }
        BinOp::RShift => {
            if b < 0 {
                return Err(SandboxError::value_error("negative shift count"));
            }
            a >> b.min(63)
        }
        BinOp::BitAnd => a & b,
        BinOp::BitOr => a | b,
        BinOp::BitXor => a ^ b,
    };
    Ok(Value::Int(result))
}

pub fn floor_div(a: i64, b: i64) -> Result<i64> {
    let q = a.checked_div(b).ok_or_else(overflow)?;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        Ok(q - 1)
    } else {
        Ok(q)
    }
}

pub fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

fn float_binary(op: BinOp, a: f64, b: f64) -> Result<f64> {
    let zero = |msg: &str| Err(SandboxError::runtime(ExceptionKind::ZeroDivisionError, msg));
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return zero("float division by zero");
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return zero("float floor division by zero");
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return zero("float modulo");
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return zero("0.0 cannot be raised to a negative power");
            }
            if a < 0.0 && b.fract() != 0.0 {
                return Err(SandboxError::value_error("math domain error"));
            }
            let r = a.powf(b);
            if r.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(SandboxError::runtime(
                    ExceptionKind::OverflowError,
                    "numerical result out of range",
                ));
            }
            r
        }
        _ => {
            return Err(unsupported(op, &Value::Float(a), &Value::Float(b)));
        }
    };
    Ok(result)
}

fn set_binary(op: BinOp, a: &DictValue, b: &DictValue, left: &Value, right: &Value) -> Result<Value> {
    let keys = match op {
        BinOp::BitOr => {
            let mut keys = a.keys();
            for k in b.keys() {
                if !a.contains(&k)? {
                    keys.push(k);
                }
            }
            keys
        }
        BinOp::BitAnd => filter_keys(a, |k| b.contains(k))?,
        BinOp::Sub => filter_keys(a, |k| b.contains(k).map(|c| !c))?,
        BinOp::BitXor => {
            let mut keys = filter_keys(a, |k| b.contains(k).map(|c| !c))?;
            keys.extend(filter_keys(b, |k| a.contains(k).map(|c| !c))?);
            keys
        }
        _ => return Err(unsupported(op, left, right)),
    };
    Ok(Value::set(DictValue::from_keys(keys)?))
}

fn filter_keys(set: &DictValue, mut keep: impl FnMut(&Value) -> Result<bool>) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for k in set.keys() {
        if keep(&k)? {
            out.push(k);
        }
    }
    Ok(out)
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value> {
    let bad = || {
        let symbol = match op {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Invert => "~",
            UnaryOp::Not => "not",
        };
        SandboxError::type_error(format!(
            "bad operand type for unary {}: '{}'",
            symbol,
            operand.type_name()
        ))
    };
    match (op, operand) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Value::Float(f)) => Ok(Value::Float(*f)),
        (_, Value::Int(_) | Value::Bool(_)) => {
            let i = operand.as_int().unwrap_or(0);
            match op {
                UnaryOp::Neg => i.checked_neg().map(Value::Int).ok_or_else(overflow),
                UnaryOp::Pos => Ok(Value::Int(i)),
                UnaryOp::Invert => Ok(Value::Int(!i)),
                UnaryOp::Not => Ok(Value::Bool(i == 0)),
            }
        }
        _ => Err(bad()),
    }
}

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool> {
    use std::cmp::Ordering::*;

    Ok(match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::NotEq => !values_equal(left, right),
        CmpOp::Lt => compare_values(left, right)? == Less,
        CmpOp::LtE => compare_values(left, right)? != Greater,
        CmpOp::Gt => compare_values(left, right)? == Greater,
        CmpOp::GtE => compare_values(left, right)? != Less,
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
        CmpOp::Is => left.is_same(right),
        CmpOp::IsNot => !left.is_same(right),
    })
}

/// Membership test for `needle in container`.
pub fn contains(container: &Value, needle: &Value) -> Result<bool> {
    match container {
        Value::Str(haystack) => match needle {
            Value::Str(n) => Ok(haystack.contains(n.as_ref() as &str)),
            other => Err(SandboxError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| values_equal(v, needle))),
        Value::Tuple(items) => Ok(items.iter().any(|v| values_equal(v, needle))),
        Value::Dict(d) | Value::Set(d) => d.borrow().contains(needle),
        Value::Range(r) => Ok(match needle {
            Value::Int(_) | Value::Bool(_) => r.contains(needle.as_int().unwrap_or(0)),
            Value::Float(f) if f.fract() == 0.0 => r.contains(*f as i64),
            _ => false,
        }),
        Value::Iterator(it) => {
            let it = it.borrow();
            Ok(it.items[it.pos.min(it.items.len())..]
                .iter()
                .any(|v| values_equal(v, needle)))
        }
        other => Err(SandboxError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MAX: usize = 1_000_000;

    #[rstest]
    #[case(BinOp::FloorDiv, -7, 2, -4)]
    #[case(BinOp::Mod, -7, 2, 1)]
    #[case(BinOp::Mod, 7, -2, -1)]
    #[case(BinOp::FloorDiv, 7, 2, 3)]
    #[case(BinOp::Pow, 2, 10, 1024)]
    #[case(BinOp::LShift, 1, 4, 16)]
    #[case(BinOp::RShift, -16, 2, -4)]
    #[case(BinOp::BitXor, 6, 3, 5)]
    fn test_int_ops(#[case] op: BinOp, #[case] a: i64, #[case] b: i64, #[case] expected: i64) {
        let result = binary(op, &Value::Int(a), &Value::Int(b), MAX).unwrap();
        assert_eq!(result, Value::Int(expected));
    }

    #[test]
    fn test_empty_sequence_repeat_is_immediate() {
        let empty = Value::list(Vec::new());
        let huge = Value::Int(1_000_000_000_000_000_000);
        assert_eq!(
            binary(BinOp::Mul, &empty, &huge, MAX).unwrap(),
            Value::list(Vec::new())
        );
        assert_eq!(
            binary(BinOp::Mul, &huge, &Value::tuple(Vec::new()), MAX).unwrap(),
            Value::tuple(Vec::new())
        );
    }

    #[test]
    fn test_true_division_yields_float() {
        assert_eq!(
            binary(BinOp::Div, &Value::Int(7), &Value::Int(2), MAX).unwrap(),
            Value::Float(3.5)
        );
    }

    #[test]
    fn test_overflow_is_an_exception() {
        let err = binary(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2), MAX).unwrap_err();
        assert_eq!(err.to_string(), "OverflowError: integer overflow");
        let err = binary(BinOp::Pow, &Value::Int(10), &Value::Int(100), MAX).unwrap_err();
        assert_eq!(err.to_string(), "OverflowError: integer overflow");
    }

    #[test]
    fn test_division_by_zero_messages() {
        let err = binary(BinOp::Div, &Value::Int(1), &Value::Int(0), MAX).unwrap_err();
        assert_eq!(err.to_string(), "ZeroDivisionError: division by zero");
        let err = binary(BinOp::Div, &Value::Float(1.0), &Value::Int(0), MAX).unwrap_err();
        assert_eq!(err.to_string(), "ZeroDivisionError: float division by zero");
    }

    #[test]
    fn test_float_modulo_follows_divisor_sign() {
        let r = binary(BinOp::Mod, &Value::Float(-1.5), &Value::Int(2), MAX).unwrap();
        assert_eq!(r, Value::Float(0.5));
    }

    #[test]
    fn test_sequence_ops() {
        let s = binary(BinOp::Mul, &Value::from("ab"), &Value::Int(3), MAX).unwrap();
        assert_eq!(s, Value::from("ababab"));
        let l = binary(
            BinOp::Add,
            &Value::list(vec![Value::Int(1)]),
            &Value::list(vec![Value::Int(2)]),
            MAX,
        )
        .unwrap();
        assert_eq!(l.repr(), "[1, 2]");
    }

    #[test]
    fn test_repetition_respects_length_cap() {
        let err = binary(BinOp::Mul, &Value::from("x"), &Value::Int(11), 10).unwrap_err();
        assert!(err.to_string().starts_with("MemoryError"));
    }

    #[test]
    fn test_str_plus_int() {
        let err = binary(BinOp::Add, &Value::from("a"), &Value::Int(1), MAX).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: can only concatenate str (not \"int\") to str"
        );
    }

    #[test]
    fn test_unsupported_operands() {
        let err = binary(BinOp::Sub, &Value::from("a"), &Value::Int(1), MAX).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: unsupported operand type(s) for -: 'str' and 'int'"
        );
    }

    #[test]
    fn test_membership() {
        assert!(contains(&Value::from("hello"), &Value::from("ell")).unwrap());
        assert!(contains(&Value::list(vec![Value::Int(1)]), &Value::Float(1.0)).unwrap());
        assert!(contains(&Value::from("a"), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_chained_comparison_primitives() {
        assert!(compare(CmpOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CmpOp::GtE, &Value::from("b"), &Value::from("a")).unwrap());
        assert!(compare(CmpOp::Is, &Value::None, &Value::None).unwrap());
    }
}
