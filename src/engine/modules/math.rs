//! `math`

use crate::engine::args::Args;
use crate::engine::builtins::float_to_int;
use crate::engine::interpreter::Interpreter;
use crate::engine::modules::numbers;
use crate::engine::ops;
use crate::engine::value::Value;
use crate::error::{ExceptionKind, Result, SandboxError};
use crate::parser::ast::BinOp;

pub const EXPORTS: &[&str] = &[
    "pi", "e", "tau", "inf", "nan", "sqrt", "pow", "exp", "log", "log10", "log2", "sin", "cos",
    "tan", "asin", "acos", "atan", "atan2", "sinh", "cosh", "tanh", "degrees", "radians",
    "floor", "ceil", "trunc", "fabs", "factorial", "gcd", "lcm", "isqrt", "hypot", "isclose",
    "isfinite", "isinf", "isnan", "comb", "perm", "prod", "fsum", "copysign",
];

pub fn constant(name: &str) -> Option<Value> {
    let value = match name {
        "pi" => std::f64::consts::PI,
        "e" => std::f64::consts::E,
        "tau" => std::f64::consts::TAU,
        "inf" => f64::INFINITY,
        "nan" => f64::NAN,
        _ => return None,
    };
    Some(Value::Float(value))
}

fn domain_error() -> SandboxError {
    SandboxError::value_error("math domain error")
}

fn range_error() -> SandboxError {
    SandboxError::runtime(ExceptionKind::OverflowError, "math range error")
}

/// Result of a float function: NaN from a finite input is a domain error,
/// infinity from a finite input a range error.
fn checked(input: f64, result: f64) -> Result<Value> {
    if result.is_nan() && !input.is_nan() {
        return Err(domain_error());
    }
    if result.is_infinite() && input.is_finite() {
        return Err(range_error());
    }
    Ok(Value::Float(result))
}

fn unary(args: &Args, name: &str, f: fn(f64) -> f64) -> Result<Value> {
    args.check(name, 1, 1)?;
    let x = args.float(0, name)?;
    checked(x, f(x))
}

fn non_negative_int(args: &Args, index: usize, name: &str) -> Result<i64> {
    let n = args.int(index, name)?;
    if n < 0 {
        return Err(SandboxError::value_error(format!(
            "{}() not defined for negative values",
            name
        )));
    }
    Ok(n)
}

fn overflow() -> SandboxError {
    SandboxError::runtime(ExceptionKind::OverflowError, "integer overflow")
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a as i64
}

fn perm(n: i64, k: i64) -> Result<i64> {
    if k > n {
        return Ok(0);
    }
    let mut result: i64 = 1;
    for i in 0..k {
        result = result.checked_mul(n - i).ok_or_else(overflow)?;
    }
    Ok(result)
}

fn comb(n: i64, k: i64) -> Result<i64> {
    if k > n {
        return Ok(0);
    }
    let k = k.min(n - k);
    let mut result: i128 = 1;
    for i in 0..k {
        result = result * (n - i) as i128 / (i + 1) as i128;
        if result > i64::MAX as i128 {
            return Err(overflow());
        }
    }
    Ok(result as i64)
}

fn isqrt(n: i64) -> i64 {
    let mut x = (n as f64).sqrt() as i64;
    while x.checked_mul(x).map_or(true, |sq| sq > n) {
        x -= 1;
    }
    while (x + 1).checked_mul(x + 1).is_some_and(|sq| sq <= n) {
        x += 1;
    }
    x
}

/// Neumaier-compensated sum.
fn fsum(values: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut compensation = 0.0;
    for &v in values {
        let t = sum + v;
        if sum.abs() >= v.abs() {
            compensation += (sum - t) + v;
        } else {
            compensation += (v - t) + sum;
        }
        sum = t;
    }
    sum + compensation
}

pub fn call(interp: &mut Interpreter<'_>, name: &str, mut args: Args) -> Result<Value> {
    match name {
        "sqrt" => {
            args.check(name, 1, 1)?;
            let x = args.float(0, name)?;
            if x < 0.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(x.sqrt()))
        }
        "exp" => unary(&args, name, f64::exp),
        "log" => {
            args.check(name, 1, 2)?;
            let x = args.float(0, name)?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            match args.get(1) {
                None => Ok(Value::Float(x.ln())),
                Some(_) => {
                    let base = args.float(1, name)?;
                    if base <= 0.0 || base == 1.0 {
                        return Err(domain_error());
                    }
                    Ok(Value::Float(x.ln() / base.ln()))
                }
            }
        }
        "log10" | "log2" => {
            args.check(name, 1, 1)?;
            let x = args.float(0, name)?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(if name == "log10" { x.log10() } else { x.log2() }))
        }
        "sin" => unary(&args, name, f64::sin),
        "cos" => unary(&args, name, f64::cos),
        "tan" => unary(&args, name, f64::tan),
        "asin" => unary(&args, name, f64::asin),
        "acos" => unary(&args, name, f64::acos),
        "atan" => unary(&args, name, f64::atan),
        "sinh" => unary(&args, name, f64::sinh),
        "cosh" => unary(&args, name, f64::cosh),
        "tanh" => unary(&args, name, f64::tanh),
        "degrees" => unary(&args, name, f64::to_degrees),
        "radians" => unary(&args, name, f64::to_radians),
        "fabs" => unary(&args, name, f64::abs),
        "atan2" | "copysign" | "pow" => {
            args.check(name, 2, 2)?;
            let (a, b) = (args.float(0, name)?, args.float(1, name)?);
            let result = match name {
                "atan2" => a.atan2(b),
                "copysign" => a.copysign(b),
                _ => {
                    if a == 0.0 && b < 0.0 {
                        return Err(domain_error());
                    }
                    a.powf(b)
                }
            };
            if result.is_nan() && !a.is_nan() && !b.is_nan() {
                return Err(domain_error());
            }
            if result.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(range_error());
            }
            Ok(Value::Float(result))
        }
        "floor" | "ceil" | "trunc" => {
            args.check(name, 1, 1)?;
            if let Some(i) = args.positional[0].as_int() {
                return Ok(Value::Int(i));
            }
            let x = args.float(0, name)?;
            let rounded = match name {
                "floor" => x.floor(),
                "ceil" => x.ceil(),
                _ => x.trunc(),
            };
            Ok(Value::Int(float_to_int(rounded)?))
        }
        "factorial" => {
            args.check(name, 1, 1)?;
            let n = non_negative_int(&args, 0, name)?;
            let mut result: i64 = 1;
            for i in 2..=n {
                result = result.checked_mul(i).ok_or_else(overflow)?;
            }
            Ok(Value::Int(result))
        }
        "gcd" | "lcm" => {
            let mut acc = if name == "gcd" { 0 } else { 1 };
            for i in 0..args.len() {
                let n = args.int(i, name)?;
                acc = if name == "gcd" {
                    let g = gcd(acc, n);
                    if g < 0 {
                        return Err(overflow());
                    }
                    g
                } else if acc == 0 || n == 0 {
                    0
                } else {
                    let magnitude = n.checked_abs().ok_or_else(overflow)?;
                    (acc / gcd(acc, n))
                        .checked_mul(magnitude)
                        .ok_or_else(overflow)?
                };
            }
            args.check(name, 0, usize::MAX)?;
            Ok(Value::Int(acc))
        }
        "isqrt" => {
            args.check(name, 1, 1)?;
            let n = args.int(0, name)?;
            if n < 0 {
                return Err(SandboxError::value_error(
                    "isqrt() argument must be nonnegative",
                ));
            }
            Ok(Value::Int(isqrt(n)))
        }
        "comb" | "perm" => {
            args.check(name, 1, 2)?;
            let n = non_negative_int(&args, 0, name)?;
            let k = match args.get(1) {
                None | Some(Value::None) if name == "perm" => n,
                _ => non_negative_int(&args, 1, name)?,
            };
            Ok(Value::Int(if name == "comb" { comb(n, k)? } else { perm(n, k)? }))
        }
        "hypot" => {
            args.check(name, 0, usize::MAX)?;
            let mut sum = 0.0f64;
            for i in 0..args.len() {
                let x = args.float(i, name)?;
                sum += x * x;
            }
            Ok(Value::Float(sum.sqrt()))
        }
        "isclose" => {
            let rel_tol = args.take_keyword("rel_tol").and_then(|v| v.as_float()).unwrap_or(1e-9);
            let abs_tol = args.take_keyword("abs_tol").and_then(|v| v.as_float()).unwrap_or(0.0);
            args.check(name, 2, 2)?;
            if rel_tol < 0.0 || abs_tol < 0.0 {
                return Err(SandboxError::value_error("tolerances must be non-negative"));
            }
            let (a, b) = (args.float(0, name)?, args.float(1, name)?);
            if a == b {
                return Ok(Value::Bool(true));
            }
            if a.is_infinite() || b.is_infinite() {
                return Ok(Value::Bool(false));
            }
            let diff = (a - b).abs();
            Ok(Value::Bool(
                diff <= (rel_tol * b.abs()).max(rel_tol * a.abs()) || diff <= abs_tol,
            ))
        }
        "isfinite" | "isinf" | "isnan" => {
            args.check(name, 1, 1)?;
            let x = args.float(0, name)?;
            Ok(Value::Bool(match name {
                "isfinite" => x.is_finite(),
                "isinf" => x.is_infinite(),
                _ => x.is_nan(),
            }))
        }
        "prod" => {
            let start = args.take_keyword("start").unwrap_or(Value::Int(1));
            args.check(name, 1, 1)?;
            let max_len = interp.state.limits().max_sequence_length;
            let mut acc = start;
            for item in interp.iterate(&args.positional[0])? {
                acc = ops::binary(BinOp::Mul, &acc, &item, max_len)?;
            }
            Ok(acc)
        }
        "fsum" => {
            args.check(name, 1, 1)?;
            let values = numbers(interp, &args.positional[0], name)?;
            Ok(Value::Float(fsum(&values)))
        }
        _ => Err(SandboxError::runtime(
            ExceptionKind::AttributeError,
            format!("module 'math' has no attribute '{}'", name),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, 1)]
    #[case(5, 2, 10)]
    #[case(52, 5, 2_598_960)]
    #[case(3, 5, 0)]
    fn test_comb(#[case] n: i64, #[case] k: i64, #[case] expected: i64) {
        assert_eq!(comb(n, k).unwrap(), expected);
    }

    #[test]
    fn test_perm_and_overflow() {
        assert_eq!(perm(5, 2).unwrap(), 20);
        assert!(perm(100, 50).is_err());
    }

    #[test]
    fn test_isqrt_exact() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(15), 3);
        assert_eq!(isqrt(16), 4);
        assert_eq!(isqrt(i64::MAX), 3_037_000_499);
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(-4, 6), 2);
        assert_eq!(gcd(0, 7), 7);
    }

    #[test]
    fn test_fsum_compensates() {
        let values = vec![0.1; 10];
        assert_eq!(fsum(&values), 1.0);
    }

    #[test]
    fn test_checked_domain_and_range() {
        assert!(checked(-1.0, f64::NAN).is_err());
        assert!(checked(1000.0, f64::INFINITY).is_err());
        assert_eq!(checked(1.0, 2.0).unwrap(), Value::Float(2.0));
    }
}
