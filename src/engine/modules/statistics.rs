//! `statistics`

use crate::engine::args::Args;
use crate::engine::interpreter::Interpreter;
use crate::engine::modules::numbers;
use crate::engine::value::{values_equal, Value};
use crate::error::{ExceptionKind, Result, SandboxError};

pub const EXPORTS: &[&str] = &[
    "mean", "fmean", "median", "median_low", "median_high", "mode", "stdev", "variance",
    "pstdev", "pvariance",
];

fn statistics_error(message: &str) -> SandboxError {
    SandboxError::value_error(message.to_string())
}

fn mean_of(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sum of squared deviations from the mean.
fn squared_deviations(values: &[f64]) -> f64 {
    let mean = mean_of(values);
    values.iter().map(|v| (v - mean) * (v - mean)).sum()
}

fn variance(values: &[f64], sample: bool) -> Result<f64> {
    let n = values.len();
    if sample && n < 2 {
        return Err(statistics_error("variance requires at least two data points"));
    }
    if !sample && n < 1 {
        return Err(statistics_error("pvariance requires at least one data point"));
    }
    let divisor = if sample { n - 1 } else { n };
    Ok(squared_deviations(values) / divisor as f64)
}

pub fn call(interp: &mut Interpreter<'_>, name: &str, args: Args) -> Result<Value> {
    args.check(name, 1, 1)?;
    match name {
        "mean" => {
            let items = interp.iterate(&args.positional[0])?;
            if items.is_empty() {
                return Err(statistics_error("mean requires at least one data point"));
            }
            let all_ints = items.iter().all(|v| matches!(v, Value::Int(_) | Value::Bool(_)));
            if all_ints {
                let total: i128 = items.iter().filter_map(Value::as_int).map(i128::from).sum();
                let n = items.len() as i128;
                if total % n == 0 {
                    return Ok(Value::Int((total / n) as i64));
                }
            }
            let values = numbers(interp, &Value::list(items), name)?;
            Ok(Value::Float(mean_of(&values)))
        }
        "fmean" => {
            let values = numbers(interp, &args.positional[0], name)?;
            if values.is_empty() {
                return Err(statistics_error("fmean requires at least one data point"));
            }
            Ok(Value::Float(mean_of(&values)))
        }
        "median" | "median_low" | "median_high" => {
            let items = interp.iterate(&args.positional[0])?;
            if items.is_empty() {
                return Err(statistics_error("no median for empty data"));
            }
            let sorted = interp.sort_values(items, None, false)?;
            let n = sorted.len();
            if n % 2 == 1 {
                return Ok(sorted[n / 2].clone());
            }
            match name {
                "median_low" => Ok(sorted[n / 2 - 1].clone()),
                "median_high" => Ok(sorted[n / 2].clone()),
                _ => {
                    let (a, b) = (&sorted[n / 2 - 1], &sorted[n / 2]);
                    match (a.as_float(), b.as_float()) {
                        (Some(a), Some(b)) => Ok(Value::Float((a + b) / 2.0)),
                        _ => Err(SandboxError::type_error(
                            "median() of non-numeric data needs an odd number of items",
                        )),
                    }
                }
            }
        }
        "mode" => {
            let items = interp.iterate(&args.positional[0])?;
            let mut best: Option<(usize, &Value)> = None;
            let mut seen: Vec<(&Value, usize)> = Vec::new();
            for item in &items {
                match seen.iter_mut().find(|(v, _)| values_equal(v, item)) {
                    Some((_, count)) => *count += 1,
                    None => seen.push((item, 1)),
                }
            }
            for (value, count) in &seen {
                if best.map_or(true, |(c, _)| *count > c) {
                    best = Some((*count, *value));
                }
            }
            best.map(|(_, v)| v.clone())
                .ok_or_else(|| statistics_error("no mode for empty data"))
        }
        "variance" | "pvariance" | "stdev" | "pstdev" => {
            let values = numbers(interp, &args.positional[0], name)?;
            let sample = !name.starts_with('p');
            let var = variance(&values, sample)?;
            Ok(Value::Float(if name.ends_with("stdev") { var.sqrt() } else { var }))
        }
        _ => Err(SandboxError::runtime(
            ExceptionKind::AttributeError,
            format!("module 'statistics' has no attribute '{}'", name),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_sample_and_population_variance() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(variance(&data, false).unwrap(), 4.0);
        assert!((variance(&data, true).unwrap() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_variance_needs_data() {
        assert!(variance(&[1.0], true).is_err());
        assert!(variance(&[], false).is_err());
        assert_eq!(variance(&[3.0], false).unwrap(), 0.0);
    }

    #[test]
    fn test_mean_of() {
        assert_eq!(mean_of(&[1.0, 2.0, 3.0, 4.0]), 2.5);
    }
}
