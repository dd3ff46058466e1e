//! `random`
//!
//! Draws from the per-execution generator in [`ExecutionState::rng`]; it is
//! seeded from entropy unless the script calls `seed`.
//!
//! [`ExecutionState::rng`]: crate::engine::state::ExecutionState

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::engine::args::Args;
use crate::engine::interpreter::Interpreter;
use crate::engine::value::Value;
use crate::error::{ExceptionKind, Result, SandboxError};

pub const EXPORTS: &[&str] = &[
    "seed", "random", "randint", "uniform", "choice", "shuffle", "sample", "randrange", "gauss",
];

/// FNV-1a, for string seeds.
fn hash_seed(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

fn randrange(rng: &mut StdRng, start: i64, stop: i64, step: i64) -> Result<i64> {
    if step == 0 {
        return Err(SandboxError::value_error("zero step for randrange()"));
    }
    let span = stop as i128 - start as i128;
    let count = if step > 0 {
        (span + step as i128 - 1) / step as i128
    } else {
        (span + step as i128 + 1) / step as i128
    };
    if count <= 0 {
        return Err(SandboxError::value_error(format!(
            "empty range for randrange() ({}, {}, {})",
            start, stop, step
        )));
    }
    let pick = rng.gen_range(0..count);
    Ok((start as i128 + pick * step as i128) as i64)
}

/// Box-Muller transform.
fn gauss(rng: &mut StdRng, mu: f64, sigma: f64) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    mu + sigma * z
}

pub fn call(interp: &mut Interpreter<'_>, name: &str, mut args: Args) -> Result<Value> {
    match name {
        "seed" => {
            let seed = args.take(0, "a");
            args.positional.truncate(0);
            args.check(name, 0, 0)?;
            match seed {
                None | Some(Value::None) => interp.state.rng = StdRng::from_entropy(),
                Some(Value::Str(s)) => interp.state.reseed(hash_seed(&s)),
                Some(Value::Float(f)) => interp.state.reseed(f.to_bits()),
                Some(other) => {
                    let n = other.as_int().ok_or_else(|| {
                        SandboxError::type_error(format!(
                            "The only supported seed types are: None, int, float, str, not {}",
                            other.type_name()
                        ))
                    })?;
                    interp.state.reseed(n as u64);
                }
            }
            Ok(Value::None)
        }
        "random" => {
            args.check(name, 0, 0)?;
            Ok(Value::Float(interp.state.rng.gen::<f64>()))
        }
        "uniform" => {
            args.check(name, 2, 2)?;
            let (a, b) = (args.float(0, name)?, args.float(1, name)?);
            let t: f64 = interp.state.rng.gen();
            Ok(Value::Float(a + (b - a) * t))
        }
        "randint" => {
            args.check(name, 2, 2)?;
            let (a, b) = (args.int(0, name)?, args.int(1, name)?);
            let stop = b.checked_add(1).ok_or_else(|| {
                SandboxError::runtime(ExceptionKind::OverflowError, "integer overflow")
            })?;
            Ok(Value::Int(randrange(&mut interp.state.rng, a, stop, 1)?))
        }
        "randrange" => {
            args.check(name, 1, 3)?;
            let (start, stop) = match args.get(1) {
                None => (0, args.int(0, name)?),
                Some(_) => (args.int(0, name)?, args.int(1, name)?),
            };
            let step = match args.get(2) {
                None => 1,
                Some(_) => args.int(2, name)?,
            };
            Ok(Value::Int(randrange(&mut interp.state.rng, start, stop, step)?))
        }
        "gauss" => {
            let mu = args.take(0, "mu");
            let sigma = args.take(1, "sigma");
            args.positional.truncate(0);
            args.check(name, 0, 0)?;
            let number = |v: Option<Value>, default: f64| -> Result<f64> {
                match v {
                    None => Ok(default),
                    Some(v) => v
                        .as_float()
                        .ok_or_else(|| SandboxError::type_error("gauss() arguments must be numbers")),
                }
            };
            let (mu, sigma) = (number(mu, 0.0)?, number(sigma, 1.0)?);
            Ok(Value::Float(gauss(&mut interp.state.rng, mu, sigma)))
        }
        "choice" => {
            args.check(name, 1, 1)?;
            let items = interp.iterate(&args.positional[0])?;
            items
                .choose(&mut interp.state.rng)
                .cloned()
                .ok_or_else(|| {
                    SandboxError::runtime(
                        ExceptionKind::IndexError,
                        "Cannot choose from an empty sequence",
                    )
                })
        }
        "shuffle" => {
            args.check(name, 1, 1)?;
            let Value::List(list) = &args.positional[0] else {
                return Err(SandboxError::type_error(format!(
                    "shuffle() argument must be a list, not '{}'",
                    args.positional[0].type_name()
                )));
            };
            list.borrow_mut().shuffle(&mut interp.state.rng);
            Ok(Value::None)
        }
        "sample" => {
            let k = args.take(1, "k");
            args.positional.truncate(1);
            args.check(name, 1, 1)?;
            let k = k
                .and_then(|v| v.as_int())
                .ok_or_else(|| SandboxError::type_error("sample() missing required argument 'k'"))?;
            let mut items = interp.iterate(&args.positional[0])?;
            if k < 0 || k as usize > items.len() {
                return Err(SandboxError::value_error(
                    "Sample larger than population or is negative",
                ));
            }
            let (chosen, _) = items.partial_shuffle(&mut interp.state.rng, k as usize);
            Ok(Value::list(chosen.to_vec()))
        }
        _ => Err(SandboxError::runtime(
            ExceptionKind::AttributeError,
            format!("module 'random' has no attribute '{}'", name),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_randrange_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let n = randrange(&mut rng, 10, 20, 3).unwrap();
            assert!([10, 13, 16, 19].contains(&n));
            let m = randrange(&mut rng, 5, 0, -1).unwrap();
            assert!((1..=5).contains(&m));
        }
    }

    #[test]
    fn test_randrange_empty() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(randrange(&mut rng, 5, 5, 1).is_err());
        assert!(randrange(&mut rng, 0, 5, 0).is_err());
    }

    #[test]
    fn test_gauss_is_deterministic_per_seed() {
        let a = gauss(&mut StdRng::seed_from_u64(42), 0.0, 1.0);
        let b = gauss(&mut StdRng::seed_from_u64(42), 0.0, 1.0);
        assert_eq!(a, b);
        assert!(a.is_finite());
    }

    #[test]
    fn test_hash_seed_distinguishes_strings() {
        assert_ne!(hash_seed("a"), hash_seed("b"));
        assert_eq!(hash_seed("abc"), hash_seed("abc"));
    }
}
