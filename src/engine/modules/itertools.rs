//! `itertools`
//!
//! Results are computed eagerly and handed back as iterators. Every result
//! is capped by the sequence limit before it is materialised.

use crate::engine::args::Args;
use crate::engine::interpreter::Interpreter;
use crate::engine::ops;
use crate::engine::value::{values_equal, NativeFunction, Value};
use crate::error::{ExceptionKind, Result, SandboxError};
use crate::parser::ast::BinOp;

pub const EXPORTS: &[&str] = &[
    "permutations",
    "combinations",
    "combinations_with_replacement",
    "product",
    "chain",
    "accumulate",
    "islice",
    "zip_longest",
    "groupby",
];

/// Index-vector generators shared by the combinatoric functions.
mod indices {
    /// Advance `idx` to the next r-combination of `0..n`; false when exhausted.
    pub fn next_combination(idx: &mut [usize], n: usize, with_replacement: bool) -> bool {
        let r = idx.len();
        for i in (0..r).rev() {
            let ceiling = if with_replacement { n - 1 } else { i + n - r };
            if idx[i] < ceiling {
                idx[i] += 1;
                let base = idx[i];
                for (offset, slot) in idx[i + 1..].iter_mut().enumerate() {
                    *slot = if with_replacement { base } else { base + offset + 1 };
                }
                return true;
            }
        }
        false
    }

    /// Advance `idx` to the next odometer position with `radices`.
    pub fn next_product(idx: &mut [usize], radices: &[usize]) -> bool {
        for i in (0..idx.len()).rev() {
            idx[i] += 1;
            if idx[i] < radices[i] {
                return true;
            }
            idx[i] = 0;
        }
        false
    }
}

fn count_guard(interp: &Interpreter<'_>, produced: usize) -> Result<()> {
    interp.state.check_sequence_len(produced)
}

fn optional_length(value: Option<Value>, func: &str) -> Result<Option<usize>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(v) => {
            let n = v.as_int().ok_or_else(|| {
                SandboxError::type_error(format!("{}() expected an integer length", func))
            })?;
            usize::try_from(n)
                .map(Some)
                .map_err(|_| SandboxError::value_error("r must be non-negative"))
        }
    }
}

/// Lexicographic r-permutations by position, via the rotating-cycles walk.
fn permutations(interp: &Interpreter<'_>, pool: &[Value], r: usize) -> Result<Vec<Value>> {
    let n = pool.len();
    let mut out = Vec::new();
    if r > n {
        return Ok(out);
    }
    let emit = |idx: &[usize]| Value::tuple(idx[..r].iter().map(|&i| pool[i].clone()).collect());
    let mut idx: Vec<usize> = (0..n).collect();
    let mut cycles: Vec<usize> = (n - r + 1..=n).rev().collect();
    out.push(emit(&idx));
    'outer: loop {
        for i in (0..r).rev() {
            cycles[i] -= 1;
            if cycles[i] == 0 {
                idx[i..].rotate_left(1);
                cycles[i] = n - i;
            } else {
                let j = n - cycles[i];
                idx.swap(i, j);
                out.push(emit(&idx));
                count_guard(interp, out.len())?;
                continue 'outer;
            }
        }
        return Ok(out);
    }
}

fn combinations(
    interp: &Interpreter<'_>,
    pool: &[Value],
    r: usize,
    with_replacement: bool,
) -> Result<Vec<Value>> {
    let n = pool.len();
    let mut out = Vec::new();
    if (!with_replacement && r > n) || (n == 0 && r > 0) {
        return Ok(out);
    }
    let mut idx: Vec<usize> = if with_replacement { vec![0; r] } else { (0..r).collect() };
    loop {
        out.push(Value::tuple(idx.iter().map(|&i| pool[i].clone()).collect()));
        count_guard(interp, out.len())?;
        if !indices::next_combination(&mut idx, n, with_replacement) {
            return Ok(out);
        }
    }
}

fn product(interp: &Interpreter<'_>, pools: &[Vec<Value>]) -> Result<Vec<Value>> {
    if pools.iter().any(Vec::is_empty) {
        return Ok(Vec::new());
    }
    let radices: Vec<usize> = pools.iter().map(Vec::len).collect();
    let mut idx = vec![0; pools.len()];
    let mut out = Vec::new();
    loop {
        out.push(Value::tuple(
            idx.iter().zip(pools).map(|(&i, pool)| pool[i].clone()).collect(),
        ));
        count_guard(interp, out.len())?;
        if !indices::next_product(&mut idx, &radices) {
            return Ok(out);
        }
    }
}

fn islice_bound(value: Option<&Value>, name: &str) -> Result<Option<usize>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(v) => v
            .as_int()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                SandboxError::value_error(format!(
                    "{} argument for islice() must be None or an integer: 0 <= x <= sys.maxsize.",
                    name
                ))
            }),
    }
}

pub fn call(interp: &mut Interpreter<'_>, native: NativeFunction, mut args: Args) -> Result<Value> {
    let name = native.name;
    let items = match (native.module, name) {
        ("itertools.chain", "from_iterable") => {
            args.check("from_iterable", 1, 1)?;
            let mut out = Vec::new();
            for iterable in interp.iterate(&args.positional[0])? {
                out.extend(interp.iterate(&iterable)?);
                count_guard(interp, out.len())?;
            }
            out
        }
        (_, "chain") => {
            args.check(name, 0, usize::MAX)?;
            let mut out = Vec::new();
            for iterable in &args.positional {
                out.extend(interp.iterate(iterable)?);
                count_guard(interp, out.len())?;
            }
            out
        }
        (_, "permutations") => {
            let r = args.take(1, "r");
            args.positional.truncate(1);
            args.check(name, 1, 1)?;
            let pool = interp.iterate(&args.positional[0])?;
            let r = optional_length(r, name)?.unwrap_or(pool.len());
            permutations(interp, &pool, r)?
        }
        (_, "combinations" | "combinations_with_replacement") => {
            let r = args.take(1, "r");
            args.positional.truncate(1);
            args.check(name, 1, 1)?;
            let r = optional_length(r, name)?.ok_or_else(|| {
                SandboxError::type_error(format!("{}() missing required argument 'r' (pos 2)", name))
            })?;
            let pool = interp.iterate(&args.positional[0])?;
            combinations(interp, &pool, r, name == "combinations_with_replacement")?
        }
        (_, "product") => {
            let repeat = match args.take_keyword("repeat") {
                None => 1,
                Some(v) => v
                    .as_int()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| SandboxError::value_error("repeat argument cannot be negative"))?,
            };
            args.check(name, 0, usize::MAX)?;
            let mut pools = Vec::with_capacity(args.len());
            for iterable in &args.positional {
                pools.push(interp.iterate(iterable)?);
            }
            let pools: Vec<Vec<Value>> = (0..repeat).flat_map(|_| pools.iter().cloned()).collect();
            product(interp, &pools)?
        }
        (_, "accumulate") => {
            let func = args.take(1, "func").filter(|f| !matches!(f, Value::None));
            let initial = args.take_keyword("initial");
            args.positional.truncate(1);
            args.check(name, 1, 1)?;
            let max_len = interp.state.limits().max_sequence_length;
            let mut out = Vec::new();
            let mut acc = initial.filter(|v| !matches!(v, Value::None));
            if let Some(first) = &acc {
                out.push(first.clone());
            }
            for item in interp.iterate(&args.positional[0])? {
                let next = match acc.take() {
                    None => item,
                    Some(prev) => match &func {
                        Some(f) => interp.call_value(f, Args::new(vec![prev, item]))?,
                        None => ops::binary(BinOp::Add, &prev, &item, max_len)?,
                    },
                };
                out.push(next.clone());
                acc = Some(next);
            }
            out
        }
        (_, "islice") => {
            args.check(name, 2, 4)?;
            let (start, stop, step) = match args.len() {
                2 => (None, islice_bound(args.get(1), "Stop")?, None),
                _ => (
                    islice_bound(args.get(1), "Indices")?,
                    islice_bound(args.get(2), "Stop")?,
                    islice_bound(args.get(3), "Step")?,
                ),
            };
            let step = step.unwrap_or(1);
            if step == 0 {
                return Err(SandboxError::value_error(
                    "Step for islice() must be a positive integer or None.",
                ));
            }
            let source = interp.iterate(&args.positional[0])?;
            let stop = stop.unwrap_or(source.len()).min(source.len());
            let start = start.unwrap_or(0);
            if start >= stop {
                Vec::new()
            } else {
                source[start..stop].iter().step_by(step).cloned().collect()
            }
        }
        (_, "zip_longest") => {
            let fill = args.take_keyword("fillvalue").unwrap_or(Value::None);
            args.check(name, 0, usize::MAX)?;
            let mut columns = Vec::with_capacity(args.len());
            for iterable in &args.positional {
                columns.push(interp.iterate(iterable)?);
            }
            let rows = columns.iter().map(Vec::len).max().unwrap_or(0);
            count_guard(interp, rows)?;
            (0..rows)
                .map(|row| {
                    Value::tuple(
                        columns
                            .iter()
                            .map(|col| col.get(row).cloned().unwrap_or_else(|| fill.clone()))
                            .collect(),
                    )
                })
                .collect()
        }
        (_, "groupby") => {
            let key = args.take(1, "key").filter(|k| !matches!(k, Value::None));
            args.positional.truncate(1);
            args.check(name, 1, 1)?;
            let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
            for item in interp.iterate(&args.positional[0])? {
                let k = match &key {
                    Some(f) => interp.call_value(f, Args::new(vec![item.clone()]))?,
                    None => item.clone(),
                };
                match groups.last_mut() {
                    Some((last, members)) if values_equal(last, &k) => members.push(item),
                    _ => groups.push((k, vec![item])),
                }
            }
            groups
                .into_iter()
                .map(|(k, members)| Value::tuple(vec![k, Value::iterator(members)]))
                .collect()
        }
        _ => {
            return Err(SandboxError::runtime(
                ExceptionKind::AttributeError,
                format!("module 'itertools' has no attribute '{}'", name),
            ))
        }
    };
    Ok(Value::iterator(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn walk_combinations(n: usize, r: usize, with_replacement: bool) -> Vec<Vec<usize>> {
        let mut idx: Vec<usize> = if with_replacement { vec![0; r] } else { (0..r).collect() };
        let mut out = vec![idx.clone()];
        while indices::next_combination(&mut idx, n, with_replacement) {
            out.push(idx.clone());
        }
        out
    }

    #[test]
    fn test_combination_order() {
        assert_eq!(
            walk_combinations(4, 2, false),
            vec![vec![0, 1], vec![0, 2], vec![0, 3], vec![1, 2], vec![1, 3], vec![2, 3]]
        );
        assert_eq!(
            walk_combinations(2, 2, true),
            vec![vec![0, 0], vec![0, 1], vec![1, 1]]
        );
    }

    #[test]
    fn test_next_product_odometer() {
        let mut idx = vec![0, 0];
        let mut count = 1;
        while indices::next_product(&mut idx, &[2, 3]) {
            count += 1;
        }
        assert_eq!(count, 6);
    }
}
