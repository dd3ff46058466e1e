//! `time`
//!
//! `sleep` validates its argument and returns at once; scripts are bounded by
//! operations, not by wall time.

use chrono::Utc;

use crate::engine::args::Args;
use crate::engine::interpreter::Interpreter;
use crate::engine::value::Value;
use crate::error::{ExceptionKind, Result, SandboxError};

pub const EXPORTS: &[&str] = &["time", "perf_counter", "monotonic", "sleep"];

pub fn call(interp: &mut Interpreter<'_>, name: &str, args: Args) -> Result<Value> {
    match name {
        "time" => {
            args.check(name, 0, 0)?;
            let now = Utc::now();
            let seconds = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6;
            Ok(Value::Float(seconds))
        }
        "perf_counter" | "monotonic" => {
            args.check(name, 0, 0)?;
            Ok(Value::Float(interp.state.elapsed()))
        }
        "sleep" => {
            args.check(name, 1, 1)?;
            let secs = args.float(0, name)?;
            if secs < 0.0 || secs.is_nan() {
                return Err(SandboxError::value_error("sleep length must be non-negative"));
            }
            Ok(Value::None)
        }
        _ => Err(SandboxError::runtime(
            ExceptionKind::AttributeError,
            format!("module 'time' has no attribute '{}'", name),
        )),
    }
}
