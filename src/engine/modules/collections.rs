//! `collections`
//!
//! `Counter` is a dict flagged as a counter (missing keys read as zero and
//! the counting methods become available). `OrderedDict` is a plain dict,
//! which already keeps insertion order. `deque` is list-backed.

use crate::engine::args::Args;
use crate::engine::builtins::dict_from;
use crate::engine::interpreter::Interpreter;
use crate::engine::methods;
use crate::engine::value::{DictValue, Value};
use crate::error::{ExceptionKind, Result, SandboxError};

pub const EXPORTS: &[&str] = &["Counter", "OrderedDict", "deque"];

pub fn call(interp: &mut Interpreter<'_>, name: &str, mut args: Args) -> Result<Value> {
    match name {
        "Counter" => {
            let counter = Value::dict(DictValue::counter());
            if args.len() > 1 {
                return Err(SandboxError::type_error(format!(
                    "Counter() takes at most 1 positional argument ({} given)",
                    args.len()
                )));
            }
            methods::call_method(interp, &counter, "update", args)?;
            Ok(counter)
        }
        "OrderedDict" => {
            let keywords = std::mem::take(&mut args.keywords);
            args.check(name, 0, 1)?;
            let mut dict = match args.get(0) {
                Some(source) => dict_from(interp, source)?,
                None => DictValue::new(),
            };
            for (key, value) in keywords {
                dict.insert(Value::from(key), value)?;
            }
            Ok(Value::dict(dict))
        }
        "deque" => {
            let maxlen = args.take(1, "maxlen");
            args.positional.truncate(1);
            args.check(name, 0, 1)?;
            if !matches!(maxlen, None | Some(Value::None)) {
                return Err(SandboxError::runtime(
                    ExceptionKind::NotImplementedError,
                    "deque(maxlen=...) is not supported",
                ));
            }
            let items = match args.get(0) {
                Some(iterable) => interp.iterate(iterable)?,
                None => Vec::new(),
            };
            Ok(Value::list(items))
        }
        _ => Err(SandboxError::runtime(
            ExceptionKind::AttributeError,
            format!("module 'collections' has no attribute '{}'", name),
        )),
    }
}
