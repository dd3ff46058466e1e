//! Native modules
//!
//! Rust implementations of the modules a script may import. A module is a
//! static name; its members are constants or [`NativeFunction`] handles
//! dispatched by [`call`].

pub mod collections;
pub mod datetime;
pub mod itertools;
pub mod math;
pub mod pyplot;
pub mod random;
pub mod re;
pub mod statistics;
pub mod time;

use crate::engine::args::Args;
use crate::engine::interpreter::Interpreter;
use crate::engine::value::{NativeFunction, Value};
use crate::error::{ExceptionKind, Result, SandboxError};

/// Every module the interpreter can provide. Whether a script may import
/// one is decided by the policy.
pub const KNOWN_MODULES: &[&str] = &[
    "collections",
    "datetime",
    "itertools",
    "math",
    "matplotlib",
    "matplotlib.pyplot",
    "queue",
    "random",
    "re",
    "stat",
    "statistics",
    "time",
    "unicodedata",
];

/// Canonical static name of a known module.
pub fn lookup(module: &str) -> Option<&'static str> {
    KNOWN_MODULES.iter().copied().find(|m| *m == module)
}

/// Public members of a module, as bound by `from module import *`.
pub fn exported_names(module: &str) -> Option<&'static [&'static str]> {
    match module {
        "collections" => Some(collections::EXPORTS),
        "datetime" => Some(datetime::EXPORTS),
        "itertools" => Some(itertools::EXPORTS),
        "math" => Some(math::EXPORTS),
        "matplotlib" => Some(&["pyplot"]),
        "matplotlib.pyplot" => Some(pyplot::EXPORTS),
        "random" => Some(random::EXPORTS),
        "re" => Some(re::EXPORTS),
        "statistics" => Some(statistics::EXPORTS),
        "time" => Some(time::EXPORTS),
        "queue" | "stat" | "unicodedata" => Some(&[]),
        _ => None,
    }
}

/// Attribute `name` of `module`: a submodule, a constant or a function.
pub fn get_attr(module: &'static str, name: &str) -> Option<Value> {
    if module == "matplotlib" && name == "pyplot" {
        return Some(Value::Module("matplotlib.pyplot"));
    }
    let constant = match module {
        "math" => math::constant(name),
        "re" => re::constant(name),
        _ => None,
    };
    if constant.is_some() {
        return constant;
    }
    let name = exported_names(module)?.iter().copied().find(|n| *n == name)?;
    Some(Value::Native(NativeFunction { module, name }))
}

/// Attributes of native callables that act as classes, e.g.
/// `datetime.datetime.now`.
pub fn native_attr(native: &NativeFunction, name: &str) -> Option<Value> {
    let (module, members): (&'static str, &[&'static str]) = match (native.module, native.name) {
        ("datetime", "datetime") => ("datetime.datetime", datetime::DATETIME_CLASS_METHODS),
        ("datetime", "date") => ("datetime.date", datetime::DATE_CLASS_METHODS),
        ("itertools", "chain") => ("itertools.chain", &["from_iterable"]),
        _ => return None,
    };
    let name = members.iter().copied().find(|n| *n == name)?;
    Some(Value::Native(NativeFunction { module, name }))
}

/// Invoke a native function.
pub fn call(interp: &mut Interpreter<'_>, native: NativeFunction, args: Args) -> Result<Value> {
    match native.module {
        "collections" => collections::call(interp, native.name, args),
        "datetime" | "datetime.datetime" | "datetime.date" => datetime::call(interp, native, args),
        "itertools" | "itertools.chain" => itertools::call(interp, native, args),
        "math" => math::call(interp, native.name, args),
        "matplotlib.pyplot" => pyplot::call(interp, native.name, args),
        "random" => random::call(interp, native.name, args),
        "re" => re::call(interp, native.name, args),
        "statistics" => statistics::call(interp, native.name, args),
        "time" => time::call(interp, native.name, args),
        _ => Err(SandboxError::runtime(
            ExceptionKind::AttributeError,
            format!("module '{}' has no attribute '{}'", native.module, native.name),
        )),
    }
}

/// Numbers out of an iterable argument.
pub(crate) fn numbers(interp: &mut Interpreter<'_>, value: &Value, func: &str) -> Result<Vec<f64>> {
    interp
        .iterate(value)?
        .iter()
        .map(|v| {
            v.as_float().ok_or_else(|| {
                SandboxError::type_error(format!(
                    "{}() expects numbers, not '{}'",
                    func,
                    v.type_name()
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_known_module_has_an_export_table() {
        for module in KNOWN_MODULES {
            assert!(exported_names(module).is_some(), "{}", module);
        }
        assert!(exported_names("os").is_none());
    }

    #[test]
    fn test_get_attr_resolves_members() {
        assert!(matches!(get_attr("math", "pi"), Some(Value::Float(_))));
        assert!(matches!(
            get_attr("math", "sqrt"),
            Some(Value::Native(NativeFunction { module: "math", name: "sqrt" }))
        ));
        assert!(matches!(
            get_attr("matplotlib", "pyplot"),
            Some(Value::Module("matplotlib.pyplot"))
        ));
        assert!(get_attr("math", "system").is_none());
        assert!(get_attr("queue", "Queue").is_none());
    }

    #[test]
    fn test_native_attr_for_class_methods() {
        let class = NativeFunction {
            module: "datetime",
            name: "datetime",
        };
        assert!(matches!(
            native_attr(&class, "now"),
            Some(Value::Native(NativeFunction {
                module: "datetime.datetime",
                name: "now"
            }))
        ));
        assert!(native_attr(&class, "fromtimestamp_bogus").is_none());
    }
}
