//! Policy registry
//!
//! The fixed table of identifiers a script may see, modules it may import and
//! qualified calls that are refused no matter how they are reached. A
//! `PolicySet` is built once and shared read-only between executions.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::engine::builtins::Builtin;
use crate::error::{ExceptionKind, SandboxError};

/// Builtin functions visible to scripts by default.
pub const DEFAULT_ALLOWED_NAMES: &[&str] = &[
    "print", "isinstance", "range", "float", "int", "bool", "str", "set", "list", "dict",
    "tuple", "round", "ceil", "floor", "log", "exp", "sin", "cos", "tan", "asin", "acos",
    "atan", "atan2", "degrees", "radians", "pow", "sqrt", "len", "sum", "max", "min", "abs",
    "enumerate", "zip", "reversed", "sorted", "all", "any", "map", "filter", "ord", "chr",
    "next", "iter", "divmod", "callable", "getattr", "hasattr", "issubclass", "type",
];

/// Exception classes visible to scripts by default.
pub const DEFAULT_EXCEPTION_NAMES: &[&str] = &[
    "Exception",
    "ValueError",
    "TypeError",
    "KeyError",
    "IndexError",
    "ZeroDivisionError",
    "ArithmeticError",
    "LookupError",
    "RuntimeError",
    "AttributeError",
    "NameError",
    "StopIteration",
    "OverflowError",
    "AssertionError",
];

pub const DEFAULT_ALLOWED_MODULES: &[&str] = &[
    "collections",
    "datetime",
    "itertools",
    "math",
    "queue",
    "random",
    "re",
    "stat",
    "statistics",
    "time",
    "unicodedata",
];

pub const PLOTTING_NAMES: &[&str] = &["send_image_to_client"];
pub const PLOTTING_MODULES: &[&str] = &["matplotlib"];

pub const DEFAULT_DENIED: &[&str] = &[
    "builtins.compile",
    "builtins.eval",
    "builtins.exec",
    "builtins.globals",
    "builtins.locals",
    "builtins.__import__",
    "builtins.open",
    "builtins.vars",
    "builtins.breakpoint",
    "builtins.input",
    "os.popen",
    "os.system",
    "os.execv",
    "os.fork",
    "os.kill",
    "posix.system",
    "subprocess.run",
    "subprocess.Popen",
    "subprocess.call",
    "subprocess.check_output",
];

// ============================================================================
// Qualified names
// ============================================================================

/// A dotted name split into its module and attribute path, e.g. `os` +
/// `[system]`. Compared structurally, displayed dotted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    module: String,
    path: Vec<String>,
}

impl QualifiedName {
    pub fn new(module: impl Into<String>, path: Vec<String>) -> Self {
        Self {
            module: module.into(),
            path,
        }
    }

    /// `builtins.<name>`
    pub fn builtin(name: &str) -> Self {
        Self::new("builtins", vec![name.to_string()])
    }

    pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> Option<Self> {
        let (first, rest) = segments.split_first()?;
        Some(Self::new(
            first.as_ref(),
            rest.iter().map(|s| s.as_ref().to_string()).collect(),
        ))
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn is_builtin(&self) -> bool {
        self.module == "builtins"
    }

    /// Extend by one attribute segment.
    pub fn child(&self, segment: &str) -> Self {
        let mut path = self.path.clone();
        path.push(segment.to_string());
        Self::new(self.module.clone(), path)
    }

    /// Name as the script sees it: builtins drop their module.
    pub fn display_name(&self) -> String {
        if self.is_builtin() && self.path.len() == 1 {
            self.path[0].clone()
        } else {
            self.to_string()
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.module)?;
        for segment in &self.path {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for QualifiedName {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = s.split('.').collect();
        if segments.iter().any(|seg| seg.is_empty()) {
            return Err(SandboxError::policy(format!("invalid qualified name '{}'", s)));
        }
        Self::from_segments(&segments)
            .ok_or_else(|| SandboxError::policy(format!("invalid qualified name '{}'", s)))
    }
}

// ============================================================================
// Policy set
// ============================================================================

/// What a permitted identifier resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Builtin(Builtin),
    Exception(ExceptionKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySet {
    allowed_names: HashSet<String>,
    allowed_modules: HashSet<String>,
    denied: HashSet<QualifiedName>,
}

impl PolicySet {
    /// The standard policy with plotting enabled.
    pub fn standard() -> Self {
        Self::standard_with_plotting(true)
    }

    pub fn standard_with_plotting(plotting: bool) -> Self {
        let mut builder = Self::builder()
            .allow_names(DEFAULT_ALLOWED_NAMES.iter().copied())
            .allow_names(DEFAULT_EXCEPTION_NAMES.iter().copied())
            .allow_modules(DEFAULT_ALLOWED_MODULES.iter().copied());
        if plotting {
            builder = builder
                .allow_names(PLOTTING_NAMES.iter().copied())
                .allow_modules(PLOTTING_MODULES.iter().copied());
        }
        for denied in DEFAULT_DENIED {
            if let Ok(name) = denied.parse() {
                builder = builder.deny_qualified(name);
            }
        }
        builder.build()
    }

    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    /// Resolve a free identifier to the builtin it names, if the policy
    /// permits it and the interpreter provides it.
    pub fn resolve(&self, identifier: &str) -> Option<Binding> {
        if !self.allowed_names.contains(identifier)
            || self.is_denied(&QualifiedName::builtin(identifier))
        {
            return None;
        }
        if let Some(builtin) = Builtin::from_name(identifier) {
            return Some(Binding::Builtin(builtin));
        }
        ExceptionKind::from_name(identifier).map(Binding::Exception)
    }

    pub fn is_name_allowed(&self, identifier: &str) -> bool {
        self.resolve(identifier).is_some()
    }

    pub fn is_denied(&self, name: &QualifiedName) -> bool {
        self.denied.contains(name)
    }

    /// A dotted module is allowed when it or one of its parent packages is.
    pub fn is_module_allowed(&self, module: &str) -> bool {
        let mut prefix = String::with_capacity(module.len());
        for (i, segment) in module.split('.').enumerate() {
            if i > 0 {
                prefix.push('.');
            }
            prefix.push_str(segment);
            if self.allowed_modules.contains(&prefix) {
                return true;
            }
        }
        false
    }

    pub fn allowed_names(&self) -> BTreeSet<&str> {
        self.allowed_names.iter().map(String::as_str).collect()
    }

    pub fn allowed_modules(&self) -> BTreeSet<&str> {
        self.allowed_modules.iter().map(String::as_str).collect()
    }

    pub fn denied_names(&self) -> BTreeSet<&QualifiedName> {
        self.denied.iter().collect()
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        Self::standard()
    }
}

/// Builder for custom policies
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    allowed_names: HashSet<String>,
    allowed_modules: HashSet<String>,
    denied: HashSet<QualifiedName>,
}

impl PolicyBuilder {
    pub fn allow_name(mut self, name: impl Into<String>) -> Self {
        self.allowed_names.insert(name.into());
        self
    }

    pub fn allow_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_names.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn allow_module(mut self, module: impl Into<String>) -> Self {
        self.allowed_modules.insert(module.into());
        self
    }

    pub fn allow_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_modules.extend(modules.into_iter().map(Into::into));
        self
    }

    pub fn deny_qualified(mut self, name: QualifiedName) -> Self {
        self.denied.insert(name);
        self
    }

    /// Deny a dotted name such as `os.system`.
    pub fn deny(self, dotted: &str) -> Result<Self, SandboxError> {
        let name = dotted.parse()?;
        Ok(self.deny_qualified(name))
    }

    pub fn build(self) -> PolicySet {
        PolicySet {
            allowed_names: self.allowed_names,
            allowed_modules: self.allowed_modules,
            denied: self.denied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name_parse_and_display() {
        let name: QualifiedName = "os.path.join".parse().unwrap();
        assert_eq!(name.module(), "os");
        assert_eq!(name.path(), &["path".to_string(), "join".to_string()]);
        assert_eq!(name.to_string(), "os.path.join");
        assert!("os..system".parse::<QualifiedName>().is_err());
    }

    #[test]
    fn test_builtin_display_name() {
        assert_eq!(QualifiedName::builtin("eval").display_name(), "eval");
        assert_eq!(QualifiedName::builtin("eval").to_string(), "builtins.eval");
    }

    #[test]
    fn test_resolve_allowed_builtin() {
        let policy = PolicySet::standard();
        assert_eq!(policy.resolve("print"), Some(Binding::Builtin(Builtin::Print)));
        assert_eq!(
            policy.resolve("ValueError"),
            Some(Binding::Exception(ExceptionKind::ValueError))
        );
    }

    #[test]
    fn test_resolve_rejects_unlisted_and_denied() {
        let policy = PolicySet::standard();
        assert_eq!(policy.resolve("open"), None);
        assert_eq!(policy.resolve("eval"), None);
        assert_eq!(policy.resolve("not_a_builtin"), None);
    }

    #[test]
    fn test_denied_wins_over_allowed() {
        let policy = PolicySet::builder()
            .allow_name("print")
            .deny("builtins.print")
            .unwrap()
            .build();
        assert_eq!(policy.resolve("print"), None);
    }

    #[test]
    fn test_is_denied_is_structural() {
        let policy = PolicySet::standard();
        assert!(policy.is_denied(&"os.system".parse().unwrap()));
        assert!(policy.is_denied(&QualifiedName::new("os", vec!["system".to_string()])));
        assert!(!policy.is_denied(&"os.systems".parse().unwrap()));
    }

    #[test]
    fn test_module_prefixes() {
        let policy = PolicySet::standard();
        assert!(policy.is_module_allowed("math"));
        assert!(policy.is_module_allowed("matplotlib.pyplot"));
        assert!(!policy.is_module_allowed("os"));
        assert!(!policy.is_module_allowed("mathx"));
        assert!(!policy.is_module_allowed("numpy"));
    }

    #[test]
    fn test_plotting_toggle() {
        let policy = PolicySet::standard_with_plotting(false);
        assert!(!policy.is_module_allowed("matplotlib"));
        assert_eq!(policy.resolve("send_image_to_client"), None);
    }
}
