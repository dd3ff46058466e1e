//! Static guard
//!
//! Walks a parsed script before anything runs and collects every reference
//! that would escape the policy: unknown names, disallowed modules, denied
//! qualified names (direct, aliased or through attribute chains),
//! introspection attributes and over-deep structures. The most severe
//! violation is the one reported.

use std::collections::HashMap;
use std::fmt;

use crate::config::Limits;
use crate::engine::modules::exported_names;
use crate::error::{Result, SandboxError};
use crate::parser::ast::*;
use crate::security::policy::{PolicySet, QualifiedName};

/// Attribute names that expose frames, code objects or class internals.
pub const INTROSPECTION_ATTRIBUTES: &[&str] = &[
    "f_globals",
    "f_locals",
    "f_back",
    "f_builtins",
    "f_code",
    "gi_frame",
    "gi_code",
    "cr_frame",
    "cr_code",
    "tb_frame",
    "tb_next",
    "func_globals",
    "func_code",
    "mro",
];

/// Whether an attribute (or bare name) may never be touched by a script.
pub fn is_restricted_attribute(name: &str) -> bool {
    name.starts_with("__") || INTROSPECTION_ATTRIBUTES.contains(&name)
}

/// Violation categories, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ViolationKind {
    UnknownName,
    Module,
    DepthExceeded,
    Introspection,
    DeniedName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
    pub line: usize,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}

/// Check a program, failing with the most severe violation found.
pub fn check_program(program: &Program, policy: &PolicySet, limits: &Limits) -> Result<()> {
    let violations = collect_violations(program, policy, limits);
    match most_severe(&violations) {
        Some(violation) => Err(SandboxError::Policy(violation.message.clone())),
        None => Ok(()),
    }
}

/// Every violation in the program, in discovery order.
pub fn collect_violations(program: &Program, policy: &PolicySet, limits: &Limits) -> Vec<Violation> {
    let mut guard = Guard::new(policy, limits);
    let mut globals = ScopeBindings::default();
    collect_bindings(&program.body, &mut globals);
    guard.scopes.push(globals);
    guard.statements(&program.body);
    guard.violations
}

/// Highest severity wins; ties go to the earliest.
pub fn most_severe(violations: &[Violation]) -> Option<&Violation> {
    violations
        .iter()
        .enumerate()
        .max_by(|(ia, a), (ib, b)| a.kind.cmp(&b.kind).then(ib.cmp(ia)))
        .map(|(_, v)| v)
}

// ============================================================================
// Scope bindings
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    Local,
    /// `import a.b as x` binds `x` to the module `a.b`
    Module(Vec<String>),
    /// `from a import b as x` binds `x` to `a.b`
    Member(Vec<String>),
}

#[derive(Debug, Default)]
struct ScopeBindings {
    names: HashMap<String, Origin>,
}

impl ScopeBindings {
    fn bind(&mut self, name: &str, origin: Origin) {
        match self.names.get(name) {
            Some(Origin::Module(_)) | Some(Origin::Member(_)) if origin == Origin::Local => {}
            _ => {
                self.names.insert(name.to_string(), origin);
            }
        }
    }

    fn bind_target(&mut self, target: &Target) {
        match target {
            Target::Name(name) => self.bind(name, Origin::Local),
            Target::Tuple(items) => items.iter().for_each(|t| self.bind_target(t)),
            Target::Starred(inner) => self.bind_target(inner),
            Target::Attribute { .. } | Target::Subscript { .. } => {}
        }
    }
}

/// Names a block binds, without descending into nested function bodies.
fn collect_bindings(stmts: &[Stmt], scope: &mut ScopeBindings) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Assign { targets, .. } => targets.iter().for_each(|t| scope.bind_target(t)),
            StmtKind::AugAssign { target, .. } | StmtKind::AnnAssign { target, .. } => {
                scope.bind_target(target)
            }
            StmtKind::For {
                target,
                body,
                orelse,
                ..
            } => {
                scope.bind_target(target);
                collect_bindings(body, scope);
                collect_bindings(orelse, scope);
            }
            StmtKind::While { body, orelse, .. } => {
                collect_bindings(body, scope);
                collect_bindings(orelse, scope);
            }
            StmtKind::If { branches, orelse } => {
                for (_, body) in branches {
                    collect_bindings(body, scope);
                }
                collect_bindings(orelse, scope);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                collect_bindings(body, scope);
                for handler in handlers {
                    if let Some(name) = &handler.name {
                        scope.bind(name, Origin::Local);
                    }
                    collect_bindings(&handler.body, scope);
                }
                collect_bindings(orelse, scope);
                collect_bindings(finalbody, scope);
            }
            StmtKind::FunctionDef(def) => scope.bind(&def.name, Origin::Local),
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let segments: Vec<String> = match &alias.alias {
                        Some(_) => alias.module.split('.').map(str::to_string).collect(),
                        None => vec![alias.bound_name().to_string()],
                    };
                    scope.bind(alias.bound_name(), Origin::Module(segments));
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let base: Vec<String> = module.split('.').map(str::to_string).collect();
                let member = |name: &str| {
                    let mut path = base.clone();
                    path.push(name.to_string());
                    Origin::Member(path)
                };
                match names {
                    ImportNames::Names(items) => {
                        for (name, alias) in items {
                            let name = name.as_str();
                            scope.bind(alias.as_deref().unwrap_or(name), member(name));
                        }
                    }
                    ImportNames::Star => {
                        for &name in exported_names(module).unwrap_or(&[]) {
                            scope.bind(name, member(name));
                        }
                    }
                }
            }
            StmtKind::Expr(_)
            | StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Return(_)
            | StmtKind::Raise(_)
            | StmtKind::Del(_)
            | StmtKind::Assert { .. } => {}
        }
    }
}

// ============================================================================
// Walker
// ============================================================================

struct Guard<'a> {
    policy: &'a PolicySet,
    limits: &'a Limits,
    scopes: Vec<ScopeBindings>,
    violations: Vec<Violation>,
    depth: usize,
    depth_reported: bool,
}

impl<'a> Guard<'a> {
    fn new(policy: &'a PolicySet, limits: &'a Limits) -> Self {
        Self {
            policy,
            limits,
            scopes: Vec::new(),
            violations: Vec::new(),
            depth: 0,
            depth_reported: false,
        }
    }

    fn report(&mut self, kind: ViolationKind, message: String, line: usize) {
        self.violations.push(Violation {
            kind,
            message,
            line,
        });
    }

    fn lookup(&self, name: &str) -> Option<&Origin> {
        self.scopes.iter().rev().find_map(|scope| scope.names.get(name))
    }

    /// Enter one level of syntax nesting; false when the cap is hit.
    fn descend(&mut self, line: usize) -> bool {
        self.depth += 1;
        if self.depth > self.limits.max_nesting_depth {
            if !self.depth_reported {
                self.depth_reported = true;
                let message = format!(
                    "syntax tree nesting exceeds maximum depth of {}",
                    self.limits.max_nesting_depth
                );
                self.report(ViolationKind::DepthExceeded, message, line);
            }
            self.depth -= 1;
            return false;
        }
        true
    }

    fn ascend(&mut self) {
        self.depth -= 1;
    }

    fn statements(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.statement(stmt);
        }
    }

    fn statement(&mut self, stmt: &Stmt) {
        let line = stmt.line;
        if !self.descend(line) {
            return;
        }
        match &stmt.kind {
            StmtKind::Expr(expr) => self.expr(expr, line),
            StmtKind::Assign { targets, value } => {
                self.expr(value, line);
                for target in targets {
                    self.target(target, line);
                }
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.target(target, line);
                self.expr(value, line);
            }
            StmtKind::AnnAssign {
                target,
                annotation,
                value,
            } => {
                self.target(target, line);
                self.expr(annotation, line);
                if let Some(value) = value {
                    self.expr(value, line);
                }
            }
            StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
            StmtKind::Return(value) | StmtKind::Raise(value) => {
                if let Some(value) = value {
                    self.expr(value, line);
                }
            }
            StmtKind::Del(targets) => {
                for target in targets {
                    self.target(target, line);
                }
            }
            StmtKind::Assert { test, message } => {
                self.expr(test, line);
                if let Some(message) = message {
                    self.expr(message, line);
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    self.import_module(&alias.module, line);
                    if let Some(name) = &alias.alias {
                        self.binding_name(name, line);
                    }
                }
            }
            StmtKind::ImportFrom { module, names } => self.import_from(module, names, line),
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    self.expr(test, line);
                    self.statements(body);
                }
                self.statements(orelse);
            }
            StmtKind::While {
                test, body, orelse, ..
            } => {
                self.expr(test, line);
                self.statements(body);
                self.statements(orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
                ..
            } => {
                self.expr(iter, line);
                self.target(target, line);
                self.statements(body);
                self.statements(orelse);
            }
            StmtKind::FunctionDef(def) => {
                self.binding_name(&def.name, line);
                self.function(def);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.statements(body);
                for handler in handlers {
                    if let Some(kind) = &handler.kind {
                        self.expr(kind, handler.line);
                    }
                    if let Some(name) = &handler.name {
                        self.binding_name(name, handler.line);
                    }
                    self.statements(&handler.body);
                }
                self.statements(orelse);
                self.statements(finalbody);
            }
        }
        self.ascend();
    }

    fn import_module(&mut self, module: &str, line: usize) {
        if !self.policy.is_module_allowed(module) {
            self.report(
                ViolationKind::Module,
                format!("import of module '{}' is not permitted", module),
                line,
            );
        }
        if let Ok(name) = module.parse::<QualifiedName>() {
            self.check_denied(&name, line);
        }
    }

    fn import_from(&mut self, module: &str, names: &ImportNames, line: usize) {
        self.import_module(module, line);
        let Ok(base) = module.parse::<QualifiedName>() else {
            return;
        };
        match names {
            ImportNames::Star => {
                if exported_names(module).is_none() && self.policy.is_module_allowed(module) {
                    self.report(
                        ViolationKind::Module,
                        format!("wildcard import from module '{}' is not permitted", module),
                        line,
                    );
                }
            }
            ImportNames::Names(items) => {
                for (name, alias) in items {
                    if is_restricted_attribute(name) {
                        self.report(
                            ViolationKind::Introspection,
                            format!("name '{}' is not permitted", name),
                            line,
                        );
                    }
                    self.check_denied(&base.child(name), line);
                    if let Some(alias) = alias {
                        self.binding_name(alias, line);
                    }
                }
            }
        }
    }

    fn function(&mut self, def: &FunctionDef) {
        let line = def.line;
        let mut scope = ScopeBindings::default();
        for param in &def.params {
            self.binding_name(&param.name, line);
            if let Some(default) = &param.default {
                self.expr(default, line);
            }
            if let Some(annotation) = &param.annotation {
                self.expr(annotation, line);
            }
            scope.bind(&param.name, Origin::Local);
        }
        if let Some(returns) = &def.returns {
            self.expr(returns, line);
        }
        collect_bindings(&def.body, &mut scope);
        self.scopes.push(scope);
        self.statements(&def.body);
        self.scopes.pop();
    }

    /// A name being bound (parameter, alias, def name, except target).
    fn binding_name(&mut self, name: &str, line: usize) {
        if is_restricted_attribute(name) {
            self.report(
                ViolationKind::Introspection,
                format!("name '{}' is not permitted", name),
                line,
            );
        }
    }

    fn target(&mut self, target: &Target, line: usize) {
        match target {
            Target::Name(name) => self.binding_name(name, line),
            Target::Attribute { value, attr } => {
                self.attribute_name(attr, line);
                self.expr(value, line);
            }
            Target::Subscript { value, index } => {
                self.expr(value, line);
                self.expr(index, line);
            }
            Target::Tuple(items) => {
                for item in items {
                    self.target(item, line);
                }
            }
            Target::Starred(inner) => self.target(inner, line),
        }
    }

    fn attribute_name(&mut self, attr: &str, line: usize) {
        if is_restricted_attribute(attr) {
            self.report(
                ViolationKind::Introspection,
                format!("attribute '{}' is not permitted", attr),
                line,
            );
        }
    }

    fn check_denied(&mut self, name: &QualifiedName, line: usize) -> bool {
        if self.policy.is_denied(name) {
            self.report(
                ViolationKind::DeniedName,
                format!("{} is not permitted", name),
                line,
            );
            return true;
        }
        false
    }

    /// Canonical call-target identity of a name or attribute chain, following
    /// import aliases. `None` for script-local values.
    fn resolve_qualified(&self, expr: &Expr) -> Option<QualifiedName> {
        match expr {
            Expr::Name(name) => match self.lookup(name) {
                Some(Origin::Local) => None,
                Some(Origin::Module(segments)) | Some(Origin::Member(segments)) => {
                    QualifiedName::from_segments(segments)
                }
                None => Some(QualifiedName::builtin(name)),
            },
            Expr::Attribute { value, attr } => {
                self.resolve_qualified(value).map(|q| q.child(attr))
            }
            _ => None,
        }
    }

    fn name(&mut self, name: &str, line: usize) {
        if is_restricted_attribute(name) {
            self.report(
                ViolationKind::Introspection,
                format!("name '{}' is not permitted", name),
                line,
            );
            return;
        }
        match self.lookup(name).cloned() {
            Some(Origin::Local) => {}
            Some(Origin::Module(segments)) | Some(Origin::Member(segments)) => {
                if let Some(q) = QualifiedName::from_segments(&segments) {
                    self.check_denied(&q, line);
                }
            }
            None => {
                if self.check_denied(&QualifiedName::builtin(name), line) {
                    return;
                }
                if !self.policy.is_name_allowed(name) {
                    self.report(
                        ViolationKind::UnknownName,
                        format!("name '{}' is not permitted", name),
                        line,
                    );
                }
            }
        }
    }

    fn attribute(&mut self, expr: &Expr, line: usize) {
        let mut attrs = Vec::new();
        let mut root = expr;
        while let Expr::Attribute { value, attr } = root {
            attrs.push(attr.as_str());
            root = value;
        }
        attrs.reverse();

        if attrs.len() > self.limits.max_attribute_depth {
            self.report(
                ViolationKind::DepthExceeded,
                format!(
                    "attribute chain exceeds maximum depth of {}",
                    self.limits.max_attribute_depth
                ),
                line,
            );
        }
        for attr in &attrs {
            self.attribute_name(attr, line);
        }

        if let Some(q) = self.resolve_qualified(expr) {
            self.check_chain(&q, line);
        } else if let Some(q) = QualifiedName::from_segments(&attrs) {
            // Rooted at a computed value: the attribute path alone may still
            // spell a denied name.
            self.check_chain(&q, line);
        }

        self.expr(root, line);
    }

    /// Check a qualified chain and every suffix of it, so `x.os.system`
    /// is caught as well as `os.system`.
    fn check_chain(&mut self, name: &QualifiedName, line: usize) {
        let mut segments: Vec<&str> = vec![name.module()];
        segments.extend(name.path().iter().map(String::as_str));
        for start in 0..segments.len() {
            for end in (start + 1)..=segments.len() {
                if let Some(candidate) = QualifiedName::from_segments(&segments[start..end]) {
                    if candidate.path().is_empty() {
                        continue;
                    }
                    if self.check_denied(&candidate, line) {
                        return;
                    }
                }
            }
        }
    }

    fn call(&mut self, func: &Expr, args: &[Argument], line: usize) {
        self.expr(func, line);

        if let Expr::Name(name) = func {
            if (name == "getattr" || name == "hasattr") && self.lookup(name).is_none() {
                self.literal_getattr(args, line);
            }
        }

        for arg in args {
            match arg {
                Argument::Positional(value)
                | Argument::Star(value)
                | Argument::DoubleStar(value)
                | Argument::Keyword(_, value) => self.expr(value, line),
            }
        }
    }

    /// `getattr(obj, "name")` with a literal name is checked like `obj.name`.
    fn literal_getattr(&mut self, args: &[Argument], line: usize) {
        let (Some(Argument::Positional(object)), Some(Argument::Positional(name))) =
            (args.first(), args.get(1))
        else {
            return;
        };
        let Expr::Constant(Constant::Str(attr)) = name else {
            return;
        };
        self.attribute_name(attr, line);
        if let Some(q) = self.resolve_qualified(object) {
            self.check_chain(&q.child(attr), line);
        }
    }

    fn comprehension(&mut self, generators: &[Comprehension], elements: &[&Expr], line: usize) {
        let mut scope = ScopeBindings::default();
        for generator in generators {
            scope.bind_target(&generator.target);
        }
        self.scopes.push(scope);
        for generator in generators {
            self.expr(&generator.iter, line);
            self.target(&generator.target, line);
            for condition in &generator.ifs {
                self.expr(condition, line);
            }
        }
        for element in elements {
            self.expr(element, line);
        }
        self.scopes.pop();
    }

    fn fstring_parts(&mut self, parts: &[FStringPart], line: usize) {
        for part in parts {
            if let FStringPart::Field { expr, spec, .. } = part {
                self.expr(expr, line);
                self.fstring_parts(spec, line);
            }
        }
    }

    fn expr(&mut self, expr: &Expr, line: usize) {
        if !self.descend(line) {
            return;
        }
        match expr {
            Expr::Constant(_) => {}
            Expr::FString(parts) => self.fstring_parts(parts, line),
            Expr::Name(name) => self.name(name, line),
            Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
                for item in items {
                    self.expr(item, line);
                }
            }
            Expr::Dict(items) => {
                for item in items {
                    match item {
                        DictItem::Pair(key, value) => {
                            self.expr(key, line);
                            self.expr(value, line);
                        }
                        DictItem::Unpack(value) => self.expr(value, line),
                    }
                }
            }
            Expr::Starred(inner) => self.expr(inner, line),
            Expr::Attribute { .. } => self.attribute(expr, line),
            Expr::Subscript { value, index } => {
                self.expr(value, line);
                self.expr(index, line);
            }
            Expr::Slice { lower, upper, step } => {
                for part in [lower, upper, step].into_iter().flatten() {
                    self.expr(part, line);
                }
            }
            Expr::Call { func, args } => self.call(func, args, line),
            Expr::Unary { operand, .. } => self.expr(operand, line),
            Expr::Binary { left, right, .. } => {
                self.expr(left, line);
                self.expr(right, line);
            }
            Expr::BoolOp { values, .. } => {
                for value in values {
                    self.expr(value, line);
                }
            }
            Expr::Compare { left, ops } => {
                self.expr(left, line);
                for (_, right) in ops {
                    self.expr(right, line);
                }
            }
            Expr::IfExp { test, body, orelse } => {
                self.expr(test, line);
                self.expr(body, line);
                self.expr(orelse, line);
            }
            Expr::Lambda(def) => self.function(def),
            Expr::ListComp {
                element,
                generators,
            }
            | Expr::SetComp {
                element,
                generators,
            }
            | Expr::GeneratorExp {
                element,
                generators,
            } => self.comprehension(generators, &[element.as_ref()], line),
            Expr::DictComp {
                key,
                value,
                generators,
            } => self.comprehension(generators, &[key.as_ref(), value.as_ref()], line),
        }
        self.ascend();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn check(source: &str) -> Result<()> {
        let program = parse_program(source).unwrap();
        check_program(&program, &PolicySet::standard(), &Limits::default())
    }

    fn rejected(source: &str) -> String {
        match check(source) {
            Err(SandboxError::Policy(message)) => message,
            other => panic!("Expected policy violation for {:?}, got {:?}", source, other),
        }
    }

    #[test]
    fn test_plain_script_passes() {
        assert!(check("x = [i * 2 for i in range(10)]\nprint(sum(x))\n").is_ok());
    }

    #[test]
    fn test_denied_module_call() {
        assert_eq!(rejected("import os; os.system('ls')"), "os.system is not permitted");
    }

    #[test]
    fn test_disallowed_import() {
        assert_eq!(
            rejected("import subprocess\n"),
            "import of module 'subprocess' is not permitted"
        );
    }

    #[test]
    fn test_aliased_module() {
        assert_eq!(rejected("import os as o\no.system('id')\n"), "os.system is not permitted");
    }

    #[test]
    fn test_aliased_member() {
        assert_eq!(
            rejected("from os import system as s\ns('id')\n"),
            "os.system is not permitted"
        );
    }

    #[test]
    fn test_denied_builtin() {
        assert_eq!(rejected("eval('1')\n"), "builtins.eval is not permitted");
        assert_eq!(rejected("f = exec\n"), "builtins.exec is not permitted");
    }

    #[test]
    fn test_unknown_name() {
        assert_eq!(rejected("print(secret)\n"), "name 'secret' is not permitted");
    }

    #[test]
    fn test_local_bindings_are_accepted() {
        let source = "def f(a, *rest, **kw):\n    total = a\n    for r in rest:\n        total += r\n    return total\ng = lambda q: q + 1\nprint(f(1, 2), g(3))\n";
        assert!(check(source).is_ok());
    }

    #[test]
    fn test_closure_sees_enclosing_scope() {
        let source = "def outer():\n    n = 2\n    def inner(x):\n        return x * n\n    return inner\nprint(outer()(3))\n";
        assert!(check(source).is_ok());
    }

    #[test]
    fn test_function_local_not_visible_outside() {
        let source = "def f():\n    hidden = 1\n    return hidden\nprint(hidden)\n";
        assert_eq!(rejected(source), "name 'hidden' is not permitted");
    }

    #[test]
    fn test_introspection_attributes() {
        assert_eq!(
            rejected("x = ().__class__\n"),
            "attribute '__class__' is not permitted"
        );
        assert_eq!(
            rejected("def f():\n    pass\ng = f.func_globals\n"),
            "attribute 'func_globals' is not permitted"
        );
        assert_eq!(rejected("print(__builtins__)\n"), "name '__builtins__' is not permitted");
    }

    #[test]
    fn test_literal_getattr() {
        assert_eq!(
            rejected("x = getattr(print, '__globals__')\n"),
            "attribute '__globals__' is not permitted"
        );
        assert!(check("import math\nprint(getattr(math, 'pi'))\n").is_ok());
    }

    #[test]
    fn test_attribute_chain_depth() {
        let source = "import math\nx = math.a.b.c.d.e.f.g.h.i\n";
        assert_eq!(rejected(source), "attribute chain exceeds maximum depth of 8");
    }

    #[test]
    fn test_denied_suffix_through_other_root() {
        assert_eq!(
            rejected("import random\nrandom.os.system('ls')\n"),
            "os.system is not permitted"
        );
    }

    #[test]
    fn test_severity_order() {
        // unknown name, disallowed module and denied name all present
        let source = "print(unknown)\nimport os\nos.popen('x')\n";
        assert_eq!(rejected(source), "os.popen is not permitted");
        let violations = collect_violations(
            &parse_program(source).unwrap(),
            &PolicySet::standard(),
            &Limits::default(),
        );
        assert_eq!(violations.len(), 3);
        assert_eq!(violations[0].line, 1);
    }

    #[test]
    fn test_star_import() {
        assert!(check("from math import *\nprint(sqrt(pi))\n").is_ok());
        assert_eq!(
            rejected("from os import *\n"),
            "import of module 'os' is not permitted"
        );
    }

    #[test]
    fn test_nesting_depth_cap() {
        let program = parse_program(&format!("x = {}1\n", "-".repeat(50))).unwrap();
        let limits = Limits {
            max_nesting_depth: 20,
            ..Limits::default()
        };
        let err = check_program(&program, &PolicySet::standard(), &limits).unwrap_err();
        assert_eq!(
            err,
            SandboxError::Policy("syntax tree nesting exceeds maximum depth of 20".to_string())
        );
    }

    #[test]
    fn test_plotting_names_follow_policy() {
        let policy = PolicySet::standard_with_plotting(false);
        let program = parse_program("import matplotlib.pyplot as plt\n").unwrap();
        assert!(check_program(&program, &policy, &Limits::default()).is_err());
        assert!(check("import matplotlib.pyplot as plt\nplt.plot([1, 2])\n").is_ok());
    }
}
