//! Tree-walking interpreter
//!
//! Evaluates a checked [`Program`] against an [`ExecutionState`]. Every
//! executed statement and every call goes through [`ExecutionState::tick`],
//! every loop iteration through [`ExecutionState::enter_iteration`]. Policy
//! checks that cannot be decided statically (dynamic attribute access,
//! runtime imports, calls to denied natives) are repeated here.

use std::cmp::Ordering;
use std::rc::Rc;

use tracing::debug;

use crate::engine::args::Args;
use crate::engine::builtins::{self, dict_from};
use crate::engine::format::format_value;
use crate::engine::methods;
use crate::engine::modules;
use crate::engine::ops;
use crate::engine::scope::{new_scope, Env, Scope};
use crate::engine::state::ExecutionState;
use crate::engine::value::{
    compare_values, BoundMethod, Closure, DictValue, IterValue, RangeValue, Value,
};
use crate::error::{ExceptionKind, Result, SandboxError, ScriptException};
use crate::parser::ast::*;
use crate::security::guard::is_restricted_attribute;
use crate::security::policy::{Binding, PolicySet, QualifiedName};

/// Outcome of executing a statement.
#[derive(Debug)]
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Source of loop items. Ranges and iterators are consumed lazily; every
/// other iterable is snapshotted when the loop starts.
enum LoopItems {
    Range(RangeValue, usize),
    Iter(Rc<std::cell::RefCell<IterValue>>),
    Items(std::vec::IntoIter<Value>),
}

impl LoopItems {
    fn next_item(&mut self) -> Option<Value> {
        match self {
            LoopItems::Range(range, pos) => {
                let value = range.get(*pos)?;
                *pos += 1;
                Some(Value::Int(value))
            }
            LoopItems::Iter(iter) => iter.borrow_mut().next_item(),
            LoopItems::Items(items) => items.next(),
        }
    }
}

pub struct Interpreter<'p> {
    policy: &'p PolicySet,
    pub state: ExecutionState,
    env: Env,
    /// Exceptions currently being handled, innermost last (for bare `raise`).
    handling: Vec<Rc<ScriptException>>,
    loop_depth: usize,
    function_depth: usize,
}

impl<'p> Interpreter<'p> {
    pub fn new(policy: &'p PolicySet, state: ExecutionState) -> Self {
        Self {
            policy,
            state,
            env: Env::global(new_scope()),
            handling: Vec::new(),
            loop_depth: 0,
            function_depth: 0,
        }
    }

    pub fn policy(&self) -> &PolicySet {
        self.policy
    }

    pub fn into_state(self) -> ExecutionState {
        self.state
    }

    /// Execute a whole program in the module scope.
    pub fn run(&mut self, program: &Program) -> Result<()> {
        debug!(statements = program.body.len(), "interpreter started");
        self.exec_block(&program.body)?;
        debug!(operations = self.state.operations(), "interpreter finished");
        Ok(())
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow> {
        for stmt in stmts {
            let flow = self.exec_stmt(stmt)?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow> {
        self.state.tick().map_err(|e| e.at_line(stmt.line))?;
        self.exec_kind(&stmt.kind, stmt.line)
            .map_err(|e| e.at_line(stmt.line))
    }

    fn exec_kind(&mut self, kind: &StmtKind, line: usize) -> Result<Flow> {
        match kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::AnnAssign { target, value, .. } => {
                if let Some(value) = value {
                    let value = self.eval(value)?;
                    self.assign(target, value)?;
                }
            }
            StmtKind::Pass => {}
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    let word = if matches!(kind, StmtKind::Break) { "break" } else { "continue" };
                    return Err(SandboxError::syntax(format!("'{}' outside loop", word), Some(line)));
                }
                return Ok(if matches!(kind, StmtKind::Break) {
                    Flow::Break
                } else {
                    Flow::Continue
                });
            }
            StmtKind::Return(value) => {
                if self.function_depth == 0 {
                    return Err(SandboxError::syntax("'return' outside function", Some(line)));
                }
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Raise(exc) => return Err(self.raise(exc.as_ref())?),
            StmtKind::Del(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Assert { test, message } => {
                if !self.eval(test)?.truthy() {
                    let message = match message {
                        Some(expr) => self.eval(expr)?.to_str(),
                        None => String::new(),
                    };
                    return Err(SandboxError::runtime(ExceptionKind::AssertionError, message));
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    self.import(alias)?;
                }
            }
            StmtKind::ImportFrom { module, names } => self.import_from(module, names)?,
            StmtKind::If { branches, orelse } => {
                for (test, body) in branches {
                    if self.eval(test)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::While {
                site,
                test,
                body,
                orelse,
            } => {
                self.loop_depth += 1;
                let result = self.exec_while(*site, test, body);
                self.loop_depth -= 1;
                return match result? {
                    Flow::Break => Ok(Flow::Normal),
                    Flow::Normal => self.exec_block(orelse),
                    flow => Ok(flow),
                };
            }
            StmtKind::For {
                site,
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.eval(iter)?;
                let items = self.loop_items(&iterable)?;
                self.loop_depth += 1;
                let result = self.exec_for(*site, target, items, body);
                self.loop_depth -= 1;
                return match result? {
                    Flow::Break => Ok(Flow::Normal),
                    Flow::Normal => self.exec_block(orelse),
                    flow => Ok(flow),
                };
            }
            StmtKind::FunctionDef(def) => {
                let function = self.make_function(def)?;
                self.env.assign(&def.name, function);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody),
        }
        Ok(Flow::Normal)
    }

    /// Runs the loop body; `Flow::Normal` means the loop ended without `break`.
    fn exec_while(&mut self, site: LoopSite, test: &Expr, body: &[Stmt]) -> Result<Flow> {
        while self.eval(test)?.truthy() {
            self.state.enter_iteration(site)?;
            match self.exec_block(body)? {
                Flow::Normal | Flow::Continue => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for(
        &mut self,
        site: LoopSite,
        target: &Target,
        mut items: LoopItems,
        body: &[Stmt],
    ) -> Result<Flow> {
        while let Some(item) = items.next_item() {
            self.state.enter_iteration(site)?;
            self.assign(target, item)?;
            match self.exec_block(body)? {
                Flow::Normal | Flow::Continue => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn loop_items(&mut self, iterable: &Value) -> Result<LoopItems> {
        match iterable {
            Value::Range(range) => Ok(LoopItems::Range(*range, 0)),
            Value::Iterator(iter) => Ok(LoopItems::Iter(iter.clone())),
            other => Ok(LoopItems::Items(self.iterate(other)?.into_iter())),
        }
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> Result<Flow> {
        let result = match self.exec_block(body) {
            Ok(Flow::Normal) => self.exec_block(orelse),
            Err(SandboxError::Runtime(exc)) => match self.find_handler(handlers, &exc) {
                Ok(Some(handler)) => self.run_handler(handler, exc),
                Ok(None) => Err(SandboxError::Runtime(exc)),
                Err(err) => Err(err),
            },
            other => other,
        };
        match result {
            Err(err) if !err.is_catchable() => Err(err),
            result => match self.exec_block(finalbody)? {
                Flow::Normal => result,
                flow => Ok(flow),
            },
        }
    }

    fn find_handler<'h>(
        &mut self,
        handlers: &'h [ExceptHandler],
        exc: &ScriptException,
    ) -> Result<Option<&'h ExceptHandler>> {
        for handler in handlers {
            let Some(kind_expr) = &handler.kind else {
                return Ok(Some(handler));
            };
            let class = self.eval(kind_expr).map_err(|e| e.at_line(handler.line))?;
            if exception_matches(exc.kind, &class).map_err(|e| e.at_line(handler.line))? {
                return Ok(Some(handler));
            }
        }
        Ok(None)
    }

    fn run_handler(&mut self, handler: &ExceptHandler, exc: ScriptException) -> Result<Flow> {
        let exc = Rc::new(exc);
        if let Some(name) = &handler.name {
            self.env.assign(name, Value::Exception(exc.clone()));
        }
        self.handling.push(exc);
        let result = self.exec_block(&handler.body);
        self.handling.pop();
        if let Some(name) = &handler.name {
            self.env.delete(name);
        }
        result
    }

    fn raise(&mut self, exc: Option<&Expr>) -> Result<SandboxError> {
        let Some(expr) = exc else {
            return Ok(match self.handling.last() {
                Some(active) => SandboxError::Runtime(active.as_ref().clone()),
                None => SandboxError::runtime(
                    ExceptionKind::RuntimeError,
                    "No active exception to reraise",
                ),
            });
        };
        match self.eval(expr)? {
            Value::ExceptionClass(kind) => Ok(SandboxError::runtime(kind, "")),
            Value::Exception(exc) => {
                let mut exc = exc.as_ref().clone();
                exc.line = None;
                Ok(SandboxError::Runtime(exc))
            }
            _ => Err(SandboxError::type_error(
                "exceptions must derive from BaseException",
            )),
        }
    }

    fn make_function(&mut self, def: &Rc<FunctionDef>) -> Result<Value> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr)?),
                None => None,
            });
        }
        Ok(Value::Function(Rc::new(Closure {
            def: def.clone(),
            defaults,
            env: self.env.capture(),
        })))
    }

    // ========================================================================
    // Imports
    // ========================================================================

    fn resolve_module(&self, module: &str) -> Result<&'static str> {
        if !self.policy.is_module_allowed(module) {
            return Err(SandboxError::policy(format!(
                "import of module '{}' is not permitted",
                module
            )));
        }
        modules::lookup(module).ok_or_else(|| {
            SandboxError::runtime(
                ExceptionKind::ImportError,
                format!("No module named '{}'", module),
            )
        })
    }

    fn import(&mut self, alias: &ImportAlias) -> Result<()> {
        let module = self.resolve_module(&alias.module)?;
        debug!(module, "import");
        let bound = match &alias.alias {
            Some(_) => module,
            None => {
                let top = alias.module.split('.').next().unwrap_or(module);
                self.resolve_module(top)?
            }
        };
        self.env.assign(alias.bound_name(), Value::Module(bound));
        Ok(())
    }

    fn import_from(&mut self, module: &str, names: &ImportNames) -> Result<()> {
        let resolved = self.resolve_module(module)?;
        debug!(module = resolved, "import from");
        match names {
            ImportNames::Star => {
                let exported = modules::exported_names(resolved).unwrap_or(&[]);
                for name in exported {
                    let value = self.module_attribute(resolved, name)?;
                    self.env.assign(name, value);
                }
            }
            ImportNames::Names(names) => {
                for (name, alias) in names {
                    let value = self.module_attribute(resolved, name).map_err(|err| match err {
                        SandboxError::Runtime(exc) if exc.kind == ExceptionKind::AttributeError => {
                            SandboxError::runtime(
                                ExceptionKind::ImportError,
                                format!("cannot import name '{}' from '{}'", name, module),
                            )
                        }
                        other => other,
                    })?;
                    self.env.assign(alias.as_deref().unwrap_or(name), value);
                }
            }
        }
        Ok(())
    }

    fn module_attribute(&self, module: &'static str, name: &str) -> Result<Value> {
        let mut segments: Vec<&str> = module.split('.').collect();
        segments.push(name);
        if let Some(qualified) = QualifiedName::from_segments(&segments) {
            if self.policy.is_denied(&qualified) {
                return Err(SandboxError::policy(format!("{} is not permitted", qualified)));
            }
        }
        if let Value::Module(sub) = modules::get_attr(module, name).unwrap_or(Value::None) {
            if !self.policy.is_module_allowed(sub) {
                return Err(SandboxError::policy(format!(
                    "import of module '{}' is not permitted",
                    sub
                )));
            }
        }
        modules::get_attr(module, name).ok_or_else(|| {
            SandboxError::runtime(
                ExceptionKind::AttributeError,
                format!("module '{}' has no attribute '{}'", module, name),
            )
        })
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    fn assign(&mut self, target: &Target, value: Value) -> Result<()> {
        match target {
            Target::Name(name) => {
                self.env.assign(name, value);
                Ok(())
            }
            Target::Tuple(targets) => self.unpack(targets, value),
            Target::Starred(_) => Err(SandboxError::syntax(
                "starred assignment target must be in a list or tuple",
                None,
            )),
            Target::Attribute { value: object, attr } => {
                if is_restricted_attribute(attr) {
                    return Err(SandboxError::policy(format!(
                        "attribute '{}' is not permitted",
                        attr
                    )));
                }
                let object = self.eval(object)?;
                Err(SandboxError::runtime(
                    ExceptionKind::AttributeError,
                    format!(
                        "'{}' object attribute '{}' is read-only",
                        object.type_name(),
                        attr
                    ),
                ))
            }
            Target::Subscript { value: container, index } => {
                let container = self.eval(container)?;
                if let Expr::Slice { lower, upper, step } = index {
                    let bounds = self.slice_bounds(lower, upper, step)?;
                    let items = self.iterate(&value)?;
                    return self.assign_slice(&container, bounds, items);
                }
                let index = self.eval(index)?;
                self.set_item(&container, index, value)
            }
        }
    }

    fn unpack(&mut self, targets: &[Target], value: Value) -> Result<()> {
        let items = self.iterate(&value)?;
        let starred = targets.iter().position(|t| matches!(t, Target::Starred(_)));
        match starred {
            None => {
                if items.len() != targets.len() {
                    return Err(unpack_error(targets.len(), items.len(), false));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
            }
            Some(star) => {
                let fixed = targets.len() - 1;
                if items.len() < fixed {
                    return Err(unpack_error(fixed, items.len(), true));
                }
                let after = targets.len() - star - 1;
                let mut items = items;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(star);
                for (target, item) in targets[..star].iter().zip(items) {
                    self.assign(target, item)?;
                }
                if let Target::Starred(inner) = &targets[star] {
                    self.assign(inner, Value::list(middle))?;
                }
                for (target, item) in targets[star + 1..].iter().zip(tail) {
                    self.assign(target, item)?;
                }
            }
        }
        Ok(())
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> Result<()> {
        match target {
            Target::Name(name) => {
                let current = self.load_name(name)?;
                let rhs = self.eval(value)?;
                let result = self.augmented(op, current, rhs)?;
                self.env.assign(name, result);
                Ok(())
            }
            Target::Subscript {
                value: container,
                index,
            } if !matches!(index, Expr::Slice { .. }) => {
                let container = self.eval(container)?;
                let index = self.eval(index)?;
                let current = self.get_item(&container, &index)?;
                let rhs = self.eval(value)?;
                let result = self.augmented(op, current, rhs)?;
                self.set_item(&container, index, result)
            }
            Target::Attribute { .. } => {
                let rhs = self.eval(value)?;
                self.assign(target, rhs)
            }
            _ => Err(SandboxError::syntax(
                "illegal expression for augmented assignment",
                None,
            )),
        }
    }

    /// `+=` on a list extends it in place; everything else rebinds.
    fn augmented(&mut self, op: BinOp, current: Value, rhs: Value) -> Result<Value> {
        if let (BinOp::Add, Value::List(list)) = (op, &current) {
            let items = self.iterate(&rhs)?;
            self.state
                .check_sequence_len(list.borrow().len() + items.len())?;
            list.borrow_mut().extend(items);
            return Ok(current);
        }
        ops::binary(op, &current, &rhs, self.state.limits().max_sequence_length)
    }

    fn delete(&mut self, target: &Target) -> Result<()> {
        match target {
            Target::Name(name) => {
                if self.env.delete(name) {
                    Ok(())
                } else {
                    Err(SandboxError::runtime(
                        ExceptionKind::NameError,
                        format!("name '{}' is not defined", name),
                    ))
                }
            }
            Target::Tuple(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
            Target::Subscript {
                value: container,
                index,
            } => {
                let container = self.eval(container)?;
                if let Expr::Slice { lower, upper, step } = index {
                    let bounds = self.slice_bounds(lower, upper, step)?;
                    return self.delete_slice(&container, bounds);
                }
                let index = self.eval(index)?;
                self.delete_item(&container, &index)
            }
            Target::Attribute { attr, .. } => Err(SandboxError::runtime(
                ExceptionKind::AttributeError,
                format!("cannot delete attribute '{}'", attr),
            )),
            Target::Starred(_) => Err(SandboxError::syntax("cannot delete starred", None)),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub fn eval(&mut self, expr: &Expr) -> Result<Value> {
        self.state.tick()?;
        match expr {
            Expr::Constant(constant) => Ok(match constant {
                Constant::None => Value::None,
                Constant::Bool(b) => Value::Bool(*b),
                Constant::Int(i) => Value::Int(*i),
                Constant::Float(f) => Value::Float(*f),
                Constant::Str(s) => Value::from(s.as_str()),
            }),
            Expr::FString(parts) => Ok(Value::from(self.fstring(parts)?)),
            Expr::Name(name) => self.load_name(name),
            Expr::List(items) => Ok(Value::list(self.eval_elements(items)?)),
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_elements(items)?)),
            Expr::Set(items) => {
                let items = self.eval_elements(items)?;
                Ok(Value::set(DictValue::from_keys(items)?))
            }
            Expr::Dict(items) => {
                let mut dict = DictValue::new();
                for item in items {
                    match item {
                        DictItem::Pair(key, value) => {
                            let key = self.eval(key)?;
                            let value = self.eval(value)?;
                            dict.insert(key, value)?;
                        }
                        DictItem::Unpack(expr) => {
                            let source = self.eval(expr)?;
                            for (k, v) in dict_from(self, &source)?.items() {
                                dict.insert(k, v)?;
                            }
                        }
                    }
                }
                self.state.check_sequence_len(dict.len())?;
                Ok(Value::dict(dict))
            }
            Expr::Starred(_) => Err(SandboxError::syntax(
                "can't use starred expression here",
                None,
            )),
            Expr::Attribute { value, attr } => {
                if is_restricted_attribute(attr) {
                    return Err(SandboxError::policy(format!(
                        "attribute '{}' is not permitted",
                        attr
                    )));
                }
                let value = self.eval(value)?;
                self.get_attribute(&value, attr)
            }
            Expr::Subscript { value, index } => {
                let container = self.eval(value)?;
                if let Expr::Slice { lower, upper, step } = index.as_ref() {
                    let bounds = self.slice_bounds(lower, upper, step)?;
                    return self.get_slice(&container, bounds);
                }
                let index = self.eval(index)?;
                self.get_item(&container, &index)
            }
            Expr::Slice { .. } => Err(SandboxError::syntax("invalid slice", None)),
            Expr::Call { func, args } => {
                let func = self.eval(func)?;
                let args = self.eval_args(args)?;
                self.call_value(&func, args)
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
                    _ => ops::unary(*op, &operand),
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right, self.state.limits().max_sequence_length)
            }
            Expr::BoolOp { op, values } => {
                let mut result = Value::None;
                for value in values {
                    result = self.eval(value)?;
                    let short_circuit = match op {
                        BoolOp::And => !result.truthy(),
                        BoolOp::Or => result.truthy(),
                    };
                    if short_circuit {
                        break;
                    }
                }
                Ok(result)
            }
            Expr::Compare { left, ops: comparisons } => {
                let mut left = self.eval(left)?;
                for (op, right) in comparisons {
                    let right = self.eval(right)?;
                    if !ops::compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::Lambda(def) => self.make_function(def),
            Expr::ListComp {
                element,
                generators,
            } => Ok(Value::list(self.collect_comprehension(element, generators)?)),
            Expr::GeneratorExp {
                element,
                generators,
            } => Ok(Value::iterator(
                self.collect_comprehension(element, generators)?,
            )),
            Expr::SetComp {
                element,
                generators,
            } => {
                let items = self.collect_comprehension(element, generators)?;
                Ok(Value::set(DictValue::from_keys(items)?))
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                let mut dict = DictValue::new();
                let max_len = self.state.limits().max_sequence_length;
                self.comprehension(generators, &mut |interp| {
                    let k = interp.eval(key)?;
                    let v = interp.eval(value)?;
                    dict.insert(k, v)?;
                    if dict.len() > max_len {
                        interp.state.check_sequence_len(dict.len())?;
                    }
                    Ok(())
                })?;
                Ok(Value::dict(dict))
            }
        }
    }

    fn load_name(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.env.lookup(name) {
            return Ok(value);
        }
        match self.policy.resolve(name) {
            Some(Binding::Builtin(builtin)) => Ok(Value::Builtin(builtin)),
            Some(Binding::Exception(kind)) => Ok(Value::ExceptionClass(kind)),
            None => {
                let qualified = QualifiedName::builtin(name);
                if self.policy.is_denied(&qualified) {
                    return Err(SandboxError::policy(format!("{} is not permitted", qualified)));
                }
                Err(SandboxError::runtime(
                    ExceptionKind::NameError,
                    format!("name '{}' is not defined", name),
                ))
            }
        }
    }

    fn fstring(&mut self, parts: &[FStringPart]) -> Result<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr)?;
                    let value = match conversion {
                        Some('r') | Some('a') => Value::from(value.repr()),
                        Some('s') => Value::from(value.to_str()),
                        _ => value,
                    };
                    let spec = self.fstring(spec)?;
                    out.push_str(&format_value(&value, &spec)?);
                }
            }
            if out.len() > self.state.limits().max_sequence_length {
                self.state.check_sequence_len(out.chars().count())?;
            }
        }
        Ok(out)
    }

    fn eval_elements(&mut self, items: &[Expr]) -> Result<Vec<Value>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Expr::Starred(inner) => {
                    let value = self.eval(inner)?;
                    out.extend(self.iterate(&value)?);
                }
                other => out.push(self.eval(other)?),
            }
        }
        self.state.check_sequence_len(out.len())?;
        Ok(out)
    }

    fn eval_args(&mut self, arguments: &[Argument]) -> Result<Args> {
        let mut args = Args::default();
        for argument in arguments {
            match argument {
                Argument::Positional(expr) => args.positional.push(self.eval(expr)?),
                Argument::Star(expr) => {
                    let value = self.eval(expr)?;
                    args.positional.extend(self.iterate(&value)?);
                }
                Argument::Keyword(name, expr) => {
                    let value = self.eval(expr)?;
                    args.keywords.push((name.clone(), value));
                }
                Argument::DoubleStar(expr) => {
                    let value = self.eval(expr)?;
                    let Value::Dict(dict) = &value else {
                        return Err(SandboxError::type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            value.type_name()
                        )));
                    };
                    for (k, v) in dict.borrow().items() {
                        let Value::Str(key) = k else {
                            return Err(SandboxError::type_error("keywords must be strings"));
                        };
                        args.keywords.push((key.to_string(), v));
                    }
                }
            }
        }
        Ok(args)
    }

    fn collect_comprehension(
        &mut self,
        element: &Expr,
        generators: &[Comprehension],
    ) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        let max_len = self.state.limits().max_sequence_length;
        self.comprehension(generators, &mut |interp| {
            out.push(interp.eval(element)?);
            if out.len() > max_len {
                interp.state.check_sequence_len(out.len())?;
            }
            Ok(())
        })?;
        Ok(out)
    }

    /// Run `emit` once per combination of the generator clauses, inside a
    /// fresh scope holding the comprehension variables.
    fn comprehension(
        &mut self,
        generators: &[Comprehension],
        emit: &mut dyn FnMut(&mut Self) -> Result<()>,
    ) -> Result<()> {
        self.env.push_frame();
        let result = self.comprehension_level(generators, emit);
        self.env.pop_frame();
        result
    }

    fn comprehension_level(
        &mut self,
        generators: &[Comprehension],
        emit: &mut dyn FnMut(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let Some((first, rest)) = generators.split_first() else {
            return emit(self);
        };
        let iterable = self.eval(&first.iter)?;
        let mut items = self.loop_items(&iterable)?;
        'items: while let Some(item) = items.next_item() {
            self.state.enter_iteration(first.site)?;
            self.assign(&first.target, item)?;
            for condition in &first.ifs {
                if !self.eval(condition)?.truthy() {
                    continue 'items;
                }
            }
            self.comprehension_level(rest, emit)?;
        }
        Ok(())
    }

    // ========================================================================
    // Calls
    // ========================================================================

    /// Call any callable value. Counts one operation.
    pub fn call_value(&mut self, func: &Value, args: Args) -> Result<Value> {
        self.state.tick()?;
        match func {
            Value::Function(closure) => self.call_closure(closure, args),
            Value::Builtin(builtin) => builtins::call(self, *builtin, args),
            Value::ExceptionClass(kind) => {
                args.check(kind.name(), 0, usize::MAX)?;
                let message = match args.positional.as_slice() {
                    [] => String::new(),
                    [single] => single.to_str(),
                    many => Value::tuple(many.to_vec()).repr(),
                };
                Ok(Value::Exception(Rc::new(ScriptException::new(*kind, message))))
            }
            Value::Native(native) => {
                let qualified = native.qualified();
                if self.policy.is_denied(&qualified) {
                    return Err(SandboxError::policy(format!("{} is not permitted", qualified)));
                }
                modules::call(self, *native, args)
            }
            Value::BoundMethod(method) => {
                let receiver = method.receiver.clone();
                methods::call_method(self, &receiver, &method.name, args)
            }
            other => Err(SandboxError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, args: Args) -> Result<Value> {
        let locals = new_scope();
        bind_parameters(closure, args, &locals)?;
        self.state.enter_call()?;
        let env = Env::for_call(&closure.env, locals);
        let saved_env = std::mem::replace(&mut self.env, env);
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let result = self.exec_block(&closure.def.body);
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        self.env = saved_env;
        self.state.exit_call();
        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    // ========================================================================
    // Attributes and items
    // ========================================================================

    pub fn get_attribute(&mut self, value: &Value, name: &str) -> Result<Value> {
        if is_restricted_attribute(name) {
            return Err(SandboxError::policy(format!(
                "attribute '{}' is not permitted",
                name
            )));
        }
        let found = match value {
            Value::Module(module) => return self.module_attribute(*module, name),
            Value::Native(native) => modules::native_attr(native, name),
            Value::Object(object) => object.get_attr(name).or_else(|| {
                object.has_method(name).then(|| bound(value, name))
            }),
            Value::Exception(exc) if name == "args" => Some(Value::tuple(
                if exc.message.is_empty() {
                    Vec::new()
                } else {
                    vec![Value::from(exc.message.as_str())]
                },
            )),
            Value::Int(i) if name == "real" => Some(Value::Int(*i)),
            Value::Int(_) if name == "imag" => Some(Value::Int(0)),
            Value::Float(f) if name == "real" => Some(Value::Float(*f)),
            Value::Float(_) if name == "imag" => Some(Value::Float(0.0)),
            Value::Range(r) => match name {
                "start" => Some(Value::Int(r.start)),
                "stop" => Some(Value::Int(r.stop)),
                "step" => Some(Value::Int(r.step)),
                _ => None,
            },
            other if methods::has_method(other, name) => Some(bound(other, name)),
            _ => None,
        };
        found.ok_or_else(|| {
            let owner = match value {
                Value::Native(native) => format!("type object '{}'", native.name),
                other => format!("'{}' object", other.type_name()),
            };
            SandboxError::runtime(
                ExceptionKind::AttributeError,
                format!("{} has no attribute '{}'", owner, name),
            )
        })
    }

    pub fn get_item(&mut self, container: &Value, index: &Value) -> Result<Value> {
        match container {
            Value::List(items) => {
                let items = items.borrow();
                let i = sequence_index(index, items.len(), "list")?;
                Ok(items[i].clone())
            }
            Value::Tuple(items) => {
                let i = sequence_index(index, items.len(), "tuple")?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let len = s.chars().count();
                let i = sequence_index(index, len, "string")?;
                Ok(s.chars().nth(i).map(Value::from_char).unwrap_or(Value::None))
            }
            Value::Range(range) => {
                let i = sequence_index(index, range.len(), "range object")?;
                Ok(range.get(i).map(Value::Int).unwrap_or(Value::None))
            }
            Value::Dict(dict) => {
                let dict_ref = dict.borrow();
                match dict_ref.get(index)? {
                    Some(value) => Ok(value),
                    None if dict_ref.counter => Ok(Value::Int(0)),
                    None => Err(SandboxError::runtime(ExceptionKind::KeyError, index.repr())),
                }
            }
            other => Err(SandboxError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn set_item(&mut self, container: &Value, index: Value, value: Value) -> Result<()> {
        match container {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let len = items.len();
                let i = sequence_index(&index, len, "list assignment")?;
                items[i] = value;
                Ok(())
            }
            Value::Dict(dict) => {
                dict.borrow_mut().insert(index, value)?;
                self.state.check_sequence_len(dict.borrow().len())
            }
            other => Err(SandboxError::type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    fn delete_item(&mut self, container: &Value, index: &Value) -> Result<()> {
        match container {
            Value::List(items) => {
                let mut items = items.borrow_mut();
                let len = items.len();
                let i = sequence_index(index, len, "list assignment")?;
                items.remove(i);
                Ok(())
            }
            Value::Dict(dict) => match dict.borrow_mut().remove(index)? {
                Some(_) => Ok(()),
                None => Err(SandboxError::runtime(ExceptionKind::KeyError, index.repr())),
            },
            other => Err(SandboxError::type_error(format!(
                "'{}' object does not support item deletion",
                other.type_name()
            ))),
        }
    }

    // ========================================================================
    // Slices
    // ========================================================================

    fn slice_bounds(
        &mut self,
        lower: &Option<Box<Expr>>,
        upper: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
    ) -> Result<SliceBounds> {
        let mut part = |expr: &Option<Box<Expr>>| -> Result<Option<i64>> {
            match expr {
                None => Ok(None),
                Some(expr) => match self.eval(expr)? {
                    Value::None => Ok(None),
                    value => value.as_int().map(Some).ok_or_else(|| {
                        SandboxError::type_error(
                            "slice indices must be integers or None or have an __index__ method",
                        )
                    }),
                },
            }
        };
        let start = part(lower)?;
        let stop = part(upper)?;
        let step = part(step)?.unwrap_or(1);
        if step == 0 {
            return Err(SandboxError::value_error("slice step cannot be zero"));
        }
        Ok(SliceBounds { start, stop, step })
    }

    fn get_slice(&mut self, container: &Value, bounds: SliceBounds) -> Result<Value> {
        match container {
            Value::List(items) => {
                let items = items.borrow();
                let picked = bounds.indices(items.len()).map(|i| items[i].clone()).collect();
                Ok(Value::list(picked))
            }
            Value::Tuple(items) => {
                let picked = bounds.indices(items.len()).map(|i| items[i].clone()).collect();
                Ok(Value::tuple(picked))
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let picked: String = bounds.indices(chars.len()).map(|i| chars[i]).collect();
                Ok(Value::from(picked))
            }
            Value::Range(range) => {
                let (start, stop) = bounds.resolve(range.len());
                let step = range.step.saturating_mul(bounds.step);
                Ok(Value::Range(RangeValue {
                    start: range.start.saturating_add(start.saturating_mul(range.step)),
                    stop: range.start.saturating_add(stop.saturating_mul(range.step)),
                    step,
                }))
            }
            other => Err(SandboxError::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn assign_slice(&mut self, container: &Value, bounds: SliceBounds, items: Vec<Value>) -> Result<()> {
        let Value::List(list) = container else {
            return Err(SandboxError::type_error(format!(
                "'{}' object does not support item assignment",
                container.type_name()
            )));
        };
        let len = list.borrow().len();
        if bounds.step == 1 {
            let (start, stop) = bounds.resolve(len);
            let start = start as usize;
            let stop = (stop as usize).max(start);
            self.state
                .check_sequence_len(len - (stop - start) + items.len())?;
            list.borrow_mut().splice(start..stop, items);
            return Ok(());
        }
        let indices: Vec<usize> = bounds.indices(len).collect();
        if indices.len() != items.len() {
            return Err(SandboxError::value_error(format!(
                "attempt to assign sequence of size {} to extended slice of size {}",
                items.len(),
                indices.len()
            )));
        }
        let mut list = list.borrow_mut();
        for (i, item) in indices.into_iter().zip(items) {
            list[i] = item;
        }
        Ok(())
    }

    fn delete_slice(&mut self, container: &Value, bounds: SliceBounds) -> Result<()> {
        let Value::List(list) = container else {
            return Err(SandboxError::type_error(format!(
                "'{}' object does not support item deletion",
                container.type_name()
            )));
        };
        let mut list = list.borrow_mut();
        let mut doomed: Vec<usize> = bounds.indices(list.len()).collect();
        doomed.sort_unstable();
        for i in doomed.into_iter().rev() {
            list.remove(i);
        }
        Ok(())
    }

    // ========================================================================
    // Iteration and sorting
    // ========================================================================

    /// Materialise the items of an iterable.
    pub fn iterate(&mut self, value: &Value) -> Result<Vec<Value>> {
        match value {
            Value::List(items) => Ok(items.borrow().clone()),
            Value::Tuple(items) => Ok(items.to_vec()),
            Value::Str(s) => Ok(s.chars().map(Value::from_char).collect()),
            Value::Dict(dict) | Value::Set(dict) => Ok(dict.borrow().keys()),
            Value::Range(range) => {
                self.state.check_sequence_len(range.len())?;
                Ok((0..range.len()).filter_map(|i| range.get(i)).map(Value::Int).collect())
            }
            Value::Iterator(iter) => Ok(iter.borrow_mut().drain_rest()),
            other => Err(SandboxError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// Stable sort, optionally by `key(item)`.
    pub fn sort_values(
        &mut self,
        items: Vec<Value>,
        key: Option<Value>,
        reverse: bool,
    ) -> Result<Vec<Value>> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let sort_key = match &key {
                Some(func) => self.call_value(func, Args::new(vec![item.clone()]))?,
                None => item.clone(),
            };
            keyed.push((sort_key, item));
        }
        let mut failure = None;
        keyed.sort_by(|(a, _), (b, _)| {
            let ordering = if reverse {
                compare_values(b, a)
            } else {
                compare_values(a, b)
            };
            ordering.unwrap_or_else(|err| {
                failure.get_or_insert(err);
                Ordering::Equal
            })
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(keyed.into_iter().map(|(_, item)| item).collect()),
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn bound(receiver: &Value, name: &str) -> Value {
    Value::BoundMethod(Rc::new(BoundMethod {
        receiver: receiver.clone(),
        name: Rc::from(name),
    }))
}

fn exception_matches(kind: ExceptionKind, class: &Value) -> Result<bool> {
    match class {
        Value::ExceptionClass(expected) => Ok(kind.is_subclass_of(*expected)),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if exception_matches(kind, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(SandboxError::type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}

fn unpack_error(expected: usize, got: usize, at_least: bool) -> SandboxError {
    let message = if got > expected && !at_least {
        format!("too many values to unpack (expected {})", expected)
    } else if at_least {
        format!(
            "not enough values to unpack (expected at least {}, got {})",
            expected, got
        )
    } else {
        format!(
            "not enough values to unpack (expected {}, got {})",
            expected, got
        )
    };
    SandboxError::value_error(message)
}

fn sequence_index(index: &Value, len: usize, what: &str) -> Result<usize> {
    let Some(i) = index.as_int() else {
        let kind = what.split(' ').next().unwrap_or(what);
        return Err(SandboxError::type_error(format!(
            "{} indices must be integers or slices, not {}",
            kind,
            index.type_name()
        )));
    };
    let resolved = if i < 0 { i + len as i64 } else { i };
    if resolved < 0 || resolved >= len as i64 {
        return Err(SandboxError::runtime(
            ExceptionKind::IndexError,
            format!("{} index out of range", what),
        ));
    }
    Ok(resolved as usize)
}

/// Evaluated `start:stop:step`.
#[derive(Debug, Clone, Copy)]
struct SliceBounds {
    start: Option<i64>,
    stop: Option<i64>,
    step: i64,
}

impl SliceBounds {
    /// Clamp start and stop against a sequence of `len` items.
    fn resolve(&self, len: usize) -> (i64, i64) {
        let len = len as i64;
        let (lower, upper) = if self.step > 0 { (0, len) } else { (-1, len - 1) };
        let clamp = |bound: Option<i64>, default: i64| match bound {
            None => default,
            Some(b) if b < 0 => (b + len).max(lower),
            Some(b) => b.min(upper),
        };
        if self.step > 0 {
            (clamp(self.start, lower), clamp(self.stop, upper))
        } else {
            (clamp(self.start, upper), clamp(self.stop, lower))
        }
    }

    fn indices(&self, len: usize) -> impl Iterator<Item = usize> {
        let (start, stop) = self.resolve(len);
        let step = self.step;
        let mut current = start;
        std::iter::from_fn(move || {
            let inside = if step > 0 { current < stop } else { current > stop };
            if !inside {
                return None;
            }
            let index = current as usize;
            current += step;
            Some(index)
        })
    }
}

/// Bind call arguments to a closure's parameters in a fresh local scope.
fn bind_parameters(closure: &Closure, args: Args, locals: &Scope) -> Result<()> {
    let def = &closure.def;
    let fname = def.name.as_str();
    let params = &def.params;
    let mut bound: Vec<Option<Value>> = vec![None; params.len()];
    let mut positional = args.positional.into_iter();
    let mut varargs_seen = false;
    let mut kwargs_slot = None;

    let positional_count = params
        .iter()
        .take_while(|p| p.kind == ParamKind::Regular)
        .count();
    let given = positional.len();

    for (i, param) in params.iter().enumerate() {
        match param.kind {
            ParamKind::Regular if !varargs_seen => bound[i] = positional.next(),
            ParamKind::Regular => {}
            ParamKind::VarArgs => {
                varargs_seen = true;
                bound[i] = Some(Value::tuple(positional.by_ref().collect()));
            }
            ParamKind::KwArgs => kwargs_slot = Some(i),
        }
    }
    if positional.len() > 0 {
        return Err(SandboxError::type_error(format!(
            "{}() takes {} positional argument{} but {} were given",
            fname,
            positional_count,
            if positional_count == 1 { "" } else { "s" },
            given
        )));
    }

    let mut extra = DictValue::new();
    for (name, value) in args.keywords {
        let slot = params
            .iter()
            .position(|p| p.kind == ParamKind::Regular && p.name == name);
        match (slot, kwargs_slot) {
            (Some(i), _) => {
                if bound[i].is_some() {
                    return Err(SandboxError::type_error(format!(
                        "{}() got multiple values for argument '{}'",
                        fname, name
                    )));
                }
                bound[i] = Some(value);
            }
            (None, Some(_)) => extra.insert(Value::from(name), value)?,
            (None, None) => {
                return Err(SandboxError::type_error(format!(
                    "{}() got an unexpected keyword argument '{}'",
                    fname, name
                )))
            }
        }
    }
    if let Some(i) = kwargs_slot {
        bound[i] = Some(Value::dict(extra));
    }

    let mut missing_positional = Vec::new();
    let mut missing_keyword = Vec::new();
    for (i, param) in params.iter().enumerate() {
        if bound[i].is_none() {
            match closure.defaults.get(i).cloned().flatten() {
                Some(default) => bound[i] = Some(default),
                None if i < positional_count => missing_positional.push(format!("'{}'", param.name)),
                None => missing_keyword.push(format!("'{}'", param.name)),
            }
        }
    }
    if let Some(err) = missing_error(fname, &missing_positional, "positional")
        .or_else(|| missing_error(fname, &missing_keyword, "keyword-only"))
    {
        return Err(err);
    }

    let mut scope = locals.borrow_mut();
    for (param, value) in params.iter().zip(bound) {
        if let Some(value) = value {
            scope.insert(param.name.clone(), value);
        }
    }
    Ok(())
}

fn missing_error(fname: &str, missing: &[String], kind: &str) -> Option<SandboxError> {
    let names = match missing {
        [] => return None,
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    };
    Some(SandboxError::type_error(format!(
        "{}() missing {} required {} argument{}: {}",
        fname,
        missing.len(),
        kind,
        if missing.len() == 1 { "" } else { "s" },
        names
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_indices_follow_python() {
        let all = SliceBounds {
            start: None,
            stop: None,
            step: 1,
        };
        assert_eq!(all.indices(3).collect::<Vec<_>>(), vec![0, 1, 2]);

        let reversed = SliceBounds {
            start: None,
            stop: None,
            step: -1,
        };
        assert_eq!(reversed.indices(3).collect::<Vec<_>>(), vec![2, 1, 0]);

        let tail = SliceBounds {
            start: Some(-2),
            stop: Some(100),
            step: 1,
        };
        assert_eq!(tail.indices(5).collect::<Vec<_>>(), vec![3, 4]);

        let every_other = SliceBounds {
            start: Some(1),
            stop: None,
            step: 2,
        };
        assert_eq!(every_other.indices(6).collect::<Vec<_>>(), vec![1, 3, 5]);
    }

    #[test]
    fn test_sequence_index() {
        assert_eq!(sequence_index(&Value::Int(-1), 3, "list").unwrap(), 2);
        let err = sequence_index(&Value::Int(3), 3, "list").unwrap_err();
        assert_eq!(err.to_string(), "IndexError: list index out of range");
        let err = sequence_index(&Value::from("a"), 3, "list").unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: list indices must be integers or slices, not str"
        );
    }

    #[test]
    fn test_unpack_errors() {
        assert_eq!(
            unpack_error(2, 3, false).to_string(),
            "ValueError: too many values to unpack (expected 2)"
        );
        assert_eq!(
            unpack_error(3, 2, false).to_string(),
            "ValueError: not enough values to unpack (expected 3, got 2)"
        );
    }

    #[test]
    fn test_exception_matching() {
        let lookup = Value::ExceptionClass(ExceptionKind::LookupError);
        assert!(exception_matches(ExceptionKind::KeyError, &lookup).unwrap());
        assert!(!exception_matches(ExceptionKind::ValueError, &lookup).unwrap());
        assert!(exception_matches(ExceptionKind::KeyError, &Value::Int(1)).is_err());
    }
}
