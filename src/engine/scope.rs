//! Variable scopes
//!
//! An [`Env`] is a stack of scopes: the module globals at the bottom, then one
//! frame per active function call or comprehension. Closures capture the
//! stack by reference, so later assignments in an enclosing scope are
//! visible to the function when it runs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::engine::value::Value;

pub type Scope = Rc<RefCell<HashMap<String, Value>>>;

pub fn new_scope() -> Scope {
    Rc::new(RefCell::new(HashMap::new()))
}

#[derive(Debug, Clone)]
pub struct Env {
    frames: Vec<Scope>,
}

impl Env {
    /// Environment for top-level code.
    pub fn global(globals: Scope) -> Self {
        Self {
            frames: vec![globals],
        }
    }

    /// Environment for a call: the captured scopes plus a fresh local frame.
    pub fn for_call(captured: &[Scope], locals: Scope) -> Self {
        let mut frames = captured.to_vec();
        frames.push(locals);
        Self { frames }
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.borrow().get(name).cloned())
    }

    /// Bind in the innermost frame.
    pub fn assign(&self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last() {
            frame.borrow_mut().insert(name.to_string(), value);
        }
    }

    /// Remove from the innermost frame; false when the name was not bound there.
    pub fn delete(&self, name: &str) -> bool {
        self.frames
            .last()
            .is_some_and(|frame| frame.borrow_mut().remove(name).is_some())
    }

    pub fn push_frame(&mut self) {
        self.frames.push(new_scope());
    }

    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn capture(&self) -> Vec<Scope> {
        self.frames.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_frame_shadows_outer() {
        let globals = new_scope();
        let mut env = Env::global(globals.clone());
        env.assign("x", Value::Int(1));
        env.push_frame();
        env.assign("x", Value::Int(2));
        assert_eq!(env.lookup("x"), Some(Value::Int(2)));
        env.pop_frame();
        assert_eq!(env.lookup("x"), Some(Value::Int(1)));
        assert_eq!(globals.borrow().len(), 1);
    }

    #[test]
    fn test_captured_scope_sees_later_bindings() {
        let globals = new_scope();
        let env = Env::global(globals.clone());
        let captured = env.capture();
        env.assign("late", Value::Bool(true));
        let call_env = Env::for_call(&captured, new_scope());
        assert_eq!(call_env.lookup("late"), Some(Value::Bool(true)));
    }

    #[test]
    fn test_delete_only_touches_innermost_frame() {
        let mut env = Env::global(new_scope());
        env.assign("x", Value::Int(1));
        env.push_frame();
        assert!(!env.delete("x"));
        env.pop_frame();
        assert!(env.delete("x"));
        assert_eq!(env.lookup("x"), None);
    }
}
