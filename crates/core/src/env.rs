//! A parent-linked chain of name -> value frames (spec §4.6).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("variable \"{0}\" is undefined")]
pub struct EnvironmentError(pub String);

struct Frame {
    bindings: HashMap<String, Value>,
    parent: Option<Environment>,
}

/// A shared handle to a frame. Cloning an `Environment` clones the handle,
/// not the bindings — this is the "captured env" a `Closure` holds, and
/// mutations made through any clone are visible through all of them.
#[derive(Debug, Clone)]
pub struct Environment(Rc<RefCell<Frame>>);

impl Environment {
    /// A fresh environment with no parent (the standard built-ins frame is
    /// the usual root).
    pub fn new_root() -> Self {
        Environment(Rc::new(RefCell::new(Frame {
            bindings: HashMap::new(),
            parent: None,
        })))
    }

    /// A fresh environment whose chain continues into `parent`.
    pub fn new_child(parent: &Environment) -> Self {
        Environment(Rc::new(RefCell::new(Frame {
            bindings: HashMap::new(),
            parent: Some(parent.clone()),
        })))
    }

    /// Define a variable in this frame only, replacing any existing binding
    /// of the same name in this frame.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().bindings.insert(name.into(), value);
    }

    /// Look up a variable by walking the chain outward from this frame.
    pub fn lookup(&self, name: &str) -> Result<Value, EnvironmentError> {
        if let Some(v) = self.0.borrow().bindings.get(name) {
            return Ok(v.clone());
        }
        match &self.0.borrow().parent {
            Some(parent) => parent.lookup(name),
            None => Err(EnvironmentError(name.to_string())),
        }
    }

    /// Set an existing variable, searching outward from this frame for the
    /// first frame that already defines it. Fails if no frame in the chain
    /// defines `name`.
    pub fn set(&self, name: &str, value: Value) -> Result<(), EnvironmentError> {
        if self.0.borrow().bindings.contains_key(name) {
            self.0.borrow_mut().bindings.insert(name.to_string(), value);
            return Ok(());
        }
        let parent = self.0.borrow().parent.clone();
        match parent {
            Some(parent) => parent.set(name, value),
            None => Err(EnvironmentError(name.to_string())),
        }
    }

    /// Identity comparison: are these two handles the same frame?
    pub fn is(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
