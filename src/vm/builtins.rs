//! Host-supplied builtin functions.
//!
//! The VM defines no builtins of its own. A host fills a [`BuiltinTable`]
//! and hands it to the VM; calls to names with no user function fall
//! through to this table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// Signature of a builtin's implementation.
pub type BuiltinFn = dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync;

/// A named host function.
#[derive(Clone)]
pub struct Builtin {
    pub name: String,
    pub arity: Option<usize>, // None means variadic
    pub func: Arc<BuiltinFn>,
}

impl Builtin {
    pub fn new<F>(name: impl Into<String>, arity: Option<usize>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity,
            func: Arc::new(func),
        }
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, String> {
        (self.func)(args)
    }
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Builtin({})", self.name)
    }
}

/// Builtins by name.
#[derive(Debug, Clone, Default)]
pub struct BuiltinTable {
    entries: HashMap<String, Builtin>,
}

impl BuiltinTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a builtin, replacing any previous one with the same name.
    pub fn register(&mut self, builtin: Builtin) {
        self.entries.insert(builtin.name.clone(), builtin);
    }

    /// Builder-style [`BuiltinTable::register`].
    pub fn with<F>(mut self, name: &str, arity: Option<usize>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.register(Builtin::new(name, arity, func));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Builtin> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_call() {
        let table = BuiltinTable::new().with("double", Some(1), |args| {
            Ok(Value::Int(args[0].as_int().map_err(|e| e.to_string())? * 2))
        });
        let double = table.get("double").unwrap();
        assert_eq!(double.arity, Some(1));
        assert_eq!(double.call(&[Value::Int(21)]), Ok(Value::Int(42)));
        assert!(table.get("triple").is_none());
    }

    #[test]
    fn test_register_replaces() {
        let mut table = BuiltinTable::new();
        table.register(Builtin::new("f", None, |_| Ok(Value::Int(1))));
        table.register(Builtin::new("f", None, |_| Ok(Value::Int(2))));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("f").unwrap().call(&[]), Ok(Value::Int(2)));
    }

    #[test]
    fn test_debug_shows_name() {
        let builtin = Builtin::new("Screen.clear", Some(0), |_| Ok(Value::Null));
        assert_eq!(format!("{:?}", builtin), "Builtin(Screen.clear)");
    }
}
