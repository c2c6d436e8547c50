//! Runtime environment for variable scopes.
//!
//! Scopes live in an arena and refer to their parent by handle, so a
//! child never holds a borrow of the scope it chains to.

use indexmap::IndexMap;

use crate::error::EnvError;
use crate::value::{TypeTag, Value};

/// Handle to a scope in an [`Environment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

impl ScopeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A binding: the declared type and the current value.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub declared: TypeTag,
    pub value: Value,
}

#[derive(Debug, Default)]
struct Scope {
    vars: IndexMap<String, Variable>,
    parent: Option<ScopeId>,
}

/// Arena of parent-chained scopes. Slot 0 is the global scope.
#[derive(Debug)]
pub struct Environment {
    scopes: Vec<Option<Scope>>,
    free: Vec<ScopeId>,
}

impl Environment {
    pub fn new() -> Self {
        Self {
            scopes: vec![Some(Scope::default())],
            free: Vec::new(),
        }
    }

    pub fn global(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Number of scopes currently alive, the global scope included.
    pub fn live_scopes(&self) -> usize {
        self.scopes.len() - self.free.len()
    }

    /// Create an empty scope chained to `parent`.
    pub fn push_scope(&mut self, parent: ScopeId) -> ScopeId {
        let scope = Scope {
            vars: IndexMap::new(),
            parent: Some(parent),
        };
        if let Some(id) = self.free.pop() {
            self.scopes[id.index()] = Some(scope);
            id
        } else {
            self.scopes.push(Some(scope));
            ScopeId((self.scopes.len() - 1) as u32)
        }
    }

    /// Drop a scope and its bindings, returning its parent.
    pub fn release(&mut self, id: ScopeId) -> Option<ScopeId> {
        if id == self.global() {
            return None;
        }
        let scope = self.scopes.get_mut(id.index())?.take()?;
        self.free.push(id);
        scope.parent
    }

    fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.index()).and_then(Option::as_ref)
    }

    fn scope_mut(&mut self, id: ScopeId) -> Option<&mut Scope> {
        self.scopes.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// First scope on the chain starting at `from` that binds `name`.
    fn resolve(&self, from: ScopeId, name: &str) -> Option<ScopeId> {
        let mut current = Some(from);
        while let Some(id) = current {
            let scope = self.scope(id)?;
            if scope.vars.contains_key(name) {
                return Some(id);
            }
            current = scope.parent;
        }
        None
    }

    /// Declare `name` in `scope`, coercing `value` to `declared`.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: &str,
        declared: TypeTag,
        value: Value,
    ) -> Result<(), EnvError> {
        let value = value.coerce_to(declared)?;
        let Some(target) = self.scope_mut(scope) else {
            return Err(EnvError::Unknown(name.to_string()));
        };
        if target.vars.contains_key(name) {
            return Err(EnvError::AlreadyDeclared(name.to_string()));
        }
        target
            .vars
            .insert(name.to_string(), Variable { declared, value });
        Ok(())
    }

    pub fn get(&self, scope: ScopeId, name: &str) -> Result<&Value, EnvError> {
        self.resolve(scope, name)
            .and_then(|id| self.scope(id))
            .and_then(|s| s.vars.get(name))
            .map(|var| &var.value)
            .ok_or_else(|| EnvError::Unknown(name.to_string()))
    }

    pub fn get_mut(&mut self, scope: ScopeId, name: &str) -> Result<&mut Value, EnvError> {
        let id = self
            .resolve(scope, name)
            .ok_or_else(|| EnvError::Unknown(name.to_string()))?;
        self.scope_mut(id)
            .and_then(|s| s.vars.get_mut(name))
            .map(|var| &mut var.value)
            .ok_or_else(|| EnvError::Unknown(name.to_string()))
    }

    /// Assign to an existing binding anywhere on the chain. Never declares.
    pub fn set(&mut self, scope: ScopeId, name: &str, value: Value) -> Result<(), EnvError> {
        let id = self
            .resolve(scope, name)
            .ok_or_else(|| EnvError::Unknown(name.to_string()))?;
        let var = self
            .scope_mut(id)
            .and_then(|s| s.vars.get_mut(name))
            .ok_or_else(|| EnvError::Unknown(name.to_string()))?;
        var.value = value.coerce_to(var.declared)?;
        Ok(())
    }

    /// Assign if `name` is bound anywhere on the chain, else declare it
    /// locally as `auto`.
    pub fn set_or_declare(
        &mut self,
        scope: ScopeId,
        name: &str,
        value: Value,
    ) -> Result<(), EnvError> {
        if self.resolve(scope, name).is_some() {
            self.set(scope, name, value)
        } else {
            self.declare(scope, name, TypeTag::Auto, value)
        }
    }

    /// Remove the first binding of `name` on the chain.
    pub fn unset(&mut self, scope: ScopeId, name: &str) -> bool {
        let Some(id) = self.resolve(scope, name) else {
            return false;
        };
        self.scope_mut(id)
            .map(|s| s.vars.shift_remove(name).is_some())
            .unwrap_or(false)
    }

    /// Declaration-ordered copy of the values bound directly in `scope`.
    pub fn snapshot(&self, scope: ScopeId) -> IndexMap<String, Value> {
        self.scope(scope)
            .map(|s| {
                s.vars
                    .iter()
                    .map(|(name, var)| (name.clone(), var.value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_declare_and_get() {
        let mut env = Environment::new();
        let g = env.global();
        env.declare(g, "x", TypeTag::Int, Value::Float(3.7)).unwrap();
        assert_eq!(env.get(g, "x"), Ok(&Value::Int(3)));
    }

    #[test]
    fn test_redeclare_same_scope_fails() {
        let mut env = Environment::new();
        let g = env.global();
        env.declare(g, "x", TypeTag::Auto, Value::Int(1)).unwrap();
        assert_eq!(
            env.declare(g, "x", TypeTag::Auto, Value::Int(2)),
            Err(EnvError::AlreadyDeclared("x".into()))
        );
    }

    #[test]
    fn test_shadowing_in_child() {
        let mut env = Environment::new();
        let g = env.global();
        env.declare(g, "x", TypeTag::Auto, Value::Int(1)).unwrap();
        let child = env.push_scope(g);
        env.declare(child, "x", TypeTag::Auto, Value::Int(2)).unwrap();
        assert_eq!(env.get(child, "x"), Ok(&Value::Int(2)));
        env.release(child);
        assert_eq!(env.get(g, "x"), Ok(&Value::Int(1)));
    }

    #[test]
    fn test_set_walks_parents_and_coerces() {
        let mut env = Environment::new();
        let g = env.global();
        env.declare(g, "n", TypeTag::Int, Value::Int(0)).unwrap();
        let child = env.push_scope(g);
        env.set(child, "n", Value::Float(9.9)).unwrap();
        assert_eq!(env.get(g, "n"), Ok(&Value::Int(9)));
    }

    #[test]
    fn test_set_never_declares() {
        let mut env = Environment::new();
        let g = env.global();
        assert_eq!(
            env.set(g, "missing", Value::Null),
            Err(EnvError::Unknown("missing".into()))
        );
        assert!(env.get(g, "missing").is_err());
    }

    #[test]
    fn test_set_type_mismatch() {
        let mut env = Environment::new();
        let g = env.global();
        env.declare(g, "s", TypeTag::Str, Value::Str("a".into()))
            .unwrap();
        assert!(matches!(
            env.set(g, "s", Value::List(vec![])),
            Err(EnvError::Value(_))
        ));
    }

    #[test]
    fn test_set_or_declare() {
        let mut env = Environment::new();
        let g = env.global();
        env.declare(g, "outer", TypeTag::Auto, Value::Int(1)).unwrap();
        let child = env.push_scope(g);
        env.set_or_declare(child, "outer", Value::Int(5)).unwrap();
        env.set_or_declare(child, "fresh", Value::Int(7)).unwrap();
        assert_eq!(env.get(g, "outer"), Ok(&Value::Int(5)));
        assert!(env.get(g, "fresh").is_err());
        assert_eq!(env.get(child, "fresh"), Ok(&Value::Int(7)));
    }

    #[test]
    fn test_unset_removes_first_match() {
        let mut env = Environment::new();
        let g = env.global();
        env.declare(g, "x", TypeTag::Auto, Value::Int(1)).unwrap();
        let child = env.push_scope(g);
        env.declare(child, "x", TypeTag::Auto, Value::Int(2)).unwrap();
        assert!(env.unset(child, "x"));
        assert_eq!(env.get(child, "x"), Ok(&Value::Int(1)));
        assert!(env.unset(child, "x"));
        assert!(!env.unset(child, "x"));
    }

    #[test]
    fn test_released_slots_are_reused() {
        let mut env = Environment::new();
        let g = env.global();
        let a = env.push_scope(g);
        assert_eq!(env.live_scopes(), 2);
        assert_eq!(env.release(a), Some(g));
        assert_eq!(env.live_scopes(), 1);
        let b = env.push_scope(g);
        assert_eq!(a, b);
        assert!(env.get(b, "anything").is_err());
    }

    #[test]
    fn test_snapshot_keeps_declaration_order() {
        let mut env = Environment::new();
        let g = env.global();
        env.declare(g, "b", TypeTag::Auto, Value::Int(2)).unwrap();
        env.declare(g, "a", TypeTag::Auto, Value::Int(1)).unwrap();
        let names: Vec<_> = env.snapshot(g).keys().cloned().collect();
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
    }
}
