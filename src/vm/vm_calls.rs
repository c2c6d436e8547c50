//! Function call dispatch for the VM.

use std::sync::Arc;

use crate::environment::ScopeId;
use crate::error::RuntimeError;
use crate::value::{TypeTag, Value};

use super::module::{FunctionEntry, MAIN_FUNCTION};
use super::vm::{CallFrame, Termination, Vm};

impl Vm {
    /// Call `name` with the top `argc` stack values as arguments. User
    /// functions win over builtins of the same name.
    pub(super) fn call(
        &mut self,
        name: &str,
        argc: usize,
        at: usize,
        tail: bool,
    ) -> Result<(), RuntimeError> {
        let args = self.pop_n(argc, at)?;
        let module = Arc::clone(&self.module);

        if let Some(function) = module.function(name).filter(|f| f.name != MAIN_FUNCTION) {
            if argc != function.params.len() {
                return Err(RuntimeError::wrong_arity(
                    name,
                    function.params.len(),
                    argc,
                    at,
                ));
            }
            if tail && self.frames.len() > 1 {
                return self.replace_top_frame(function, args, at);
            }
            return self.call_function(function, args, at);
        }

        self.call_builtin(name, args, at)
    }

    fn call_function(
        &mut self,
        function: &FunctionEntry,
        args: Vec<Value>,
        at: usize,
    ) -> Result<(), RuntimeError> {
        if self.frames.len() >= self.config.max_frames {
            return Err(RuntimeError::CallDepthExceeded {
                limit: self.config.max_frames,
                at,
            });
        }

        let parent = self.current_scope();
        let scope = self.env.push_scope(parent);
        self.frames.push(CallFrame {
            return_ip: Some(self.ip),
            base: scope,
            scope,
            is_void: function.is_void,
            has_typed_return: function.has_typed_return,
            return_type: function.return_type,
        });
        self.bind_params(scope, function, args, at)?;
        self.ip = entry_offset(function, at)?;
        Ok(())
    }

    fn call_builtin(&mut self, name: &str, args: Vec<Value>, at: usize) -> Result<(), RuntimeError> {
        let Some(builtin) = self.builtins.get(name) else {
            return Err(RuntimeError::unknown_function(name, at));
        };
        if let Some(expected) = builtin.arity {
            if args.len() != expected {
                return Err(RuntimeError::wrong_arity(name, expected, args.len(), at));
            }
        }
        let result = builtin.call(&args).map_err(|message| RuntimeError::Builtin {
            name: name.to_string(),
            message,
            at,
        })?;
        self.push(result, at)
    }

    /// Reuse the current frame for `function`. The frame keeps its return
    /// address, so the callee returns straight to the original caller.
    fn replace_top_frame(
        &mut self,
        function: &FunctionEntry,
        args: Vec<Value>,
        at: usize,
    ) -> Result<(), RuntimeError> {
        let depth = self.frames.len();
        let caller_scope = self.frames[depth - 2].scope;
        let (base, scope) = {
            let frame = &self.frames[depth - 1];
            (frame.base, frame.scope)
        };
        self.release_scopes(scope, base);

        let scope = self.env.push_scope(caller_scope);
        let frame = &mut self.frames[depth - 1];
        frame.base = scope;
        frame.scope = scope;
        frame.is_void = function.is_void;
        frame.has_typed_return = function.has_typed_return;
        frame.return_type = function.return_type;

        self.bind_params(scope, function, args, at)?;
        self.ip = entry_offset(function, at)?;
        Ok(())
    }

    fn bind_params(
        &mut self,
        scope: ScopeId,
        function: &FunctionEntry,
        args: Vec<Value>,
        at: usize,
    ) -> Result<(), RuntimeError> {
        for (param, arg) in function.params.iter().zip(args) {
            self.env
                .declare(scope, param, TypeTag::Auto, arg)
                .map_err(|e| RuntimeError::from_env(e, at))?;
        }
        Ok(())
    }

    /// Leave the current frame. `value` is `None` for `ReturnVoid`.
    /// Returning from the top-level frame ends the run.
    pub(super) fn op_return(
        &mut self,
        value: Option<Value>,
        at: usize,
    ) -> Result<Option<Termination>, RuntimeError> {
        if self.frames.len() <= 1 {
            return Ok(Some(Termination::Returned));
        }
        let Some(frame) = self.frames.pop() else {
            return Ok(Some(Termination::Returned));
        };

        let value = match value {
            _ if frame.is_void => Value::Null,
            Some(v) if frame.has_typed_return => v
                .coerce_to(frame.return_type)
                .map_err(|e| RuntimeError::from_value(e, at))?,
            Some(v) => v,
            None => Value::Null,
        };

        self.release_scopes(frame.scope, frame.base);
        self.ip = frame
            .return_ip
            .ok_or_else(|| RuntimeError::malformed("return without a caller", at))?;
        self.push(value, at)?;
        Ok(None)
    }

    /// Release `scope` and its parents up to and including `base`.
    fn release_scopes(&mut self, mut scope: ScopeId, base: ScopeId) {
        loop {
            let parent = self.env.release(scope);
            if scope == base {
                break;
            }
            match parent {
                Some(next) => scope = next,
                None => break,
            }
        }
    }
}

fn entry_offset(function: &FunctionEntry, at: usize) -> Result<usize, RuntimeError> {
    usize::try_from(function.entry).map_err(|_| {
        RuntimeError::malformed(format!("entry of '{}' out of range", function.name), at)
    })
}
