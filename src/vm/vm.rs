//! The bytecode virtual machine: stack-based execution engine.

use std::sync::Arc;

use bytes::Buf;
use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::environment::{Environment, ScopeId};
use crate::error::{RuntimeError, ValueError};
use crate::value::{ops, TypeTag, Value};

use super::builtins::BuiltinTable;
use super::module::{Module, HEADER_LEN};
use super::opcode::Op;

/// Resource limits for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Maximum call frames, the top-level frame included.
    pub max_frames: usize,
    /// Maximum operand stack depth.
    pub max_stack: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_frames: 4096,
            max_stack: 65536,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// `exit;`
    Halt,
    /// The instruction pointer reached the function table.
    EndOfCode,
    /// `return;` in top-level code.
    Returned,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub termination: Termination,
    /// Top-level bindings in declaration order.
    pub globals: IndexMap<String, Value>,
}

/// A call frame on the VM call stack.
#[derive(Debug, Clone)]
pub struct CallFrame {
    /// Where `Return` resumes. `None` for the top-level frame.
    pub return_ip: Option<usize>,
    /// Scope created for the call; its parameters live here.
    pub base: ScopeId,
    /// Innermost block scope currently open in this frame.
    pub scope: ScopeId,
    pub is_void: bool,
    pub has_typed_return: bool,
    pub return_type: TypeTag,
}

impl CallFrame {
    fn top_level(global: ScopeId) -> Self {
        Self {
            return_ip: None,
            base: global,
            scope: global,
            is_void: true,
            has_typed_return: false,
            return_type: TypeTag::Int,
        }
    }
}

/// The bytecode VM. Owns its stacks and scopes; the module is shared.
pub struct Vm {
    pub(super) module: Arc<Module>,
    pub(super) builtins: BuiltinTable,
    pub(super) config: VmConfig,
    pub(super) ip: usize,
    pub(super) stack: Vec<Value>,
    pub(super) frames: Vec<CallFrame>,
    pub(super) env: Environment,
}

impl Vm {
    pub fn new(module: Arc<Module>, builtins: BuiltinTable) -> Self {
        Self::with_config(module, builtins, VmConfig::default())
    }

    pub fn with_config(module: Arc<Module>, builtins: BuiltinTable, config: VmConfig) -> Self {
        Self {
            module,
            builtins,
            config,
            ip: 0,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(64),
            env: Environment::new(),
        }
    }

    /// Execute the module from its main entry. Every run starts from a
    /// fresh stack and environment.
    pub fn run(&mut self) -> Result<RunResult, RuntimeError> {
        self.env = Environment::new();
        self.stack.clear();
        self.frames.clear();
        self.frames.push(CallFrame::top_level(self.env.global()));
        self.ip = self.module.main_entry();

        let termination = self.execute()?;
        debug!(?termination, "run finished");
        Ok(RunResult {
            termination,
            globals: self.env.snapshot(self.env.global()),
        })
    }

    /// Operand stack left over from the last run.
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub fn live_scopes(&self) -> usize {
        self.env.live_scopes()
    }

    /// Run the dispatch loop.
    fn execute(&mut self) -> Result<Termination, RuntimeError> {
        let module = Arc::clone(&self.module);
        let code = module.code();

        while self.ip < code.len() {
            let at = self.ip;
            let byte = code[at];
            let op = Op::from_u8(byte)
                .ok_or_else(|| RuntimeError::malformed(format!("unknown opcode 0x{:02X}", byte), at))?;
            self.ip += 1;
            trace!(at, ?op, stack = self.stack.len(), "dispatch");

            match op {
                Op::PushInt => {
                    let n = read_i64(code, &mut self.ip, at)?;
                    self.push(Value::Int(n), at)?;
                }
                Op::PushFloat => {
                    let n = read_f64(code, &mut self.ip, at)?;
                    self.push(Value::Float(n), at)?;
                }
                Op::PushBool => {
                    let b = read_u8(code, &mut self.ip, at)? != 0;
                    self.push(Value::Bool(b), at)?;
                }
                Op::PushStr => {
                    let s = read_name(code, &mut self.ip, at)?;
                    self.push(Value::Str(s), at)?;
                }
                Op::PushNull => self.push(Value::Null, at)?,
                Op::MakeList => {
                    let count = read_count(code, &mut self.ip, at)?;
                    let items = self.pop_n(count, at)?;
                    self.push(Value::List(items), at)?;
                }

                Op::Get => {
                    let name = read_name(code, &mut self.ip, at)?;
                    let value = self
                        .env
                        .get(self.current_scope(), &name)
                        .map_err(|e| RuntimeError::from_env(e, at))?
                        .clone();
                    self.push(value, at)?;
                }
                Op::Set => {
                    let name = read_name(code, &mut self.ip, at)?;
                    let value = self.pop(at)?;
                    let scope = self.current_scope();
                    self.env
                        .set_or_declare(scope, &name, value)
                        .map_err(|e| RuntimeError::from_env(e, at))?;
                }
                Op::Decl => {
                    let name = read_name(code, &mut self.ip, at)?;
                    let tag = read_u8(code, &mut self.ip, at)?;
                    let declared = TypeTag::from_u8(tag)
                        .ok_or_else(|| RuntimeError::malformed(format!("unknown type tag {}", tag), at))?;
                    let value = self.pop(at)?;
                    let scope = self.current_scope();
                    self.env
                        .declare(scope, &name, declared, value)
                        .map_err(|e| RuntimeError::from_env(e, at))?;
                }
                Op::Unset => {
                    let name = read_name(code, &mut self.ip, at)?;
                    let scope = self.current_scope();
                    self.env.unset(scope, &name);
                }
                Op::Pop => {
                    self.pop(at)?;
                }

                Op::Add => self.binary(at, ops::add)?,
                Op::Subtract => self.binary(at, ops::subtract)?,
                Op::Multiply => self.binary(at, ops::multiply)?,
                Op::Divide => self.binary(at, ops::divide)?,
                Op::Negate => {
                    let a = self.pop(at)?;
                    let result = ops::negate(a).map_err(|e| RuntimeError::from_value(e, at))?;
                    self.push(result, at)?;
                }
                Op::Not => {
                    let a = self.pop(at)?;
                    self.push(ops::not(&a), at)?;
                }

                Op::Equal => {
                    let b = self.pop(at)?;
                    let a = self.pop(at)?;
                    self.push(Value::Bool(a == b), at)?;
                }
                Op::NotEqual => {
                    let b = self.pop(at)?;
                    let a = self.pop(at)?;
                    self.push(Value::Bool(a != b), at)?;
                }
                Op::Less => self.compare(at, ops::less)?,
                Op::LessEqual => self.compare(at, ops::less_equal)?,
                Op::Greater => self.compare(at, ops::greater)?,
                Op::GreaterEqual => self.compare(at, ops::greater_equal)?,

                Op::And => {
                    let b = self.pop(at)?;
                    let a = self.pop(at)?;
                    self.push(Value::Bool(a.as_bool() && b.as_bool()), at)?;
                }
                Op::Or => {
                    let b = self.pop(at)?;
                    let a = self.pop(at)?;
                    self.push(Value::Bool(a.as_bool() || b.as_bool()), at)?;
                }

                Op::Index => {
                    let index = self.pop(at)?;
                    let container = self.pop(at)?;
                    let value =
                        ops::index(&container, &index).map_err(|e| RuntimeError::from_value(e, at))?;
                    self.push(value, at)?;
                }
                Op::Slice => {
                    let end = self.pop(at)?;
                    let start = self.pop(at)?;
                    let container = self.pop(at)?;
                    let value = ops::slice(&container, &start, &end)
                        .map_err(|e| RuntimeError::from_value(e, at))?;
                    self.push(value, at)?;
                }
                Op::SetIndex => {
                    let name = read_name(code, &mut self.ip, at)?;
                    let value = self.pop(at)?;
                    let index = self.pop(at)?;
                    let scope = self.current_scope();
                    let target = self
                        .env
                        .get_mut(scope, &name)
                        .map_err(|e| RuntimeError::from_env(e, at))?;
                    ops::set_index(target, &index, value)
                        .map_err(|e| RuntimeError::from_value(e, at))?;
                }

                Op::Jump => {
                    let target = read_u64(code, &mut self.ip, at)?;
                    self.jump(target, code.len(), at)?;
                }
                Op::JumpIfFalse => {
                    let target = read_u64(code, &mut self.ip, at)?;
                    let condition = self.pop(at)?;
                    if !condition.as_bool() {
                        self.jump(target, code.len(), at)?;
                    }
                }

                Op::Call | Op::TailCall => {
                    let name = read_name(code, &mut self.ip, at)?;
                    let argc = read_count(code, &mut self.ip, at)?;
                    self.call(&name, argc, at, op == Op::TailCall)?;
                }
                Op::Return => {
                    let value = self.pop(at)?;
                    if let Some(termination) = self.op_return(Some(value), at)? {
                        return Ok(termination);
                    }
                }
                Op::ReturnVoid => {
                    if let Some(termination) = self.op_return(None, at)? {
                        return Ok(termination);
                    }
                }

                Op::EnterScope => {
                    let parent = self.current_scope();
                    let scope = self.env.push_scope(parent);
                    if let Some(frame) = self.frames.last_mut() {
                        frame.scope = scope;
                    }
                }
                Op::ExitScope => self.exit_scope(at)?,

                Op::Halt => return Ok(Termination::Halt),
            }
        }

        Ok(Termination::EndOfCode)
    }

    // --- Stack helpers ---

    pub(super) fn push(&mut self, value: Value, at: usize) -> Result<(), RuntimeError> {
        if self.stack.len() >= self.config.max_stack {
            return Err(RuntimeError::StackOverflow {
                limit: self.config.max_stack,
                at,
            });
        }
        self.stack.push(value);
        Ok(())
    }

    pub(super) fn pop(&mut self, at: usize) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow { at })
    }

    /// The top `count` values, oldest first.
    pub(super) fn pop_n(&mut self, count: usize, at: usize) -> Result<Vec<Value>, RuntimeError> {
        if count > self.stack.len() {
            return Err(RuntimeError::StackUnderflow { at });
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn binary(
        &mut self,
        at: usize,
        op: fn(Value, Value) -> Result<Value, ValueError>,
    ) -> Result<(), RuntimeError> {
        let b = self.pop(at)?;
        let a = self.pop(at)?;
        let result = op(a, b).map_err(|e| RuntimeError::from_value(e, at))?;
        self.push(result, at)
    }

    fn compare(
        &mut self,
        at: usize,
        op: fn(&Value, &Value) -> Result<bool, ValueError>,
    ) -> Result<(), RuntimeError> {
        let b = self.pop(at)?;
        let a = self.pop(at)?;
        let result = op(&a, &b).map_err(|e| RuntimeError::from_value(e, at))?;
        self.push(Value::Bool(result), at)
    }

    // --- Scope and control helpers ---

    pub(super) fn current_scope(&self) -> ScopeId {
        self.frames
            .last()
            .map(|frame| frame.scope)
            .unwrap_or_else(|| self.env.global())
    }

    fn exit_scope(&mut self, at: usize) -> Result<(), RuntimeError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(RuntimeError::malformed("no frame to exit a scope from", at));
        };
        if frame.scope == frame.base {
            return Err(RuntimeError::malformed("scope exit without a matching enter", at));
        }
        let parent = self
            .env
            .release(frame.scope)
            .ok_or_else(|| RuntimeError::malformed("scope has no parent", at))?;
        frame.scope = parent;
        Ok(())
    }

    fn jump(&mut self, target: u64, code_len: usize, at: usize) -> Result<(), RuntimeError> {
        if target < HEADER_LEN as u64 || target > code_len as u64 {
            return Err(RuntimeError::malformed(
                format!("jump target {} outside the code region", target),
                at,
            ));
        }
        self.ip = target as usize;
        Ok(())
    }
}

// --- Operand decoding ---

fn operand<'a>(code: &'a [u8], ip: &mut usize, n: usize, at: usize) -> Result<&'a [u8], RuntimeError> {
    let bytes = code
        .get(*ip..ip.saturating_add(n))
        .ok_or_else(|| RuntimeError::malformed("truncated operand", at))?;
    *ip += n;
    Ok(bytes)
}

fn read_u8(code: &[u8], ip: &mut usize, at: usize) -> Result<u8, RuntimeError> {
    let mut raw = operand(code, ip, 1, at)?;
    Ok(raw.get_u8())
}

fn read_u64(code: &[u8], ip: &mut usize, at: usize) -> Result<u64, RuntimeError> {
    let mut raw = operand(code, ip, 8, at)?;
    Ok(raw.get_u64_le())
}

fn read_i64(code: &[u8], ip: &mut usize, at: usize) -> Result<i64, RuntimeError> {
    let mut raw = operand(code, ip, 8, at)?;
    Ok(raw.get_i64_le())
}

fn read_f64(code: &[u8], ip: &mut usize, at: usize) -> Result<f64, RuntimeError> {
    let mut raw = operand(code, ip, 8, at)?;
    Ok(raw.get_f64_le())
}

fn read_count(code: &[u8], ip: &mut usize, at: usize) -> Result<usize, RuntimeError> {
    let n = read_u64(code, ip, at)?;
    usize::try_from(n).map_err(|_| RuntimeError::malformed(format!("count {} too large", n), at))
}

fn read_name(code: &[u8], ip: &mut usize, at: usize) -> Result<String, RuntimeError> {
    let len = read_count(code, ip, at)?;
    let raw = operand(code, ip, len, at)?;
    String::from_utf8(raw.to_vec()).map_err(|_| RuntimeError::malformed("name is not UTF-8", at))
}
