//! Bytecode toolchain for minis: compiles source straight to a module
//! image and executes it on a stack-based VM.

pub mod builtins;
pub mod chunk;
pub mod compiler;
pub mod compiler_exprs;
pub mod compiler_stmts;
pub mod module;
pub mod opcode;
#[allow(clippy::module_inception)]
pub mod vm;
pub mod vm_calls;

pub use builtins::{Builtin, BuiltinTable};
pub use chunk::{Chunk, Label};
pub use compiler::Compiler;
pub use module::{FunctionEntry, Module};
pub use opcode::Op;
pub use vm::{RunResult, Termination, Vm, VmConfig};
