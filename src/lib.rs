//! minis: a small scripting language compiled straight to bytecode.
//!
//! This is the library root that exports all modules.
//!
//! # Pipeline
//!
//! Source text is compiled in a single pass into a [`Module`], a
//! self-contained `AVOCADO1` image that can be written to disk and loaded
//! back bit for bit. A [`Vm`] executes a module against a host-supplied
//! [`BuiltinTable`]; the library itself defines no builtins.
//!
//! ```
//! use std::sync::Arc;
//!
//! let module = minis::compile("let int x = 2; let int z = x + 3 * 2;").unwrap();
//! let result = minis::run(Arc::new(module), minis::BuiltinTable::new()).unwrap();
//! assert_eq!(result.globals["z"], minis::Value::Int(8));
//! ```

// Allow some clippy lints that are stylistic and not critical
#![allow(clippy::module_inception)]
#![allow(clippy::result_large_err)]
#![allow(clippy::type_complexity)]
#![allow(clippy::new_without_default)]

pub mod environment;
pub mod error;
pub mod lexer;
pub mod span;
pub mod value;
pub mod vm;

use std::sync::Arc;

pub use error::{CompileError, FormatError, MinisError, RuntimeError};
pub use value::{TypeTag, Value};
pub use vm::{Builtin, BuiltinTable, Module, RunResult, Termination, Vm, VmConfig};

/// Compile source text into a module.
pub fn compile(source: &str) -> Result<Module, CompileError> {
    vm::Compiler::compile(source)
}

/// Load a serialized module. Either the whole module loads or nothing does.
pub fn load_module(bytes: &[u8]) -> Result<Module, FormatError> {
    Module::from_bytes(bytes)
}

/// Run a module to completion with the default limits.
pub fn run(module: Arc<Module>, builtins: BuiltinTable) -> Result<RunResult, RuntimeError> {
    run_with_config(module, builtins, VmConfig::default())
}

/// Run a module to completion with explicit limits.
pub fn run_with_config(
    module: Arc<Module>,
    builtins: BuiltinTable,
    config: VmConfig,
) -> Result<RunResult, RuntimeError> {
    Vm::with_config(module, builtins, config).run()
}

/// Compile and run source text in memory.
pub fn exec(source: &str, builtins: BuiltinTable) -> Result<RunResult, MinisError> {
    let module = compile(source)?;
    Ok(run(Arc::new(module), builtins)?)
}
