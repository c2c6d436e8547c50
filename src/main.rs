//! minis CLI: compile, load and run minis programs.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use minis::{BuiltinTable, MinisError, Module, Termination, Value, VmConfig};

#[derive(Parser, Debug)]
#[command(name = "minis", version)]
#[command(about = "Compile and run minis programs")]
struct Cli {
    /// Maximum call depth before a run is aborted
    #[arg(long, global = true)]
    max_frames: Option<usize>,

    /// Maximum operand stack depth
    #[arg(long, global = true)]
    max_stack: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a source file into a module image
    Compile {
        src: PathBuf,

        /// Output path (default: the source path with an `.avo` extension)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Load and run a compiled module
    Run { module: PathBuf },
    /// Compile and run a source file without writing a module
    Exec { src: PathBuf },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    let mut config = VmConfig::default();
    if let Some(max_frames) = cli.max_frames {
        config.max_frames = max_frames;
    }
    if let Some(max_stack) = cli.max_stack {
        config.max_stack = max_stack;
    }

    let result = match &cli.command {
        Command::Compile { src, out } => compile_file(src, out.as_deref()),
        Command::Run { module } => run_file(module, config),
        Command::Exec { src } => exec_file(src, config),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

fn compile_file(src: &Path, out: Option<&Path>) -> Result<(), MinisError> {
    let source = fs::read_to_string(src)?;
    let module = minis::compile(&source)?;
    let out = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| src.with_extension("avo"));
    fs::write(&out, module.as_bytes())?;
    info!(
        path = %out.display(),
        bytes = module.as_bytes().len(),
        "wrote module"
    );
    Ok(())
}

fn run_file(path: &Path, config: VmConfig) -> Result<(), MinisError> {
    let bytes = fs::read(path)?;
    let module = minis::load_module(&bytes)?;
    run_module(module, config)
}

fn exec_file(src: &Path, config: VmConfig) -> Result<(), MinisError> {
    let source = fs::read_to_string(src)?;
    let module = minis::compile(&source)?;
    run_module(module, config)
}

fn run_module(module: Module, config: VmConfig) -> Result<(), MinisError> {
    let result = minis::run_with_config(Arc::new(module), host_builtins(), config)?;
    std::io::stdout().flush()?;
    if result.termination == Termination::Halt {
        info!("program called exit");
    }
    Ok(())
}

/// The toy host table the CLI runs programs against.
fn host_builtins() -> BuiltinTable {
    BuiltinTable::new()
        .with("print", None, |args| {
            print!("{}", join(args));
            Ok(Value::Null)
        })
        .with("println", None, |args| {
            println!("{}", join(args));
            Ok(Value::Null)
        })
        .with("len", Some(1), |args| match &args[0] {
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::List(items) => Ok(Value::Int(items.len() as i64)),
            other => Err(format!("len() expects a str or list, got {}", other.type_name())),
        })
        .with("str", Some(1), |args| Ok(Value::Str(args[0].to_string())))
        .with("int", Some(1), |args| match &args[0] {
            Value::Str(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| format!("int() cannot parse '{}'", s)),
            other => other.as_int().map(Value::Int).map_err(|e| e.to_string()),
        })
        .with("float", Some(1), |args| match &args[0] {
            Value::Str(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("float() cannot parse '{}'", s)),
            other => other.as_float().map(Value::Float).map_err(|e| e.to_string()),
        })
}

fn join(args: &[Value]) -> String {
    args.iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
