//! End-to-end programs through the public host API.

use std::sync::{Arc, Mutex};
use std::thread;

use minis::{BuiltinTable, CompileError, MinisError, RuntimeError, Termination, Value, VmConfig};
use pretty_assertions::assert_eq;

/// A host table whose `print` appends to a shared buffer.
fn capturing() -> (BuiltinTable, Arc<Mutex<Vec<String>>>) {
    let out = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&out);
    let table = BuiltinTable::new().with("print", None, move |args| {
        let line = args
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        sink.lock().map_err(|e| e.to_string())?.push(line);
        Ok(Value::Null)
    });
    (table, out)
}

fn output_of(source: &str) -> Vec<String> {
    let (table, out) = capturing();
    minis::exec(source, table).unwrap();
    let lines = out.lock().unwrap().clone();
    lines
}

#[test]
fn arithmetic_calls_lists_and_division() {
    let r = minis::exec("let int x = 2; let int y = 3; let int z = x + y * 2;", BuiltinTable::new())
        .unwrap();
    assert_eq!(r.globals["z"], Value::Int(8));

    let r = minis::exec(
        "func int add(a,b){ return a+b; } let int r = add(2,3);",
        BuiltinTable::new(),
    )
    .unwrap();
    assert_eq!(r.globals["r"], Value::Int(5));

    let r = minis::exec("let list l = [1,2,3]; let list m = l + [4];", BuiltinTable::new()).unwrap();
    assert_eq!(
        r.globals["m"],
        Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)])
    );

    let r = minis::exec("let x = 5 / 2;", BuiltinTable::new()).unwrap();
    assert!(matches!(r.globals["x"], Value::Float(f) if f == 2.5));
}

#[test]
fn arity_mismatch_is_a_runtime_error() {
    let err = minis::exec(
        "func int add(a,b){ return a+b; } let r = add(1);",
        BuiltinTable::new(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        MinisError::Runtime(RuntimeError::ArityMismatch { expected: 2, got: 1, .. })
    ));
}

#[test]
fn loop_body_runs_exactly_three_times() {
    let lines = output_of("let int i = 0; while (i < 3) { i = i + 1; print(\"tick\", i); }");
    assert_eq!(lines, vec!["tick 1", "tick 2", "tick 3"]);
}

#[test]
fn loop_locals_are_fresh_each_iteration() {
    let lines = output_of(
        "let i = 0;
         while (i < 3) {
             let int seen;
             print(seen);
             seen = i;
             i = i + 1;
         }",
    );
    assert_eq!(lines, vec!["0", "0", "0"]);
}

#[test]
fn nested_blocks_shadow_and_restore() {
    let lines = output_of(
        "let x = \"outer\";
         {
             let x = \"inner\";
             print(x);
         }
         print(x);",
    );
    assert_eq!(lines, vec!["inner", "outer"]);
}

#[test]
fn assignment_reaches_enclosing_scope() {
    let lines = output_of(
        "let total = 0;
         func void bump(n) { total = total + n; }
         bump(3); bump(4);
         print(total);",
    );
    assert_eq!(lines, vec!["7"]);
}

#[test]
fn print_formats_values() {
    let lines = output_of("print(1, 2.0, 2.5, true, \"s\", [1, [2]], null);");
    assert_eq!(lines, vec!["1 2.0 2.5 true s [1, [2]] null"]);
}

#[test]
fn comments_are_ignored() {
    let lines = output_of(
        "// line comment
         /* block /* nested */ still comment */
         print('single quoted');",
    );
    assert_eq!(lines, vec!["single quoted"]);
}

#[test]
fn dotted_builtin_names() {
    let calls = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&calls);
    let table = BuiltinTable::new().with("Screen.clear", Some(0), move |_| {
        *counter.lock().map_err(|e| e.to_string())? += 1;
        Ok(Value::Null)
    });
    minis::exec("Screen.clear(); Screen.clear();", table).unwrap();
    assert_eq!(*calls.lock().unwrap(), 2);
}

#[test]
fn exit_stops_the_program() {
    let (table, out) = capturing();
    let result = minis::exec("print(1); exit; print(2);", table).unwrap();
    assert_eq!(result.termination, Termination::Halt);
    assert_eq!(*out.lock().unwrap(), vec!["1"]);
}

#[test]
fn deep_tail_recursion_beyond_frame_limit() {
    let module = minis::compile(
        "func tail int count(n, acc) {
             if (n == 0) { return acc; }
             return count(n - 1, acc + 2);
         }
         let r = count(100000, 0);",
    )
    .unwrap();
    let config = VmConfig {
        max_frames: 64,
        ..VmConfig::default()
    };
    let result = minis::run_with_config(Arc::new(module), BuiltinTable::new(), config).unwrap();
    assert_eq!(result.globals["r"], Value::Int(200000));
}

#[test]
fn tail_call_into_a_different_function() {
    let result = minis::exec(
        "func tail int even(n) { if (n == 0) { return 1; } return odd(n - 1); }
         func tail int odd(n) { if (n == 0) { return 0; } return even(n - 1); }
         let e = even(1001);",
        BuiltinTable::new(),
    )
    .unwrap();
    assert_eq!(result.globals["e"], Value::Int(0));
}

#[test]
fn compile_errors_carry_categories() {
    assert!(matches!(
        minis::compile("let x = ;"),
        Err(CompileError::Syntax { .. })
    ));
    assert!(matches!(
        minis::compile("let str s = 1;"),
        Err(CompileError::Type { .. })
    ));
    assert!(matches!(
        minis::compile("continue;"),
        Err(CompileError::Structural { .. })
    ));
    assert!(matches!(
        minis::compile("let s = \"open"),
        Err(CompileError::Syntax { .. })
    ));
}

#[test]
fn runtime_errors_report_the_failing_instruction() {
    let module = minis::compile("let a = 1; let b = nope;").unwrap();
    let err = minis::run(Arc::new(module.clone()), BuiltinTable::new()).unwrap_err();
    assert!(err.is_name_error());
    assert!(err.at() >= module.main_entry() && err.at() < module.table_offset());
}

#[test]
fn one_module_many_threads() {
    let module = Arc::new(
        minis::compile(
            "func int fib(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); }
             let r = fib(12);",
        )
        .unwrap(),
    );

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let module = Arc::clone(&module);
            thread::spawn(move || minis::run(module, BuiltinTable::new()))
        })
        .collect();

    for handle in handles {
        let result = handle.join().unwrap().unwrap();
        assert_eq!(result.globals["r"], Value::Int(144));
    }
}
