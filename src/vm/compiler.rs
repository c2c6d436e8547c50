//! Source-to-bytecode compiler.
//!
//! Single pass: a recursive-descent parser that emits instructions as it
//! recognizes each production. There is no syntax tree, so forward jumps
//! go through [`Chunk`] labels and are patched when the module is
//! assembled.

use std::collections::HashMap;

use tracing::debug;

use crate::error::CompileError;
use crate::lexer::{Scanner, Token, TokenKind};
use crate::span::Span;
use crate::value::TypeTag;

use super::chunk::{Chunk, Label};
use super::module::{FunctionEntry, Module};
use super::opcode::Op;

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;

/// Jump targets of one enclosing `while`.
#[derive(Debug, Clone, Copy)]
pub struct LoopContext {
    /// The loop condition; `continue` jumps here.
    pub continue_label: Label,
    /// First instruction past the loop; the false branch and every `break` land here.
    pub break_label: Label,
    /// Block depth outside the loop body.
    pub scope_depth: usize,
}

/// How a name visible to the compiler was bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Mutable,
    /// `let const`: assignment, `++`/`--` and `del` are rejected.
    Const,
}

/// The function whose body is being compiled.
#[derive(Debug, Clone, Copy)]
pub struct FunctionContext {
    pub is_void: bool,
    /// Declared with `func tail`: `return f(..);` becomes a tail call.
    pub is_tail: bool,
}

/// The compiler: transforms source text into a [`Module`].
pub struct Compiler {
    tokens: Vec<Token>,
    current: usize,
    pub(super) chunk: Chunk,
    pub(super) functions: Vec<FunctionEntry>,
    /// Names bound in each open block, innermost last.
    pub(super) scopes: Vec<HashMap<String, Binding>>,
    pub(super) loops: Vec<LoopContext>,
    /// `None` while compiling top-level code.
    pub(super) function: Option<FunctionContext>,
    /// Opcode offset and end offset of the most recently emitted call.
    pub(super) last_call: Option<(usize, usize)>,
    /// End offset of the most recent `return` statement.
    pub(super) last_return: Option<usize>,
}

impl Compiler {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            chunk: Chunk::new(),
            functions: vec![FunctionEntry::main()],
            scopes: vec![HashMap::new()],
            loops: Vec::new(),
            function: None,
            last_call: None,
            last_return: None,
        }
    }

    /// Compile a full program.
    pub fn compile(source: &str) -> CompileResult<Module> {
        let tokens = Scanner::new(source).scan_tokens()?;
        let mut compiler = Compiler::new(tokens);
        while !compiler.is_at_end() {
            compiler.statement()?;
        }
        compiler.finish()
    }

    fn finish(self) -> CompileResult<Module> {
        let span = self.peek().span;
        let function_count = self.functions.len();
        let module = Module::assemble(self.chunk, self.functions).map_err(|label| {
            CompileError::structural(format!("jump target {:?} was never placed", label), span)
        })?;
        debug!(
            functions = function_count,
            bytes = module.as_bytes().len(),
            "compiled module"
        );
        Ok(module)
    }

    // --- Token helpers ---

    pub(super) fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.current.min(last)]
    }

    pub(super) fn peek_kind_at(&self, distance: usize) -> Option<&TokenKind> {
        self.tokens.get(self.current + distance).map(|t| &t.kind)
    }

    pub(super) fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    pub(super) fn is_at_end(&self) -> bool {
        self.check(&TokenKind::Eof)
    }

    pub(super) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    pub(super) fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(super) fn consume(&mut self, kind: &TokenKind, context: &str) -> CompileResult<Token> {
        if self.check(kind) {
            return Ok(self.advance());
        }
        Err(self.error_at_current(format!("expected '{}' {}", kind, context)))
    }

    pub(super) fn consume_identifier(&mut self, context: &str) -> CompileResult<(String, Span)> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok((name, token.span))
            }
            _ => Err(self.error_at_current(format!("expected identifier {}", context))),
        }
    }

    pub(super) fn error_at_current(&self, message: impl Into<String>) -> CompileError {
        let token = self.peek();
        CompileError::syntax(
            format!("{}, found '{}'", message.into(), token.kind),
            token.span,
        )
    }

    /// Consume a type keyword if one is next.
    pub(super) fn match_type(&mut self) -> Option<TypeTag> {
        let tag = match self.peek().kind {
            TokenKind::Int => TypeTag::Int,
            TokenKind::Float => TypeTag::Float,
            TokenKind::Bool => TypeTag::Bool,
            TokenKind::Str => TypeTag::Str,
            TokenKind::List => TypeTag::List,
            TokenKind::Auto => TypeTag::Auto,
            _ => return None,
        };
        self.advance();
        Some(tag)
    }

    // --- Emission helpers ---

    pub(super) fn emit(&mut self, op: Op) -> usize {
        self.chunk.emit_op(op)
    }

    /// Emit an instruction whose only operand is a name.
    pub(super) fn emit_named(&mut self, op: Op, name: &str) -> usize {
        let offset = self.chunk.emit_op(op);
        self.chunk.emit_str(name);
        offset
    }

    pub(super) fn emit_jump(&mut self, op: Op, label: Label) {
        self.chunk.emit_jump(op, label);
    }

    pub(super) fn emit_call(&mut self, name: &str, argc: usize) {
        let offset = self.emit_named(Op::Call, name);
        self.chunk.emit_u64(argc as u64);
        self.last_call = Some((offset, self.chunk.len()));
    }

    // --- Scope management ---

    pub(super) fn begin_scope(&mut self) {
        self.emit(Op::EnterScope);
        self.scopes.push(HashMap::new());
    }

    pub(super) fn end_scope(&mut self) {
        self.emit(Op::ExitScope);
        self.scopes.pop();
    }

    /// Record a `let` in the innermost block, rejecting a second one.
    pub(super) fn declare_local(
        &mut self,
        name: &str,
        binding: Binding,
        span: Span,
    ) -> CompileResult<()> {
        let Some(scope) = self.scopes.last_mut() else {
            return Err(CompileError::structural("declaration outside any scope", span));
        };
        if scope.contains_key(name) {
            return Err(CompileError::structural(
                format!("'{}' is already declared in this scope", name),
                span,
            ));
        }
        scope.insert(name.to_string(), binding);
        Ok(())
    }

    /// Innermost binding of `name` among the open blocks.
    pub(super) fn lookup_local(&self, name: &str) -> Option<Binding> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    /// Reject writes to a name bound with `let const`.
    pub(super) fn check_assignable(&self, name: &str, span: Span) -> CompileResult<()> {
        match self.lookup_local(name) {
            Some(Binding::Const) => Err(CompileError::structural(
                format!("cannot modify constant '{}'", name),
                span,
            )),
            _ => Ok(()),
        }
    }

    /// A top-level `x = e;` on an unbound name declares `x` in the current block.
    ///
    /// Inside a function body the runtime walks the caller's scopes, so the
    /// outcome is only known at run time.
    pub(super) fn record_assignment(&mut self, name: &str) {
        if self.function.is_some() || self.lookup_local(name).is_some() {
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), Binding::Mutable);
        }
    }

    /// Forget `name` in the innermost block that bound it (after `del`).
    pub(super) fn forget_local(&mut self, name: &str) {
        if let Some(scope) = self.scopes.iter_mut().rev().find(|s| s.contains_key(name)) {
            scope.remove(name);
        }
    }

    // --- Loop management ---

    pub(super) fn begin_loop(&mut self, continue_label: Label, break_label: Label) {
        self.loops.push(LoopContext {
            continue_label,
            break_label,
            scope_depth: self.scopes.len(),
        });
    }

    pub(super) fn end_loop(&mut self) {
        self.loops.pop();
    }

    /// The `depth`-th enclosing loop, 1 being the innermost.
    pub(super) fn enclosing_loop(
        &self,
        depth: usize,
        keyword: &str,
        span: Span,
    ) -> CompileResult<LoopContext> {
        if self.loops.is_empty() {
            return Err(CompileError::structural(
                format!("'{}' outside of a loop", keyword),
                span,
            ));
        }
        if depth == 0 || depth > self.loops.len() {
            return Err(CompileError::structural(
                format!(
                    "'{} {}' but only {} enclosing loop(s)",
                    keyword,
                    depth,
                    self.loops.len()
                ),
                span,
            ));
        }
        Ok(self.loops[self.loops.len() - depth])
    }

    /// Close the blocks opened inside `target` before jumping out of it.
    pub(super) fn exit_scopes_to(&mut self, target: &LoopContext) {
        for _ in target.scope_depth..self.scopes.len() {
            self.emit(Op::ExitScope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileError;
    use pretty_assertions::assert_eq;

    fn compile_err(source: &str) -> CompileError {
        match Compiler::compile(source) {
            Ok(_) => panic!("expected a compile error for {source:?}"),
            Err(err) => err,
        }
    }

    #[test]
    fn test_empty_program() {
        let module = Compiler::compile("").unwrap();
        assert_eq!(module.main_entry(), module.table_offset());
        assert_eq!(module.functions().len(), 1);
        assert!(module.functions()[0].is_void);
    }

    #[test]
    fn test_functions_registered_in_table() {
        let module =
            Compiler::compile("func int add(a, b) { return a + b; } func void hi() { }").unwrap();
        let add = module.function("add").unwrap();
        assert_eq!(add.params, vec!["a".to_string(), "b".to_string()]);
        assert!(add.has_typed_return);
        assert_eq!(add.return_type, TypeTag::Int);
        assert!(!add.is_void);
        assert!(module.function("hi").unwrap().is_void);
        assert!((add.entry as usize) < module.table_offset());
    }

    #[test]
    fn test_untyped_function() {
        let module = Compiler::compile("func id(x) { return x; }").unwrap();
        let id = module.function("id").unwrap();
        assert!(!id.has_typed_return);
        assert!(!id.is_void);
    }

    #[test]
    fn test_tail_call_rewrites_opcode() {
        let module = Compiler::compile(
            "func tail int count(n) { if (n == 0) { return 0; } return count(n - 1); }",
        )
        .unwrap();
        assert!(module.code().contains(&(Op::TailCall as u8)));

        let plain =
            Compiler::compile("func int count(n) { if (n == 0) { return 0; } return count(n - 1); }")
                .unwrap();
        assert!(!plain.code().contains(&(Op::TailCall as u8)));
    }

    #[test]
    fn test_missing_semicolon() {
        assert!(matches!(compile_err("let x = 1"), CompileError::Syntax { .. }));
    }

    #[test]
    fn test_unterminated_block() {
        assert!(matches!(
            compile_err("while (true) { let x = 1;"),
            CompileError::Syntax { .. }
        ));
    }

    #[test]
    fn test_stray_closing_brace() {
        assert!(matches!(compile_err("}"), CompileError::Syntax { .. }));
    }

    #[test]
    fn test_break_outside_loop() {
        assert!(matches!(compile_err("break;"), CompileError::Structural { .. }));
        assert!(matches!(compile_err("continue;"), CompileError::Structural { .. }));
    }

    #[test]
    fn test_break_depth_too_large() {
        assert!(matches!(
            compile_err("while (true) { break 2; }"),
            CompileError::Structural { .. }
        ));
    }

    #[test]
    fn test_break_does_not_cross_function_bodies() {
        assert!(matches!(
            compile_err("while (true) { func f() { break; } }"),
            CompileError::Structural { .. }
        ));
    }

    #[test]
    fn test_duplicate_let_in_same_scope() {
        assert!(matches!(
            compile_err("let x = 1; let x = 2;"),
            CompileError::Structural { .. }
        ));
        assert!(matches!(
            compile_err("func f(a) { let a = 1; }"),
            CompileError::Structural { .. }
        ));
        assert!(Compiler::compile("let x = 1; { let x = 2; }").is_ok());
        assert!(Compiler::compile("let x = 1; del x; let x = 2;").is_ok());
    }

    #[test]
    fn test_assignment_then_let_in_same_scope() {
        assert!(matches!(
            compile_err("x = 1; let x = 2;"),
            CompileError::Structural { .. }
        ));
        assert!(matches!(
            compile_err("{ y = 1; let y = 2; }"),
            CompileError::Structural { .. }
        ));
        assert!(Compiler::compile("{ y = 1; } let y = 2;").is_ok());
        assert!(Compiler::compile("let z = 0; { z = 1; let z = 2; }").is_ok());
        assert!(Compiler::compile("func f() { w = 1; let w = 2; }").is_ok());
    }

    #[test]
    fn test_const_bindings_reject_writes() {
        for source in [
            "let const int k = 1; k = 2;",
            "let const k = 1; { k = 2; }",
            "let const list l = [1]; l[0] = 2;",
            "let const int k = 1; ++k;",
            "let const int k = 1; --k;",
            "let const int k = 1; del k;",
        ] {
            assert!(
                matches!(compile_err(source), CompileError::Structural { .. }),
                "{source}"
            );
        }
        assert!(Compiler::compile("let const k = 1; { let k = 2; k = 3; }").is_ok());
        assert!(Compiler::compile("let const static int k = 1; let j = k + 1;").is_ok());
    }

    #[test]
    fn test_passthrough_declarations() {
        assert!(Compiler::compile("import \"math\"; import util;").is_ok());
        let module = Compiler::compile("func inline tail int f(n) { return n; }").unwrap();
        assert!(module.function("f").is_some());
        assert!(Compiler::compile("let null x;").is_ok());
        assert!(matches!(
            compile_err("let null x = 1;"),
            CompileError::Syntax { .. }
        ));
        assert!(matches!(compile_err("import 1;"), CompileError::Syntax { .. }));
    }

    #[test]
    fn test_duplicate_function() {
        assert!(matches!(
            compile_err("func f() {} func f() {}"),
            CompileError::Structural { .. }
        ));
    }

    #[test]
    fn test_duplicate_parameter() {
        assert!(matches!(
            compile_err("func f(a, a) {}"),
            CompileError::Structural { .. }
        ));
    }

    #[test]
    fn test_literal_type_error() {
        assert!(matches!(
            compile_err("let int x = \"five\";"),
            CompileError::Type { .. }
        ));
        assert!(matches!(
            compile_err("let str s = 1.5;"),
            CompileError::Type { .. }
        ));
        assert!(Compiler::compile("let int x = 3.7;").is_ok());
    }

    #[test]
    fn test_return_rules() {
        assert!(matches!(
            compile_err("func void f() { return 1; }"),
            CompileError::Structural { .. }
        ));
        assert!(matches!(
            compile_err("func int f() { return; }"),
            CompileError::Structural { .. }
        ));
        assert!(matches!(compile_err("return 1;"), CompileError::Structural { .. }));
        assert!(Compiler::compile("return;").is_ok());
    }

    #[test]
    fn test_error_reports_position() {
        let err = compile_err("let x = 1;\nlet y = ;");
        assert_eq!(err.span().line, 2);
    }
}
