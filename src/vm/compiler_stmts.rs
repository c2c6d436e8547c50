//! Statement compilation.

use std::collections::HashMap;

use tracing::debug;

use crate::error::CompileError;
use crate::lexer::TokenKind;
use crate::value::{TypeTag, Value};

use super::chunk::Label;
use super::compiler::{Binding, CompileResult, Compiler, FunctionContext};
use super::module::FunctionEntry;
use super::opcode::Op;

impl Compiler {
    pub(super) fn statement(&mut self) -> CompileResult<()> {
        let kind = self.peek().kind.clone();
        match kind {
            TokenKind::Let => self.let_statement(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::Break => self.break_statement(),
            TokenKind::Continue => self.continue_statement(),
            TokenKind::Func => self.function_declaration(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Exit => {
                self.advance();
                self.consume(&TokenKind::Semicolon, "after 'exit'")?;
                self.emit(Op::Halt);
                Ok(())
            }
            TokenKind::Del => self.del_statement(),
            TokenKind::Import => self.import_statement(),
            TokenKind::LeftBrace => self.block(),
            TokenKind::Plus if self.peek_kind_at(1) == Some(&TokenKind::Plus) => {
                self.step_statement(Op::Add)
            }
            TokenKind::Minus if self.peek_kind_at(1) == Some(&TokenKind::Minus) => {
                self.step_statement(Op::Subtract)
            }
            TokenKind::Identifier(_) if self.peek_kind_at(1) == Some(&TokenKind::Equal) => {
                self.assignment()
            }
            TokenKind::Identifier(_) if self.is_index_assignment() => self.index_assignment(),
            _ => self.expression_statement(),
        }
    }

    /// `{ stmt* }` with its own runtime scope.
    pub(super) fn block(&mut self) -> CompileResult<()> {
        self.consume(&TokenKind::LeftBrace, "to open a block")?;
        self.begin_scope();
        self.statements_until_brace()?;
        self.end_scope();
        Ok(())
    }

    fn statements_until_brace(&mut self) -> CompileResult<()> {
        while !self.check(&TokenKind::RightBrace) && !self.is_at_end() {
            self.statement()?;
        }
        self.consume(&TokenKind::RightBrace, "to close the block")?;
        Ok(())
    }

    /// `let [const] [static] [type | null] name [= expr];`
    fn let_statement(&mut self) -> CompileResult<()> {
        self.advance();
        let binding = if self.match_token(&TokenKind::Const) {
            Binding::Const
        } else {
            Binding::Mutable
        };
        // `static` has no runtime effect.
        self.match_token(&TokenKind::Static);
        // `let null x;` binds an untyped null and takes no initializer.
        let placeholder = self.match_token(&TokenKind::Null);
        let declared = if placeholder {
            TypeTag::Auto
        } else {
            self.match_type().unwrap_or(TypeTag::Auto)
        };
        let (name, span) = self.consume_identifier("after 'let'")?;

        if !placeholder && self.match_token(&TokenKind::Equal) {
            self.check_literal_initializer(declared)?;
            self.expression()?;
        } else {
            self.emit_default(declared);
        }
        self.consume(&TokenKind::Semicolon, "after variable declaration")?;

        self.declare_local(&name, binding, span)?;
        self.emit_named(Op::Decl, &name);
        self.chunk.emit_u8(declared as u8);
        Ok(())
    }

    /// A lone literal initializer must already fit the declared type.
    fn check_literal_initializer(&self, declared: TypeTag) -> CompileResult<()> {
        if self.peek_kind_at(1) != Some(&TokenKind::Semicolon) {
            return Ok(());
        }
        let token = self.peek();
        let literal = match &token.kind {
            TokenKind::IntLiteral(n) => Value::Int(*n),
            TokenKind::FloatLiteral(f) => Value::Float(*f),
            TokenKind::StringLiteral(s) => Value::Str(s.clone()),
            TokenKind::BoolLiteral(b) => Value::Bool(*b),
            TokenKind::Null => Value::Null,
            _ => return Ok(()),
        };
        let found = literal.type_name();
        literal.coerce_to(declared).map(|_| ()).map_err(|_| {
            CompileError::type_error(
                format!("cannot initialize a {} variable with a {} literal", declared, found),
                token.span,
            )
        })
    }

    fn emit_default(&mut self, declared: TypeTag) {
        self.emit_literal(&declared.default_value());
    }

    fn emit_literal(&mut self, value: &Value) {
        match value {
            Value::Int(n) => {
                self.emit(Op::PushInt);
                self.chunk.emit_i64(*n);
            }
            Value::Float(f) => {
                self.emit(Op::PushFloat);
                self.chunk.emit_f64(*f);
            }
            Value::Bool(b) => {
                self.emit(Op::PushBool);
                self.chunk.emit_u8(*b as u8);
            }
            Value::Str(s) => {
                self.emit_named(Op::PushStr, s);
            }
            Value::List(items) => {
                for item in items {
                    self.emit_literal(item);
                }
                self.emit(Op::MakeList);
                self.chunk.emit_u64(items.len() as u64);
            }
            Value::Null => {
                self.emit(Op::PushNull);
            }
        }
    }

    fn assignment(&mut self) -> CompileResult<()> {
        let (name, span) = self.consume_identifier("as assignment target")?;
        self.check_assignable(&name, span)?;
        self.consume(&TokenKind::Equal, "in assignment")?;
        self.expression()?;
        self.consume(&TokenKind::Semicolon, "after assignment")?;
        self.emit_named(Op::Set, &name);
        self.record_assignment(&name);
        Ok(())
    }

    /// `name[...] =` ahead, as opposed to an indexing expression.
    fn is_index_assignment(&self) -> bool {
        if self.peek_kind_at(1) != Some(&TokenKind::LeftBracket) {
            return false;
        }
        let mut depth = 0usize;
        let mut distance = 1;
        loop {
            match self.peek_kind_at(distance) {
                Some(TokenKind::LeftBracket) => depth += 1,
                Some(TokenKind::RightBracket) => {
                    depth -= 1;
                    if depth == 0 {
                        return self.peek_kind_at(distance + 1) == Some(&TokenKind::Equal);
                    }
                }
                None | Some(TokenKind::Eof) | Some(TokenKind::Semicolon) => return false,
                _ => {}
            }
            distance += 1;
        }
    }

    fn index_assignment(&mut self) -> CompileResult<()> {
        let (name, span) = self.consume_identifier("as assignment target")?;
        self.check_assignable(&name, span)?;
        self.consume(&TokenKind::LeftBracket, "before index")?;
        self.expression()?;
        self.consume(&TokenKind::RightBracket, "after index")?;
        self.consume(&TokenKind::Equal, "in indexed assignment")?;
        self.expression()?;
        self.consume(&TokenKind::Semicolon, "after assignment")?;
        self.emit_named(Op::SetIndex, &name);
        Ok(())
    }

    /// `++x;` or `--x;`, with `op` adding or subtracting one.
    fn step_statement(&mut self, op: Op) -> CompileResult<()> {
        let symbol = self.advance();
        self.advance();
        let context = format!("after '{}{}'", symbol.kind, symbol.kind);
        let (name, span) = self.consume_identifier(&context)?;
        self.check_assignable(&name, span)?;
        self.consume(&TokenKind::Semicolon, "to end the statement")?;
        self.emit_named(Op::Get, &name);
        self.emit(Op::PushInt);
        self.chunk.emit_i64(1);
        self.emit(op);
        self.emit_named(Op::Set, &name);
        Ok(())
    }

    fn if_statement(&mut self) -> CompileResult<()> {
        self.advance();
        let end = self.chunk.new_label();
        self.conditional_branch(end)?;
        while self.match_token(&TokenKind::Elif) {
            self.conditional_branch(end)?;
        }
        if self.match_token(&TokenKind::Else) {
            self.block()?;
        }
        self.chunk.bind(end);
        Ok(())
    }

    /// `(cond) { .. }` of an `if` or `elif`, jumping to `end` when taken.
    fn conditional_branch(&mut self, end: Label) -> CompileResult<()> {
        self.consume(&TokenKind::LeftParen, "before condition")?;
        self.expression()?;
        self.consume(&TokenKind::RightParen, "after condition")?;

        let next = self.chunk.new_label();
        self.emit_jump(Op::JumpIfFalse, next);
        self.block()?;
        self.emit_jump(Op::Jump, end);
        self.chunk.bind(next);
        Ok(())
    }

    fn while_statement(&mut self) -> CompileResult<()> {
        self.advance();
        let condition = self.chunk.new_label();
        self.chunk.bind(condition);

        self.consume(&TokenKind::LeftParen, "after 'while'")?;
        self.expression()?;
        self.consume(&TokenKind::RightParen, "after condition")?;

        let exit = self.chunk.new_label();
        self.emit_jump(Op::JumpIfFalse, exit);

        self.begin_loop(condition, exit);
        self.block()?;
        self.end_loop();

        self.emit_jump(Op::Jump, condition);
        self.chunk.bind(exit);
        Ok(())
    }

    /// `break;` or `break N;`
    fn break_statement(&mut self) -> CompileResult<()> {
        let keyword = self.advance();
        let explicit = match self.peek().kind {
            TokenKind::IntLiteral(n) => Some(n),
            _ => None,
        };
        let depth = match explicit {
            Some(n) => {
                self.advance();
                usize::try_from(n).unwrap_or(0)
            }
            None => 1,
        };
        self.consume(&TokenKind::Semicolon, "after 'break'")?;

        let target = self.enclosing_loop(depth, "break", keyword.span)?;
        self.exit_scopes_to(&target);
        self.emit_jump(Op::Jump, target.break_label);
        Ok(())
    }

    fn continue_statement(&mut self) -> CompileResult<()> {
        let keyword = self.advance();
        self.consume(&TokenKind::Semicolon, "after 'continue'")?;

        let target = self.enclosing_loop(1, "continue", keyword.span)?;
        self.exit_scopes_to(&target);
        self.emit_jump(Op::Jump, target.continue_label);
        Ok(())
    }

    /// `func [inline] [tail] [void|type] name(params) { body }`
    fn function_declaration(&mut self) -> CompileResult<()> {
        self.advance();
        // `inline` is a hint only; calls are never expanded.
        self.match_token(&TokenKind::Inline);
        let is_tail = self.match_token(&TokenKind::Tail);
        let (is_void, return_type) = if self.match_token(&TokenKind::Void) {
            (true, None)
        } else {
            (false, self.match_type().filter(|t| *t != TypeTag::Auto))
        };
        let (name, span) = self.consume_identifier("for function name")?;
        if self.functions.iter().any(|f| f.name == name) {
            return Err(CompileError::structural(
                format!("function '{}' is already defined", name),
                span,
            ));
        }

        self.consume(&TokenKind::LeftParen, "after function name")?;
        let mut params: Vec<String> = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                let (param, param_span) = self.consume_identifier("for parameter name")?;
                if params.contains(&param) {
                    return Err(CompileError::structural(
                        format!("duplicate parameter '{}'", param),
                        param_span,
                    ));
                }
                params.push(param);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "after parameters")?;

        let skip = self.chunk.new_label();
        self.emit_jump(Op::Jump, skip);

        // Registered before the body so the function can call itself.
        self.functions.push(FunctionEntry {
            name,
            entry: self.chunk.len() as u64,
            is_void,
            has_typed_return: return_type.is_some(),
            return_type: return_type.unwrap_or(TypeTag::Int),
            params: params.clone(),
        });

        let outer_loops = std::mem::take(&mut self.loops);
        let param_scope: HashMap<String, Binding> = params
            .into_iter()
            .map(|param| (param, Binding::Mutable))
            .collect();
        let outer_scopes = std::mem::replace(&mut self.scopes, vec![param_scope]);
        let outer_function = self
            .function
            .replace(FunctionContext { is_void, is_tail });

        let body = self
            .consume(&TokenKind::LeftBrace, "before function body")
            .and_then(|_| self.statements_until_brace());

        self.loops = outer_loops;
        self.scopes = outer_scopes;
        self.function = outer_function;
        body?;

        if self.last_return != Some(self.chunk.len()) {
            if is_void {
                self.emit(Op::ReturnVoid);
            } else {
                self.emit(Op::PushNull);
                self.emit(Op::Return);
            }
        }
        self.chunk.bind(skip);
        self.last_return = None;
        Ok(())
    }

    fn return_statement(&mut self) -> CompileResult<()> {
        let keyword = self.advance();
        let bare = self.check(&TokenKind::Semicolon);

        match (self.function, bare) {
            (None, true) | (Some(FunctionContext { is_void: true, .. }), true) => {
                self.advance();
                self.emit(Op::ReturnVoid);
            }
            (None, false) => {
                return Err(CompileError::structural(
                    "cannot return a value from top-level code",
                    keyword.span,
                ));
            }
            (Some(FunctionContext { is_void: true, .. }), false) => {
                return Err(CompileError::structural(
                    "cannot return a value from a void function",
                    keyword.span,
                ));
            }
            (Some(_), true) => {
                return Err(CompileError::structural(
                    "bare 'return' in a function that returns a value",
                    keyword.span,
                ));
            }
            (Some(context), false) => {
                let start = self.chunk.len();
                self.expression()?;
                self.consume(&TokenKind::Semicolon, "after return value")?;
                if context.is_tail {
                    if let Some((call, end)) = self.last_call {
                        if call >= start && end == self.chunk.len() {
                            self.chunk.rewrite_op(call, Op::TailCall);
                        }
                    }
                }
                self.emit(Op::Return);
            }
        }

        self.last_return = Some(self.chunk.len());
        Ok(())
    }

    fn del_statement(&mut self) -> CompileResult<()> {
        self.advance();
        let (name, span) = self.consume_identifier("after 'del'")?;
        self.check_assignable(&name, span)?;
        self.consume(&TokenKind::Semicolon, "after 'del'")?;
        self.emit_named(Op::Unset, &name);
        self.forget_local(&name);
        Ok(())
    }

    /// `import "name";` or `import name;` is accepted and emits nothing.
    fn import_statement(&mut self) -> CompileResult<()> {
        self.advance();
        let target = match self.peek().kind.clone() {
            TokenKind::StringLiteral(name) | TokenKind::Identifier(name) => name,
            _ => return Err(self.error_at_current("expected module name after 'import'")),
        };
        self.advance();
        self.consume(&TokenKind::Semicolon, "after import")?;
        debug!(module = %target, "import has no effect");
        Ok(())
    }

    fn expression_statement(&mut self) -> CompileResult<()> {
        self.expression()?;
        self.consume(&TokenKind::Semicolon, "after expression")?;
        self.emit(Op::Pop);
        Ok(())
    }
}
