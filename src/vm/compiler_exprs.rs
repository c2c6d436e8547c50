//! Expression compilation.
//!
//! Precedence climbing, lowest first: `||`, `&&`, comparison and equality,
//! `+ -`, `* /`, unary `- !`, postfix indexing, primary. Each level emits
//! its operands and then its operator.

use crate::lexer::TokenKind;

use super::compiler::{CompileResult, Compiler};
use super::opcode::Op;

impl Compiler {
    pub(super) fn expression(&mut self) -> CompileResult<()> {
        self.logical_or()
    }

    fn logical_or(&mut self) -> CompileResult<()> {
        self.logical_and()?;
        while self.match_token(&TokenKind::Or) {
            self.logical_and()?;
            self.emit(Op::Or);
        }
        Ok(())
    }

    fn logical_and(&mut self) -> CompileResult<()> {
        self.comparison()?;
        while self.match_token(&TokenKind::And) {
            self.comparison()?;
            self.emit(Op::And);
        }
        Ok(())
    }

    fn comparison(&mut self) -> CompileResult<()> {
        self.additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqualEqual => Op::Equal,
                TokenKind::BangEqual => Op::NotEqual,
                TokenKind::Less => Op::Less,
                TokenKind::LessEqual => Op::LessEqual,
                TokenKind::Greater => Op::Greater,
                TokenKind::GreaterEqual => Op::GreaterEqual,
                _ => return Ok(()),
            };
            self.advance();
            self.additive()?;
            self.emit(op);
        }
    }

    fn additive(&mut self) -> CompileResult<()> {
        self.multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => Op::Add,
                TokenKind::Minus => Op::Subtract,
                _ => return Ok(()),
            };
            self.advance();
            self.multiplicative()?;
            self.emit(op);
        }
    }

    fn multiplicative(&mut self) -> CompileResult<()> {
        self.unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => Op::Multiply,
                TokenKind::Slash => Op::Divide,
                _ => return Ok(()),
            };
            self.advance();
            self.unary()?;
            self.emit(op);
        }
    }

    fn unary(&mut self) -> CompileResult<()> {
        if self.match_token(&TokenKind::Minus) {
            self.unary()?;
            self.emit(Op::Negate);
            return Ok(());
        }
        if self.match_token(&TokenKind::Bang) {
            self.unary()?;
            self.emit(Op::Not);
            return Ok(());
        }
        self.postfix()
    }

    /// `a[i]` and `a[i:j]`, chained.
    fn postfix(&mut self) -> CompileResult<()> {
        self.primary()?;
        while self.match_token(&TokenKind::LeftBracket) {
            self.expression()?;
            if self.match_token(&TokenKind::Colon) {
                self.expression()?;
                self.consume(&TokenKind::RightBracket, "after slice")?;
                self.emit(Op::Slice);
            } else {
                self.consume(&TokenKind::RightBracket, "after index")?;
                self.emit(Op::Index);
            }
        }
        Ok(())
    }

    fn primary(&mut self) -> CompileResult<()> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::IntLiteral(n) => {
                self.advance();
                self.emit(Op::PushInt);
                self.chunk.emit_i64(n);
            }
            TokenKind::FloatLiteral(f) => {
                self.advance();
                self.emit(Op::PushFloat);
                self.chunk.emit_f64(f);
            }
            TokenKind::StringLiteral(s) => {
                self.advance();
                self.emit_named(Op::PushStr, &s);
            }
            TokenKind::BoolLiteral(b) => {
                self.advance();
                self.emit(Op::PushBool);
                self.chunk.emit_u8(b as u8);
            }
            TokenKind::Null => {
                self.advance();
                self.emit(Op::PushNull);
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if self.match_token(&TokenKind::LeftParen) {
                    let argc = self.arguments(&TokenKind::RightParen)?;
                    self.emit_call(&name, argc);
                } else {
                    self.emit_named(Op::Get, &name);
                }
            }
            TokenKind::LeftParen => {
                self.advance();
                self.expression()?;
                self.consume(&TokenKind::RightParen, "after expression")?;
            }
            TokenKind::LeftBracket => {
                self.advance();
                let count = self.arguments(&TokenKind::RightBracket)?;
                self.emit(Op::MakeList);
                self.chunk.emit_u64(count as u64);
            }
            _ => return Err(self.error_at_current("expected expression")),
        }
        Ok(())
    }

    /// Comma-separated expressions up to and including `close`.
    fn arguments(&mut self, close: &TokenKind) -> CompileResult<usize> {
        let mut count = 0;
        if !self.check(close) {
            loop {
                self.expression()?;
                count += 1;
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(close, "to close the list")?;
        Ok(count)
    }
}
