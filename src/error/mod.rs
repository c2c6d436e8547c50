//! Error types for every stage: lexing, compiling, loading and running.

use crate::span::Span;
use thiserror::Error;

/// Lexer errors.
#[derive(Debug, Error)]
pub enum LexerError {
    #[error("Unexpected character '{0}' at {1}")]
    UnexpectedChar(char, Span),

    #[error("Unterminated string at {0}")]
    UnterminatedString(Span),

    #[error("Unterminated block comment at {0}")]
    UnterminatedComment(Span),

    #[error("Invalid escape sequence '\\{0}' at {1}")]
    InvalidEscape(char, Span),

    #[error("Invalid number '{0}' at {1}")]
    InvalidNumber(String, Span),
}

impl LexerError {
    pub fn unexpected_char(c: char, span: Span) -> Self {
        Self::UnexpectedChar(c, span)
    }

    pub fn unterminated_string(span: Span) -> Self {
        Self::UnterminatedString(span)
    }

    pub fn unterminated_comment(span: Span) -> Self {
        Self::UnterminatedComment(span)
    }

    pub fn invalid_escape(c: char, span: Span) -> Self {
        Self::InvalidEscape(c, span)
    }

    pub fn invalid_number(s: String, span: Span) -> Self {
        Self::InvalidNumber(s, span)
    }

    pub fn span(&self) -> Span {
        match self {
            Self::UnexpectedChar(_, span) => *span,
            Self::UnterminatedString(span) => *span,
            Self::UnterminatedComment(span) => *span,
            Self::InvalidEscape(_, span) => *span,
            Self::InvalidNumber(_, span) => *span,
        }
    }
}

/// Compile errors. Any of these aborts the compile; no module is produced.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Syntax error: {message} at {span}")]
    Syntax { message: String, span: Span },

    #[error("Type error: {message} at {span}")]
    Type { message: String, span: Span },

    #[error("Structural error: {message} at {span}")]
    Structural { message: String, span: Span },
}

impl CompileError {
    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::Syntax {
            message: message.into(),
            span,
        }
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::Type {
            message: message.into(),
            span,
        }
    }

    pub fn structural(message: impl Into<String>, span: Span) -> Self {
        Self::Structural {
            message: message.into(),
            span,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Self::Syntax { span, .. } => *span,
            Self::Type { span, .. } => *span,
            Self::Structural { span, .. } => *span,
        }
    }
}

impl From<LexerError> for CompileError {
    fn from(err: LexerError) -> Self {
        Self::Syntax {
            message: err.to_string(),
            span: err.span(),
        }
    }
}

/// Failures of the value operators and conversions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("cannot convert {from} to {to}")]
    Conversion {
        from: &'static str,
        to: &'static str,
    },

    #[error("unsupported operand types for '{op}': {left} and {right}")]
    Operands {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("unsupported operand type for '{op}': {operand}")]
    Operand {
        op: &'static str,
        operand: &'static str,
    },

    #[error("index {index} out of range for length {len}")]
    Index { index: i64, len: usize },
}

/// Environment lookup and binding failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    #[error("unknown variable '{0}'")]
    Unknown(String),

    #[error("'{0}' is already declared in this scope")]
    AlreadyDeclared(String),

    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Errors raised while loading a serialized module.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Truncated module: needed {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },

    #[error("Bad magic: not a minis module")]
    BadMagic,

    #[error("Function table offset {0} lies outside the module")]
    BadTableOffset(u64),

    #[error("Main entry {0} lies outside the code region")]
    BadMainEntry(u64),

    #[error("Function '{name}' has entry {entry} outside the code region")]
    BadEntry { name: String, entry: u64 },

    #[error("Unknown type tag {tag:#04x} at offset {offset}")]
    BadTypeTag { tag: u8, offset: usize },

    #[error("Invalid UTF-8 in name at offset {0}")]
    InvalidUtf8(usize),

    #[error("Duplicate function '{0}' in function table")]
    DuplicateFunction(String),

    #[error("{0} trailing bytes after the function table")]
    TrailingBytes(usize),
}

/// Runtime errors. Each carries the offset of the instruction that failed.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Unknown variable '{name}' at offset {at}")]
    UnknownVariable { name: String, at: usize },

    #[error("Unknown function '{name}' at offset {at}")]
    UnknownFunction { name: String, at: usize },

    #[error("Variable '{name}' is already declared in this scope at offset {at}")]
    AlreadyDeclared { name: String, at: usize },

    #[error("Type mismatch: {message} at offset {at}")]
    TypeMismatch { message: String, at: usize },

    #[error("Index {index} out of range for length {len} at offset {at}")]
    Index { index: i64, len: usize, at: usize },

    #[error("Function '{name}' expects {expected} arguments, got {got} at offset {at}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
        at: usize,
    },

    #[error("Stack underflow at offset {at}")]
    StackUnderflow { at: usize },

    #[error("Stack overflow (limit {limit}) at offset {at}")]
    StackOverflow { limit: usize, at: usize },

    #[error("Call depth exceeded (limit {limit}) at offset {at}")]
    CallDepthExceeded { limit: usize, at: usize },

    #[error("Builtin '{name}' failed: {message} at offset {at}")]
    Builtin {
        name: String,
        message: String,
        at: usize,
    },

    #[error("Malformed code: {message} at offset {at}")]
    MalformedCode { message: String, at: usize },
}

impl RuntimeError {
    pub fn unknown_variable(name: impl Into<String>, at: usize) -> Self {
        Self::UnknownVariable {
            name: name.into(),
            at,
        }
    }

    pub fn unknown_function(name: impl Into<String>, at: usize) -> Self {
        Self::UnknownFunction {
            name: name.into(),
            at,
        }
    }

    pub fn type_mismatch(message: impl Into<String>, at: usize) -> Self {
        Self::TypeMismatch {
            message: message.into(),
            at,
        }
    }

    pub fn wrong_arity(name: impl Into<String>, expected: usize, got: usize, at: usize) -> Self {
        Self::ArityMismatch {
            name: name.into(),
            expected,
            got,
            at,
        }
    }

    pub fn malformed(message: impl Into<String>, at: usize) -> Self {
        Self::MalformedCode {
            message: message.into(),
            at,
        }
    }

    pub fn from_value(err: ValueError, at: usize) -> Self {
        match err {
            ValueError::Index { index, len } => Self::Index { index, len, at },
            other => Self::TypeMismatch {
                message: other.to_string(),
                at,
            },
        }
    }

    pub fn from_env(err: EnvError, at: usize) -> Self {
        match err {
            EnvError::Unknown(name) => Self::UnknownVariable { name, at },
            EnvError::AlreadyDeclared(name) => Self::AlreadyDeclared { name, at },
            EnvError::Value(err) => Self::from_value(err, at),
        }
    }

    /// Offset of the failing instruction.
    pub fn at(&self) -> usize {
        match self {
            Self::UnknownVariable { at, .. }
            | Self::UnknownFunction { at, .. }
            | Self::AlreadyDeclared { at, .. }
            | Self::TypeMismatch { at, .. }
            | Self::Index { at, .. }
            | Self::ArityMismatch { at, .. }
            | Self::StackUnderflow { at }
            | Self::StackOverflow { at, .. }
            | Self::CallDepthExceeded { at, .. }
            | Self::Builtin { at, .. }
            | Self::MalformedCode { at, .. } => *at,
        }
    }

    /// Unknown names and clashing declarations.
    pub fn is_name_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownVariable { .. } | Self::UnknownFunction { .. } | Self::AlreadyDeclared { .. }
        )
    }
}

/// Unified error type for the host API and CLI.
#[derive(Debug, Error)]
pub enum MinisError {
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lexer_error_becomes_syntax_error() {
        let span = Span::new(3, 4, 1, 4);
        let err: CompileError = LexerError::unexpected_char('$', span).into();
        assert!(matches!(err, CompileError::Syntax { .. }));
        assert_eq!(err.span(), span);
    }

    #[test]
    fn test_value_index_error_maps_to_runtime_index() {
        let err = RuntimeError::from_value(ValueError::Index { index: 5, len: 2 }, 40);
        assert!(matches!(err, RuntimeError::Index { index: 5, len: 2, at: 40 }));
    }

    #[test]
    fn test_env_errors_are_name_errors() {
        let err = RuntimeError::from_env(EnvError::Unknown("x".into()), 7);
        assert!(err.is_name_error());
        assert_eq!(err.at(), 7);
        assert_eq!(err.to_string(), "Unknown variable 'x' at offset 7");
    }
}
