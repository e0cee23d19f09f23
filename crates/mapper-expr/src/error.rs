//! Compile-time diagnostics. Mirrors `esper_compiler::CompilerError`'s
//! shape: one `thiserror` enum, byte offsets rather than line/column (the
//! caller can recover line/column from the source text if it wants them),
//! and an `is_recoverable` hint so a REPL-style caller can decide whether
//! to keep accepting input after a failed compile.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { offset: usize, ch: char },

    #[error("invalid numeric literal '{text}' at offset {offset}")]
    InvalidLiteral { offset: usize, text: String },

    #[error("unexpected token at offset {offset}: expected {expected}")]
    UnexpectedToken { offset: usize, expected: String },

    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEof { expected: String },

    #[error("unknown function '{name}' at offset {offset}")]
    UnknownFunction { offset: usize, name: String },

    #[error("unknown variable '{name}' at offset {offset}")]
    UnknownVariable { offset: usize, name: String },

    #[error("wrong number of arguments to '{name}': expected {expected}, found {found}")]
    ArityMismatch { name: String, expected: u8, found: u8 },

    #[error("history offset {offset_value} at byte {offset} exceeds the configured history size")]
    HistoryOutOfRange { offset: usize, offset_value: i32 },

    #[error("user variable count ({found}) exceeds the maximum of {max}")]
    TooManyUserVariables { found: usize, max: usize },

    #[error("expression requires a stack depth of {needed}, exceeding the maximum of {max}")]
    StackOverflow { needed: usize, max: usize },

    #[error("nested '{kind}' reduction is not permitted inside another '{kind}' reduction")]
    NestedSameKindReduction { kind: &'static str },

    #[error("assignment destination at offset {offset} must be 'y', 't_y', or a user variable")]
    InvalidAssignmentTarget { offset: usize },

    #[error("expression contains no assignment to the output")]
    MissingOutputAssignment,

    #[error("vector literal has {found} elements, exceeding the maximum of {max}")]
    VectorLiteralTooLong { found: usize, max: usize },
}

impl CompileError {
    /// Whether a caller compiling expressions interactively (a live map
    /// editor) should keep the previous compiled program rather than
    /// treating the map as broken. Structural errors (unknown tokens,
    /// malformed literals) are the user mid-edit; resource-limit errors are
    /// not recoverable by waiting for more input.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CompileError::TooManyUserVariables { .. }
                | CompileError::StackOverflow { .. }
                | CompileError::HistoryOutOfRange { .. }
        )
    }
}
