//! Scanner errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected {expected} at byte {offset}, found {found}")]
    Unexpected {
        offset: usize,
        expected: &'static str,
        found: String,
    },

    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: &'static str },

    #[error("unknown alias '{sigil}{name}'")]
    UnknownAlias { sigil: char, name: String },

    #[error("alias '{name}' refers to itself")]
    AliasCycle { name: String },

    #[error("unsupported type '{spelling}' at byte {offset}")]
    UnsupportedType { spelling: String, offset: usize },

    #[error("invalid sparse tensor encoding: {reason}")]
    InvalidEncoding { reason: String },
}
