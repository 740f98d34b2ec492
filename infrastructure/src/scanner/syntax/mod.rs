//! Lua 5.4 front end used by the structural pass and descriptor extraction.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use parser::parse_chunk;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct SyntaxError {
    pub line: u32,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}
