//! Front end for the rule language: tokenizer and recursive-descent parser.

pub mod lexer;
pub mod parser;

pub use parser::{parse_expr, parse_module};

use thiserror::Error;

/// Syntax error with its source location.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{path}:{line}:{col}: {message}")]
pub struct ParseError {
    pub path: String,
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(path: &str, line: usize, col: usize, message: impl Into<String>) -> Self {
        ParseError {
            path: path.to_string(),
            line,
            col,
            message: message.into(),
        }
    }
}
