use thiserror::Error;

use crate::compiler::CompileError;

/// Failures scoped to a single execution.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("include template \"{template}\" references unbound input `{name}`")]
    UnresolvedInput { template: String, name: String },

    #[error("failed to compile dynamic include `{path}`: {source}")]
    Compile {
        path: String,
        #[source]
        source: CompileError,
    },

    #[error("state backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("recursive slot evaluation: {}", .chain.join(" -> "))]
    Recursion { chain: Vec<String> },

    #[error("`{function}` expects {expected} argument(s), found {found}")]
    Arity {
        function: String,
        expected: &'static str,
        found: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),
}

impl RuntimeError {
    pub(crate) fn arity(function: &str, expected: &'static str, found: usize) -> Self {
        RuntimeError::Arity {
            function: function.to_string(),
            expected,
            found,
        }
    }
}
