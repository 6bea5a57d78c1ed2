use thiserror::Error;

use crate::syntax::ParseError;

/// Errors reported by a [`ModuleLoader`](super::loader::ModuleLoader).
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("no module at `{0}`")]
    NotFound(String),

    #[error("IO error reading `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML bundle error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Static compilation failures. Any of these aborts the whole compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("module `{path}` not found{}", .included_from.as_ref().map(|p| format!(" (included from `{}`)", p)).unwrap_or_default())]
    NotFound {
        path: String,
        included_from: Option<String>,
    },

    #[error("include cycle: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },

    #[error("slot dependency cycle: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("duplicate definition of slot `{name}` in `{origin}` (first defined in `{first_origin}`)")]
    DuplicateSlotName {
        name: String,
        first_origin: String,
        origin: String,
    },

    #[error("Expected empty where clause for dynamic include \"{template}\" in `{origin}` line {line}")]
    InvalidGate {
        template: String,
        origin: String,
        line: usize,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("failed to load `{path}`: {source}")]
    Load {
        path: String,
        #[source]
        source: LoadError,
    },
}

impl CompileError {
    /// Whether this error is the entry module itself being absent.
    pub fn is_missing_root(&self, root: &str) -> bool {
        matches!(
            self,
            CompileError::NotFound { path, included_from: None } if path == root
        )
    }
}
