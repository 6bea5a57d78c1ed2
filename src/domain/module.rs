use serde::{Deserialize, Serialize};

use super::expr::Expr;
use super::template::PathTemplate;

/// `INCLUDE "target" [WHERE gate];`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncludeDirective {
    pub target: PathTemplate,
    pub gate: Option<Expr>,
    pub line: usize,
}

/// A single top-level statement of a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// `LET Name := expr [DEFAULT];`
    Let {
        name: String,
        expr: Expr,
        is_default: bool,
        line: usize,
    },
    Include(IncludeDirective),
}

/// A parsed source module. Immutable once built.
#[derive(Debug, Clone)]
pub struct Module {
    /// Canonical logical path
    pub path: String,
    pub source: String,
    pub statements: Vec<Statement>,
}

impl Module {
    pub fn new(path: impl Into<String>, source: impl Into<String>, statements: Vec<Statement>) -> Self {
        Module {
            path: path.into(),
            source: source.into(),
            statements,
        }
    }

    /// Include directives in source order.
    pub fn includes(&self) -> impl Iterator<Item = &IncludeDirective> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Include(directive) => Some(directive),
            Statement::Let { .. } => None,
        })
    }
}

/// Normalize a logical module path into the key used by the module table.
///
/// Backslashes become `/`, empty and `.` components are dropped.
pub fn canonical_path(raw: &str) -> String {
    raw.trim()
        .replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}
