pub mod expr;
pub mod module;
pub mod template;

pub use expr::{BinaryOp, Expr, Literal, UnaryOp};
pub use module::{canonical_path, IncludeDirective, Module, Statement};
pub use template::{PathTemplate, Segment};
