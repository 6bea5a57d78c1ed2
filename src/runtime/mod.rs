//! Execution-time evaluation: dynamic include resolution and the reference
//! evaluator over a compiled graph.

pub mod dynamic;
pub mod error;
pub mod execution;
pub mod functions;

pub use dynamic::{DynamicResolution, DynamicSiteRegistry, ExecutionId};
pub use error::RuntimeError;
pub use execution::{Execution, Executor};
