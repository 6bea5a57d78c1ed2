pub mod compiler;
pub mod config;
pub mod domain;
pub mod observability;
pub mod printer;
pub mod runtime;
pub mod state;
pub mod syntax;

pub use compiler::{CompileError, Compiler, ModuleLoader, SlotGraph};
pub use config::Config;
pub use printer::SourcePrinter;
pub use runtime::{Execution, Executor, RuntimeError};
pub use state::{MockStateBackend, StateBackend};
