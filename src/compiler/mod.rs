//! Static compilation: include resolution, gating and slot graph assembly.

pub mod error;
pub mod gate;
pub mod graph;
pub mod include;
pub mod loader;
pub mod path;
pub mod watcher;

pub use error::{CompileError, LoadError};
pub use gate::{combine, Gate, GateCond, GateNode};
pub use graph::{Definition, DynamicIncludeSite, Ordinal, Slot, SlotGraph, SlotGraphBuilder, SlotKind};
pub use include::{IncludeResolver, ResolvedModule};
pub use loader::{FsLoader, MemoryLoader, ModuleLoader};
pub use path::{classify, ResolvedTarget};
pub use watcher::GraphWatcher;

use std::sync::Arc;
use tracing::{info, warn};

use crate::observability::{MetricsRegistry, TimingGuard};

/// Compiles entry modules fetched through a [`ModuleLoader`].
#[derive(Clone)]
pub struct Compiler {
    loader: Arc<dyn ModuleLoader>,
    metrics: Arc<MetricsRegistry>,
}

impl Compiler {
    pub fn new(loader: Arc<dyn ModuleLoader>) -> Self {
        Self::with_metrics(loader, Arc::new(MetricsRegistry::new()))
    }

    pub fn with_metrics(loader: Arc<dyn ModuleLoader>, metrics: Arc<MetricsRegistry>) -> Self {
        Compiler { loader, metrics }
    }

    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Compile `main` into a slot graph.
    pub async fn compile(&self, main: &str) -> Result<SlotGraph, CompileError> {
        self.resolve(main).await.map(|resolved| resolved.graph)
    }

    /// Resolve `path` and everything it statically includes.
    pub async fn resolve(&self, path: &str) -> Result<ResolvedModule, CompileError> {
        let _timing = TimingGuard::new(&self.metrics);

        let result = IncludeResolver::new(self.loader.as_ref())
            .resolve_root(path)
            .await;

        match &result {
            Ok(resolved) => {
                self.metrics.record_compilation(Some(resolved.graph.len()));
                info!(
                    path = %resolved.path,
                    slots = resolved.graph.len(),
                    sites = resolved.graph.sites().len(),
                    modules = resolved.modules.len(),
                    "Compiled module"
                );
            }
            Err(e) => {
                self.metrics.record_compilation(None);
                warn!(path, error = %e, "Compilation failed");
            }
        }

        result
    }
}

impl std::fmt::Debug for Compiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiler").finish_non_exhaustive()
    }
}
