use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::domain::{canonical_path, Module, Statement};
use crate::syntax::parse_module;

use super::error::{CompileError, LoadError};
use super::gate::{check_dynamic_include, combine, Gate};
use super::graph::{SlotGraph, SlotGraphBuilder};
use super::loader::ModuleLoader;
use super::path::{classify, ResolvedTarget};

/// Result of resolving an entry module and everything it statically includes.
#[derive(Debug)]
pub struct ResolvedModule {
    /// Canonical path of the entry module
    pub path: String,
    pub graph: SlotGraph,
    /// Canonical paths of every module fetched, in fetch order
    pub modules: Vec<String>,
}

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<(), CompileError>> + Send + 'a>>;

/// Depth-first walk over `INCLUDE` directives for one compilation.
///
/// Modules live in a flat table keyed by canonical path. The stack of
/// in-progress paths is threaded through each call for cycle detection.
pub struct IncludeResolver<'a> {
    loader: &'a dyn ModuleLoader,
    modules: HashMap<String, Arc<Module>>,
    fetch_order: Vec<String>,
    builder: SlotGraphBuilder,
    hasher: DefaultHasher,
}

impl<'a> IncludeResolver<'a> {
    pub fn new(loader: &'a dyn ModuleLoader) -> Self {
        IncludeResolver {
            loader,
            modules: HashMap::new(),
            fetch_order: Vec::new(),
            builder: SlotGraphBuilder::new(),
            hasher: DefaultHasher::new(),
        }
    }

    /// Resolve `path` as the entry module under an always-true gate.
    ///
    /// No partial graph survives a failure.
    pub async fn resolve_root(mut self, path: &str) -> Result<ResolvedModule, CompileError> {
        let root = canonical_path(path);
        self.resolve(root.clone(), Gate::Always, Vec::new(), None)
            .await?;

        let fingerprint = self.hasher.finish();
        let graph = self.builder.build(root.clone(), fingerprint)?;

        Ok(ResolvedModule {
            path: root,
            graph,
            modules: self.fetch_order,
        })
    }

    fn resolve(
        &mut self,
        path: String,
        gate: Gate,
        stack: Vec<String>,
        included_from: Option<String>,
    ) -> ResolveFuture<'_> {
        Box::pin(async move {
            if let Some(pos) = stack.iter().position(|p| *p == path) {
                let mut cycle = stack[pos..].to_vec();
                cycle.push(path);
                return Err(CompileError::Cycle { cycle });
            }

            let module = self.load(&path, included_from).await?;
            debug!(path = %module.path, gate = %gate, depth = stack.len(), "Resolving module");

            let mut child_stack = stack;
            child_stack.push(module.path.clone());

            for statement in &module.statements {
                match statement {
                    Statement::Let {
                        name,
                        expr,
                        is_default,
                        ..
                    } => {
                        self.builder.define(
                            name,
                            expr.clone(),
                            gate.clone(),
                            &module.path,
                            *is_default,
                        )?;
                    }
                    Statement::Include(directive) => {
                        match classify(&directive.target, self.builder.literal_bindings()) {
                            ResolvedTarget::Static(target) => {
                                let local = match &directive.gate {
                                    Some(expr) => {
                                        Gate::cond(self.builder.define_gate(expr, &module.path))
                                    }
                                    None => Gate::Always,
                                };
                                let child_gate = combine(&gate, &local);
                                trace!(from = %module.path, target = %target, gate = %child_gate, "Static include");

                                self.resolve(
                                    target,
                                    child_gate,
                                    child_stack.clone(),
                                    Some(module.path.clone()),
                                )
                                .await?;
                            }
                            ResolvedTarget::Dynamic(template) => {
                                check_dynamic_include(directive, &module.path)?;
                                self.builder.add_site(
                                    template,
                                    gate.clone(),
                                    &module.path,
                                    directive.line,
                                );
                            }
                        }
                    }
                }
            }

            Ok(())
        })
    }

    async fn load(
        &mut self,
        path: &str,
        included_from: Option<String>,
    ) -> Result<Arc<Module>, CompileError> {
        if let Some(module) = self.modules.get(path) {
            return Ok(module.clone());
        }

        let source = self.loader.fetch(path).await.map_err(|e| match e {
            LoadError::NotFound(_) => CompileError::NotFound {
                path: path.to_string(),
                included_from,
            },
            source => CompileError::Load {
                path: path.to_string(),
                source,
            },
        })?;

        path.hash(&mut self.hasher);
        source.hash(&mut self.hasher);

        let statements = parse_module(path, &source)?;
        let module = Arc::new(Module::new(path, source, statements));

        self.fetch_order.push(path.to_string());
        self.modules.insert(path.to_string(), module.clone());
        Ok(module)
    }
}
