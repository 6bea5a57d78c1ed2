use futures::future::try_join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::compiler::{Compiler, Definition, DynamicIncludeSite, Gate, SlotGraph, SlotKind};
use crate::domain::{BinaryOp, Expr, UnaryOp};
use crate::observability::MetricsRegistry;
use crate::state::{RateLimitOptions, StateBackend, StateKey};

use super::dynamic::{DynamicResolution, DynamicSiteRegistry, ExecutionId};
use super::error::RuntimeError;
use super::functions;

type ValueFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, RuntimeError>> + Send + 'a>>;
type LocalFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Option<Value>, RuntimeError>> + Send + 'a>>;

/// A graph plus the chain of graphs that dynamically included it.
#[derive(Debug)]
struct Scope {
    key: String,
    graph: Arc<SlotGraph>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    fn root(graph: Arc<SlotGraph>) -> Arc<Self> {
        Arc::new(Scope {
            key: graph.root().to_string(),
            graph,
            parent: None,
        })
    }

    fn child(parent: &Arc<Scope>, graph: Arc<SlotGraph>) -> Arc<Self> {
        Arc::new(Scope {
            key: format!("{}|{}", parent.key, graph.root()),
            graph,
            parent: Some(parent.clone()),
        })
    }

    fn frame(&self, name: &str) -> String {
        format!("{}::{}", self.key, name)
    }
}

fn push_frame(mut stack: Vec<String>, frame: String) -> Result<Vec<String>, RuntimeError> {
    if stack.contains(&frame) {
        stack.push(frame);
        return Err(RuntimeError::Recursion { chain: stack });
    }
    stack.push(frame);
    Ok(stack)
}

/// Starts executions over a shared, immutable slot graph.
pub struct Executor {
    graph: Arc<SlotGraph>,
    registry: Arc<DynamicSiteRegistry>,
    backend: Arc<dyn StateBackend>,
}

impl Executor {
    /// Executor resolving dynamic includes through `compiler`.
    pub fn new(graph: Arc<SlotGraph>, compiler: Compiler, backend: Arc<dyn StateBackend>) -> Self {
        Self::with_registry(graph, Arc::new(DynamicSiteRegistry::new(compiler)), backend)
    }

    pub fn with_registry(
        graph: Arc<SlotGraph>,
        registry: Arc<DynamicSiteRegistry>,
        backend: Arc<dyn StateBackend>,
    ) -> Self {
        Executor {
            graph,
            registry,
            backend,
        }
    }

    pub fn graph(&self) -> &Arc<SlotGraph> {
        &self.graph
    }

    pub fn registry(&self) -> &Arc<DynamicSiteRegistry> {
        &self.registry
    }

    /// Begin an execution with a fresh id. Dropping it discards its memos.
    pub fn start(&self, inputs: HashMap<String, Value>) -> Execution {
        let id = Uuid::new_v4();
        self.registry.compiler().metrics().record_execution();
        debug!(execution = %id, inputs = inputs.len(), "Starting execution");

        Execution {
            id,
            root: Scope::root(self.graph.clone()),
            inputs,
            registry: self.registry.clone(),
            backend: self.backend.clone(),
            values: Mutex::new(HashMap::new()),
        }
    }
}

/// One evaluation of the graph against a set of inputs.
///
/// Every slot is computed at most once per execution, so stateful calls
/// fire at most once no matter how many slots depend on them.
pub struct Execution {
    id: ExecutionId,
    root: Arc<Scope>,
    inputs: HashMap<String, Value>,
    registry: Arc<DynamicSiteRegistry>,
    backend: Arc<dyn StateBackend>,
    values: Mutex<HashMap<String, Arc<OnceCell<Value>>>>,
}

impl Execution {
    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub fn inputs(&self) -> &HashMap<String, Value> {
        &self.inputs
    }

    /// Value of `name`: a slot, or failing that an input, or null.
    pub async fn fetch(&self, name: &str) -> Result<Value, RuntimeError> {
        self.lookup(self.root.clone(), name.to_string(), Vec::new())
            .await
    }

    /// Evaluate several names concurrently.
    pub async fn fetch_many(&self, names: &[&str]) -> Result<Vec<Value>, RuntimeError> {
        try_join_all(names.iter().map(|name| self.fetch(name))).await
    }

    fn metrics(&self) -> &MetricsRegistry {
        self.registry.compiler().metrics()
    }

    fn cell(&self, key: &str) -> Arc<OnceCell<Value>> {
        self.values
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Resolve `name` in `scope`, falling back to enclosing scopes and
    /// finally to the execution inputs.
    fn lookup(&self, scope: Arc<Scope>, name: String, stack: Vec<String>) -> ValueFuture<'_> {
        Box::pin(async move {
            let frame = scope.frame(&name);
            let stack = push_frame(stack, frame.clone())?;
            let cell = self.cell(&frame);

            let value = cell
                .get_or_try_init(|| async {
                    if let Some(value) = self.resolve_local(&scope, &name, &stack).await? {
                        return Ok(value);
                    }
                    match &scope.parent {
                        Some(parent) => {
                            self.lookup(parent.clone(), name.clone(), stack.clone())
                                .await
                        }
                        None => Ok(self.inputs.get(&name).cloned().unwrap_or(Value::Null)),
                    }
                })
                .await?;

            Ok(value.clone())
        })
    }

    /// Non-default definition, then dynamic sites, then the default.
    async fn resolve_local(
        &self,
        scope: &Arc<Scope>,
        name: &str,
        stack: &[String],
    ) -> Result<Option<Value>, RuntimeError> {
        if let Some(value) = self.resolve_primary(scope, name, stack).await? {
            return Ok(Some(value));
        }

        match scope.graph.get(name).and_then(|slot| slot.default_definition()) {
            Some(def) => self.evaluate_definition(scope, name, "default", def, stack).await,
            None => Ok(None),
        }
    }

    fn resolve_primary<'a>(
        &'a self,
        scope: &'a Arc<Scope>,
        name: &'a str,
        stack: &'a [String],
    ) -> LocalFuture<'a> {
        Box::pin(async move {
            let slot = scope.graph.get(name);

            if let Some(def) = slot.and_then(|slot| slot.primary()) {
                if let Some(value) = self.evaluate_definition(scope, name, "primary", def, stack).await? {
                    return Ok(Some(value));
                }
            }

            // gate slots are synthetic and never defined by an included module;
            // names a site is bound by cannot come from that site
            if slot.map(|slot| slot.kind()) == Some(SlotKind::Gate) || scope.graph.binds_sites(name) {
                return Ok(None);
            }

            for site in scope.graph.sites() {
                let Some(child) = self.enter_site(scope, site, stack).await? else {
                    continue;
                };
                if let Some(value) = self.resolve_primary(&child, name, stack).await? {
                    trace!(execution = %self.id, slot = name, module = child.graph.root(), "Slot defined by dynamic include");
                    return Ok(Some(value));
                }
            }

            Ok(None)
        })
    }

    /// Evaluate `def` if its gate holds. Memoized per definition.
    async fn evaluate_definition(
        &self,
        scope: &Arc<Scope>,
        name: &str,
        which: &str,
        def: &Definition,
        stack: &[String],
    ) -> Result<Option<Value>, RuntimeError> {
        if !self.gate_holds(scope, &def.gate, stack).await? {
            if def.expr.is_stateful() {
                self.metrics().record_gated_skip();
                debug!(execution = %self.id, slot = name, gate = %def.gate, "Gate closed, skipping stateful slot");
            }
            return Ok(None);
        }

        let key = format!("{}#{}", scope.frame(name), which);
        let stack = push_frame(stack.to_vec(), key.clone())?;
        let cell = self.cell(&key);

        let value = cell
            .get_or_try_init(|| self.eval(scope.clone(), &def.expr, name, stack))
            .await?;
        Ok(Some(value.clone()))
    }

    /// Conjuncts are checked left to right; the first closed one short-circuits.
    async fn gate_holds(
        &self,
        scope: &Arc<Scope>,
        gate: &Gate,
        stack: &[String],
    ) -> Result<bool, RuntimeError> {
        for cond in gate.conjuncts() {
            let value = self
                .lookup(scope.clone(), cond.name.clone(), stack.to_vec())
                .await?;
            if !functions::is_true(&value) {
                trace!(execution = %self.id, gate = %cond.name, "Gate closed");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Scope of the module a site resolves to, if its gate holds and the module exists.
    async fn enter_site(
        &self,
        scope: &Arc<Scope>,
        site: &DynamicIncludeSite,
        stack: &[String],
    ) -> Result<Option<Arc<Scope>>, RuntimeError> {
        if !self.gate_holds(scope, &site.gate, stack).await? {
            return Ok(None);
        }

        let mut bound = HashMap::new();
        for name in site.template.inputs() {
            let value = self
                .lookup(scope.clone(), name.to_string(), stack.to_vec())
                .await?;
            bound.insert(name.to_string(), value);
        }

        match self.registry.resolve(site, &bound, self.id).await {
            Ok(DynamicResolution::Resolved(graph)) => Ok(Some(Scope::child(scope, graph))),
            Ok(DynamicResolution::ModuleAbsent { .. }) => Ok(None),
            Err(RuntimeError::UnresolvedInput { template, name }) => {
                debug!(execution = %self.id, template = %template, input = %name, "Dynamic include input unbound, treating as absent");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn eval<'a>(
        &'a self,
        scope: Arc<Scope>,
        expr: &'a Expr,
        slot: &'a str,
        stack: Vec<String>,
    ) -> ValueFuture<'a> {
        Box::pin(async move {
            match expr {
                Expr::Literal(literal) => Ok(functions::literal_value(literal)),
                Expr::Name(name) => self.lookup(scope, name.clone(), stack).await,
                Expr::Unary { op, expr } => {
                    let value = self.eval(scope, expr, slot, stack).await?;
                    match op {
                        UnaryOp::Not => functions::not(&value),
                        UnaryOp::Neg => functions::negate(&value),
                    }
                }
                Expr::Binary {
                    op: op @ (BinaryOp::And | BinaryOp::Or),
                    left,
                    right,
                } => {
                    let left = self.eval(scope.clone(), left, slot, stack.clone()).await?;
                    let decided = matches!(
                        (op, &left),
                        (BinaryOp::And, Value::Bool(false)) | (BinaryOp::Or, Value::Bool(true))
                    );
                    if decided {
                        return Ok(left);
                    }
                    let right = self.eval(scope, right, slot, stack).await?;
                    functions::logical(*op, &left, &right)
                }
                Expr::Binary { op, left, right } => {
                    let left = self.eval(scope.clone(), left, slot, stack.clone()).await?;
                    let right = self.eval(scope, right, slot, stack).await?;
                    match op {
                        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                            functions::arithmetic(*op, &left, &right)
                        }
                        _ => functions::compare(*op, &left, &right),
                    }
                }
                Expr::IsNull { expr, negated } => {
                    let value = self.eval(scope, expr, slot, stack).await?;
                    Ok(Value::Bool(value.is_null() != *negated))
                }
                Expr::Call { func, args, by } => {
                    self.call(scope, func, args, by, slot, stack).await
                }
            }
        })
    }

    fn call<'a>(
        &'a self,
        scope: Arc<Scope>,
        func: &'a str,
        args: &'a [Expr],
        by: &'a [Expr],
        slot: &'a str,
        stack: Vec<String>,
    ) -> ValueFuture<'a> {
        Box::pin(async move {
            match func {
                "input" => {
                    expect_args(func, args, 0)?;
                    Ok(self.inputs.get(slot).cloned().unwrap_or(Value::Null))
                }
                "if" => {
                    if !(2..=3).contains(&args.len()) {
                        return Err(RuntimeError::arity(func, "2 or 3", args.len()));
                    }
                    let cond = self.eval(scope.clone(), &args[0], slot, stack.clone()).await?;
                    if functions::is_true(&cond) {
                        self.eval(scope, &args[1], slot, stack).await
                    } else if let Some(otherwise) = args.get(2) {
                        self.eval(scope, otherwise, slot, stack).await
                    } else {
                        Ok(Value::Null)
                    }
                }
                "concat" => {
                    let values = self.eval_all(&scope, args, slot, &stack).await?;
                    functions::concat(&values)
                }
                "bool" => {
                    expect_args(func, args, 1)?;
                    let value = self.eval(scope, &args[0], slot, stack).await?;
                    Ok(functions::to_bool(&value))
                }
                "count" => {
                    expect_args(func, args, 0)?;
                    let Some(dims) = self.dimensions(&scope, by, slot, &stack).await? else {
                        return Ok(Value::Null);
                    };
                    let key = StateKey::new(func, slot, &dims);
                    trace!(execution = %self.id, key = %key, "increment");
                    Ok(json!(self.backend.increment(&key).await?))
                }
                "count_unique" => {
                    expect_args(func, args, 1)?;
                    let value = self.eval(scope.clone(), &args[0], slot, stack.clone()).await?;
                    if value.is_null() {
                        return Ok(Value::Null);
                    }
                    let Some(dims) = self.dimensions(&scope, by, slot, &stack).await? else {
                        return Ok(Value::Null);
                    };
                    let key = StateKey::new(func, slot, &dims);
                    let member = functions::path_text(&value).unwrap_or_else(|| value.to_string());
                    trace!(execution = %self.id, key = %key, "pfadd");
                    self.backend.pfadd(&key, &[member]).await?;
                    Ok(json!(self.backend.pfcount(&[key]).await?))
                }
                "rate_limit" => {
                    expect_args(func, args, 1)?;
                    let max = self.eval(scope.clone(), &args[0], slot, stack.clone()).await?;
                    let max = match max {
                        Value::Null => return Ok(Value::Null),
                        Value::Number(n) => match n.as_i64() {
                            Some(max) => max,
                            None => {
                                return Err(RuntimeError::Type(format!(
                                    "rate_limit expects an integer maximum, got {}",
                                    n
                                )))
                            }
                        },
                        other => {
                            return Err(RuntimeError::Type(format!(
                                "rate_limit expects a number, got {}",
                                other
                            )))
                        }
                    };
                    let Some(dims) = self.dimensions(&scope, by, slot, &stack).await? else {
                        return Ok(Value::Null);
                    };
                    let key = StateKey::new(func, slot, &dims);
                    trace!(execution = %self.id, key = %key, "rate_limit_fetch");
                    let available = self
                        .backend
                        .rate_limit_fetch(&key, &RateLimitOptions::take_one(max))
                        .await?;
                    Ok(json!(available))
                }
                other => Err(RuntimeError::UnknownFunction(other.to_string())),
            }
        })
    }

    /// Evaluate arguments in order, so backend effects stay deterministic.
    async fn eval_all(
        &self,
        scope: &Arc<Scope>,
        exprs: &[Expr],
        slot: &str,
        stack: &[String],
    ) -> Result<Vec<Value>, RuntimeError> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.eval(scope.clone(), expr, slot, stack.to_vec()).await?);
        }
        Ok(values)
    }

    /// `BY` values, or `None` when any of them is null.
    async fn dimensions(
        &self,
        scope: &Arc<Scope>,
        by: &[Expr],
        slot: &str,
        stack: &[String],
    ) -> Result<Option<Vec<Value>>, RuntimeError> {
        let values = self.eval_all(scope, by, slot, stack).await?;
        if values.iter().any(Value::is_null) {
            trace!(execution = %self.id, slot, "Null grouping dimension");
            return Ok(None);
        }
        Ok(Some(values))
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        self.registry.finish(self.id);
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("id", &self.id)
            .field("root", &self.root.key)
            .finish_non_exhaustive()
    }
}

fn expect_args(func: &str, args: &[Expr], expected: usize) -> Result<(), RuntimeError> {
    if args.len() != expected {
        let expected = match expected {
            0 => "0",
            1 => "1",
            _ => "2",
        };
        return Err(RuntimeError::arity(func, expected, args.len()));
    }
    Ok(())
}
