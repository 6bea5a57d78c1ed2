use ahash::AHasher;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::compiler::{Compiler, DynamicIncludeSite, SlotGraph};
use crate::domain::canonical_path;

use super::error::RuntimeError;
use super::functions::path_text;

/// Identifier of one execution; scopes the resolution memo.
pub type ExecutionId = Uuid;

/// Number of memo shards. Must be a power of 2.
const NUM_SHARDS: usize = 16;

/// Outcome of resolving a dynamic include site.
#[derive(Debug, Clone)]
pub enum DynamicResolution {
    /// The concrete path compiled into a graph of its own
    Resolved(Arc<SlotGraph>),
    /// No module exists at the concrete path. Not an error.
    ModuleAbsent { path: String },
}

impl DynamicResolution {
    pub fn graph(&self) -> Option<&Arc<SlotGraph>> {
        match self {
            DynamicResolution::Resolved(graph) => Some(graph),
            DynamicResolution::ModuleAbsent { .. } => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, DynamicResolution::ModuleAbsent { .. })
    }
}

type Memo = Mutex<HashMap<String, Arc<OnceCell<DynamicResolution>>>>;

/// Resolves dynamic include sites at execution time.
///
/// Each execution owns a memo from concrete path to resolution. Concurrent
/// callers asking for the same path within one execution share a single
/// in-flight compilation. Memos are never shared between executions and
/// are discarded by [`finish`](Self::finish).
pub struct DynamicSiteRegistry {
    compiler: Compiler,
    shards: Vec<RwLock<HashMap<ExecutionId, Arc<Memo>>>>,
}

impl DynamicSiteRegistry {
    pub fn new(compiler: Compiler) -> Self {
        let shards = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();

        DynamicSiteRegistry { compiler, shards }
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    /// Concrete path of `site` given the bound input values.
    ///
    /// Strings, numbers and booleans bind; a missing or null value fails
    /// with [`RuntimeError::UnresolvedInput`].
    pub fn render(site: &DynamicIncludeSite, bound: &HashMap<String, Value>) -> Result<String, RuntimeError> {
        site.template
            .render(|name| bound.get(name).and_then(path_text))
            .map(|path| canonical_path(&path))
            .map_err(|name| RuntimeError::UnresolvedInput {
                template: site.template.to_string(),
                name,
            })
    }

    /// Resolve `site` for `execution`, compiling its target at most once.
    pub async fn resolve(
        &self,
        site: &DynamicIncludeSite,
        bound: &HashMap<String, Value>,
        execution: ExecutionId,
    ) -> Result<DynamicResolution, RuntimeError> {
        let path = Self::render(site, bound)?;
        debug!(site = site.id, template = %site.template, path = %path, "Rendered dynamic include");
        self.resolve_path(&path, execution).await
    }

    /// Resolve a concrete path for `execution`.
    pub async fn resolve_path(
        &self,
        path: &str,
        execution: ExecutionId,
    ) -> Result<DynamicResolution, RuntimeError> {
        let path = canonical_path(path);
        let memo = self.memo(execution);

        let (cell, hit) = {
            let mut memo = memo.lock();
            match memo.get(&path) {
                Some(cell) => (cell.clone(), true),
                None => {
                    let cell = Arc::new(OnceCell::new());
                    memo.insert(path.clone(), cell.clone());
                    (cell, false)
                }
            }
        };

        let metrics = self.compiler.metrics();
        metrics.record_memo_lookup(hit);
        if hit {
            debug!(%execution, path = %path, "Dynamic include memo hit");
        }

        let resolution = cell
            .get_or_try_init(|| async {
                match self.compiler.compile(&path).await {
                    Ok(graph) => {
                        info!(%execution, path = %path, slots = graph.len(), "Resolved dynamic include");
                        Ok(DynamicResolution::Resolved(Arc::new(graph)))
                    }
                    Err(e) if e.is_missing_root(&path) => {
                        debug!(%execution, path = %path, "Dynamic include target absent");
                        metrics.record_module_absent();
                        Ok(DynamicResolution::ModuleAbsent { path: path.clone() })
                    }
                    Err(source) => {
                        warn!(%execution, path = %path, error = %source, "Dynamic include failed to compile");
                        metrics.record_resolution_error();
                        Err(RuntimeError::Compile {
                            path: path.clone(),
                            source,
                        })
                    }
                }
            })
            .await?;

        Ok(resolution.clone())
    }

    /// Discard the memo of a finished execution. Returns whether one existed.
    pub fn finish(&self, execution: ExecutionId) -> bool {
        let removed = self.shards[shard_index(&execution)]
            .write()
            .remove(&execution)
            .is_some();
        if removed {
            debug!(%execution, "Discarded dynamic include memo");
        }
        removed
    }

    /// Number of executions currently holding a memo.
    pub fn active_executions(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Number of concrete paths memoized for `execution`.
    pub fn memo_len(&self, execution: ExecutionId) -> usize {
        self.shards[shard_index(&execution)]
            .read()
            .get(&execution)
            .map(|memo| memo.lock().len())
            .unwrap_or(0)
    }

    fn memo(&self, execution: ExecutionId) -> Arc<Memo> {
        let shard = &self.shards[shard_index(&execution)];

        {
            let read_guard = shard.read();
            if let Some(memo) = read_guard.get(&execution) {
                return memo.clone();
            }
        }

        shard
            .write()
            .entry(execution)
            .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())))
            .clone()
    }
}

impl std::fmt::Debug for DynamicSiteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicSiteRegistry")
            .field("active_executions", &self.active_executions())
            .finish()
    }
}

#[inline]
fn shard_index(execution: &ExecutionId) -> usize {
    let mut hasher = AHasher::default();
    execution.hash(&mut hasher);
    (hasher.finish() as usize) & (NUM_SHARDS - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{Gate, LoadError, MemoryLoader, ModuleLoader};
    use crate::domain::PathTemplate;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Loader that counts fetches and answers slowly.
    struct CountingLoader {
        inner: MemoryLoader,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ModuleLoader for CountingLoader {
        async fn fetch(&self, path: &str) -> Result<String, LoadError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.fetch(path).await
        }
    }

    fn site() -> DynamicIncludeSite {
        DynamicIncludeSite {
            id: 0,
            template: PathTemplate::parse("features/${Action}.sqrl").unwrap(),
            gate: Gate::Always,
            origin: "main.sqrl".to_string(),
            line: 3,
        }
    }

    fn registry() -> (DynamicSiteRegistry, Arc<CountingLoader>) {
        let loader = Arc::new(CountingLoader {
            inner: MemoryLoader::from_sources([(
                "features/foo_action.sqrl",
                "LET Thing := \"from foo action\";",
            )]),
            fetches: AtomicUsize::new(0),
        });
        (DynamicSiteRegistry::new(Compiler::new(loader.clone())), loader)
    }

    fn bound(action: Value) -> HashMap<String, Value> {
        HashMap::from([("Action".to_string(), action)])
    }

    #[tokio::test]
    async fn test_resolves_and_reports_absent() {
        let (registry, _) = registry();
        let execution = Uuid::new_v4();

        let found = registry
            .resolve(&site(), &bound(json!("foo_action")), execution)
            .await
            .unwrap();
        assert!(found.graph().unwrap().contains("Thing"));

        let absent = registry
            .resolve(&site(), &bound(json!("abc_action")), execution)
            .await
            .unwrap();
        match absent {
            DynamicResolution::ModuleAbsent { path } => assert_eq!(path, "features/abc_action.sqrl"),
            other => panic!("unexpected resolution {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unbound_input() {
        let (registry, loader) = registry();

        for value in [None, Some(json!(null))] {
            let inputs = value.map(bound).unwrap_or_default();
            let err = registry
                .resolve(&site(), &inputs, Uuid::new_v4())
                .await
                .unwrap_err();
            assert!(matches!(err, RuntimeError::UnresolvedInput { ref name, .. } if name == "Action"));
        }
        assert_eq!(loader.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_resolution_fetches_once() {
        let (registry, loader) = registry();
        let execution = Uuid::new_v4();
        let inputs = bound(json!("foo_action"));
        let site = site();

        let (a, b, c) = tokio::join!(
            registry.resolve(&site, &inputs, execution),
            registry.resolve(&site, &inputs, execution),
            registry.resolve(&site, &inputs, execution),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(loader.fetches.load(Ordering::SeqCst), 1);

        let metrics = registry.compiler().metrics();
        assert_eq!(metrics.dynamic_resolutions_total.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.dynamic_memo_hits.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_executions_do_not_share_memo() {
        let (registry, loader) = registry();
        let inputs = bound(json!("foo_action"));
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        registry.resolve(&site(), &inputs, first).await.unwrap();
        registry.resolve(&site(), &inputs, second).await.unwrap();
        assert_eq!(loader.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(registry.active_executions(), 2);

        assert_eq!(registry.memo_len(first), 1);
        assert!(registry.finish(first));
        assert!(!registry.finish(first));
        assert_eq!(registry.memo_len(first), 0);
        assert_eq!(registry.active_executions(), 1);
    }

    #[tokio::test]
    async fn test_nested_missing_module_is_an_error() {
        let loader = Arc::new(MemoryLoader::from_sources([(
            "features/broken.sqrl",
            "INCLUDE \"features/missing.sqrl\";",
        )]));
        let registry = DynamicSiteRegistry::new(Compiler::new(loader));

        let err = registry
            .resolve_path("features/broken.sqrl", Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Compile { .. }));
    }
}
