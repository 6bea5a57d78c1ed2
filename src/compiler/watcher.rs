use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, warn};

use super::error::CompileError;
use super::graph::SlotGraph;
use super::Compiler;

/// Watch the source tree and broadcast recompiled graphs.
pub struct GraphWatcher {
    compiler: Compiler,
    main: String,
    check_interval: Duration,
    last_fingerprint: Option<u64>,
}

impl GraphWatcher {
    /// Create a new graph watcher for the entry module `main`.
    pub fn new(compiler: Compiler, main: impl Into<String>, check_interval: Duration) -> Self {
        GraphWatcher {
            compiler,
            main: main.into(),
            check_interval,
            last_fingerprint: None,
        }
    }

    /// Start watching for source changes.
    ///
    /// Returns a receiver that will receive a new graph whenever the
    /// fingerprint of the fetched sources changes.
    pub async fn start(mut self) -> (watch::Receiver<Arc<SlotGraph>>, tokio::task::JoinHandle<()>) {
        let initial_graph = match self.compiler.compile(&self.main).await {
            Ok(graph) => {
                self.last_fingerprint = Some(graph.fingerprint());
                info!(main = %self.main, slots = graph.len(), "Compiled initial graph");
                Arc::new(graph)
            }
            Err(e) => {
                error!(main = %self.main, "Failed to compile initial graph: {}", e);
                Arc::new(SlotGraph::empty(self.main.clone()))
            }
        };

        let (tx, rx) = watch::channel(initial_graph);

        let handle = tokio::spawn(async move {
            let mut interval = interval(self.check_interval);
            // first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;

                match self.check_for_updates(&tx).await {
                    Ok(true) => info!("Graph reloaded successfully"),
                    Ok(false) => {}
                    Err(e) => warn!("Error recompiling graph, keeping previous: {}", e),
                }
            }
        });

        (rx, handle)
    }

    /// Recompile and broadcast if the sources changed.
    async fn check_for_updates(
        &mut self,
        tx: &watch::Sender<Arc<SlotGraph>>,
    ) -> Result<bool, CompileError> {
        let metrics = self.compiler.metrics().clone();

        let graph = match self.compiler.compile(&self.main).await {
            Ok(graph) => graph,
            Err(e) => {
                metrics.record_graph_reload(false);
                return Err(e);
            }
        };

        if self.last_fingerprint == Some(graph.fingerprint()) {
            return Ok(false);
        }

        info!(
            "Graph fingerprint changed: {:?} -> {:x}",
            self.last_fingerprint,
            graph.fingerprint()
        );

        self.last_fingerprint = Some(graph.fingerprint());
        metrics.record_graph_reload(true);
        let _ = tx.send(Arc::new(graph));

        Ok(true)
    }
}
