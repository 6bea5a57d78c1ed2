use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use serde_json::{Map, Value};
use tokio::signal;
use tracing::{debug, error, info, warn};

use rulegraph::compiler::{Compiler, FsLoader, GraphWatcher, MemoryLoader, ModuleLoader, SlotGraph};
use rulegraph::config::Config;
use rulegraph::observability::init_tracing;
use rulegraph::printer::SourcePrinter;
use rulegraph::runtime::Executor;
use rulegraph::state::{MockStateBackend, StateBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let config = Config::parse();

    // Initialize tracing
    init_tracing(&config.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        main = %config.main,
        "Starting rulegraph"
    );

    let loader: Arc<dyn ModuleLoader> = match &config.bundle {
        Some(path) => {
            let content = tokio::fs::read_to_string(path).await?;
            let loader = MemoryLoader::from_yaml(&content)?;
            info!(path = %path.display(), modules = loader.len(), "Loaded source bundle");
            Arc::new(loader)
        }
        None => {
            info!(root = %config.root.display(), "Reading sources from directory");
            Arc::new(FsLoader::new(&config.root))
        }
    };

    let compiler = Compiler::new(loader);
    let inputs = config.parsed_inputs().map_err(anyhow::Error::msg)?;
    let backend: Arc<dyn StateBackend> = Arc::new(MockStateBackend::new());

    if config.watch_secs == 0 {
        let graph = Arc::new(compiler.compile(&config.main).await?);
        run(&config, &compiler, graph, &inputs, &backend).await?;
        debug!("{}", compiler.metrics().to_prometheus());
        return Ok(());
    }

    // Start graph watcher
    let watcher = GraphWatcher::new(compiler.clone(), config.main.clone(), config.watch_interval());
    let (mut graph_rx, watch_handle) = watcher.start().await;

    let initial = graph_rx.borrow_and_update().clone();
    if let Err(e) = run(&config, &compiler, initial, &inputs, &backend).await {
        error!(error = %e, "Evaluation failed");
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = graph_rx.changed() => {
                if changed.is_err() {
                    warn!("Graph watcher stopped");
                    break;
                }
                let graph = graph_rx.borrow_and_update().clone();
                if let Err(e) = run(&config, &compiler, graph, &inputs, &backend).await {
                    error!(error = %e, "Evaluation failed");
                }
            }
            _ = &mut shutdown => break,
        }
    }

    // Cleanup
    info!("Shutting down...");
    watch_handle.abort();
    debug!("{}", compiler.metrics().to_prometheus());

    info!("Shutdown complete");
    Ok(())
}

/// Print requested diagnostics and evaluate the requested slots.
async fn run(
    config: &Config,
    compiler: &Compiler,
    graph: Arc<SlotGraph>,
    inputs: &HashMap<String, Value>,
    backend: &Arc<dyn StateBackend>,
) -> anyhow::Result<()> {
    let printer = SourcePrinter::new(&graph);

    if config.print_graph {
        print!("{}", printer.print_graph());
    }

    for name in &config.print {
        match printer.source_for_slot_name(name) {
            Some(source) => println!("{} := {}", name, source),
            None => warn!(slot = %name, "No such slot"),
        }
    }

    if config.fetch.is_empty() {
        return Ok(());
    }

    let executor = Executor::new(graph.clone(), compiler.clone(), backend.clone());
    let execution = executor.start(inputs.clone());

    let names: Vec<&str> = config.fetch.iter().map(String::as_str).collect();
    let values = execution.fetch_many(&names).await?;

    let results: Map<String, Value> = config.fetch.iter().cloned().zip(values).collect();
    println!("{}", serde_json::to_string_pretty(&results)?);

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
