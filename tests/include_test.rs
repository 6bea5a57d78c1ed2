use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use rulegraph::compiler::{combine, CompileError, Compiler, FsLoader, Gate, LoadError, MemoryLoader, ModuleLoader};
use rulegraph::runtime::{Executor, RuntimeError};
use rulegraph::state::MockStateBackend;
use rulegraph::SourcePrinter;

/// Memory loader that counts fetches per path and answers slowly.
struct CountingLoader {
    inner: MemoryLoader,
    fetches: parking_lot::Mutex<HashMap<String, usize>>,
}

impl CountingLoader {
    fn new(sources: &[(&str, &str)]) -> Self {
        CountingLoader {
            inner: MemoryLoader::from_sources(sources.iter().copied()),
            fetches: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn fetches(&self, path: &str) -> usize {
        self.fetches.lock().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ModuleLoader for CountingLoader {
    async fn fetch(&self, path: &str) -> Result<String, LoadError> {
        *self.fetches.lock().entry(path.to_string()).or_default() += 1;
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.inner.fetch(path).await
    }
}

fn inputs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

async fn setup(sources: &[(&str, &str)]) -> Result<(Executor, Arc<MockStateBackend>)> {
    let compiler = Compiler::new(Arc::new(MemoryLoader::from_sources(sources.iter().copied())));
    let graph = compiler.compile("main.sqrl").await?;
    let backend = Arc::new(MockStateBackend::new());
    Ok((
        Executor::new(Arc::new(graph), compiler, backend.clone()),
        backend,
    ))
}

#[tokio::test]
async fn test_static_includes_from_directory() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::create_dir_all(dir.path().join("subdir"))?;
    std::fs::write(dir.path().join("sample.sqrl"), "    LET A := \"Hello \";\n")?;
    std::fs::write(dir.path().join("subdir/included.sqrl"), "LET B := \"world\";\n")?;
    std::fs::write(dir.path().join("subdir/skipped.sqrl"), "LET C := \"BLABLABLABAL\";\n")?;
    std::fs::write(
        dir.path().join("main.sqrl"),
        r#"
# Assuming we've been bad
LET IsGood := (10 > 9000);
LET IsBad := NOT IsGood;

INCLUDE "sample.sqrl";
INCLUDE "subdir/included.sqrl" WHERE IsBad;
INCLUDE "subdir/skipped.sqrl" WHERE IsGood;

LET Message := concat(
  if(A IS NULL, "", A),
  if(B IS NULL, "", B),
  if(C IS NULL, "", C)
);
LET NullMessage := concat(A, B, C);
"#,
    )?;

    let compiler = Compiler::new(Arc::new(FsLoader::new(dir.path())));
    let graph = Arc::new(compiler.compile("main.sqrl").await?);
    let executor = Executor::new(graph, compiler, Arc::new(MockStateBackend::new()));
    let execution = executor.start(HashMap::new());

    assert_eq!(execution.fetch("Message").await?, json!("Hello world"));
    assert_eq!(execution.fetch("NullMessage").await?, Value::Null);
    assert_eq!(execution.fetch("C").await?, Value::Null);
    assert_eq!(execution.fetch("B").await?, json!("world"));
    Ok(())
}

#[tokio::test]
async fn test_dynamic_include() -> Result<()> {
    let (executor, _) = setup(&[
        ("features/foo_action.sqrl", "LET Thing := \"from foo action\";"),
        ("features/bar_action.sqrl", "LET Thing := \"from bar action\";"),
        (
            "main.sqrl",
            "LET Action := input();\nLET Thing := \"from default\" DEFAULT;\nINCLUDE \"features/${Action}.sqrl\";",
        ),
    ])
    .await?;

    for (action, expected) in [
        ("abc_action", "from default"),
        ("foo_action", "from foo action"),
        ("bar_action", "from bar action"),
    ] {
        let execution = executor.start(inputs(&[("Action", json!(action))]));
        assert_eq!(execution.fetch("Thing").await?, json!(expected), "Action = {}", action);
    }

    // no Action at all: the include cannot be resolved and the default stands
    let execution = executor.start(HashMap::new());
    assert_eq!(execution.fetch("Thing").await?, json!("from default"));
    Ok(())
}

#[tokio::test]
async fn test_dynamic_include_rejects_where() -> Result<()> {
    let compiler = Compiler::new(Arc::new(MemoryLoader::from_sources([
        ("features/foo_action.sqrl", "LET Thing := \"from foo action\";"),
        (
            "main.sqrl",
            "LET Action := input();\nLET Sample := input();\nINCLUDE \"features/${Action}.sqrl\" WHERE Sample;",
        ),
    ])));

    let err = compiler.compile("main.sqrl").await.unwrap_err();
    assert!(matches!(err, CompileError::InvalidGate { .. }));
    assert!(err
        .to_string()
        .contains("Expected empty where clause for dynamic include"));
    Ok(())
}

#[tokio::test]
async fn test_gate_reaches_nested_count() -> Result<()> {
    let (executor, backend) = setup(&[
        ("x.sqrl", "LET Count := count(BY Ip);"),
        (
            "main.sqrl",
            "LET Action := input();\nLET Ip := input();\nINCLUDE \"x.sqrl\" WHERE Action=\"x\";",
        ),
    ])
    .await?;

    let printer = SourcePrinter::new(executor.graph());
    let source = printer.source_for_slot_name("Count").expect("Count is a slot");
    assert!(source.contains("bool(Action=\"x\":02)"), "{}", source);

    // gate closed: the counter is never touched
    let execution = executor.start(inputs(&[("Action", json!("y")), ("Ip", json!("1.2.3.4"))]));
    assert_eq!(execution.fetch("Count").await?, Value::Null);
    assert!(backend.calls().is_empty());
    drop(execution);

    let metrics = executor.registry().compiler().metrics();
    assert_eq!(metrics.gated_stateful_skips.load(Ordering::Relaxed), 1);

    // gate open
    let execution = executor.start(inputs(&[("Action", json!("x")), ("Ip", json!("1.2.3.4"))]));
    assert_eq!(execution.fetch("Count").await?, json!(1));
    assert_eq!(backend.calls(), vec![r#"increment ["count","Count",["1.2.3.4"]]"#]);
    Ok(())
}

#[tokio::test]
async fn test_compilation_is_deterministic() -> Result<()> {
    let sources = [
        ("main.sqrl", "LET Action := input();\nINCLUDE \"a.sqrl\" WHERE Action=\"login\";\nINCLUDE \"b.sqrl\" WHERE Action=\"login\";\nINCLUDE \"features/${Action}.sqrl\";"),
        ("a.sqrl", "LET Ip := input();\nLET Hits := count(BY Ip);"),
        ("b.sqrl", "LET Limited := rate_limit(10 BY Ip) <= 0;"),
    ];

    let print = |sources: &[(&'static str, &'static str)]| {
        let sources = sources.to_vec();
        async move {
            let compiler = Compiler::new(Arc::new(MemoryLoader::from_sources(sources)));
            let graph = compiler.compile("main.sqrl").await?;
            Ok::<_, CompileError>((SourcePrinter::new(&graph).print_graph(), graph.fingerprint()))
        }
    };

    let (first, first_fp) = print(&sources).await?;
    let (second, second_fp) = print(&sources).await?;
    assert_eq!(first, second);
    assert_eq!(first_fp, second_fp);

    // both includes share one gate slot
    assert_eq!(first.matches("[gate]").count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_gate_chain_is_associative() -> Result<()> {
    let compiler = Compiler::new(Arc::new(MemoryLoader::from_sources([
        ("main.sqrl", "LET G1 := input();\nLET G2 := input();\nLET G3 := input();\nINCLUDE \"a.sqrl\" WHERE G1;"),
        ("a.sqrl", "INCLUDE \"b.sqrl\" WHERE G2;"),
        ("b.sqrl", "INCLUDE \"c.sqrl\" WHERE G3;"),
        ("c.sqrl", "LET Leaf := 1;"),
    ])));
    let graph = compiler.compile("main.sqrl").await?;

    let gate = |name: &str| graph.get(name).map(|s| Gate::cond(rulegraph::compiler::GateCond::new(name, Some(s.ordinal()))));
    let (g1, g2, g3) = (gate("G1").unwrap(), gate("G2").unwrap(), gate("G3").unwrap());

    let leaf = graph.get("Leaf").unwrap().gate().clone();
    assert_eq!(leaf, combine(&combine(&g1, &g2), &g3));
    assert_eq!(leaf, combine(&g1, &combine(&g2, &g3)));

    assert_eq!(
        SourcePrinter::new(&graph).source_for_slot_name("Leaf").unwrap(),
        "if(and(bool(G1:00), bool(G2:01), bool(G3:02)), 1, null)"
    );
    Ok(())
}

#[tokio::test]
async fn test_default_precedence_ignores_order() -> Result<()> {
    for main in [
        "LET Flag := input();\nLET Thing := \"from default\" DEFAULT;\nINCLUDE \"x.sqrl\" WHERE Flag;",
        "LET Flag := input();\nINCLUDE \"x.sqrl\" WHERE Flag;\nLET Thing := \"from default\" DEFAULT;",
    ] {
        let (executor, _) = setup(&[("main.sqrl", main), ("x.sqrl", "LET Thing := \"override\";")]).await?;

        let open = executor.start(inputs(&[("Flag", json!(true))]));
        assert_eq!(open.fetch("Thing").await?, json!("override"));

        let closed = executor.start(inputs(&[("Flag", json!(false))]));
        assert_eq!(closed.fetch("Thing").await?, json!("from default"));
    }
    Ok(())
}

#[tokio::test]
async fn test_duplicate_and_cycle_errors() -> Result<()> {
    let duplicate = Compiler::new(Arc::new(MemoryLoader::from_sources([
        ("main.sqrl", "LET A := 1;\nINCLUDE \"x.sqrl\";"),
        ("x.sqrl", "LET A := 2;"),
    ])));
    assert!(matches!(
        duplicate.compile("main.sqrl").await,
        Err(CompileError::DuplicateSlotName { ref name, .. }) if name == "A"
    ));

    let cycle = Compiler::new(Arc::new(MemoryLoader::from_sources([
        ("main.sqrl", "INCLUDE \"x.sqrl\";"),
        ("x.sqrl", "INCLUDE \"main.sqrl\";"),
    ])));
    match cycle.compile("main.sqrl").await {
        Err(CompileError::Cycle { cycle }) => {
            assert_eq!(cycle, vec!["main.sqrl", "x.sqrl", "main.sqrl"])
        }
        other => panic!("expected cycle, got {:?}", other.map(|g| g.len())),
    }

    let missing = Compiler::new(Arc::new(MemoryLoader::from_sources([(
        "main.sqrl",
        "INCLUDE \"nope.sqrl\";",
    )])));
    assert!(matches!(
        missing.compile("main.sqrl").await,
        Err(CompileError::NotFound { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_fetches_share_one_resolution() -> Result<()> {
    let loader = Arc::new(CountingLoader::new(&[
        ("features/foo_action.sqrl", "LET Thing := \"from foo action\";\nLET Other := concat(Thing, \"!\");"),
        (
            "main.sqrl",
            "LET Action := input();\nLET Thing := \"from default\" DEFAULT;\nLET Other := \"none\" DEFAULT;\nINCLUDE \"features/${Action}.sqrl\";",
        ),
    ]));
    let compiler = Compiler::new(loader.clone());
    let graph = Arc::new(compiler.compile("main.sqrl").await?);
    let executor = Executor::new(graph, compiler, Arc::new(MockStateBackend::new()));

    let execution = executor.start(inputs(&[("Action", json!("foo_action"))]));
    let values = execution.fetch_many(&["Thing", "Other", "Thing"]).await?;
    assert_eq!(
        values,
        vec![json!("from foo action"), json!("from foo action!"), json!("from foo action")]
    );
    assert_eq!(loader.fetches("features/foo_action.sqrl"), 1);
    assert_eq!(executor.registry().active_executions(), 1);

    drop(execution);
    assert_eq!(executor.registry().active_executions(), 0);

    // a new execution resolves again
    let execution = executor.start(inputs(&[("Action", json!("foo_action"))]));
    execution.fetch("Thing").await?;
    assert_eq!(loader.fetches("features/foo_action.sqrl"), 2);
    Ok(())
}

#[tokio::test]
async fn test_dynamic_failure_is_scoped_to_execution() -> Result<()> {
    let (executor, _) = setup(&[
        ("features/broken.sqrl", "LET Thing := ;"),
        ("features/ok.sqrl", "LET Thing := \"ok\";"),
        (
            "main.sqrl",
            "LET Action := input();\nLET Thing := \"from default\" DEFAULT;\nINCLUDE \"features/${Action}.sqrl\";",
        ),
    ])
    .await?;

    let broken = executor.start(inputs(&[("Action", json!("broken"))]));
    let ok = executor.start(inputs(&[("Action", json!("ok"))]));

    let (broken_result, ok_result) = tokio::join!(broken.fetch("Thing"), ok.fetch("Thing"));
    assert!(matches!(broken_result, Err(RuntimeError::Compile { .. })));
    assert_eq!(ok_result?, json!("ok"));
    Ok(())
}

#[tokio::test]
async fn test_dynamic_module_with_gated_static_include() -> Result<()> {
    let (executor, backend) = setup(&[
        (
            "features/login.sqrl",
            "LET Risky := Country = \"XX\";\nINCLUDE \"counters.sqrl\" WHERE Risky;",
        ),
        ("counters.sqrl", "LET Attempts := count(BY Ip);"),
        (
            "main.sqrl",
            "LET Action := input();\nLET Ip := input();\nLET Country := input();\nLET Attempts := 0 DEFAULT;\nINCLUDE \"features/${Action}.sqrl\";",
        ),
    ])
    .await?;

    let safe = executor.start(inputs(&[
        ("Action", json!("login")),
        ("Ip", json!("1.2.3.4")),
        ("Country", json!("US")),
    ]));
    assert_eq!(safe.fetch("Attempts").await?, json!(0));
    assert!(backend.calls().is_empty());

    let risky = executor.start(inputs(&[
        ("Action", json!("login")),
        ("Ip", json!("1.2.3.4")),
        ("Country", json!("XX")),
    ]));
    assert_eq!(risky.fetch("Attempts").await?, json!(1));
    assert_eq!(backend.calls().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_dynamic_include_bound_by_raw_inputs() -> Result<()> {
    let (executor, _) = setup(&[
        ("features/foo_action.sqrl", "LET Thing := \"from foo action\";"),
        (
            "main.sqrl",
            "LET Thing := \"from default\" DEFAULT;\nINCLUDE \"features/${Action}.sqrl\";",
        ),
    ])
    .await?;

    // found
    let execution = executor.start(inputs(&[("Action", json!("foo_action")), ("Ip", json!("1.2.3.4"))]));
    assert_eq!(execution.fetch("Thing").await?, json!("from foo action"));
    assert_eq!(execution.fetch("Action").await?, json!("foo_action"));
    assert_eq!(execution.fetch("Ip").await?, json!("1.2.3.4"));

    // absent
    let execution = executor.start(inputs(&[("Action", json!("abc_action"))]));
    assert_eq!(execution.fetch("Thing").await?, json!("from default"));
    assert_eq!(execution.fetch("Ip").await?, Value::Null);

    // unbound
    let execution = executor.start(HashMap::new());
    assert_eq!(execution.fetch("Thing").await?, json!("from default"));
    assert_eq!(execution.fetch("Action").await?, Value::Null);
    Ok(())
}

#[tokio::test]
async fn test_dynamic_include_bound_through_derived_slot() -> Result<()> {
    let (executor, _) = setup(&[
        ("features/foo_action.sqrl", "LET Thing := \"from foo action\";"),
        (
            "main.sqrl",
            "LET Key := concat(Action, \"_action\");\nLET Thing := \"from default\" DEFAULT;\nINCLUDE \"features/${Key}.sqrl\";",
        ),
    ])
    .await?;

    let execution = executor.start(inputs(&[("Action", json!("foo"))]));
    let values = execution.fetch_many(&["Thing", "Key", "Action"]).await?;
    assert_eq!(
        values,
        vec![json!("from foo action"), json!("foo_action"), json!("foo")]
    );

    let execution = executor.start(HashMap::new());
    assert_eq!(execution.fetch("Key").await?, Value::Null);
    assert_eq!(execution.fetch("Thing").await?, json!("from default"));
    Ok(())
}
