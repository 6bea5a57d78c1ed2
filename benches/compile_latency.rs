use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Runtime;

use rulegraph::compiler::{Compiler, MemoryLoader};
use rulegraph::runtime::Executor;
use rulegraph::state::MockStateBackend;
use rulegraph::SourcePrinter;

fn create_compiler(modules: usize) -> Compiler {
    let mut sources = vec![
        (
            "features/login.sqrl".to_string(),
            "LET Thing := \"from login\";\nLET Attempts := count(BY Ip);".to_string(),
        ),
        (
            "main.sqrl".to_string(),
            {
                let mut main = String::from(
                    "LET Action := input();\nLET Ip := input();\nLET Thing := \"from default\" DEFAULT;\n",
                );
                for i in 0..modules {
                    main.push_str(&format!(
                        "INCLUDE \"rules/r{}.sqrl\" WHERE Action=\"a{}\";\n",
                        i,
                        i % 4
                    ));
                }
                main.push_str("INCLUDE \"features/${Action}.sqrl\";\n");
                main
            },
        ),
    ];
    for i in 0..modules {
        sources.push((
            format!("rules/r{}.sqrl", i),
            format!("LET Hits{} := count(BY Ip);\nLET Flag{} := Hits{} > 10;", i, i, i),
        ));
    }

    Compiler::new(Arc::new(MemoryLoader::from_sources(sources)))
}

fn bench_compile(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    for modules in [10, 100] {
        let compiler = create_compiler(modules);
        c.bench_function(&format!("compile_{}_modules", modules), |b| {
            b.to_async(&rt)
                .iter(|| async { black_box(compiler.compile("main.sqrl").await.unwrap()) })
        });
    }
}

fn bench_print(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let compiler = create_compiler(100);
    let graph = rt.block_on(compiler.compile("main.sqrl")).unwrap();

    c.bench_function("print_graph_100_modules", |b| {
        b.iter(|| black_box(SourcePrinter::new(&graph).print_graph()))
    });
}

fn bench_execution(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let compiler = create_compiler(100);
    let graph = Arc::new(rt.block_on(compiler.compile("main.sqrl")).unwrap());
    let executor = Executor::new(graph, compiler, Arc::new(MockStateBackend::new()));

    let inputs: HashMap<String, Value> = [
        ("Action".to_string(), json!("login")),
        ("Ip".to_string(), json!("1.2.3.4")),
    ]
    .into_iter()
    .collect();

    c.bench_function("execution_gated_fetch", |b| {
        b.to_async(&rt).iter(|| async {
            let execution = executor.start(inputs.clone());
            black_box(execution.fetch("Flag0").await.unwrap())
        })
    });

    c.bench_function("execution_dynamic_include", |b| {
        b.to_async(&rt).iter(|| async {
            let execution = executor.start(inputs.clone());
            black_box(execution.fetch_many(&["Thing", "Attempts"]).await.unwrap())
        })
    });
}

criterion_group!(benches, bench_compile, bench_print, bench_execution);
criterion_main!(benches);
