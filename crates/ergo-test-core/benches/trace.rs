//! Tracing evaluator benchmark
//!
//! Measures the stages of one traced evaluation:
//! 1. Compile + source map construction
//! 2. Plain reduction (no tracing)
//! 3. Full traced evaluation (cost trace + value walk + merge)

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ergo_test_core::context::build_context;
use ergo_test_core::script::{
    Env, Interpreter, NetworkPrefix, ReferenceCompiler, ScriptCompiler, ScriptEvaluator, VersionScope,
};
use ergo_test_core::sourcemap::map_expression_tree;
use ergo_test_core::testdsl::{MockBox, MockContext};
use ergo_test_core::trace::evaluate_with_trace;

const SCRIPT: &str = "val minValue = 1000L
val total = OUTPUTS.fold(0L, { (acc: Long, b: Box) => acc + b.value })
total > minValue && OUTPUTS.forall { (b: Box) => b.value >= minValue } && HEIGHT > 100";

/// Context with `n` outputs of increasing value.
fn context_with_outputs(n: usize) -> MockContext {
    let mut mock = MockContext::degenerate(150);
    mock.outputs = (0..n)
        .map(|i| MockBox {
            value: 10_000 + i as i64,
            ..MockBox::default()
        })
        .collect();
    mock
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_and_map", |b| {
        b.iter(|| {
            let script = ReferenceCompiler
                .compile(black_box(SCRIPT), NetworkPrefix::Mainnet, 3)
                .unwrap();
            map_expression_tree(&script.tree.root, None, "bench.es")
        })
    });
}

fn bench_evaluation(c: &mut Criterion) {
    let script = ReferenceCompiler
        .compile(SCRIPT, NetworkPrefix::Mainnet, 3)
        .unwrap();
    let map = map_expression_tree(&script.tree.root, None, "bench.es");

    let mut group = c.benchmark_group("evaluation");
    for n in [4usize, 32] {
        let ctx = build_context(&context_with_outputs(n), None).unwrap();
        group.bench_function(format!("reduce_{}_outputs", n), |b| {
            b.iter(|| {
                let _scope = VersionScope::enter(ctx.script_version);
                Interpreter::new()
                    .reduce(black_box(&ctx), &script.tree, &Env::new())
                    .unwrap()
            })
        });
        group.bench_function(format!("traced_{}_outputs", n), |b| {
            b.iter(|| evaluate_with_trace(black_box(&ctx), &script.tree, &map))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_evaluation);
criterion_main!(benches);
