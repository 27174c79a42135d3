/// Recording overhead benchmarks
///
/// Measures the cost of each guard type against an uninstrumented baseline,
/// and the cost of serializing a populated tree.
use benchtree::{Bunch, Config, Environment, Record, Scope, Task, Tree};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

/// Benchmark: one guard per iteration
fn bench_guards(c: &mut Criterion) {
    let mut group = c.benchmark_group("guards");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("baseline", |b| {
        b.iter(|| black_box(42u64).wrapping_mul(3));
    });

    let env = Environment::new(Config::default());
    group.bench_function("scope", |b| {
        b.iter(|| {
            let _scope = Scope::in_env(&env, "scope");
            black_box(42u64).wrapping_mul(3)
        });
    });
    let _ = env.flush_to_string();

    let env = Environment::new(Config::default());
    group.bench_function("scope_with_comment", |b| {
        b.iter(|| {
            let mut scope = Scope::in_env(&env, "scope");
            scope.add_comment("N", 42);
            black_box(42u64).wrapping_mul(3)
        });
    });
    let _ = env.flush_to_string();

    let env = Environment::new(Config::default());
    group.bench_function("task_run", |b| {
        let mut task = Task::in_env(&env, "task", |x: u64| x.wrapping_mul(3));
        b.iter(|| task.run_with(black_box(42)));
    });
    let _ = env.flush_to_string();

    let env = Environment::new(Config::default());
    group.bench_function("bunch", |b| {
        b.iter(|| {
            let _bunch = Bunch::in_env(&env, "bunch");
            black_box(42u64).wrapping_mul(3)
        });
    });
    let _ = env.flush_to_string();

    let env = Environment::new(Config::disabled());
    group.bench_function("scope_disabled", |b| {
        b.iter(|| {
            let _scope = Scope::in_env(&env, "scope");
            black_box(42u64).wrapping_mul(3)
        });
    });

    group.finish();
}

fn populated_tree(leaves: usize) -> Tree {
    let mut tree = Tree::new();
    let mut opened = 0;
    for i in 0..leaves {
        if i % 16 == 0 {
            if opened > 0 {
                let _ = tree.close_subtree();
            }
            let _ = tree.open_subtree(Record::new("bunch").with_comment("i", i));
            opened += 1;
        }
        let _ = tree.add_leaf(Record::new("scope").with_elapsed(Duration::from_nanos(i as u64)));
    }
    tree
}

/// Benchmark: JSON serialization of a tree
fn bench_dump(c: &mut Criterion) {
    let mut group = c.benchmark_group("dump_tree");

    for leaves in [64usize, 1024, 16_384] {
        let tree = populated_tree(leaves);
        group.throughput(Throughput::Elements(leaves as u64));
        group.bench_with_input(BenchmarkId::from_parameter(leaves), &tree, |b, tree| {
            b.iter(|| {
                let mut writer = benchtree::json_writer::JsonWriter::new();
                let _ = writer.push_map_start();
                let _ = benchtree::json_writer::dump_tree(&mut writer, "bench", tree);
                let _ = writer.push_map_end();
                black_box(writer.take())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_guards, bench_dump);
criterion_main!(benches);
