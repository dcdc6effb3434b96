//! Benchmarks for sushi-forms core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::path::{Path, PathBuf};
use sushi_forms::core::extractor;
use sushi_forms::core::library::AppLibrary;
use sushi_forms::core::types::DefinitionFormat;
use sushi_forms::sandbox::{self, EvalOptions};

fn samples_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("apps")
}

fn bench_evaluate(c: &mut Criterion) {
    let dir = samples_dir();
    let options = EvalOptions::default();

    let mut group = c.benchmark_group("evaluate");
    for (file, format) in [
        ("FastqcApp.rb", DefinitionFormat::Script),
        ("BamStatsApp.rb", DefinitionFormat::Script),
        ("CountQCApp.yaml", DefinitionFormat::Declarative),
    ] {
        let path = dir.join(file);
        let source = std::fs::read_to_string(&path).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(file), &source, |b, source| {
            b.iter(|| {
                let app = sandbox::evaluate_source(black_box(source), format, "Bench", &path, &options).unwrap();
                black_box(app);
            });
        });
    }
    group.finish();
}

fn bench_evaluate_params(c: &mut Criterion) {
    let options = EvalOptions::default();
    let path = Path::new("GeneratedApp.rb");

    let mut group = c.benchmark_group("evaluate_params");
    for count in [10, 100, 1000] {
        let mut source = String::from("class GeneratedApp < SushiFabric::SushiApp\n  def initialize\n    super\n");
        for i in 0..count {
            source.push_str(&format!("    @params['p{i}'] = [{i}, 1, 2, 3]\n"));
            source.push_str(&format!("    @params['p{i}', 'description'] = 'param {i}'\n"));
        }
        source.push_str("  end\nend\n");

        group.bench_with_input(BenchmarkId::from_parameter(count), &source, |b, source| {
            b.iter(|| {
                let app = sandbox::evaluate_source(black_box(source), DefinitionFormat::Script, "Generated", path, &options)
                    .unwrap();
                black_box(app);
            });
        });
    }
    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let path = samples_dir().join("FastqcApp.rb");
    let source = std::fs::read_to_string(&path).unwrap();
    let mut app = sandbox::evaluate_source(&source, DefinitionFormat::Script, "Fastqc", &path, &EvalOptions::default())
        .unwrap();
    app.required_params = app.params.keys().map(str::to_string).collect();

    c.bench_function("extract_fastqc", |b| {
        b.iter(|| {
            let config = extractor::extract(black_box(&app), &app.params);
            black_box(config);
        });
    });
}

fn bench_list(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..200 {
        std::fs::write(dir.path().join(format!("Bench{i:03}App.rb")), "class X\nend\n").unwrap();
        std::fs::write(dir.path().join(format!("notes{i:03}.txt")), "ignored").unwrap();
    }
    let library = AppLibrary::new(dir.path(), EvalOptions::default());

    c.bench_function("list_200_definitions", |b| {
        b.iter(|| {
            let names = library.list_applications();
            black_box(names);
        });
    });
}

criterion_group!(benches, bench_evaluate, bench_evaluate_params, bench_extract, bench_list);
criterion_main!(benches);
