use criterion::{black_box, criterion_group, criterion_main, Criterion};
use remedy_core::detect::{Detector, RuleDetector};
use remedy_core::dispatch::Dispatcher;
use remedy_core::parser::ScriptParser;
use remedy_core::patch;
use remedy_core::rules::builtin_registry;
use remedy_core::validate::validate_and_score;
use remedy_core::Edit;
use std::path::Path;
use std::sync::Arc;

fn synthetic_script(functions: usize) -> String {
    let mut out = String::new();
    for i in 0..functions {
        out.push_str(&format!(
            "function Get-Item{i:04} {{\n    param($Path);\n    $items = gci $Path | ? {{ $_.Length -gt {i} }}   \n    if ($items -eq $null) {{ Write-Host \"none\" }}\n    $items | % {{ echo $_.Name }}\n}}\n\n"
        ));
    }
    out
}

fn bench_patch_apply(c: &mut Criterion) {
    let content = "x".repeat(200_000);
    let edits: Vec<Edit> = (0..10_000)
        .map(|i| Edit::replace(i * 20..i * 20 + 3, "yyyy"))
        .collect();

    c.bench_function("patch_apply_10k_edits", |b| {
        b.iter(|| {
            let patched = patch::apply(black_box(&content), black_box(&edits)).unwrap();
            black_box(patched.content.len());
        });
    });
}

fn bench_fix_chain(c: &mut Criterion) {
    let registry = Arc::new(builtin_registry().unwrap());
    let enabled = registry.default_enabled();
    let dispatcher = Dispatcher::new(registry.clone(), enabled);
    let detector = RuleDetector::new(registry);
    let content = synthetic_script(200);
    let violations = detector.detect(Path::new("bench.ps1"), &content).unwrap();

    c.bench_function("fix_chain_200_functions", |b| {
        b.iter(|| {
            let result = dispatcher.run_chain("bench.ps1", black_box(&content), &violations);
            black_box(result.outcomes.len());
        });
    });

    let fixed = dispatcher
        .run_chain("bench.ps1", &content, &violations)
        .final_content;
    c.bench_function("validate_and_score_200_functions", |b| {
        b.iter(|| {
            let result = validate_and_score(&ScriptParser, black_box(&content), &fixed).unwrap();
            black_box(result.accepted);
        });
    });
}

criterion_group!(patch_core, bench_patch_apply, bench_fix_chain);
criterion_main!(patch_core);
