//! Performance benchmarks for PDF Template MCP Server
//!
//! Run with: `cargo bench`

#[path = "../tests/common/mod.rs"]
mod common;

use common::{form_page, TemplateBuilder};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pdf_template_mcp::pdf::{apply, scan, Edit, ReplaceOptions, ScanOptions, TemplateDocument};
use pdf_template_mcp::{ServerConfig, TemplateEditor};
use std::collections::BTreeMap;

fn template(pages: usize, fields_per_page: usize) -> Vec<u8> {
    let mut builder = TemplateBuilder::new();
    for _ in 0..pages {
        builder = builder.page(form_page(fields_per_page));
    }
    builder.build()
}

/// Benchmark field detection at different document sizes
fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan");

    for (pages, fields) in [(1, 10), (10, 10), (10, 30)] {
        let data = template(pages, fields);
        group.throughput(Throughput::Elements((pages * fields) as u64));
        group.bench_with_input(
            BenchmarkId::new("fields", format!("{}x{}", pages, fields)),
            &data,
            |b, data| {
                b.iter(|| {
                    let doc = TemplateDocument::open_bytes(black_box(data)).unwrap();
                    scan(&doc, &ScanOptions::default()).unwrap()
                });
            },
        );
    }

    group.finish();
}

/// Benchmark in-memory replacement of every field
fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");
    let data = template(5, 20);
    let options = ReplaceOptions::default();

    group.bench_function("replace_all_100_fields", |b| {
        b.iter(|| {
            let mut doc = TemplateDocument::open_bytes(&data).unwrap();
            let result = scan(&doc, &ScanOptions::default()).unwrap();
            let edits: Vec<Edit<'_>> = result
                .fields
                .iter()
                .map(|field| Edit {
                    field,
                    value: "Replacement value",
                })
                .collect();
            apply(&mut doc, &edits, &options).unwrap();
            doc.save_to_bytes().unwrap()
        });
    });

    group.finish();
}

/// End-to-end set_fields including alias lookup and atomic commit
fn bench_set_fields(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let data = template(1, 20);
    let pdf = dir.path().join("bench.pdf");
    let editor = TemplateEditor::new(ServerConfig::default());
    let fields: BTreeMap<String, String> = (0..5)
        .map(|i| (format!("x72y{}_p0", 750 - 20 * i), format!("Value {}", i)))
        .collect();

    c.bench_function("set_fields_5_of_20", |b| {
        b.iter(|| {
            std::fs::write(&pdf, &data).unwrap();
            editor.set_fields(&pdf.to_string_lossy(), black_box(&fields)).unwrap()
        });
    });
}

criterion_group!(benches, bench_scan, bench_apply, bench_set_fields);
criterion_main!(benches);
