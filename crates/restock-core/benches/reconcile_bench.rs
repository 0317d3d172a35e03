use std::collections::BTreeMap;

use criterion::{criterion_group, criterion_main, Criterion};
use restock_core::{normalize, reconcile, score, MemorySnapshot, ProductRecord};

const CATEGORIES: [&str; 5] = ["Flower", "Prerolls", "Shatter", "Live Resin", "Full Spec Oil"];

fn mk_pos(index: usize) -> ProductRecord {
    ProductRecord {
        name: format!("Strain {index} - 1g"),
        category: CATEGORIES[index % CATEGORIES.len()].to_string(),
        quantity: 5.0,
        unit_of_measure: "g".to_string(),
        sku: None,
    }
}

fn mk_production(index: usize) -> ProductRecord {
    ProductRecord {
        name: format!("Strain {index}"),
        category: CATEGORIES[index % CATEGORIES.len()].to_string(),
        quantity: 250.0,
        unit_of_measure: "g".to_string(),
        sku: None,
    }
}

fn bench_reconcile(c: &mut Criterion) {
    let pos: Vec<ProductRecord> = (0..100).map(mk_pos).collect();
    let production: Vec<ProductRecord> = (0..100).map(mk_production).collect();
    let memory = MemorySnapshot::new();
    let overrides = BTreeMap::new();

    c.bench_function("reconcile_100x100", |b| {
        b.iter(|| reconcile(&pos, &production, &memory, &overrides));
    });
}

fn bench_score(c: &mut Criterion) {
    let lhs = normalize("Blue Dream Live Resin - 1g");
    let rhs = normalize("Blue Dream Resin");

    c.bench_function("score_pair", |b| {
        b.iter(|| score(&lhs, &rhs, "Live Resin", "Live Resin"));
    });
}

criterion_group!(benches, bench_reconcile, bench_score);
criterion_main!(benches);
