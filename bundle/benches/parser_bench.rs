use criterion::{black_box, criterion_group, criterion_main, Criterion};
use whistle_bundle::{assemble_bundle, parse_bytes, DataItemBuilder};
use whistle_crypto::Ed25519Keypair;

fn parse_small_items_bench(c: &mut Criterion) {
    let items: Vec<_> = (0..100u8)
        .map(|i| {
            DataItemBuilder::new(Ed25519Keypair::from_seed([i; 32]))
                .tag("Content-Type", "text/plain")
                .data(vec![i; 512])
                .build()
        })
        .collect();
    let bundle = assemble_bundle(&items);

    c.bench_function("parse_100_items_512B", |b| {
        b.iter(|| parse_bytes(black_box(&bundle)))
    });
}

fn parse_large_item_bench(c: &mut Criterion) {
    let item = DataItemBuilder::new(Ed25519Keypair::from_seed([1; 32]))
        .data(vec![0xAB; 4 * 1024 * 1024])
        .build();
    let bundle = assemble_bundle(&[item]);

    c.bench_function("parse_1_item_4MB", |b| {
        b.iter(|| parse_bytes(black_box(&bundle)))
    });
}

criterion_group!(benches, parse_small_items_bench, parse_large_item_bench);
criterion_main!(benches);
