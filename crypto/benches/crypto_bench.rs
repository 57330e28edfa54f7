use criterion::{black_box, criterion_group, criterion_main, Criterion};
use whistle_crypto::{BlobHasher, Ed25519Keypair, ListHasher, SignatureType};

fn ed25519_verify_bench(c: &mut Criterion) {
    let kp = Ed25519Keypair::from_seed([7; 32]);
    let msg = [42u8; 48];
    let sig = kp.sign(&msg);
    let owner = kp.owner();

    c.bench_function("ed25519_verify_48B", |b| {
        b.iter(|| SignatureType::Ed25519.verify(black_box(&owner), black_box(&msg), &sig))
    });
}

fn deep_hash_1mb_bench(c: &mut Criterion) {
    let data = vec![0xCDu8; 1024 * 1024];

    c.bench_function("deep_hash_blob_1MB_streamed", |b| {
        b.iter(|| {
            let mut h = BlobHasher::new(data.len() as u64);
            for chunk in data.chunks(256 * 1024) {
                h.update(black_box(chunk));
            }
            h.finish()
        })
    });
}

fn item_signature_data_bench(c: &mut Criterion) {
    let owner = [1u8; 32];
    let payload = vec![0xABu8; 4096];

    c.bench_function("item_signature_data_4KB", |b| {
        b.iter(|| {
            let mut list = ListHasher::new(8);
            list.push_blob(b"dataitem");
            list.push_blob(b"1");
            list.push_blob(b"2");
            list.push_blob(black_box(&owner));
            list.push_blob(&[]);
            list.push_blob(&[]);
            list.push_blob(&[]);
            list.push_blob(black_box(&payload));
            list.finish()
        })
    });
}

criterion_group!(
    benches,
    ed25519_verify_bench,
    deep_hash_1mb_bench,
    item_signature_data_bench,
);
criterion_main!(benches);
