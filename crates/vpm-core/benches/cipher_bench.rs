//! Criterion benchmarks for the VPM cipher engine and envelope codec.
//!
//! Run with:
//! ```bash
//! cargo bench --package vpm-core --bench cipher_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vpm_core::{decode_envelope, encode_envelope, CipherEngine, Message, SessionKey};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_hello() -> Message {
    Message::new("hello").with("content", "Hello from client!")
}

fn make_payload(len: usize) -> Message {
    Message::new("data").with("payload", "x".repeat(len))
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_encrypt(c: &mut Criterion) {
    let engine = CipherEngine::new(SessionKey::generate());
    let mut group = c.benchmark_group("encrypt");
    for len in [16usize, 256, 4096] {
        let plaintext = vec![0x5Au8; len];
        group.bench_with_input(BenchmarkId::new("bytes", len), &plaintext, |b, p| {
            b.iter(|| engine.encrypt(black_box(p)))
        });
    }
    group.finish();
}

fn bench_decrypt(c: &mut Criterion) {
    let engine = CipherEngine::new(SessionKey::generate());
    let mut group = c.benchmark_group("decrypt");
    for len in [16usize, 256, 4096] {
        let envelope = engine.encrypt(&vec![0x5Au8; len]);
        group.bench_with_input(BenchmarkId::new("bytes", len), &envelope, |b, e| {
            b.iter(|| engine.decrypt(black_box(e)).expect("decrypt must succeed"))
        });
    }
    group.finish();
}

/// Full encode+decode of the message types the binaries actually send.
fn bench_envelope_roundtrip(c: &mut Criterion) {
    let engine = CipherEngine::new(SessionKey::generate());
    let mut group = c.benchmark_group("envelope_roundtrip");

    let hello = make_hello();
    group.bench_function("hello", |b| {
        b.iter(|| {
            let bytes = encode_envelope(&engine, black_box(&hello)).unwrap();
            decode_envelope(&engine, black_box(&bytes)).unwrap()
        })
    });

    let bulk = make_payload(2048);
    group.bench_function("data_2k", |b| {
        b.iter(|| {
            let bytes = encode_envelope(&engine, black_box(&bulk)).unwrap();
            decode_envelope(&engine, black_box(&bytes)).unwrap()
        })
    });

    group.finish();
}

/// Key derivation runs 100k PBKDF2 rounds; tracked so changes to the
/// iteration count show up.
fn bench_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_derivation");
    group.sample_size(10);
    group.bench_function("from_password", |b| {
        b.iter(|| SessionKey::from_password(black_box("secret_password")))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_encrypt,
    bench_decrypt,
    bench_envelope_roundtrip,
    bench_key_derivation
);
criterion_main!(benches);
