// Per-token and per-request CPU work outside the model: greedy argmax over a
// vocabulary-sized score vector and label sanitization of raw replies.
//
// Vocabulary sizes follow the registry models (Phi-3 32K, Qwen 2.5 152K,
// Gemma 256K).

use std::hint::black_box;

use allergen_label::generate::greedy;
use allergen_label::prompt::select;
use allergen_label::sanitize::{Strictness, sanitize};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

const VOCAB_SIZES: &[usize] = &[32_064, 151_936, 256_000];

const REPLIES: &[(&str, &str)] = &[
    ("short", "milk"),
    ("list", "Wheat, Eggs; milk, tree-nut, Soya."),
    (
        "chatty",
        "Allergens: milk, egg, peanut<|im_end|>\n<|im_start|>user\nInput: more text",
    ),
    (
        "leaked",
        "Analyze each ingredient and identify allergens from the valid allergens list: milk",
    ),
];

fn make_scores(n: usize) -> Vec<f32> {
    // Deterministic, peak near the end so the scan cannot stop early.
    (0..n)
        .map(|i| ((i * 7919) % 1000) as f32 / 100.0 + if i == n - 3 { 20.0 } else { 0.0 })
        .collect()
}

fn bench_greedy(c: &mut Criterion) {
    let mut group = c.benchmark_group("greedy");
    for &n in VOCAB_SIZES {
        let scores = make_scores(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &scores, |b, scores| {
            b.iter(|| greedy(black_box(scores)))
        });
    }
    group.finish();
}

fn bench_sanitize(c: &mut Criterion) {
    let template = select("qwen2.5-1.5b-instruct-q4_k_m.gguf");
    let mut group = c.benchmark_group("sanitize");
    for &(name, raw) in REPLIES {
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(name), raw, |b, raw| {
            b.iter(|| sanitize(black_box(raw), &template, Strictness::Strict))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_greedy, bench_sanitize);
criterion_main!(benches);
