//! Latency benchmarks for the per-step sampling path
//!
//! Filtering and softmax run once per generated token over the whole
//! vocabulary (13,088 entries for CDial-GPT), so they bound the
//! non-model cost of a generation step.
//!
//! Run with: cargo bench -p modelhost-chitchat

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use modelhost_chitchat::{
    softmax, top_filtering, LanguageModel, SamplingEngine, SamplingOptions, SpecialTokens,
};
use modelhost_core::Result;

const VOCAB_SIZE: usize = 13_088;

const SPECIAL: SpecialTokens = SpecialTokens {
    bos: 0,
    eos: 1,
    pad: 2,
    speaker1: 3,
    speaker2: 4,
};

fn logits(len: usize) -> Vec<f32> {
    (0..len).map(|i| ((i * 7919) % 1000) as f32 / 100.0).collect()
}

struct StaticModel(Vec<f32>);

impl LanguageModel for StaticModel {
    fn next_token_logits(&self, _: &[u32], _: &[u32]) -> Result<Vec<f32>> {
        Ok(self.0.clone())
    }
}

fn benchmark_top_filtering(c: &mut Criterion) {
    let base = logits(VOCAB_SIZE);
    let settings = vec![
        ("top_p_0.9", 0, 0.9),
        ("top_k_50", 50, 0.0),
        ("top_k_50_top_p_0.9", 50, 0.9),
    ];

    let mut group = c.benchmark_group("Top_Filtering");
    group.sample_size(100);

    for (name, top_k, top_p) in settings {
        group.bench_with_input(BenchmarkId::new("filter", name), &(top_k, top_p), |b, &(k, p)| {
            b.iter(|| {
                let mut values = base.clone();
                top_filtering(black_box(&mut values), k, p);
                values
            });
        });
    }

    group.finish();
}

fn benchmark_softmax(c: &mut Criterion) {
    let base = logits(VOCAB_SIZE);
    c.bench_function("softmax_vocab", |b| b.iter(|| softmax(black_box(&base))));
}

fn benchmark_generation(c: &mut Criterion) {
    let opts = SamplingOptions {
        max_out_len: 30,
        min_out_len: 30,
        seed: Some(7),
        ..Default::default()
    };
    let engine = SamplingEngine::new(StaticModel(logits(VOCAB_SIZE)), SPECIAL, opts)
        .expect("valid sampling options");
    let utterance: Vec<u32> = (10..30).collect();

    c.bench_function("generate_30_tokens_static_model", |b| {
        b.iter(|| engine.generate(black_box(&utterance), &[]).unwrap())
    });
}

criterion_group!(
    benches,
    benchmark_top_filtering,
    benchmark_softmax,
    benchmark_generation
);
criterion_main!(benches);
