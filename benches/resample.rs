use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use sipbridge::codec::resample::Resampler;

/// One 20ms telephony frame's worth of samples at 8kHz (160 samples), the
/// smallest unit `process()` is ever called with in a call's ingress path.
fn make_frame(len: usize) -> Vec<i16> {
    (0..len).map(|i| ((i as f32 * 0.1).sin() * 8000.0) as i16).collect()
}

pub fn resample_one_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("Resample 20ms frame");

    for &(from_hz, to_hz, len) in &[
        (8_000u32, 24_000u32, 160usize),
        (8_000, 8_000, 160),
        (16_000, 24_000, 320),
        (48_000, 24_000, 960),
    ] {
        group.bench_with_input(BenchmarkId::new(format!("{from_hz}->{to_hz}"), len), &len, |b, &len| {
            b.iter_batched_ref(
                || (Resampler::new(from_hz, to_hz), make_frame(len)),
                |(resampler, frame)| {
                    black_box(resampler.process(black_box(frame)));
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

pub fn resample_sustained_call(c: &mut Criterion) {
    // A call's ingress path calls process() once per 20ms frame for the
    // call's whole duration; this approximates a few seconds of that at
    // the 8kHz->24kHz ratio this bridge runs by default.
    c.bench_function("Resample 8k->24k, 500 frames (10s call)", |b| {
        b.iter_batched_ref(
            || Resampler::new(8_000, 24_000),
            |resampler| {
                let frame = make_frame(160);
                for _ in 0..500 {
                    black_box(resampler.process(black_box(&frame)));
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, resample_one_frame, resample_sustained_call);
criterion_main!(benches);
