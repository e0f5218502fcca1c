//! Benchmarks for trigger propagation
//!
//! Run with: cargo bench -p trellis-core

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use trellis_core::reactive::{Context, EffectHandle, Signal};

/// Build a chain of `n` effects where effect `i` doubles signal `i - 1` into
/// signal `i`.
fn make_chain(ctx: &Context, n: usize) -> (Vec<Signal<u64>>, Vec<EffectHandle>) {
    let signals: Vec<Signal<u64>> = (0..n).map(|_| Signal::new(0)).collect();
    let handles = (1..n)
        .map(|i| {
            let (from, to) = (signals[i - 1].clone(), signals[i].clone());
            ctx.effect(move |_| to.set(from.get().wrapping_mul(2)))
        })
        .collect();
    (signals, handles)
}

fn bench_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/chain");

    for n in [10, 100, 1000] {
        let ctx = Context::immediate();
        let (signals, _handles) = make_chain(&ctx, n);
        let mut next = 0_u64;
        group.bench_with_input(BenchmarkId::new("set_head", n), &signals, |b, signals| {
            b.iter(|| {
                next += 1;
                signals[0].set(next);
                black_box(signals[n - 1].get_untracked())
            })
        });
    }

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagation/fan_out");

    for n in [10, 100, 1000] {
        let ctx = Context::immediate();
        let source = Signal::new(0_u64);
        let _handles: Vec<EffectHandle> = (0..n)
            .map(|_| {
                let s = source.clone();
                ctx.effect(move |_| {
                    black_box(s.get());
                })
            })
            .collect();

        let mut next = 0_u64;
        group.bench_with_input(BenchmarkId::new("set", n), &source, |b, source| {
            b.iter(|| {
                next += 1;
                source.set(next);
            })
        });
    }

    group.finish();
}

fn bench_memo(c: &mut Criterion) {
    let ctx = Context::immediate();
    let source = Signal::new(0_u64);
    let s = source.clone();
    let parity = ctx.memo(move || s.get() % 2);
    let p = parity.clone();
    let _reader = ctx.effect(move |_| {
        black_box(p.get());
    });

    let mut next = 0_u64;
    c.bench_function("propagation/memo_collapse", |b| {
        b.iter(|| {
            // Same parity every step: the memo recomputes, the reader does not.
            next += 2;
            source.set(next);
        })
    });
}

criterion_group!(benches, bench_chain, bench_fan_out, bench_memo);
criterion_main!(benches);
