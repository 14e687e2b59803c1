use criterion::{black_box, criterion_group, criterion_main, Criterion};
use recon_core::{
    Measurement, ReconTarget, ReferenceCalculator, ReferenceCalculatorSettings, SliceWindow,
    SourceId, StreamKey, TargetId,
};
use sensor_models::PositionAccuracy;
use std::collections::BTreeMap;

/// `n` targets flying straight lines, one report per second for `duration`.
fn make_targets(n: u32, duration: u32) -> BTreeMap<TargetId, ReconTarget> {
    (0..n)
        .map(|i| {
            let heading = i as f64 * std::f64::consts::TAU / n as f64;
            let (vx, vy) = (200.0 * heading.cos(), 200.0 * heading.sin());
            let mut target = ReconTarget::new(TargetId(i));
            for k in 0..duration {
                let t = k as f64;
                let mm = Measurement::new(t, SourceId(u64::from(i * duration + k)), vx * t, vy * t)
                    .with_accuracy(PositionAccuracy::new(50.0, 50.0, 0.0));
                target.add_measurement(StreamKey::new(21, 0, 0), mm);
            }
            (target.id, target)
        })
        .collect()
}

fn bench_calculator(c: &mut Criterion) {
    let mut group = c.benchmark_group("calculator");

    for n in [10, 100, 500] {
        for multithreading in [false, true] {
            let name = format!("{n}_targets_{}", if multithreading { "mt" } else { "st" });
            group.bench_function(name, |b| {
                let settings = ReferenceCalculatorSettings {
                    multithreading,
                    ..Default::default()
                };
                b.iter(|| {
                    let mut targets = make_targets(n, 120);
                    let mut calc = ReferenceCalculator::new(settings.clone()).unwrap();
                    calc.prepare_for_next_slice(SliceWindow::first(0.0, 120.0), &targets);
                    black_box(calc.compute_references(&mut targets));
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_calculator);
criterion_main!(benches);
