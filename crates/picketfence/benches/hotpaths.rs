use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use picketfence::synthetic::SyntheticFence;
use picketfence::{
    condition_images, detect_orientation, fit_picket, fwhm_center, ConditionConfig, LeafSample,
    PicketFence,
};

fn make_profile(n: usize, center: f64, sigma: f64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..n)
        .map(|i| {
            let d = (i as f64 - center) / sigma;
            let v = 100.0 + 900.0 * (-0.5 * d * d).exp();
            (v + (rng.gen::<f64>() - 0.5) * 2.0 * 5.0) as f32
        })
        .collect()
}

fn make_samples(n: usize) -> Vec<LeafSample> {
    let mut rng = StdRng::seed_from_u64(12345);
    (0..n)
        .map(|i| {
            let lateral = -100.0 + 200.0 * i as f64 / n as f64;
            LeafSample {
                leaf_index: i,
                lateral_mm: lateral,
                measured_mm: 12.0 + 0.01 * lateral + rng.gen_range(-0.05f64..0.05f64),
                fwhm_mm: 3.0,
            }
        })
        .collect()
}

fn bench_fwhm(c: &mut Criterion) {
    let profile = make_profile(64, 31.3, 3.2);
    c.bench_function("fwhm_center_64", |b| {
        b.iter(|| black_box(fwhm_center(black_box(&profile), 50.0)))
    });
}

fn bench_fit(c: &mut Criterion) {
    let samples = make_samples(60);
    for degree in [1usize, 2] {
        c.bench_function(&format!("fit_picket_60_deg{degree}"), |b| {
            b.iter(|| {
                let fit = fit_picket(black_box(&samples), degree)
                    .expect("deterministic fixture should always fit");
                black_box(fit)
            })
        });
    }
}

fn bench_orientation(c: &mut Criterion) {
    let frame = SyntheticFence::evenly_spaced(10, 15.0)
        .with_size(1024, 768)
        .render();
    c.bench_function("detect_orientation_1024x768", |b| {
        b.iter(|| black_box(detect_orientation(black_box(&frame))))
    });
}

fn bench_condition(c: &mut Criterion) {
    let clean = SyntheticFence::evenly_spaced(10, 15.0)
        .with_size(1024, 768)
        .to_epid()
        .expect("synthetic frame should be valid");
    let noisy = SyntheticFence::evenly_spaced(10, 15.0)
        .with_size(1024, 768)
        .with_noise(10.0, 3)
        .with_hot_pixels(200, 4)
        .to_epid()
        .expect("synthetic frame should be valid");
    let config = ConditionConfig::default();

    c.bench_function("condition_1024x768_clean", |b| {
        b.iter(|| black_box(condition_images(black_box(std::slice::from_ref(&clean)), &config)))
    });
    let filtered = ConditionConfig {
        filter_size: Some(3),
        ..ConditionConfig::default()
    };
    c.bench_function("condition_1024x768_median3", |b| {
        b.iter(|| black_box(condition_images(black_box(std::slice::from_ref(&noisy)), &filtered)))
    });
}

fn bench_analyze(c: &mut Criterion) {
    let image = SyntheticFence::evenly_spaced(10, 15.0)
        .with_size(1024, 768)
        .with_noise(5.0, 11)
        .to_epid()
        .expect("synthetic frame should be valid");
    let parallel = PicketFence::default();
    let mut serial = PicketFence::default();
    serial.config_mut().sampler.parallel = false;

    c.bench_function("analyze_1024x768_parallel", |b| {
        b.iter(|| black_box(parallel.analyze(black_box(std::slice::from_ref(&image)))))
    });
    c.bench_function("analyze_1024x768_serial", |b| {
        b.iter(|| black_box(serial.analyze(black_box(std::slice::from_ref(&image)))))
    });
}

criterion_group!(
    hotpaths,
    bench_fwhm,
    bench_fit,
    bench_orientation,
    bench_condition,
    bench_analyze
);
criterion_main!(hotpaths);
