//! Benchmarks for the vehicle dynamics evaluation hot path
//!
//! The laptime solver evaluates the dynamics at every mesh node for every
//! Jacobian sweep, so the per-call cost with both scalar types is the
//! number that matters.

use criterion::{criterion_group, criterion_main, Criterion};
use laptime_rs::math::{Ad, Dual};
use laptime_rs::vehicle::{F1Car, Kart, VehicleModel};
use std::hint::black_box;

fn f1_state() -> ([f64; 6], [f64; 4], [f64; 3]) {
    let q = [0.0, 0.5, 0.01, 52.0, -0.3, 0.12];
    let qa = [2800.0, 3000.0, 2500.0, 2700.0];
    let u = [0.04, 0.6, 0.55];
    (q, qa, u)
}

fn bench_f1_plain(c: &mut Criterion) {
    let car = F1Car::new(F1Car::reference_parameters()).unwrap();
    let (q, qa, u) = f1_state();
    c.bench_function("f1_evaluate_f64", |b| {
        b.iter(|| {
            car.evaluate(black_box(&q), black_box(&qa), black_box(&u), 0.0)
                .unwrap()
        })
    });
}

fn bench_f1_ad(c: &mut Criterion) {
    let car = F1Car::new(F1Car::reference_parameters()).unwrap();
    let (q, qa, u) = f1_state();
    let q: Vec<Ad> = q
        .iter()
        .enumerate()
        .map(|(i, &v)| Dual::variable(v, i))
        .collect();
    let qa: Vec<Ad> = qa
        .iter()
        .enumerate()
        .map(|(i, &v)| Dual::variable(v, 6 + i))
        .collect();
    let u: Vec<Ad> = u
        .iter()
        .enumerate()
        .map(|(i, &v)| Dual::variable(v, 10 + i))
        .collect();
    c.bench_function("f1_evaluate_ad16", |b| {
        b.iter(|| {
            car.evaluate(black_box(&q), black_box(&qa), black_box(&u), 0.0)
                .unwrap()
        })
    });
}

fn bench_kart_plain(c: &mut Criterion) {
    let kart = Kart::new(Kart::reference_parameters()).unwrap();
    let mut q = [0.0; 12];
    q[3] = 16.0;
    q[5] = 0.3;
    let u = [0.08, 60.0];
    c.bench_function("kart_evaluate_f64", |b| {
        b.iter(|| {
            kart.evaluate(black_box(&q), black_box(&[]), black_box(&u), 0.0)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_f1_plain, bench_f1_ad, bench_kart_plain);
criterion_main!(benches);
