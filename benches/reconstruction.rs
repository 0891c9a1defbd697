use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quadscan::{
    constants::Plane,
    optics::{Calibration, OpticsState},
    reconstruction::{thin_lens_fit, transfer_matrix_fit, SigmaMatrix},
    scan::ScanResult,
    simulation::{SimulatedBeamline, SimulationConfig},
};

fn optics() -> OpticsState {
    OpticsState::new(150.0, 0.1, 2.5, Calibration::Polynomial(vec![0.0, 0.2])).unwrap()
}

/// Noisy 15-step scan with 3 kept samples per step.
fn noisy_scan(rng: &mut StdRng, plane: Plane) -> ScanResult {
    let beam = SigmaMatrix::from_twiss(5e-9, 8.0, 1.2);
    let beamline =
        SimulatedBeamline::new(optics(), beam, beam, SimulationConfig::default()).unwrap();
    let mut currents = Vec::new();
    let mut sigmas = Vec::new();
    for step in 0..15 {
        let i = -7.0 + step as f64;
        let exact = beamline.beam_size(plane, i).unwrap();
        for _ in 0..3 {
            currents.push(i + rng.random_range(-1e-3..1e-3));
            sigmas.push(exact * (1.0 + rng.random_range(-0.01..0.01)));
        }
    }
    ScanResult::from_columns(plane, currents, sigmas).unwrap()
}

fn bench_transfer_matrix(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let optics = optics();

    c.bench_function("reconstruction/transfer_matrix_45pts", |b| {
        b.iter_batched(
            || noisy_scan(&mut rng, Plane::Horizontal),
            |scan| {
                let twiss = transfer_matrix_fit::reconstruct(black_box(&scan), &optics).unwrap();
                black_box(twiss);
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_thin_lens(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0xBEEF);
    let optics = optics();

    c.bench_function("reconstruction/thin_lens_45pts", |b| {
        b.iter_batched(
            || noisy_scan(&mut rng, Plane::Vertical),
            |scan| {
                let sol = thin_lens_fit::solve(black_box(&scan), &optics).unwrap();
                black_box(sol.fitted_curve(100));
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_transfer_matrix, bench_thin_lens);
criterion_main!(benches);
