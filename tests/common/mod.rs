#![allow(dead_code)]

use std::time::Duration;

use approx::assert_relative_eq;
use quadscan::{
    constants::Plane,
    optics::{Calibration, OpticsState},
    reconstruction::{SigmaMatrix, TwissResult},
    scan::{ScanParams, ScanResult},
    simulation::{SimulatedBeamline, SimulationConfig},
};

pub const EMITTANCE_X: f64 = 5e-9;
pub const BETA_X: f64 = 8.0;
pub const ALPHA_X: f64 = 1.2;

pub const EMITTANCE_Y: f64 = 3e-9;
pub const BETA_Y: f64 = 4.0;
pub const ALPHA_Y: f64 = -0.6;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 150 MeV electrons, 10 cm quadrupole, 2.5 m to the screen, 0.2 T/A.
pub fn optics() -> OpticsState {
    OpticsState::new(150.0, 0.1, 2.5, Calibration::Polynomial(vec![0.0, 0.2])).unwrap()
}

pub fn beam(plane: Plane) -> SigmaMatrix {
    match plane {
        Plane::Horizontal => SigmaMatrix::from_twiss(EMITTANCE_X, BETA_X, ALPHA_X),
        Plane::Vertical => SigmaMatrix::from_twiss(EMITTANCE_Y, BETA_Y, ALPHA_Y),
    }
}

pub fn beamline(config: SimulationConfig) -> SimulatedBeamline {
    SimulatedBeamline::new(
        optics(),
        beam(Plane::Horizontal),
        beam(Plane::Vertical),
        config,
    )
    .unwrap()
}

/// Noise-free thick-lens scan over evenly spaced currents.
pub fn exact_scan(plane: Plane, currents: &[f64]) -> ScanResult {
    let beamline = beamline(SimulationConfig::default());
    let sigmas = currents
        .iter()
        .map(|&i| beamline.beam_size(plane, i).unwrap())
        .collect();
    ScanResult::from_columns(plane, currents.to_vec(), sigmas).unwrap()
}

pub fn currents(from: f64, to: f64, n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| from + (to - from) * i as f64 / (n - 1) as f64)
        .collect()
}

/// Scan parameters without any wait, for simulated devices.
pub fn fast_params(plane: Plane) -> ScanParams {
    ScanParams::builder()
        .plane(plane)
        .currents(-7.0, 7.0)
        .n_steps(15)
        .samples_per_step(5)
        .trim_count(1)
        .max_sigma(5e-3)
        .first_settle(Duration::ZERO)
        .settle(Duration::ZERO)
        .rejection_backoff(Duration::ZERO)
        .build()
        .unwrap()
}

pub fn assert_twiss_close(actual: &TwissResult, plane: Plane, max_relative: f64) {
    let (eps, beta, alpha) = match plane {
        Plane::Horizontal => (EMITTANCE_X, BETA_X, ALPHA_X),
        Plane::Vertical => (EMITTANCE_Y, BETA_Y, ALPHA_Y),
    };
    assert_eq!(actual.plane, plane);
    assert_relative_eq!(actual.emittance, eps, max_relative = max_relative);
    assert_relative_eq!(actual.beta, beta, max_relative = max_relative);
    assert_relative_eq!(actual.alpha, alpha, max_relative = max_relative);
}
