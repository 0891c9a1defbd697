//! End-to-end quadrupole scan on a simulated beamline.
//!
//! ```text
//! RUST_LOG=info cargo run --example simulated_scan
//! ```
use std::time::Duration;

use camino::Utf8PathBuf;
use quadscan::{
    aggregator::ResultAggregator,
    constants::Plane,
    emittance_errors::EmittanceError,
    optics::{Calibration, OpticsState},
    reconstruction::{reconstruct_all, thin_lens_fit, SigmaMatrix},
    scan::{controller::ScanController, ScanParams},
    simulation::{SimulatedBeamline, SimulationConfig},
};

#[tokio::main]
async fn main() -> Result<(), EmittanceError> {
    env_logger::init();

    let optics = OpticsState::new(150.0, 0.1, 2.5, Calibration::Polynomial(vec![0.0, 0.2]))?;
    let config = SimulationConfig {
        relative_noise: 0.01,
        readback_noise: 2e-3,
        glitch_probability: 0.05,
        dropout_probability: 0.02,
        ..SimulationConfig::default()
    };
    let beamline = SimulatedBeamline::new(
        optics.clone(),
        SigmaMatrix::from_twiss(5e-9, 8.0, 1.2),
        SigmaMatrix::from_twiss(3e-9, 4.0, -0.6),
        config,
    )?;
    let (magnet, screen) = beamline.split();

    let mut aggregator = ResultAggregator::new();
    for plane in [Plane::Horizontal, Plane::Vertical] {
        let params = ScanParams::builder()
            .plane(plane)
            .currents(-7.0, 7.0)
            .n_steps(15)
            .samples_per_step(7)
            .trim_count(2)
            .first_settle(Duration::from_millis(100))
            .settle(Duration::from_millis(10))
            .rejection_backoff(Duration::from_millis(5))
            .build()?;

        let handle = ScanController::new(magnet.clone(), screen.clone(), params)?.spawn();
        let mut progress = handle.progress();
        let watcher = tokio::spawn(async move {
            while progress.changed().await.is_ok() {
                let p = progress.borrow_and_update().clone();
                log::debug!("{:?}: {} points", p.state, p.result.len());
            }
        });

        let outcome = handle.join().await?;
        watcher.abort();
        println!(
            "{plane} scan: {:?}, {} points kept, {} samples rejected",
            outcome.status,
            outcome.result.len(),
            outcome.rejected_samples()
        );

        for (_, result) in reconstruct_all(&outcome.result, &optics) {
            match result {
                Ok(twiss) => println!("  {twiss}"),
                Err(e) => println!("  {e}"),
            }
        }
        let solution = thin_lens_fit::solve(&outcome.result, &optics)?;
        if let Some(waist) = solution
            .fitted_curve(200)
            .into_iter()
            .min_by(|a, b| a.sigma_squared.total_cmp(&b.sigma_squared))
        {
            println!(
                "  thin-lens waist: K1L = {:.3} 1/m, σ = {:.1} µm",
                waist.k1l,
                waist.sigma_squared.sqrt() * 1e6
            );
        }

        aggregator.record_outcomes(reconstruct_all(&outcome.result, &optics))?;
        aggregator.set_scan(outcome.result);
    }

    for (plane, method) in aggregator.keys() {
        if let Some(stats) = aggregator.stats(plane, method) {
            println!("{plane} / {method}: {stats}");
        }
    }

    let path = Utf8PathBuf::from(std::env::temp_dir().to_string_lossy().into_owned())
        .join("quadscan_last_scan.dat");
    aggregator.save_scan(&path)?;
    println!("Last scan saved to {path}");
    Ok(())
}
