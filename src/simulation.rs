//! # Simulated beamline
//!
//! A software stand-in for the magnet and the beam-size source, driven by a known
//! sigma matrix per plane. The beam size at the sensor is propagated through the
//! thick-lens quadrupole and drift of the [`OpticsState`], then perturbed with
//! relative Gaussian noise (`rand_distr::Normal`) and, optionally, with occasional
//! glitches (a reading multiplied by a large factor, or no reading at all).
//!
//! [`SimulatedBeamline::split`] returns a [`SimulatedMagnet`] and a
//! [`SimulatedScreen`] sharing the same state, ready to be injected into a
//! [`ScanController`](crate::scan::controller::ScanController).
//!
//! ## Example
//!
//! ```rust,no_run
//! use quadscan::{
//!     optics::{Calibration, OpticsState},
//!     reconstruction::SigmaMatrix,
//!     simulation::{SimulatedBeamline, SimulationConfig},
//! };
//!
//! let optics = OpticsState::new(150.0, 0.1, 2.5, Calibration::Polynomial(vec![0.0, 0.2])).unwrap();
//! let beam = SigmaMatrix::from_twiss(5e-9, 8.0, 1.2);
//! let beamline = SimulatedBeamline::new(optics, beam, beam, SimulationConfig::default()).unwrap();
//! let (magnet, screen) = beamline.split();
//! ```
use std::sync::{Arc, Mutex, MutexGuard};

use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::Normal;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{Ampere, Meter, Plane},
    devices::{BeamSizeSource, BeamSpot, MagnetInterface},
    emittance_errors::{DeviceError, EmittanceError},
    optics::OpticsState,
    reconstruction::SigmaMatrix,
    strength::StrengthConverter,
    transfer_matrix::quad_to_screen,
};

/// Noise model of a [`SimulatedBeamline`].
///
/// Fields
/// -----------------
/// * `relative_noise` – standard deviation of the multiplicative size noise (0.02 = 2 %).
/// * `readback_noise` – standard deviation of the current readback around the setpoint (A).
/// * `glitch_probability` – probability that a reading is a glitch.
/// * `glitch_factor` – size multiplier of a glitch reading.
/// * `dropout_probability` – probability that the sensor returns no size.
/// * `seed` – seed of the random generator, for reproducible runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub relative_noise: f64,
    pub readback_noise: Ampere,
    pub glitch_probability: f64,
    pub glitch_factor: f64,
    pub dropout_probability: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            relative_noise: 0.0,
            readback_noise: 0.0,
            glitch_probability: 0.0,
            glitch_factor: 10.0,
            dropout_probability: 0.0,
            seed: 42,
        }
    }
}

/// Shared state of the simulated magnet and screen.
#[derive(Debug)]
pub struct SimulatedBeamline {
    optics: OpticsState,
    horizontal: SigmaMatrix,
    vertical: SigmaMatrix,
    current: Ampere,
    set_calls: usize,
    fail_after: Option<usize>,
    size_noise: Normal<f64>,
    readback_noise: Normal<f64>,
    glitch_probability: f64,
    glitch_factor: f64,
    dropout_probability: f64,
    rng: StdRng,
}

impl SimulatedBeamline {
    /// Create a beamline.
    ///
    /// Arguments
    /// -----------------
    /// * `optics`: Optics used to propagate the beam to the sensor.
    /// * `horizontal`, `vertical`: Sigma matrices at the quadrupole entrance.
    /// * `config`: Noise model.
    ///
    /// Return
    /// ----------
    /// * The beamline, [`EmittanceError::InvalidConfiguration`] for an invalid optics
    ///   state or probability, or [`EmittanceError::NoiseInjectionError`] for a negative
    ///   noise level.
    pub fn new(
        optics: OpticsState,
        horizontal: SigmaMatrix,
        vertical: SigmaMatrix,
        config: SimulationConfig,
    ) -> Result<Self, EmittanceError> {
        optics.validate()?;
        for p in [config.glitch_probability, config.dropout_probability] {
            if !(0.0..=1.0).contains(&p) {
                return Err(EmittanceError::InvalidConfiguration(format!(
                    "simulation probability must lie in [0, 1], got {p}"
                )));
            }
        }

        Ok(SimulatedBeamline {
            optics,
            horizontal,
            vertical,
            current: 0.0,
            set_calls: 0,
            fail_after: None,
            size_noise: Normal::new(0.0, config.relative_noise)?,
            readback_noise: Normal::new(0.0, config.readback_noise)?,
            glitch_probability: config.glitch_probability,
            glitch_factor: config.glitch_factor,
            dropout_probability: config.dropout_probability,
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    /// Make every `set_current` after the first `n` fail with a magnet error.
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn sigma_matrix(&self, plane: Plane) -> &SigmaMatrix {
        match plane {
            Plane::Horizontal => &self.horizontal,
            Plane::Vertical => &self.vertical,
        }
    }

    /// Noise-free beam size at the sensor for a magnet current.
    pub fn beam_size(&self, plane: Plane, current: Ampere) -> Result<Meter, EmittanceError> {
        let converter = StrengthConverter::new(&self.optics)?;
        let k1 = converter.k1(&[current], self.optics.energy, plane)?;
        let m = quad_to_screen(k1[0], self.optics.quad_length, self.optics.drift_length);
        let size2 = self
            .sigma_matrix(plane)
            .propagate_size_squared(m[(0, 0)], m[(0, 1)]);
        Ok(size2.max(0.0).sqrt())
    }

    /// Setpoint currently applied.
    pub fn current(&self) -> Ampere {
        self.current
    }

    /// Number of `set_current` calls received so far, failed ones included.
    pub fn set_calls(&self) -> usize {
        self.set_calls
    }

    /// Hand out the two devices, sharing this state.
    pub fn split(self) -> (SimulatedMagnet, SimulatedScreen) {
        let shared = Arc::new(Mutex::new(self));
        (
            SimulatedMagnet {
                beamline: Arc::clone(&shared),
            },
            SimulatedScreen { beamline: shared },
        )
    }

    fn set_current(&mut self, value: Ampere) -> Result<(), DeviceError> {
        self.set_calls += 1;
        if self.fail_after.is_some_and(|n| self.set_calls > n) {
            return Err(DeviceError::Magnet(format!(
                "power supply did not confirm setpoint {value} A"
            )));
        }
        self.current = value;
        Ok(())
    }

    fn read_current(&mut self) -> Ampere {
        self.current + self.rng.sample(self.readback_noise)
    }

    fn measure(&mut self, plane: Plane) -> Result<BeamSpot, DeviceError> {
        let exact = self
            .beam_size(plane, self.current)
            .map_err(|e| DeviceError::Sensor(e.to_string()))?;

        if self.rng.random_bool(self.dropout_probability) {
            return Ok(BeamSpot {
                center: 0.0,
                sigma: None,
            });
        }
        let mut sigma = exact * (1.0 + self.rng.sample(self.size_noise)).abs();
        if self.rng.random_bool(self.glitch_probability) {
            sigma *= self.glitch_factor;
        }
        Ok(BeamSpot {
            center: self.rng.sample(self.size_noise) * exact,
            sigma: Some(sigma),
        })
    }
}

fn lock(beamline: &Mutex<SimulatedBeamline>) -> Result<MutexGuard<'_, SimulatedBeamline>, String> {
    beamline
        .lock()
        .map_err(|_| "simulated beamline state is poisoned".to_string())
}

/// Magnet half of a [`SimulatedBeamline`].
#[derive(Debug, Clone)]
pub struct SimulatedMagnet {
    beamline: Arc<Mutex<SimulatedBeamline>>,
}

impl SimulatedMagnet {
    /// Number of `set_current` calls received so far.
    pub fn set_calls(&self) -> usize {
        lock(&self.beamline).map(|b| b.set_calls()).unwrap_or(0)
    }
}

impl MagnetInterface for SimulatedMagnet {
    fn set_current(&mut self, value: Ampere) -> Result<(), DeviceError> {
        lock(&self.beamline)
            .map_err(DeviceError::Magnet)?
            .set_current(value)
    }

    fn read_current(&mut self) -> Result<Ampere, DeviceError> {
        Ok(lock(&self.beamline)
            .map_err(DeviceError::Magnet)?
            .read_current())
    }
}

/// Beam-size source half of a [`SimulatedBeamline`].
#[derive(Debug, Clone)]
pub struct SimulatedScreen {
    beamline: Arc<Mutex<SimulatedBeamline>>,
}

impl BeamSizeSource for SimulatedScreen {
    fn measure(&mut self, plane: Plane) -> Result<BeamSpot, DeviceError> {
        lock(&self.beamline)
            .map_err(DeviceError::Sensor)?
            .measure(plane)
    }
}

#[cfg(test)]
mod simulation_test {
    use super::*;
    use crate::optics::Calibration;
    use approx::assert_relative_eq;

    fn optics() -> OpticsState {
        OpticsState::new(150.0, 0.1, 2.5, Calibration::Polynomial(vec![0.0, 0.2])).unwrap()
    }

    #[test]
    fn test_noise_free_devices() {
        let beam = SigmaMatrix::from_twiss(5e-9, 8.0, 1.2);
        let beamline =
            SimulatedBeamline::new(optics(), beam, beam, SimulationConfig::default()).unwrap();
        let expected = beamline.beam_size(Plane::Vertical, 2.0).unwrap();
        let (mut magnet, mut screen) = beamline.split();

        magnet.set_current(2.0).unwrap();
        assert_eq!(magnet.read_current().unwrap(), 2.0);
        let spot = screen.measure(Plane::Vertical).unwrap();
        assert_relative_eq!(spot.sigma.unwrap(), expected);
        assert_eq!(spot.center, 0.0);
        assert_eq!(magnet.set_calls(), 1);
    }

    #[test]
    fn test_zero_current_is_a_drift() {
        let beam = SigmaMatrix::from_twiss(5e-9, 8.0, 1.2);
        let beamline =
            SimulatedBeamline::new(optics(), beam, beam, SimulationConfig::default()).unwrap();
        let l = 2.6;
        let expected = beam.propagate_size_squared(1.0, l).sqrt();
        assert_relative_eq!(
            beamline.beam_size(Plane::Horizontal, 0.0).unwrap(),
            expected,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_injected_magnet_failure() {
        let beam = SigmaMatrix::from_twiss(5e-9, 8.0, 1.2);
        let beamline = SimulatedBeamline::new(optics(), beam, beam, SimulationConfig::default())
            .unwrap()
            .fail_after(2);
        let (mut magnet, _) = beamline.split();
        assert!(magnet.set_current(1.0).is_ok());
        assert!(magnet.set_current(2.0).is_ok());
        assert!(matches!(
            magnet.set_current(3.0),
            Err(DeviceError::Magnet(_))
        ));
        assert_eq!(magnet.read_current().unwrap(), 2.0);
    }

    #[test]
    fn test_dropouts_and_bad_config() {
        let beam = SigmaMatrix::from_twiss(5e-9, 8.0, 1.2);
        let config = SimulationConfig {
            dropout_probability: 1.0,
            ..SimulationConfig::default()
        };
        let (_, mut screen) = SimulatedBeamline::new(optics(), beam, beam, config)
            .unwrap()
            .split();
        assert_eq!(screen.measure(Plane::Horizontal).unwrap().sigma, None);

        let bad = SimulationConfig {
            glitch_probability: 1.5,
            ..SimulationConfig::default()
        };
        assert!(SimulatedBeamline::new(optics(), beam, beam, bad).is_err());

        let negative = SimulationConfig {
            relative_noise: -0.1,
            ..SimulationConfig::default()
        };
        assert!(matches!(
            SimulatedBeamline::new(optics(), beam, beam, negative),
            Err(EmittanceError::NoiseInjectionError(_))
        ));
    }
}
