//! # Optics state of a measurement session
//!
//! [`OpticsState`] gathers everything the reconstruction needs to know about the
//! beamline: the reference energy, the particle rest energy, the quadrupole
//! effective length, the drift to the sensor and the current → strength
//! [`Calibration`].
//!
//! The state is immutable for a measurement session. It is usually deserialized
//! from configuration; the per-beamline selection of values happens there, not in
//! this crate.
//!
//! ## Calibration
//! -----------------
//! * [`Calibration::Polynomial`] – ascending coefficients `c0 + c1·I + c2·I² + …`
//!   giving the integrated gradient (T) for a current `I` (A).
//! * [`Calibration::ExcitationCurve`] – measured `(current, integrated gradient)`
//!   table, interpolated piecewise-linearly and extrapolated with the end segments.
//!   It can be read from a two-column CSV file with
//!   [`Calibration::excitation_curve_from_csv`].
//!
//! ## See also
//! ------------
//! * [`StrengthConverter`](crate::strength::StrengthConverter) – Consumer of the calibration.
use camino::Utf8Path;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{
    constants::{Ampere, MeV, Meter, Tesla, ELECTRON_REST_ENERGY, RIGIDITY_FACTOR},
    emittance_errors::EmittanceError,
};

/// How the reference energy of an [`OpticsState`] should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyKind {
    /// Kinetic energy, the rest energy is added to get the total energy
    #[default]
    Kinetic,
    /// Total energy
    Total,
}

/// Current → integrated gradient calibration of the scanned quadrupole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calibration {
    /// Polynomial coefficients in ascending powers of the current.
    Polynomial(Vec<f64>),
    /// Measured excitation curve, currents strictly increasing.
    ExcitationCurve {
        currents: Vec<Ampere>,
        integrated_gradients: Vec<Tesla>,
    },
}

/// One row of an excitation-curve CSV file.
#[derive(Debug, Deserialize)]
struct ExcitationRow {
    current: Ampere,
    integrated_gradient: Tesla,
}

impl Calibration {
    /// Check that the calibration can be evaluated.
    ///
    /// Return
    /// ----------
    /// * `Ok(())`, or [`EmittanceError::InvalidConfiguration`] for an empty polynomial,
    ///   an excitation curve with fewer than two points, mismatched columns or
    ///   non-increasing currents.
    pub fn validate(&self) -> Result<(), EmittanceError> {
        match self {
            Calibration::Polynomial(coeffs) => {
                if coeffs.is_empty() {
                    return Err(EmittanceError::InvalidConfiguration(
                        "calibration polynomial has no coefficients".into(),
                    ));
                }
                if coeffs.iter().any(|c| !c.is_finite()) {
                    return Err(EmittanceError::InvalidConfiguration(
                        "calibration polynomial has non-finite coefficients".into(),
                    ));
                }
            }
            Calibration::ExcitationCurve {
                currents,
                integrated_gradients,
            } => {
                if currents.len() != integrated_gradients.len() {
                    return Err(EmittanceError::InvalidConfiguration(format!(
                        "excitation curve has {} currents but {} gradients",
                        currents.len(),
                        integrated_gradients.len()
                    )));
                }
                if currents.len() < 2 {
                    return Err(EmittanceError::InvalidConfiguration(
                        "excitation curve needs at least two points".into(),
                    ));
                }
                if currents.iter().tuple_windows().any(|(a, b)| b <= a) {
                    return Err(EmittanceError::InvalidConfiguration(
                        "excitation curve currents must be strictly increasing".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Integrated gradient (T) produced by a given magnet current.
    ///
    /// Assumes a validated calibration.
    pub fn integrated_gradient(&self, current: Ampere) -> Tesla {
        match self {
            // Horner
            Calibration::Polynomial(coeffs) => coeffs
                .iter()
                .rev()
                .fold(0.0, |acc, &c| acc * current + c),
            Calibration::ExcitationCurve {
                currents,
                integrated_gradients,
            } => {
                let n = currents.len().min(integrated_gradients.len());
                if n < 2 {
                    return integrated_gradients.first().copied().unwrap_or(0.0);
                }
                // Segment index: first segment below the table, last one above it
                let seg = currents[1..n - 1]
                    .iter()
                    .position(|&c| current < c)
                    .unwrap_or(n - 2);
                let (i0, i1) = (currents[seg], currents[seg + 1]);
                let (g0, g1) = (integrated_gradients[seg], integrated_gradients[seg + 1]);
                g0 + (g1 - g0) * (current - i0) / (i1 - i0)
            }
        }
    }

    /// Read an excitation curve from a CSV file with the columns
    /// `current,integrated_gradient`.
    ///
    /// Arguments
    /// -----------------
    /// * `path`: Path of the CSV file (a header line is required).
    ///
    /// Return
    /// ----------
    /// * A validated [`Calibration::ExcitationCurve`], sorted by current.
    pub fn excitation_curve_from_csv(path: &Utf8Path) -> Result<Self, EmittanceError> {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;

        let mut rows = reader
            .deserialize::<ExcitationRow>()
            .collect::<Result<Vec<_>, _>>()?;
        rows.sort_by(|a, b| a.current.total_cmp(&b.current));

        let (currents, integrated_gradients) = rows
            .into_iter()
            .map(|r| (r.current, r.integrated_gradient))
            .unzip();

        let calibration = Calibration::ExcitationCurve {
            currents,
            integrated_gradients,
        };
        calibration.validate()?;
        Ok(calibration)
    }
}

/// Beamline description used to turn magnet currents into transport optics.
///
/// Fields
/// -----------------
/// * `energy` – reference energy (MeV), read according to `energy_kind`.
/// * `energy_kind` – whether `energy` is kinetic or total.
/// * `rest_energy` – particle rest energy (MeV), electrons by default.
/// * `quad_length` – effective length of the scanned quadrupole (m).
/// * `drift_length` – drift from the quadrupole exit to the sensor (m).
/// * `calibration` – current → integrated gradient calibration, required for any
///   strength conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpticsState {
    pub energy: MeV,
    #[serde(default)]
    pub energy_kind: EnergyKind,
    #[serde(default = "default_rest_energy")]
    pub rest_energy: MeV,
    pub quad_length: Meter,
    pub drift_length: Meter,
    #[serde(default)]
    pub calibration: Option<Calibration>,
}

fn default_rest_energy() -> MeV {
    ELECTRON_REST_ENERGY
}

impl OpticsState {
    /// Build and validate an electron-beam optics state.
    ///
    /// Arguments
    /// -----------------
    /// * `energy`: Kinetic energy (MeV).
    /// * `quad_length`: Quadrupole effective length (m).
    /// * `drift_length`: Drift from the quadrupole exit to the sensor (m).
    /// * `calibration`: Current → integrated gradient calibration.
    ///
    /// Return
    /// ----------
    /// * A validated [`OpticsState`], or [`EmittanceError::InvalidConfiguration`].
    pub fn new(
        energy: MeV,
        quad_length: Meter,
        drift_length: Meter,
        calibration: Calibration,
    ) -> Result<Self, EmittanceError> {
        let state = OpticsState {
            energy,
            energy_kind: EnergyKind::Kinetic,
            rest_energy: ELECTRON_REST_ENERGY,
            quad_length,
            drift_length,
            calibration: Some(calibration),
        };
        state.validate()?;
        Ok(state)
    }

    /// Replace the particle description (energy kind and rest energy).
    pub fn with_particle(mut self, energy_kind: EnergyKind, rest_energy: MeV) -> Self {
        self.energy_kind = energy_kind;
        self.rest_energy = rest_energy;
        self
    }

    /// Check every field needed by strength conversion and reconstruction.
    pub fn validate(&self) -> Result<(), EmittanceError> {
        if !(self.quad_length > 0.0 && self.quad_length.is_finite()) {
            return Err(EmittanceError::InvalidConfiguration(format!(
                "quadrupole length must be positive, got {}",
                self.quad_length
            )));
        }
        if !(self.drift_length >= 0.0 && self.drift_length.is_finite()) {
            return Err(EmittanceError::InvalidConfiguration(format!(
                "drift length must be non-negative, got {}",
                self.drift_length
            )));
        }
        self.total_energy(self.energy)?;
        self.calibration()?.validate()
    }

    /// The calibration, or a configuration error if it is absent.
    pub fn calibration(&self) -> Result<&Calibration, EmittanceError> {
        self.calibration.as_ref().ok_or_else(|| {
            EmittanceError::InvalidConfiguration("quadrupole calibration is missing".into())
        })
    }

    /// Total energy (MeV) for a reference energy read according to `energy_kind`.
    pub fn total_energy(&self, energy: MeV) -> Result<MeV, EmittanceError> {
        if !(energy > 0.0 && energy.is_finite()) {
            return Err(EmittanceError::InvalidConfiguration(format!(
                "reference energy must be positive, got {energy}"
            )));
        }
        if !(self.rest_energy > 0.0) {
            return Err(EmittanceError::InvalidConfiguration(format!(
                "rest energy must be positive, got {}",
                self.rest_energy
            )));
        }
        let total = match self.energy_kind {
            EnergyKind::Kinetic => energy + self.rest_energy,
            EnergyKind::Total => energy,
        };
        if total <= self.rest_energy {
            return Err(EmittanceError::InvalidConfiguration(format!(
                "total energy {total} MeV does not exceed the rest energy {} MeV",
                self.rest_energy
            )));
        }
        Ok(total)
    }

    /// Magnetic rigidity Bρ (T·m) at a given reference energy.
    pub fn magnetic_rigidity(&self, energy: MeV) -> Result<f64, EmittanceError> {
        let total = self.total_energy(energy)?;
        let pc = (total * total - self.rest_energy * self.rest_energy).sqrt();
        Ok(pc / RIGIDITY_FACTOR)
    }

    /// Relativistic factor E_total / E_rest used to normalize emittances.
    pub fn lorentz_gamma(&self) -> Result<f64, EmittanceError> {
        Ok(self.total_energy(self.energy)? / self.rest_energy)
    }

    /// Distance used by the thin-lens model: drift plus half the quadrupole.
    pub fn thin_lens_distance(&self) -> Meter {
        self.drift_length + 0.5 * self.quad_length
    }
}
