//! # Current → quadrupole strength conversion
//!
//! The [`StrengthConverter`] maps magnet currents to normalized quadrupole strengths
//! using the [`Calibration`] of an [`OpticsState`]:
//!
//! ```text
//! G·L (T)   = calibration(I)
//! K1·L (1/m) = G·L / Bρ          with Bρ = p·c / 299.792458   (p·c in MeV)
//! K1 (1/m²)  = K1·L / L_quad
//! ```
//!
//! Strengths are expressed in the horizontal convention (positive = horizontally
//! focusing). The vertical plane sees the negated strength of the same current.
use crate::{
    constants::{Ampere, MeV, Meter, Plane, K1, K1L},
    emittance_errors::EmittanceError,
    optics::{Calibration, OpticsState},
};

/// Converts magnet currents into K1 / K1·L values for one optics state.
#[derive(Debug, Clone)]
pub struct StrengthConverter<'a> {
    optics: &'a OpticsState,
    calibration: &'a Calibration,
}

impl<'a> StrengthConverter<'a> {
    /// Build a converter for a given optics state.
    ///
    /// Return
    /// ----------
    /// * The converter, or [`EmittanceError::InvalidConfiguration`] if the calibration
    ///   is absent or malformed.
    pub fn new(optics: &'a OpticsState) -> Result<Self, EmittanceError> {
        let calibration = optics.calibration()?;
        calibration.validate()?;
        Ok(StrengthConverter {
            optics,
            calibration,
        })
    }

    /// Integrated strength K1·L (1/m) for each current.
    ///
    /// Arguments
    /// -----------------
    /// * `currents`: Magnet currents (A), possibly negative.
    /// * `energy`: Reference energy (MeV), read according to the optics energy kind.
    /// * `plane`: Plane under test; the vertical plane flips the sign.
    ///
    /// Return
    /// ----------
    /// * One K1·L per current, or [`EmittanceError::InvalidConfiguration`] if the
    ///   energy is not positive.
    pub fn k1l(
        &self,
        currents: &[Ampere],
        energy: MeV,
        plane: Plane,
    ) -> Result<Vec<K1L>, EmittanceError> {
        let brho = self.optics.magnetic_rigidity(energy)?;
        let sign = plane.strength_sign();
        Ok(currents
            .iter()
            .map(|&i| sign * self.calibration.integrated_gradient(i) / brho)
            .collect())
    }

    /// Strength per unit length K1 (1/m²) for each current.
    ///
    /// See also
    /// ------------
    /// * [`StrengthConverter::k1l`] – Integrated form, same arguments.
    pub fn k1(
        &self,
        currents: &[Ampere],
        energy: MeV,
        plane: Plane,
    ) -> Result<Vec<K1>, EmittanceError> {
        let length = self.quad_length();
        Ok(self
            .k1l(currents, energy, plane)?
            .into_iter()
            .map(|kl| kl / length)
            .collect())
    }

    pub fn quad_length(&self) -> Meter {
        self.optics.quad_length
    }
}
