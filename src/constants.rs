//! # Constants and type definitions for quadscan
//!
//! This module centralizes the **physical constants**, **unit aliases**, and **common
//! identifiers** used throughout the `quadscan` library.
//!
//! ## Overview
//!
//! - Particle and electromagnetic constants (rest energies, rigidity factor)
//! - Core type aliases used across the crate (lengths, currents, energies)
//! - The [`Plane`] identifier for the transverse plane under test
//!
//! These definitions are used by all main modules, including strength conversion,
//! transport matrices, the scan controller and both reconstruction strategies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::emittance_errors::FormatError;

// -------------------------------------------------------------------------------------------------
// Physical constants
// -------------------------------------------------------------------------------------------------

/// Electron rest energy in MeV (CODATA 2018)
pub const ELECTRON_REST_ENERGY: MeV = 0.510_998_95;

/// Proton rest energy in MeV (CODATA 2018)
pub const PROTON_REST_ENERGY: MeV = 938.272_088_16;

/// Speed of light in m/s
pub const VLIGHT: f64 = 299_792_458.0;

/// Magnetic rigidity factor: Bρ [T·m] = p·c [MeV] / RIGIDITY_FACTOR
pub const RIGIDITY_FACTOR: f64 = VLIGHT * 1e-6;

/// Numerical epsilon used for floating-point comparisons
pub const EPS: f64 = 1e-12;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Length in meters
pub type Meter = f64;
/// Magnet current in amperes
pub type Ampere = f64;
/// Energy in MeV
pub type MeV = f64;
/// Integrated quadrupole gradient in tesla
pub type Tesla = f64;
/// Normalized quadrupole strength K1 in 1/m²
pub type K1 = f64;
/// Integrated quadrupole strength K1·L in 1/m
pub type K1L = f64;

// -------------------------------------------------------------------------------------------------
// Identifiers
// -------------------------------------------------------------------------------------------------

/// Transverse plane under test.
///
/// The plane selects which beam size the sensor reports, which block of the
/// transport matrix feeds the fit, and the sign of the quadrupole strength
/// (a horizontally focusing quadrupole is vertically defocusing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Plane {
    /// Horizontal plane, tagged `x` in raw-data files
    #[serde(rename = "x")]
    Horizontal,
    /// Vertical plane, tagged `y` in raw-data files
    #[serde(rename = "y")]
    Vertical,
}

impl Plane {
    /// Sign applied to a physical (horizontal-convention) quadrupole strength.
    #[inline]
    pub fn strength_sign(self) -> f64 {
        match self {
            Plane::Horizontal => 1.0,
            Plane::Vertical => -1.0,
        }
    }

    /// One-letter tag used in raw-data files.
    pub fn tag(self) -> char {
        match self {
            Plane::Horizontal => 'x',
            Plane::Vertical => 'y',
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Plane::Horizontal => write!(f, "horizontal"),
            Plane::Vertical => write!(f, "vertical"),
        }
    }
}

impl FromStr for Plane {
    type Err = FormatError;

    /// Parse a plane from its tag (`x`/`y`) or its name (`horizontal`/`vertical`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x" | "horizontal" => Ok(Plane::Horizontal),
            "y" | "vertical" => Ok(Plane::Vertical),
            other => Err(FormatError::InvalidPlane(other.to_string())),
        }
    }
}

#[cfg(test)]
mod constants_test {
    use super::*;

    #[test]
    fn test_plane_from_str() {
        assert_eq!("x".parse::<Plane>().unwrap(), Plane::Horizontal);
        assert_eq!(" Vertical ".parse::<Plane>().unwrap(), Plane::Vertical);
        assert_eq!(
            "z".parse::<Plane>(),
            Err(FormatError::InvalidPlane("z".to_string()))
        );
    }

    #[test]
    fn test_plane_sign_and_tag() {
        assert_eq!(Plane::Horizontal.strength_sign(), 1.0);
        assert_eq!(Plane::Vertical.strength_sign(), -1.0);
        assert_eq!(Plane::Vertical.tag(), 'y');
    }
}
