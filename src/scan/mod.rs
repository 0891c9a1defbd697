//! # Quadrupole scan parameters and data
//!
//! This module defines the configuration of a scan ([`ScanParams`] and its builder),
//! the per-sample record ([`ScanPoint`]) and the per-plane accumulated data
//! ([`ScanResult`]) consumed by the reconstruction strategies.
//!
//! ## Pipeline overview
//!
//! 1. **Stepping** – the magnet is driven through `n_steps` evenly spaced currents
//!    from `initial_current` to `final_current` (inclusive).
//! 2. **Settling** – after each setpoint the controller waits `first_settle` (first step)
//!    or `settle` (subsequent steps).
//! 3. **Sampling** – beam sizes are read until `samples_per_step` accepted samples are
//!    collected; readings above `max_sigma` (or unavailable) are rejected and retried
//!    after `rejection_backoff`.
//! 4. **Trimming** – the step's samples are sorted by size and `trim_count` samples are
//!    dropped on each tail before merging into the [`ScanResult`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use quadscan::{constants::Plane, scan::ScanParams};
//!
//! let params = ScanParams::builder()
//!     .plane(Plane::Vertical)
//!     .currents(-4.0, 4.0)
//!     .n_steps(9)
//!     .samples_per_step(7)
//!     .trim_count(1)
//!     .max_sigma(2e-3)
//!     .first_settle(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//! assert_eq!(params.setpoints().len(), 9);
//! ```
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    constants::{Ampere, Meter, Plane},
    emittance_errors::EmittanceError,
};

pub mod controller;

/// Configuration of one quadrupole scan.
///
/// Fields
/// -----------------
/// * `plane` – transverse plane under test.
/// * `n_steps` – number of current steps (≥ 1).
/// * `initial_current`, `final_current` – scan range (A), both included.
/// * `samples_per_step` – accepted samples required at each step.
/// * `trim_count` – samples discarded on each tail of a step (`samples_per_step > 2·trim_count`).
/// * `max_sigma` – largest acceptable beam size (m); larger readings are rejected.
/// * `first_settle` – settle time after the first setpoint.
/// * `settle` – settle time after every other setpoint.
/// * `rejection_backoff` – wait before retrying after a rejected sample.
/// * `restore_current` – drive the magnet back to its initial readback once the scan completes.
///
/// Defaults
/// -----------------
/// 10 steps from −5 A to 5 A, 5 samples per step, 1 trimmed per tail,
/// `max_sigma` 5 mm, settles of 5 s / 1 s, 200 ms backoff, no restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanParams {
    pub plane: Plane,
    pub n_steps: usize,
    pub initial_current: Ampere,
    pub final_current: Ampere,
    pub samples_per_step: usize,
    pub trim_count: usize,
    pub max_sigma: Meter,
    pub first_settle: Duration,
    pub settle: Duration,
    pub rejection_backoff: Duration,
    pub restore_current: bool,
}

impl Default for ScanParams {
    fn default() -> Self {
        ScanParams {
            plane: Plane::Horizontal,
            n_steps: 10,
            initial_current: -5.0,
            final_current: 5.0,
            samples_per_step: 5,
            trim_count: 1,
            max_sigma: 5e-3,
            first_settle: Duration::from_secs(5),
            settle: Duration::from_secs(1),
            rejection_backoff: Duration::from_millis(200),
            restore_current: false,
        }
    }
}

impl ScanParams {
    /// Create a new [`ScanParamsBuilder`] initialized with the default values.
    pub fn builder() -> ScanParamsBuilder {
        ScanParamsBuilder::new()
    }

    /// Check the invariants between fields.
    ///
    /// Return
    /// ----------
    /// * `Ok(())` or [`EmittanceError::InvalidConfiguration`] describing the first violation.
    pub fn validate(&self) -> Result<(), EmittanceError> {
        let invalid = |msg: String| Err(EmittanceError::InvalidConfiguration(msg));

        if self.n_steps == 0 {
            return invalid("a scan needs at least one step".into());
        }
        if !self.initial_current.is_finite() || !self.final_current.is_finite() {
            return invalid(format!(
                "scan currents must be finite, got {} → {}",
                self.initial_current, self.final_current
            ));
        }
        if self.samples_per_step <= 2 * self.trim_count {
            return invalid(format!(
                "samples_per_step ({}) must exceed twice the trim count ({})",
                self.samples_per_step, self.trim_count
            ));
        }
        if !(self.max_sigma > 0.0 && self.max_sigma.is_finite()) {
            return invalid(format!("max_sigma must be positive, got {}", self.max_sigma));
        }
        Ok(())
    }

    /// Evenly spaced current setpoints of the scan, endpoints included.
    pub fn setpoints(&self) -> Vec<Ampere> {
        if self.n_steps <= 1 {
            return vec![self.initial_current];
        }
        let span = self.final_current - self.initial_current;
        (0..self.n_steps)
            .map(|i| self.initial_current + span * i as f64 / (self.n_steps - 1) as f64)
            .collect()
    }

    /// Number of samples merged into the result per step.
    #[inline]
    pub fn kept_per_step(&self) -> usize {
        self.samples_per_step.saturating_sub(2 * self.trim_count)
    }
}

/// Builder for [`ScanParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct ScanParamsBuilder {
    params: ScanParams,
}

impl ScanParamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plane(mut self, v: Plane) -> Self {
        self.params.plane = v;
        self
    }
    pub fn n_steps(mut self, v: usize) -> Self {
        self.params.n_steps = v;
        self
    }
    pub fn currents(mut self, initial: Ampere, last: Ampere) -> Self {
        self.params.initial_current = initial;
        self.params.final_current = last;
        self
    }
    pub fn samples_per_step(mut self, v: usize) -> Self {
        self.params.samples_per_step = v;
        self
    }
    pub fn trim_count(mut self, v: usize) -> Self {
        self.params.trim_count = v;
        self
    }
    pub fn max_sigma(mut self, v: Meter) -> Self {
        self.params.max_sigma = v;
        self
    }
    pub fn first_settle(mut self, v: Duration) -> Self {
        self.params.first_settle = v;
        self
    }
    pub fn settle(mut self, v: Duration) -> Self {
        self.params.settle = v;
        self
    }
    pub fn rejection_backoff(mut self, v: Duration) -> Self {
        self.params.rejection_backoff = v;
        self
    }
    pub fn restore_current(mut self, v: bool) -> Self {
        self.params.restore_current = v;
        self
    }

    /// Validate and return the parameters.
    pub fn build(self) -> Result<ScanParams, EmittanceError> {
        self.params.validate()?;
        Ok(self.params)
    }
}

/// One beam-size sample taken during a scan.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanPoint {
    pub setpoint: Ampere,
    pub readback: Ampere,
    pub sigma: Option<Meter>,
    pub accepted: bool,
}

impl ScanPoint {
    /// Size used to order samples; unavailable sizes sort last.
    #[inline]
    fn sort_key(&self) -> f64 {
        self.sigma.unwrap_or(f64::INFINITY)
    }
}

/// Sort a step's accepted samples by beam size and drop `trim` samples on each tail.
///
/// Arguments
/// -----------------
/// * `points`: Accepted samples of one step.
/// * `trim`: Number of samples removed from the low and from the high end.
///
/// Return
/// ----------
/// * The `N − 2·trim` interior samples in ascending size order (empty if `N ≤ 2·trim`).
pub fn trim_outliers(mut points: Vec<ScanPoint>, trim: usize) -> Vec<ScanPoint> {
    if points.len() <= 2 * trim {
        return Vec::new();
    }
    points.sort_by(|a, b| a.sort_key().total_cmp(&b.sort_key()));
    points.truncate(points.len() - trim);
    points.drain(..trim);
    points
}

/// Accepted (readback current, beam size) pairs of one plane.
///
/// Built step by step by the scan controller, or reloaded from a raw-data file.
/// The reconstruction strategies only read it, so the same result can be
/// reconstructed any number of times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    plane: Plane,
    currents: Vec<Ampere>,
    sigmas: Vec<Meter>,
}

impl ScanResult {
    /// Empty result for a plane.
    pub fn new(plane: Plane) -> Self {
        ScanResult {
            plane,
            currents: Vec::new(),
            sigmas: Vec::new(),
        }
    }

    /// Build a result from its two columns.
    ///
    /// Return
    /// ----------
    /// * The result, or [`EmittanceError::InvalidConfiguration`] if the columns differ in length.
    pub fn from_columns(
        plane: Plane,
        currents: Vec<Ampere>,
        sigmas: Vec<Meter>,
    ) -> Result<Self, EmittanceError> {
        if currents.len() != sigmas.len() {
            return Err(EmittanceError::InvalidConfiguration(format!(
                "scan columns differ in length: {} currents, {} sizes",
                currents.len(),
                sigmas.len()
            )));
        }
        Ok(ScanResult {
            plane,
            currents,
            sigmas,
        })
    }

    pub fn plane(&self) -> Plane {
        self.plane
    }

    pub fn currents(&self) -> &[Ampere] {
        &self.currents
    }

    pub fn sigmas(&self) -> &[Meter] {
        &self.sigmas
    }

    /// Squared beam sizes, the quantity fitted by both reconstruction strategies.
    pub fn sigma_squared(&self) -> Vec<f64> {
        self.sigmas.iter().map(|s| s * s).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.currents.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.currents.is_empty()
    }

    /// Iterate over `(current, sigma)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Ampere, Meter)> + '_ {
        self.currents.iter().copied().zip(self.sigmas.iter().copied())
    }

    pub(crate) fn push(&mut self, current: Ampere, sigma: Meter) {
        self.currents.push(current);
        self.sigmas.push(sigma);
    }

    /// Append the accepted samples of a step.
    pub(crate) fn merge_step(&mut self, points: &[ScanPoint]) {
        for p in points.iter().filter(|p| p.accepted) {
            if let Some(sigma) = p.sigma {
                self.push(p.readback, sigma);
            }
        }
    }
}

#[cfg(test)]
mod scan_test {
    use super::*;

    fn point(sigma: f64) -> ScanPoint {
        ScanPoint {
            setpoint: 1.0,
            readback: 1.0 + sigma,
            sigma: Some(sigma),
            accepted: true,
        }
    }

    #[test]
    fn test_setpoints() {
        let params = ScanParams::builder()
            .currents(-2.0, 2.0)
            .n_steps(5)
            .build()
            .unwrap();
        assert_eq!(params.setpoints(), vec![-2.0, -1.0, 0.0, 1.0, 2.0]);

        let single = ScanParams::builder().n_steps(1).build().unwrap();
        assert_eq!(single.setpoints(), vec![-5.0]);
    }

    #[test]
    fn test_builder_validation() {
        assert!(ScanParams::builder().n_steps(0).build().is_err());
        assert!(ScanParams::builder()
            .samples_per_step(4)
            .trim_count(2)
            .build()
            .is_err());
        assert!(ScanParams::builder().max_sigma(0.0).build().is_err());
        assert!(ScanParams::builder()
            .currents(f64::NAN, 1.0)
            .build()
            .is_err());
        assert_eq!(ScanParams::builder().build().unwrap(), ScanParams::default());
    }

    #[test]
    fn test_trim_outliers_keeps_sorted_middle() {
        let raw: Vec<ScanPoint> = [5.0, 1.0, 9.0, 3.0, 7.0, 2.0, 8.0]
            .iter()
            .map(|&s| point(s))
            .collect();

        let kept = trim_outliers(raw.clone(), 2);
        let sigmas: Vec<f64> = kept.iter().filter_map(|p| p.sigma).collect();
        assert_eq!(sigmas, vec![3.0, 5.0, 7.0]);
        assert_eq!(kept.len(), raw.len() - 4);

        assert_eq!(trim_outliers(raw.clone(), 0).len(), 7);
        assert!(trim_outliers(raw, 4).is_empty());
    }

    #[test]
    fn test_merge_step_and_columns() {
        let mut result = ScanResult::new(Plane::Vertical);
        let mut rejected = point(4.0);
        rejected.accepted = false;
        result.merge_step(&[point(1.0), rejected, point(2.0)]);

        assert_eq!(result.len(), 2);
        assert_eq!(result.plane(), Plane::Vertical);
        assert_eq!(result.sigmas(), &[1.0, 2.0]);
        assert_eq!(result.sigma_squared(), vec![1.0, 4.0]);
        assert_eq!(result.currents(), &[2.0, 3.0]);

        assert!(ScanResult::from_columns(Plane::Horizontal, vec![1.0], vec![]).is_err());
    }
}
