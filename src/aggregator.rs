//! # Result aggregation and trending
//!
//! [`ResultAggregator`] keeps, for each `(plane, method)` combination, an append-only
//! [`MeasurementSeries`] of timestamped [`TwissResult`]s, and the raw scan currently
//! on display.
//!
//! The two reconstruction methods are never merged: each has its own series so that
//! discrepancies between them stay visible. Series are cleared only by an explicit
//! [`ResultAggregator::reset`].
//!
//! ## Raw-data persistence
//! -----------------
//! [`ResultAggregator::save_scan`] and [`ResultAggregator::load_scan`] wrap the
//! [`raw_data`](crate::raw_data) format. Loading is all-or-nothing: a malformed file
//! leaves both the current scan and the series untouched.
//!
//! ## Example
//!
//! ```rust,no_run
//! use quadscan::{aggregator::ResultAggregator, constants::Plane, reconstruction::ReconstructionMethod};
//!
//! let mut agg = ResultAggregator::new();
//! // ... agg.record(twiss)? after each reconstruction
//! if let Some(stats) = agg.stats(Plane::Horizontal, ReconstructionMethod::ThinLens) {
//!     println!("{stats:#}");
//! }
//! ```
use std::{collections::HashMap, fmt};

use ahash::RandomState;
use camino::Utf8Path;
use hifitime::Epoch;
use log::{info, warn};
use serde::Serialize;

use crate::{
    constants::Plane,
    emittance_errors::EmittanceError,
    raw_data,
    reconstruction::{ReconstructionMethod, TwissResult},
    scan::ScanResult,
};

/// Identifies one series.
pub type SeriesKey = (Plane, ReconstructionMethod);

/// A recorded result and the time it was recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesEntry {
    pub epoch: Epoch,
    pub result: TwissResult,
}

/// Mean and sample standard deviation of one quantity.
///
/// The standard deviation uses the `N − 1` denominator and is `0` for a single entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Statistic {
    pub mean: f64,
    pub std: f64,
}

impl Statistic {
    fn from_values(values: impl Iterator<Item = f64> + Clone) -> Option<Self> {
        let (n, sum) = values.clone().fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
        if n == 0 {
            return None;
        }
        let mean = sum / n as f64;
        let std = if n > 1 {
            let ss: f64 = values.map(|v| (v - mean) * (v - mean)).sum();
            (ss / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        Some(Statistic { mean, std })
    }
}

/// Running statistics of a [`MeasurementSeries`].
///
/// Display
/// -----------------
/// * `format!("{}", stats)` – one line, emittance in mm·mrad:
///   ```text
///   n=12, εn=1.2345±0.0123 mm·mrad, β=8.1234±0.1000 m, α=-1.2000±0.0500
///   ```
/// * `format!("{:#}", stats)` – one quantity per line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesStats {
    pub count: usize,
    pub normalized_emittance: Statistic,
    pub beta: Statistic,
    pub alpha: Statistic,
}

impl fmt::Display for SeriesStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let en = Statistic {
            mean: self.normalized_emittance.mean * 1e6,
            std: self.normalized_emittance.std * 1e6,
        };
        if f.alternate() {
            writeln!(f, "entries : {}", self.count)?;
            writeln!(f, "εn      : {:.4} ± {:.4} mm·mrad", en.mean, en.std)?;
            writeln!(f, "β       : {:.4} ± {:.4} m", self.beta.mean, self.beta.std)?;
            write!(f, "α       : {:.4} ± {:.4}", self.alpha.mean, self.alpha.std)
        } else {
            write!(
                f,
                "n={}, εn={:.4}±{:.4} mm·mrad, β={:.4}±{:.4} m, α={:.4}±{:.4}",
                self.count,
                en.mean,
                en.std,
                self.beta.mean,
                self.beta.std,
                self.alpha.mean,
                self.alpha.std
            )
        }
    }
}

/// Append-only, time-ordered list of results for one `(plane, method)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeasurementSeries {
    entries: Vec<SeriesEntry>,
}

impl MeasurementSeries {
    pub fn entries(&self) -> &[SeriesEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&SeriesEntry> {
        self.entries.last()
    }

    /// Mean normalized emittance of the series.
    pub fn running_mean(&self) -> Option<f64> {
        Statistic::from_values(self.entries.iter().map(|e| e.result.normalized_emittance))
            .map(|s| s.mean)
    }

    /// Mean and spread of εn, β and α, or `None` for an empty series.
    pub fn stats(&self) -> Option<SeriesStats> {
        let values = |f: fn(&TwissResult) -> f64| self.entries.iter().map(move |e| f(&e.result));
        Some(SeriesStats {
            count: self.entries.len(),
            normalized_emittance: Statistic::from_values(values(|r| r.normalized_emittance))?,
            beta: Statistic::from_values(values(|r| r.beta))?,
            alpha: Statistic::from_values(values(|r| r.alpha))?,
        })
    }

    fn push(&mut self, entry: SeriesEntry) {
        self.entries.push(entry);
    }
}

/// One CSV row of an exported series.
#[derive(Debug, Serialize)]
struct SeriesRecord {
    epoch_utc: String,
    mjd_utc: f64,
    plane: Plane,
    method: ReconstructionMethod,
    normalized_emittance: f64,
    emittance: f64,
    beta: f64,
    alpha: f64,
    gamma: f64,
    n_points: usize,
}

impl From<&SeriesEntry> for SeriesRecord {
    fn from(e: &SeriesEntry) -> Self {
        SeriesRecord {
            epoch_utc: e.epoch.to_string(),
            mjd_utc: e.epoch.to_mjd_utc_days(),
            plane: e.result.plane,
            method: e.result.method,
            normalized_emittance: e.result.normalized_emittance,
            emittance: e.result.emittance,
            beta: e.result.beta,
            alpha: e.result.alpha,
            gamma: e.result.gamma,
            n_points: e.result.n_points,
        }
    }
}

/// Session-wide store of reconstructed results and of the displayed raw scan.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    series: HashMap<SeriesKey, MeasurementSeries, RandomState>,
    scan: Option<ScanResult>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result, timestamped with the current UTC time.
    ///
    /// Return
    /// ----------
    /// * `Ok(())`, or [`EmittanceError::ClockError`] if the system clock cannot be read
    ///   (nothing is recorded then).
    pub fn record(&mut self, result: TwissResult) -> Result<(), EmittanceError> {
        let now = Epoch::now()?;
        self.record_at(result, now);
        Ok(())
    }

    /// Append a result with an explicit timestamp.
    pub fn record_at(&mut self, result: TwissResult, epoch: Epoch) {
        let series = self
            .series
            .entry((result.plane, result.method))
            .or_default();
        series.push(SeriesEntry { epoch, result });
        info!("Recorded #{}: {result}", series.len());
    }

    /// Record every successful outcome of [`reconstruct_all`](crate::reconstruction::reconstruct_all).
    ///
    /// Failed methods are logged and skipped; they do not prevent the others from being
    /// recorded.
    ///
    /// Return
    /// ----------
    /// * The number of results recorded.
    pub fn record_outcomes(
        &mut self,
        outcomes: Vec<(ReconstructionMethod, Result<TwissResult, EmittanceError>)>,
    ) -> Result<usize, EmittanceError> {
        let now = Epoch::now()?;
        let mut recorded = 0;
        for (method, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    self.record_at(result, now);
                    recorded += 1;
                }
                Err(e) => warn!("{method} reconstruction failed: {e}"),
            }
        }
        Ok(recorded)
    }

    pub fn series(&self, plane: Plane, method: ReconstructionMethod) -> Option<&MeasurementSeries> {
        self.series.get(&(plane, method))
    }

    /// Keys of the non-empty series, in a stable order.
    pub fn keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = self.series.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Mean normalized emittance of a series, `None` if nothing was recorded.
    pub fn running_mean(&self, plane: Plane, method: ReconstructionMethod) -> Option<f64> {
        self.series(plane, method)?.running_mean()
    }

    pub fn stats(&self, plane: Plane, method: ReconstructionMethod) -> Option<SeriesStats> {
        self.series(plane, method)?.stats()
    }

    /// Clear every series. The current scan is kept.
    pub fn reset(&mut self) {
        self.series.clear();
        info!("Measurement series cleared");
    }

    /// Scan currently on display, either the last completed one or a reloaded file.
    pub fn current_scan(&self) -> Option<&ScanResult> {
        self.scan.as_ref()
    }

    pub fn set_scan(&mut self, scan: ScanResult) {
        self.scan = Some(scan);
    }

    /// Save the current scan as a raw-data file.
    ///
    /// Return
    /// ----------
    /// * `Ok(())`, [`EmittanceError::InvalidConfiguration`] if there is no scan to save,
    ///   or an I/O error.
    pub fn save_scan(&self, path: &Utf8Path) -> Result<(), EmittanceError> {
        let scan = self.scan.as_ref().ok_or_else(|| {
            EmittanceError::InvalidConfiguration("no scan data to save".into())
        })?;
        raw_data::save_scan(path, scan)
    }

    /// Load a raw-data file and make it the current scan.
    ///
    /// Return
    /// ----------
    /// * The loaded scan, or the read/format error. On error the aggregator is unchanged.
    pub fn load_scan(&mut self, path: &Utf8Path) -> Result<&ScanResult, EmittanceError> {
        let scan = raw_data::load_scan(path)?;
        info!("Loaded {} scan with {} points from {path}", scan.plane(), scan.len());
        Ok(self.scan.insert(scan))
    }

    /// Export a series to CSV, one row per entry.
    ///
    /// Return
    /// ----------
    /// * The number of rows written (0 and no file for an unknown series).
    pub fn export_csv(
        &self,
        path: &Utf8Path,
        plane: Plane,
        method: ReconstructionMethod,
    ) -> Result<usize, EmittanceError> {
        let Some(series) = self.series(plane, method) else {
            return Ok(0);
        };
        let mut writer = csv::Writer::from_path(path)?;
        for entry in series.entries() {
            writer.serialize(SeriesRecord::from(entry))?;
        }
        writer.flush()?;
        Ok(series.len())
    }
}

#[cfg(test)]
mod aggregator_test {
    use super::*;
    use approx::assert_relative_eq;
    use camino::Utf8PathBuf;

    fn twiss(plane: Plane, method: ReconstructionMethod, en: f64, beta: f64) -> TwissResult {
        TwissResult {
            plane,
            method,
            emittance: en / 300.0,
            normalized_emittance: en,
            beta,
            alpha: -1.0,
            gamma: 2.0 / beta,
            n_points: 10,
        }
    }

    fn epoch(mjd: f64) -> Epoch {
        Epoch::from_mjd_utc(mjd)
    }

    #[test]
    fn test_series_are_separate() {
        let mut agg = ResultAggregator::new();
        let tm = ReconstructionMethod::TransferMatrix;
        let tl = ReconstructionMethod::ThinLens;

        agg.record_at(twiss(Plane::Horizontal, tm, 1e-6, 8.0), epoch(60000.0));
        agg.record_at(twiss(Plane::Horizontal, tm, 3e-6, 10.0), epoch(60000.1));
        agg.record_at(twiss(Plane::Horizontal, tl, 5e-6, 9.0), epoch(60000.1));

        assert_eq!(agg.series(Plane::Horizontal, tm).unwrap().len(), 2);
        assert_eq!(agg.series(Plane::Horizontal, tl).unwrap().len(), 1);
        assert!(agg.series(Plane::Vertical, tm).is_none());
        assert_eq!(agg.keys(), vec![(Plane::Horizontal, tm), (Plane::Horizontal, tl)]);

        assert_relative_eq!(agg.running_mean(Plane::Horizontal, tm).unwrap(), 2e-6);
        assert_relative_eq!(agg.running_mean(Plane::Horizontal, tl).unwrap(), 5e-6);
    }

    #[test]
    fn test_stats() {
        let mut agg = ResultAggregator::new();
        let m = ReconstructionMethod::ThinLens;
        for (i, beta) in [2.0, 4.0, 6.0].iter().enumerate() {
            agg.record_at(twiss(Plane::Vertical, m, 1e-6, *beta), epoch(60000.0 + i as f64));
        }
        let stats = agg.stats(Plane::Vertical, m).unwrap();
        assert_eq!(stats.count, 3);
        assert_relative_eq!(stats.beta.mean, 4.0);
        assert_relative_eq!(stats.beta.std, 2.0);
        assert_relative_eq!(stats.normalized_emittance.std, 0.0);
        assert!(format!("{stats}").starts_with("n=3, εn=1.0000±0.0000 mm·mrad"));

        agg.reset();
        assert!(agg.stats(Plane::Vertical, m).is_none());
        assert!(agg.keys().is_empty());
    }

    #[test]
    fn test_record_outcomes_skips_failures() {
        let mut agg = ResultAggregator::new();
        let outcomes = vec![
            (
                ReconstructionMethod::TransferMatrix,
                Ok(twiss(
                    Plane::Horizontal,
                    ReconstructionMethod::TransferMatrix,
                    1e-6,
                    5.0,
                )),
            ),
            (
                ReconstructionMethod::ThinLens,
                Err(EmittanceError::InvalidConfiguration("boom".into())),
            ),
        ];
        assert_eq!(agg.record_outcomes(outcomes).unwrap(), 1);
        assert!(agg
            .series(Plane::Horizontal, ReconstructionMethod::ThinLens)
            .is_none());
    }

    #[test]
    fn test_save_without_scan() {
        let agg = ResultAggregator::new();
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("scan.dat")).unwrap();
        assert!(matches!(
            agg.save_scan(&path),
            Err(EmittanceError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_export_csv() {
        let mut agg = ResultAggregator::new();
        let m = ReconstructionMethod::TransferMatrix;
        agg.record_at(twiss(Plane::Horizontal, m, 1e-6, 8.0), epoch(60000.0));
        agg.record_at(twiss(Plane::Horizontal, m, 2e-6, 9.0), epoch(60000.5));

        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("series.csv")).unwrap();
        assert_eq!(agg.export_csv(&path, Plane::Horizontal, m).unwrap(), 2);
        assert_eq!(agg.export_csv(&path, Plane::Vertical, m).unwrap(), 0);

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "epoch_utc");
        assert_eq!(&headers[2], "plane");

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][2], "x");
        assert_eq!(&rows[0][3], "transfer-matrix");
        assert_relative_eq!(rows[1][1].parse::<f64>().unwrap(), 60000.5, epsilon = 1e-6);
    }
}
