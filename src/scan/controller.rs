//! # Quadrupole scan controller
//!
//! Drives one physical scan through the state machine
//!
//! ```text
//! Idle → Stepping → Settling → Sampling (loop) → StepDone → { Stepping | Completed }
//!                                                          ↘ Cancelled
//! ```
//!
//! ## Overview
//! -----------------
//! * **Stepping** – the next setpoint is issued and the call blocks until the magnet
//!   confirms the change.
//! * **Settling** – a settle wait; the first step uses the longer `first_settle`.
//! * **Sampling** – readback and beam size are read until the step has
//!   `samples_per_step` accepted samples. Oversized or unavailable sizes are rejected
//!   and retried after a backoff.
//! * **StepDone** – the step's samples are trimmed
//!   ([`trim_outliers`](crate::scan::trim_outliers)) and merged into the running
//!   [`ScanResult`].
//!
//! ## Cooperative cancellation
//! -----------------
//! A [`CancelToken`] is polled at the top of every sampling iteration, before every
//! setpoint (the final restore included), and in slices of [`POLL_INTERVAL`] during
//! settle/backoff waits. A device call in flight always completes first. Once
//! cancellation is observed no further setpoint is issued and [`ScanController::run`]
//! returns the partial result with [`ScanStatus::Cancelled`].
//!
//! ## Error semantics
//! -----------------
//! A magnet or sensor communication failure moves the controller to
//! [`ScanState::Cancelled`] and is returned as [`EmittanceError::Device`]. Samples of
//! the failed step are never merged.
//!
//! ## Background execution
//! -----------------
//! Device calls block until the hardware answers, so [`ScanController::run`] is a
//! blocking function. [`ScanController::spawn`] moves the controller and its devices
//! onto tokio's blocking pool and returns a [`ScanHandle`] to cancel it, follow its
//! [`ScanProgress`] and join it; the async runtime is never stalled by a device.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    constants::Ampere,
    devices::{BeamSizeSource, MagnetInterface},
    emittance_errors::{DeviceError, EmittanceError},
    scan::{trim_outliers, ScanParams, ScanPoint, ScanResult},
};

/// Granularity of the cancellation checks during waits.
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Shared cancellation flag between the scan worker and its controlling context.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; observed at the next loop boundary.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Stepping { step: usize },
    Settling { step: usize },
    Sampling { step: usize },
    StepDone { step: usize },
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Completed,
    Cancelled,
}

/// Snapshot published on every state transition, for live display.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub state: ScanState,
    pub n_steps: usize,
    pub rejected_samples: usize,
    pub result: ScanResult,
}

/// Final product of a scan.
///
/// Fields
/// -----------------
/// * `status` – whether all steps ran or the scan was cancelled.
/// * `result` – trimmed, accepted data (partial when cancelled).
/// * `samples` – every sample taken, accepted or not, in acquisition order.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub status: ScanStatus,
    pub result: ScanResult,
    pub samples: Vec<ScanPoint>,
}

impl ScanOutcome {
    pub fn is_completed(&self) -> bool {
        self.status == ScanStatus::Completed
    }

    pub fn rejected_samples(&self) -> usize {
        self.samples.iter().filter(|p| !p.accepted).count()
    }
}

/// Owner of a magnet/sensor pair for one scan session.
pub struct ScanController<M: MagnetInterface, B: BeamSizeSource> {
    magnet: M,
    source: B,
    params: ScanParams,
    state: ScanState,
    result: ScanResult,
    samples: Vec<ScanPoint>,
    rejected: usize,
    progress: watch::Sender<ScanProgress>,
}

impl<M: MagnetInterface, B: BeamSizeSource> ScanController<M, B> {
    /// Build a controller over injected devices.
    ///
    /// Arguments
    /// -----------------
    /// * `magnet`: Magnet driven by the scan.
    /// * `source`: Beam-size source read at every sample.
    /// * `params`: Scan configuration.
    ///
    /// Return
    /// ----------
    /// * The controller in [`ScanState::Idle`], or [`EmittanceError::InvalidConfiguration`]
    ///   if `params` do not validate.
    pub fn new(magnet: M, source: B, params: ScanParams) -> Result<Self, EmittanceError> {
        params.validate()?;
        let result = ScanResult::new(params.plane);
        let (progress, _) = watch::channel(ScanProgress {
            state: ScanState::Idle,
            n_steps: params.n_steps,
            rejected_samples: 0,
            result: result.clone(),
        });

        Ok(ScanController {
            magnet,
            source,
            params,
            state: ScanState::Idle,
            result,
            samples: Vec::new(),
            rejected: 0,
            progress,
        })
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn params(&self) -> &ScanParams {
        &self.params
    }

    /// Receiver of the progress snapshots.
    pub fn subscribe(&self) -> watch::Receiver<ScanProgress> {
        self.progress.subscribe()
    }

    /// Run the whole scan on the calling thread, blocking until it ends.
    ///
    /// Call it from a plain thread or through [`ScanController::spawn`], not from
    /// inside an async task.
    ///
    /// Arguments
    /// -----------------
    /// * `cancel`: Cancellation flag polled at loop boundaries.
    ///
    /// Return
    /// ----------
    /// * A [`ScanOutcome`] with status `Completed` or `Cancelled`.
    /// * [`EmittanceError::Device`] if the magnet or the sensor fails.
    pub fn run(&mut self, cancel: &CancelToken) -> Result<ScanOutcome, EmittanceError> {
        self.result = ScanResult::new(self.params.plane);
        self.samples.clear();
        self.rejected = 0;
        let plane = self.params.plane;
        self.progress.send_modify(|p| {
            p.rejected_samples = 0;
            p.result = ScanResult::new(plane);
        });

        let setpoints = self.params.setpoints();
        info!(
            "Starting {} plane scan: {} steps from {:.3} A to {:.3} A",
            self.params.plane,
            setpoints.len(),
            self.params.initial_current,
            self.params.final_current
        );

        let initial_readback = if self.params.restore_current {
            Some(self.read_current()?)
        } else {
            None
        };

        for (step, &setpoint) in setpoints.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(self.cancelled());
            }

            self.transition(ScanState::Stepping { step });
            debug!("Step {step}: setting current to {setpoint:.4} A");
            if let Err(e) = self.magnet.set_current(setpoint) {
                return Err(self.abort(e));
            }

            self.transition(ScanState::Settling { step });
            let settle = if step == 0 {
                self.params.first_settle
            } else {
                self.params.settle
            };
            if !wait_or_cancel(settle, cancel) {
                return Ok(self.cancelled());
            }

            self.transition(ScanState::Sampling { step });
            let Some(points) = self.sample_step(setpoint, cancel)? else {
                return Ok(self.cancelled());
            };

            let kept = trim_outliers(points, self.params.trim_count);
            self.result.merge_step(&kept);
            self.progress.send_modify(|p| p.result.merge_step(&kept));
            self.transition(ScanState::StepDone { step });
        }

        if cancel.is_cancelled() {
            return Ok(self.cancelled());
        }

        if let Some(current) = initial_readback {
            info!("Restoring magnet current to {current:.4} A");
            if let Err(e) = self.magnet.set_current(current) {
                return Err(self.abort(e));
            }
        }

        self.transition(ScanState::Completed);
        info!(
            "Scan completed: {} points kept, {} samples rejected",
            self.result.len(),
            self.rejected
        );
        Ok(self.outcome(ScanStatus::Completed))
    }

    /// Collect the accepted samples of one step.
    ///
    /// Returns `Ok(None)` when cancellation is observed.
    fn sample_step(
        &mut self,
        setpoint: Ampere,
        cancel: &CancelToken,
    ) -> Result<Option<Vec<ScanPoint>>, EmittanceError> {
        let mut accepted = Vec::with_capacity(self.params.samples_per_step);

        while accepted.len() < self.params.samples_per_step {
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let readback = self.read_current()?;
            let spot = match self.source.measure(self.params.plane) {
                Ok(spot) => spot,
                Err(e) => return Err(self.abort(e)),
            };

            let sigma = spot.sigma.filter(|s| s.is_finite());
            let ok = sigma.is_some_and(|s| s <= self.params.max_sigma);
            let point = ScanPoint {
                setpoint,
                readback,
                sigma,
                accepted: ok,
            };
            self.samples.push(point);

            if ok {
                accepted.push(point);
            } else {
                debug!(
                    "Rejected sample at {readback:.4} A (sigma {:?}, max {:e})",
                    spot.sigma, self.params.max_sigma
                );
                self.rejected += 1;
                let rejected = self.rejected;
                self.progress.send_modify(|p| p.rejected_samples = rejected);
                if !wait_or_cancel(self.params.rejection_backoff, cancel) {
                    return Ok(None);
                }
            }
        }

        Ok(Some(accepted))
    }

    fn read_current(&mut self) -> Result<Ampere, EmittanceError> {
        match self.magnet.read_current() {
            Ok(current) => Ok(current),
            Err(e) => Err(self.abort(e)),
        }
    }

    fn abort(&mut self, err: DeviceError) -> EmittanceError {
        warn!("Scan aborted by device failure: {err}");
        self.transition(ScanState::Cancelled);
        err.into()
    }

    fn cancelled(&mut self) -> ScanOutcome {
        info!(
            "Scan cancelled after {} kept points ({:?})",
            self.result.len(),
            self.state
        );
        self.transition(ScanState::Cancelled);
        self.outcome(ScanStatus::Cancelled)
    }

    fn outcome(&self, status: ScanStatus) -> ScanOutcome {
        ScanOutcome {
            status,
            result: self.result.clone(),
            samples: self.samples.clone(),
        }
    }

    fn transition(&mut self, state: ScanState) {
        debug!("Scan state {:?} → {:?}", self.state, state);
        self.state = state;
        self.progress.send_modify(|p| p.state = state);
    }
}

impl<M, B> ScanController<M, B>
where
    M: MagnetInterface + 'static,
    B: BeamSizeSource + 'static,
{
    /// Run the scan on tokio's blocking pool.
    ///
    /// The controller and its devices move into the worker and are released when the
    /// scan ends. Must be called from within a tokio runtime.
    ///
    /// See also
    /// ------------
    /// * [`ScanHandle`] – Cancellation, progress and join.
    pub fn spawn(mut self) -> ScanHandle {
        let cancel = CancelToken::new();
        let progress = self.subscribe();
        let token = cancel.clone();
        let join = tokio::task::spawn_blocking(move || self.run(&token));

        ScanHandle {
            cancel,
            progress,
            join,
        }
    }
}

/// Handle on a scan running in the background.
pub struct ScanHandle {
    cancel: CancelToken,
    progress: watch::Receiver<ScanProgress>,
    join: JoinHandle<Result<ScanOutcome, EmittanceError>>,
}

impl ScanHandle {
    /// Ask the worker to stop at its next loop boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn progress(&self) -> watch::Receiver<ScanProgress> {
        self.progress.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the worker and return its outcome.
    pub async fn join(self) -> Result<ScanOutcome, EmittanceError> {
        self.join.await?
    }
}

/// Sleep for `duration` in slices of [`POLL_INTERVAL`].
///
/// Returns `false` as soon as cancellation is observed.
fn wait_or_cancel(duration: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(POLL_INTERVAL));
    }
}
