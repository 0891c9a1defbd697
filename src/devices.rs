//! # Hardware seams of a quadrupole scan
//!
//! The scan controller talks to two external collaborators through these traits:
//!
//! * [`MagnetInterface`] – accepts a current setpoint and **blocks until the device
//!   confirms** the change, and reports the current readback.
//! * [`BeamSizeSource`] – returns the centroid and standard deviation of the beam
//!   image in one plane. The image processing behind it is out of scope.
//!
//! Both are injected into the [`ScanController`](crate::scan::controller::ScanController)
//! at construction and exclusively owned by it for the duration of one scan session.
use crate::{
    constants::{Ampere, Meter, Plane},
    emittance_errors::DeviceError,
};

/// One beam-size reading in a plane.
///
/// `sigma` is `None` when the source could not produce a size (e.g. failed fit);
/// such a reading is a rejected sample, not a device failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeamSpot {
    pub center: Meter,
    pub sigma: Option<Meter>,
}

pub trait MagnetInterface: Send {
    /// Issue a current setpoint and return once the device confirms it.
    fn set_current(&mut self, value: Ampere) -> Result<(), DeviceError>;

    /// Read back the current actually flowing in the magnet.
    fn read_current(&mut self) -> Result<Ampere, DeviceError>;
}

pub trait BeamSizeSource: Send {
    /// Measure the beam centroid and size in `plane`.
    fn measure(&mut self, plane: Plane) -> Result<BeamSpot, DeviceError>;
}

impl<T: MagnetInterface + ?Sized> MagnetInterface for Box<T> {
    fn set_current(&mut self, value: Ampere) -> Result<(), DeviceError> {
        (**self).set_current(value)
    }

    fn read_current(&mut self) -> Result<Ampere, DeviceError> {
        (**self).read_current()
    }
}

impl<T: BeamSizeSource + ?Sized> BeamSizeSource for Box<T> {
    fn measure(&mut self, plane: Plane) -> Result<BeamSpot, DeviceError> {
        (**self).measure(plane)
    }
}
