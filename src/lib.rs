//! Quadrupole-scan emittance measurement: scan control, thick- and thin-lens
//! reconstruction of the beam sigma matrix, and result trending.
pub mod aggregator;
pub mod constants;
pub mod devices;
pub mod emittance_errors;
pub mod optics;
pub mod raw_data;
pub mod reconstruction;
pub mod scan;
pub mod simulation;
pub mod strength;
pub mod transfer_matrix;
