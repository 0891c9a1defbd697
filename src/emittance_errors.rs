use thiserror::Error;

/// Communication failures reported by the magnet or the beam-size source.
///
/// Any of these is fatal to the scan in progress.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Magnet communication failed: {0}")]
    Magnet(String),

    #[error("Beam-size source communication failed: {0}")]
    Sensor(String),
}

/// Degenerate or singular input to one of the reconstruction strategies.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconstructionError {
    #[error("Not enough distinct scan points: got {got}, need {need}")]
    InsufficientPoints { got: usize, need: usize },

    #[error("Normal-equations matrix is singular (scan points are not independent)")]
    SingularNormalMatrix,

    #[error("Thin-lens fit has a non-positive leading coefficient: {0}")]
    NonPositiveCurvature(f64),

    #[error("Reconstructed sigma matrix has zero or non-finite emittance")]
    DegenerateEmittance,
}

/// Malformed raw scan file.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("File is not valid UTF-8 text (invalid byte at offset {0})")]
    InvalidEncoding(usize),

    #[error("Missing or malformed plane header (expected `Plane = <x|y>`): {0:?}")]
    MissingPlaneHeader(String),

    #[error("Invalid plane identifier: {0}")]
    InvalidPlane(String),

    #[error("Missing column header line")]
    MissingColumnHeader,

    #[error("Invalid data row at line {line}: {content:?}")]
    InvalidRow { line: usize, content: String },
}

#[derive(Error, Debug)]
pub enum EmittanceError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Reconstruction error: {0}")]
    Reconstruction(#[from] ReconstructionError),

    #[error("Raw scan file format error: {0}")]
    Format(#[from] FormatError),

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Unable to read the system clock: {0}")]
    ClockError(#[from] hifitime::HifitimeError),

    #[error("Gaussian noise generation failed: {0:?}")]
    NoiseInjectionError(rand_distr::NormalError),

    #[error("Scan worker failed: {0}")]
    WorkerError(String),
}

impl From<rand_distr::NormalError> for EmittanceError {
    fn from(err: rand_distr::NormalError) -> Self {
        EmittanceError::NoiseInjectionError(err)
    }
}

impl From<tokio::task::JoinError> for EmittanceError {
    fn from(err: tokio::task::JoinError) -> Self {
        EmittanceError::WorkerError(err.to_string())
    }
}

impl PartialEq for EmittanceError {
    fn eq(&self, other: &Self) -> bool {
        use EmittanceError::*;
        match (self, other) {
            (InvalidConfiguration(a), InvalidConfiguration(b)) => a == b,
            (Device(a), Device(b)) => a == b,
            (Reconstruction(a), Reconstruction(b)) => a == b,
            (Format(a), Format(b)) => a == b,
            (NoiseInjectionError(a), NoiseInjectionError(b)) => a == b,
            (WorkerError(a), WorkerError(b)) => a == b,

            // Not comparable: equal when the variant matches
            (IoError(_), IoError(_)) => true,
            (CsvError(_), CsvError(_)) => true,
            (ClockError(_), ClockError(_)) => true,

            _ => false,
        }
    }
}
