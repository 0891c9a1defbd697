//! # Raw scan files
//!
//! A raw scan file keeps the accepted (current, beam size) pairs of one plane so a scan
//! can be reconstructed again later without the hardware.
//!
//! ```text
//! Plane = x
//!         current[A]       beam_size[m]
//!    -5.0000000000e0    2.3015637459e-4
//!    -3.8888888889e0    1.9874521023e-4
//! ...
//! ```
//!
//! * line 1: plane header, `Plane = <x|y>`,
//! * line 2: column header (free text, must not look like a data row),
//! * then one row per point, two fixed-width columns in scientific notation with
//!   10 fractional digits. Blank lines are ignored.
//!
//! Any deviation is reported as a [`FormatError`] carrying the offending line.
use std::{
    fs::File,
    io::{BufWriter, Write},
};

use camino::Utf8Path;
use log::debug;
use nom::{
    bytes::complete::tag,
    character::complete::{alphanumeric1, char, space0, space1},
    combinator::all_consuming,
    number::complete::double,
    sequence::{delimited, separated_pair},
    IResult, Parser,
};

use crate::{
    constants::Plane,
    emittance_errors::{EmittanceError, FormatError},
    scan::ScanResult,
};

/// Width of a numeric column.
const COLUMN_WIDTH: usize = 18;
/// Fractional digits written for each value.
const PRECISION: usize = 10;

const CURRENT_HEADER: &str = "current[A]";
const SIZE_HEADER: &str = "beam_size[m]";

fn plane_header(input: &str) -> IResult<&str, &str> {
    delimited(
        (space0, tag("Plane"), space0, char('='), space0),
        alphanumeric1,
        space0,
    )
    .parse(input)
}

fn data_row(input: &str) -> IResult<&str, (f64, f64)> {
    delimited(space0, separated_pair(double, space1, double), space0).parse(input)
}

fn is_data_row(line: &str) -> bool {
    all_consuming(data_row).parse(line).is_ok()
}

/// Write a scan in the raw-data layout.
pub fn write_scan<W: Write>(writer: &mut W, scan: &ScanResult) -> Result<(), EmittanceError> {
    writeln!(writer, "Plane = {}", scan.plane().tag())?;
    writeln!(
        writer,
        "{CURRENT_HEADER:>COLUMN_WIDTH$} {SIZE_HEADER:>COLUMN_WIDTH$}"
    )?;
    for (current, sigma) in scan.iter() {
        writeln!(
            writer,
            "{current:>COLUMN_WIDTH$.PRECISION$e} {sigma:>COLUMN_WIDTH$.PRECISION$e}"
        )?;
    }
    Ok(())
}

/// Save a scan to `path`, replacing any existing file.
pub fn save_scan(path: &Utf8Path, scan: &ScanResult) -> Result<(), EmittanceError> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_scan(&mut writer, scan)?;
    writer.flush()?;
    debug!("Saved {} {} scan points to {path}", scan.len(), scan.plane());
    Ok(())
}

/// Parse the content of a raw scan file.
///
/// Arguments
/// -----------------
/// * `content`: Whole file content.
///
/// Return
/// ----------
/// * The [`ScanResult`] in file order, or the first [`FormatError`] met:
///   - [`FormatError::MissingPlaneHeader`] if line 1 is not `Plane = <tag>`,
///   - [`FormatError::InvalidPlane`] if the tag is not `x` or `y`,
///   - [`FormatError::MissingColumnHeader`] if line 2 is absent, blank or a data row,
///   - [`FormatError::InvalidRow`] for a row that is not two finite numbers (1-based line).
pub fn parse_scan(content: &str) -> Result<ScanResult, FormatError> {
    let mut lines = content.lines();

    let first = lines.next().unwrap_or_default();
    let (_, plane_tag) = all_consuming(plane_header)
        .parse(first)
        .map_err(|_| FormatError::MissingPlaneHeader(first.to_string()))?;
    let plane: Plane = plane_tag.parse()?;

    match lines.next() {
        Some(header) if !header.trim().is_empty() && !is_data_row(header) => {}
        _ => return Err(FormatError::MissingColumnHeader),
    }

    let mut scan = ScanResult::new(plane);
    for (idx, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let invalid = || FormatError::InvalidRow {
            line: idx + 3,
            content: line.to_string(),
        };
        let (_, (current, sigma)) = all_consuming(data_row).parse(line).map_err(|_| invalid())?;
        if !current.is_finite() || !sigma.is_finite() {
            return Err(invalid());
        }
        scan.push(current, sigma);
    }
    Ok(scan)
}

/// Load a raw scan file.
///
/// Return
/// ----------
/// * The [`ScanResult`], an [`EmittanceError::IoError`] if the file cannot be read, or
///   an [`EmittanceError::Format`] if its content is malformed (not UTF-8 included).
pub fn load_scan(path: &Utf8Path) -> Result<ScanResult, EmittanceError> {
    let bytes = std::fs::read(path)?;
    let content = std::str::from_utf8(&bytes)
        .map_err(|e| FormatError::InvalidEncoding(e.valid_up_to()))?;
    let scan = parse_scan(content)?;
    debug!("Loaded {} {} scan points from {path}", scan.len(), scan.plane());
    Ok(scan)
}
