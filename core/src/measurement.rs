//! Measurement fusion: raw per-cell sensor evidence to calibrated [`MeasurementCell`]s.
//!
//! The raw measurement grid is a flat, row-major array with two values per cell,
//! `[free_mass, occ_mass]`, so its length is `2 * width * height`. Raw values are clamped onto
//! the belief simplex; a cell reported as NaN or negative in both channels ends up with no
//! evidence at all, which is how cells outside the sensor field of view are expressed.

use rayon::prelude::*;

use crate::error::{DogmError, Result};
use crate::grid::MeasurementCell;

/// Values per cell in the raw measurement layout.
pub const MEASUREMENT_CHANNELS: usize = 2;

/// Expected raw measurement length for a grid with `grid_cell_count` cells.
pub fn expected_measurement_len(grid_cell_count: usize) -> usize {
    MEASUREMENT_CHANNELS * grid_cell_count
}

/// Convert one raw `[free, occ]` pair into a measurement cell.
///
/// Raw input has no association model, so `likelihood` and `p_A` are both one.
pub fn fuse_raw_cell(free_mass: f64, occ_mass: f64) -> MeasurementCell {
    MeasurementCell::new(free_mass, occ_mass).sanitized()
}

/// Fill `meas_cells` from a raw measurement array.
///
/// Fails without touching `meas_cells` when the array length does not match.
pub fn fuse_measurements(meas_cells: &mut [MeasurementCell], measurements: &[f64]) -> Result<()> {
    let expected = expected_measurement_len(meas_cells.len());
    if measurements.len() != expected {
        return Err(DogmError::MeasurementShape {
            expected,
            actual: measurements.len(),
        });
    }
    meas_cells
        .par_iter_mut()
        .zip(measurements.par_chunks(MEASUREMENT_CHANNELS))
        .for_each(|(cell, raw)| *cell = fuse_raw_cell(raw[0], raw[1]));
    Ok(())
}

/// Fill `meas_cells` from already-formed measurement cells, sanitizing each one.
pub fn ingest_measurement_cells(
    meas_cells: &mut [MeasurementCell],
    cells: &[MeasurementCell],
) -> Result<()> {
    if cells.len() != meas_cells.len() {
        return Err(DogmError::MeasurementShape {
            expected: meas_cells.len(),
            actual: cells.len(),
        });
    }
    meas_cells
        .par_iter_mut()
        .zip(cells.par_iter())
        .for_each(|(cell, input)| *cell = input.sanitized());
    Ok(())
}
