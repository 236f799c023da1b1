//! Per-step summaries and dynamic-cell extraction written as CSV.
//!
//! A cell is reported as dynamic when its pignistic occupancy and the normalised magnitude
//! `vᵀΣ⁻¹v` of its velocity estimate both reach the configured thresholds. These are the cells a
//! downstream clustering stage would group into objects.

use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use dogm::{GridCell, OccupancyGridMap};

use crate::scenario::{ReportConfig, Scenario};

/// One row of `<output>.csv`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub time: f64,
    pub occupied_cells: usize,
    pub dynamic_cells: usize,
    /// Mean estimated velocity over the dynamic cells, zero when there are none.
    pub mean_vx: f64,
    pub mean_vy: f64,
    pub total_weight: f64,
    pub effective_sample_size: f64,
    pub degenerate: bool,
}

/// One row of `<output>_cells.csv`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellRecord {
    pub index: usize,
    pub x: f64,
    pub y: f64,
    pub occupancy: f64,
    pub mean_x_vel: f64,
    pub mean_y_vel: f64,
    pub var_x_vel: f64,
    pub var_y_vel: f64,
    pub covar_xy_vel: f64,
    pub normalized_velocity: f64,
    /// Ground-truth velocity of the object covering the cell centre, if any.
    pub true_vx: Option<f64>,
    pub true_vy: Option<f64>,
}

/// Normalised velocity of a cell that passes both thresholds.
fn dynamic_score(cell: &GridCell, report: &ReportConfig) -> Option<f64> {
    if cell.occupancy() < report.min_occupancy {
        return None;
    }
    cell.normalized_velocity()
        .filter(|&score| score >= report.min_normalized_velocity)
}

/// Every dynamic cell of the map.
pub fn dynamic_cells(
    map: &OccupancyGridMap,
    scenario: &Scenario,
    report: &ReportConfig,
) -> Vec<CellRecord> {
    map.grid_cell_array()
        .iter()
        .enumerate()
        .filter_map(|(index, cell)| {
            let score = dynamic_score(cell, report)?;
            let center = map.cell_center(index)?;
            let truth = scenario.velocity_at(&center);
            Some(CellRecord {
                index,
                x: center.x,
                y: center.y,
                occupancy: cell.occupancy(),
                mean_x_vel: cell.mean_x_vel,
                mean_y_vel: cell.mean_y_vel,
                var_x_vel: cell.var_x_vel,
                var_y_vel: cell.var_y_vel,
                covar_xy_vel: cell.covar_xy_vel,
                normalized_velocity: score,
                true_vx: truth.map(|v| v.x),
                true_vy: truth.map(|v| v.y),
            })
        })
        .collect()
}

/// Summarise the map after update `step`.
pub fn summarize_step(
    step: usize,
    time: f64,
    map: &OccupancyGridMap,
    report: &ReportConfig,
) -> StepRecord {
    let cells = map.grid_cell_array();
    let occupied_cells = cells
        .iter()
        .filter(|c| c.occupancy() >= report.min_occupancy)
        .count();
    let (mut sum_vx, mut sum_vy, mut dynamic) = (0.0, 0.0, 0usize);
    for cell in cells {
        if dynamic_score(cell, report).is_some() {
            sum_vx += cell.mean_x_vel;
            sum_vy += cell.mean_y_vel;
            dynamic += 1;
        }
    }
    let (mean_vx, mean_vy) = if dynamic > 0 {
        (sum_vx / dynamic as f64, sum_vy / dynamic as f64)
    } else {
        (0.0, 0.0)
    };
    let diagnostics = map.diagnostics();
    StepRecord {
        step,
        time,
        occupied_cells,
        dynamic_cells: dynamic,
        mean_vx,
        mean_vy,
        total_weight: diagnostics.last_total_weight,
        effective_sample_size: map.effective_sample_size(),
        degenerate: diagnostics.last_cycle_degenerate,
    }
}

/// Write serde records to a CSV file with a header row.
pub fn write_csv<T: Serialize, P: AsRef<Path>>(records: &[T], path: P) -> io::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
