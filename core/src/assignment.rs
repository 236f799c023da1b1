//! Particle-to-cell assignment.
//!
//! After prediction every particle is mapped to the cell containing its position and the
//! particle array is reordered by cell index with a stable counting sort. Each [`GridCell`] then
//! owns the contiguous half-open range `start_idx..end_idx` of the array. Particles that left the
//! grid are given zero weight and collected after the last in-grid particle, outside every range.

use rayon::prelude::*;

use crate::grid::GridCell;
use crate::particle::Particle;

/// Row-major index of the cell containing the metric position `(x, y)`, or `None` outside the grid.
pub fn cell_index_of(x: f64, y: f64, width: usize, height: usize, resolution: f64) -> Option<usize> {
    let fx = (x / resolution).floor();
    let fy = (y / resolution).floor();
    if !(fx.is_finite() && fy.is_finite()) || fx < 0.0 || fy < 0.0 {
        return None;
    }
    let (ix, iy) = (fx as usize, fy as usize);
    if ix >= width || iy >= height {
        return None;
    }
    Some(iy * width + ix)
}

/// Recompute `grid_cell_idx` for every particle, zeroing the weight of particles off the grid.
pub fn assign_cell_indices(particles: &mut [Particle], width: usize, height: usize, resolution: f64) {
    particles.par_iter_mut().for_each(|particle| {
        particle.grid_cell_idx =
            cell_index_of(particle.state[0], particle.state[1], width, height, resolution);
        if particle.grid_cell_idx.is_none() {
            particle.weight = 0.0;
        }
    });
}

/// Stable counting sort of `particles` by cell index, rebuilding every cell's particle range.
///
/// `scratch` must have the same length as `particles`; the two buffers are swapped so the sorted
/// particles end up in `particles`. Returns the number of in-grid particles.
pub fn sort_particles_by_cell(
    particles: &mut Vec<Particle>,
    scratch: &mut Vec<Particle>,
    cells: &mut [GridCell],
) -> usize {
    debug_assert_eq!(particles.len(), scratch.len());
    for cell in cells.iter_mut() {
        cell.start_idx = 0;
        cell.end_idx = 0;
    }
    // histogram, kept in end_idx until the prefix sum below
    for particle in particles.iter() {
        if let Some(idx) = particle.grid_cell_idx {
            cells[idx].end_idx += 1;
        }
    }
    let mut offset = 0;
    for cell in cells.iter_mut() {
        let count = cell.end_idx;
        cell.start_idx = offset;
        cell.end_idx = offset;
        offset += count;
    }
    let in_grid = offset;
    // end_idx doubles as the write cursor and finishes one past the cell's last particle
    let mut out_of_grid_cursor = in_grid;
    for particle in particles.iter() {
        match particle.grid_cell_idx {
            Some(idx) => {
                scratch[cells[idx].end_idx] = *particle;
                cells[idx].end_idx += 1;
            }
            None => {
                scratch[out_of_grid_cursor] = *particle;
                out_of_grid_cursor += 1;
            }
        }
    }
    std::mem::swap(particles, scratch);
    in_grid
}
