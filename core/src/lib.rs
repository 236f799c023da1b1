//! Dynamic occupancy grid mapping with an evidential grid and a particle filter
//!
//! This crate maintains a dynamic occupancy grid map (DOGM): a fixed grid of cells where every cell carries
//! Dempster-Shafer masses for "free" and "occupied" together with an estimate of how the occupied part is moving.
//! Measurements are fused cycle by cycle with a population of weighted particles that represent moving occupancy
//! separately from occupancy that persists in place. The result is, per cycle, a grid of "is this cell occupied,
//! and if so how is it moving" estimates with a cost that is linear in the number of cells and particles.
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the particle state and per-cell velocity statistics.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides random number generation for process noise, birth and resampling.
//! - [`rayon`](https://crates.io/crates/rayon): Provides the data-parallel execution of every per-particle and per-cell stage.
//!
//! All other functionality is built on top of these crates or is auxiliary functionality (e.g. configuration I/O).
//!
//! ## Crate overview
//!
//! This crate is organized into one module per pipeline stage:
//! - [config]: Contains [GridParams] and the [ConfigFile] trait for reading and writing configuration files.
//! - [error]: Contains the [DogmError] type.
//! - [grid]: Contains the [GridCell] and [MeasurementCell] types and the pignistic transformation.
//! - [particle]: Contains the [Particle] type and the constant-velocity prediction.
//! - [measurement]: Contains the conversion of raw sensor evidence into measurement cells.
//! - [assignment]: Contains the particle-to-cell assignment and the per-cell particle ranges.
//! - [occupancy]: Contains the evidential occupancy update and the persistent particle reweighting.
//! - [birth]: Contains the spawning of particles for new occupancy.
//! - [moments]: Contains the per-cell velocity mean and covariance.
//! - [resampling]: Contains the systematic resampling of the joint particle population.
//! - [map]: Contains [OccupancyGridMap], which owns every buffer and runs the stages in order.
//!
//! ## State definition
//!
//! Every particle carries the state
//!
//! $$
//! x = [p_x, p_y, v_x, v_y]
//! $$
//!
//! with the position in metres in the grid frame and the velocity in metres per second. The grid frame has its
//! origin at the corner of cell 0; cell $(i_x, i_y)$ covers $[i_x r, (i_x + 1) r) \times [i_y r, (i_y + 1) r)$ for the
//! resolution $r$, and its index in every per-cell array is $i_y \cdot width + i_x$.
//!
//! ## Masses
//!
//! A cell holds a free mass $m_f$ and an occupied mass $m_o$ with $m_f + m_o \le 1$; the remainder is unassigned
//! belief. The occupied mass is split into a persistent part explained by the surviving particles of the cell and a
//! new-born part that has to be explained by new particles. The pignistic transformation
//! $m_o + \frac{1}{2}(1 - m_o - m_f)$ turns the masses into a single occupancy probability for display and decisions.
//!
//! ## Concurrency
//!
//! [OccupancyGridMap::update] runs the stages strictly in sequence; inside a stage the work is spread over the rayon
//! thread pool. Random numbers are drawn serially from the map's seeded generator before each parallel section, so
//! two maps built with the same [GridParams] produce identical results for identical input.
pub mod assignment;
pub mod birth;
pub mod config;
pub mod error;
pub mod grid;
pub mod map;
pub mod measurement;
pub mod moments;
pub mod occupancy;
pub mod particle;
pub mod resampling;

pub use config::{ConfigFile, GridParams};
pub use error::{DogmError, Result};
pub use grid::{GridCell, MeasurementCell, pignistic_transformation};
pub use map::{Diagnostics, OccupancyGridMap};
pub use particle::Particle;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_seeds_give_identical_maps() {
        let params = GridParams {
            width: 5,
            height: 5,
            resolution: 1.0,
            particle_count: 500,
            new_born_particle_count: 50,
            ..GridParams::default()
        };
        let mut measurements = vec![0.0; 50];
        measurements[2 * 12 + 1] = 0.8;
        measurements[2 * 3] = 0.6;

        let mut first = OccupancyGridMap::new(params.clone()).unwrap();
        let mut second = OccupancyGridMap::new(params).unwrap();
        for _ in 0..4 {
            first.update(0.1, &measurements).unwrap();
            second.update(0.1, &measurements).unwrap();
        }
        assert_eq!(first.particle_array(), second.particle_array());
        assert_eq!(first.grid_cell_array(), second.grid_cell_array());
    }
}
