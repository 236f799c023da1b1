//! The dynamic occupancy grid map.
//!
//! [`OccupancyGridMap`] owns every buffer of the filter, sized once from [`GridParams`], and runs
//! one cycle of the pipeline per [`OccupancyGridMap::update`] call:
//!
//! 1. measurement fusion
//! 2. particle prediction
//! 3. particle-to-cell assignment
//! 4. occupancy update
//! 5. persistent particle reweighting
//! 6. birth of new particles
//! 7. statistical moments
//! 8. resampling into the second particle buffer, which is then swapped in
//!
//! The individual stages are public so a caller can drive the pipeline step by step. Between
//! calls the grid, measurement and particle arrays are readable through the accessors.
//!
//! ## Example
//!
//! ```
//! use dogm::{GridParams, OccupancyGridMap};
//!
//! let params = GridParams {
//!     width: 10,
//!     height: 10,
//!     resolution: 0.5,
//!     particle_count: 1_000,
//!     new_born_particle_count: 100,
//!     ..GridParams::default()
//! };
//! let mut map = OccupancyGridMap::new(params).unwrap();
//! let measurements = vec![0.0; 2 * map.grid_cell_count()];
//! map.update(0.1, &measurements).unwrap();
//! assert_eq!(map.particle_array().len(), 1_000);
//! ```

use std::fmt::{self, Debug};

use log::{debug, trace, warn};
use nalgebra::{Vector2, Vector4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::assignment::{assign_cell_indices, cell_index_of, sort_particles_by_cell};
use crate::birth::{
    BirthModel, accumulate_birth_orders, assign_birth_slots, sample_birth_randomness,
    spawn_particles,
};
use crate::config::GridParams;
use crate::error::{DogmError, Result};
use crate::grid::{GridCell, MeasurementCell};
use crate::measurement::{fuse_measurements, ingest_measurement_cells};
use crate::moments::{VelocityAccumulators, statistical_moments};
use crate::occupancy::{mark_associations, reweight_persistent_particles, update_occupancy};
use crate::particle::{
    Particle, RANDOM_VALUES_PER_PARTICLE, effective_sample_size, predict_particles,
    sample_process_noise,
};
use crate::resampling::{inclusive_scan, systematic_resample};

/// Observable per-cycle bookkeeping.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Diagnostics {
    /// Completed update cycles.
    pub cycles: u64,
    /// Resampling passes that fell back to uniform selection.
    pub degenerate_resamples: u64,
    /// Whether the last resampling pass was degenerate.
    pub last_cycle_degenerate: bool,
    /// Particles spawned by the last birth stage.
    pub last_birth_count: usize,
    /// Cells with new-born mass that got no birth slot in the last cycle.
    pub last_unserved_birth_cells: usize,
    /// Joint persistent and birth weight seen by the last resampling pass.
    pub last_total_weight: f64,
}

pub struct OccupancyGridMap {
    params: GridParams,
    grid_cell_array: Vec<GridCell>,
    meas_cell_array: Vec<MeasurementCell>,
    particle_array: Vec<Particle>,
    particle_array_next: Vec<Particle>,
    birth_particle_array: Vec<Particle>,
    weight_array: Vec<f64>,
    birth_weight_array: Vec<f64>,
    born_masses_array: Vec<f64>,
    particle_orders_array_accum: Vec<f64>,
    birth_slot_ends: Vec<usize>,
    velocity_accumulators: VelocityAccumulators,
    rand_array: Vec<f64>,
    rng: StdRng,
    diagnostics: Diagnostics,
}

impl OccupancyGridMap {
    /// Validate `params`, allocate every buffer and scatter the initial particles.
    ///
    /// Initial particles are spread uniformly over the grid with velocities drawn from the birth
    /// prior. They carry no weight, so the first cycle is driven by birth alone.
    pub fn new(params: GridParams) -> Result<Self> {
        params.validate()?;
        let cell_count = params.grid_cell_count();
        let random_len = RANDOM_VALUES_PER_PARTICLE
            * params.particle_count.max(params.new_born_particle_count);

        let mut rng = StdRng::seed_from_u64(params.seed);
        let extent_x = params.width as f64 * params.resolution;
        let extent_y = params.height as f64 * params.resolution;
        let mut particle_array: Vec<Particle> = (0..params.particle_count)
            .map(|_| {
                let x = rng.random::<f64>() * extent_x;
                let y = rng.random::<f64>() * extent_y;
                let vx: f64 = rng.sample(StandardNormal);
                let vy: f64 = rng.sample(StandardNormal);
                Particle::new(
                    Vector4::new(
                        x,
                        y,
                        vx * params.birth_velocity_std,
                        vy * params.birth_velocity_std,
                    ),
                    0.0,
                )
            })
            .collect();
        assign_cell_indices(
            &mut particle_array,
            params.width,
            params.height,
            params.resolution,
        );

        debug!(
            "Allocated {}x{} grid at {} m with {} particles and {} birth slots",
            params.width,
            params.height,
            params.resolution,
            params.particle_count,
            params.new_born_particle_count
        );

        Ok(OccupancyGridMap {
            grid_cell_array: vec![GridCell::default(); cell_count],
            meas_cell_array: vec![MeasurementCell::default(); cell_count],
            particle_array_next: vec![Particle::default(); params.particle_count],
            birth_particle_array: vec![Particle::default(); params.new_born_particle_count],
            weight_array: vec![0.0; params.particle_count],
            birth_weight_array: vec![0.0; params.new_born_particle_count],
            born_masses_array: vec![0.0; cell_count],
            particle_orders_array_accum: vec![0.0; cell_count],
            birth_slot_ends: vec![0; cell_count],
            velocity_accumulators: VelocityAccumulators::new(params.particle_count),
            rand_array: vec![0.0; random_len],
            particle_array,
            rng,
            diagnostics: Diagnostics::default(),
            params,
        })
    }

    /// Ingest one cycle of raw sensor evidence, `[free_mass, occ_mass]` per cell in row-major
    /// order. The measurement grid is left untouched when the length is wrong.
    pub fn update_measurement_grid(&mut self, measurements: &[f64]) -> Result<()> {
        fuse_measurements(&mut self.meas_cell_array, measurements)
    }

    /// Ingest measurement cells that already carry a likelihood and association probability.
    pub fn update_measurement_cells(&mut self, cells: &[MeasurementCell]) -> Result<()> {
        ingest_measurement_cells(&mut self.meas_cell_array, cells)
    }

    /// Run one full cycle with a raw measurement grid.
    ///
    /// `dt` and the measurement shape are checked before any state changes.
    pub fn update(&mut self, dt: f64, measurements: &[f64]) -> Result<()> {
        check_time_step(dt)?;
        self.update_measurement_grid(measurements)?;
        self.run_cycle(dt);
        Ok(())
    }

    /// Run one full cycle with pre-formed measurement cells.
    pub fn update_with_measurement_cells(
        &mut self,
        dt: f64,
        cells: &[MeasurementCell],
    ) -> Result<()> {
        check_time_step(dt)?;
        self.update_measurement_cells(cells)?;
        self.run_cycle(dt);
        Ok(())
    }

    fn run_cycle(&mut self, dt: f64) {
        self.particle_prediction(dt);
        self.particle_assignment();
        self.grid_cell_occupancy_update();
        self.update_persistent_particles();
        self.initialize_new_particles();
        self.statistical_moments();
        self.resampling();
        self.diagnostics.cycles += 1;
        debug!(
            "Cycle {}: total weight {:.4}, {} particles born, degenerate: {}",
            self.diagnostics.cycles,
            self.diagnostics.last_total_weight,
            self.diagnostics.last_birth_count,
            self.diagnostics.last_cycle_degenerate
        );
    }

    /// Advance every particle by `dt` with the constant-velocity model.
    pub fn particle_prediction(&mut self, dt: f64) {
        trace!("Particle prediction, dt = {dt}");
        let noise = &mut self.rand_array[..RANDOM_VALUES_PER_PARTICLE * self.params.particle_count];
        sample_process_noise(noise, &mut self.rng);
        predict_particles(
            &mut self.particle_array,
            noise,
            dt,
            self.params.ps,
            self.params.process_noise_position,
            self.params.process_noise_velocity,
        );
    }

    /// Map particles to cells and rebuild the per-cell particle ranges.
    pub fn particle_assignment(&mut self) {
        trace!("Particle assignment");
        assign_cell_indices(
            &mut self.particle_array,
            self.params.width,
            self.params.height,
            self.params.resolution,
        );
        let in_grid = sort_particles_by_cell(
            &mut self.particle_array,
            &mut self.particle_array_next,
            &mut self.grid_cell_array,
        );
        trace!(
            "{} of {} particles inside the grid",
            in_grid, self.params.particle_count
        );
    }

    /// Fuse predicted particle mass with the measurement grid.
    pub fn grid_cell_occupancy_update(&mut self) {
        trace!("Grid cell occupancy update");
        mark_associations(&mut self.particle_array, &self.meas_cell_array);
        update_occupancy(
            &mut self.grid_cell_array,
            &self.meas_cell_array,
            &self.particle_array,
            &mut self.born_masses_array,
            self.params.ps,
            self.params.pb,
        );
    }

    /// Rescale surviving particle weights to their cells' persistent mass.
    pub fn update_persistent_particles(&mut self) {
        trace!("Persistent particle update");
        reweight_persistent_particles(
            &mut self.particle_array,
            &self.grid_cell_array,
            &mut self.weight_array,
        );
    }

    /// Spawn birth particles for new-born occupied mass.
    pub fn initialize_new_particles(&mut self) {
        trace!("New particle initialization");
        let total_mass =
            accumulate_birth_orders(&self.born_masses_array, &mut self.particle_orders_array_accum);
        let slots = self.params.new_born_particle_count;
        let unserved = assign_birth_slots(
            &self.born_masses_array,
            &self.particle_orders_array_accum,
            total_mass,
            slots,
            &mut self.birth_slot_ends,
        );
        if unserved > 0 {
            debug!("{} cells with new-born mass got no birth slot", unserved);
        }
        self.diagnostics.last_unserved_birth_cells = unserved;
        let random = &mut self.rand_array[..RANDOM_VALUES_PER_PARTICLE * slots];
        sample_birth_randomness(random, &mut self.rng);
        let model = BirthModel {
            width: self.params.width,
            resolution: self.params.resolution,
            velocity_std: self.params.birth_velocity_std,
        };
        self.diagnostics.last_birth_count = spawn_particles(
            &mut self.birth_particle_array,
            &mut self.birth_weight_array,
            &self.born_masses_array,
            &self.birth_slot_ends,
            random,
            &model,
        );
        trace!(
            "Born mass {:.4} spread over {} particles",
            total_mass, self.diagnostics.last_birth_count
        );
    }

    /// Compute per-cell velocity mean and covariance from the persistent particles.
    pub fn statistical_moments(&mut self) {
        trace!("Statistical moments");
        self.velocity_accumulators
            .accumulate(&self.particle_array, &self.weight_array);
        statistical_moments(
            &mut self.grid_cell_array,
            &self.weight_array,
            &self.velocity_accumulators,
        );
    }

    /// Draw the next generation and swap it in as the current particle array.
    pub fn resampling(&mut self) {
        trace!("Resampling");
        inclusive_scan(&mut self.weight_array);
        inclusive_scan(&mut self.birth_weight_array);
        let offset = self.rng.random::<f64>();
        let outcome = systematic_resample(
            &self.particle_array,
            &self.weight_array,
            &self.birth_particle_array,
            &self.birth_weight_array,
            offset,
            &mut self.particle_array_next,
        );
        std::mem::swap(&mut self.particle_array, &mut self.particle_array_next);

        let total = self.weight_array.last().copied().unwrap_or(0.0)
            + self.birth_weight_array.last().copied().unwrap_or(0.0);
        self.diagnostics.last_total_weight = total;
        self.diagnostics.last_cycle_degenerate = outcome.is_degenerate();
        if outcome.is_degenerate() {
            self.diagnostics.degenerate_resamples += 1;
            warn!(
                "Particle weights degenerate (total {total}); resampled uniformly over {} slots",
                self.params.particle_count + self.params.new_born_particle_count
            );
        }
    }

    pub fn params(&self) -> &GridParams {
        &self.params
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn grid_cell_array(&self) -> &[GridCell] {
        &self.grid_cell_array
    }

    pub fn meas_cell_array(&self) -> &[MeasurementCell] {
        &self.meas_cell_array
    }

    /// Current particle generation.
    pub fn particle_array(&self) -> &[Particle] {
        &self.particle_array
    }

    /// Birth particles of the last cycle.
    pub fn birth_particle_array(&self) -> &[Particle] {
        &self.birth_particle_array
    }

    pub fn grid_width(&self) -> usize {
        self.params.width
    }

    pub fn grid_height(&self) -> usize {
        self.params.height
    }

    pub fn grid_cell_count(&self) -> usize {
        self.grid_cell_array.len()
    }

    pub fn particle_count(&self) -> usize {
        self.params.particle_count
    }

    pub fn new_born_particle_count(&self) -> usize {
        self.params.new_born_particle_count
    }

    pub fn resolution(&self) -> f64 {
        self.params.resolution
    }

    /// Index of the cell containing the metric position `(x, y)`.
    pub fn cell_index(&self, x: f64, y: f64) -> Option<usize> {
        cell_index_of(
            x,
            y,
            self.params.width,
            self.params.height,
            self.params.resolution,
        )
    }

    /// Metric centre of cell `idx`.
    pub fn cell_center(&self, idx: usize) -> Option<Vector2<f64>> {
        if idx >= self.grid_cell_count() {
            return None;
        }
        let ix = (idx % self.params.width) as f64;
        let iy = (idx / self.params.width) as f64;
        Some(Vector2::new(
            (ix + 0.5) * self.params.resolution,
            (iy + 0.5) * self.params.resolution,
        ))
    }

    pub fn effective_sample_size(&self) -> f64 {
        effective_sample_size(&self.particle_array)
    }
}

fn check_time_step(dt: f64) -> Result<()> {
    if dt.is_finite() && dt >= 0.0 {
        Ok(())
    } else {
        Err(DogmError::InvalidTimeStep(dt))
    }
}

impl Debug for OccupancyGridMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self
            .particle_array
            .iter()
            .map(|p| p.weight)
            .fold(f64::INFINITY, f64::min);
        let max_weight = self
            .particle_array
            .iter()
            .map(|p| p.weight)
            .fold(0.0, f64::max);
        let occupied_mass: f64 = self.grid_cell_array.iter().map(|c| c.occ_mass).sum();
        f.debug_struct("OccupancyGridMap")
            .field(
                "grid",
                &format_args!(
                    "{}x{} @ {} m",
                    self.params.width, self.params.height, self.params.resolution
                ),
            )
            .field("num_particles", &self.particle_array.len())
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            )
            .field("occupied_mass", &format_args!("{:.4}", occupied_mass))
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}
