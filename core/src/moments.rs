//! Per-cell velocity moments.
//!
//! Each particle first contributes its weighted velocity terms `w·vx`, `w·vy`, `w·vx²`, `w·vy²`
//! and `w·vx·vy` to the accumulator arrays. Each cell then sums the terms over its particle range
//! in a single pass and normalises by its weight sum:
//!
//! $$
//! \bar v_x = \frac{\sum w v_x}{\sum w}, \qquad
//! \sigma_{x}^2 = \frac{\sum w v_x^2}{\sum w} - \bar v_x^2, \qquad
//! \sigma_{xy} = \frac{\sum w v_x v_y}{\sum w} - \bar v_x \bar v_y
//! $$
//!
//! A cell without weight keeps the moments of the previous cycle.

use rayon::prelude::*;

use crate::grid::GridCell;
use crate::particle::Particle;

/// Per-particle weighted velocity terms, reused across cycles.
#[derive(Clone, Debug, Default)]
pub struct VelocityAccumulators {
    pub vel_x: Vec<f64>,
    pub vel_y: Vec<f64>,
    pub vel_x_squared: Vec<f64>,
    pub vel_y_squared: Vec<f64>,
    pub vel_xy: Vec<f64>,
}

impl VelocityAccumulators {
    pub fn new(particle_count: usize) -> Self {
        VelocityAccumulators {
            vel_x: vec![0.0; particle_count],
            vel_y: vec![0.0; particle_count],
            vel_x_squared: vec![0.0; particle_count],
            vel_y_squared: vec![0.0; particle_count],
            vel_xy: vec![0.0; particle_count],
        }
    }

    /// Fill the accumulators from the particles and their current weights.
    pub fn accumulate(&mut self, particles: &[Particle], weights: &[f64]) {
        particles
            .par_iter()
            .zip(weights.par_iter())
            .zip(self.vel_x.par_iter_mut())
            .zip(self.vel_y.par_iter_mut())
            .zip(self.vel_x_squared.par_iter_mut())
            .zip(self.vel_y_squared.par_iter_mut())
            .zip(self.vel_xy.par_iter_mut())
            .for_each(|((((((particle, &w), vx), vy), vx2), vy2), vxy)| {
                let (px, py) = (particle.state[2], particle.state[3]);
                *vx = w * px;
                *vy = w * py;
                *vx2 = w * px * px;
                *vy2 = w * py * py;
                *vxy = w * px * py;
            });
    }
}

/// Compute the velocity mean and covariance of every cell from its particle range.
pub fn statistical_moments(
    cells: &mut [GridCell],
    weights: &[f64],
    accumulators: &VelocityAccumulators,
) {
    cells.par_iter_mut().for_each(|cell| {
        let range = cell.start_idx..cell.end_idx;
        let weight_sum: f64 = weights[range.clone()].iter().sum();
        if weight_sum <= 0.0 || !weight_sum.is_finite() {
            return;
        }
        let sum = |values: &[f64]| values[range.clone()].iter().sum::<f64>() / weight_sum;
        let mean_x = sum(&accumulators.vel_x);
        let mean_y = sum(&accumulators.vel_y);
        cell.mean_x_vel = mean_x;
        cell.mean_y_vel = mean_y;
        cell.var_x_vel = (sum(&accumulators.vel_x_squared) - mean_x * mean_x).max(0.0);
        cell.var_y_vel = (sum(&accumulators.vel_y_squared) - mean_y * mean_y).max(0.0);
        cell.covar_xy_vel = sum(&accumulators.vel_xy) - mean_x * mean_y;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Vector4;

    fn moments_of(particles: &[Particle], mut cells: Vec<GridCell>) -> Vec<GridCell> {
        let weights: Vec<f64> = particles.iter().map(|p| p.weight).collect();
        let mut accumulators = VelocityAccumulators::new(particles.len());
        accumulators.accumulate(particles, &weights);
        statistical_moments(&mut cells, &weights, &accumulators);
        cells
    }

    #[test]
    fn test_identical_velocities_have_zero_spread() {
        let particles: Vec<Particle> = (0..7)
            .map(|_| Particle::new(Vector4::new(0.0, 0.0, 1.7, -0.3), 0.1))
            .collect();
        let cells = moments_of(
            &particles,
            vec![GridCell {
                start_idx: 0,
                end_idx: 7,
                ..GridCell::default()
            }],
        );
        assert_approx_eq!(cells[0].mean_x_vel, 1.7, 1e-12);
        assert_approx_eq!(cells[0].mean_y_vel, -0.3, 1e-12);
        assert_approx_eq!(cells[0].var_x_vel, 0.0, 1e-12);
        assert_approx_eq!(cells[0].var_y_vel, 0.0, 1e-12);
        assert_approx_eq!(cells[0].covar_xy_vel, 0.0, 1e-12);
    }

    #[test]
    fn test_weighted_mean_and_covariance() {
        let particles = vec![
            Particle::new(Vector4::new(0.0, 0.0, 1.0, 1.0), 0.25),
            Particle::new(Vector4::new(0.0, 0.0, 3.0, -1.0), 0.75),
        ];
        let cells = moments_of(
            &particles,
            vec![GridCell {
                start_idx: 0,
                end_idx: 2,
                ..GridCell::default()
            }],
        );
        // mean = 0.25 * (1, 1) + 0.75 * (3, -1) = (2.5, -0.5)
        assert_approx_eq!(cells[0].mean_x_vel, 2.5, 1e-12);
        assert_approx_eq!(cells[0].mean_y_vel, -0.5, 1e-12);
        // E[vx²] = 0.25 + 6.75 = 7.0
        assert_approx_eq!(cells[0].var_x_vel, 0.75, 1e-12);
        assert_approx_eq!(cells[0].var_y_vel, 0.75, 1e-12);
        // E[vx vy] = 0.25 - 2.25 = -2.0; -2.0 + 1.25
        assert_approx_eq!(cells[0].covar_xy_vel, -0.75, 1e-12);
    }

    #[test]
    fn test_cells_without_weight_keep_prior_moments() {
        let particles = vec![Particle::new(Vector4::new(0.0, 0.0, 5.0, 5.0), 0.0)];
        let prior = GridCell {
            start_idx: 0,
            end_idx: 1,
            mean_x_vel: -1.0,
            mean_y_vel: 2.0,
            var_x_vel: 0.5,
            var_y_vel: 0.25,
            covar_xy_vel: 0.1,
            ..GridCell::default()
        };
        let empty = GridCell {
            start_idx: 1,
            end_idx: 1,
            mean_x_vel: 4.0,
            ..GridCell::default()
        };
        let cells = moments_of(&particles, vec![prior, empty]);
        assert_eq!(cells[0], prior);
        assert_eq!(cells[1], empty);
    }
}
