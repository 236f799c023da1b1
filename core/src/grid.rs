//! Grid and measurement cell state.
//!
//! Both cell arrays are stored row-major, `index = y * width + x`. A [`GridCell`] carries the
//! fused Dempster-Shafer masses, the particle index range owned by the cell and its velocity
//! moments. A [`MeasurementCell`] carries one cycle of sensor evidence.
//!
//! Masses are belief values: `free_mass + occ_mass <= 1`, the remainder being unassigned
//! (unknown) belief. [`clamp_masses`] enforces this for any computed or externally supplied pair.

use nalgebra::{Matrix2, Vector2};
use std::fmt::{self, Display};

/// Pignistic transformation of a free/occupied mass pair into an occupancy probability.
///
/// The unknown mass is split evenly between the two hypotheses:
/// `occ + 0.5 * (1 - occ - free)`.
pub fn pignistic_transformation(free_mass: f64, occ_mass: f64) -> f64 {
    occ_mass + 0.5 * (1.0 - occ_mass - free_mass)
}

/// Clamp a `(free, occ)` mass pair onto the valid belief simplex.
///
/// NaN becomes 0, each mass is clamped to `[0, 1]` and a pair whose sum exceeds one is
/// rescaled proportionally.
pub fn clamp_masses(free_mass: f64, occ_mass: f64) -> (f64, f64) {
    let free = clamp_unit(free_mass);
    let occ = clamp_unit(occ_mass);
    let sum = free + occ;
    if sum > 1.0 {
        (free / sum, occ / sum)
    } else {
        (free, occ)
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

pub(crate) fn clamp_non_negative(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.max(0.0) }
}

/// One cell of the dynamic occupancy grid.
#[allow(non_snake_case)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GridCell {
    /// First index of this cell's particles in the sorted particle array.
    pub start_idx: usize,
    /// One past the last index of this cell's particles.
    pub end_idx: usize,
    /// Occupied mass not explained by surviving particles.
    pub new_born_occ_mass: f64,
    /// Occupied mass explained by surviving particles.
    pub pers_occ_mass: f64,
    pub free_mass: f64,
    pub occ_mass: f64,
    /// Reweighting factor for particles associated with the measurement.
    pub mu_A: f64,
    /// Reweighting factor for unassociated particles.
    pub mu_UA: f64,
    /// Summed weight of associated particles.
    pub w_A: f64,
    /// Summed weight of unassociated particles.
    pub w_UA: f64,
    pub mean_x_vel: f64,
    pub mean_y_vel: f64,
    pub var_x_vel: f64,
    pub var_y_vel: f64,
    pub covar_xy_vel: f64,
}

impl GridCell {
    /// Number of particles currently owned by the cell.
    pub fn particle_range_len(&self) -> usize {
        self.end_idx - self.start_idx
    }

    /// Pignistic occupancy probability of the cell.
    pub fn occupancy(&self) -> f64 {
        pignistic_transformation(self.free_mass, self.occ_mass)
    }

    pub fn velocity_mean(&self) -> Vector2<f64> {
        Vector2::new(self.mean_x_vel, self.mean_y_vel)
    }

    pub fn velocity_covariance(&self) -> Matrix2<f64> {
        Matrix2::new(
            self.var_x_vel,
            self.covar_xy_vel,
            self.covar_xy_vel,
            self.var_y_vel,
        )
    }

    /// Velocity normalised by its covariance, `vᵀ Σ⁻¹ v`.
    ///
    /// Returns `None` when the covariance is singular, e.g. for a cell whose particles all
    /// share one velocity.
    pub fn normalized_velocity(&self) -> Option<f64> {
        let mean = self.velocity_mean();
        let inverse = self.velocity_covariance().try_inverse()?;
        let value = (mean.transpose() * inverse * mean)[(0, 0)];
        value.is_finite().then_some(value)
    }
}

impl Display for GridCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GridCell")
            .field("particles", &(self.start_idx..self.end_idx))
            .field("free_mass", &self.free_mass)
            .field("occ_mass", &self.occ_mass)
            .field("pers_occ_mass", &self.pers_occ_mass)
            .field("new_born_occ_mass", &self.new_born_occ_mass)
            .field(
                "mean_velocity",
                &format_args!("({:.3}, {:.3}) m/s", self.mean_x_vel, self.mean_y_vel),
            )
            .finish()
    }
}

/// Sensor evidence for one grid cell.
#[allow(non_snake_case)]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeasurementCell {
    pub free_mass: f64,
    pub occ_mass: f64,
    /// Measurement likelihood for particles associated with this cell's evidence.
    pub likelihood: f64,
    /// Probability that persistent occupancy in the cell is associated with the measurement.
    pub p_A: f64,
}

impl Default for MeasurementCell {
    /// Full ignorance: no free or occupied evidence.
    fn default() -> Self {
        MeasurementCell {
            free_mass: 0.0,
            occ_mass: 0.0,
            likelihood: 1.0,
            p_A: 1.0,
        }
    }
}

impl MeasurementCell {
    pub fn new(free_mass: f64, occ_mass: f64) -> Self {
        MeasurementCell {
            free_mass,
            occ_mass,
            ..MeasurementCell::default()
        }
    }

    /// Pignistic occupancy probability of the measurement.
    pub fn occupancy(&self) -> f64 {
        pignistic_transformation(self.free_mass, self.occ_mass)
    }

    /// Copy with masses on the belief simplex, non-negative likelihood and `p_A` in `[0, 1]`.
    pub fn sanitized(&self) -> Self {
        let (free_mass, occ_mass) = clamp_masses(self.free_mass, self.occ_mass);
        MeasurementCell {
            free_mass,
            occ_mass,
            likelihood: clamp_non_negative(self.likelihood),
            p_A: clamp_unit(self.p_A),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_pignistic_transformation() {
        assert_approx_eq!(pignistic_transformation(0.0, 0.0), 0.5, 1e-12);
        assert_approx_eq!(pignistic_transformation(1.0, 0.0), 0.0, 1e-12);
        assert_approx_eq!(pignistic_transformation(0.0, 1.0), 1.0, 1e-12);
        assert_approx_eq!(pignistic_transformation(0.2, 0.6), 0.7, 1e-12);
    }

    #[test]
    fn test_clamp_masses() {
        assert_eq!(clamp_masses(f64::NAN, 0.3), (0.0, 0.3));
        assert_eq!(clamp_masses(-1.0, 2.0), (0.0, 1.0));
        let (free, occ) = clamp_masses(0.9, 0.3);
        assert_approx_eq!(free + occ, 1.0, 1e-12);
        assert_approx_eq!(free / occ, 3.0, 1e-12);
        assert_eq!(clamp_masses(f64::INFINITY, f64::NEG_INFINITY), (1.0, 0.0));
    }

    #[test]
    fn test_measurement_sanitized() {
        let cell = MeasurementCell {
            free_mass: 0.7,
            occ_mass: 0.7,
            likelihood: -3.0,
            p_A: 4.0,
        }
        .sanitized();
        assert_approx_eq!(cell.free_mass + cell.occ_mass, 1.0, 1e-12);
        assert_eq!(cell.likelihood, 0.0);
        assert_eq!(cell.p_A, 1.0);
    }

    #[test]
    fn test_normalized_velocity() {
        let cell = GridCell {
            mean_x_vel: 2.0,
            mean_y_vel: 0.0,
            var_x_vel: 4.0,
            var_y_vel: 1.0,
            ..GridCell::default()
        };
        assert_approx_eq!(cell.normalized_velocity().unwrap(), 1.0, 1e-12);

        let singular = GridCell {
            mean_x_vel: 1.0,
            ..GridCell::default()
        };
        assert!(singular.normalized_velocity().is_none());
    }
}
