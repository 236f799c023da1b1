//! Evidential occupancy update and persistent-particle reweighting.
//!
//! ## Occupancy prediction
//!
//! The particles owned by a cell predict its occupied mass; the previous free mass decays with the
//! survival probability and never claims more than the remaining belief:
//!
//! $$
//! m_o^- = \min\left(\sum w, 1\right), \qquad m_f^- = \min\left(p_S m_f, 1 - m_o^-\right)
//! $$
//!
//! ## Measurement combination
//!
//! The prediction is fused with the measurement masses by Dempster's rule of combination
//! (orthogonal sum) over the frame `{free, occupied}`. With `K` the conflicting mass,
//!
//! $$
//! K = m_f^- z_o + m_o^- z_f, \qquad
//! m_o = \frac{m_o^- z_u + m_u^- z_o + m_o^- z_o}{1 - K}, \qquad
//! m_f = \frac{m_f^- z_u + m_u^- z_f + m_f^- z_f}{1 - K}
//! $$
//!
//! where `u` subscripts denote unknown mass. Under total conflict the measurement is taken as is.
//!
//! ## Persistent and new-born mass
//!
//! The updated occupied mass is split with the birth probability `p_B`:
//!
//! $$
//! \rho_b = \frac{m_o \, p_B (1 - m_o^-)}{m_o^- + p_B (1 - m_o^-)}, \qquad \rho_p = m_o - \rho_b
//! $$
//!
//! A cell without particle weight routes all of its occupied mass to `ρ_b`.
//!
//! ## Reweighting
//!
//! Particles in a cell with occupied measurement evidence are associated. Associated particles
//! carry the factor `a = p_A · likelihood + (1 - p_A)`, unassociated ones the factor one. With
//! `D = a w_A + w_UA` the cell stores `mu_A = ρ_p a / D` and `mu_UA = ρ_p / D`, and every particle
//! weight is multiplied by its factor, so the surviving weight of each cell sums to `ρ_p`.

use rayon::prelude::*;

use crate::grid::{GridCell, MeasurementCell, clamp_masses, clamp_non_negative};
use crate::particle::Particle;

/// Conflict level below which the orthogonal sum is considered undefined.
const TOTAL_CONFLICT_EPSILON: f64 = 1e-12;

/// Predicted free mass of a cell.
pub fn predict_free_mass(free_mass: f64, occ_pred: f64, ps: f64) -> f64 {
    (ps * free_mass).min(1.0 - occ_pred).max(0.0)
}

/// Dempster's orthogonal sum of predicted and measured masses, returned as `(free, occ)`.
pub fn combine_masses(
    free_pred: f64,
    occ_pred: f64,
    meas_free: f64,
    meas_occ: f64,
) -> (f64, f64) {
    let unknown_pred = 1.0 - occ_pred - free_pred;
    let meas_unknown = 1.0 - meas_occ - meas_free;
    let conflict = free_pred * meas_occ + occ_pred * meas_free;
    let normalizer = 1.0 - conflict;
    if normalizer <= TOTAL_CONFLICT_EPSILON {
        return clamp_masses(meas_free, meas_occ);
    }
    let occ = (occ_pred * meas_unknown + unknown_pred * meas_occ + occ_pred * meas_occ) / normalizer;
    let free =
        (free_pred * meas_unknown + unknown_pred * meas_free + free_pred * meas_free) / normalizer;
    clamp_masses(free, occ)
}

/// New-born share of the updated occupied mass.
pub fn separate_newborn_part(occ_pred: f64, occ_up: f64, pb: f64) -> f64 {
    let denominator = occ_pred + pb * (1.0 - occ_pred);
    if denominator <= 0.0 {
        return occ_up;
    }
    (occ_up * pb * (1.0 - occ_pred) / denominator).clamp(0.0, occ_up)
}

/// Mixture factor applied to the weight of associated particles.
pub fn association_factor(meas: &MeasurementCell) -> f64 {
    meas.p_A * clamp_non_negative(meas.likelihood) + (1.0 - meas.p_A)
}

/// Set the `associated` flag of every particle from its cell's measurement.
pub fn mark_associations(particles: &mut [Particle], meas_cells: &[MeasurementCell]) {
    particles.par_iter_mut().for_each(|particle| {
        particle.associated = match particle.grid_cell_idx {
            Some(idx) => meas_cells[idx].occ_mass > 0.0,
            None => false,
        };
    });
}

/// Update every cell's masses, weight subtotals and reweighting factors.
///
/// `born_masses` receives each cell's new-born occupied mass.
pub fn update_occupancy(
    cells: &mut [GridCell],
    meas_cells: &[MeasurementCell],
    particles: &[Particle],
    born_masses: &mut [f64],
    ps: f64,
    pb: f64,
) {
    cells
        .par_iter_mut()
        .zip(meas_cells.par_iter())
        .zip(born_masses.par_iter_mut())
        .for_each(|((cell, meas), born_mass)| {
            update_cell(cell, meas, &particles[cell.start_idx..cell.end_idx], ps, pb);
            *born_mass = cell.new_born_occ_mass;
        });
}

fn update_cell(
    cell: &mut GridCell,
    meas: &MeasurementCell,
    particles: &[Particle],
    ps: f64,
    pb: f64,
) {
    let (mut w_a, mut w_ua) = (0.0, 0.0);
    for particle in particles {
        if particle.associated {
            w_a += particle.weight;
        } else {
            w_ua += particle.weight;
        }
    }
    let weight_sum = w_a + w_ua;

    let occ_pred = weight_sum.min(1.0);
    let free_pred = predict_free_mass(cell.free_mass, occ_pred, ps);
    let (free_up, occ_up) = combine_masses(free_pred, occ_pred, meas.free_mass, meas.occ_mass);

    let new_born = if weight_sum > 0.0 {
        separate_newborn_part(occ_pred, occ_up, pb)
    } else {
        occ_up
    };
    let persistent = occ_up - new_born;

    let factor = association_factor(meas);
    let denominator = factor * w_a + w_ua;
    let (mu_a, mu_ua) = if denominator.is_infinite() && w_a > 0.0 {
        // unbounded likelihood: the associated particles take all persistent mass
        (persistent / w_a, 0.0)
    } else if denominator > 0.0 && denominator.is_finite() {
        (persistent * factor / denominator, persistent / denominator)
    } else if weight_sum > 0.0 {
        (persistent / weight_sum, persistent / weight_sum)
    } else {
        (0.0, 0.0)
    };

    cell.free_mass = free_up;
    cell.occ_mass = occ_up;
    cell.new_born_occ_mass = new_born;
    cell.pers_occ_mass = persistent;
    cell.w_A = w_a;
    cell.w_UA = w_ua;
    cell.mu_A = mu_a;
    cell.mu_UA = mu_ua;
}

/// Rescale persistent particle weights so each cell's weight sums to its persistent mass.
///
/// `weights` mirrors the new particle weights for the moment and resampling stages.
pub fn reweight_persistent_particles(
    particles: &mut [Particle],
    cells: &[GridCell],
    weights: &mut [f64],
) {
    particles
        .par_iter_mut()
        .zip(weights.par_iter_mut())
        .for_each(|(particle, weight)| {
            particle.weight = match particle.grid_cell_idx {
                Some(idx) => {
                    let cell = &cells[idx];
                    let mu = if particle.associated { cell.mu_A } else { cell.mu_UA };
                    clamp_non_negative(particle.weight * mu)
                }
                None => 0.0,
            };
            *weight = particle.weight;
        });
}
