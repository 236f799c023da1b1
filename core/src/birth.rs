//! New-object birth.
//!
//! Occupied mass that surviving particles cannot explain is handed to freshly spawned particles.
//! The birth budget of `N = new_born_particle_count` slots is split across cells proportionally to
//! their new-born mass through the inclusive scan of `born_masses_array`. When at most `N` cells
//! carry mass, each of them first gets one slot and the remaining `R` slots follow the scan: cell
//! `i` ends at `k_i + round(R·acc[i]/T)`, where `k_i` counts the cells with mass up to `i`. With
//! more such cells than slots the scan is rounded directly (`round(N·acc[i]/T)`) and the smallest
//! contributions may end up without a slot. Every cell that receives slots splits its mass evenly
//! over them, so the spawned weight of a served cell equals its new-born mass.

use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::particle::{Particle, RANDOM_VALUES_PER_PARTICLE};

/// Inclusive prefix sum of the per-cell new-born masses. Returns the total.
pub fn accumulate_birth_orders(born_masses: &[f64], orders_accum: &mut [f64]) -> f64 {
    let mut total = 0.0;
    for (accum, &mass) in orders_accum.iter_mut().zip(born_masses) {
        total += mass.max(0.0);
        *accum = total;
    }
    total
}

/// Fill `rand_array` with the samples consumed by [`spawn_particles`]:
/// two uniform position offsets followed by two standard-normal velocity samples per slot.
pub fn sample_birth_randomness<R: Rng + ?Sized>(rand_array: &mut [f64], rng: &mut R) {
    for chunk in rand_array.chunks_mut(RANDOM_VALUES_PER_PARTICLE) {
        for (i, value) in chunk.iter_mut().enumerate() {
            *value = if i < 2 {
                rng.random::<f64>()
            } else {
                rng.sample(StandardNormal)
            };
        }
    }
}

/// Geometry and prior used to place new particles.
#[derive(Clone, Copy, Debug)]
pub struct BirthModel {
    pub width: usize,
    pub resolution: f64,
    pub velocity_std: f64,
}

fn share_boundary(accum: f64, total: f64, slots: usize) -> usize {
    ((accum / total) * slots as f64).round().min(slots as f64) as usize
}

/// Write the exclusive end of every cell's birth slot range into `slot_ends`.
///
/// Cell `i` owns the slots `slot_ends[i-1]..slot_ends[i]`. Returns the number of cells with
/// positive mass that received no slot, which is only non-zero when they outnumber `slots`.
pub fn assign_birth_slots(
    born_masses: &[f64],
    orders_accum: &[f64],
    total_mass: f64,
    slots: usize,
    slot_ends: &mut [usize],
) -> usize {
    let massive = born_masses.iter().filter(|&&mass| mass > 0.0).count();
    if !(total_mass > 0.0 && total_mass.is_finite()) || slots == 0 {
        slot_ends.fill(0);
        return massive;
    }

    let (floor, shared) = if massive <= slots {
        (1, slots - massive)
    } else {
        (0, slots)
    };
    let mut reserved = 0;
    let mut previous = 0;
    let mut unserved = 0;
    for ((end, &mass), &accum) in slot_ends.iter_mut().zip(born_masses).zip(orders_accum) {
        if mass > 0.0 {
            reserved += floor;
        }
        *end = reserved + share_boundary(accum, total_mass, shared);
        if mass > 0.0 && *end == previous {
            unserved += 1;
        }
        previous = *end;
    }
    unserved
}

/// Spawn new particles into `birth_particles` and mirror their weights into `birth_weights`.
///
/// `slot_ends` comes from [`assign_birth_slots`]. Slots not used by any cell keep zero weight.
/// Returns the number of spawned particles.
pub fn spawn_particles(
    birth_particles: &mut [Particle],
    birth_weights: &mut [f64],
    born_masses: &[f64],
    slot_ends: &[usize],
    rand_array: &[f64],
    model: &BirthModel,
) -> usize {
    let spawned = slot_ends.last().copied().unwrap_or(0).min(birth_particles.len());
    if spawned == 0 {
        birth_particles
            .par_iter_mut()
            .zip(birth_weights.par_iter_mut())
            .for_each(|(particle, weight)| {
                *particle = Particle::default();
                *weight = 0.0;
            });
        return 0;
    }

    birth_particles
        .par_iter_mut()
        .zip(birth_weights.par_iter_mut())
        .zip(rand_array.par_chunks(RANDOM_VALUES_PER_PARTICLE))
        .enumerate()
        .for_each(|(slot, ((particle, weight), random))| {
            // first cell whose slot range ends beyond this slot
            let cell = slot_ends.partition_point(|&end| end <= slot);
            if cell >= born_masses.len() {
                *particle = Particle::default();
                *weight = 0.0;
                return;
            }
            let start = if cell == 0 { 0 } else { slot_ends[cell - 1] };
            let count = slot_ends[cell] - start;

            let ix = (cell % model.width) as f64;
            let iy = (cell / model.width) as f64;
            let offset_x = random[0].min(1.0 - f64::EPSILON);
            let offset_y = random[1].min(1.0 - f64::EPSILON);
            particle.state[0] = (ix + offset_x) * model.resolution;
            particle.state[1] = (iy + offset_y) * model.resolution;
            particle.state[2] = random[2] * model.velocity_std;
            particle.state[3] = random[3] * model.velocity_std;
            particle.grid_cell_idx = Some(cell);
            particle.associated = false;
            particle.weight = born_masses[cell] / count as f64;
            *weight = particle.weight;
        });

    spawned
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn spawn(
        born: &[f64],
        slots: usize,
        width: usize,
    ) -> (Vec<Particle>, Vec<f64>, usize) {
        let mut accum = vec![0.0; born.len()];
        let total = accumulate_birth_orders(born, &mut accum);
        let mut slot_ends = vec![0; born.len()];
        assign_birth_slots(born, &accum, total, slots, &mut slot_ends);
        let mut rand_array = vec![0.0; slots * RANDOM_VALUES_PER_PARTICLE];
        sample_birth_randomness(&mut rand_array, &mut StdRng::seed_from_u64(3));
        let mut particles = vec![Particle::default(); slots];
        let mut weights = vec![0.0; slots];
        let model = BirthModel {
            width,
            resolution: 0.5,
            velocity_std: 2.0,
        };
        let spawned = spawn_particles(
            &mut particles,
            &mut weights,
            born,
            &slot_ends,
            &rand_array,
            &model,
        );
        (particles, weights, spawned)
    }

    #[test]
    fn test_accumulate_birth_orders() {
        let mut accum = vec![0.0; 4];
        let total = accumulate_birth_orders(&[0.5, 0.0, 0.25, -1.0], &mut accum);
        assert_eq!(accum, vec![0.5, 0.5, 0.75, 0.75]);
        assert_eq!(total, 0.75);
    }

    #[test]
    fn test_single_cell_receives_every_slot() {
        let born = [0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let (particles, weights, spawned) = spawn(&born, 9, 3);
        assert_eq!(spawned, 9);
        for (particle, weight) in particles.iter().zip(&weights) {
            assert_eq!(particle.grid_cell_idx, Some(4));
            assert_approx_eq!(particle.weight, 1.0 / 9.0, 1e-12);
            assert_eq!(particle.weight, *weight);
            assert!(!particle.associated);
            assert!(particle.state[0] >= 0.5 && particle.state[0] <= 1.0);
            assert!(particle.state[1] >= 0.5 && particle.state[1] <= 1.0);
        }
    }

    fn per_cell_weights(particles: &[Particle], cells: usize) -> (Vec<f64>, Vec<usize>) {
        let mut per_cell = vec![0.0; cells];
        let mut counts = vec![0usize; cells];
        for particle in particles.iter().filter(|p| p.weight > 0.0) {
            let idx = particle.grid_cell_idx.unwrap();
            per_cell[idx] += particle.weight;
            counts[idx] += 1;
        }
        (per_cell, counts)
    }

    #[test]
    fn test_assign_birth_slots() {
        let born = [0.6, 0.0, 0.3, 0.1];
        let mut accum = vec![0.0; 4];
        let total = accumulate_birth_orders(&born, &mut accum);
        let mut slot_ends = vec![0; 4];
        assert_eq!(assign_birth_slots(&born, &accum, total, 10, &mut slot_ends), 0);
        // one reserved slot each, the other 7 shared as 4.2 / 6.3 / 7
        assert_eq!(slot_ends, vec![5, 5, 8, 10]);
    }

    #[test]
    fn test_spawned_weight_matches_cell_mass() {
        let born = [0.6, 0.0, 0.3, 0.1];
        let (particles, _, spawned) = spawn(&born, 10, 2);
        assert_eq!(spawned, 10);
        let (per_cell, counts) = per_cell_weights(&particles, 4);
        assert_eq!(counts, vec![5, 0, 3, 2]);
        for (sum, mass) in per_cell.iter().zip(&born) {
            assert_approx_eq!(*sum, *mass, 1e-12);
        }
    }

    #[test]
    fn test_small_mass_still_gets_a_slot() {
        let born = [1.0, 0.01];
        let (particles, _, spawned) = spawn(&born, 10, 2);
        assert_eq!(spawned, 10);
        let (per_cell, counts) = per_cell_weights(&particles, 2);
        assert_eq!(counts, vec![9, 1]);
        assert_approx_eq!(per_cell[0], 1.0, 1e-12);
        assert_approx_eq!(per_cell[1], 0.01, 1e-12);
    }

    #[test]
    fn test_more_cells_than_slots_leaves_some_unserved() {
        let born = [0.3, 0.3, 0.2, 0.1, 0.1];
        let mut accum = vec![0.0; 5];
        let total = accumulate_birth_orders(&born, &mut accum);
        let mut slot_ends = vec![0; 5];
        let unserved = assign_birth_slots(&born, &accum, total, 3, &mut slot_ends);
        assert_eq!(unserved, 2);
        assert_eq!(slot_ends, vec![1, 2, 2, 3, 3]);

        let (particles, _, spawned) = spawn(&born, 3, 5);
        assert_eq!(spawned, 3);
        let (per_cell, counts) = per_cell_weights(&particles, 5);
        assert_eq!(counts, vec![1, 1, 0, 1, 0]);
        assert_eq!(counts.iter().filter(|&&c| c == 0).count(), unserved);
        for ((sum, mass), count) in per_cell.iter().zip(&born).zip(&counts) {
            if *count > 0 {
                assert_approx_eq!(*sum, *mass, 1e-12);
            } else {
                assert_eq!(*sum, 0.0);
            }
        }
    }

    #[test]
    fn test_slots_are_ordered_by_cell() {
        let born = [0.2, 0.3, 0.1, 0.4];
        let (particles, _, _) = spawn(&born, 20, 2);
        let indices: Vec<usize> = particles.iter().map(|p| p.grid_cell_idx.unwrap()).collect();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_no_mass_spawns_nothing() {
        let (particles, weights, spawned) = spawn(&[0.0; 4], 5, 2);
        assert_eq!(spawned, 0);
        assert!(particles.iter().all(|p| p.weight == 0.0 && p.grid_cell_idx.is_none()));
        assert!(weights.iter().all(|&w| w == 0.0));
    }

    #[test]
    fn test_velocity_prior_is_zero_mean() {
        let mut born = vec![0.0; 100];
        born[55] = 0.5;
        let (particles, _, _) = spawn(&born, 4000, 10);
        let mean_vx: f64 = particles.iter().map(|p| p.state[2]).sum::<f64>() / 4000.0;
        let mean_vy: f64 = particles.iter().map(|p| p.state[3]).sum::<f64>() / 4000.0;
        assert!(mean_vx.abs() < 0.2);
        assert!(mean_vy.abs() < 0.2);
    }
}
