//! Particle state and the constant-velocity prediction step.
//!
//! Every particle is a weighted hypothesis of a small piece of moving occupancy:
//!
//! $$
//! x = [p_x, p_y, v_x, v_y]
//! $$
//!
//! with position in metres in the grid frame and velocity in metres per second. Prediction
//! advances the position by the velocity, perturbs position and velocity with Gaussian process
//! noise, and multiplies the weight by the survival probability `ps`. Particles are never removed
//! here; a particle that "died" simply carries less weight into resampling.

use nalgebra::{Vector2, Vector4};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use std::fmt::{self, Display};

/// Number of random values consumed per particle by prediction and by birth.
pub const RANDOM_VALUES_PER_PARTICLE: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    /// Owning grid cell, or `None` once the particle has left the grid.
    pub grid_cell_idx: Option<usize>,
    pub weight: f64,
    /// Whether the particle's cell carried occupied measurement evidence this cycle.
    pub associated: bool,
    /// `[x, y, vx, vy]`
    pub state: Vector4<f64>,
}

impl Default for Particle {
    fn default() -> Self {
        Particle {
            grid_cell_idx: None,
            weight: 0.0,
            associated: false,
            state: Vector4::zeros(),
        }
    }
}

impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("grid_cell_idx", &self.grid_cell_idx)
            .field("x", &self.state[0])
            .field("y", &self.state[1])
            .field("vx", &self.state[2])
            .field("vy", &self.state[3])
            .field("weight", &self.weight)
            .field("associated", &self.associated)
            .finish()
    }
}

impl Particle {
    pub fn new(state: Vector4<f64>, weight: f64) -> Particle {
        Particle {
            grid_cell_idx: None,
            weight,
            associated: false,
            state,
        }
    }

    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.state[0], self.state[1])
    }

    pub fn velocity(&self) -> Vector2<f64> {
        Vector2::new(self.state[2], self.state[3])
    }

    /// Propagate the particle with the constant-velocity model.
    ///
    /// `noise` holds four standard-normal samples `[n_x, n_y, n_vx, n_vy]` which are scaled by the
    /// position and velocity standard deviations. A zero time step skips the velocity integration
    /// and a zero standard deviation skips the corresponding noise, so `dt = 0` with zero noise
    /// leaves the state bit-for-bit unchanged.
    ///
    /// # Arguments
    ///
    /// * `dt` - Time step in seconds
    /// * `ps` - Survival probability applied to the weight
    /// * `noise_position_std` - Process noise standard deviation on position (m)
    /// * `noise_velocity_std` - Process noise standard deviation on velocity (m/s)
    /// * `noise` - Standard-normal samples for this particle
    pub fn predict(
        &mut self,
        dt: f64,
        ps: f64,
        noise_position_std: f64,
        noise_velocity_std: f64,
        noise: &[f64],
    ) {
        if dt > 0.0 {
            self.state[0] += self.state[2] * dt;
            self.state[1] += self.state[3] * dt;
        }
        if noise_position_std > 0.0 {
            self.state[0] += noise[0] * noise_position_std;
            self.state[1] += noise[1] * noise_position_std;
        }
        if noise_velocity_std > 0.0 {
            self.state[2] += noise[2] * noise_velocity_std;
            self.state[3] += noise[3] * noise_velocity_std;
        }
        self.weight *= ps;
    }
}

/// Fill `rand_array` with standard-normal samples for one prediction pass.
pub fn sample_process_noise<R: Rng + ?Sized>(rand_array: &mut [f64], rng: &mut R) {
    for value in rand_array.iter_mut() {
        *value = rng.sample(StandardNormal);
    }
}

/// Predict every particle in parallel.
///
/// `noise` must hold [`RANDOM_VALUES_PER_PARTICLE`] standard-normal samples per particle.
pub fn predict_particles(
    particles: &mut [Particle],
    noise: &[f64],
    dt: f64,
    ps: f64,
    noise_position_std: f64,
    noise_velocity_std: f64,
) {
    particles
        .par_iter_mut()
        .zip(noise.par_chunks(RANDOM_VALUES_PER_PARTICLE))
        .for_each(|(particle, noise)| {
            particle.predict(dt, ps, noise_position_std, noise_velocity_std, noise)
        });
}

/// Effective sample size `1 / Σ wᵢ²` of normalised weights.
pub fn effective_sample_size(particles: &[Particle]) -> f64 {
    let sum_of_squares: f64 = particles.iter().map(|p| p.weight * p.weight).sum();
    if sum_of_squares > 0.0 {
        1.0 / sum_of_squares
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_particle_creation() {
        let particle = Particle::new(Vector4::new(1.0, 2.0, 3.0, 4.0), 0.25);
        assert_eq!(particle.grid_cell_idx, None);
        assert!(!particle.associated);
        assert_eq!(particle.position(), Vector2::new(1.0, 2.0));
        assert_eq!(particle.velocity(), Vector2::new(3.0, 4.0));
        assert_approx_eq!(particle.weight, 0.25, 1e-12);
    }

    #[test]
    fn test_constant_velocity_without_noise() {
        let mut particle = Particle::new(Vector4::new(1.0, 1.0, 2.0, -1.0), 1.0);
        particle.predict(0.5, 0.9, 0.0, 0.0, &[5.0, 5.0, 5.0, 5.0]);
        assert_approx_eq!(particle.state[0], 2.0, 1e-12);
        assert_approx_eq!(particle.state[1], 0.5, 1e-12);
        assert_approx_eq!(particle.state[2], 2.0, 1e-12);
        assert_approx_eq!(particle.state[3], -1.0, 1e-12);
        assert_approx_eq!(particle.weight, 0.9, 1e-12);
    }

    #[test]
    fn test_zero_dt_zero_noise_is_identity() {
        let state = Vector4::new(-0.0, 3.25, -7.5, 1e-300);
        let mut particle = Particle::new(state, 0.4);
        particle.predict(0.0, 0.5, 0.0, 0.0, &[1.0, -1.0, 2.0, -2.0]);
        for i in 0..4 {
            assert_eq!(particle.state[i].to_bits(), state[i].to_bits());
        }
        assert_eq!(particle.weight, 0.4 * 0.5);
    }

    #[test]
    fn test_noise_scaling() {
        let mut particle = Particle::new(Vector4::zeros(), 1.0);
        particle.predict(1.0, 1.0, 0.5, 2.0, &[1.0, -2.0, 0.5, -0.25]);
        assert_approx_eq!(particle.state[0], 0.5, 1e-12);
        assert_approx_eq!(particle.state[1], -1.0, 1e-12);
        assert_approx_eq!(particle.state[2], 1.0, 1e-12);
        assert_approx_eq!(particle.state[3], -0.5, 1e-12);
    }

    #[test]
    fn test_predict_particles_parallel_matches_serial() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut noise = vec![0.0; 10 * RANDOM_VALUES_PER_PARTICLE];
        sample_process_noise(&mut noise, &mut rng);
        let initial: Vec<Particle> = (0..10)
            .map(|i| Particle::new(Vector4::new(i as f64, 0.0, 1.0, 0.5), 0.1))
            .collect();

        let mut parallel = initial.clone();
        predict_particles(&mut parallel, &noise, 0.1, 0.99, 0.1, 0.2);

        let mut serial = initial;
        for (i, particle) in serial.iter_mut().enumerate() {
            particle.predict(0.1, 0.99, 0.1, 0.2, &noise[4 * i..4 * i + 4]);
        }
        assert_eq!(parallel, serial);
    }

    #[test]
    fn test_effective_sample_size() {
        let uniform: Vec<Particle> = (0..100)
            .map(|_| Particle::new(Vector4::zeros(), 0.01))
            .collect();
        assert_approx_eq!(effective_sample_size(&uniform), 100.0, 1e-9);
        let empty: Vec<Particle> = (0..4).map(|_| Particle::default()).collect();
        assert_eq!(effective_sample_size(&empty), 0.0);
    }
}
