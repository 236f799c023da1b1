//! Systematic resampling over the joint persistent and new-born population.
//!
//! Persistent and birth weights are scanned into inclusive cumulative sums and treated as one
//! logical sequence of total weight `T`. With one uniform offset `u ∈ [0, 1)`, draw `k` selects
//! the particle whose cumulative interval contains `(u + k)·T/N`. The draws are written into the
//! separate output buffer, never into the population being sampled.
//!
//! When `T` is zero or not finite the draw falls back to picking slots uniformly across the whole
//! population, so the output is always fully populated.

use rayon::prelude::*;

use crate::particle::Particle;

/// How the last resampling pass selected its particles.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResampleOutcome {
    /// Proportional to weight, with the joint total weight.
    Weighted { total_weight: f64 },
    /// Uniform over all slots because the joint weight vanished.
    Degenerate,
}

impl ResampleOutcome {
    pub fn is_degenerate(&self) -> bool {
        matches!(self, ResampleOutcome::Degenerate)
    }
}

/// In-place inclusive prefix sum. Returns the total.
pub fn inclusive_scan(values: &mut [f64]) -> f64 {
    let mut total = 0.0;
    for value in values.iter_mut() {
        total += value.max(0.0);
        *value = total;
    }
    total
}

/// Index of the first cumulative entry strictly greater than `position`.
fn select(cumulative: &[f64], position: f64) -> usize {
    cumulative
        .partition_point(|&c| c <= position)
        .min(cumulative.len().saturating_sub(1))
}

/// Draw `output.len()` particles from the persistent and birth populations.
///
/// `persistent_cumulative` and `birth_cumulative` are inclusive scans of the weights of
/// `persistent` and `birth`. `offset` is a uniform sample in `[0, 1)`. Drawn particles keep their
/// state and cell, are unassociated and get weight `1 / output.len()`.
pub fn systematic_resample(
    persistent: &[Particle],
    persistent_cumulative: &[f64],
    birth: &[Particle],
    birth_cumulative: &[f64],
    offset: f64,
    output: &mut [Particle],
) -> ResampleOutcome {
    let draws = output.len();
    if draws == 0 {
        return ResampleOutcome::Degenerate;
    }
    let persistent_total = persistent_cumulative.last().copied().unwrap_or(0.0);
    let birth_total = birth_cumulative.last().copied().unwrap_or(0.0);
    let total = persistent_total + birth_total;
    let new_weight = 1.0 / draws as f64;
    let slots = persistent.len() + birth.len();

    let degenerate = !(total > 0.0 && total.is_finite()) || slots == 0;
    if degenerate {
        if slots == 0 {
            output.par_iter_mut().for_each(|p| {
                *p = Particle {
                    weight: new_weight,
                    ..Particle::default()
                }
            });
            return ResampleOutcome::Degenerate;
        }
        let stride = slots as f64 / draws as f64;
        output.par_iter_mut().enumerate().for_each(|(k, drawn)| {
            let slot = (((k as f64 + offset) * stride) as usize).min(slots - 1);
            let source = if slot < persistent.len() {
                &persistent[slot]
            } else {
                &birth[slot - persistent.len()]
            };
            *drawn = resampled(source, new_weight);
        });
        return ResampleOutcome::Degenerate;
    }

    let stride = total / draws as f64;
    output.par_iter_mut().enumerate().for_each(|(k, drawn)| {
        let position = (k as f64 + offset) * stride;
        let source = if position < persistent_total || birth.is_empty() {
            &persistent[select(persistent_cumulative, position)]
        } else {
            &birth[select(birth_cumulative, position - persistent_total)]
        };
        *drawn = resampled(source, new_weight);
    });
    ResampleOutcome::Weighted {
        total_weight: total,
    }
}

fn resampled(source: &Particle, weight: f64) -> Particle {
    Particle {
        grid_cell_idx: source.grid_cell_idx,
        weight,
        associated: false,
        state: source.state,
    }
}
