use super::interaction::LAMBDA_EPSILON;
use crate::core::adress::region::RegionGeometry;
use crate::core::models::ids::ParticleKey;
use crate::core::partition::domain::Domain;
use nalgebra::Point3;
use slotmap::SecondaryMap;
use tracing::trace;

/// Drift-force correction of the energy-conserving blending scheme.
///
/// Over a step, every hybrid particle collects the difference between the
/// atomistic and coarse-grained energy of the pairs it takes part in. The
/// correction `½ ΔE λ' û`, with `û` the unit vector toward the nearest marker,
/// then restores energy conservation across the hybrid shell.
#[derive(Debug, Clone, Default)]
pub struct DriftCorrector {
    geometry: RegionGeometry,
    energy_diff: SecondaryMap<ParticleKey, f64>,
}

impl DriftCorrector {
    pub fn new(geometry: RegionGeometry) -> Self {
        Self {
            geometry,
            energy_diff: SecondaryMap::new(),
        }
    }

    #[inline]
    pub fn is_hybrid(lambda: f64) -> bool {
        lambda > LAMBDA_EPSILON && lambda < 1.0 - LAMBDA_EPSILON
    }

    pub fn begin_step(&mut self) {
        self.energy_diff.clear();
    }

    pub fn accumulate(&mut self, key: ParticleKey, lambda: f64, diff: f64) {
        if !Self::is_hybrid(lambda) {
            return;
        }
        match self.energy_diff.get_mut(key) {
            Some(total) => *total += diff,
            None => {
                self.energy_diff.insert(key, diff);
            }
        }
    }

    pub fn energy_diff(&self, key: ParticleKey) -> f64 {
        self.energy_diff.get(key).copied().unwrap_or(0.0)
    }

    /// Adds the correction force and drift energy to every particle that
    /// accumulated a difference this step. Returns how many were corrected.
    pub fn apply(&self, domain: &mut Domain, markers: &[Point3<f64>]) -> usize {
        let bc = *domain.bc();
        let mut corrected = 0;
        for (key, &diff) in &self.energy_diff {
            let Some(particle) = domain.get_mut(key) else {
                continue;
            };
            let Some(nearest) = self.geometry.nearest(&bc, &particle.position, markers) else {
                continue;
            };
            let half_diff = 0.5 * diff;
            particle.force += nearest.unit_toward() * (half_diff * particle.lambda_deriv);
            particle.drift += half_diff;
            corrected += 1;
        }
        trace!(corrected, "Drift correction applied.");
        corrected
    }
}
