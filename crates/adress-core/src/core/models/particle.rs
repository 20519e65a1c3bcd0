use super::ids::ParticleId;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Resolution level a particle lives at.
///
/// Coarse-grained particles are the representatives that take part in neighbor
/// list construction; atomistic particles are the constituents grouped under
/// them by the tuple map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ParticleKind {
    #[default]
    CoarseGrained,
    Atomistic,
}

/// A single simulation particle.
///
/// Particles are owned by the spatial partition. The adaptive-resolution core
/// only ever touches them through [`ParticleKey`](super::ids::ParticleKey)
/// handles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    /// Globally unique identifier.
    pub id: ParticleId,
    /// Resolution level of this particle.
    pub kind: ParticleKind,
    /// Interaction type used to look up pair potentials.
    pub type_id: usize,
    /// Position, not folded into the primary box.
    pub position: Point3<f64>,
    pub velocity: Vector3<f64>,
    /// Force accumulator, cleared at the start of every force evaluation.
    pub force: Vector3<f64>,
    pub mass: f64,
    /// Resolution weight: 0 is fully coarse, 1 is fully atomistic.
    pub lambda: f64,
    /// Derivative of `lambda` with respect to the distance to the nearest marker.
    pub lambda_deriv: f64,
    /// Drift energy of the current force evaluation, energy-conserving scheme only.
    pub drift: f64,
    /// `true` for read-only mirrors of particles owned by another rank.
    pub ghost: bool,
}

impl Particle {
    /// Creates a real, resting particle with zeroed accumulators.
    ///
    /// The resolution weight starts at zero, i.e. fully coarse, until the first
    /// synchronization assigns the real value.
    pub fn new(id: ParticleId, kind: ParticleKind, position: Point3<f64>, mass: f64) -> Self {
        Self {
            id,
            kind,
            type_id: 0,
            position,
            velocity: Vector3::zeros(),
            force: Vector3::zeros(),
            mass,
            lambda: 0.0,
            lambda_deriv: 0.0,
            drift: 0.0,
            ghost: false,
        }
    }

    pub fn with_type(mut self, type_id: usize) -> Self {
        self.type_id = type_id;
        self
    }

    pub fn with_velocity(mut self, velocity: Vector3<f64>) -> Self {
        self.velocity = velocity;
        self
    }

    #[inline]
    pub fn is_coarse_grained(&self) -> bool {
        self.kind == ParticleKind::CoarseGrained
    }

    #[inline]
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.velocity.norm_squared()
    }

    /// Produces the ghost mirror of this particle as seen by another rank.
    ///
    /// Accumulators start empty: whatever a ghost collects is sent back to the
    /// owner and added there.
    pub fn as_ghost(&self) -> Self {
        let mut ghost = self.clone();
        ghost.ghost = true;
        ghost.force = Vector3::zeros();
        ghost.drift = 0.0;
        ghost
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown particle kind '{0}'")]
pub struct ParseParticleKindError(pub String);

impl FromStr for ParticleKind {
    type Err = ParseParticleKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cg" | "coarse" | "coarse-grained" | "coarse_grained" => Ok(ParticleKind::CoarseGrained),
            "at" | "atomistic" | "atom" => Ok(ParticleKind::Atomistic),
            _ => Err(ParseParticleKindError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_particle_starts_real_and_coarse() {
        let p = Particle::new(
            ParticleId(7),
            ParticleKind::CoarseGrained,
            Point3::new(1.0, 2.0, 3.0),
            2.0,
        );

        assert_eq!(p.id, ParticleId(7));
        assert!(!p.ghost);
        assert_eq!(p.lambda, 0.0);
        assert_eq!(p.lambda_deriv, 0.0);
        assert_eq!(p.drift, 0.0);
        assert_eq!(p.force, Vector3::zeros());
        assert!(p.is_coarse_grained());
    }

    #[test]
    fn kinetic_energy_uses_mass_and_speed() {
        let p = Particle::new(ParticleId(1), ParticleKind::Atomistic, Point3::origin(), 2.0)
            .with_velocity(Vector3::new(1.0, 2.0, 2.0));
        assert_eq!(p.kinetic_energy(), 9.0);
    }

    #[test]
    fn ghost_copy_is_flagged_with_empty_accumulators() {
        let mut p = Particle::new(ParticleId(3), ParticleKind::Atomistic, Point3::origin(), 1.0);
        p.force = Vector3::new(1.0, 1.0, 1.0);
        p.drift = 0.75;
        let g = p.as_ghost();
        assert!(g.ghost);
        assert_eq!(g.force, Vector3::zeros());
        assert_eq!(g.drift, 0.0);
        assert_eq!(g.id, p.id);
    }

    #[test]
    fn from_str_parses_kind_aliases() {
        assert_eq!(ParticleKind::from_str("CG"), Ok(ParticleKind::CoarseGrained));
        assert_eq!(ParticleKind::from_str("coarse-grained"), Ok(ParticleKind::CoarseGrained));
        assert_eq!(ParticleKind::from_str("Atomistic"), Ok(ParticleKind::Atomistic));
        assert_eq!(
            ParticleKind::from_str("quantum"),
            Err(ParseParticleKindError("quantum".to_string()))
        );
    }
}
