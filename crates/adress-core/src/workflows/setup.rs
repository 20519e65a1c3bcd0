use crate::core::adress::tuples::TupleMap;
use crate::core::models::ids::ParticleId;
use crate::core::models::particle::{Particle, ParticleKind};
use crate::core::partition::bc::{BoxError, PeriodicBox};
use crate::engine::config::{ConfigError, LatticeConfig};
use crate::engine::error::EngineError;
use itertools::iproduct;
use nalgebra::{Point3, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, info};

/// A complete, not yet decomposed system: every particle plus the molecular
/// grouping.
#[derive(Debug, Clone)]
pub struct LatticeSystem {
    pub bc: PeriodicBox,
    pub particles: Vec<Particle>,
    pub tuples: TupleMap,
}

impl LatticeSystem {
    pub fn molecule_count(&self) -> usize {
        self.tuples.len()
    }
}

/// Places one molecule per lattice site of a cubic box and draws
/// Maxwell–Boltzmann velocities (reduced units, `k_B = 1`) with zero total
/// momentum.
///
/// Molecule `m` with `n` atoms uses ids `m (n + 1)` for its coarse-grained
/// bead followed by its atoms.
pub fn build_lattice(config: &LatticeConfig) -> Result<LatticeSystem, EngineError> {
    let per_side = config.molecules_per_side;
    if per_side == 0 {
        return Err(ConfigError::InvalidParameter {
            name: "molecules_per_side",
            reason: "must be at least 1".to_string(),
        }
        .into());
    }
    let bc = PeriodicBox::cubic(per_side as f64 * config.spacing).map_err(|e: BoxError| {
        ConfigError::InvalidParameter {
            name: "spacing",
            reason: e.to_string(),
        }
    })?;
    if !(config.temperature.is_finite() && config.temperature >= 0.0) {
        return Err(ConfigError::InvalidParameter {
            name: "temperature",
            reason: format!("must be non-negative, got {}", config.temperature),
        }
        .into());
    }

    let template = &config.template;
    if template.atoms.is_empty() {
        return Err(ConfigError::InvalidParameter {
            name: "template",
            reason: "a molecule needs at least one atom".to_string(),
        }
        .into());
    }
    let stride = template.atoms.len() as u64 + 1;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut atoms: Vec<Particle> = Vec::with_capacity(per_side.pow(3) * template.atoms.len());
    let mut tuples = TupleMap::new();

    for (index, (i, j, k)) in iproduct!(0..per_side, 0..per_side, 0..per_side).enumerate() {
        let origin = Point3::new(
            (i as f64 + 0.5) * config.spacing,
            (j as f64 + 0.5) * config.spacing,
            (k as f64 + 0.5) * config.spacing,
        );
        let cg_id = ParticleId(index as u64 * stride);
        let mut builder = tuples.begin(cg_id)?;
        for (offset, atom) in template.atoms.iter().enumerate() {
            let id = ParticleId(cg_id.0 + 1 + offset as u64);
            let sigma = (config.temperature / atom.mass).sqrt();
            let normal = Normal::new(0.0, sigma).map_err(|e| ConfigError::InvalidParameter {
                name: "template",
                reason: e.to_string(),
            })?;
            let velocity = Vector3::new(
                normal.sample(&mut rng),
                normal.sample(&mut rng),
                normal.sample(&mut rng),
            );
            atoms.push(
                Particle::new(id, ParticleKind::Atomistic, origin + atom.offset, atom.mass)
                    .with_type(atom.type_id)
                    .with_velocity(velocity),
            );
            builder.push(id);
        }
        builder.commit()?;
    }

    remove_net_momentum(&mut atoms);

    let mut particles = Vec::with_capacity(atoms.len() + tuples.len());
    for ((cg_id, _), group) in tuples.iter().zip(atoms.chunks(template.atoms.len())) {
        let mass: f64 = group.iter().map(|a| a.mass).sum();
        let anchor = group
            .first()
            .map(|a| a.position)
            .ok_or_else(|| EngineError::Internal(format!("molecule {cg_id} has no atoms")))?;
        let position = anchor
            + group
                .iter()
                .map(|a| bc.min_image_vector(&a.position, &anchor) * a.mass)
                .sum::<Vector3<f64>>()
                / mass;
        let velocity = group.iter().map(|a| a.velocity * a.mass).sum::<Vector3<f64>>() / mass;
        particles.push(
            Particle::new(cg_id, ParticleKind::CoarseGrained, position, mass)
                .with_type(template.cg_type)
                .with_velocity(velocity),
        );
    }
    particles.extend(atoms);

    info!(
        molecules = tuples.len(),
        particles = particles.len(),
        box_edge = bc.lengths().x,
        "Built molecular lattice."
    );
    Ok(LatticeSystem {
        bc,
        particles,
        tuples,
    })
}

fn remove_net_momentum(atoms: &mut [Particle]) {
    let total_mass: f64 = atoms.iter().map(|a| a.mass).sum();
    if total_mass <= 0.0 {
        return;
    }
    let momentum: Vector3<f64> = atoms.iter().map(|a| a.velocity * a.mass).sum();
    let drift = momentum / total_mass;
    for atom in atoms.iter_mut() {
        atom.velocity -= drift;
    }
    debug!(removed = drift.norm(), "Removed center-of-mass velocity.");
}
