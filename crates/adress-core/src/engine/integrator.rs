use crate::core::models::particle::ParticleKind;
use crate::core::partition::comm::{CommError, Communicator, all_reduce_count, all_reduce_sum};
use crate::core::partition::domain::Domain;

/// Velocity-Verlet propagation of the real atomistic particles.
///
/// Coarse-grained particles are never integrated; their positions and
/// velocities are derived from their constituents by the synchronizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityVerlet {
    dt: f64,
}

impl VelocityVerlet {
    pub fn new(dt: f64) -> Self {
        Self { dt }
    }

    #[inline]
    pub fn timestep(&self) -> f64 {
        self.dt
    }

    pub fn half_kick(&self, domain: &mut Domain) {
        let half_dt = 0.5 * self.dt;
        for (_, p) in domain.iter_mut() {
            if p.ghost || p.kind != ParticleKind::Atomistic || p.mass <= 0.0 {
                continue;
            }
            p.velocity += p.force * (half_dt / p.mass);
        }
    }

    pub fn advance_positions(&self, domain: &mut Domain) {
        for (_, p) in domain.iter_mut() {
            if p.ghost || p.kind != ParticleKind::Atomistic {
                continue;
            }
            p.position += p.velocity * self.dt;
        }
    }
}

/// Kinetic energy and particle count of the real atomistic particles, summed
/// over all ranks. Collective.
pub fn atomistic_kinetic_energy(
    domain: &Domain,
    comm: &dyn Communicator,
) -> Result<(f64, usize), CommError> {
    let (energy, count) = domain
        .iter_real()
        .filter(|(_, p)| p.kind == ParticleKind::Atomistic)
        .fold((0.0, 0usize), |(e, n), (_, p)| (e + p.kinetic_energy(), n + 1));
    Ok((all_reduce_sum(comm, energy)?, all_reduce_count(comm, count)?))
}
