use super::bc::PeriodicBox;
use super::cells::CellGrid;
use super::comm::{CommError, Communicator, all_gather};
use crate::core::models::ids::{ParticleId, ParticleKey};
use crate::core::models::particle::Particle;
use nalgebra::{Point3, Vector3};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, instrument, trace};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PartitionError {
    #[error("Particle {0} is present more than once on this rank")]
    DuplicateId(ParticleId),
    #[error("Particle {0} is not present on this rank")]
    UnknownParticle(ParticleId),
    #[error("Halo width must be non-negative and finite, got {0}")]
    InvalidHalo(f64),
    #[error("Communication failed: {0}")]
    Comm(#[from] CommError),
}

/// Id-level molecular grouping the domain needs to keep molecules together
/// when particles migrate between ranks.
pub trait MoleculeIndex {
    /// Coarse-grained representative of an atomistic particle, if it has one.
    fn representative_of(&self, member: ParticleId) -> Option<ParticleId>;
}

#[derive(Debug, Clone, Copy)]
struct GhostState {
    id: ParticleId,
    position: Point3<f64>,
    velocity: Vector3<f64>,
}

#[derive(Debug, Clone, Copy)]
struct ForceReturn {
    id: ParticleId,
    force: Vector3<f64>,
    drift: f64,
}

/// One rank's share of the periodic box.
///
/// The box is split into slabs along x, one per rank. The domain owns every
/// particle present on the rank in an arena: the real particles of its slab plus
/// ghost mirrors of foreign particles within `halo` of the slab. Whole molecules
/// migrate together, following their coarse-grained representative.
///
/// Every particle handle handed out stays valid until the next call to
/// [`Domain::decompose`]; [`Domain::epoch`] tells callers when to re-resolve.
#[derive(Debug, Clone)]
pub struct Domain {
    bc: PeriodicBox,
    rank: usize,
    size: usize,
    halo: f64,
    particles: SlotMap<ParticleKey, Particle>,
    by_id: HashMap<ParticleId, ParticleKey>,
    real: Vec<ParticleKey>,
    ghosts: Vec<ParticleKey>,
    ghost_owner: SecondaryMap<ParticleKey, usize>,
    exports: Vec<Vec<ParticleKey>>,
    epoch: u64,
}

impl Domain {
    pub fn new(bc: PeriodicBox, comm: &dyn Communicator, halo: f64) -> Result<Self, PartitionError> {
        if !(halo.is_finite() && halo >= 0.0) {
            return Err(PartitionError::InvalidHalo(halo));
        }
        let size = comm.size().max(1);
        Ok(Self {
            bc,
            rank: comm.rank(),
            size,
            halo,
            particles: SlotMap::with_key(),
            by_id: HashMap::new(),
            real: Vec::new(),
            ghosts: Vec::new(),
            ghost_owner: SecondaryMap::new(),
            exports: vec![Vec::new(); size],
            epoch: 0,
        })
    }

    #[inline]
    pub fn bc(&self) -> &PeriodicBox {
        &self.bc
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn halo(&self) -> f64 {
        self.halo
    }

    /// Changes whenever the particle population, and therefore the set of
    /// valid handles, changes.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    pub fn min_image_vector(&self, to: &Point3<f64>, from: &Point3<f64>) -> Vector3<f64> {
        self.bc.min_image_vector(to, from)
    }

    pub fn insert(&mut self, particle: Particle) -> Result<ParticleKey, PartitionError> {
        let key = self.insert_unchecked(particle, false)?;
        self.real.push(key);
        self.epoch += 1;
        Ok(key)
    }

    #[inline]
    pub fn get(&self, key: ParticleKey) -> Option<&Particle> {
        self.particles.get(key)
    }

    #[inline]
    pub fn get_mut(&mut self, key: ParticleKey) -> Option<&mut Particle> {
        self.particles.get_mut(key)
    }

    #[inline]
    pub fn key_of(&self, id: ParticleId) -> Option<ParticleKey> {
        self.by_id.get(&id).copied()
    }

    pub fn by_id(&self, id: ParticleId) -> Option<&Particle> {
        self.key_of(id).and_then(|key| self.particles.get(key))
    }

    #[inline]
    pub fn real_keys(&self) -> &[ParticleKey] {
        &self.real
    }

    #[inline]
    pub fn ghost_keys(&self) -> &[ParticleKey] {
        &self.ghosts
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParticleKey, &Particle)> {
        self.particles.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ParticleKey, &mut Particle)> {
        self.particles.iter_mut()
    }

    pub fn iter_real(&self) -> impl Iterator<Item = (ParticleKey, &Particle)> {
        self.real.iter().filter_map(|&key| self.particles.get(key).map(|p| (key, p)))
    }

    pub fn coarse_keys(&self) -> Vec<ParticleKey> {
        self.particles
            .iter()
            .filter(|(_, p)| p.is_coarse_grained())
            .map(|(key, _)| key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Slab `[lo, hi)` along x owned by `rank`.
    pub fn slab_bounds(&self, rank: usize) -> (f64, f64) {
        let width = self.bc.lengths().x / self.size as f64;
        (rank as f64 * width, (rank + 1) as f64 * width)
    }

    fn owner_of_x(&self, x: f64) -> usize {
        let width = self.bc.lengths().x / self.size as f64;
        let folded = self.bc.fold_coordinate(x, 0);
        ((folded / width) as usize).min(self.size - 1)
    }

    fn distance_to_slab(&self, x: f64, rank: usize) -> f64 {
        let (lo, hi) = self.slab_bounds(rank);
        let folded = self.bc.fold_coordinate(x, 0);
        if (lo..hi).contains(&folded) {
            return 0.0;
        }
        let to_lo = self.bc.min_image(Vector3::new(folded - lo, 0.0, 0.0)).x.abs();
        let to_hi = self.bc.min_image(Vector3::new(folded - hi, 0.0, 0.0)).x.abs();
        to_lo.min(to_hi)
    }

    /// x coordinate deciding where a real particle lives: its own for
    /// coarse-grained particles, its representative's for constituents.
    fn anchor_x(&self, particle: &Particle, molecules: &dyn MoleculeIndex) -> f64 {
        if particle.is_coarse_grained() {
            return particle.position.x;
        }
        molecules
            .representative_of(particle.id)
            .and_then(|cg| self.by_id(cg))
            .filter(|cg| !cg.ghost)
            .map_or(particle.position.x, |cg| cg.position.x)
    }

    fn insert_unchecked(&mut self, particle: Particle, ghost: bool) -> Result<ParticleKey, PartitionError> {
        let id = particle.id;
        if self.by_id.contains_key(&id) {
            return Err(PartitionError::DuplicateId(id));
        }
        let mut particle = particle;
        particle.ghost = ghost;
        let key = self.particles.insert(particle);
        self.by_id.insert(id, key);
        Ok(key)
    }

    /// Redistributes real particles to the ranks owning their molecules and
    /// rebuilds the ghost layer. Collective.
    ///
    /// All previously issued handles become invalid.
    #[instrument(skip_all, name = "domain_decompose")]
    pub fn decompose(
        &mut self,
        comm: &dyn Communicator,
        molecules: &dyn MoleculeIndex,
    ) -> Result<(), PartitionError> {
        let mut outbox: Vec<Vec<Particle>> = vec![Vec::new(); self.size];
        for (_, particle) in self.iter_real() {
            let destination = self.owner_of_x(self.anchor_x(particle, molecules));
            let mut moved = particle.clone();
            moved.position = self.bc.wrap(&moved.position);
            outbox[destination].push(moved);
        }

        let mut incoming: Vec<Particle> = all_gather(comm, outbox)?
            .into_iter()
            .flat_map(|boxes| boxes.into_iter().nth(self.rank).unwrap_or_default())
            .collect();
        incoming.sort_unstable_by_key(|p| p.id);

        self.particles.clear();
        self.by_id.clear();
        self.real.clear();
        self.ghosts.clear();
        self.ghost_owner.clear();
        for particle in incoming {
            let key = self.insert_unchecked(particle, false)?;
            self.real.push(key);
        }

        self.exports = vec![Vec::new(); self.size];
        let mut ghost_outbox: Vec<Vec<Particle>> = vec![Vec::new(); self.size];
        if self.size > 1 {
            for &key in &self.real {
                let particle = &self.particles[key];
                let anchor = self.anchor_x(particle, molecules);
                for destination in (0..self.size).filter(|&r| r != self.rank) {
                    if self.distance_to_slab(anchor, destination) <= self.halo {
                        self.exports[destination].push(key);
                        ghost_outbox[destination].push(particle.as_ghost());
                    }
                }
            }
        }

        let gathered = all_gather(comm, ghost_outbox)?;
        for (source, boxes) in gathered.into_iter().enumerate() {
            if source == self.rank {
                continue;
            }
            for ghost in boxes.into_iter().nth(self.rank).unwrap_or_default() {
                let key = self.insert_unchecked(ghost, true)?;
                self.ghosts.push(key);
                self.ghost_owner.insert(key, source);
            }
        }

        self.epoch += 1;
        debug!(
            rank = self.rank,
            real = self.real.len(),
            ghosts = self.ghosts.len(),
            epoch = self.epoch,
            "Domain decomposed."
        );
        Ok(())
    }

    pub fn update_ghosts(&mut self, comm: &dyn Communicator) -> Result<(), PartitionError> {
        let outbox: Vec<Vec<GhostState>> = self
            .exports
            .iter()
            .map(|keys| {
                keys.iter()
                    .filter_map(|&key| self.particles.get(key))
                    .map(|p| GhostState {
                        id: p.id,
                        position: p.position,
                        velocity: p.velocity,
                    })
                    .collect()
            })
            .collect();

        for (source, boxes) in all_gather(comm, outbox)?.into_iter().enumerate() {
            if source == self.rank {
                continue;
            }
            for state in boxes.into_iter().nth(self.rank).unwrap_or_default() {
                let ghost = self
                    .key_of(state.id)
                    .and_then(|key| self.particles.get_mut(key))
                    .filter(|p| p.ghost)
                    .ok_or(PartitionError::UnknownParticle(state.id))?;
                ghost.position = state.position;
                ghost.velocity = state.velocity;
            }
        }
        trace!(rank = self.rank, "Ghosts updated.");
        Ok(())
    }

    /// Sends forces and drift accumulated on ghosts back to their owners and
    /// adds them there. Ghost accumulators are cleared. Collective.
    pub fn collect_ghost_forces(&mut self, comm: &dyn Communicator) -> Result<(), PartitionError> {
        let mut outbox: Vec<Vec<ForceReturn>> = vec![Vec::new(); self.size];
        for &key in &self.ghosts {
            let (Some(particle), Some(&owner)) = (self.particles.get_mut(key), self.ghost_owner.get(key))
            else {
                continue;
            };
            if particle.force != Vector3::zeros() || particle.drift != 0.0 {
                outbox[owner].push(ForceReturn {
                    id: particle.id,
                    force: particle.force,
                    drift: particle.drift,
                });
            }
            particle.force = Vector3::zeros();
            particle.drift = 0.0;
        }

        for boxes in all_gather(comm, outbox)? {
            for returned in boxes.into_iter().nth(self.rank).unwrap_or_default() {
                let owner = self
                    .key_of(returned.id)
                    .and_then(|key| self.particles.get_mut(key))
                    .filter(|p| !p.ghost)
                    .ok_or(PartitionError::UnknownParticle(returned.id))?;
                owner.force += returned.force;
                owner.drift += returned.drift;
            }
        }
        Ok(())
    }

    /// Candidate coarse-grained pairs within `range`, taken from a cell grid
    /// over the whole box.
    ///
    /// Real–real pairs are always kept. A real–ghost pair is kept only when the
    /// real particle has the lower id, so that exactly one rank owns it.
    /// Ghost–ghost pairs are never kept.
    pub fn coarse_pair_candidates(&self, range: f64) -> Vec<(ParticleKey, ParticleKey)> {
        let mut grid = CellGrid::new(&self.bc, range);
        for (key, particle) in self.particles.iter().filter(|(_, p)| p.is_coarse_grained()) {
            grid.insert(key, &particle.position, &self.bc);
        }
        grid.candidate_pairs()
            .into_iter()
            .filter(|&(a, b)| self.owns_pair(a, b))
            .collect()
    }

    fn owns_pair(&self, a: ParticleKey, b: ParticleKey) -> bool {
        let (Some(pa), Some(pb)) = (self.particles.get(a), self.particles.get(b)) else {
            return false;
        };
        match (pa.ghost, pb.ghost) {
            (false, false) => true,
            (true, true) => false,
            (false, true) => pa.id < pb.id,
            (true, false) => pb.id < pa.id,
        }
    }
}
