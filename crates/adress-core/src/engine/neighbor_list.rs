use super::config::{AdressConfig, ConfigError};
use crate::core::adress::region::RegionGeometry;
use crate::core::adress::weight::{WeightFunction, Zone};
use crate::core::models::ids::{ParticleId, ParticleKey};
use crate::core::partition::comm::{CommError, Communicator, all_reduce_count, all_reduce_max};
use crate::core::partition::domain::Domain;
use nalgebra::Point3;
use slotmap::SecondaryMap;
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

pub type Pair = (ParticleKey, ParticleKey);

/// Coarse-grained particles split by resolution zone at the last build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneSets {
    pub coarse: Vec<ParticleKey>,
    pub hybrid: Vec<ParticleKey>,
    pub atomistic: Vec<ParticleKey>,
}

impl ZoneSets {
    pub fn len(&self) -> usize {
        self.coarse.len() + self.hybrid.len() + self.atomistic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self) {
        self.coarse.clear();
        self.hybrid.clear();
        self.atomistic.clear();
    }

    fn push(&mut self, zone: Zone, key: ParticleKey) {
        match zone {
            Zone::Coarse => self.coarse.push(key),
            Zone::Hybrid => self.hybrid.push(key),
            Zone::Atomistic => self.atomistic.push(key),
        }
    }
}

/// Verlet list of coarse-grained pairs, split by whether a pair can be
/// handled purely at the coarse level.
///
/// A pair lands in the coarse list only when both particles were fully coarse
/// (`lambda == 0`) at build time; every other pair goes to the adaptive list
/// and is evaluated with its constituents.
#[derive(Debug, Clone)]
pub struct AdressNeighborList {
    cutoff: f64,
    skin: f64,
    geometry: RegionGeometry,
    weight: WeightFunction,
    exclusions: HashSet<(ParticleId, ParticleId)>,
    zones: ZoneSets,
    zone_of: SecondaryMap<ParticleKey, Zone>,
    cg_pairs: Vec<Pair>,
    adr_pairs: Vec<Pair>,
    reference: HashMap<ParticleId, Point3<f64>>,
    built_epoch: Option<u64>,
    rebuilds: usize,
}

impl AdressNeighborList {
    pub fn new(config: &AdressConfig) -> Self {
        Self {
            cutoff: config.cutoff,
            skin: config.skin,
            geometry: config.geometry,
            weight: config.weight,
            exclusions: HashSet::new(),
            zones: ZoneSets::default(),
            zone_of: SecondaryMap::new(),
            cg_pairs: Vec::new(),
            adr_pairs: Vec::new(),
            reference: HashMap::new(),
            built_epoch: None,
            rebuilds: 0,
        }
    }

    #[inline]
    fn exclusion_key(a: ParticleId, b: ParticleId) -> (ParticleId, ParticleId) {
        if a <= b { (a, b) } else { (b, a) }
    }

    pub fn exclude(&mut self, a: ParticleId, b: ParticleId) {
        self.exclusions.insert(Self::exclusion_key(a, b));
    }

    pub fn is_excluded(&self, a: ParticleId, b: ParticleId) -> bool {
        self.exclusions.contains(&Self::exclusion_key(a, b))
    }

    #[inline]
    pub fn range(&self) -> f64 {
        self.cutoff + self.skin
    }

    /// Whether any real particle on any rank has moved more than half the skin
    /// since the last build. Collective.
    pub fn needs_rebuild(&self, domain: &Domain, comm: &dyn Communicator) -> Result<bool, CommError> {
        let local = if self.built_epoch != Some(domain.epoch()) {
            f64::INFINITY
        } else {
            domain
                .iter_real()
                .map(|(_, p)| match self.reference.get(&p.id) {
                    Some(reference) => domain.min_image_vector(&p.position, reference).norm_squared(),
                    None => f64::INFINITY,
                })
                .fold(0.0, f64::max)
        };
        let global = all_reduce_max(comm, local)?;
        let half_skin = 0.5 * self.skin;
        Ok(global > half_skin * half_skin)
    }

    /// Classifies every coarse-grained particle into a zone and rebuilds both
    /// pair lists from the domain's cell grid.
    ///
    /// `markers` are the current region centers; at least one is required.
    #[instrument(skip_all, name = "neighbor_list_build")]
    pub fn build(&mut self, domain: &Domain, markers: &[Point3<f64>]) -> Result<(), ConfigError> {
        if markers.is_empty() {
            return Err(ConfigError::EmptyMarkerSet);
        }

        self.zones.clear();
        self.zone_of.clear();
        for key in domain.coarse_keys() {
            let Some(particle) = domain.get(key) else {
                continue;
            };
            let zone = self
                .geometry
                .nearest(domain.bc(), &particle.position, markers)
                .map_or(Zone::Coarse, |nearest| self.weight.zone(nearest.dist_sq));
            self.zones.push(zone, key);
            self.zone_of.insert(key, zone);
        }

        let range_sq = self.range() * self.range();
        self.cg_pairs.clear();
        self.adr_pairs.clear();
        for (a, b) in domain.coarse_pair_candidates(self.range()) {
            let (Some(pa), Some(pb)) = (domain.get(a), domain.get(b)) else {
                continue;
            };
            if self.is_excluded(pa.id, pb.id) {
                continue;
            }
            if domain.min_image_vector(&pa.position, &pb.position).norm_squared() > range_sq {
                continue;
            }
            let both_coarse = self.zone_of.get(a) == Some(&Zone::Coarse)
                && self.zone_of.get(b) == Some(&Zone::Coarse);
            if both_coarse {
                self.cg_pairs.push((a, b));
            } else {
                self.adr_pairs.push((a, b));
            }
        }

        self.reference = domain.iter_real().map(|(_, p)| (p.id, p.position)).collect();
        self.built_epoch = Some(domain.epoch());
        self.rebuilds += 1;
        debug!(
            coarse = self.zones.coarse.len(),
            hybrid = self.zones.hybrid.len(),
            atomistic = self.zones.atomistic.len(),
            cg_pairs = self.cg_pairs.len(),
            adr_pairs = self.adr_pairs.len(),
            "Neighbor list rebuilt."
        );
        Ok(())
    }

    #[inline]
    pub fn zones(&self) -> &ZoneSets {
        &self.zones
    }

    #[inline]
    pub fn zone(&self, key: ParticleKey) -> Option<Zone> {
        self.zone_of.get(key).copied()
    }

    #[inline]
    pub fn cg_pairs(&self) -> &[Pair] {
        &self.cg_pairs
    }

    #[inline]
    pub fn adr_pairs(&self) -> &[Pair] {
        &self.adr_pairs
    }

    pub fn total_pair_count(&self, comm: &dyn Communicator) -> Result<usize, CommError> {
        all_reduce_count(comm, self.cg_pairs.len() + self.adr_pairs.len())
    }

    #[inline]
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::particle::{Particle, ParticleKind};
    use crate::core::partition::bc::PeriodicBox;
    use crate::core::partition::comm::SerialComm;
    use crate::engine::config::AdressConfigBuilder;

    fn config() -> AdressConfig {
        AdressConfigBuilder::new()
            .cutoff(1.0)
            .skin(0.2)
            .r_ex(1.0)
            .r_hy(0.5)
            .center(Point3::new(5.0, 5.0, 5.0))
            .build()
            .unwrap()
    }

    fn domain_with_cg_at(xs: &[f64]) -> Domain {
        let bc = PeriodicBox::cubic(10.0).unwrap();
        let mut domain = Domain::new(bc, &SerialComm, 1.2).unwrap();
        for (i, &x) in xs.iter().enumerate() {
            domain
                .insert(Particle::new(
                    ParticleId(i as u64),
                    ParticleKind::CoarseGrained,
                    Point3::new(x, 5.0, 5.0),
                    1.0,
                ))
                .unwrap();
        }
        domain
    }

    fn center() -> [Point3<f64>; 1] {
        [Point3::new(5.0, 5.0, 5.0)]
    }

    #[test]
    fn zones_partition_all_coarse_grained_particles() {
        let domain = domain_with_cg_at(&[5.2, 6.25, 7.0, 1.0, 2.9]);
        let mut nl = AdressNeighborList::new(&config());
        nl.build(&domain, &center()).unwrap();

        let zones = nl.zones();
        assert_eq!(zones.len(), 5);
        let all: HashSet<_> = zones
            .coarse
            .iter()
            .chain(&zones.hybrid)
            .chain(&zones.atomistic)
            .collect();
        assert_eq!(all.len(), 5);
        assert_eq!(zones.atomistic.len(), 1);
        assert_eq!(zones.hybrid.len(), 1);
        assert_eq!(zones.coarse.len(), 3);
    }

    #[test]
    fn pairs_are_coarse_only_when_both_ends_are_coarse() {
        // 0: atomistic, 1: hybrid, 2 and 3: coarse.
        let domain = domain_with_cg_at(&[5.5, 6.2, 7.1, 8.0]);
        let mut nl = AdressNeighborList::new(&config());
        nl.build(&domain, &center()).unwrap();

        let id = |key: ParticleKey| domain.get(key).unwrap().id.0;
        let sorted = |pairs: &[Pair]| {
            let mut ids: Vec<(u64, u64)> = pairs
                .iter()
                .map(|&(a, b)| (id(a).min(id(b)), id(a).max(id(b))))
                .collect();
            ids.sort_unstable();
            ids
        };
        assert_eq!(sorted(nl.cg_pairs()), vec![(2, 3)]);
        assert_eq!(sorted(nl.adr_pairs()), vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn excluded_pairs_never_appear() {
        let domain = domain_with_cg_at(&[7.0, 7.5]);
        let mut nl = AdressNeighborList::new(&config());
        nl.exclude(ParticleId(1), ParticleId(0));
        nl.build(&domain, &center()).unwrap();
        assert!(nl.cg_pairs().is_empty());
        assert!(nl.adr_pairs().is_empty());
        assert_eq!(nl.total_pair_count(&SerialComm).unwrap(), 0);
    }

    #[test]
    fn build_without_markers_is_rejected() {
        let domain = domain_with_cg_at(&[1.0]);
        let mut nl = AdressNeighborList::new(&config());
        assert_eq!(nl.build(&domain, &[]), Err(ConfigError::EmptyMarkerSet));
    }

    #[test]
    fn rebuild_is_triggered_by_half_skin_displacement() {
        let mut domain = domain_with_cg_at(&[7.0, 8.0]);
        let mut nl = AdressNeighborList::new(&config());
        assert!(nl.needs_rebuild(&domain, &SerialComm).unwrap());

        nl.build(&domain, &center()).unwrap();
        assert_eq!(nl.rebuild_count(), 1);
        assert!(!nl.needs_rebuild(&domain, &SerialComm).unwrap());

        let key = domain.key_of(ParticleId(0)).unwrap();
        domain.get_mut(key).unwrap().position.x += 0.09;
        assert!(!nl.needs_rebuild(&domain, &SerialComm).unwrap());
        domain.get_mut(key).unwrap().position.x += 0.02;
        assert!(nl.needs_rebuild(&domain, &SerialComm).unwrap());
    }

    #[test]
    fn new_particles_force_a_rebuild() {
        let mut domain = domain_with_cg_at(&[7.0]);
        let mut nl = AdressNeighborList::new(&config());
        nl.build(&domain, &center()).unwrap();
        domain
            .insert(Particle::new(
                ParticleId(99),
                ParticleKind::CoarseGrained,
                Point3::new(2.0, 2.0, 2.0),
                1.0,
            ))
            .unwrap();
        assert!(nl.needs_rebuild(&domain, &SerialComm).unwrap());
    }
}
