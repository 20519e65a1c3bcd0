use super::config::{AdressConfig, ConfigError};
use super::error::EngineError;
use crate::core::adress::region::{RegionCenter, RegionGeometry};
use crate::core::adress::tuples::TupleMap;
use crate::core::adress::weight::WeightFunction;
use crate::core::models::ids::{ParticleId, ParticleKey};
use crate::core::partition::comm::{Communicator, all_gather};
use crate::core::partition::domain::Domain;
use nalgebra::{Point3, Vector3};
use std::collections::HashMap;
use tracing::{debug, instrument, trace};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Keeps the coarse-grained representatives consistent with their atoms and
/// their resolution weights consistent with the region.
///
/// The synchronizer owns the snapshot of marker positions. The snapshot is a
/// plain copy gathered from every rank on the `region_updates` cadence; between
/// refreshes the region stays where it was last seen.
#[derive(Debug, Clone)]
pub struct ResolutionSynchronizer {
    geometry: RegionGeometry,
    weight: WeightFunction,
    center: RegionCenter,
    region_updates: usize,
    markers: Vec<Point3<f64>>,
}

impl ResolutionSynchronizer {
    pub fn new(config: &AdressConfig) -> Self {
        let markers = match &config.center {
            RegionCenter::Fixed(point) => vec![*point],
            RegionCenter::Markers(_) => Vec::new(),
        };
        Self {
            geometry: config.geometry,
            weight: config.weight,
            center: config.center.clone(),
            region_updates: config.region_updates,
            markers,
        }
    }

    #[inline]
    pub fn markers(&self) -> &[Point3<f64>] {
        &self.markers
    }

    pub fn marker_ids(&self) -> &[ParticleId] {
        match &self.center {
            RegionCenter::Fixed(_) => &[],
            RegionCenter::Markers(ids) => ids,
        }
    }

    #[inline]
    pub fn is_moving(&self) -> bool {
        self.center.is_moving()
    }

    /// Registers another particle whose position anchors the region. The new
    /// marker enters the snapshot at the next refresh.
    pub fn add_marker(&mut self, id: ParticleId) -> Result<(), ConfigError> {
        match &mut self.center {
            RegionCenter::Fixed(_) => Err(ConfigError::FixedCenterWithMarkers),
            RegionCenter::Markers(ids) => {
                if !ids.contains(&id) {
                    ids.push(id);
                }
                Ok(())
            }
        }
    }

    /// First synchronization of a run: like [`Self::synchronize`], but the
    /// marker snapshot is refreshed regardless of the cadence. Collective.
    pub fn initialize(
        &mut self,
        domain: &mut Domain,
        tuples: &TupleMap,
        comm: &dyn Communicator,
    ) -> Result<(), EngineError> {
        self.update_centers_of_mass(domain, tuples)?;
        if self.is_moving() {
            self.refresh_markers(domain, comm)?;
        }
        self.update_lambdas(domain, tuples)
    }

    #[instrument(skip_all, name = "synchronize", fields(step = step))]
    pub fn synchronize(
        &mut self,
        step: u64,
        domain: &mut Domain,
        tuples: &TupleMap,
        comm: &dyn Communicator,
    ) -> Result<(), EngineError> {
        self.update_centers_of_mass(domain, tuples)?;
        if self.is_moving() && step % self.region_updates as u64 == 0 {
            self.refresh_markers(domain, comm)?;
        }
        self.update_lambdas(domain, tuples)
    }

    pub fn update_centers_of_mass(&self, domain: &mut Domain, tuples: &TupleMap) -> Result<(), EngineError> {
        let keys = domain.coarse_keys();
        let view: &Domain = domain;
        let compute = |&key: &ParticleKey| center_of_mass(view, tuples, key);

        #[cfg(feature = "parallel")]
        let iterator = keys.par_iter();
        #[cfg(not(feature = "parallel"))]
        let iterator = keys.iter();

        let updates: Vec<(ParticleKey, Point3<f64>, Vector3<f64>)> =
            iterator.map(compute).collect::<Result<_, _>>()?;

        for (key, position, velocity) in updates {
            if let Some(cg) = domain.get_mut(key) {
                cg.position = position;
                cg.velocity = velocity;
            }
        }
        Ok(())
    }

    pub fn refresh_markers(&mut self, domain: &Domain, comm: &dyn Communicator) -> Result<(), EngineError> {
        let ids = self.marker_ids();
        if ids.is_empty() {
            return Err(ConfigError::EmptyMarkerSet.into());
        }
        let local: Vec<(ParticleId, Point3<f64>)> = ids
            .iter()
            .filter_map(|&id| domain.by_id(id))
            .filter(|p| !p.ghost)
            .map(|p| (p.id, p.position))
            .collect();

        let found: HashMap<ParticleId, Point3<f64>> = all_gather(comm, local)?.into_iter().flatten().collect();
        let snapshot = ids
            .iter()
            .map(|id| found.get(id).copied().ok_or(EngineError::MarkerNotFound(*id)))
            .collect::<Result<Vec<_>, _>>()?;

        trace!(markers = snapshot.len(), "Marker snapshot refreshed.");
        self.markers = snapshot;
        Ok(())
    }

    pub fn update_lambdas(&self, domain: &mut Domain, tuples: &TupleMap) -> Result<(), EngineError> {
        if self.markers.is_empty() {
            return Err(ConfigError::EmptyMarkerSet.into());
        }
        let bc = *domain.bc();
        let updates: Vec<(ParticleKey, f64, f64)> = domain
            .coarse_keys()
            .into_iter()
            .filter_map(|key| domain.get(key).map(|cg| (key, cg.position)))
            .map(|(key, position)| {
                let (lambda, lambda_deriv) = self
                    .geometry
                    .nearest(&bc, &position, &self.markers)
                    .map_or((0.0, 0.0), |nearest| self.weight.evaluate(nearest.dist_sq));
                (key, lambda, lambda_deriv)
            })
            .collect();

        for (key, lambda, lambda_deriv) in updates {
            if let Some(cg) = domain.get_mut(key) {
                cg.lambda = lambda;
                cg.lambda_deriv = lambda_deriv;
            }
            for &member in tuples.constituents(key).unwrap_or_default() {
                if let Some(atom) = domain.get_mut(member) {
                    atom.lambda = lambda;
                    atom.lambda_deriv = lambda_deriv;
                }
            }
        }
        Ok(())
    }

    /// Splits the force accumulated on each real coarse-grained particle onto its
    /// constituents in proportion to their mass, then clears it.
    pub fn distribute_forces(&self, domain: &mut Domain, tuples: &TupleMap) -> Result<(), EngineError> {
        let real_cg: Vec<ParticleKey> = domain
            .iter_real()
            .filter(|(_, p)| p.is_coarse_grained())
            .map(|(key, _)| key)
            .collect();

        for key in real_cg {
            let Some(cg) = domain.get(key) else {
                continue;
            };
            let force = cg.force;
            let members = lookup_or_fatal(domain, tuples, key)?;
            let total_mass: f64 = members
                .iter()
                .filter_map(|&m| domain.get(m))
                .map(|p| p.mass)
                .sum();
            if total_mass > 0.0 && force != Vector3::zeros() {
                for &member in members {
                    if let Some(atom) = domain.get_mut(member) {
                        atom.force += force * (atom.mass / total_mass);
                    }
                }
            }
            if let Some(cg) = domain.get_mut(key) {
                cg.force = Vector3::zeros();
            }
        }
        debug!("Coarse-grained forces redistributed.");
        Ok(())
    }
}

pub(crate) fn lookup_or_fatal<'a>(
    domain: &Domain,
    tuples: &'a TupleMap,
    key: ParticleKey,
) -> Result<&'a [ParticleKey], EngineError> {
    let particle = domain.get(key).ok_or(EngineError::StaleHandle)?;
    tuples
        .lookup(key, particle)
        .map_err(|_| EngineError::FatalConsistency {
            id: particle.id,
            ghost: particle.ghost,
            position: particle.position,
        })
}

fn center_of_mass(
    domain: &Domain,
    tuples: &TupleMap,
    key: ParticleKey,
) -> Result<(ParticleKey, Point3<f64>, Vector3<f64>), EngineError> {
    let members = lookup_or_fatal(domain, tuples, key)?;
    let mut atoms = members.iter().filter_map(|&m| domain.get(m));
    let first = atoms.next().ok_or(EngineError::StaleHandle)?;
    let anchor = first.position;

    let mut total_mass = first.mass;
    let mut weighted_offset = Vector3::zeros();
    let mut momentum = first.velocity * first.mass;
    for atom in atoms {
        weighted_offset += domain.min_image_vector(&atom.position, &anchor) * atom.mass;
        momentum += atom.velocity * atom.mass;
        total_mass += atom.mass;
    }
    if total_mass <= 0.0 {
        return Err(EngineError::Internal(format!(
            "molecule of particle {} has no mass",
            domain.get(key).map_or(0, |p| p.id.0)
        )));
    }
    Ok((key, anchor + weighted_offset / total_mass, momentum / total_mass))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::particle::{Particle, ParticleKind};
    use crate::core::partition::bc::PeriodicBox;
    use crate::core::partition::comm::SerialComm;
    use crate::engine::config::AdressConfigBuilder;

    fn fixed_config() -> AdressConfig {
        AdressConfigBuilder::new()
            .cutoff(1.0)
            .skin(0.2)
            .r_ex(1.0)
            .r_hy(0.5)
            .center(Point3::new(5.0, 5.0, 5.0))
            .build()
            .unwrap()
    }

    /// One molecule: CG 1 with atoms 10 (mass 1) and 11 (mass 3) straddling the
    /// periodic boundary along x.
    fn molecule() -> (Domain, TupleMap) {
        let bc = PeriodicBox::cubic(10.0).unwrap();
        let mut domain = Domain::new(bc, &SerialComm, 1.0).unwrap();
        domain
            .insert(Particle::new(ParticleId(1), ParticleKind::CoarseGrained, Point3::origin(), 4.0))
            .unwrap();
        domain
            .insert(
                Particle::new(ParticleId(10), ParticleKind::Atomistic, Point3::new(9.8, 5.0, 5.0), 1.0)
                    .with_velocity(Vector3::new(4.0, 0.0, 0.0)),
            )
            .unwrap();
        domain
            .insert(Particle::new(ParticleId(11), ParticleKind::Atomistic, Point3::new(0.2, 5.0, 5.0), 3.0))
            .unwrap();
        let mut tuples = TupleMap::new();
        tuples.insert(ParticleId(1), [ParticleId(10), ParticleId(11)]).unwrap();
        tuples.resolve(&domain).unwrap();
        (domain, tuples)
    }

    #[test]
    fn center_of_mass_unwraps_across_the_boundary() {
        let (mut domain, tuples) = molecule();
        let sync = ResolutionSynchronizer::new(&fixed_config());
        sync.update_centers_of_mass(&mut domain, &tuples).unwrap();

        let cg = domain.by_id(ParticleId(1)).unwrap();
        let folded = domain.bc().wrap(&cg.position);
        assert!((folded.x - 0.1).abs() < 1e-12);
        assert!((cg.velocity.x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn missing_tuple_is_a_fatal_consistency_error() {
        let (mut domain, tuples) = molecule();
        domain
            .insert(Particle::new(
                ParticleId(2),
                ParticleKind::CoarseGrained,
                Point3::new(1.0, 2.0, 3.0),
                1.0,
            ))
            .unwrap();
        let sync = ResolutionSynchronizer::new(&fixed_config());
        let error = sync.update_centers_of_mass(&mut domain, &tuples).unwrap_err();
        match error {
            EngineError::FatalConsistency { id, ghost, position } => {
                assert_eq!(id, ParticleId(2));
                assert!(!ghost);
                assert_eq!(position, Point3::new(1.0, 2.0, 3.0));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn lambdas_follow_the_fixed_center_and_reach_constituents() {
        let (mut domain, tuples) = molecule();
        let mut sync = ResolutionSynchronizer::new(&fixed_config());
        sync.initialize(&mut domain, &tuples, &SerialComm).unwrap();

        // The molecule sits about 5 away from the center: fully coarse.
        assert_eq!(domain.by_id(ParticleId(1)).unwrap().lambda, 0.0);

        for id in [10, 11] {
            let key = domain.key_of(ParticleId(id)).unwrap();
            let atom = domain.get_mut(key).unwrap();
            atom.position = Point3::new(5.5, 5.0, 5.0);
        }
        sync.synchronize(1, &mut domain, &tuples, &SerialComm).unwrap();
        let cg = domain.by_id(ParticleId(1)).unwrap();
        assert_eq!(cg.lambda, 1.0);
        assert_eq!(domain.by_id(ParticleId(10)).unwrap().lambda, 1.0);
    }

    #[test]
    fn moving_region_without_markers_is_rejected() {
        let (mut domain, tuples) = molecule();
        let config = AdressConfigBuilder::new()
            .cutoff(1.0)
            .skin(0.2)
            .r_ex(1.0)
            .r_hy(0.5)
            .build()
            .unwrap();
        let mut sync = ResolutionSynchronizer::new(&config);
        assert!(matches!(
            sync.initialize(&mut domain, &tuples, &SerialComm),
            Err(EngineError::Config {
                source: ConfigError::EmptyMarkerSet
            })
        ));
    }

    #[test]
    fn markers_cannot_be_added_to_a_fixed_region() {
        let mut sync = ResolutionSynchronizer::new(&fixed_config());
        assert_eq!(sync.add_marker(ParticleId(3)), Err(ConfigError::FixedCenterWithMarkers));
    }

    #[test]
    fn marker_snapshot_tracks_marker_particles() {
        let (mut domain, tuples) = molecule();
        let config = AdressConfigBuilder::new()
            .cutoff(1.0)
            .skin(0.2)
            .r_ex(1.0)
            .r_hy(0.5)
            .marker(ParticleId(11))
            .build()
            .unwrap();
        let mut sync = ResolutionSynchronizer::new(&config);
        sync.initialize(&mut domain, &tuples, &SerialComm).unwrap();
        assert_eq!(sync.markers(), &[Point3::new(0.2, 5.0, 5.0)]);
        assert_eq!(domain.by_id(ParticleId(1)).unwrap().lambda, 1.0);

        sync.add_marker(ParticleId(404)).unwrap();
        assert!(matches!(
            sync.synchronize(0, &mut domain, &tuples, &SerialComm),
            Err(EngineError::MarkerNotFound(ParticleId(404)))
        ));
    }

    #[test]
    fn distributed_force_is_split_by_mass() {
        let (mut domain, tuples) = molecule();
        let sync = ResolutionSynchronizer::new(&fixed_config());
        let cg = domain.key_of(ParticleId(1)).unwrap();
        domain.get_mut(cg).unwrap().force = Vector3::new(8.0, 0.0, -4.0);

        sync.distribute_forces(&mut domain, &tuples).unwrap();

        assert_eq!(domain.get(cg).unwrap().force, Vector3::zeros());
        assert_eq!(domain.by_id(ParticleId(10)).unwrap().force, Vector3::new(2.0, 0.0, -1.0));
        assert_eq!(domain.by_id(ParticleId(11)).unwrap().force, Vector3::new(6.0, 0.0, -3.0));
    }
}
