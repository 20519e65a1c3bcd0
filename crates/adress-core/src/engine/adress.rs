use super::config::{AdressConfig, ConfigError};
use super::density::DensityProfile;
use super::drift::DriftCorrector;
use super::error::EngineError;
use super::fec::FreeEnergyCompensation;
use super::integrator::{VelocityVerlet, atomistic_kinetic_energy};
use super::interaction::{ForceReport, InteractionEvaluator};
use super::neighbor_list::{AdressNeighborList, Pair, ZoneSets};
use super::synchronizer::ResolutionSynchronizer;
use crate::core::adress::tuples::TupleMap;
use crate::core::adress::weight::Zone;
use crate::core::forcefield::params::Forcefield;
use crate::core::forcefield::term::EnergyTerm;
use crate::core::models::ids::ParticleId;
use crate::core::partition::comm::{Communicator, all_reduce_count, all_reduce_sum};
use crate::core::partition::domain::Domain;
use nalgebra::{Point3, Vector3};
use tracing::{debug, info, instrument, warn};

/// One rank's view of an adaptive resolution simulation.
///
/// The engine owns the domain and every piece of resolution state, and runs
/// them in a fixed order each step: neighbor list rebuild when needed,
/// synchronization, forces, drift correction, ghost force collection and
/// finally redistribution of coarse-grained forces onto atoms.
///
/// Every method that talks to other ranks is collective: all ranks must call
/// it in the same order.
pub struct AdressEngine {
    config: AdressConfig,
    comm: Box<dyn Communicator>,
    domain: Domain,
    tuples: TupleMap,
    neighbor_list: AdressNeighborList,
    synchronizer: ResolutionSynchronizer,
    drift: DriftCorrector,
    evaluator: InteractionEvaluator,
    fec: Option<FreeEnergyCompensation>,
    step: u64,
    initialized: bool,
    last_report: ForceReport,
}

impl AdressEngine {
    pub fn new(
        config: AdressConfig,
        domain: Domain,
        tuples: TupleMap,
        forcefield: Forcefield,
        comm: Box<dyn Communicator>,
    ) -> Result<Self, EngineError> {
        if comm.size() > 1 && domain.halo() < config.list_range() {
            return Err(ConfigError::InvalidParameter {
                name: "halo",
                reason: format!(
                    "ghost halo {} is narrower than cutoff plus skin {}",
                    domain.halo(),
                    config.list_range()
                ),
            }
            .into());
        }
        Ok(Self {
            neighbor_list: AdressNeighborList::new(&config),
            synchronizer: ResolutionSynchronizer::new(&config),
            drift: DriftCorrector::new(config.geometry),
            evaluator: InteractionEvaluator::new(config.scheme, forcefield),
            fec: None,
            config,
            comm,
            domain,
            tuples,
            step: 0,
            initialized: false,
            last_report: ForceReport::default(),
        })
    }

    pub fn with_fec(mut self, fec: FreeEnergyCompensation) -> Self {
        self.fec = Some(fec);
        self
    }

    #[inline]
    pub fn config(&self) -> &AdressConfig {
        &self.config
    }

    #[inline]
    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }

    #[inline]
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Direct access to the particles, e.g. for setup. Changing the
    /// population invalidates the pair lists until the next [`Self::rebuild`].
    #[inline]
    pub fn domain_mut(&mut self) -> &mut Domain {
        &mut self.domain
    }

    #[inline]
    pub fn tuples(&self) -> &TupleMap {
        &self.tuples
    }

    #[inline]
    pub fn neighbor_list(&self) -> &AdressNeighborList {
        &self.neighbor_list
    }

    #[inline]
    pub fn zones(&self) -> &ZoneSets {
        self.neighbor_list.zones()
    }

    #[inline]
    pub fn cg_pairs(&self) -> &[Pair] {
        self.neighbor_list.cg_pairs()
    }

    #[inline]
    pub fn adr_pairs(&self) -> &[Pair] {
        self.neighbor_list.adr_pairs()
    }

    #[inline]
    pub fn markers(&self) -> &[Point3<f64>] {
        self.synchronizer.markers()
    }

    #[inline]
    pub fn step_count(&self) -> u64 {
        self.step
    }

    #[inline]
    pub fn rebuild_count(&self) -> usize {
        self.neighbor_list.rebuild_count()
    }

    #[inline]
    pub fn last_report(&self) -> ForceReport {
        self.last_report
    }

    pub fn abort(&self) {
        warn!(rank = self.comm.rank(), "Aborting the communicator group.");
        self.comm.abort();
    }

    pub fn add_marker_particle(&mut self, id: ParticleId) -> Result<(), EngineError> {
        self.synchronizer.add_marker(id)?;
        debug!(marker = %id, "Marker particle registered.");
        Ok(())
    }

    pub fn exclude(&mut self, a: ParticleId, b: ParticleId) {
        self.neighbor_list.exclude(a, b);
    }

    /// Real coarse-grained particles per zone `(coarse, hybrid, atomistic)`
    /// over all ranks, as classified at the last rebuild. Collective.
    pub fn zone_counts(&self) -> Result<(usize, usize, usize), EngineError> {
        let mut local = (0, 0, 0);
        for (key, _) in self.domain.iter_real().filter(|(_, p)| p.is_coarse_grained()) {
            match self.neighbor_list.zone(key) {
                Some(Zone::Coarse) => local.0 += 1,
                Some(Zone::Hybrid) => local.1 += 1,
                Some(Zone::Atomistic) => local.2 += 1,
                None => {}
            }
        }
        let comm = self.comm.as_ref();
        Ok((
            all_reduce_count(comm, local.0)?,
            all_reduce_count(comm, local.1)?,
            all_reduce_count(comm, local.2)?,
        ))
    }

    pub fn total_pair_count(&self) -> Result<usize, EngineError> {
        Ok(self.neighbor_list.total_pair_count(self.comm.as_ref())?)
    }

    /// Rebuilds zones and pair lists if any particle moved more than half the
    /// skin since the last build, or the population changed. Otherwise a no-op.
    /// Collective.
    pub fn rebuild(&mut self) -> Result<bool, EngineError> {
        if !self
            .neighbor_list
            .needs_rebuild(&self.domain, self.comm.as_ref())?
        {
            return Ok(false);
        }
        self.force_rebuild()?;
        Ok(true)
    }

    #[instrument(skip_all, name = "adress_rebuild")]
    fn force_rebuild(&mut self) -> Result<(), EngineError> {
        let comm = self.comm.as_ref();
        self.domain.decompose(comm, &self.tuples)?;
        self.tuples.resolve(&self.domain)?;
        if self.initialized {
            self.synchronizer
                .update_centers_of_mass(&mut self.domain, &self.tuples)?;
        } else {
            self.synchronizer
                .initialize(&mut self.domain, &self.tuples, comm)?;
            self.initialized = true;
        }
        self.neighbor_list
            .build(&self.domain, self.synchronizer.markers())?;
        Ok(())
    }

    pub fn synchronize(&mut self) -> Result<(), EngineError> {
        self.tuples.ensure_current(&self.domain)?;
        self.synchronizer.synchronize(
            self.step,
            &mut self.domain,
            &self.tuples,
            self.comm.as_ref(),
        )
    }

    /// Clears and recomputes all forces, including drift and compensation
    /// terms, collects ghost contributions and redistributes coarse-grained
    /// forces onto atoms. Returns the globally reduced report. Collective.
    #[instrument(skip_all, name = "adress_forces")]
    pub fn compute_forces(&mut self) -> Result<ForceReport, EngineError> {
        self.tuples.ensure_current(&self.domain)?;
        for (_, p) in self.domain.iter_mut() {
            p.force = Vector3::zeros();
            p.drift = 0.0;
        }

        self.drift.begin_step();
        let drift = if self.config.scheme.has_drift_term() {
            Some(&mut self.drift)
        } else {
            None
        };
        let mut local = self.evaluator.compute_forces(
            &mut self.domain,
            &self.tuples,
            &self.neighbor_list,
            drift,
        )?;
        if self.config.scheme.has_drift_term() {
            self.drift
                .apply(&mut self.domain, self.synchronizer.markers());
        }
        if let Some(fec) = &self.fec {
            local.energy.compensation += fec.apply(&mut self.domain, self.synchronizer.markers());
        }

        let comm = self.comm.as_ref();
        self.domain.collect_ghost_forces(comm)?;
        self.synchronizer
            .distribute_forces(&mut self.domain, &self.tuples)?;

        let report = local.all_reduce(comm)?;
        self.last_report = report;
        Ok(report)
    }

    pub fn compute_energy(&self) -> Result<EnergyTerm, EngineError> {
        Ok(self.local_energy_report()?.all_reduce(self.comm.as_ref())?.energy)
    }

    pub fn compute_virial(&self) -> Result<f64, EngineError> {
        Ok(self.local_energy_report()?.all_reduce(self.comm.as_ref())?.virial)
    }

    fn local_energy_report(&self) -> Result<ForceReport, EngineError> {
        self.tuples.ensure_current(&self.domain)?;
        let mut report = self
            .evaluator
            .compute_energy(&self.domain, &self.tuples, &self.neighbor_list)?;
        if let Some(fec) = &self.fec {
            report.energy.compensation += fec.energy(&self.domain);
        }
        Ok(report)
    }

    pub fn kinetic_energy(&self) -> Result<(f64, usize), EngineError> {
        Ok(atomistic_kinetic_energy(&self.domain, self.comm.as_ref())?)
    }

    pub fn drift_energy(&self) -> Result<f64, EngineError> {
        let local: f64 = self
            .domain
            .iter_real()
            .filter(|(_, p)| p.is_coarse_grained())
            .map(|(_, p)| p.drift)
            .sum();
        Ok(all_reduce_sum(self.comm.as_ref(), local)?)
    }

    pub fn sample_density(&self, profile: &mut DensityProfile) -> Result<(), EngineError> {
        profile.sample(&self.domain, self.synchronizer.markers(), self.comm.as_ref())?;
        Ok(())
    }

    pub fn prepare(&mut self) -> Result<ForceReport, EngineError> {
        self.force_rebuild()?;
        self.synchronize()?;
        let report = self.compute_forces()?;
        info!(
            rank = self.comm.rank(),
            real = self.domain.real_keys().len(),
            ghosts = self.domain.ghost_keys().len(),
            "Engine prepared."
        );
        Ok(report)
    }

    pub fn step(&mut self, integrator: &VelocityVerlet) -> Result<ForceReport, EngineError> {
        if !self.initialized {
            return Err(EngineError::Internal(
                "engine must be prepared before stepping".to_string(),
            ));
        }
        integrator.half_kick(&mut self.domain);
        integrator.advance_positions(&mut self.domain);
        self.domain.update_ghosts(self.comm.as_ref())?;

        self.rebuild()?;

        self.step += 1;
        self.synchronize()?;
        let report = self.compute_forces()?;
        integrator.half_kick(&mut self.domain);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::forcefield::params::{PairPotential, PairTable};
    use crate::core::models::particle::{Particle, ParticleKind};
    use crate::core::partition::bc::PeriodicBox;
    use crate::core::partition::comm::{SerialComm, ThreadComm};
    use crate::engine::config::{AdressConfigBuilder, Scheme};

    const LJ: PairPotential = PairPotential::LennardJones {
        sigma: 1.0,
        epsilon: 1.0,
        cutoff: 1.5,
        shift: true,
    };

    fn lj_forcefield() -> Forcefield {
        Forcefield {
            coarse: PairTable::new().with(0, 0, LJ),
            atomistic: PairTable::new().with(0, 0, LJ),
            bond: None,
        }
    }

    fn chain_tuples(n: usize) -> TupleMap {
        let mut tuples = TupleMap::new();
        for i in 0..n as u64 {
            tuples.insert(ParticleId(100 + i), [ParticleId(i)]).unwrap();
        }
        tuples
    }

    /// Single-atom molecules along x: CG `100 + i` over atom `i`.
    fn chain(domain: &mut Domain, xs: &[f64], y: f64) -> TupleMap {
        for (i, &x) in xs.iter().enumerate() {
            let position = Point3::new(x, y, 5.0);
            domain
                .insert(Particle::new(ParticleId(i as u64), ParticleKind::Atomistic, position, 1.0))
                .unwrap();
            domain
                .insert(Particle::new(
                    ParticleId(100 + i as u64),
                    ParticleKind::CoarseGrained,
                    position,
                    1.0,
                ))
                .unwrap();
        }
        chain_tuples(xs.len())
    }

    /// Atomistic at 5.2, hybrid at 6.5, coarse at 7.8 and 9.0 around a fixed
    /// center at x = 5.
    fn fixed_engine(scheme: Scheme) -> AdressEngine {
        fixed_engine_with(scheme, lj_forcefield())
    }

    fn fixed_engine_with(scheme: Scheme, forcefield: Forcefield) -> AdressEngine {
        let config = AdressConfigBuilder::new()
            .cutoff(1.5)
            .skin(0.3)
            .r_ex(1.0)
            .r_hy(1.0)
            .center(Point3::new(5.0, 5.0, 5.0))
            .scheme(scheme)
            .build()
            .unwrap();
        let bc = PeriodicBox::cubic(10.0).unwrap();
        let mut domain = Domain::new(bc, &SerialComm, config.list_range()).unwrap();
        let tuples = chain(&mut domain, &[5.2, 6.5, 7.8, 9.0], 5.0);
        AdressEngine::new(config, domain, tuples, forcefield, Box::new(SerialComm)).unwrap()
    }

    #[test]
    fn zones_and_pair_lists_follow_the_region() {
        let mut engine = fixed_engine(Scheme::Energy);
        engine.prepare().unwrap();

        assert_eq!(engine.zone_counts().unwrap(), (2, 1, 1));
        assert_eq!(engine.zones().len(), 4);
        assert_eq!(engine.cg_pairs().len(), 1);
        assert_eq!(engine.adr_pairs().len(), 2);
        assert_eq!(engine.total_pair_count().unwrap(), 3);

        let (a, b) = engine.cg_pairs()[0];
        let mut ids = [engine.domain().get(a).unwrap().id, engine.domain().get(b).unwrap().id];
        ids.sort();
        assert_eq!(ids, [ParticleId(102), ParticleId(103)]);
    }

    #[test]
    fn identical_resolutions_give_the_plain_pair_energy_without_drift() {
        let mut engine = fixed_engine(Scheme::Energy);
        let report = engine.prepare().unwrap();

        let expected = 2.0 * LJ.evaluate(1.3 * 1.3).0 + LJ.evaluate(1.2 * 1.2).0;
        assert!((report.energy.total() - expected).abs() < 1e-9);
        assert!((engine.compute_energy().unwrap().total() - expected).abs() < 1e-9);

        let integrator = VelocityVerlet::new(0.001);
        for _ in 0..5 {
            engine.step(&integrator).unwrap();
        }
        assert_eq!(engine.step_count(), 5);
        assert!(engine.drift_energy().unwrap().abs() < 1e-10);
    }

    #[test]
    fn rebuild_without_motion_is_a_no_op() {
        let mut engine = fixed_engine(Scheme::Energy);
        engine.prepare().unwrap();
        let count = engine.rebuild_count();
        let epoch = engine.domain().epoch();

        for _ in 0..5 {
            assert!(!engine.rebuild().unwrap());
        }
        assert_eq!(engine.rebuild_count(), count);
        assert_eq!(engine.domain().epoch(), epoch);

        let key = engine.domain().key_of(ParticleId(3)).unwrap();
        engine.domain_mut().get_mut(key).unwrap().position.x += 0.2;
        assert!(engine.rebuild().unwrap());
        assert_eq!(engine.rebuild_count(), count + 1);
        assert!(!engine.rebuild().unwrap());
    }

    #[test]
    fn drift_energy_belongs_to_the_current_evaluation() {
        let mut forcefield = lj_forcefield();
        forcefield.atomistic = PairTable::new().with(
            0,
            0,
            PairPotential::LennardJones {
                sigma: 1.0,
                epsilon: 2.0,
                cutoff: 1.5,
                shift: true,
            },
        );
        let mut engine = fixed_engine_with(Scheme::Energy, forcefield);
        engine.prepare().unwrap();
        let first = engine.drift_energy().unwrap();
        assert!(first.abs() > 1e-6, "hybrid pair should carry an energy difference");

        for _ in 0..3 {
            engine.compute_forces().unwrap();
            assert!((engine.drift_energy().unwrap() - first).abs() < 1e-12);
        }
    }

    #[test]
    fn pair_forces_are_newtonian() {
        for scheme in [Scheme::Force, Scheme::Energy] {
            let mut engine = fixed_engine(scheme);
            engine.prepare().unwrap();
            let net: Vector3<f64> = engine
                .domain()
                .iter_real()
                .filter(|(_, p)| !p.is_coarse_grained())
                .map(|(_, p)| p.force)
                .sum();
            // Drift forces are external, but vanish for identical potentials.
            assert!(net.norm() < 1e-9, "{scheme}: net force {net}");
        }
    }

    #[test]
    fn stepping_before_prepare_is_rejected() {
        let mut engine = fixed_engine(Scheme::Force);
        let integrator = VelocityVerlet::new(0.001);
        assert!(matches!(engine.step(&integrator), Err(EngineError::Internal(_))));
    }

    #[test]
    fn markers_cannot_join_a_fixed_region() {
        let mut engine = fixed_engine(Scheme::Energy);
        assert!(matches!(
            engine.add_marker_particle(ParticleId(0)),
            Err(EngineError::Config {
                source: ConfigError::FixedCenterWithMarkers
            })
        ));
    }

    #[test]
    fn local_consistency_failure_ends_every_rank() {
        let run_rank = |comm: ThreadComm| -> Result<ForceReport, EngineError> {
            let config = AdressConfigBuilder::new()
                .cutoff(1.5)
                .skin(0.3)
                .r_ex(1.0)
                .r_hy(1.0)
                .marker(ParticleId(0))
                .build()
                .unwrap();
            let bc = PeriodicBox::cubic(10.0).unwrap();
            let mut domain = Domain::new(bc, &comm, config.list_range()).unwrap();
            let tuples = if comm.rank() == 0 {
                let tuples = chain(&mut domain, &[1.0, 3.0, 6.0, 8.0], 2.0);
                // Lands in the slab of rank 1 without any constituents.
                domain
                    .insert(Particle::new(
                        ParticleId(200),
                        ParticleKind::CoarseGrained,
                        Point3::new(7.5, 2.0, 5.0),
                        1.0,
                    ))
                    .unwrap();
                tuples
            } else {
                chain_tuples(4)
            };

            let mut engine =
                AdressEngine::new(config, domain, tuples, lj_forcefield(), Box::new(comm)).unwrap();
            let outcome = engine.prepare();
            if outcome.is_err() {
                engine.abort();
            }
            outcome
        };

        let outcomes: Vec<Result<ForceReport, EngineError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = ThreadComm::group(2)
                .into_iter()
                .map(|comm| scope.spawn(move || run_rank(comm)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(outcomes.iter().all(Result::is_err));
        assert!(
            outcomes
                .iter()
                .any(|o| matches!(o, Err(EngineError::FatalConsistency { id, .. }) if *id == ParticleId(200)))
        );
    }

    #[test]
    fn marker_snapshot_is_shared_and_refreshed_on_its_cadence() {
        const DT: f64 = 0.01;
        const SPEED: f64 = 50.0;
        const STEPS: u64 = 9;

        let run_rank = |comm: ThreadComm| -> Vec<(u64, Point3<f64>)> {
            let config = AdressConfigBuilder::new()
                .cutoff(1.5)
                .skin(0.3)
                .r_ex(1.0)
                .r_hy(1.0)
                .marker(ParticleId(0))
                .region_updates(3)
                .build()
                .unwrap();
            let bc = PeriodicBox::cubic(10.0).unwrap();
            let mut domain = Domain::new(bc, &comm, config.list_range()).unwrap();
            let tuples = if comm.rank() == 0 {
                let tuples = chain(&mut domain, &[1.0, 3.0, 6.0, 8.0], 2.0);
                let key = domain.key_of(ParticleId(0)).unwrap();
                domain.get_mut(key).unwrap().velocity = Vector3::new(SPEED, 0.0, 0.0);
                tuples
            } else {
                chain_tuples(4)
            };

            let mut engine =
                AdressEngine::new(config, domain, tuples, Forcefield::default(), Box::new(comm)).unwrap();
            engine.prepare().unwrap();
            let integrator = VelocityVerlet::new(DT);
            let mut seen = vec![(0, engine.markers()[0])];
            for _ in 0..STEPS {
                engine.step(&integrator).unwrap();
                seen.push((engine.step_count(), engine.markers()[0]));
            }
            seen
        };

        let results: Vec<Vec<(u64, Point3<f64>)>> = std::thread::scope(|scope| {
            let handles: Vec<_> = ThreadComm::group(2)
                .into_iter()
                .map(|comm| scope.spawn(move || run_rank(comm)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let bc = PeriodicBox::cubic(10.0).unwrap();
        assert_eq!(results[0].len(), results[1].len());
        for ((step, a), (_, b)) in results[0].iter().zip(&results[1]) {
            assert!(bc.min_image_vector(a, b).norm() < 1e-12, "ranks disagree at step {step}");
            let refreshed = step - step % 3;
            let expected = Point3::new(1.0 + SPEED * DT * refreshed as f64, 2.0, 5.0);
            assert!(
                bc.min_image_vector(a, &expected).norm() < 1e-9,
                "step {step}: marker at {a}, expected {expected}"
            );
        }
    }
}
