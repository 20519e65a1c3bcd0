use super::setup::build_lattice;
use crate::core::adress::region::RegionCenter;
use crate::core::adress::tuples::TupleMap;
use crate::core::forcefield::params::Forcefield;
use crate::core::partition::comm::Communicator;
use crate::core::partition::domain::Domain;
use crate::engine::adress::AdressEngine;
use crate::engine::config::{ConfigError, SimulationConfig};
use crate::engine::density::{DensityBin, DensityProfile};
use crate::engine::error::EngineError;
use crate::engine::fec::FreeEnergyCompensation;
use crate::engine::integrator::VelocityVerlet;
use crate::engine::interaction::ForceReport;
use crate::engine::progress::{Progress, ProgressReporter};
use serde::Serialize;
use tracing::{info, instrument};

/// Thermodynamic state of the whole system at one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThermoRecord {
    pub step: u64,
    pub time: f64,
    pub kinetic: f64,
    pub temperature: f64,
    pub coarse: f64,
    pub atomistic: f64,
    pub bonded: f64,
    pub compensation: f64,
    pub potential: f64,
    /// Drift energy of the last force evaluation.
    pub drift: f64,
    /// Kinetic plus potential energy.
    pub total: f64,
    pub virial: f64,
    pub n_coarse: usize,
    pub n_hybrid: usize,
    pub n_atomistic: usize,
    pub pairs: usize,
    pub rebuilds: usize,
}

#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub records: Vec<ThermoRecord>,
    pub rebuilds: usize,
    /// Density profile averaged over the records, if enabled.
    pub density: Option<Vec<DensityBin>>,
}

/// Runs a complete simulation on this rank. Collective: every rank of `comm`
/// must call it with the same configuration.
///
/// Rank 0 builds the lattice; the first rebuild spreads it over all ranks.
#[instrument(skip_all, name = "simulation_workflow")]
pub fn run(
    config: &SimulationConfig,
    comm: Box<dyn Communicator>,
    reporter: &ProgressReporter,
) -> Result<SimulationResult, EngineError> {
    // === Phase 0: Preparation ===
    reporter.report(Progress::PhaseStart {
        name: "Preparation",
    });
    let mut engine = prepare_engine(config, comm)?;
    let mut profile = (config.density_bins > 0).then(|| {
        DensityProfile::for_box(config.adress.geometry, engine.domain().bc(), config.density_bins)
    });
    let records = match drive(&mut engine, config, profile.as_mut(), reporter) {
        Ok(records) => records,
        Err(err) => {
            engine.abort();
            return Err(err);
        }
    };

    let rebuilds = engine.rebuild_count();
    info!(
        steps = config.steps,
        rebuilds,
        records = records.len(),
        "Simulation complete."
    );
    Ok(SimulationResult {
        records,
        rebuilds,
        density: profile.map(|p| p.bins()),
    })
}

/// Prepares the engine, then integrates and samples on the thermo interval.
fn drive(
    engine: &mut AdressEngine,
    config: &SimulationConfig,
    mut profile: Option<&mut DensityProfile>,
    reporter: &ProgressReporter,
) -> Result<Vec<ThermoRecord>, EngineError> {
    let initial = engine.prepare()?;
    let mut records = vec![record(engine, config, initial)?];
    if let Some(profile) = profile.as_deref_mut() {
        engine.sample_density(profile)?;
    }
    reporter.report(Progress::PhaseFinish);

    // === Phase 1: Integration ===
    reporter.report(Progress::PhaseStart {
        name: "Integration",
    });
    reporter.report(Progress::TaskStart {
        total_steps: config.steps as u64,
    });
    let integrator = VelocityVerlet::new(config.timestep);
    for _ in 0..config.steps {
        let report = engine.step(&integrator)?;
        if engine.step_count() % config.thermo_interval as u64 == 0 {
            let entry = record(engine, config, report)?;
            if let Some(profile) = profile.as_deref_mut() {
                engine.sample_density(profile)?;
            }
            if reporter.is_enabled() {
                reporter.report(Progress::Message(format!(
                    "step {} T={:.4} E={:.6}",
                    entry.step, entry.temperature, entry.total
                )));
            }
            records.push(entry);
        }
        reporter.report(Progress::TaskIncrement);
    }
    reporter.report(Progress::TaskFinish);
    reporter.report(Progress::PhaseFinish);

    Ok(records)
}

/// Builds this rank's engine. Only rank 0 receives the lattice. A failure
/// aborts the communicator so that no other rank waits on this one.
fn prepare_engine(config: &SimulationConfig, comm: Box<dyn Communicator>) -> Result<AdressEngine, EngineError> {
    let (forcefield, tuples, domain) = match build_domain(config, comm.as_ref()) {
        Ok(parts) => parts,
        Err(err) => {
            comm.abort();
            return Err(err);
        }
    };

    let mut engine = AdressEngine::new(config.adress.clone(), domain, tuples, forcefield, comm)?;
    if let Some(path) = &config.fec_path {
        match FreeEnergyCompensation::load(path, config.adress.geometry) {
            Ok(fec) => engine = engine.with_fec(fec),
            Err(err) => {
                engine.abort();
                return Err(err.into());
            }
        }
    }
    if let RegionCenter::Markers(ids) = &config.adress.center {
        info!(markers = ids.len(), "Region follows marker particles.");
    }
    Ok(engine)
}

fn build_domain(
    config: &SimulationConfig,
    comm: &dyn Communicator,
) -> Result<(Forcefield, TupleMap, Domain), EngineError> {
    let forcefield = Forcefield::load(&config.forcefield_path)?;
    let system = build_lattice(&config.lattice)?;

    let half_box = 0.5 * system.bc.lengths().min();
    if config.adress.list_range() > half_box {
        return Err(ConfigError::InvalidParameter {
            name: "cutoff",
            reason: format!(
                "cutoff plus skin {} exceeds half the box edge {}",
                config.adress.list_range(),
                half_box
            ),
        }
        .into());
    }

    let mut domain = Domain::new(system.bc, comm, config.adress.list_range())?;
    if comm.rank() == 0 {
        for particle in system.particles {
            domain.insert(particle)?;
        }
    }
    Ok((forcefield, system.tuples, domain))
}

/// Collective.
fn record(
    engine: &AdressEngine,
    config: &SimulationConfig,
    report: ForceReport,
) -> Result<ThermoRecord, EngineError> {
    let (kinetic, atoms) = engine.kinetic_energy()?;
    let dof = if atoms > 1 { 3 * atoms - 3 } else { 3 * atoms };
    let temperature = if dof > 0 { 2.0 * kinetic / dof as f64 } else { 0.0 };
    let drift = engine.drift_energy()?;
    let (n_coarse, n_hybrid, n_atomistic) = engine.zone_counts()?;
    let pairs = engine.total_pair_count()?;
    let potential = report.energy.total();

    Ok(ThermoRecord {
        step: engine.step_count(),
        time: engine.step_count() as f64 * config.timestep,
        kinetic,
        temperature,
        coarse: report.energy.coarse,
        atomistic: report.energy.atomistic,
        bonded: report.energy.bonded,
        compensation: report.energy.compensation,
        potential,
        drift,
        total: kinetic + potential,
        virial: report.virial,
        n_coarse,
        n_hybrid,
        n_atomistic,
        pairs,
        rebuilds: engine.rebuild_count(),
    })
}
