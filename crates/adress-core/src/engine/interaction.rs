use super::config::Scheme;
use super::drift::DriftCorrector;
use super::error::EngineError;
use super::neighbor_list::AdressNeighborList;
use super::synchronizer::lookup_or_fatal;
use crate::core::adress::tuples::TupleMap;
use crate::core::forcefield::params::Forcefield;
use crate::core::forcefield::term::EnergyTerm;
use crate::core::models::ids::ParticleKey;
use crate::core::partition::comm::{CommError, Communicator, all_gather};
use crate::core::partition::domain::Domain;
use itertools::Itertools;
use nalgebra::Vector3;
use tracing::{instrument, trace};

/// Weights closer than this to 0 or 1 are treated as exactly 0 or 1.
pub const LAMBDA_EPSILON: f64 = 1e-7;

/// How a coarse-grained pair is evaluated, decided from its pair weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InteractionKind {
    Coarse,
    Atomistic,
    /// Both, scaled by `1 - weight` and `weight` respectively.
    Blended { weight: f64 },
}

impl InteractionKind {
    pub fn classify(scheme: Scheme, lambda_a: f64, lambda_b: f64) -> Self {
        let weight = scheme.pair_weight(lambda_a, lambda_b);
        if weight < LAMBDA_EPSILON {
            InteractionKind::Coarse
        } else if weight > 1.0 - LAMBDA_EPSILON {
            InteractionKind::Atomistic
        } else {
            InteractionKind::Blended { weight }
        }
    }

    #[inline]
    fn coarse_scale(&self) -> f64 {
        match *self {
            InteractionKind::Coarse => 1.0,
            InteractionKind::Atomistic => 0.0,
            InteractionKind::Blended { weight } => 1.0 - weight,
        }
    }

    #[inline]
    fn atomistic_scale(&self) -> f64 {
        match *self {
            InteractionKind::Coarse => 0.0,
            InteractionKind::Atomistic => 1.0,
            InteractionKind::Blended { weight } => weight,
        }
    }
}

/// Energy and scalar virial `Σ r·F` of one evaluation on one rank.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ForceReport {
    pub energy: EnergyTerm,
    pub virial: f64,
}

impl ForceReport {
    pub fn all_reduce(self, comm: &dyn Communicator) -> Result<Self, CommError> {
        Ok(all_gather(comm, self)?
            .into_iter()
            .fold(ForceReport::default(), |mut acc, report| {
                acc.energy += report.energy;
                acc.virial += report.virial;
                acc
            }))
    }
}

/// Force on the first particle of a pair; the second receives the opposite.
type PairForce = (ParticleKey, ParticleKey, Vector3<f64>);

struct PairOutcome {
    energy: EnergyTerm,
    virial: f64,
    lambdas: (f64, f64),
    /// `e_at - e_cg` of a blended pair, before scaling.
    energy_diff: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct InteractionEvaluator {
    scheme: Scheme,
    forcefield: Forcefield,
}

impl InteractionEvaluator {
    pub fn new(scheme: Scheme, forcefield: Forcefield) -> Self {
        Self { scheme, forcefield }
    }

    #[inline]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[inline]
    pub fn forcefield(&self) -> &Forcefield {
        &self.forcefield
    }

    /// Adds pair and bond forces to the domain and returns this rank's energy
    /// and virial. With a drift corrector, blended pairs feed their energy
    /// difference into it.
    ///
    /// Pairs are classified with the current weights, so a pair listed as
    /// coarse whose ends have since entered the hybrid shell is evaluated with
    /// its constituents.
    #[instrument(skip_all, name = "compute_forces")]
    pub fn compute_forces(
        &self,
        domain: &mut Domain,
        tuples: &TupleMap,
        nl: &AdressNeighborList,
        mut drift: Option<&mut DriftCorrector>,
    ) -> Result<ForceReport, EngineError> {
        let mut report = ForceReport::default();
        let mut forces: Vec<PairForce> = Vec::new();

        for &(a, b) in nl.cg_pairs().iter().chain(nl.adr_pairs()) {
            forces.clear();
            let outcome = self.evaluate_pair(domain, tuples, a, b, &mut forces)?;
            apply_forces(domain, &forces);
            report.energy += outcome.energy;
            report.virial += outcome.virial;
            if let (Some(diff), Some(corrector)) = (outcome.energy_diff, drift.as_deref_mut()) {
                corrector.accumulate(a, outcome.lambdas.0, diff);
                corrector.accumulate(b, outcome.lambdas.1, diff);
            }
        }

        forces.clear();
        let (bonded, bond_virial) = self.evaluate_bonds(domain, tuples, &mut forces)?;
        apply_forces(domain, &forces);
        report.energy.bonded += bonded;
        report.virial += bond_virial;

        trace!(energy = report.energy.total(), "Local forces computed.");
        Ok(report)
    }

    pub fn compute_energy(
        &self,
        domain: &Domain,
        tuples: &TupleMap,
        nl: &AdressNeighborList,
    ) -> Result<ForceReport, EngineError> {
        let mut report = ForceReport::default();
        let mut scratch: Vec<PairForce> = Vec::new();
        for &(a, b) in nl.cg_pairs().iter().chain(nl.adr_pairs()) {
            scratch.clear();
            let outcome = self.evaluate_pair(domain, tuples, a, b, &mut scratch)?;
            report.energy += outcome.energy;
            report.virial += outcome.virial;
        }
        scratch.clear();
        let (bonded, bond_virial) = self.evaluate_bonds(domain, tuples, &mut scratch)?;
        report.energy.bonded += bonded;
        report.virial += bond_virial;
        Ok(report)
    }

    fn evaluate_pair(
        &self,
        domain: &Domain,
        tuples: &TupleMap,
        a: ParticleKey,
        b: ParticleKey,
        forces: &mut Vec<PairForce>,
    ) -> Result<PairOutcome, EngineError> {
        let pa = domain.get(a).ok_or(EngineError::StaleHandle)?;
        let pb = domain.get(b).ok_or(EngineError::StaleHandle)?;
        let kind = InteractionKind::classify(self.scheme, pa.lambda, pb.lambda);

        let mut outcome = PairOutcome {
            energy: EnergyTerm::default(),
            virial: 0.0,
            lambdas: (pa.lambda, pb.lambda),
            energy_diff: None,
        };

        let mut e_cg = 0.0;
        let cg_scale = kind.coarse_scale();
        if cg_scale >= LAMBDA_EPSILON {
            let r = domain.min_image_vector(&pa.position, &pb.position);
            let (energy, force_over_r) = self
                .forcefield
                .coarse
                .get(pa.type_id, pb.type_id)
                .evaluate(r.norm_squared());
            e_cg = energy;
            let force = r * (force_over_r * cg_scale);
            forces.push((a, b, force));
            outcome.energy.coarse += cg_scale * energy;
            outcome.virial += r.dot(&force);
        }

        let at_scale = kind.atomistic_scale();
        if at_scale >= LAMBDA_EPSILON {
            let members_a = lookup_or_fatal(domain, tuples, a)?;
            let members_b = lookup_or_fatal(domain, tuples, b)?;
            let mut e_at = 0.0;
            for (&i, &j) in members_a.iter().cartesian_product(members_b) {
                let (Some(ai), Some(aj)) = (domain.get(i), domain.get(j)) else {
                    return Err(EngineError::StaleHandle);
                };
                let r = domain.min_image_vector(&ai.position, &aj.position);
                let (energy, force_over_r) = self
                    .forcefield
                    .atomistic
                    .get(ai.type_id, aj.type_id)
                    .evaluate(r.norm_squared());
                e_at += energy;
                if force_over_r != 0.0 {
                    let force = r * (force_over_r * at_scale);
                    forces.push((i, j, force));
                    outcome.virial += r.dot(&force);
                }
            }
            outcome.energy.atomistic += at_scale * e_at;
            if matches!(kind, InteractionKind::Blended { .. }) {
                outcome.energy_diff = Some(e_at - e_cg);
            }
        }

        Ok(outcome)
    }

    fn evaluate_bonds(
        &self,
        domain: &Domain,
        tuples: &TupleMap,
        forces: &mut Vec<PairForce>,
    ) -> Result<(f64, f64), EngineError> {
        let Some(bond) = self.forcefield.bond else {
            return Ok((0.0, 0.0));
        };
        let mut energy = 0.0;
        let mut virial = 0.0;
        for (key, _) in domain.iter_real().filter(|(_, p)| p.is_coarse_grained()) {
            let members = lookup_or_fatal(domain, tuples, key)?;
            for (&i, &j) in members.iter().tuple_windows() {
                let (Some(ai), Some(aj)) = (domain.get(i), domain.get(j)) else {
                    return Err(EngineError::StaleHandle);
                };
                let r = domain.min_image_vector(&ai.position, &aj.position);
                let (e, force) = bond.evaluate(&r);
                energy += e;
                virial += r.dot(&force);
                forces.push((i, j, force));
            }
        }
        Ok((energy, virial))
    }
}

fn apply_forces(domain: &mut Domain, forces: &[PairForce]) {
    for &(i, j, force) in forces {
        if let Some(p) = domain.get_mut(i) {
            p.force += force;
        }
        if let Some(p) = domain.get_mut(j) {
            p.force -= force;
        }
    }
}
