use crate::core::models::ids::{ParticleId, ParticleKey};
use crate::core::models::particle::Particle;
use crate::core::partition::domain::{Domain, MoleculeIndex};
use slotmap::SecondaryMap;
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TupleError {
    #[error("Coarse-grained particle {0} already has a tuple")]
    DuplicateTuple(ParticleId),
    #[error("Particle {member} is already a constituent of {existing}")]
    DuplicateMember {
        member: ParticleId,
        existing: ParticleId,
    },
    #[error("Tuple of {0} has no constituents")]
    EmptyTuple(ParticleId),
    #[error("Tuple of {cg} has {found} constituents, but every tuple must have {expected}")]
    ArityMismatch {
        cg: ParticleId,
        expected: usize,
        found: usize,
    },
    #[error("Constituent {member} of {cg} is not present on this rank")]
    MissingConstituent { cg: ParticleId, member: ParticleId },
    #[error("Particle {0} has a tuple, but it was not resolved on this rank")]
    NotLocal(ParticleId),
    #[error("Particle {0} has no registered tuple")]
    Unmapped(ParticleId),
    #[error("Tuple handles were resolved at epoch {resolved:?} but the domain is at epoch {current}")]
    StaleHandles { resolved: Option<u64>, current: u64 },
}

/// Mapping from each coarse-grained representative to its ordered atomistic
/// constituents.
///
/// The map keeps two views. The id-level grouping is global and identical on
/// every rank; it is built once through [`TupleMap::begin`]. The handle-level
/// view binds the coarse-grained particles present on this rank to the arena
/// handles of their constituents and is rebuilt by [`TupleMap::resolve`] after
/// every decomposition.
#[derive(Debug, Clone, Default)]
pub struct TupleMap {
    groups: BTreeMap<ParticleId, Vec<ParticleId>>,
    owner: HashMap<ParticleId, ParticleId>,
    arity: Option<usize>,
    resolved: SecondaryMap<ParticleKey, Vec<ParticleKey>>,
    resolved_epoch: Option<u64>,
}

/// Pending tuple. Nothing becomes visible until [`TupleBuilder::commit`];
/// dropping the builder discards the tuple.
#[derive(Debug)]
pub struct TupleBuilder<'a> {
    map: &'a mut TupleMap,
    cg: ParticleId,
    members: Vec<ParticleId>,
}

impl TupleBuilder<'_> {
    pub fn push(&mut self, member: ParticleId) -> &mut Self {
        self.members.push(member);
        self
    }

    pub fn commit(self) -> Result<(), TupleError> {
        let TupleBuilder { map, cg, members } = self;
        if members.is_empty() {
            return Err(TupleError::EmptyTuple(cg));
        }
        if let Some(expected) = map.arity {
            if expected != members.len() {
                return Err(TupleError::ArityMismatch {
                    cg,
                    expected,
                    found: members.len(),
                });
            }
        }
        let mut seen = HashSet::with_capacity(members.len());
        for &member in &members {
            if let Some(&existing) = map.owner.get(&member) {
                return Err(TupleError::DuplicateMember { member, existing });
            }
            if !seen.insert(member) {
                return Err(TupleError::DuplicateMember { member, existing: cg });
            }
        }

        map.arity = Some(members.len());
        for &member in &members {
            map.owner.insert(member, cg);
        }
        map.groups.insert(cg, members);
        Ok(())
    }
}

impl TupleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, cg: ParticleId) -> Result<TupleBuilder<'_>, TupleError> {
        if self.groups.contains_key(&cg) {
            return Err(TupleError::DuplicateTuple(cg));
        }
        Ok(TupleBuilder {
            map: self,
            cg,
            members: Vec::new(),
        })
    }

    pub fn insert(
        &mut self,
        cg: ParticleId,
        members: impl IntoIterator<Item = ParticleId>,
    ) -> Result<(), TupleError> {
        let mut builder = self.begin(cg)?;
        for member in members {
            builder.push(member);
        }
        builder.commit()
    }

    /// Number of constituents per tuple, once the first tuple is committed.
    #[inline]
    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn members(&self, cg: ParticleId) -> Option<&[ParticleId]> {
        self.groups.get(&cg).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParticleId, &[ParticleId])> {
        self.groups.iter().map(|(&cg, members)| (cg, members.as_slice()))
    }

    /// Binds every coarse-grained particle present on the domain to the
    /// handles of its constituents.
    ///
    /// Coarse-grained particles without a tuple are skipped here and reported
    /// when they are looked up.
    pub fn resolve(&mut self, domain: &Domain) -> Result<(), TupleError> {
        let mut resolved = SecondaryMap::new();
        for (key, particle) in domain.iter().filter(|(_, p)| p.is_coarse_grained()) {
            let Some(members) = self.groups.get(&particle.id) else {
                continue;
            };
            let handles = members
                .iter()
                .map(|&member| {
                    domain.key_of(member).ok_or(TupleError::MissingConstituent {
                        cg: particle.id,
                        member,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            resolved.insert(key, handles);
        }
        debug!(
            resolved = resolved.len(),
            epoch = domain.epoch(),
            "Tuples resolved."
        );
        self.resolved = resolved;
        self.resolved_epoch = Some(domain.epoch());
        Ok(())
    }

    /// Fails if the handle view predates the domain's current epoch.
    pub fn ensure_current(&self, domain: &Domain) -> Result<(), TupleError> {
        if self.resolved_epoch == Some(domain.epoch()) {
            Ok(())
        } else {
            Err(TupleError::StaleHandles {
                resolved: self.resolved_epoch,
                current: domain.epoch(),
            })
        }
    }

    #[inline]
    pub fn constituents(&self, key: ParticleKey) -> Option<&[ParticleKey]> {
        self.resolved.get(key).map(Vec::as_slice)
    }

    pub fn lookup(&self, key: ParticleKey, particle: &Particle) -> Result<&[ParticleKey], TupleError> {
        self.constituents(key).ok_or_else(|| self.missing(particle))
    }

    /// Why `particle` has no resolved constituents on this rank.
    pub fn missing(&self, particle: &Particle) -> TupleError {
        if self.groups.contains_key(&particle.id) {
            TupleError::NotLocal(particle.id)
        } else {
            TupleError::Unmapped(particle.id)
        }
    }
}

impl MoleculeIndex for TupleMap {
    fn representative_of(&self, member: ParticleId) -> Option<ParticleId> {
        self.owner.get(&member).copied()
    }
}
