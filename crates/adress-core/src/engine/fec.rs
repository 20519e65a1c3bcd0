use super::drift::DriftCorrector;
use crate::core::adress::region::RegionGeometry;
use crate::core::forcefield::params::ParamLoadError;
use crate::core::partition::domain::Domain;
use itertools::Itertools;
use nalgebra::Point3;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Deserialize)]
struct FecRow {
    type_id: usize,
    lambda: f64,
    force: f64,
    energy: f64,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FecError {
    #[error("a table needs at least two points, got {0}")]
    TooFewPoints(usize),
    #[error("duplicate lambda {0}")]
    DuplicateLambda(f64),
}

/// Compensation force and energy as a function of `lambda`, linearly
/// interpolated between tabulated points and clamped at both ends.
#[derive(Debug, Clone, PartialEq)]
pub struct FecTable {
    lambdas: Vec<f64>,
    forces: Vec<f64>,
    energies: Vec<f64>,
}

impl FecTable {
    pub fn new(points: impl IntoIterator<Item = (f64, f64, f64)>) -> Result<Self, FecError> {
        let points: Vec<_> = points
            .into_iter()
            .sorted_by(|a, b| a.0.total_cmp(&b.0))
            .collect();
        if points.len() < 2 {
            return Err(FecError::TooFewPoints(points.len()));
        }
        if let Some((a, _)) = points.iter().tuple_windows().find(|(a, b)| a.0 >= b.0) {
            return Err(FecError::DuplicateLambda(a.0));
        }
        Ok(Self {
            lambdas: points.iter().map(|p| p.0).collect(),
            forces: points.iter().map(|p| p.1).collect(),
            energies: points.iter().map(|p| p.2).collect(),
        })
    }

    #[inline]
    pub fn force(&self, lambda: f64) -> f64 {
        self.interpolate(lambda, &self.forces)
    }

    #[inline]
    pub fn energy(&self, lambda: f64) -> f64 {
        self.interpolate(lambda, &self.energies)
    }

    fn interpolate(&self, lambda: f64, values: &[f64]) -> f64 {
        let last = self.lambdas.len() - 1;
        if lambda <= self.lambdas[0] {
            return values[0];
        }
        if lambda >= self.lambdas[last] {
            return values[last];
        }
        let upper = self.lambdas.partition_point(|&l| l <= lambda);
        let (l0, l1) = (self.lambdas[upper - 1], self.lambdas[upper]);
        let t = (lambda - l0) / (l1 - l0);
        values[upper - 1] + t * (values[upper] - values[upper - 1])
    }
}

/// Free-energy compensation: a tabulated thermodynamic force on hybrid
/// coarse-grained particles, one table per particle type.
#[derive(Debug, Clone, Default)]
pub struct FreeEnergyCompensation {
    geometry: RegionGeometry,
    tables: HashMap<usize, FecTable>,
}

impl FreeEnergyCompensation {
    pub fn new(geometry: RegionGeometry, tables: HashMap<usize, FecTable>) -> Self {
        Self { geometry, tables }
    }

    /// Loads tables from a CSV file with columns `type_id,lambda,force,energy`.
    pub fn load(path: &Path, geometry: RegionGeometry) -> Result<Self, ParamLoadError> {
        let path_str = || path.to_string_lossy().to_string();
        let mut reader = csv::Reader::from_path(path).map_err(|e| ParamLoadError::Csv {
            path: path_str(),
            source: e,
        })?;

        let mut grouped: BTreeMap<usize, Vec<(f64, f64, f64)>> = BTreeMap::new();
        for result in reader.deserialize::<FecRow>() {
            let row = result.map_err(|e| ParamLoadError::Csv {
                path: path_str(),
                source: e,
            })?;
            grouped
                .entry(row.type_id)
                .or_default()
                .push((row.lambda, row.force, row.energy));
        }

        let mut tables = HashMap::with_capacity(grouped.len());
        for (type_id, points) in grouped {
            let table = FecTable::new(points).map_err(|reason| ParamLoadError::InvalidTable {
                path: path_str(),
                reason: format!("type {type_id}: {reason}"),
            })?;
            tables.insert(type_id, table);
        }
        info!(types = tables.len(), "Loaded free-energy compensation tables.");
        Ok(Self::new(geometry, tables))
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn energy(&self, domain: &Domain) -> f64 {
        domain
            .iter_real()
            .filter(|(_, p)| p.is_coarse_grained() && DriftCorrector::is_hybrid(p.lambda))
            .filter_map(|(_, p)| self.tables.get(&p.type_id).map(|t| t.energy(p.lambda)))
            .sum()
    }

    /// Applies the compensation force to real hybrid coarse-grained particles
    /// and returns their compensation energy on this rank.
    ///
    /// The force points away from the nearest marker, scaled by `lambda'`.
    pub fn apply(&self, domain: &mut Domain, markers: &[Point3<f64>]) -> f64 {
        let bc = *domain.bc();
        let mut energy = 0.0;
        let keys: Vec<_> = domain.real_keys().to_vec();
        for key in keys {
            let Some(particle) = domain.get_mut(key) else {
                continue;
            };
            if !particle.is_coarse_grained() || !DriftCorrector::is_hybrid(particle.lambda) {
                continue;
            }
            let Some(table) = self.tables.get(&particle.type_id) else {
                continue;
            };
            let Some(nearest) = self.geometry.nearest(&bc, &particle.position, markers) else {
                continue;
            };
            let outward = -nearest.unit_toward();
            particle.force += outward * (table.force(particle.lambda) * particle.lambda_deriv);
            energy += table.energy(particle.lambda);
        }
        energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ids::ParticleId;
    use crate::core::models::particle::{Particle, ParticleKind};
    use crate::core::partition::bc::PeriodicBox;
    use crate::core::partition::comm::SerialComm;
    use nalgebra::Vector3;
    use std::fs;
    use tempfile::tempdir;

    fn linear_table() -> FecTable {
        FecTable::new([(1.0, 2.0, 10.0), (0.0, 0.0, 0.0), (0.5, 1.0, 4.0)]).unwrap()
    }

    #[test]
    fn table_interpolates_linearly_and_clamps() {
        let table = linear_table();
        assert!((table.force(0.25) - 0.5).abs() < 1e-12);
        assert!((table.energy(0.75) - 7.0).abs() < 1e-12);
        assert_eq!(table.force(-1.0), 0.0);
        assert_eq!(table.energy(2.0), 10.0);
        assert_eq!(table.energy(0.5), 4.0);
    }

    #[test]
    fn table_rejects_degenerate_input() {
        assert_eq!(FecTable::new([(0.0, 0.0, 0.0)]), Err(FecError::TooFewPoints(1)));
        assert_eq!(
            FecTable::new([(0.5, 0.0, 0.0), (0.5, 1.0, 1.0)]),
            Err(FecError::DuplicateLambda(0.5))
        );
    }

    #[test]
    fn load_groups_rows_by_type() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fec.csv");
        fs::write(
            &path,
            "type_id,lambda,force,energy\n0,0.0,0.0,0.0\n0,1.0,2.0,10.0\n1,0.0,1.0,1.0\n1,1.0,1.0,1.0\n",
        )
        .unwrap();
        let fec = FreeEnergyCompensation::load(&path, RegionGeometry::Spherical).unwrap();
        assert_eq!(fec.tables.len(), 2);
    }

    #[test]
    fn load_rejects_single_point_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fec.csv");
        fs::write(&path, "type_id,lambda,force,energy\n0,0.5,0.0,0.0\n").unwrap();
        assert!(matches!(
            FreeEnergyCompensation::load(&path, RegionGeometry::Spherical),
            Err(ParamLoadError::InvalidTable { .. })
        ));
    }

    #[test]
    fn apply_acts_only_on_hybrid_particles() {
        let bc = PeriodicBox::cubic(10.0).unwrap();
        let mut domain = Domain::new(bc, &SerialComm, 1.0).unwrap();
        let mut hybrid = Particle::new(ParticleId(1), ParticleKind::CoarseGrained, Point3::new(6.0, 5.0, 5.0), 1.0);
        hybrid.lambda = 0.5;
        hybrid.lambda_deriv = -2.0;
        let mut inner = Particle::new(ParticleId(2), ParticleKind::CoarseGrained, Point3::new(5.0, 5.5, 5.0), 1.0);
        inner.lambda = 1.0;
        let hybrid_key = domain.insert(hybrid).unwrap();
        let inner_key = domain.insert(inner).unwrap();

        let fec = FreeEnergyCompensation::new(
            RegionGeometry::Spherical,
            HashMap::from([(0, linear_table())]),
        );
        let energy = fec.apply(&mut domain, &[Point3::new(5.0, 5.0, 5.0)]);

        assert!((energy - 4.0).abs() < 1e-12);
        assert!((fec.energy(&domain) - 4.0).abs() < 1e-12);
        // force(0.5) = 1, scaled by λ' = −2, directed away from the marker (+x).
        assert!((domain.get(hybrid_key).unwrap().force - Vector3::new(-2.0, 0.0, 0.0)).norm() < 1e-12);
        assert_eq!(domain.get(inner_key).unwrap().force, Vector3::zeros());
    }
}
