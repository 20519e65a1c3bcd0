use crate::core::adress::region::RegionGeometry;
use crate::core::models::ids::ParticleId;
use crate::core::partition::bc::PeriodicBox;
use crate::core::partition::comm::{CommError, Communicator, all_gather};
use crate::core::partition::domain::Domain;
use nalgebra::Point3;
use serde::Serialize;
use std::collections::HashSet;

/// One bin of a density profile, relative to a uniform system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DensityBin {
    pub r_lo: f64,
    pub r_hi: f64,
    pub density: f64,
}

/// Atomistic number density against the distance to the nearest region
/// center, averaged over samples.
///
/// Each sample is normalized by the particles inside the profile range, so a
/// homogeneous system reads 1 in every bin. Spherical regions use shell
/// volumes, slab regions equal-width layers.
#[derive(Debug, Clone)]
pub struct DensityProfile {
    geometry: RegionGeometry,
    max_distance: f64,
    sums: Vec<f64>,
    samples: usize,
    excluded: HashSet<ParticleId>,
}

impl DensityProfile {
    pub fn new(geometry: RegionGeometry, max_distance: f64, bins: usize) -> Self {
        Self {
            geometry,
            max_distance,
            sums: vec![0.0; bins],
            samples: 0,
            excluded: HashSet::new(),
        }
    }

    /// Profile reaching half the box: the x edge for slabs, the shortest edge
    /// for spheres.
    pub fn for_box(geometry: RegionGeometry, bc: &PeriodicBox, bins: usize) -> Self {
        let lengths = bc.lengths();
        let max_distance = match geometry {
            RegionGeometry::Spherical => 0.5 * lengths.min(),
            RegionGeometry::Slab => 0.5 * lengths.x,
        };
        Self::new(geometry, max_distance, bins)
    }

    pub fn exclude(&mut self, id: ParticleId) {
        self.excluded.insert(id);
    }

    #[inline]
    pub fn samples(&self) -> usize {
        self.samples
    }

    #[inline]
    fn bin_width(&self) -> f64 {
        self.max_distance / self.sums.len() as f64
    }

    pub fn sample(
        &mut self,
        domain: &Domain,
        markers: &[Point3<f64>],
        comm: &dyn Communicator,
    ) -> Result<(), CommError> {
        let bins = self.sums.len();
        let mut local = vec![0usize; bins];
        if bins > 0 && !markers.is_empty() {
            let bc = *domain.bc();
            let width = self.bin_width();
            for (_, p) in domain
                .iter_real()
                .filter(|(_, p)| !p.is_coarse_grained() && !self.excluded.contains(&p.id))
            {
                let Some(nearest) = self.geometry.nearest(&bc, &p.position, markers) else {
                    continue;
                };
                let dist = nearest.dist_sq.sqrt();
                if dist < self.max_distance {
                    local[((dist / width) as usize).min(bins - 1)] += 1;
                }
            }
        }

        let mut histogram = vec![0usize; bins];
        for counts in all_gather(comm, local)? {
            for (total, count) in histogram.iter_mut().zip(counts) {
                *total += count;
            }
        }
        let total: usize = histogram.iter().sum();
        if total > 0 {
            let n = total as f64;
            let b = bins as f64;
            for (i, (sum, count)) in self.sums.iter_mut().zip(&histogram).enumerate() {
                let expected = match self.geometry {
                    RegionGeometry::Spherical => {
                        let i = i as f64;
                        n * (3.0 * i * i + 3.0 * i + 1.0) / (b * b * b)
                    }
                    RegionGeometry::Slab => n / b,
                };
                *sum += *count as f64 / expected;
            }
        }
        self.samples += 1;
        Ok(())
    }

    pub fn bins(&self) -> Vec<DensityBin> {
        let width = self.bin_width();
        let scale = if self.samples > 0 { 1.0 / self.samples as f64 } else { 0.0 };
        self.sums
            .iter()
            .enumerate()
            .map(|(i, sum)| DensityBin {
                r_lo: i as f64 * width,
                r_hi: (i + 1) as f64 * width,
                density: sum * scale,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::particle::{Particle, ParticleKind};
    use crate::core::partition::comm::SerialComm;

    fn domain_with_atoms(positions: &[Point3<f64>]) -> Domain {
        let bc = PeriodicBox::cubic(8.0).unwrap();
        let mut domain = Domain::new(bc, &SerialComm, 1.0).unwrap();
        for (i, &position) in positions.iter().enumerate() {
            domain
                .insert(Particle::new(ParticleId(i as u64), ParticleKind::Atomistic, position, 1.0))
                .unwrap();
        }
        domain
    }

    #[test]
    fn uniform_slab_layers_read_one() {
        // One atom in the middle of each unit layer on both sides of x = 4.
        let positions: Vec<_> = (0..8)
            .map(|i| Point3::new(0.5 + i as f64, 4.0, 4.0))
            .collect();
        let domain = domain_with_atoms(&positions);
        let mut profile = DensityProfile::for_box(RegionGeometry::Slab, domain.bc(), 4);

        profile
            .sample(&domain, &[Point3::new(4.0, 4.0, 4.0)], &SerialComm)
            .unwrap();

        let bins = profile.bins();
        assert_eq!(bins.len(), 4);
        assert_eq!(bins[3].r_hi, 4.0);
        for bin in bins {
            assert!((bin.density - 1.0).abs() < 1e-12, "{bin:?}");
        }
    }

    #[test]
    fn spherical_bins_are_normalized_by_shell_volume() {
        // Two bins of width 2: one atom in the inner sphere, seven in the shell.
        let mut positions = vec![Point3::new(4.5, 4.0, 4.0)];
        positions.extend((0..7).map(|i| Point3::new(4.0, 4.0 + 2.5 + 0.1 * i as f64, 4.0)));
        let domain = domain_with_atoms(&positions);
        let mut profile = DensityProfile::for_box(RegionGeometry::Spherical, domain.bc(), 2);

        profile
            .sample(&domain, &[Point3::new(4.0, 4.0, 4.0)], &SerialComm)
            .unwrap();

        let bins = profile.bins();
        assert!((bins[0].density - 1.0).abs() < 1e-12);
        assert!((bins[1].density - 1.0).abs() < 1e-12);
    }

    #[test]
    fn samples_are_averaged_and_exclusions_skipped() {
        let domain = domain_with_atoms(&[Point3::new(4.5, 4.0, 4.0), Point3::new(7.0, 4.0, 4.0)]);
        let mut profile = DensityProfile::for_box(RegionGeometry::Slab, domain.bc(), 2);
        let center = [Point3::new(4.0, 4.0, 4.0)];

        profile.sample(&domain, &center, &SerialComm).unwrap();
        profile.exclude(ParticleId(1));
        profile.sample(&domain, &center, &SerialComm).unwrap();

        assert_eq!(profile.samples(), 2);
        let bins = profile.bins();
        // First sample 1/1 in each bin, second 2/1 inner and 0 outer.
        assert!((bins[0].density - 1.5).abs() < 1e-12);
        assert!((bins[1].density - 0.5).abs() < 1e-12);
    }

    #[test]
    fn profile_without_samples_is_zero() {
        let profile = DensityProfile::new(RegionGeometry::Spherical, 3.0, 3);
        assert!(profile.bins().iter().all(|bin| bin.density == 0.0));
        assert_eq!(profile.bins()[1].r_lo, 1.0);
    }
}
