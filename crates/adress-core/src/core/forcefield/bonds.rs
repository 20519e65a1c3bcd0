use super::potentials::harmonic;
use nalgebra::Vector3;
use serde::Deserialize;

/// Harmonic spring between consecutive constituents of a molecule.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HarmonicBond {
    pub k: f64,
    pub r0: f64,
}

impl HarmonicBond {
    pub fn new(k: f64, r0: f64) -> Self {
        Self { k, r0 }
    }

    /// Energy and the force on the first end for the bond vector
    /// `r_first - r_second`. The second end receives the opposite force.
    pub fn evaluate(&self, separation: &Vector3<f64>) -> (f64, Vector3<f64>) {
        let dist = separation.norm();
        let (energy, magnitude) = harmonic(dist, self.k, self.r0);
        if dist < 1e-12 {
            return (energy, Vector3::zeros());
        }
        (energy, separation * (magnitude / dist))
    }
}
