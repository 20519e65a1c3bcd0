/// Squared distances below this are treated as overlapping particles.
const MIN_DIST_SQ: f64 = 1e-12;
const OVERLAP_ENERGY: f64 = 1e10;

/// 12-6 Lennard-Jones pair kernel.
///
/// Returns the energy and `F/r`, the factor that turns the separation vector
/// `r_i - r_j` into the force on `i`.
#[inline]
pub fn lennard_jones_12_6(dist_sq: f64, sigma: f64, epsilon: f64) -> (f64, f64) {
    if dist_sq < MIN_DIST_SQ {
        return (OVERLAP_ENERGY, 0.0);
    }
    let inv_r2 = 1.0 / dist_sq;
    let s2 = sigma * sigma * inv_r2;
    let s6 = s2 * s2 * s2;
    let s12 = s6 * s6;
    let energy = 4.0 * epsilon * (s12 - s6);
    let force_over_r = 24.0 * epsilon * (2.0 * s12 - s6) * inv_r2;
    (energy, force_over_r)
}

/// Distance at which the Lennard-Jones potential has its minimum, `2^(1/6) σ`.
#[inline]
pub fn lennard_jones_minimum(sigma: f64) -> f64 {
    2f64.powf(1.0 / 6.0) * sigma
}

/// Weeks–Chandler–Andersen kernel: the repulsive branch of Lennard-Jones,
/// shifted up by `epsilon` and truncated at its minimum.
#[inline]
pub fn weeks_chandler_andersen(dist_sq: f64, sigma: f64, epsilon: f64) -> (f64, f64) {
    let r_cut = lennard_jones_minimum(sigma);
    if dist_sq >= r_cut * r_cut {
        return (0.0, 0.0);
    }
    let (energy, force_over_r) = lennard_jones_12_6(dist_sq, sigma, epsilon);
    (energy + epsilon, force_over_r)
}

/// Harmonic spring `k/2 (r - r0)^2`.
///
/// Returns the energy and the signed force magnitude along the bond, positive
/// when the spring pushes the ends apart.
#[inline]
pub fn harmonic(dist: f64, k: f64, r0: f64) -> (f64, f64) {
    let stretch = dist - r0;
    (0.5 * k * stretch * stretch, -k * stretch)
}
