use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum WeightError {
    #[error("Atomistic radius must be non-negative and finite, got {0}")]
    InvalidAtomisticRadius(f64),
    #[error("Hybrid width must be positive and finite, got {0}")]
    InvalidHybridWidth(f64),
}

/// Resolution zone implied by a particle's distance to the nearest marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Zone {
    /// `lambda == 1`.
    Atomistic,
    /// `0 < lambda < 1`.
    Hybrid,
    /// `lambda == 0`.
    Coarse,
}

/// The AdResS resolution weight as a function of squared distance.
///
/// Inside the atomistic radius `r_ex` the weight is one, beyond
/// `r_ex + r_hy` it is zero, and across the hybrid shell it falls off as
/// `cos²(π/(2 r_hy) · (d − r_ex))`, which makes it continuously differentiable
/// at both shell boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightFunction {
    r_ex: f64,
    r_hy: f64,
    r_ex_sq: f64,
    r_outer_sq: f64,
    phase_scale: f64,
}

impl WeightFunction {
    pub fn new(r_ex: f64, r_hy: f64) -> Result<Self, WeightError> {
        if !(r_ex.is_finite() && r_ex >= 0.0) {
            return Err(WeightError::InvalidAtomisticRadius(r_ex));
        }
        if !(r_hy.is_finite() && r_hy > 0.0) {
            return Err(WeightError::InvalidHybridWidth(r_hy));
        }
        let r_outer = r_ex + r_hy;
        Ok(Self {
            r_ex,
            r_hy,
            r_ex_sq: r_ex * r_ex,
            r_outer_sq: r_outer * r_outer,
            phase_scale: PI / (2.0 * r_hy),
        })
    }

    #[inline]
    pub fn r_ex(&self) -> f64 {
        self.r_ex
    }

    #[inline]
    pub fn r_hy(&self) -> f64 {
        self.r_hy
    }

    pub fn zone(&self, dist_sq: f64) -> Zone {
        if dist_sq <= self.r_ex_sq {
            Zone::Atomistic
        } else if dist_sq >= self.r_outer_sq {
            Zone::Coarse
        } else {
            Zone::Hybrid
        }
    }

    #[inline]
    pub fn weight(&self, dist_sq: f64) -> f64 {
        self.evaluate(dist_sq).0
    }

    #[inline]
    pub fn derivative(&self, dist_sq: f64) -> f64 {
        self.evaluate(dist_sq).1
    }

    /// Weight and its derivative with respect to the (unsquared) distance.
    pub fn evaluate(&self, dist_sq: f64) -> (f64, f64) {
        match self.zone(dist_sq) {
            Zone::Atomistic => (1.0, 0.0),
            Zone::Coarse => (0.0, 0.0),
            Zone::Hybrid => {
                let phase = self.phase_scale * (dist_sq.sqrt() - self.r_ex);
                let (sin, cos) = phase.sin_cos();
                (cos * cos, -2.0 * self.phase_scale * cos * sin)
            }
        }
    }
}
