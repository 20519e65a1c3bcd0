use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BoxError {
    #[error("Box edge along axis {axis} must be positive and finite, got {length}")]
    InvalidEdge { axis: usize, length: f64 },
}

/// Orthorhombic, fully periodic simulation box anchored at the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodicBox {
    lengths: Vector3<f64>,
}

impl PeriodicBox {
    pub fn new(lengths: Vector3<f64>) -> Result<Self, BoxError> {
        for axis in 0..3 {
            let length = lengths[axis];
            if !(length.is_finite() && length > 0.0) {
                return Err(BoxError::InvalidEdge { axis, length });
            }
        }
        Ok(Self { lengths })
    }

    pub fn cubic(edge: f64) -> Result<Self, BoxError> {
        Self::new(Vector3::new(edge, edge, edge))
    }

    #[inline]
    pub fn lengths(&self) -> &Vector3<f64> {
        &self.lengths
    }

    #[inline]
    pub fn volume(&self) -> f64 {
        self.lengths.x * self.lengths.y * self.lengths.z
    }

    /// Minimum-image displacement `to - from`.
    #[inline]
    pub fn min_image_vector(&self, to: &Point3<f64>, from: &Point3<f64>) -> Vector3<f64> {
        self.min_image(to - from)
    }

    #[inline]
    pub fn min_image(&self, dv: Vector3<f64>) -> Vector3<f64> {
        Vector3::new(
            dv.x - (dv.x / self.lengths.x).round() * self.lengths.x,
            dv.y - (dv.y / self.lengths.y).round() * self.lengths.y,
            dv.z - (dv.z / self.lengths.z).round() * self.lengths.z,
        )
    }

    /// Folds a position into `[0, L)` along every axis.
    #[inline]
    pub fn wrap(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::new(
            self.fold_coordinate(p.x, 0),
            self.fold_coordinate(p.y, 1),
            self.fold_coordinate(p.z, 2),
        )
    }

    #[inline]
    pub fn fold_coordinate(&self, value: f64, axis: usize) -> f64 {
        let length = self.lengths[axis];
        let folded = value.rem_euclid(length);
        // rem_euclid can round up to exactly `length` for tiny negative inputs.
        if folded >= length { 0.0 } else { folded }
    }
}
