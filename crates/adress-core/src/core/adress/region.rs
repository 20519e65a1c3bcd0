use crate::core::models::ids::ParticleId;
use crate::core::partition::bc::PeriodicBox;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Shape of the high-resolution region around each marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegionGeometry {
    /// Sphere around each marker; distances are full 3-D minimum-image distances.
    #[default]
    Spherical,
    /// Slab perpendicular to x; only the x component of the distance counts.
    Slab,
}

/// Where the high-resolution region is anchored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegionCenter {
    /// A single point that never moves.
    Fixed(Point3<f64>),
    /// The current positions of a set of marker particles.
    Markers(Vec<ParticleId>),
}

impl RegionCenter {
    #[inline]
    pub fn is_moving(&self) -> bool {
        matches!(self, RegionCenter::Markers(_))
    }
}

/// Nearest marker as seen from one particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestMarker {
    /// Squared (geometry-aware) distance to the marker.
    pub dist_sq: f64,
    /// Displacement from the particle to the marker.
    pub toward: Vector3<f64>,
}

impl NearestMarker {
    /// Unit vector from the particle toward the marker; zero on top of it.
    pub fn unit_toward(&self) -> Vector3<f64> {
        let norm = self.dist_sq.sqrt();
        if norm > 0.0 {
            self.toward / norm
        } else {
            Vector3::zeros()
        }
    }
}

impl RegionGeometry {
    /// Minimum-image displacement from `position` to `marker` under this geometry.
    pub fn displacement(
        &self,
        bc: &PeriodicBox,
        position: &Point3<f64>,
        marker: &Point3<f64>,
    ) -> Vector3<f64> {
        let d = bc.min_image_vector(marker, position);
        match self {
            RegionGeometry::Spherical => d,
            RegionGeometry::Slab => Vector3::new(d.x, 0.0, 0.0),
        }
    }

    /// Closest marker to `position`; ties go to the earliest marker.
    pub fn nearest(
        &self,
        bc: &PeriodicBox,
        position: &Point3<f64>,
        markers: &[Point3<f64>],
    ) -> Option<NearestMarker> {
        markers
            .iter()
            .map(|marker| {
                let toward = self.displacement(bc, position, marker);
                NearestMarker {
                    dist_sq: toward.norm_squared(),
                    toward,
                }
            })
            .fold(None, |best: Option<NearestMarker>, candidate| match best {
                Some(b) if b.dist_sq <= candidate.dist_sq => Some(b),
                _ => Some(candidate),
            })
    }
}

impl fmt::Display for RegionGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionGeometry::Spherical => write!(f, "spherical"),
            RegionGeometry::Slab => write!(f, "slab"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Unknown region geometry '{0}'")]
pub struct ParseGeometryError(pub String);

impl FromStr for RegionGeometry {
    type Err = ParseGeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spherical" | "sphere" => Ok(RegionGeometry::Spherical),
            "slab" | "slab-x" => Ok(RegionGeometry::Slab),
            _ => Err(ParseGeometryError(s.to_string())),
        }
    }
}
