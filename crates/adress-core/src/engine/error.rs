use thiserror::Error;

use super::config::ConfigError;
use crate::core::adress::tuples::TupleError;
use crate::core::forcefield::params::ParamLoadError;
use crate::core::models::ids::ParticleId;
use crate::core::partition::comm::CommError;
use crate::core::partition::domain::PartitionError;
use nalgebra::Point3;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Tuple map error: {source}")]
    Tuple {
        #[from]
        source: TupleError,
    },

    #[error("Communication failed: {source}")]
    Comm {
        #[from]
        source: CommError,
    },

    #[error("Partition error: {source}")]
    Partition {
        #[from]
        source: PartitionError,
    },

    #[error("Parameter loading failed: {source}")]
    Params {
        #[from]
        source: ParamLoadError,
    },

    /// A coarse-grained particle is present without resolved constituents.
    /// The run cannot continue.
    #[error(
        "Coarse-grained particle {id} (ghost: {ghost}) at ({:.6}, {:.6}, {:.6}) has no atomistic constituents on this rank",
        .position.x, .position.y, .position.z
    )]
    FatalConsistency {
        id: ParticleId,
        ghost: bool,
        position: Point3<f64>,
    },

    #[error("Marker particle {0} is not present on any rank")]
    MarkerNotFound(ParticleId),

    #[error("Particle handle is stale or unknown")]
    StaleHandle,

    #[error("Internal logic error: {0}")]
    Internal(String),
}
