use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

new_key_type! {
    /// Handle into the particle arena of a [`Domain`](crate::core::partition::domain::Domain).
    ///
    /// Handles are only meaningful for the decomposition epoch in which they were
    /// obtained; after the domain redistributes particles they must be re-resolved.
    pub struct ParticleKey;
}

/// Globally unique particle identifier, stable across ranks and decompositions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticleId(pub u64);

impl fmt::Display for ParticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ParticleId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
