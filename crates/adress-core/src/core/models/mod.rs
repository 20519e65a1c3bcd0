//! # Core Models Module
//!
//! Particle representation shared by every layer of the crate.
//!
//! - [`particle`] - The particle record with its resolution fields (`lambda`,
//!   `lambda_deriv`, `drift`) and the coarse-grained / atomistic distinction.
//! - [`ids`] - Global particle identifiers and the arena handles used by the
//!   spatial partition.

pub mod ids;
pub mod particle;
