//! # Spatial Partition Module
//!
//! Geometry and ownership of particles on one rank of a decomposed simulation.
//!
//! ## Components
//!
//! - [`bc`] - Orthorhombic periodic box with minimum-image and folding helpers
//! - [`cells`] - Uniform periodic cell grid used to enumerate candidate pairs
//! - [`comm`] - Lock-step collectives between ranks (`all_gather` and reductions)
//!   over a serial or thread-backed group
//! - [`domain`] - The per-rank particle arena: slab ownership along x, ghost
//!   exchange, ghost force collection and molecule-preserving migration
//!
//! The adaptive-resolution machinery never owns particles; it borrows them from
//! the [`domain::Domain`] through [`ParticleKey`](crate::core::models::ids::ParticleKey)
//! handles that are valid for one decomposition epoch.

pub mod bc;
pub mod cells;
pub mod comm;
pub mod domain;
