//! # Core Module
//!
//! Stateless data structures and pure math shared by the adaptive resolution
//! engine.
//!
//! ## Architecture
//!
//! - **Particle Representation** ([`models`]) - Particles, global identifiers and
//!   arena handles
//! - **Spatial Partition** ([`partition`]) - The periodic box, cell grid, rank
//!   communication and the per-rank particle domain
//! - **Resolution Geometry** ([`adress`]) - The weight function, region shapes
//!   and the coarse-grained to atomistic tuple map
//! - **Interactions** ([`forcefield`]) - Pair and bond kernels with their
//!   parameter files
//!
//! ## Scientific Foundation
//!
//! In the adaptive resolution scheme a molecule is described by a single
//! coarse-grained bead far from the region of interest and by its full set of
//! atoms inside it. The two descriptions are blended in a hybrid shell by a
//! smooth weight `lambda`, which is `1` in the atomistic zone, `0` in the coarse
//! zone and continuously differentiable in between.

pub mod adress;
pub mod forcefield;
pub mod models;
pub mod partition;
