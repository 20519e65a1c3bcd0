//! # Adaptive Resolution Module
//!
//! Stateless building blocks of the adaptive resolution scheme.
//!
//! - [`weight`] - The smooth resolution weight `lambda(d)` and its derivative,
//!   with the atomistic / hybrid / coarse zone classification it implies.
//! - [`region`] - Geometry of the high-resolution region (spherical or slab)
//!   and nearest-marker queries under periodic boundaries.
//! - [`tuples`] - The coarse-grained to atomistic constituent mapping, with
//!   two-phase tuple registration and per-epoch handle resolution.

pub mod region;
pub mod tuples;
pub mod weight;
