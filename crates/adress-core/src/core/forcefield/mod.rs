//! # Forcefield Module
//!
//! Pair and bond kernels plus their parameter files.
//!
//! - [`potentials`] - Pure kernels: Lennard-Jones, WCA and the harmonic spring
//! - [`params`] - Type-indexed pair tables for both resolutions, loaded from TOML
//! - [`bonds`] - The intramolecular harmonic bond
//! - [`term`] - Energy bookkeeping split by contribution

pub mod bonds;
pub mod params;
pub mod potentials;
pub mod term;
