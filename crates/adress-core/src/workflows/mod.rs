//! # Workflows Module
//!
//! End-to-end procedures built on the engine.
//!
//! - **System Setup** ([`setup`]) - A cubic lattice of identical molecules with
//!   Maxwell–Boltzmann velocities and their coarse-grained representatives
//! - **Simulation** ([`simulate`]) - A complete per-rank adaptive resolution run
//!   that reports progress and collects thermodynamic records

pub mod setup;
pub mod simulate;
