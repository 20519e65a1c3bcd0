//! # AdResS++ Core Library
//!
//! A distributed-memory molecular dynamics core for the Adaptive Resolution
//! Scheme (AdResS): molecules near a region of interest are simulated with full
//! atomistic detail, molecules farther away as single coarse-grained beads, and
//! a smooth spatial weight couples the two descriptions.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture.
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Particle`, `Domain`),
//!   the weight function, region geometry, the tuple map and pair potentials.
//!
//! - **[`engine`]: The Logic Core.** The stateful resolution machinery: the
//!   adaptive neighbor list with its zone classification, the per-step
//!   synchronizer (centers of mass, marker broadcast, `lambda` refresh, force
//!   redistribution), the drift-force corrector of the energy-conserving scheme,
//!   blended force and energy evaluation, free-energy compensation and the
//!   velocity-Verlet driver. [`engine::adress::AdressEngine`] ties them together.
//!
//! - **[`workflows`]: The Public API.** End-to-end procedures: building a
//!   molecular lattice and running a complete simulation that reports
//!   thermodynamic records.

pub mod core;
pub mod engine;
pub mod workflows;
