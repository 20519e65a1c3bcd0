//! # Engine Module
//!
//! The stateful adaptive resolution machinery.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Builders for the resolution parameters and
//!   complete simulation setups, plus the blending [`config::Scheme`]
//! - **Error Handling** ([`error`]) - The engine error taxonomy, including the
//!   fatal consistency error for coarse-grained particles without constituents
//! - **Progress Monitoring** ([`progress`]) - Callback-based progress reporting
//! - **Neighbor List** ([`neighbor_list`]) - Zone classification and Verlet
//!   pair lists split into purely coarse and adaptive pairs
//! - **Synchronization** ([`synchronizer`]) - Centers of mass, marker snapshots,
//!   weight refresh and force redistribution
//! - **Drift Correction** ([`drift`]) - Energy-conserving drift force of the
//!   H-AdResS scheme
//! - **Interactions** ([`interaction`]) - Blended pair and bond evaluation with
//!   energy and virial bookkeeping
//! - **Free-Energy Compensation** ([`fec`]) - Tabulated thermodynamic force in
//!   the hybrid shell
//! - **Density Profile** ([`density`]) - Atomistic density against the distance
//!   to the nearest region center
//! - **Integration** ([`integrator`]) - Velocity-Verlet propagation of atoms
//! - **Facade** ([`adress`]) - [`adress::AdressEngine`], which runs all of the
//!   above in the correct per-step order
//!
//! ## Per-step Order
//!
//! 1. Rebuild the neighbor list when any particle moved more than half the skin
//! 2. Synchronize coarse-grained particles and weights
//! 3. Evaluate pair and bond forces, accumulating energy differences
//! 4. Apply drift correction and free-energy compensation
//! 5. Return ghost forces to their owners
//! 6. Redistribute coarse-grained forces onto atoms

pub mod adress;
pub mod config;
pub mod density;
pub mod drift;
pub mod error;
pub mod fec;
pub mod integrator;
pub mod interaction;
pub mod neighbor_list;
pub mod progress;
pub mod synchronizer;
