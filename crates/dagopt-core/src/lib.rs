#![forbid(unsafe_code)]
//! dagopt-core: shared vocabulary for the dagopt physical-plan optimizer.
//!
//! - strongly-typed ids (`id`)
//! - the fatal error taxonomy (`error`)
//! - `OptimizerConfig` with env overrides (`config`)
//! - the logical operator DAG handed over by a front end (`operator`)
//! - stable plan fingerprints (`hash`)
//!
//! No search logic lives here; see `dagopt-optimizer`.

pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod operator;
pub mod prelude;

/// Crate version, stamped into explain output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
