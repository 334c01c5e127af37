//! Shared primitives for the Physalia statistical alignment engine.
//!
//! `physalia-core` provides the foundation the other Physalia crates build on:
//!
//! - **Error types** — [`PhysaliaError`] and [`Result`] for structured error handling
//! - **Log-space arithmetic** — stable log-sum-exp accumulation for probability math
//! - **Randomness** — a small deterministic PRNG passed explicitly through
//!   every stochastic operation

pub mod error;
pub mod logsum;
pub mod rng;

pub use error::{PhysaliaError, Result};
pub use logsum::{log_accum_exp, log_inner_product, log_sum_exp, log_sum_exp_slice};
pub use rng::Xorshift64;
