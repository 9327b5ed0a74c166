//! # qbdt-state
//!
//! Dense engines that a decision tree attaches below its deepest level.
//!
//! - [`AttachedEngine`]: the interface the tree drives
//! - [`DenseEngine`]: the default `Vec`-backed implementation
//! - [`kernels`]: the amplitude loops both use

pub mod dense;
pub mod engine;
pub mod kernels;

pub use dense::DenseEngine;
pub use engine::AttachedEngine;
pub use qbdt_core::{QbdtError, Result};
