//! Error module orchestrator following the RSB module specification.
//!
//! Downstream code imports the error surface from here while the
//! implementation details live in the private `types` module.

mod types;

pub use types::{Result, RouterError};
