//! Router module orchestrator following the RSB module specification.
//!
//! The aggregate wiring the registry, tree builder, and transition pipeline
//! together lives in the private `core` module; this file curates the public
//! surface.

mod core;

pub use core::{Router, RouterConfig};
