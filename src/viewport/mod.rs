//! Viewport agent module orchestrator following the RSB module
//! specification.

mod core;

pub use core::{Candidate, NavModelEntry, RouteContext, ViewportAgent};
