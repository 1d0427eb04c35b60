//! Transition pipeline module orchestrator following the RSB module
//! specification.
//!
//! Reconciliation, guard walks, the viewport swap, and the history update
//! live in the private `core` module; the router drives it per transition.

mod core;

pub use core::TransitionPhase;

pub(crate) use core::{PipelineEnv, TransitionHost, TransitionOutcome, run};
