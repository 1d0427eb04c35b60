//! Route configuration module orchestrator following the RSB module
//! specification.

mod core;

pub use core::{
    FallbackFn, FallbackSpec, PlanSpec, Registry, RouteDefinition, TransitionPlan,
    TransitionPlanFn, ViewportConfig,
};
