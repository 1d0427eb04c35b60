//! Component module orchestrator following the RSB module specification.

mod core;

pub use core::{
    Capabilities, ComponentFactory, ComponentHandle, ComponentSource, LazyComponentFactory,
    NullRenderer, RouteComponent, RouteSnapshot, StaticComponent, ViewRenderer,
};
